//! # Time Series Module
//!
//! Small bounded series of `(t_ms, value)` points. The ECG detector keeps its
//! recent peaks here and derives the rate from the span of the last N.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub time: u64,
    pub value: i32,
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    data: Vec<Point>,
    capacity: usize,
}

pub trait PointSliceExt {
    fn min_max_time(&self) -> Option<(u64, u64)>;
}

impl PointSliceExt for &[Point] {
    fn min_max_time(&self) -> Option<(u64, u64)> {
        self.iter().fold(None, |acc, point| match acc {
            None => Some((point.time, point.time)),
            Some((min, max)) => Some((min.min(point.time), max.max(point.time))),
        })
    }
}

impl TimeSeries {
    /// Series that retains at most `capacity` points
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Vec::with_capacity(capacity * 2),
            capacity,
        }
    }

    pub fn add_point(&mut self, time: u64, value: i32) {
        self.data.push(Point { time, value });
        // Trim in batches so the common path stays a push.
        if self.data.len() >= self.capacity * 2 {
            let excess = self.data.len() - self.capacity;
            self.data.drain(..excess);
        }
    }

    pub fn last_points(&self, n: usize) -> &[Point] {
        let n = n.min(self.capacity);
        &self.data[self.data.len().saturating_sub(n)..]
    }

    pub fn last_point(&self) -> Option<Point> {
        self.data.last().copied()
    }

    pub fn len(&self) -> usize {
        self.data.len().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_points_window() {
        let mut series = TimeSeries::new(4);
        for i in 0..3 {
            series.add_point(i * 100, i as i32);
        }
        assert_eq!(series.last_points(10).len(), 3);
        assert_eq!(series.last_points(2)[0].time, 100);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut series = TimeSeries::new(3);
        for i in 0..20 {
            series.add_point(i, 0);
        }
        assert_eq!(series.len(), 3);
        let recent = series.last_points(3);
        assert_eq!(recent.min_max_time(), Some((17, 19)));
    }
}
