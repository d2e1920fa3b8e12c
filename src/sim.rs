//! # Simulated Hardware Module
//!
//! Deterministic stand-ins for every capability in `hal`. Handles are cheap
//! clones sharing one inner state, so a test can keep a handle for scripting
//! and inspection while the pipeline owns another.
//!
//! Waveforms are plain functions of the simulated time, which keeps a
//! scenario reproducible down to the sample.

use crate::error::{ModemError, SensorFault, StorageError};
use crate::hal::{
    AnalogIn, AppendWriter, Clock, DigitalIn, DigitalOut, EnvSensor, ModemPort, Oximeter, Storage,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

pub type AnalogWave = Box<dyn Fn(u64) -> u16>;
pub type DigitalWave = Box<dyn Fn(u64) -> bool>;

/// Square pulse train: `high` for `width_ms` starting at `phase_ms + k * period_ms`
pub fn pulse_train(
    phase_ms: u64,
    period_ms: u64,
    width_ms: u64,
    high: u16,
    low: u16,
) -> AnalogWave {
    Box::new(move |t| {
        if t >= phase_ms && (t - phase_ms) % period_ms < width_ms {
            high
        } else {
            low
        }
    })
}

pub fn constant(code: u16) -> AnalogWave {
    Box::new(move |_| code)
}

/// Digital line asserted inside `[from_ms, to_ms)`
pub fn asserted_between(from_ms: u64, to_ms: u64) -> DigitalWave {
    Box::new(move |t| t >= from_ms && t < to_ms)
}

struct BoardInner {
    analog: HashMap<u8, AnalogWave>,
    digital: HashMap<u8, DigitalWave>,
    outputs: HashMap<u8, bool>,
    rising_edges: HashMap<u8, usize>,
}

/// Scripted ADC, GPIO inputs and recorded GPIO outputs
#[derive(Clone)]
pub struct SimBoard {
    clock: Rc<dyn Clock>,
    inner: Rc<RefCell<BoardInner>>,
}

impl SimBoard {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self {
            clock: Rc::new(clock),
            inner: Rc::new(RefCell::new(BoardInner {
                analog: HashMap::new(),
                digital: HashMap::new(),
                outputs: HashMap::new(),
                rising_edges: HashMap::new(),
            })),
        }
    }

    pub fn set_analog(&self, pin: u8, wave: AnalogWave) {
        self.inner.borrow_mut().analog.insert(pin, wave);
    }

    pub fn set_digital(&self, pin: u8, wave: DigitalWave) {
        self.inner.borrow_mut().digital.insert(pin, wave);
    }

    pub fn output(&self, pin: u8) -> bool {
        self.inner.borrow().outputs.get(&pin).copied().unwrap_or(false)
    }

    /// How many times `pin` went from low to high
    pub fn rising_edges(&self, pin: u8) -> usize {
        self.inner.borrow().rising_edges.get(&pin).copied().unwrap_or(0)
    }
}

impl AnalogIn for SimBoard {
    fn read(&mut self, pin: u8) -> u16 {
        let now = self.clock.now_ms();
        let inner = self.inner.borrow();
        inner.analog.get(&pin).map(|wave| wave(now).min(4095)).unwrap_or(0)
    }
}

impl DigitalIn for SimBoard {
    fn read(&mut self, pin: u8) -> bool {
        let now = self.clock.now_ms();
        let inner = self.inner.borrow();
        inner.digital.get(&pin).map(|wave| wave(now)).unwrap_or(false)
    }
}

impl DigitalOut for SimBoard {
    fn write(&mut self, pin: u8, high: bool) {
        let mut inner = self.inner.borrow_mut();
        let was_high = inner.outputs.insert(pin, high).unwrap_or(false);
        if high && !was_high {
            *inner.rising_edges.entry(pin).or_insert(0) += 1;
        }
    }
}

/// Environmental sensor with fixed readings
#[derive(Debug, Clone)]
pub struct SimEnvSensor {
    pub present: bool,
    pub temp_c: f32,
    pub pressure_pa: f32,
}

impl SimEnvSensor {
    pub fn present(temp_c: f32, pressure_pa: f32) -> Self {
        Self {
            present: true,
            temp_c,
            pressure_pa,
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            temp_c: 0.0,
            pressure_pa: 0.0,
        }
    }
}

impl EnvSensor for SimEnvSensor {
    fn begin(&mut self) -> bool {
        self.present
    }

    fn read_temp_c(&mut self) -> Result<f32, SensorFault> {
        if self.present {
            Ok(self.temp_c)
        } else {
            Err(SensorFault::Absent)
        }
    }

    fn read_pressure_pa(&mut self) -> Result<f32, SensorFault> {
        if self.present {
            Ok(self.pressure_pa)
        } else {
            Err(SensorFault::Absent)
        }
    }
}

/// Oximeter whose reading the test can change at any time
#[derive(Debug, Clone)]
pub struct SimOximeter {
    spo2: Rc<Cell<f32>>,
}

impl SimOximeter {
    pub fn new(spo2: f32) -> Self {
        Self {
            spo2: Rc::new(Cell::new(spo2)),
        }
    }

    pub fn set(&self, spo2: f32) {
        self.spo2.set(spo2);
    }
}

impl Oximeter for SimOximeter {
    fn read_spo2_pct(&mut self) -> Result<f32, SensorFault> {
        Ok(self.spo2.get())
    }
}

/// In-memory card
#[derive(Debug, Clone)]
pub struct MemStorage {
    ready: Rc<Cell<bool>>,
    files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: Rc::new(Cell::new(ready)),
            files: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.files
            .borrow()
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

impl Storage for MemStorage {
    fn is_ready(&self) -> bool {
        self.ready.get()
    }

    fn open_append(&mut self, path: &str) -> Result<Box<dyn AppendWriter + '_>, StorageError> {
        if !self.ready.get() {
            return Err(StorageError::NotReady);
        }
        self.files.borrow_mut().entry(path.to_string()).or_default();
        Ok(Box::new(MemAppender {
            files: self.files.clone(),
            path: path.to_string(),
        }))
    }
}

struct MemAppender {
    files: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    path: String,
}

impl AppendWriter for MemAppender {
    fn size(&self) -> u64 {
        self.files.borrow().get(&self.path).map(|f| f.len() as u64).unwrap_or(0)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.files
            .borrow_mut()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}

/// How the simulated modem answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemBehavior {
    Responsive,
    /// Never answers anything
    Silent,
    /// Answers the probe but rejects every recipient
    RejectSend,
}

#[derive(Debug, Default)]
struct ModemInner {
    replies: VecDeque<String>,
    recipient: Option<String>,
    sent: Vec<(String, String)>,
    commands: Vec<String>,
}

/// SIM800-style modem speaking the text-mode AT subset
#[derive(Debug, Clone)]
pub struct SimModem {
    behavior: Rc<Cell<ModemBehavior>>,
    inner: Rc<RefCell<ModemInner>>,
}

impl SimModem {
    pub fn new(behavior: ModemBehavior) -> Self {
        Self {
            behavior: Rc::new(Cell::new(behavior)),
            inner: Rc::new(RefCell::new(ModemInner::default())),
        }
    }

    pub fn set_behavior(&self, behavior: ModemBehavior) {
        self.behavior.set(behavior);
    }

    /// Delivered messages as `(recipient, body)`
    pub fn sent(&self) -> Vec<(String, String)> {
        self.inner.borrow().sent.clone()
    }

    /// Every command line written, without terminators
    pub fn commands(&self) -> Vec<String> {
        self.inner.borrow().commands.clone()
    }
}

impl ModemPort for SimModem {
    fn write(&mut self, bytes: &[u8]) -> Result<(), ModemError> {
        let behavior = self.behavior.get();
        let mut inner = self.inner.borrow_mut();

        if let Some((&0x1A, body)) = bytes.split_last() {
            let body = String::from_utf8_lossy(body).into_owned();
            inner.commands.push("<body>".to_string());
            if behavior == ModemBehavior::Responsive {
                if let Some(to) = inner.recipient.take() {
                    inner.sent.push((to, body));
                    let n = inner.sent.len();
                    inner.replies.push_back(format!("+CMGS: {}", n));
                    inner.replies.push_back("OK".to_string());
                }
            }
            return Ok(());
        }

        let line = String::from_utf8_lossy(bytes).trim().to_string();
        inner.commands.push(line.clone());
        if behavior == ModemBehavior::Silent {
            return Ok(());
        }

        if let Some(rest) = line.strip_prefix("AT+CMGS=") {
            if behavior == ModemBehavior::RejectSend {
                inner.replies.push_back("ERROR".to_string());
            } else {
                inner.recipient = Some(rest.trim_matches('"').to_string());
                inner.replies.push_back(">".to_string());
            }
        } else if line.starts_with("AT") {
            inner.replies.push_back("OK".to_string());
        } else {
            inner.replies.push_back("ERROR".to_string());
        }
        Ok(())
    }

    fn read_line(&mut self) -> Option<String> {
        self.inner.borrow_mut().replies.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_train_shape() {
        let wave = pulse_train(700, 1000, 300, 3000, 1000);
        assert_eq!(wave(0), 1000);
        assert_eq!(wave(700), 3000);
        assert_eq!(wave(999), 3000);
        assert_eq!(wave(1000), 1000);
        assert_eq!(wave(1700), 3000);
    }

    #[test]
    fn test_board_reads_follow_clock() {
        let clock = ManualClock::new(0);
        let mut board = SimBoard::new(clock.clone());
        board.set_analog(39, pulse_train(100, 1000, 100, 4000, 0));

        assert_eq!(AnalogIn::read(&mut board, 39), 0);
        clock.set(100);
        assert_eq!(AnalogIn::read(&mut board, 39), 4000);
        assert_eq!(AnalogIn::read(&mut board, 12), 0);
    }

    #[test]
    fn test_board_counts_output_edges() {
        let mut board = SimBoard::new(ManualClock::new(0));
        board.write(4, true);
        board.write(4, true);
        board.write(4, false);
        board.write(4, true);
        assert_eq!(board.rising_edges(4), 2);
        assert!(board.output(4));
    }

    #[test]
    fn test_modem_text_mode_exchange() {
        let mut modem = SimModem::new(ModemBehavior::Responsive);
        modem.write(b"AT+CMGF=1\r\n").unwrap();
        assert_eq!(modem.read_line().as_deref(), Some("OK"));
        modem.write(b"AT+CMGS=\"+100\"\r\n").unwrap();
        assert_eq!(modem.read_line().as_deref(), Some(">"));
        modem.write(b"hello\x1A").unwrap();
        assert_eq!(modem.read_line().as_deref(), Some("+CMGS: 1"));
        assert_eq!(modem.sent(), vec![("+100".to_string(), "hello".to_string())]);
    }

    #[test]
    fn test_silent_modem_never_answers() {
        let mut modem = SimModem::new(ModemBehavior::Silent);
        modem.write(b"AT\r\n").unwrap();
        assert!(modem.read_line().is_none());
    }
}
