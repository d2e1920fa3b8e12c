//! Bench runner: drives the vitals pipeline against simulated hardware
//! until Ctrl-C, logging every record pushed to observers.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use vitalcare::app::{App, Peripherals};
use vitalcare::config::Config;
use vitalcare::hal::{FsStorage, MonotonicClock};
use vitalcare::sim::{pulse_train, ModemBehavior, SimBoard, SimEnvSensor, SimModem};

const POLL_MS: u64 = 10;

const DEMO_PATIENT: &str =
    r#"{"name":"Bench Patient","age":45,"gender":"F","emergencyContact":"+10000000000"}"#;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}, using defaults", e);
            Config::default()
        }
    };
    log::info!("Logging vitals under {}", config.storage.root.display());

    let clock = MonotonicClock::new();
    let board = SimBoard::new(clock);
    // ~80 bpm ECG with a 1500 baseline, 72 bpm optical pulse
    board.set_analog(config.pins.ecg_output, pulse_train(50, 750, 100, 3000, 1500));
    board.set_analog(config.pins.pulse, pulse_train(700, 833, 300, 3000, 1000));

    let peripherals = Peripherals {
        clock: Box::new(clock),
        analog: Box::new(board.clone()),
        digital: Box::new(board.clone()),
        outputs: Box::new(board),
        env: Some(Box::new(SimEnvSensor::present(36.8, 101_000.0))),
        oximeter: None,
        storage: Box::new(FsStorage::mount(&config.storage.root)),
        modem: Some(Box::new(SimModem::new(ModemBehavior::Responsive))),
        rng: Box::new(StdRng::from_entropy()),
    };
    let mut app = App::new(config, peripherals);

    let feed = app.connect_observer();
    std::thread::spawn(move || {
        for record in feed.iter() {
            log::info!("push: {}", record);
        }
    });

    let handle = app.operator_handle();
    let registered = match handle.register(DEMO_PATIENT) {
        Ok(reply) => Some(reply),
        Err(e) => {
            log::error!("Could not register bench patient: {}", e);
            None
        }
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(POLL_MS));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                app.poll();
                if let Some(reply) = &registered {
                    if let Ok(response) = reply.try_recv() {
                        log::info!("Registration: {}", response.message);
                    }
                }
            }
            _ = &mut shutdown => {
                log::info!("Shutting down");
                break;
            }
        }
    }

    let status = app.status_report();
    log::info!(
        "Uptime {}: {} rows logged, {} SMS sent, {} failed",
        status.uptime,
        status.rows_logged,
        status.sms_sent,
        status.sms_failed
    );
}
