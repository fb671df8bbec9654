use std::env::{args, var};
use std::str::FromStr;
use std::string::ToString;

use log::{Level, LevelFilter, Log, Metadata, Record};
use strum::IntoEnumIterator;
use strum_macros::{self, Display, EnumIter, EnumString};

fn main() -> Result<(), String> {
    init_logging();

    args()
        .nth(1)
        .ok_or(format!(
            "no demo supplied, use one of {} or see unit tests",
            Demo::iter()
                .map(|d| d.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| {
            Demo::from_str(&selector)
                .map(|demo| match demo {
                    Demo::Mutex => storage_port::sync::mutex::run(),
                    Demo::Condvar => storage_port::sync::condvar::run(),
                    Demo::AtomicPointer => storage_port::sync::atomic_pointer::run(),
                    Demo::Once => storage_port::sync::once::run(),
                    Demo::Scheduler => storage_port::env::scheduler::run(),
                    Demo::Env => storage_port::env::run(),
                })
                .map_err(|e| e.to_string())
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Demo {
    Mutex,
    Condvar,
    AtomicPointer,
    Once,
    Scheduler,
    Env,
}

/// `LEVEL [thread] message` lines on stderr
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let thread = std::thread::current();
        eprintln!(
            "{:<5} [{}] {}",
            record.level(),
            thread.name().unwrap_or("unnamed"),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// level comes from STORAGE_PORT_LOG, info by default
fn init_logging() {
    let level = var("STORAGE_PORT_LOG")
        .ok()
        .and_then(|l| Level::from_str(&l).ok())
        .map(|l| l.to_level_filter())
        .unwrap_or(LevelFilter::Info);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
