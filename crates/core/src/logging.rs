use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => LogLevel::Trace,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Info => LogLevel::Info,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Error => LogLevel::Error,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

pub type SharedLogSink = Arc<dyn LogSink>;

#[derive(Default)]
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn log(&self, _record: LogRecord) {}
}

#[derive(Default)]
pub struct VecLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl VecLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: LogRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|guard| guard.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, level: LogLevel, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|record| record.level == level && record.message.contains(needle))
    }
}

impl LogSink for VecLogSink {
    fn log(&self, record: LogRecord) {
        self.push(record);
    }
}

/// Prints records at or above `min_level`; warnings and errors go to stderr.
#[derive(Clone)]
pub struct StdoutLogSink {
    min_level: LogLevel,
}

impl Default for StdoutLogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutLogSink {
    pub fn new() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }

    pub fn with_min_level(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl LogSink for StdoutLogSink {
    fn log(&self, record: LogRecord) {
        if record.level < self.min_level {
            return;
        }
        match record.level {
            LogLevel::Warn | LogLevel::Error => {
                eprintln!("[{}] {}", record.level, record.message)
            }
            _ => println!("[{}] {}", record.level, record.message),
        }
    }
}

/// Forwards records emitted through the `log` facade (used by the HTTP
/// adapters) into a [`LogSink`].
pub struct LogBridge {
    sink: SharedLogSink,
    max_level: log::LevelFilter,
}

impl LogBridge {
    pub fn new(sink: SharedLogSink, max_level: log::LevelFilter) -> Self {
        Self { sink, max_level }
    }

    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let max_level = self.max_level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.sink.log(LogRecord::new(
            record.level().into(),
            format!("{}: {}", record.target(), record.args()),
        ));
    }

    fn flush(&self) {}
}
