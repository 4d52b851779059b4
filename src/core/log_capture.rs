//! Tee logger: forwards to `env_logger` and mirrors every record into a [`LogRingBuffer`].
//!
//! The `log` facade is the host's diagnostics channel. Anything logged by the
//! host (or by this crate) lands in the ring buffer that `/errors` reads.
//! Capture has its own level, so a quiet console still records info messages.

use log::{LevelFilter, Log, Metadata, Record};
use std::sync::Arc;

use super::log_buffer::{LogRecord, LogRingBuffer, Severity};

/// Message appended once when capture starts, so callers can tell when the subscription began.
pub const SUBSCRIPTION_MARKER: &str = "[LogStore] subscription started";

/// Default capture level: everything except debug and trace chatter.
pub const DEFAULT_CAPTURE_LEVEL: LevelFilter = LevelFilter::Info;

pub struct LogCapture {
    inner: env_logger::Logger,
    buffer: Arc<LogRingBuffer>,
    level: LevelFilter,
}

impl LogCapture {
    pub fn new(inner: env_logger::Logger, buffer: Arc<LogRingBuffer>) -> Self {
        Self {
            inner,
            buffer,
            level: DEFAULT_CAPTURE_LEVEL,
        }
    }

    /// Capture records up to `level`, independent of what the console prints.
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Install as the global logger. Fails if a logger is already set.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let max_level = self.inner.filter().max(self.level);
        let buffer = Arc::clone(&self.buffer);
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        buffer.append(LogRecord::new(Severity::Log, SUBSCRIPTION_MARKER, ""));
        Ok(())
    }

    fn captures(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn location(record: &Record) -> String {
        match (record.file(), record.line()) {
            (Some(file), Some(line)) => format!("{} ({}:{})", record.target(), file, line),
            _ => String::new(),
        }
    }
}

impl Log for LogCapture {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.captures(metadata) || self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.captures(record.metadata()) {
            self.buffer.append(LogRecord::new(
                Severity::from(record.level()),
                record.args().to_string(),
                Self::location(record),
            ));
        }
        if self.inner.matches(record) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
