use std::collections::BTreeMap;

use thiserror::Error;
use time::OffsetDateTime;

pub const DEFAULT_LEVEL: &str = "info";
pub const DEFAULT_LOG_TYPE: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LogEntryError {
    #[error("invalid log entry: message is empty")]
    MissingMessage,
}

/// A structured log record handed to sinks. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    timestamp: OffsetDateTime,
    level: String,
    log_type: String,
    message: String,
    fields: BTreeMap<String, String>,
}

impl LogEntry {
    /// Empty `level` becomes "info", empty `log_type` becomes "log".
    pub fn new(
        timestamp: OffsetDateTime,
        level: impl Into<String>,
        log_type: impl Into<String>,
        message: impl Into<String>,
        fields: BTreeMap<String, String>,
    ) -> Result<Self, LogEntryError> {
        let message = message.into();
        if message.is_empty() {
            return Err(LogEntryError::MissingMessage);
        }

        let mut level = level.into();
        if level.is_empty() {
            level = DEFAULT_LEVEL.to_string();
        }

        let mut log_type = log_type.into();
        if log_type.is_empty() {
            log_type = DEFAULT_LOG_TYPE.to_string();
        }

        Ok(Self {
            timestamp,
            level,
            log_type,
            message,
            fields,
        })
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn log_type(&self) -> &str {
        &self.log_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}
