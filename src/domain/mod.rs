//! Canonical value types shared by the source, collector and sinks.

pub mod event;
pub mod log_entry;

pub use event::{Event, EventDraft, EventError, ObjectRef};
pub use log_entry::{LogEntry, LogEntryError};
