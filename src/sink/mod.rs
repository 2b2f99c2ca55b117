//! Log storage destinations.

pub mod victorialogs;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::LogEntry;
use crate::errors::AppResult;

pub use victorialogs::{VictoriaLogsConfig, VictoriaLogsSink};

#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    /// Hands entries over to the sink. May block under backpressure, returns
    /// `Err(AppError::Cancelled)` if `cancel` fires first.
    async fn write(&self, cancel: &CancellationToken, entries: Vec<LogEntry>) -> AppResult<()>;

    /// Flushes whatever the sink still holds and stops it.
    async fn shutdown(&self);
}
