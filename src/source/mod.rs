//! Everything upstream of the collector: watching the cluster, turning raw
//! objects into canonical events and handing them over under backpressure.

pub mod backoff;
pub mod filter;
pub mod mapping;
pub mod probe;
pub mod readiness;
pub mod watch;
pub mod watcher;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::Event;
use crate::errors::AppResult;

pub use backoff::Backoff;
pub use filter::NamespaceFilter;
pub use readiness::Readiness;

/// A producer of canonical events.
///
/// `stream` sends events in upstream order and blocks while `tx` is full.
/// It returns `Err(AppError::Cancelled)` once `cancel` fires, or `Ok(())` if
/// the source ran dry on its own. The sender is dropped on return, which is
/// how the consumer learns the source is done.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn stream(&self, cancel: CancellationToken, tx: mpsc::Sender<Event>) -> AppResult<()>;
}
