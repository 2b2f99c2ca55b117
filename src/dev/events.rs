use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::domain::{Event, EventDraft, ObjectRef};
use crate::errors::{AppError, AppResult};
use crate::source::{EventSource, NamespaceFilter, Readiness};

/// Synthetic event source: emits `max_events` events, alternating Normal and
/// Warning, then finishes. `None` runs until cancelled.
pub struct DevEventSource {
    namespace: String,
    rate: Duration,
    max_events: Option<u64>,
    filter: NamespaceFilter,
    readiness: Readiness,
}

impl DevEventSource {
    pub fn new(
        namespace: String,
        rate: Duration,
        max_events: Option<u64>,
        filter: NamespaceFilter,
        readiness: Readiness,
    ) -> Self {
        Self {
            namespace,
            rate,
            max_events,
            filter,
            readiness,
        }
    }

    fn make_event(&self, n: u64) -> AppResult<Event> {
        let (event_type, reason) = if n % 2 == 0 {
            ("Warning", "BackOff")
        } else {
            ("Normal", "Pulled")
        };

        Event::try_from(EventDraft {
            uid: format!("dev-uid-{n}"),
            name: format!("dev-pod-1.{n:x}"),
            namespace: self.namespace.clone(),
            reason: reason.to_string(),
            message: format!("dev event {n}"),
            event_type: event_type.to_string(),
            involved_object: ObjectRef {
                kind: "Pod".to_string(),
                name: "dev-pod-1".to_string(),
                namespace: self.namespace.clone(),
            },
            source: "dev".to_string(),
            first_timestamp: Some(OffsetDateTime::now_utc()),
            last_timestamp: None,
            count: 1,
        })
        .map_err(|e| AppError::Other(e.to_string()))
    }
}

#[async_trait]
impl EventSource for DevEventSource {
    async fn stream(&self, cancel: CancellationToken, tx: mpsc::Sender<Event>) -> AppResult<()> {
        let _ready = self.readiness.clear_on_drop();
        self.readiness.set(true);
        tracing::info!(namespace = %self.namespace, "starting dev-mode event source");

        let mut counter: u64 = 0;

        loop {
            counter += 1;

            let ev = self.make_event(counter)?;
            if self.filter.allows(ev.namespace()) {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    sent = tx.send(ev) => {
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }

            if let Some(max) = self.max_events {
                if counter >= max {
                    tracing::info!(events = counter, "dev-mode finished");
                    return Ok(());
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = sleep(self.rate) => {}
            }
        }
    }
}
