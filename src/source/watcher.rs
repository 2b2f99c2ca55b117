use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::domain::Event;
use crate::errors::{AppError, AppResult};
use crate::source::watch::{EventWatch, WatchItem};
use crate::source::{Backoff, EventSource, NamespaceFilter, Readiness};

/// Reconnecting event source on top of an [`EventWatch`].
///
/// Connecting -> Streaming -> BackingOff -> Connecting, until cancelled.
/// There is no retry limit. The backoff resets on every successful connect.
/// Events missed while disconnected are not replayed.
pub struct WatchSource<W> {
    watch: W,
    filter: NamespaceFilter,
    readiness: Readiness,
    backoff: Backoff,
}

impl<W: EventWatch> WatchSource<W> {
    pub fn new(watch: W, filter: NamespaceFilter, readiness: Readiness) -> Self {
        Self {
            watch,
            filter,
            readiness,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl<W: EventWatch> EventSource for WatchSource<W> {
    async fn stream(&self, cancel: CancellationToken, tx: mpsc::Sender<Event>) -> AppResult<()> {
        let _ready = self.readiness.clear_on_drop();
        let mut backoff = self.backoff.clone();

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                r = self.watch.open() => r,
            };

            let mut items = match opened {
                Ok(items) => {
                    backoff.reset();
                    self.readiness.set(true);
                    tracing::info!("event watch established");
                    items
                }
                Err(e) => {
                    let d = backoff.next_delay();
                    tracing::error!(error = %e, delay = ?d, "failed to start event watch; backing off");
                    sleep_or_cancel(d, &cancel).await?;
                    continue;
                }
            };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    next = items.next() => next,
                };

                match next {
                    None => {
                        tracing::info!("event watch closed; reconnecting");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "event watch failed; reconnecting");
                        break;
                    }
                    Some(Ok(WatchItem::Rejected(e))) => {
                        tracing::warn!(error = %e, "dropping event that could not be mapped");
                    }
                    Some(Ok(WatchItem::Mapped(ev))) => {
                        tracing::debug!(
                            namespace = %ev.namespace(),
                            name = %ev.name(),
                            reason = %ev.reason(),
                            event_type = %ev.event_type(),
                            "received event"
                        );

                        if !self.filter.allows(ev.namespace()) {
                            continue;
                        }

                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(AppError::Cancelled),
                            sent = tx.send(ev) => {
                                if sent.is_err() {
                                    tracing::debug!("event receiver dropped; stopping watch");
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }

            self.readiness.set(false);
            sleep_or_cancel(backoff.next_delay(), &cancel).await?;
        }
    }
}

async fn sleep_or_cancel(d: Duration, cancel: &CancellationToken) -> AppResult<()> {
    tokio::select! {
        _ = sleep(d) => Ok(()),
        _ = cancel.cancelled() => Err(AppError::Cancelled),
    }
}
