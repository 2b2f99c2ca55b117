use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{Event, LogEntry, LogEntryError};
use crate::errors::{AppError, AppResult};
use crate::sink::LogSink;
use crate::source::EventSource;

/// Capacity of the channel between the source and the collector.
pub const EVENT_BUFFER: usize = 100;

/// Every event becomes this log type for now.
pub const EVENT_LOG_TYPE: &str = "event";

/// Bridges one event source to any number of sinks.
pub struct Collector {
    source: Arc<dyn EventSource>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Collector {
    pub fn new(source: Arc<dyn EventSource>, sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { source, sinks }
    }

    /// Runs until `cancel` fires (`Err(AppError::Cancelled)`) or the source
    /// finishes on its own (`Ok(())`).
    pub async fn run(&self, cancel: CancellationToken) -> AppResult<()> {
        if self.sinks.is_empty() {
            tracing::warn!("no sinks configured; events will be discarded");
        }

        let (tx, mut rx) = mpsc::channel::<Event>(EVENT_BUFFER);

        let source = self.source.clone();
        let source_cancel = cancel.clone();
        let source_task = tokio::spawn(async move {
            match source.stream(source_cancel, tx).await {
                Ok(()) => tracing::info!("event source finished"),
                Err(AppError::Cancelled) => tracing::debug!("event source cancelled"),
                Err(e) => tracing::error!(error = %e, "event source stopped"),
            }
        });

        let res = loop {
            let ev = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(AppError::Cancelled),
                ev = rx.recv() => ev,
            };

            let Some(ev) = ev else {
                break Ok(());
            };

            let entry = match to_log_entry(&ev) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!(error = %e, uid = %ev.uid(), "failed to convert event to log entry");
                    continue;
                }
            };

            self.dispatch(&cancel, entry).await;
        };

        // Let the source see the cancellation (or its closed channel) and unwind.
        drop(rx);
        if let Err(e) = source_task.await {
            tracing::error!(error = %e, "event source task failed");
        }

        res
    }

    /// Sends one entry to every sink in registration order. A failing sink
    /// does not affect the others.
    async fn dispatch(&self, cancel: &CancellationToken, entry: LogEntry) {
        for sink in &self.sinks {
            match sink.write(cancel, vec![entry.clone()]).await {
                Ok(()) => {}
                Err(AppError::Cancelled) => return,
                Err(e) => {
                    tracing::error!(sink = sink.name(), error = %e, "failed to write log entry")
                }
            }
        }
    }
}

pub fn level_for_event_type(event_type: &str) -> &'static str {
    match event_type {
        "Warning" => "warning",
        _ => "info",
    }
}

pub fn to_log_entry(ev: &Event) -> Result<LogEntry, LogEntryError> {
    let fields = BTreeMap::from([
        ("k8s.namespace".to_string(), ev.namespace().to_string()),
        ("k8s.name".to_string(), ev.name().to_string()),
        ("k8s.kind".to_string(), ev.involved_object().kind.clone()),
        ("event.reason".to_string(), ev.reason().to_string()),
        ("event.type".to_string(), ev.event_type().to_string()),
        ("event.source".to_string(), ev.source().to_string()),
        ("event.count".to_string(), ev.count().to_string()),
    ]);

    LogEntry::new(
        ev.first_timestamp(),
        level_for_event_type(ev.event_type()),
        EVENT_LOG_TYPE,
        ev.message(),
        fields,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::domain::{EventDraft, ObjectRef};

    fn event(uid: &str, event_type: &str) -> Event {
        Event::try_from(EventDraft {
            uid: uid.to_string(),
            name: format!("{uid}.abc"),
            namespace: "ns1".to_string(),
            reason: "BackOff".to_string(),
            message: "boom".to_string(),
            event_type: event_type.to_string(),
            involved_object: ObjectRef {
                kind: "Pod".to_string(),
                name: "web".to_string(),
                namespace: "ns1".to_string(),
            },
            source: "kubelet".to_string(),
            first_timestamp: Some(datetime!(2025-01-02 03:04:05 UTC)),
            last_timestamp: None,
            count: 3,
        })
        .unwrap()
    }

    /// Emits its events, then either finishes or waits for cancellation.
    struct FixedSource {
        events: Vec<Event>,
        finish: bool,
    }

    #[async_trait]
    impl EventSource for FixedSource {
        async fn stream(&self, cancel: CancellationToken, tx: mpsc::Sender<Event>) -> AppResult<()> {
            for ev in self.events.clone() {
                if tx.send(ev).await.is_err() {
                    return Ok(());
                }
            }
            if self.finish {
                return Ok(());
            }
            cancel.cancelled().await;
            Err(AppError::Cancelled)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LogSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn write(&self, _cancel: &CancellationToken, entries: Vec<LogEntry>) -> AppResult<()> {
            let mut seen = self.seen.lock().unwrap();
            for e in &entries {
                seen.push(e.fields()["k8s.name"].clone());
            }
            if self.fail {
                return Err(AppError::Other("backend returned 500".into()));
            }
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    #[test]
    fn only_warning_maps_to_warning_level() {
        assert_eq!(level_for_event_type("Warning"), "warning");
        assert_eq!(level_for_event_type("Normal"), "info");
        assert_eq!(level_for_event_type("warning"), "info");
        assert_eq!(level_for_event_type(""), "info");
        assert_eq!(level_for_event_type("Custom"), "info");
    }

    #[test]
    fn event_maps_to_log_entry() {
        let entry = to_log_entry(&event("u1", "Warning")).unwrap();

        assert_eq!(entry.timestamp(), datetime!(2025-01-02 03:04:05 UTC));
        assert_eq!(entry.level(), "warning");
        assert_eq!(entry.log_type(), "event");
        assert_eq!(entry.message(), "boom");

        let f = entry.fields();
        assert_eq!(f["event.count"], "3");
        assert_eq!(f["k8s.namespace"], "ns1");
        assert_eq!(f["k8s.name"], "u1.abc");
        assert_eq!(f["k8s.kind"], "Pod");
        assert_eq!(f["event.reason"], "BackOff");
        assert_eq!(f["event.type"], "Warning");
        assert_eq!(f["event.source"], "kubelet");
        assert_eq!(f.len(), 7);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_other_sinks_or_later_events() {
        let failing = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(RecordingSink::default());

        let collector = Collector::new(
            Arc::new(FixedSource {
                events: vec![event("a", "Warning"), event("b", "Normal")],
                finish: true,
            }),
            vec![failing.clone(), healthy.clone()],
        );

        collector.run(CancellationToken::new()).await.unwrap();

        assert_eq!(*failing.seen.lock().unwrap(), vec!["a.abc", "b.abc"]);
        assert_eq!(*healthy.seen.lock().unwrap(), vec!["a.abc", "b.abc"]);
    }

    #[tokio::test]
    async fn events_are_drained_without_sinks() {
        let collector = Collector::new(
            Arc::new(FixedSource {
                events: (0..(EVENT_BUFFER * 2))
                    .map(|i| event(&i.to_string(), "Normal"))
                    .collect(),
                finish: true,
            }),
            Vec::new(),
        );

        let res = tokio::time::timeout(Duration::from_secs(5), collector.run(CancellationToken::new()))
            .await
            .expect("collector stalled");
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn cancellation_is_reported_as_cancelled() {
        let sink = Arc::new(RecordingSink::default());
        let collector = Collector::new(
            Arc::new(FixedSource {
                events: vec![event("a", "Normal")],
                finish: false,
            }),
            vec![sink.clone()],
        );

        let cancel = CancellationToken::new();
        let run = {
            let cancel = cancel.clone();
            tokio::spawn(async move { collector.run(cancel).await })
        };

        for _ in 0..100 {
            if !sink.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let res = run.await.unwrap();
        assert!(matches!(res, Err(AppError::Cancelled)));
        assert_eq!(*sink.seen.lock().unwrap(), vec!["a.abc"]);
    }
}
