//! Batching sink for the VictoriaLogs `jsonline` ingestion endpoint.
//!
//! Entries are queued by [`VictoriaLogsSink::write`] and accumulated by a
//! background worker which flushes when the batch is full, when the flush
//! timer fires, and once more on shutdown. Delivery is best effort: a batch
//! the backend does not accept is logged and dropped.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::LogEntry;
use crate::errors::{AppError, AppResult};
use crate::sink::LogSink;

pub const DEFAULT_BATCH_SIZE: usize = 300;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const QUEUE_CAPACITY: usize = 5000;

pub const CLUSTER_ID_FIELD: &str = "clusterID";
const CONTENT_TYPE_STREAM_JSON: &str = "application/stream+json";

#[derive(Clone, Debug)]
pub struct VictoriaLogsConfig {
    pub endpoint: String,
    pub cluster_id: String,
    pub account_id: String,
    pub project_id: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub timeout: Duration,
    /// Added to every document, overriding entry fields with the same key.
    pub extra_fields: BTreeMap<String, String>,
    /// Stream fields besides the cluster id, which always comes first.
    pub stream_fields: Vec<String>,
}

impl Default for VictoriaLogsConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            cluster_id: String::new(),
            account_id: "0".to_string(),
            project_id: "0".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            extra_fields: BTreeMap::new(),
            stream_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send batch: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("victorialogs returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

pub struct VictoriaLogsSink {
    tx: mpsc::Sender<LogEntry>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VictoriaLogsSink {
    /// Validates the config and starts the flush worker.
    pub fn spawn(config: VictoriaLogsConfig) -> AppResult<Self> {
        if config.endpoint.is_empty() {
            return Err(AppError::Config(
                "victorialogs endpoint is required when the sink is enabled".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(AppError::Config(
                "victorialogs batch size must be positive".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let stop = CancellationToken::new();

        tracing::info!(
            endpoint = %config.endpoint,
            batch_size = config.batch_size,
            flush_interval = ?config.flush_interval,
            "victorialogs sink started"
        );

        let worker = Worker {
            url: ingest_url(&config.endpoint, &config.stream_fields),
            client,
            config,
            rx,
            stop: stop.clone(),
        };
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            tx,
            stop,
            worker: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl LogSink for VictoriaLogsSink {
    fn name(&self) -> &str {
        "victorialogs"
    }

    async fn write(&self, cancel: &CancellationToken, entries: Vec<LogEntry>) -> AppResult<()> {
        for entry in entries {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                sent = self.tx.send(entry) => {
                    sent.map_err(|_| AppError::Other("victorialogs sink is stopped".to_string()))?;
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&self) {
        self.stop.cancel();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "victorialogs worker task failed");
            }
        }
    }
}

struct Worker {
    client: reqwest::Client,
    url: String,
    config: VictoriaLogsConfig,
    rx: mpsc::Receiver<LogEntry>,
    stop: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let period = self.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buffer: Vec<LogEntry> = Vec::with_capacity(self.config.batch_size);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    while let Ok(entry) = self.rx.try_recv() {
                        buffer.push(entry);
                    }
                    self.flush(&mut buffer).await;
                    tracing::info!("victorialogs sink stopped");
                    return;
                }
                entry = self.rx.recv() => match entry {
                    Some(entry) => {
                        buffer.push(entry);
                        if buffer.len() >= self.config.batch_size {
                            ticker.reset();
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    async fn flush(&self, buffer: &mut Vec<LogEntry>) {
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(buffer);
        match self.send(&batch).await {
            Ok(()) => tracing::info!(count = batch.len(), "victorialogs batch sent"),
            Err(e) => tracing::error!(
                error = %e,
                count = batch.len(),
                "failed to deliver batch to victorialogs; dropping it"
            ),
        }
    }

    async fn send(&self, batch: &[LogEntry]) -> Result<(), DeliveryError> {
        let body = encode_batch(batch, &self.config.cluster_id, &self.config.extra_fields)?;

        tracing::debug!(url = %self.url, bytes = body.len(), "sending batch to victorialogs");

        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, CONTENT_TYPE_STREAM_JSON)
            .header("AccountID", &self.config.account_id)
            .header("ProjectID", &self.config.project_id)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        tracing::debug!(status = %status, body = %body, "victorialogs response");

        if !status.is_success() {
            return Err(DeliveryError::Status { status, body });
        }
        Ok(())
    }
}

pub fn ingest_url(endpoint: &str, stream_fields: &[String]) -> String {
    let mut fields = vec![CLUSTER_ID_FIELD.to_string()];
    fields.extend(
        stream_fields
            .iter()
            .filter(|f| !f.is_empty() && f.as_str() != CLUSTER_ID_FIELD)
            .cloned(),
    );

    format!(
        "{}/insert/jsonline?_msg_field=message&_time_field=@timestamp&_stream_fields={}",
        endpoint.trim_end_matches('/'),
        fields.join(",")
    )
}

/// One JSON document per line. Extra fields are applied last and win.
pub fn encode_batch(
    batch: &[LogEntry],
    cluster_id: &str,
    extra_fields: &BTreeMap<String, String>,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::with_capacity(batch.len() * 256);

    for entry in batch {
        let mut doc = serde_json::Map::new();
        doc.insert("@timestamp".into(), format_ts(entry.timestamp()).into());
        doc.insert("message".into(), entry.message().into());
        doc.insert("level".into(), entry.level().into());
        doc.insert("logType".into(), entry.log_type().into());
        doc.insert(CLUSTER_ID_FIELD.into(), cluster_id.into());

        for (k, v) in entry.fields().iter().chain(extra_fields) {
            doc.insert(k.clone(), v.as_str().into());
        }

        serde_json::to_writer(&mut out, &doc)?;
        out.push(b'\n');
    }

    Ok(out)
}

/// RFC 3339 in UTC at second precision.
fn format_ts(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
    ))
    .unwrap_or_else(|_| utc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Mock, Server};
    use time::macros::datetime;
    use tokio::time::sleep;

    fn entry(msg: &str) -> LogEntry {
        let mut fields = BTreeMap::new();
        fields.insert("k8s.namespace".to_string(), "ns1".to_string());
        fields.insert("env".to_string(), "from-entry".to_string());
        LogEntry::new(
            datetime!(2025-01-02 03:04:05.678 +02:00),
            "warning",
            "event",
            msg,
            fields,
        )
        .unwrap()
    }

    fn config(endpoint: String) -> VictoriaLogsConfig {
        VictoriaLogsConfig {
            endpoint,
            cluster_id: "c1".to_string(),
            ..Default::default()
        }
    }

    async fn wait_until_matched(mock: &Mock) {
        for _ in 0..200 {
            if mock.matched_async().await {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn url_always_starts_stream_fields_with_cluster_id() {
        assert_eq!(
            ingest_url("http://vl:9428/", &["k8s.namespace".to_string()]),
            "http://vl:9428/insert/jsonline?_msg_field=message&_time_field=@timestamp&_stream_fields=clusterID,k8s.namespace"
        );
        assert!(ingest_url("http://vl", &[]).ends_with("_stream_fields=clusterID"));
        assert!(
            ingest_url("http://vl", &["clusterID".to_string(), "k8s.kind".to_string()])
                .ends_with("_stream_fields=clusterID,k8s.kind")
        );
    }

    #[test]
    fn encodes_one_document_per_line_with_extra_fields_last() {
        let mut extra = BTreeMap::new();
        extra.insert("env".to_string(), "prod".to_string());

        let body = encode_batch(&[entry("first"), entry("second")], "c1", &extra).unwrap();
        let text = String::from_utf8(body).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(text.ends_with('\n'));

        let doc: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(doc["@timestamp"], "2025-01-02T01:04:05Z");
        assert_eq!(doc["message"], "first");
        assert_eq!(doc["level"], "warning");
        assert_eq!(doc["logType"], "event");
        assert_eq!(doc["clusterID"], "c1");
        assert_eq!(doc["k8s.namespace"], "ns1");
        assert_eq!(doc["env"], "prod");
    }

    #[tokio::test]
    async fn flushes_when_batch_is_full() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/insert/jsonline")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("_msg_field".into(), "message".into()),
                Matcher::UrlEncoded("_time_field".into(), "@timestamp".into()),
                Matcher::UrlEncoded("_stream_fields".into(), "clusterID".into()),
            ]))
            .match_header("content-type", CONTENT_TYPE_STREAM_JSON)
            .match_header("AccountID", "0")
            .match_header("ProjectID", "0")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""message":"first""#.into()),
                Matcher::Regex(r#""message":"second""#.into()),
            ]))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let sink = VictoriaLogsSink::spawn(VictoriaLogsConfig {
            batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            ..config(server.url())
        })
        .unwrap();

        let cancel = CancellationToken::new();
        sink.write(&cancel, vec![entry("first")]).await.unwrap();
        sink.write(&cancel, vec![entry("second")]).await.unwrap();

        wait_until_matched(&mock).await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn flushes_single_entry_on_timer() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/insert/jsonline")
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex(r#""message":"lonely""#.into()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let sink = VictoriaLogsSink::spawn(VictoriaLogsConfig {
            flush_interval: Duration::from_millis(100),
            ..config(server.url())
        })
        .unwrap();

        sink.write(&CancellationToken::new(), vec![entry("lonely")])
            .await
            .unwrap();

        wait_until_matched(&mock).await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_buffer_exactly_once() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/insert/jsonline")
            .match_query(Matcher::Any)
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""message":"a""#.into()),
                Matcher::Regex(r#""message":"b""#.into()),
                Matcher::Regex(r#""message":"c""#.into()),
            ]))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let sink = VictoriaLogsSink::spawn(VictoriaLogsConfig {
            flush_interval: Duration::from_secs(3600),
            ..config(server.url())
        })
        .unwrap();

        let cancel = CancellationToken::new();
        sink.write(&cancel, vec![entry("a"), entry("b"), entry("c")])
            .await
            .unwrap();

        sink.shutdown().await;
        mock.assert_async().await;

        // Stopped sinks refuse new entries once the queue is gone.
        sink.shutdown().await;
        assert!(sink.write(&cancel, vec![entry("late")]).await.is_err());
    }

    #[tokio::test]
    async fn rejected_batch_is_dropped_and_sink_keeps_going() {
        let mut server = Server::new_async().await;
        let mut failing = Vec::new();
        for msg in ["one", "two"] {
            failing.push(
                server
                    .mock("POST", "/insert/jsonline")
                    .match_query(Matcher::Any)
                    .match_body(Matcher::Regex(format!(r#""message":"{msg}""#)))
                    .with_status(500)
                    .with_body("backend down")
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let sink = VictoriaLogsSink::spawn(VictoriaLogsConfig {
            batch_size: 1,
            flush_interval: Duration::from_secs(3600),
            ..config(server.url())
        })
        .unwrap();

        let cancel = CancellationToken::new();
        sink.write(&cancel, vec![entry("one")]).await.unwrap();
        wait_until_matched(&failing[0]).await;

        sink.write(&cancel, vec![entry("two")]).await.unwrap();
        wait_until_matched(&failing[1]).await;

        sink.shutdown().await;
        for mock in &failing {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn write_is_cancellable() {
        let sink = VictoriaLogsSink::spawn(config("http://127.0.0.1:9".to_string())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = sink.write(&cancel, vec![entry("x")]).await;
        assert!(matches!(res, Err(AppError::Cancelled)));
        sink.shutdown().await;
    }

    #[test]
    fn missing_endpoint_is_a_config_error() {
        let err = VictoriaLogsSink::spawn(VictoriaLogsConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }
}
