use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::logging::LogFormat;

#[derive(Debug, Parser)]
#[command(
    name = "kube-event-exporter",
    version,
    about = "Ships Kubernetes events to log storage backends"
)]
pub struct Cli {
    /// YAML config file; ignored if it does not exist
    #[arg(long = "config", env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Only export events from these namespaces (comma separated)
    #[arg(long = "include-namespaces", env = "K8S_INCLUDE_NAMESPACES", value_delimiter = ',')]
    pub include_namespaces: Option<Vec<String>>,

    /// Never export events from these namespaces (comma separated)
    #[arg(long = "exclude-namespaces", env = "K8S_EXCLUDE_NAMESPACES", value_delimiter = ',')]
    pub exclude_namespaces: Option<Vec<String>>,

    /// Enable the VictoriaLogs sink
    #[arg(long = "vl-enabled", env = "VL_ENABLED")]
    pub vl_enabled: Option<bool>,

    /// VictoriaLogs base URL (e.g. http://victorialogs:9428)
    #[arg(long = "vl-endpoint", env = "VL_ENDPOINT")]
    pub vl_endpoint: Option<String>,

    /// Cluster identifier added to every record
    #[arg(long = "vl-cluster-id", env = "VL_CLUSTER_ID")]
    pub vl_cluster_id: Option<String>,

    #[arg(long = "vl-account-id", env = "VL_ACCOUNT_ID")]
    pub vl_account_id: Option<String>,

    #[arg(long = "vl-project-id", env = "VL_PROJECT_ID")]
    pub vl_project_id: Option<String>,

    /// Records per batch before an early flush
    #[arg(long = "vl-batch-size", env = "VL_BATCH_SIZE")]
    pub vl_batch_size: Option<usize>,

    /// Flush interval (e.g. 30s, 1m)
    #[arg(long = "vl-flush-time", env = "VL_FLUSH_TIME", value_parser = parse_duration)]
    pub vl_flush_time: Option<Duration>,

    /// HTTP timeout per batch
    #[arg(long = "vl-timeout", env = "VL_TIMEOUT", value_parser = parse_duration)]
    pub vl_timeout: Option<Duration>,

    /// Extra stream fields (comma separated); clusterID is always first
    #[arg(long = "vl-stream-fields", env = "VL_STREAM_FIELDS", value_delimiter = ',')]
    pub vl_stream_fields: Option<Vec<String>>,

    /// Static field added to every record, KEY=VALUE (repeatable)
    #[arg(long = "vl-extra-field", value_parser = parse_key_value)]
    pub vl_extra_fields: Vec<(String, String)>,

    /// Port for /healthz and /ready
    #[arg(long = "health-port", env = "HEALTH_PORT")]
    pub health_port: Option<u16>,

    /// trace, debug, info, warn or error
    #[arg(long = "log-level", env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormatArg>,

    /// How long to wait for sinks to flush on shutdown
    #[arg(long = "shutdown-grace", env = "SHUTDOWN_GRACE", value_parser = parse_duration)]
    pub shutdown_grace: Option<Duration>,

    /// Dev mode: synthesize events without a cluster
    #[arg(long = "dev", default_value_t = false)]
    pub dev: bool,

    /// Dev: namespace of the synthetic events
    #[arg(long = "dev-namespace", default_value = "default")]
    pub dev_namespace: String,

    /// Dev: milliseconds between events
    #[arg(long = "dev-rate-ms", default_value_t = 500)]
    pub dev_rate_ms: u64,

    /// Dev: stop after this many events
    #[arg(long = "dev-events")]
    pub dev_events: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(v: LogFormatArg) -> Self {
        match v {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

/// Go-style durations: `500ms`, `30s`, `1m30s`, `2h`, or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("invalid duration '{s}'"));
        }
        let n: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration '{s}'"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let too_large = || format!("duration '{s}' is too large");
        let part = match unit {
            "ms" => Duration::from_millis(n),
            "s" => Duration::from_secs(n),
            "m" => Duration::from_secs(n.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(n.checked_mul(3600).ok_or_else(too_large)?),
            "" => return Err(format!("missing unit in duration '{s}'")),
            other => return Err(format!("unknown unit '{other}' in duration '{s}'")),
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
    }

    Ok(total)
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("invalid format '{s}', expected KEY=VALUE")),
    }
}
