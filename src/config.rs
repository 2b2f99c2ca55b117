use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::cli::{self, Cli};
use crate::errors::{AppError, AppResult};
use crate::logging::{LogConfig, LogFormat};
use crate::sink::victorialogs::{
    VictoriaLogsConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_TIMEOUT,
};

pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// `VL_EXTRA_<KEY>=value` adds `<key>` (lower-cased) to every record.
pub const EXTRA_FIELD_ENV_PREFIX: &str = "VL_EXTRA_";

#[derive(Clone, Debug)]
pub struct DevConfig {
    pub namespace: String,
    pub rate: Duration,
    pub max_events: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    /// `None` when the sink is disabled.
    pub victoria_logs: Option<VictoriaLogsConfig>,
    pub health_port: u16,
    pub log: LogConfig,
    pub shutdown_grace: Duration,
    pub dev: Option<DevConfig>,
}

/// Layout of the optional YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub kubernetes: KubernetesSection,
    pub victoria_logs: VictoriaLogsSection,
    pub health: HealthSection,
    pub logger: LoggerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct KubernetesSection {
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VictoriaLogsSection {
    pub enabled: bool,
    pub endpoint: String,
    pub cluster_id: String,
    pub account_id: Option<String>,
    pub project_id: Option<String>,
    pub batch_size: Option<usize>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub flush_time: Option<Duration>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Option<Duration>,
    pub extra_fields: BTreeMap<String, String>,
    pub stream_fields: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggerSection {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_grace: Option<Duration>,
}

impl FileConfig {
    /// Reads `path` if it exists; a missing file is an empty config.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

impl TryFrom<Cli> for Config {
    type Error = AppError;

    fn try_from(cli: Cli) -> AppResult<Self> {
        let file = FileConfig::load(&cli.config)?;
        Config::merge(file, cli, utf8_vars(std::env::vars_os()))
    }
}

impl Config {
    /// File values first, then environment/CLI values on top.
    pub fn merge(
        file: FileConfig,
        cli: Cli,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> AppResult<Self> {
        let vl = file.victoria_logs;

        let mut extra_fields = vl.extra_fields;
        extra_fields.extend(extra_fields_from_env(env));
        extra_fields.extend(cli.vl_extra_fields);

        let victoria_logs = if cli.vl_enabled.unwrap_or(vl.enabled) {
            let endpoint = cli.vl_endpoint.unwrap_or(vl.endpoint);
            if endpoint.trim().is_empty() {
                return Err(AppError::Config(
                    "victorialogs is enabled but no endpoint is set (VL_ENDPOINT)".to_string(),
                ));
            }

            let batch_size = cli
                .vl_batch_size
                .or(vl.batch_size)
                .unwrap_or(DEFAULT_BATCH_SIZE);
            if batch_size == 0 {
                return Err(AppError::Config(
                    "victorialogs batch size must be positive".to_string(),
                ));
            }

            Some(VictoriaLogsConfig {
                endpoint,
                cluster_id: cli.vl_cluster_id.unwrap_or(vl.cluster_id),
                account_id: non_empty_or(cli.vl_account_id.or(vl.account_id), "0"),
                project_id: non_empty_or(cli.vl_project_id.or(vl.project_id), "0"),
                batch_size,
                flush_interval: positive_or(
                    cli.vl_flush_time.or(vl.flush_time),
                    DEFAULT_FLUSH_INTERVAL,
                ),
                timeout: positive_or(cli.vl_timeout.or(vl.timeout), DEFAULT_TIMEOUT),
                extra_fields,
                stream_fields: cli
                    .vl_stream_fields
                    .unwrap_or(vl.stream_fields)
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect(),
            })
        } else {
            None
        };

        let dev = cli.dev.then(|| DevConfig {
            namespace: cli.dev_namespace,
            rate: Duration::from_millis(cli.dev_rate_ms),
            max_events: cli.dev_events,
        });

        Ok(Self {
            include_namespaces: clean_list(
                cli.include_namespaces
                    .unwrap_or(file.kubernetes.include_namespaces),
            ),
            exclude_namespaces: clean_list(
                cli.exclude_namespaces
                    .unwrap_or(file.kubernetes.exclude_namespaces),
            ),
            victoria_logs,
            health_port: cli
                .health_port
                .or(file.health.port)
                .unwrap_or(DEFAULT_HEALTH_PORT),
            log: LogConfig {
                level: cli
                    .log_level
                    .or(file.logger.level)
                    .unwrap_or_else(|| "info".to_string()),
                format: cli
                    .log_format
                    .map(LogFormat::from)
                    .or(file.logger.format)
                    .unwrap_or_default(),
            },
            shutdown_grace: cli
                .shutdown_grace
                .or(file.logger.shutdown_grace)
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE),
            dev,
        })
    }
}

pub fn extra_fields_from_env(
    env: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    env.into_iter()
        .filter_map(|(k, v)| {
            let key = k.strip_prefix(EXTRA_FIELD_ENV_PREFIX)?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_ascii_lowercase(), v))
        })
        .collect()
}

/// Drops variables whose name or value is not valid UTF-8.
pub fn utf8_vars(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}

fn clean_list(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty_or(v: Option<String>, default: &str) -> String {
    v.filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn positive_or(v: Option<Duration>, default: Duration) -> Duration {
    v.filter(|d| !d.is_zero()).unwrap_or(default)
}

/// Accepts a Go-style duration string or a number of seconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Secs(n)) => Ok(Some(Duration::from_secs(n))),
        Some(Raw::Text(s)) => cli::parse_duration(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
