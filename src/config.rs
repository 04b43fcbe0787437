use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the bridge.
///
/// Built once at startup (from a YAML file or from the environment) and
/// passed by reference into each component's constructor; nothing reads
/// ambient state after that.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upstream data-access source.
    pub source: SourceConfig,

    /// Time-series sink.
    pub sink: SinkConfig,

    /// Tag selection: whitelist or discovery.
    #[serde(default)]
    pub tags: TagsConfig,

    /// Cycle period. Default: 1s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Minimum absolute delta to consider a value changed.
    /// Default: 0 = any observed difference.
    #[serde(default)]
    pub change_tolerance: f64,

    /// Measurement name points are written under. Default: "plc_opcda".
    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Static `source` tag attached to every point. Default: "OPCDA".
    #[serde(default = "default_source_label")]
    pub source_label: String,

    /// Static `machine` tag attached to every point; empty = omitted.
    #[serde(default)]
    pub machine_label: String,

    /// Reconnect backoff tuning.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Pending backlog size that logs a warning after a failed flush.
    /// Default: 10000.
    #[serde(default = "default_pending_warn_threshold")]
    pub pending_warn_threshold: usize,

    /// Prometheus health metrics server.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Upstream data-access source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// ProgID of the DA server (e.g. "Kepware.KEPServerEX.V6").
    pub server: String,

    /// Remote gateway host; absent = local.
    #[serde(default)]
    pub host: Option<String>,

    /// Data-access gateway endpoint. Default: "http://localhost:7766".
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Gateway request timeout. Default: 5s.
    #[serde(default = "default_source_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Tag selection configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsConfig {
    /// Explicit tag set; non-empty bypasses discovery.
    #[serde(default)]
    pub whitelist: Vec<String>,

    /// Namespace root/channel for discovery when the whitelist is empty.
    #[serde(default)]
    pub browse_root: String,
}

/// Time-series sink configuration (InfluxDB v2).
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Base URL (e.g. "http://localhost:8086").
    pub url: String,

    /// API token.
    pub token: String,

    /// Organization.
    pub org: String,

    /// Bucket.
    pub bucket: String,

    /// Write request timeout. Default: 10s.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Wait after a failed read before the first reconnect attempt.
    /// Default: 3s.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Wait between subsequent reconnect attempts. Default: 5s.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Health metrics server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Enable the metrics server. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: "127.0.0.1:9600".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_measurement() -> String {
    "plc_opcda".to_string()
}

fn default_source_label() -> String {
    "OPCDA".to_string()
}

fn default_gateway_url() -> String {
    "http://localhost:7766".to_string()
}

fn default_source_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(3)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_pending_warn_threshold() -> usize {
    10_000
}

fn default_health_addr() -> String {
    "127.0.0.1:9600".to_string()
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Builds configuration from environment variables, the surface the
    /// production deployments drive through `.env` files:
    /// `OPC_SERVER`, `OPC_HOST`, `OPC_GATEWAY_URL`, `OPC_POLL_MS`,
    /// `CHANGE_TOLERANCE`, `OPC_WHITELIST` (comma-separated),
    /// `OPC_BROWSE_ROOT`, `INFLUX_URL`, `INFLUX_TOKEN`, `INFLUX_ORG`,
    /// `INFLUX_BUCKET`, `INFLUX_MEASUREMENT`, `SOURCE_TAG`, `MACHINE_TAG`.
    pub fn from_env() -> Result<Self> {
        let poll_ms: u64 = match env_opt("OPC_POLL_MS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("parsing OPC_POLL_MS {raw:?}"))?,
            None => 1000,
        };

        let change_tolerance: f64 = match env_opt("CHANGE_TOLERANCE") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("parsing CHANGE_TOLERANCE {raw:?}"))?,
            None => 0.0,
        };

        let whitelist = env_opt("OPC_WHITELIST")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let cfg = Config {
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(default_log_level),
            source: SourceConfig {
                server: env_opt("OPC_SERVER").unwrap_or_default(),
                host: env_opt("OPC_HOST"),
                gateway_url: env_opt("OPC_GATEWAY_URL").unwrap_or_else(default_gateway_url),
                timeout: default_source_timeout(),
            },
            sink: SinkConfig {
                url: env_opt("INFLUX_URL").unwrap_or_default(),
                token: env_opt("INFLUX_TOKEN").unwrap_or_default(),
                org: env_opt("INFLUX_ORG").unwrap_or_default(),
                bucket: env_opt("INFLUX_BUCKET").unwrap_or_default(),
                timeout: default_sink_timeout(),
            },
            tags: TagsConfig {
                whitelist,
                browse_root: env_opt("OPC_BROWSE_ROOT").unwrap_or_default(),
            },
            poll_interval: Duration::from_millis(poll_ms),
            change_tolerance,
            measurement: env_opt("INFLUX_MEASUREMENT").unwrap_or_else(default_measurement),
            source_label: env_opt("SOURCE_TAG").unwrap_or_else(default_source_label),
            machine_label: env_opt("MACHINE_TAG").unwrap_or_default(),
            reconnect: ReconnectConfig::default(),
            pending_warn_threshold: default_pending_warn_threshold(),
            health: HealthConfig::default(),
        };

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validates required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.source.server.is_empty() {
            bail!("source.server (OPC_SERVER) is required");
        }

        if self.sink.url.is_empty() {
            bail!("sink.url (INFLUX_URL) is required");
        }

        if self.sink.token.is_empty() {
            bail!("sink.token (INFLUX_TOKEN) is required");
        }

        if self.sink.org.is_empty() {
            bail!("sink.org (INFLUX_ORG) is required");
        }

        if self.sink.bucket.is_empty() {
            bail!("sink.bucket (INFLUX_BUCKET) is required");
        }

        if self.tags.whitelist.is_empty() && self.tags.browse_root.is_empty() {
            bail!("either tags.whitelist or tags.browse_root is required");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be positive");
        }

        if self.change_tolerance < 0.0 {
            bail!("change_tolerance must not be negative");
        }

        Ok(())
    }
}

/// Reads an environment variable, treating empty/whitespace as absent.
fn env_opt(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
source:
  server: Kepware.KEPServerEX.V6
sink:
  url: http://localhost:8086
  token: t0ken
  org: plant
  bucket: boiler
tags:
  browse_root: BOILER
"#
    }

    #[test]
    fn test_minimal_yaml_with_defaults() {
        let cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.validate().expect("valid");

        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.change_tolerance, 0.0);
        assert_eq!(cfg.measurement, "plc_opcda");
        assert_eq!(cfg.source_label, "OPCDA");
        assert!(cfg.machine_label.is_empty());
        assert_eq!(cfg.reconnect.initial_backoff, Duration::from_secs(3));
        assert_eq!(cfg.reconnect.max_backoff, Duration::from_secs(5));
        assert_eq!(cfg.pending_warn_threshold, 10_000);
        assert!(!cfg.health.enabled);
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
source:
  server: MELSOFT.MXOPC.4
  host: plc-gw01
  timeout: 2s
sink:
  url: http://influx:8086
  token: t
  org: o
  bucket: b
tags:
  whitelist: [ "Dev01.Temp", "Dev01.Press" ]
poll_interval: 250ms
change_tolerance: 0.5
measurement: boiler_kepopc
machine_label: Dev01
reconnect:
  initial_backoff: 1s
  max_backoff: 30s
health:
  enabled: true
  addr: 0.0.0.0:9700
"#;

        let cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        cfg.validate().expect("valid");

        assert_eq!(cfg.source.host.as_deref(), Some("plc-gw01"));
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.change_tolerance, 0.5);
        assert_eq!(cfg.tags.whitelist.len(), 2);
        assert_eq!(cfg.reconnect.max_backoff, Duration::from_secs(30));
        assert!(cfg.health.enabled);
        assert_eq!(cfg.health.addr, "0.0.0.0:9700");
    }

    #[test]
    fn test_validate_requires_server() {
        let yaml = minimal_yaml().replace("Kepware.KEPServerEX.V6", "\"\"");
        let cfg: Config = serde_yaml::from_str(&yaml).expect("parse");
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("source.server"));
    }

    #[test]
    fn test_validate_requires_tag_selection() {
        let yaml = minimal_yaml().replace("browse_root: BOILER", "browse_root: \"\"");
        let cfg: Config = serde_yaml::from_str(&yaml).expect("parse");
        let err = cfg.validate().expect_err("invalid");
        assert!(err.to_string().contains("whitelist"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.poll_interval = Duration::ZERO;
        cfg.validate().expect_err("invalid");
    }

    #[test]
    fn test_validate_rejects_negative_tolerance() {
        let mut cfg: Config = serde_yaml::from_str(minimal_yaml()).expect("parse");
        cfg.change_tolerance = -1.0;
        cfg.validate().expect_err("invalid");
    }
}
