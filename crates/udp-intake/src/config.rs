// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecConfig;
use crate::error::ConfigError;
use crate::event::FieldRef;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_BUFFER_SIZE: usize = 65_536;
/// Largest datagram payload a UDP socket can deliver.
pub const MAX_BUFFER_SIZE: usize = 65_536;
/// Upper bound of the hand-off queue, set by tokio's bounded channel.
pub const MAX_QUEUE_SIZE: usize = tokio::sync::Semaphore::MAX_PERMITS;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_SIZE: usize = 2_000;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

const ENV_PREFIX: &str = "UDP_INTAKE_";

/// Controls where the sender address lands on each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcsCompatibility {
    /// Flat `host` field.
    #[default]
    Disabled,
    /// Nested `[host][ip]` field.
    V1,
}

impl FromStr for EcsCompatibility {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "v1" => Ok(Self::V1),
            _ => Err(ConfigError::InvalidValue {
                name: "ecs_compatibility",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for EcsCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::V1 => write!(f, "v1"),
        }
    }
}

/// Configuration for the UDP intake. Immutable once the input is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpInputConfig {
    /// Address to bind to (IPv4 or IPv6 literal).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to. `0` picks an ephemeral port.
    pub port: u16,
    /// Maximum bytes read per datagram; longer datagrams are truncated.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Requested `SO_RCVBUF`. The OS may cap or round it.
    #[serde(default)]
    pub receive_buffer_bytes: Option<usize>,
    /// Number of decode workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Packets held in memory between the receiver and the workers.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub ecs_compatibility: EcsCompatibility,
    /// Overrides the field receiving the sender address, e.g. `[source][ip]`.
    #[serde(default)]
    pub source_ip_fieldname: Option<String>,
    /// Pause before rebuilding the socket after a listener failure.
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,
    /// Value of the `type` field added to events that lack one.
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    /// Appended to every event's `tags` array.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Fields added to every event when absent.
    #[serde(default)]
    pub add_field: BTreeMap<String, String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_retry_delay() -> Duration {
    DEFAULT_RETRY_DELAY
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl UdpInputConfig {
    /// Defaults for every optional setting, listening on `port`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            host: default_host(),
            port,
            buffer_size: DEFAULT_BUFFER_SIZE,
            receive_buffer_bytes: None,
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            codec: CodecConfig::default(),
            ecs_compatibility: EcsCompatibility::default(),
            source_ip_fieldname: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            event_type: None,
            tags: Vec::new(),
            add_field: BTreeMap::new(),
        }
    }

    /// Create configuration from `UDP_INTAKE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = parse_var(&var, "PORT", "port")?.ok_or(ConfigError::Missing("port"))?;
        let mut config = Self::new(port);

        if let Some(host) = var("HOST") {
            config.host = host;
        }
        if let Some(buffer_size) = parse_var(&var, "BUFFER_SIZE", "buffer_size")? {
            config.buffer_size = buffer_size;
        }
        config.receive_buffer_bytes =
            parse_var(&var, "RECEIVE_BUFFER_BYTES", "receive_buffer_bytes")?;
        if let Some(workers) = parse_var(&var, "WORKERS", "workers")? {
            config.workers = workers;
        }
        if let Some(queue_size) = parse_var(&var, "QUEUE_SIZE", "queue_size")? {
            config.queue_size = queue_size;
        }
        if let Some(codec) = var("CODEC") {
            config.codec = codec.parse()?;
        }
        if let Some(ecs) = var("ECS_COMPATIBILITY") {
            config.ecs_compatibility = ecs.parse()?;
        }
        config.source_ip_fieldname = var("SOURCE_IP_FIELDNAME");
        if let Some(secs) = parse_var::<u64, _>(&var, "RETRY_DELAY_SECS", "retry_delay")? {
            config.retry_delay = Duration::from_secs(secs);
        }
        config.event_type = var("TYPE");
        if let Some(tags) = var("TAGS") {
            config.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be at most {MAX_BUFFER_SIZE}"
            )));
        }
        if self.receive_buffer_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "receive_buffer_bytes must be greater than 0 when set".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.queue_size == 0 {
            return Err(ConfigError::Invalid(
                "queue_size must be at least 1".to_string(),
            ));
        }
        if self.queue_size > MAX_QUEUE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "queue_size must be at most {MAX_QUEUE_SIZE}"
            )));
        }
        if let Some(field) = &self.source_ip_fieldname {
            FieldRef::parse(field).map_err(|e| {
                ConfigError::Invalid(format!("source_ip_fieldname '{}': {}", field, e))
            })?;
        }
        for name in self.add_field.keys() {
            FieldRef::parse(name)
                .map_err(|e| ConfigError::Invalid(format!("add_field '{}': {}", name, e)))?;
        }
        self.codec.validate()
    }

    /// Socket address built from `host` and `port`. Accepts bracketed IPv6.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host.trim();
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let ip: IpAddr = host.parse().map_err(|_| ConfigError::InvalidValue {
            name: "host",
            value: self.host.clone(),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

fn parse_var<T, F>(var: &F, key: &str, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = UdpInputConfig::new(5514);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.buffer_size, 65_536);
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_size, 2_000);
        assert_eq!(config.codec, CodecConfig::Plain);
        assert_eq!(config.ecs_compatibility, EcsCompatibility::Disabled);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        for config in [
            UdpInputConfig {
                workers: 0,
                ..UdpInputConfig::new(1)
            },
            UdpInputConfig {
                queue_size: 0,
                ..UdpInputConfig::new(1)
            },
            UdpInputConfig {
                buffer_size: 0,
                ..UdpInputConfig::new(1)
            },
            UdpInputConfig {
                receive_buffer_bytes: Some(0),
                ..UdpInputConfig::new(1)
            },
        ] {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn test_validate_rejects_oversized_values() {
        let config = UdpInputConfig {
            queue_size: usize::MAX,
            ..UdpInputConfig::new(1)
        };
        assert!(config.validate().is_err());

        let config = UdpInputConfig {
            buffer_size: usize::MAX,
            ..UdpInputConfig::new(1)
        };
        assert!(config.validate().is_err());

        let config = UdpInputConfig {
            buffer_size: MAX_BUFFER_SIZE + 1,
            ..UdpInputConfig::new(1)
        };
        assert!(config.validate().is_err());

        let config = UdpInputConfig {
            buffer_size: MAX_BUFFER_SIZE,
            queue_size: MAX_QUEUE_SIZE,
            ..UdpInputConfig::new(1)
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_rejects_oversized_values() {
        let err = UdpInputConfig::from_lookup(lookup(&[
            ("UDP_INTAKE_PORT", "5514"),
            ("UDP_INTAKE_QUEUE_SIZE", usize::MAX.to_string().as_str()),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("queue_size must be at most"));

        let err = UdpInputConfig::from_lookup(lookup(&[
            ("UDP_INTAKE_PORT", "5514"),
            ("UDP_INTAKE_BUFFER_SIZE", "1000000"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("buffer_size must be at most"));
    }

    #[test]
    fn test_validate_host_and_field() {
        let config = UdpInputConfig {
            host: "not-an-ip".to_string(),
            ..UdpInputConfig::new(1)
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { name: "host", .. })
        ));

        let config = UdpInputConfig {
            source_ip_fieldname: Some("[broken".to_string()),
            ..UdpInputConfig::new(1)
        };
        assert!(config.validate().is_err());

        let config = UdpInputConfig {
            source_ip_fieldname: Some(String::new()),
            ..UdpInputConfig::new(1)
        };
        assert!(config.validate().is_err());

        let mut config = UdpInputConfig::new(1);
        config.add_field.insert("[a]b".to_string(), "x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bind_addr_ipv6() {
        let config = UdpInputConfig {
            host: "::1".to_string(),
            ..UdpInputConfig::new(9000)
        };
        assert_eq!(config.bind_addr().unwrap().to_string(), "[::1]:9000");

        let bracketed = UdpInputConfig {
            host: "[::1]".to_string(),
            ..UdpInputConfig::new(9000)
        };
        assert_eq!(bracketed.bind_addr().unwrap(), config.bind_addr().unwrap());
    }

    #[test]
    fn test_from_lookup_requires_port() {
        let err = UdpInputConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("port")));

        let err = UdpInputConfig::from_lookup(lookup(&[("UDP_INTAKE_PORT", "70000")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "port", .. }));
    }

    #[test]
    fn test_from_lookup_reads_all_settings() {
        let config = UdpInputConfig::from_lookup(lookup(&[
            ("UDP_INTAKE_PORT", "5514"),
            ("UDP_INTAKE_HOST", "127.0.0.1"),
            ("UDP_INTAKE_BUFFER_SIZE", "8192"),
            ("UDP_INTAKE_RECEIVE_BUFFER_BYTES", "1048576"),
            ("UDP_INTAKE_WORKERS", "4"),
            ("UDP_INTAKE_QUEUE_SIZE", "100"),
            ("UDP_INTAKE_CODEC", "line"),
            ("UDP_INTAKE_ECS_COMPATIBILITY", "v1"),
            ("UDP_INTAKE_SOURCE_IP_FIELDNAME", "[source][ip]"),
            ("UDP_INTAKE_RETRY_DELAY_SECS", "1"),
            ("UDP_INTAKE_TYPE", "syslog"),
            ("UDP_INTAKE_TAGS", "udp, edge,"),
        ]))
        .unwrap();

        assert_eq!(config.port, 5514);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.receive_buffer_bytes, Some(1_048_576));
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_size, 100);
        assert_eq!(config.codec, CodecConfig::line());
        assert_eq!(config.ecs_compatibility, EcsCompatibility::V1);
        assert_eq!(config.source_ip_fieldname.as_deref(), Some("[source][ip]"));
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.event_type.as_deref(), Some("syslog"));
        assert_eq!(config.tags, ["udp", "edge"]);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = UdpInputConfig::from_lookup(lookup(&[
            ("UDP_INTAKE_PORT", "5514"),
            ("UDP_INTAKE_WORKERS", "many"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for workers: 'many'");

        let err = UdpInputConfig::from_lookup(lookup(&[
            ("UDP_INTAKE_PORT", "5514"),
            ("UDP_INTAKE_ECS_COMPATIBILITY", "v9"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "ecs_compatibility",
                ..
            }
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: UdpInputConfig = serde_json::from_value(serde_json::json!({
            "port": 5514,
            "codec": "json",
            "ecs_compatibility": "v1",
            "retry_delay": 0.25,
            "type": "udp",
            "add_field": {"env": "prod"}
        }))
        .unwrap();

        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.codec, CodecConfig::Json);
        assert_eq!(config.ecs_compatibility, EcsCompatibility::V1);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.event_type.as_deref(), Some("udp"));
        assert_eq!(config.add_field.get("env").map(String::as_str), Some("prod"));
    }
}
