// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event decoration and sender-address enrichment.
//!
//! Everything here is resolved once when the input starts; the per-event path
//! only walks the already parsed field references.

use std::net::{IpAddr, SocketAddr};

use serde_json::Value;
use tracing::debug;

use crate::config::{EcsCompatibility, UdpInputConfig};
use crate::error::ConfigError;
use crate::event::{Event, FieldError, FieldRef};

pub const HOST_FIELD: &str = "host";
pub const TYPE_FIELD: &str = "type";
pub const TAGS_FIELD: &str = "tags";

/// Field that receives the sender address for the given mode and override.
///
/// | ecs_compatibility | override | field |
/// |---|---|---|
/// | disabled | none | `host` |
/// | v1 | none | `[host][ip]` |
/// | any | `path` | `path` |
pub fn source_ip_field(
    ecs_compatibility: EcsCompatibility,
    source_ip_fieldname: Option<&str>,
) -> Result<FieldRef, FieldError> {
    match (source_ip_fieldname, ecs_compatibility) {
        (Some(custom), _) => FieldRef::parse(custom),
        (None, EcsCompatibility::Disabled) => Ok(FieldRef::top_level(HOST_FIELD)),
        (None, EcsCompatibility::V1) => FieldRef::parse("[host][ip]"),
    }
}

/// Applies decoration and the sender address to decoded events.
#[derive(Debug, Clone)]
pub struct Enricher {
    source_field: FieldRef,
    event_type: Option<String>,
    tags: Vec<String>,
    add_field: Vec<(FieldRef, String)>,
}

impl Enricher {
    pub fn from_config(config: &UdpInputConfig) -> Result<Self, ConfigError> {
        let source_field =
            source_ip_field(config.ecs_compatibility, config.source_ip_fieldname.as_deref())
                .map_err(|e| ConfigError::Invalid(format!("source_ip_fieldname: {}", e)))?;

        let add_field = config
            .add_field
            .iter()
            .map(|(name, value)| {
                FieldRef::parse(name)
                    .map(|field| (field, value.clone()))
                    .map_err(|e| ConfigError::Invalid(format!("add_field '{}': {}", name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            source_field,
            event_type: config.event_type.clone(),
            tags: config.tags.clone(),
            add_field,
        })
    }

    pub fn source_field(&self) -> &FieldRef {
        &self.source_field
    }

    /// Decorates `event`, then records the sender address unless the codec
    /// already populated that field.
    pub fn enrich(&self, event: &mut Event, source: SocketAddr) {
        self.decorate(event);

        if event.is_set(&self.source_field) {
            return;
        }
        let ip = Value::String(canonical_ip(source.ip()).to_string());
        if let Err(e) = event.set(&self.source_field, ip) {
            debug!("Leaving sender address off event: {}", e);
        }
    }

    fn decorate(&self, event: &mut Event) {
        if let Some(event_type) = &self.event_type {
            let field = FieldRef::top_level(TYPE_FIELD);
            if !event.is_set(&field) {
                if let Err(e) = event.set(&field, Value::String(event_type.clone())) {
                    debug!("Skipping type field: {}", e);
                }
            }
        }

        for (field, value) in &self.add_field {
            if !event.is_set(field) {
                if let Err(e) = event.set(field, Value::String(value.clone())) {
                    debug!("Skipping add_field {}: {}", field, e);
                }
            }
        }

        if !self.tags.is_empty() {
            add_tags(event, &self.tags);
        }
    }
}

fn add_tags(event: &mut Event, tags: &[String]) {
    let fields = event.fields_mut();
    let existing = match fields.remove(TAGS_FIELD) {
        Some(Value::Array(values)) => values,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    };

    let mut merged = existing;
    for tag in tags {
        let tag = Value::String(tag.clone());
        if !merged.contains(&tag) {
            merged.push(tag);
        }
    }
    fields.insert(TAGS_FIELD.to_string(), Value::Array(merged));
}

/// IPv4 senders reaching a dual-stack socket show up as `::ffff:a.b.c.d`.
fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sender() -> SocketAddr {
        "127.0.0.1:41000".parse().unwrap()
    }

    fn enricher(config: UdpInputConfig) -> Enricher {
        Enricher::from_config(&config).unwrap()
    }

    #[test]
    fn test_field_resolution_table() {
        assert_eq!(
            source_ip_field(EcsCompatibility::Disabled, None).unwrap(),
            FieldRef::top_level("host")
        );
        assert_eq!(
            source_ip_field(EcsCompatibility::V1, None)
                .unwrap()
                .segments(),
            ["host", "ip"]
        );
        for ecs in [EcsCompatibility::Disabled, EcsCompatibility::V1] {
            assert_eq!(
                source_ip_field(ecs, Some("custom_host_field")).unwrap(),
                FieldRef::top_level("custom_host_field")
            );
        }
    }

    #[test]
    fn test_disabled_sets_flat_host() {
        let mut event = Event::with_message("line1");
        enricher(UdpInputConfig::new(0)).enrich(&mut event, sender());
        assert_eq!(
            Value::Object(event.into_map()),
            json!({"message": "line1", "host": "127.0.0.1"})
        );
    }

    #[test]
    fn test_v1_sets_nested_host_ip() {
        let config = UdpInputConfig {
            ecs_compatibility: EcsCompatibility::V1,
            ..UdpInputConfig::new(0)
        };
        let mut event = Event::with_message("line1");
        enricher(config).enrich(&mut event, sender());
        assert_eq!(
            Value::Object(event.into_map()),
            json!({"message": "line1", "host": {"ip": "127.0.0.1"}})
        );
    }

    #[test]
    fn test_override_only_sets_custom_field() {
        let config = UdpInputConfig {
            ecs_compatibility: EcsCompatibility::V1,
            source_ip_fieldname: Some("custom_host_field".to_string()),
            ..UdpInputConfig::new(0)
        };
        let mut event = Event::with_message("line1");
        enricher(config).enrich(&mut event, sender());
        assert_eq!(
            Value::Object(event.into_map()),
            json!({"message": "line1", "custom_host_field": "127.0.0.1"})
        );
    }

    #[test]
    fn test_codec_value_wins() {
        let mut event = Event::from_map(
            json!({"message": "m", "host": "sensor-7"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let before = event.clone();
        enricher(UdpInputConfig::new(0)).enrich(&mut event, sender());
        assert_eq!(event, before);
    }

    #[test]
    fn test_null_value_is_replaced() {
        let mut event = Event::from_map(json!({"host": null}).as_object().cloned().unwrap());
        enricher(UdpInputConfig::new(0)).enrich(&mut event, sender());
        assert_eq!(event.get(&FieldRef::top_level("host")), Some(&json!("127.0.0.1")));
    }

    #[test]
    fn test_scalar_parent_left_untouched() {
        let config = UdpInputConfig {
            ecs_compatibility: EcsCompatibility::V1,
            ..UdpInputConfig::new(0)
        };
        let mut event = Event::from_map(json!({"host": "web-1"}).as_object().cloned().unwrap());
        enricher(config).enrich(&mut event, sender());
        assert_eq!(event.get(&FieldRef::top_level("host")), Some(&json!("web-1")));
    }

    #[test]
    fn test_ipv4_mapped_sender_is_canonical() {
        let mapped: SocketAddr = "[::ffff:10.1.2.3]:5000".parse().unwrap();
        let mut event = Event::new();
        enricher(UdpInputConfig::new(0)).enrich(&mut event, mapped);
        assert_eq!(event.get(&FieldRef::top_level("host")), Some(&json!("10.1.2.3")));

        let v6: SocketAddr = "[::1]:5000".parse().unwrap();
        let mut event = Event::new();
        enricher(UdpInputConfig::new(0)).enrich(&mut event, v6);
        assert_eq!(event.get(&FieldRef::top_level("host")), Some(&json!("::1")));
    }

    #[test]
    fn test_decoration() {
        let mut config = UdpInputConfig::new(0);
        config.event_type = Some("udp".to_string());
        config.tags = vec!["edge".to_string(), "udp".to_string()];
        config
            .add_field
            .insert("[labels][env]".to_string(), "prod".to_string());
        config
            .add_field
            .insert("message".to_string(), "ignored".to_string());

        let mut event = Event::from_map(
            json!({"message": "m", "tags": "codec"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        enricher(config).enrich(&mut event, sender());

        assert_eq!(
            Value::Object(event.into_map()),
            json!({
                "message": "m",
                "type": "udp",
                "tags": ["codec", "edge", "udp"],
                "labels": {"env": "prod"},
                "host": "127.0.0.1"
            })
        );
    }

    #[test]
    fn test_existing_type_is_kept() {
        let mut config = UdpInputConfig::new(0);
        config.event_type = Some("udp".to_string());
        let mut event = Event::from_map(json!({"type": "syslog"}).as_object().cloned().unwrap());
        enricher(config).enrich(&mut event, sender());
        assert_eq!(event.get(&FieldRef::top_level("type")), Some(&json!("syslog")));
    }

    #[test]
    fn test_from_config_rejects_bad_add_field() {
        let mut config = UdpInputConfig::new(0);
        config.add_field.insert("[oops".to_string(), "x".to_string());
        assert!(Enricher::from_config(&config).is_err());
    }
}
