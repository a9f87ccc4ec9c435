//! The versioned envelope — the only cross-process wire format.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Semantic schema version `MAJOR.MINOR.PATCH`.
///
/// Consumers accept any minor/patch drift within the same major; a
/// different major routes to the dead-letter channel unless a migration is
/// registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Same-major compatibility.
    #[must_use]
    pub fn compatible_with(&self, other: &SchemaVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(EnvelopeError::InvalidSchemaVersion {
                version: s.to_string(),
            });
        }
        let parse = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| EnvelopeError::InvalidSchemaVersion {
                    version: s.to_string(),
                })
        };
        Ok(Self {
            major: parse(parts[0])?,
            minor: parse(parts[1])?,
            patch: parse(parts[2])?,
        })
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = EnvelopeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(v: SchemaVersion) -> Self {
        v.to_string()
    }
}

/// Canonical transport for authentication, tracing, and graph context
/// across process boundaries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Time-to-live in milliseconds, advisory.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub custom: FxHashMap<String, Value>,
}

impl EventMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

/// Versioned transport wrapper for every bus event.
///
/// Invariants: `schema_version` parses as `MAJOR.MINOR.PATCH`;
/// `channel_name` and `event_type` are non-empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub channel_name: String,
    /// Fully-qualified event type, e.g. `spice.node.completed`.
    pub event_type: String,
    pub schema_version: SchemaVersion,
    /// Serialized payload; opaque to the transport.
    pub payload: Value,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub causation_id: Option<String>,
}

impl EventEnvelope {
    /// Build a fresh envelope; validates the non-empty invariants.
    pub fn new(
        channel_name: impl Into<String>,
        event_type: impl Into<String>,
        schema_version: SchemaVersion,
        payload: Value,
        metadata: EventMetadata,
    ) -> Result<Self, EnvelopeError> {
        let channel_name = channel_name.into();
        let event_type = event_type.into();
        if channel_name.is_empty() {
            return Err(EnvelopeError::EmptyChannelName);
        }
        if event_type.is_empty() {
            return Err(EnvelopeError::EmptyEventType);
        }
        Ok(Self {
            event_id: Uuid::new_v4().to_string(),
            channel_name,
            event_type,
            schema_version,
            payload,
            metadata,
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
        })
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Cache key combining event type and version, used by registry-level
    /// decode caches.
    #[must_use]
    pub fn schema_key(&self) -> String {
        format!("{}@{}", self.event_type, self.schema_version)
    }
}

/// Envelope construction and parsing failures.
#[derive(Debug, Error, Diagnostic)]
pub enum EnvelopeError {
    #[error("invalid schema version: {version}")]
    #[diagnostic(
        code(spiceflow::bus::invalid_schema_version),
        help("Schema versions must match MAJOR.MINOR.PATCH, e.g. \"1.0.0\".")
    )]
    InvalidSchemaVersion { version: String },

    #[error("channel name must be non-empty")]
    #[diagnostic(code(spiceflow::bus::empty_channel))]
    EmptyChannelName,

    #[error("event type must be non-empty")]
    #[diagnostic(code(spiceflow::bus::empty_event_type))]
    EmptyEventType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_version_parses_and_displays() {
        let v: SchemaVersion = "2.13.4".parse().unwrap();
        assert_eq!(v, SchemaVersion::new(2, 13, 4));
        assert_eq!(v.to_string(), "2.13.4");
        assert!("2.x.0".parse::<SchemaVersion>().is_err());
        assert!("1.0".parse::<SchemaVersion>().is_err());
    }

    #[test]
    fn majors_gate_compatibility() {
        let v1 = SchemaVersion::new(1, 0, 0);
        assert!(v1.compatible_with(&SchemaVersion::new(1, 9, 3)));
        assert!(!v1.compatible_with(&SchemaVersion::new(2, 0, 0)));
    }

    #[test]
    fn envelope_rejects_empty_fields() {
        let err = EventEnvelope::new(
            "",
            "spice.test",
            SchemaVersion::new(1, 0, 0),
            json!({}),
            EventMetadata::default(),
        );
        assert!(matches!(err, Err(EnvelopeError::EmptyChannelName)));
    }

    #[test]
    fn envelope_serde_round_trip() {
        let envelope = EventEnvelope::new(
            "spice.test",
            "spice.test.event",
            SchemaVersion::new(1, 2, 3),
            json!({"k": 1}),
            EventMetadata::new().with_tenant_id("t1"),
        )
        .unwrap()
        .with_correlation_id("c1");
        let text = serde_json::to_string(&envelope).unwrap();
        let parsed: EventEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(envelope, parsed);
    }
}
