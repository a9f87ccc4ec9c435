//! Explicit schema registry for typed channel events.
//!
//! The registry is populated by the application at startup — there is no
//! reflection-based discovery, and an unregistered event type is a hard
//! decode error. Consumers accept any minor/patch drift within a major;
//! crossing a major requires a registered migration, otherwise the
//! envelope routes to the dead-letter channel.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use super::envelope::{EventEnvelope, SchemaVersion};
use crate::events::WorkflowEvent;

/// Upgrades a payload from an older major to the registered one.
pub type MigrationFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Decode failures; every variant maps to a dead-letter error code.
#[derive(Debug, Error, Diagnostic)]
pub enum DecodeError {
    #[error("no schema registered for event type `{event_type}`")]
    #[diagnostic(
        code(spiceflow::bus::unknown_event_type),
        help("Register the event type on the SchemaRegistry at startup.")
    )]
    UnknownEventType { event_type: String },

    #[error("event `{event_type}` version {got} is incompatible with registered {expected}")]
    #[diagnostic(
        code(spiceflow::bus::schema_major_mismatch),
        help("Register a migration for major {got} or upgrade the producer.")
    )]
    MajorMismatch {
        event_type: String,
        got: SchemaVersion,
        expected: SchemaVersion,
    },

    #[error("payload for `{event_type}` is structurally invalid: {message}")]
    #[diagnostic(code(spiceflow::bus::invalid_payload))]
    InvalidPayload { event_type: String, message: String },

    #[error("migration for `{event_type}` from major {from_major} failed: {message}")]
    #[diagnostic(code(spiceflow::bus::migration_failed))]
    MigrationFailed {
        event_type: String,
        from_major: u32,
        message: String,
    },
}

impl DecodeError {
    /// Stable code recorded on dead-letter envelopes.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownEventType { .. } => "unknown_event_type",
            Self::MajorMismatch { .. } => "schema_major_mismatch",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::MigrationFailed { .. } => "migration_failed",
        }
    }
}

#[derive(Clone)]
struct SchemaEntry {
    version: SchemaVersion,
    migrations: FxHashMap<u32, MigrationFn>,
}

/// Registry of event types and their schema versions.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    entries: FxHashMap<String, SchemaEntry>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in workflow event type at 1.0.0.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for event_type in [
            "spice.graph.started",
            "spice.graph.completed",
            "spice.graph.failed",
            "spice.graph.cancelled",
            "spice.node.started",
            "spice.node.completed",
            "spice.node.failed",
            "spice.toolcall.emitted",
            "spice.toolcall.completed",
            "spice.hitl.requested",
            "spice.deadletter.entry",
        ] {
            registry.register(event_type, SchemaVersion::new(1, 0, 0));
        }
        registry
    }

    /// Register (or re-register) an event type at a version.
    pub fn register(&mut self, event_type: impl Into<String>, version: SchemaVersion) {
        self.entries.insert(
            event_type.into(),
            SchemaEntry {
                version,
                migrations: FxHashMap::default(),
            },
        );
    }

    /// Register a payload migration from `from_major` to the registered
    /// version of `event_type`. The type itself must already be registered.
    pub fn register_migration(
        &mut self,
        event_type: &str,
        from_major: u32,
        migration: MigrationFn,
    ) -> Result<(), DecodeError> {
        let entry = self
            .entries
            .get_mut(event_type)
            .ok_or_else(|| DecodeError::UnknownEventType {
                event_type: event_type.to_string(),
            })?;
        entry.migrations.insert(from_major, migration);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    /// Registered version for an event type.
    #[must_use]
    pub fn version_of(&self, event_type: &str) -> Option<SchemaVersion> {
        self.entries.get(event_type).map(|e| e.version)
    }

    /// Serialize a typed event for transport.
    pub fn encode(&self, event: &WorkflowEvent) -> Result<Value, DecodeError> {
        let event_type = event.event_type();
        if !self.contains(&event_type) {
            return Err(DecodeError::UnknownEventType { event_type });
        }
        serde_json::to_value(event).map_err(|e| DecodeError::InvalidPayload {
            event_type,
            message: e.to_string(),
        })
    }

    /// Decode a received envelope back into a typed event.
    ///
    /// Minor/patch drift within the registered major is accepted; a
    /// different major runs through a registered migration or fails.
    pub fn decode(&self, envelope: &EventEnvelope) -> Result<WorkflowEvent, DecodeError> {
        let entry =
            self.entries
                .get(&envelope.event_type)
                .ok_or_else(|| DecodeError::UnknownEventType {
                    event_type: envelope.event_type.clone(),
                })?;

        let payload = if envelope.schema_version.compatible_with(&entry.version) {
            envelope.payload.clone()
        } else {
            let migration = entry.migrations.get(&envelope.schema_version.major).ok_or(
                DecodeError::MajorMismatch {
                    event_type: envelope.event_type.clone(),
                    got: envelope.schema_version,
                    expected: entry.version,
                },
            )?;
            migration(envelope.payload.clone()).map_err(|message| {
                DecodeError::MigrationFailed {
                    event_type: envelope.event_type.clone(),
                    from_major: envelope.schema_version.major,
                    message,
                }
            })?
        };

        serde_json::from_value(payload).map_err(|e| DecodeError::InvalidPayload {
            event_type: envelope.event_type.clone(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.entries.keys().collect();
        types.sort();
        f.debug_struct("SchemaRegistry")
            .field("event_types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::EventMetadata;
    use serde_json::json;

    fn envelope_for(event: &WorkflowEvent, registry: &SchemaRegistry) -> EventEnvelope {
        EventEnvelope::new(
            "spice.test",
            event.event_type(),
            event.schema_version(),
            registry.encode(event).unwrap(),
            EventMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let registry = SchemaRegistry::standard();
        let event = WorkflowEvent::GraphStarted {
            run_id: "r".into(),
            graph_id: "g".into(),
        };
        let envelope = envelope_for(&event, &registry);
        assert_eq!(registry.decode(&envelope).unwrap(), event);
    }

    #[test]
    fn minor_drift_is_tolerated() {
        let registry = SchemaRegistry::standard();
        let event = WorkflowEvent::GraphStarted {
            run_id: "r".into(),
            graph_id: "g".into(),
        };
        let mut envelope = envelope_for(&event, &registry);
        envelope.schema_version = SchemaVersion::new(1, 7, 2);
        assert!(registry.decode(&envelope).is_ok());
    }

    #[test]
    fn major_mismatch_without_migration_fails() {
        let registry = SchemaRegistry::standard();
        let event = WorkflowEvent::GraphStarted {
            run_id: "r".into(),
            graph_id: "g".into(),
        };
        let mut envelope = envelope_for(&event, &registry);
        envelope.schema_version = SchemaVersion::new(99, 0, 0);
        let err = registry.decode(&envelope).unwrap_err();
        assert_eq!(err.error_code(), "schema_major_mismatch");
    }

    #[test]
    fn migration_upgrades_old_majors() {
        let mut registry = SchemaRegistry::standard();
        registry
            .register_migration(
                "spice.graph.started",
                0,
                Arc::new(|old: Value| {
                    // v0 used `session` instead of `run_id`.
                    let session = old
                        .get("session")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "missing session".to_string())?
                        .to_string();
                    Ok(json!({
                        "type": "graph_started",
                        "run_id": session,
                        "graph_id": old.get("graph_id").cloned().unwrap_or(json!("unknown")),
                    }))
                }),
            )
            .unwrap();

        let mut envelope = EventEnvelope::new(
            "spice.test",
            "spice.graph.started",
            SchemaVersion::new(0, 4, 0),
            json!({"session": "legacy", "graph_id": "g"}),
            EventMetadata::default(),
        )
        .unwrap();
        envelope.schema_version = SchemaVersion::new(0, 4, 0);
        let event = registry.decode(&envelope).unwrap();
        assert_eq!(
            event,
            WorkflowEvent::GraphStarted {
                run_id: "legacy".into(),
                graph_id: "g".into(),
            }
        );
    }

    #[test]
    fn unknown_event_type_is_a_hard_error() {
        let registry = SchemaRegistry::standard();
        let envelope = EventEnvelope::new(
            "spice.test",
            "spice.unknown.event",
            SchemaVersion::new(1, 0, 0),
            json!({}),
            EventMetadata::default(),
        )
        .unwrap();
        assert_eq!(
            registry.decode(&envelope).unwrap_err().error_code(),
            "unknown_event_type"
        );
    }
}
