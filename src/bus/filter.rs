//! Subscription filter algebra.
//!
//! Filters are evaluated on the consumer side against the envelope, so
//! every backend shares one implementation.

use std::sync::Arc;

use serde_json::Value;

use super::envelope::EventEnvelope;

/// Predicate over an envelope.
pub type FilterPredicate = Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>;

/// Composable subscription filter.
///
/// # Examples
///
/// ```
/// use spiceflow::bus::EventFilter;
///
/// let filter = EventFilter::TenantId("acme".into())
///     .and(EventFilter::CorrelationId("run-42".into()).not());
/// ```
#[derive(Clone)]
pub enum EventFilter {
    /// Match everything.
    All,
    /// Arbitrary predicate over the envelope.
    Predicate(FilterPredicate),
    /// Match when the custom metadata map carries `key == value`.
    MetadataEquals { key: String, value: Value },
    UserId(String),
    TenantId(String),
    CorrelationId(String),
    And(Vec<EventFilter>),
    Or(Vec<EventFilter>),
    Not(Box<EventFilter>),
}

impl EventFilter {
    #[must_use]
    pub fn predicate(f: impl Fn(&EventEnvelope) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(f))
    }

    #[must_use]
    pub fn metadata_equals(key: impl Into<String>, value: Value) -> Self {
        Self::MetadataEquals {
            key: key.into(),
            value,
        }
    }

    #[must_use]
    pub fn and(self, other: EventFilter) -> Self {
        match self {
            Self::And(mut filters) => {
                filters.push(other);
                Self::And(filters)
            }
            first => Self::And(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: EventFilter) -> Self {
        match self {
            Self::Or(mut filters) => {
                filters.push(other);
                Self::Or(filters)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate this filter against an envelope.
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        match self {
            Self::All => true,
            Self::Predicate(f) => f(envelope),
            Self::MetadataEquals { key, value } => {
                envelope.metadata.custom.get(key) == Some(value)
            }
            Self::UserId(id) => envelope.metadata.user_id.as_deref() == Some(id),
            Self::TenantId(id) => envelope.metadata.tenant_id.as_deref() == Some(id),
            Self::CorrelationId(id) => envelope.correlation_id.as_deref() == Some(id),
            Self::And(filters) => filters.iter().all(|f| f.matches(envelope)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(envelope)),
            Self::Not(inner) => !inner.matches(envelope),
        }
    }
}

impl std::fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
            Self::MetadataEquals { key, value } => {
                write!(f, "MetadataEquals({key} == {value})")
            }
            Self::UserId(id) => write!(f, "UserId({id})"),
            Self::TenantId(id) => write!(f, "TenantId({id})"),
            Self::CorrelationId(id) => write!(f, "CorrelationId({id})"),
            Self::And(filters) => f.debug_tuple("And").field(filters).finish(),
            Self::Or(filters) => f.debug_tuple("Or").field(filters).finish(),
            Self::Not(inner) => f.debug_tuple("Not").field(inner).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::{EventMetadata, SchemaVersion};
    use serde_json::json;

    fn envelope(tenant: Option<&str>, correlation: Option<&str>) -> EventEnvelope {
        let mut metadata = EventMetadata::new().with_custom("region", json!("eu"));
        if let Some(t) = tenant {
            metadata = metadata.with_tenant_id(t);
        }
        let mut env = EventEnvelope::new(
            "spice.test",
            "spice.test.event",
            SchemaVersion::new(1, 0, 0),
            json!({}),
            metadata,
        )
        .unwrap();
        if let Some(c) = correlation {
            env = env.with_correlation_id(c);
        }
        env
    }

    #[test]
    fn combinators_compose() {
        let env = envelope(Some("acme"), Some("run-1"));
        let filter = EventFilter::TenantId("acme".into())
            .and(EventFilter::CorrelationId("run-1".into()))
            .and(EventFilter::metadata_equals("region", json!("eu")));
        assert!(filter.matches(&env));
        assert!(!filter.clone().not().matches(&env));
        assert!(
            EventFilter::UserId("nobody".into())
                .or(EventFilter::All)
                .matches(&env)
        );
    }

    #[test]
    fn metadata_filter_misses_absent_keys() {
        let env = envelope(None, None);
        assert!(!EventFilter::metadata_equals("missing", json!(1)).matches(&env));
        assert!(!EventFilter::TenantId("acme".into()).matches(&env));
    }
}
