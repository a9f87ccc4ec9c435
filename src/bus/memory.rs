//! In-memory event bus backend.
//!
//! A reactive fan-out over `tokio::sync::broadcast` with a bounded publish
//! buffer (replay disabled), consumer-side filters, and a per-channel
//! history ring buffer guarded by a mutex. The hot path is a lock-free
//! broadcast emit; only channel creation takes the map write lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::json;
use tokio::sync::broadcast;

use super::channel::{ChannelSpec, DEAD_LETTER, DEFAULT_BUFFER_CAPACITY, standard_channels};
use super::envelope::{EventEnvelope, EventMetadata};
use super::registry::SchemaRegistry;
use super::{BusError, EventBus, EventFilter, EventSubscription, SubscriptionReceiver, TypedEvent};
use crate::events::WorkflowEvent;

/// Point-in-time view of a channel's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelMetrics {
    pub published: u64,
    pub dead_lettered: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dead_lettered: AtomicU64,
}

struct ChannelState {
    spec: ChannelSpec,
    sender: broadcast::Sender<TypedEvent>,
    history: Mutex<VecDeque<EventEnvelope>>,
    counters: Counters,
}

impl ChannelState {
    fn new(spec: ChannelSpec, buffer_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_capacity.max(1));
        Self {
            spec,
            sender,
            history: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
        }
    }

    fn record_history(&self, envelope: EventEnvelope) {
        if !self.spec.history {
            return;
        }
        let mut history = self.history.lock();
        if history.len() == self.spec.history_capacity {
            history.pop_front();
        }
        history.push_back(envelope);
    }
}

/// Process-local [`EventBus`] backend.
pub struct InMemoryEventBus {
    registry: Arc<SchemaRegistry>,
    channels: RwLock<FxHashMap<String, Arc<ChannelState>>>,
    buffer_capacity: usize,
}

impl InMemoryEventBus {
    /// Bus with the standard channels predeclared.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self::with_capacity(registry, DEFAULT_BUFFER_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(registry: Arc<SchemaRegistry>, buffer_capacity: usize) -> Self {
        let bus = Self {
            registry,
            channels: RwLock::new(FxHashMap::default()),
            buffer_capacity: buffer_capacity.max(1),
        };
        for spec in standard_channels() {
            bus.declare_channel(spec);
        }
        bus
    }

    /// Declare (or reconfigure) a custom channel.
    pub fn declare_channel(&self, spec: ChannelSpec) {
        let mut channels = self.channels.write();
        let name = spec.name.clone();
        channels.insert(name, Arc::new(ChannelState::new(spec, self.buffer_capacity)));
    }

    /// Counters for a channel, when metrics are enabled on it.
    #[must_use]
    pub fn metrics(&self, channel: &str) -> Option<ChannelMetrics> {
        let channels = self.channels.read();
        let state = channels.get(channel)?;
        if !state.spec.metrics {
            return None;
        }
        Some(ChannelMetrics {
            published: state.counters.published.load(Ordering::Relaxed),
            dead_lettered: state.counters.dead_lettered.load(Ordering::Relaxed),
        })
    }

    fn channel_state(&self, channel: &str) -> Arc<ChannelState> {
        if let Some(state) = self.channels.read().get(channel) {
            return Arc::clone(state);
        }
        let mut channels = self.channels.write();
        Arc::clone(
            channels
                .entry(channel.to_string())
                .or_insert_with(|| {
                    Arc::new(ChannelState::new(
                        ChannelSpec::new(channel),
                        self.buffer_capacity,
                    ))
                }),
        )
    }

    fn build_envelope(
        &self,
        channel: &str,
        event: &WorkflowEvent,
        metadata: Option<EventMetadata>,
    ) -> Result<EventEnvelope, BusError> {
        let payload = self.registry.encode(event)?;
        let mut envelope = EventEnvelope::new(
            channel,
            event.event_type(),
            event.schema_version(),
            payload,
            metadata.unwrap_or_default(),
        )?;
        if let Some(run_id) = event.run_id() {
            envelope = envelope.with_correlation_id(run_id);
        }
        Ok(envelope)
    }

    async fn route_dead_letter(&self, original: &EventEnvelope, code: &str, reason: String) {
        let dead_letter = WorkflowEvent::DeadLetter {
            original_channel: original.channel_name.clone(),
            error_code: code.to_string(),
            reason,
            raw: json!({
                "event_type": original.event_type,
                "schema_version": original.schema_version.to_string(),
                "payload": original.payload,
            }),
        };
        {
            let channels = self.channels.read();
            if let Some(state) = channels.get(&original.channel_name) {
                state.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }
        if let Err(err) = self
            .publish(DEAD_LETTER, dead_letter, Some(original.metadata.clone()))
            .await
        {
            tracing::error!(
                target: "spiceflow::bus",
                original_channel = %original.channel_name,
                error = %err,
                "failed to publish dead-letter envelope"
            );
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(
        &self,
        channel: &str,
        event: WorkflowEvent,
        metadata: Option<EventMetadata>,
    ) -> Result<String, BusError> {
        let state = self.channel_state(channel);
        let envelope = self.build_envelope(channel, &event, metadata)?;
        let event_id = envelope.event_id.clone();

        // A send error only means no subscriber is currently attached,
        // which is not a transport failure.
        let _ = state.sender.send(TypedEvent {
            envelope: envelope.clone(),
            event,
        });

        state.record_history(envelope);
        if state.spec.metrics {
            state.counters.published.fetch_add(1, Ordering::Relaxed);
        }
        Ok(event_id)
    }

    async fn subscribe(
        &self,
        channel: &str,
        filter: EventFilter,
    ) -> Result<EventSubscription, BusError> {
        let state = self.channel_state(channel);
        Ok(EventSubscription {
            channel: channel.to_string(),
            filter,
            receiver: SubscriptionReceiver::Broadcast(state.sender.subscribe()),
        })
    }

    async fn history(&self, channel: &str, limit: usize) -> Result<Vec<EventEnvelope>, BusError> {
        let state = self.channel_state(channel);
        let history = state.history.lock();
        Ok(history.iter().rev().take(limit).cloned().collect())
    }

    async fn clear_history(&self, channel: &str) -> Result<(), BusError> {
        let state = self.channel_state(channel);
        state.history.lock().clear();
        Ok(())
    }

    async fn ingest(&self, envelope: EventEnvelope) -> Result<(), BusError> {
        match self.registry.decode(&envelope) {
            Ok(event) => {
                let state = self.channel_state(&envelope.channel_name);
                let _ = state.sender.send(TypedEvent { envelope, event });
                Ok(())
            }
            Err(err) => {
                let code = err.error_code();
                self.route_dead_letter(&envelope, code, err.to_string()).await;
                Ok(())
            }
        }
    }
}
