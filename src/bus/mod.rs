//! Typed event bus: one contract, multiple back-ends.
//!
//! Everything crossing the bus travels as an [`EventEnvelope`]; producers
//! and consumers only ever see typed [`WorkflowEvent`]s, with the
//! [`SchemaRegistry`] mediating serialization. The in-memory backend ships
//! by default; Redis Streams and Kafka back-ends are feature-gated and
//! honor the same contract, so consumers do not know which backend is in
//! use.

pub mod channel;
pub mod envelope;
pub mod filter;
#[cfg(any(feature = "kafka", feature = "redis-streams"))]
pub(crate) mod history;
pub mod memory;
pub mod registry;

#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "redis-streams")]
pub mod redis;

pub use channel::{ChannelSpec, standard_channels, stream_key};
pub use envelope::{EnvelopeError, EventEnvelope, EventMetadata, SchemaVersion};
pub use filter::EventFilter;
pub use memory::InMemoryEventBus;
pub use registry::{DecodeError, SchemaRegistry};

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt, unfold};
use miette::Diagnostic;
use thiserror::Error;

use crate::events::WorkflowEvent;

/// A decoded event along with the envelope it arrived in.
#[derive(Clone, Debug)]
pub struct TypedEvent {
    pub envelope: EventEnvelope,
    pub event: WorkflowEvent,
}

/// Event bus failures.
#[derive(Debug, Error, Diagnostic)]
pub enum BusError {
    #[error("publish to `{channel}` failed: {message}")]
    #[diagnostic(
        code(spiceflow::bus::publish_failed),
        help("Transport failures are not swallowed; retry or surface to the caller.")
    )]
    PublishFailed { channel: String, message: String },

    #[error("subscribe to `{channel}` failed: {message}")]
    #[diagnostic(code(spiceflow::bus::subscribe_failed))]
    SubscribeFailed { channel: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] DecodeError),

    #[error("transport error: {message}")]
    #[diagnostic(code(spiceflow::bus::transport))]
    Transport { message: String },
}

/// Pub/sub over typed events.
///
/// Contract highlights:
/// - `publish` assigns envelope fields, serializes via the registry, writes
///   to the transport, and only then appends to history and metrics.
/// - `subscribe` hands back a lazily-evaluated sequence filtered on the
///   consumer side.
/// - `history` returns the most recent envelopes, newest first; it is an
///   observability convenience, not the durable log.
/// - `ingest` is the receive path: a decodable envelope is delivered on its
///   channel, an undecodable one produces exactly one dead-letter envelope
///   and nothing on the source channel.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a typed event; returns the assigned event id.
    async fn publish(
        &self,
        channel: &str,
        event: WorkflowEvent,
        metadata: Option<EventMetadata>,
    ) -> Result<String, BusError>;

    /// Subscribe to a channel with a consumer-side filter.
    async fn subscribe(
        &self,
        channel: &str,
        filter: EventFilter,
    ) -> Result<EventSubscription, BusError>;

    /// Up to `limit` most recent envelopes, newest first.
    async fn history(&self, channel: &str, limit: usize) -> Result<Vec<EventEnvelope>, BusError>;

    /// Empty the channel's history ring buffer.
    async fn clear_history(&self, channel: &str) -> Result<(), BusError>;

    /// Feed a received envelope through decode-and-deliver. Decode
    /// failures route to the dead-letter channel; the offset still
    /// advances (the call returns `Ok`).
    async fn ingest(&self, envelope: EventEnvelope) -> Result<(), BusError>;
}

/// Convenience: publish an event on its default standard channel.
pub async fn publish_default(
    bus: &dyn EventBus,
    event: WorkflowEvent,
    metadata: Option<EventMetadata>,
) -> Result<String, BusError> {
    let channel = event
        .default_channel()
        .ok_or_else(|| BusError::PublishFailed {
            channel: "<none>".to_string(),
            message: "event has no default channel; pass one explicitly".to_string(),
        })?;
    bus.publish(channel, event, metadata).await
}

pub(crate) enum SubscriptionReceiver {
    Broadcast(tokio::sync::broadcast::Receiver<TypedEvent>),
    Channel(flume::Receiver<TypedEvent>),
}

/// Lazy sequence of typed events for one subscriber.
///
/// Filtering happens here, on the consumer side, identically for every
/// backend.
pub struct EventSubscription {
    pub(crate) channel: String,
    pub(crate) filter: EventFilter,
    pub(crate) receiver: SubscriptionReceiver,
}

impl EventSubscription {
    /// Receive the next matching event; `None` once the bus side closed.
    pub async fn recv(&mut self) -> Option<TypedEvent> {
        loop {
            let next = match &mut self.receiver {
                SubscriptionReceiver::Broadcast(rx) => match rx.recv().await {
                    Ok(event) => Some(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            target: "spiceflow::bus",
                            channel = %self.channel,
                            missed,
                            "subscriber lagged; dropped events"
                        );
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => None,
                },
                SubscriptionReceiver::Channel(rx) => rx.recv_async().await.ok(),
            };
            match next {
                Some(typed) if self.filter.matches(&typed.envelope) => return Some(typed),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// Non-blocking receive of the next matching event.
    pub fn try_recv(&mut self) -> Option<TypedEvent> {
        loop {
            let next = match &mut self.receiver {
                SubscriptionReceiver::Broadcast(rx) => match rx.try_recv() {
                    Ok(event) => Some(event),
                    Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => None,
                },
                SubscriptionReceiver::Channel(rx) => rx.try_recv().ok(),
            };
            match next {
                Some(typed) if self.filter.matches(&typed.envelope) => return Some(typed),
                Some(_) => continue,
                None => return None,
            }
        }
    }

    /// Convert into a boxed stream for combinator-style consumption.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, TypedEvent> {
        unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
        .boxed()
    }
}
