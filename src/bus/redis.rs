//! Redis Streams event bus backend.
//!
//! One stream per channel (`spice.toolcall.events` ↔ key
//! `spice:toolcall:events`). Publishing is an `XADD` of the serialized
//! envelope; each subscription runs a background poll loop reading
//! `XREADGROUP` (or `XREAD` without a group), decoding entries into a
//! local channel and acknowledging them. Invalid entries advance the
//! offset and route to the dead-letter stream.
//!
//! Rebalancing note: with a consumer group, pending entries are redelivered
//! per Redis defaults, so consumers see at-least-once delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::json;

use super::channel::{DEAD_LETTER, stream_key};
use super::envelope::{EventEnvelope, EventMetadata};
use super::history::HistoryBook;
use super::registry::SchemaRegistry;
use super::{BusError, EventBus, EventFilter, EventSubscription, SubscriptionReceiver, TypedEvent};
use crate::events::WorkflowEvent;

const ENVELOPE_FIELD: &str = "envelope";

/// Where a fresh subscription starts reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StreamStart {
    /// Only entries added after subscribing (`$`).
    #[default]
    NewOnly,
    /// Full replay from the beginning of the stream (`0-0`).
    FromBeginning,
}

impl StreamStart {
    fn offset(self) -> &'static str {
        match self {
            Self::NewOnly => "$",
            Self::FromBeginning => "0-0",
        }
    }
}

/// Configuration for [`RedisStreamsBus`].
#[derive(Clone, Debug)]
pub struct RedisBusConfig {
    pub url: String,
    /// Consumer group; `None` reads without a group (no persistent offset).
    pub consumer_group: Option<String>,
    pub consumer_name: String,
    pub start: StreamStart,
    /// Block timeout of each poll iteration.
    pub poll_timeout: Duration,
    pub batch_size: usize,
}

impl RedisBusConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            consumer_group: None,
            consumer_name: "spiceflow".to_string(),
            start: StreamStart::default(),
            poll_timeout: Duration::from_millis(500),
            batch_size: 32,
        }
    }

    #[must_use]
    pub fn with_consumer_group(
        mut self,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        self.consumer_group = Some(group.into());
        self.consumer_name = consumer.into();
        self
    }

    #[must_use]
    pub fn with_start(mut self, start: StreamStart) -> Self {
        self.start = start;
        self
    }
}

/// [`EventBus`] backend over Redis Streams.
pub struct RedisStreamsBus {
    registry: Arc<SchemaRegistry>,
    config: RedisBusConfig,
    manager: ConnectionManager,
    history: HistoryBook,
}

impl RedisStreamsBus {
    /// Connect and build the bus. The connection manager is pooled and
    /// shared across publishers; the runner never owns connections.
    pub async fn connect(
        registry: Arc<SchemaRegistry>,
        config: RedisBusConfig,
    ) -> Result<Self, BusError> {
        let client = redis::Client::open(config.url.as_str()).map_err(transport_err)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(transport_err)?;
        Ok(Self {
            registry,
            config,
            manager,
            history: HistoryBook::default(),
        })
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

    async fn xadd_envelope(
        conn: &mut ConnectionManager,
        channel: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), BusError> {
        let body = serde_json::to_string(envelope).map_err(|e| BusError::PublishFailed {
            channel: channel.to_string(),
            message: e.to_string(),
        })?;
        let _: String = conn
            .xadd(stream_key(channel), "*", &[(ENVELOPE_FIELD, body)])
            .await
            .map_err(|e| BusError::PublishFailed {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn route_dead_letter(
        registry: &SchemaRegistry,
        conn: &mut ConnectionManager,
        original: &EventEnvelope,
        code: &str,
        reason: String,
    ) {
        let event = WorkflowEvent::DeadLetter {
            original_channel: original.channel_name.clone(),
            error_code: code.to_string(),
            reason,
            raw: json!({
                "event_type": original.event_type,
                "schema_version": original.schema_version.to_string(),
                "payload": original.payload,
            }),
        };
        let Ok(payload) = registry.encode(&event) else {
            return;
        };
        let Ok(envelope) = EventEnvelope::new(
            DEAD_LETTER,
            event.event_type(),
            event.schema_version(),
            payload,
            original.metadata.clone(),
        ) else {
            return;
        };
        if let Err(err) = Self::xadd_envelope(conn, DEAD_LETTER, &envelope).await {
            tracing::error!(
                target: "spiceflow::bus::redis",
                original_channel = %original.channel_name,
                error = %err,
                "failed to route dead-letter envelope"
            );
        }
    }

    /// One poll-loop iteration worth of entries: `(entry_id, envelope_json)`.
    async fn read_batch(
        conn: &mut ConnectionManager,
        config: &RedisBusConfig,
        key: &str,
        last_id: &mut String,
    ) -> Result<Vec<(String, String)>, redis::RedisError> {
        let mut options = StreamReadOptions::default()
            .block(config.poll_timeout.as_millis() as usize)
            .count(config.batch_size);
        let read_id;
        if let Some(group) = &config.consumer_group {
            options = options.group(group, &config.consumer_name);
            read_id = ">".to_string();
        } else {
            read_id = last_id.clone();
        }

        let reply: StreamReadReply = conn
            .xread_options(&[key], &[read_id.as_str()], &options)
            .await?;

        let mut batch = Vec::new();
        for stream in reply.keys {
            for entry in stream.ids {
                if config.consumer_group.is_none() {
                    *last_id = entry.id.clone();
                }
                if let Some(body) = entry.get::<String>(ENVELOPE_FIELD) {
                    batch.push((entry.id.clone(), body));
                }
            }
        }
        Ok(batch)
    }

    async fn ensure_group(&self, key: &str) -> Result<(), BusError> {
        let Some(group) = &self.config.consumer_group else {
            return Ok(());
        };
        let mut conn = self.manager.clone();
        let created: Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(key, group, self.config.start.offset())
            .await;
        match created {
            Ok(_) => Ok(()),
            // BUSYGROUP means the group already exists; offsets persist.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BusError::SubscribeFailed {
                channel: key.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

fn transport_err(e: redis::RedisError) -> BusError {
    BusError::Transport {
        message: e.to_string(),
    }
}

#[async_trait]
impl EventBus for RedisStreamsBus {
    async fn publish(
        &self,
        channel: &str,
        event: WorkflowEvent,
        metadata: Option<EventMetadata>,
    ) -> Result<String, BusError> {
        let envelope = self.build_envelope(channel, &event, metadata)?;
        let event_id = envelope.event_id.clone();
        let mut conn = self.manager.clone();
        Self::xadd_envelope(&mut conn, channel, &envelope).await?;
        // History only reflects successful transport writes.
        self.history.record(channel, envelope);
        Ok(event_id)
    }

    async fn subscribe(
        &self,
        channel: &str,
        filter: EventFilter,
    ) -> Result<EventSubscription, BusError> {
        let key = stream_key(channel);
        self.ensure_group(&key).await?;

        let (tx, rx) = flume::unbounded::<TypedEvent>();
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let mut conn = self.manager.clone();
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            let mut last_id = config.start.offset().to_string();
            loop {
                if tx.is_disconnected() {
                    break;
                }
                let batch =
                    match Self::read_batch(&mut conn, &config, &key, &mut last_id).await {
                        Ok(batch) => batch,
                        Err(e) => {
                            tracing::warn!(
                                target: "spiceflow::bus::redis",
                                channel = %channel_name,
                                error = %e,
                                "stream poll failed; backing off"
                            );
                            tokio::time::sleep(Duration::from_millis(250)).await;
                            continue;
                        }
                    };

                for (entry_id, body) in batch {
                    match serde_json::from_str::<EventEnvelope>(&body) {
                        Ok(envelope) => match registry.decode(&envelope) {
                            Ok(event) => {
                                let _ = tx.send(TypedEvent { envelope, event });
                            }
                            Err(err) => {
                                let code = err.error_code();
                                Self::route_dead_letter(
                                    &registry,
                                    &mut conn,
                                    &envelope,
                                    code,
                                    err.to_string(),
                                )
                                .await;
                            }
                        },
                        Err(e) => {
                            tracing::warn!(
                                target: "spiceflow::bus::redis",
                                channel = %channel_name,
                                entry_id = %entry_id,
                                error = %e,
                                "skipping unparsable stream entry"
                            );
                        }
                    }
                    if let Some(group) = &config.consumer_group {
                        let acked: Result<i64, redis::RedisError> =
                            conn.xack(&key, group, &[entry_id.as_str()]).await;
                        if let Err(e) = acked {
                            tracing::warn!(
                                target: "spiceflow::bus::redis",
                                channel = %channel_name,
                                error = %e,
                                "failed to ack stream entry"
                            );
                        }
                    }
                }
            }
        });

        Ok(EventSubscription {
            channel: channel.to_string(),
            filter,
            receiver: SubscriptionReceiver::Channel(rx),
        })
    }

    async fn history(&self, channel: &str, limit: usize) -> Result<Vec<EventEnvelope>, BusError> {
        Ok(self.history.recent(channel, limit))
    }

    async fn clear_history(&self, channel: &str) -> Result<(), BusError> {
        self.history.clear(channel);
        Ok(())
    }

    async fn ingest(&self, envelope: EventEnvelope) -> Result<(), BusError> {
        // Externally supplied envelopes (webhooks, replays) enter here; a
        // decodable one is written onto its channel's stream so the
        // subscription poll loops deliver it, an undecodable one routes to
        // the dead-letter stream. The offset advances either way.
        let mut conn = self.manager.clone();
        match self.registry.decode(&envelope) {
            Ok(_) => {
                let channel = envelope.channel_name.clone();
                Self::xadd_envelope(&mut conn, &channel, &envelope).await?;
                Ok(())
            }
            Err(err) => {
                let code = err.error_code();
                Self::route_dead_letter(&self.registry, &mut conn, &envelope, code, err.to_string())
                    .await;
                Ok(())
            }
        }
    }
}
