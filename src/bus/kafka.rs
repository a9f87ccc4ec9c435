//! Kafka event bus backend.
//!
//! One topic per channel. The producer is idempotent with `acks=all`; the
//! consumer group id is stable (default: the client id) so offsets survive
//! restarts. Records are keyed by tool-call id where one exists, which
//! pins all of a tool call's events to one partition and keeps them
//! ordered. Undecodable records advance the offset and route to the
//! dead-letter topic.
//!
//! Rebalancing note: offsets are committed after dispatch, so a rebalance
//! replays in-flight records (at-least-once delivery).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::json;

use super::channel::DEAD_LETTER;
use super::envelope::{EventEnvelope, EventMetadata};
use super::history::HistoryBook;
use super::registry::SchemaRegistry;
use super::{BusError, EventBus, EventFilter, EventSubscription, SubscriptionReceiver, TypedEvent};
use crate::events::WorkflowEvent;

/// Configuration for [`KafkaEventBus`].
#[derive(Clone, Debug)]
pub struct KafkaBusConfig {
    pub brokers: String,
    pub client_id: String,
    /// Consumer group id; defaults to the client id for stable offsets.
    pub group_id: Option<String>,
    pub send_timeout: Duration,
}

impl KafkaBusConfig {
    #[must_use]
    pub fn new(brokers: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            client_id: client_id.into(),
            group_id: None,
            send_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    fn effective_group_id(&self) -> String {
        self.group_id.clone().unwrap_or_else(|| self.client_id.clone())
    }
}

/// [`EventBus`] backend over Kafka.
pub struct KafkaEventBus {
    registry: Arc<SchemaRegistry>,
    config: KafkaBusConfig,
    producer: FutureProducer,
    history: HistoryBook,
}

impl KafkaEventBus {
    /// Build the bus with an idempotent `acks=all` producer.
    pub fn connect(
        registry: Arc<SchemaRegistry>,
        config: KafkaBusConfig,
    ) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| BusError::Transport {
                message: e.to_string(),
            })?;
        Ok(Self {
            registry,
            config,
            producer,
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

    async fn send_envelope(
        producer: &FutureProducer,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
        timeout: Duration,
    ) -> Result<(), BusError> {
        let body = serde_json::to_string(envelope).map_err(|e| BusError::PublishFailed {
            channel: topic.to_string(),
            message: e.to_string(),
        })?;
        producer
            .send(
                FutureRecord::to(topic).key(key).payload(&body),
                rdkafka::util::Timeout::After(timeout),
            )
            .await
            .map_err(|(e, _)| BusError::PublishFailed {
                channel: topic.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn route_dead_letter(
        registry: &SchemaRegistry,
        producer: &FutureProducer,
        original: &EventEnvelope,
        code: &str,
        reason: String,
        timeout: Duration,
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
        let key = envelope.event_id.clone();
        if let Err(err) =
            Self::send_envelope(producer, DEAD_LETTER, &key, &envelope, timeout).await
        {
            tracing::error!(
                target: "spiceflow::bus::kafka",
                original_channel = %original.channel_name,
                error = %err,
                "failed to route dead-letter envelope"
            );
        }
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn publish(
        &self,
        channel: &str,
        event: WorkflowEvent,
        metadata: Option<EventMetadata>,
    ) -> Result<String, BusError> {
        let envelope = self.build_envelope(channel, &event, metadata)?;
        let event_id = envelope.event_id.clone();
        // Tool-call affinity: one call's events share a partition.
        let key = event
            .tool_call_id()
            .map(str::to_string)
            .unwrap_or_else(|| event_id.clone());
        Self::send_envelope(
            &self.producer,
            channel,
            &key,
            &envelope,
            self.config.send_timeout,
        )
        .await?;
        self.history.record(channel, envelope);
        Ok(event_id)
    }

    async fn subscribe(
        &self,
        channel: &str,
        filter: EventFilter,
    ) -> Result<EventSubscription, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("group.id", self.config.effective_group_id())
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| BusError::SubscribeFailed {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;
        consumer
            .subscribe(&[channel])
            .map_err(|e| BusError::SubscribeFailed {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        let (tx, rx) = flume::unbounded::<TypedEvent>();
        let registry = Arc::clone(&self.registry);
        let producer = self.producer.clone();
        let timeout = self.config.send_timeout;
        let channel_name = channel.to_string();

        tokio::spawn(async move {
            loop {
                if tx.is_disconnected() {
                    break;
                }
                match consumer.recv().await {
                    Ok(record) => {
                        let Some(Ok(body)) = record.payload_view::<str>() else {
                            tracing::warn!(
                                target: "spiceflow::bus::kafka",
                                channel = %channel_name,
                                "skipping record without utf-8 payload"
                            );
                            continue;
                        };
                        match serde_json::from_str::<EventEnvelope>(body) {
                            Ok(envelope) => match registry.decode(&envelope) {
                                Ok(event) => {
                                    let _ = tx.send(TypedEvent { envelope, event });
                                }
                                Err(err) => {
                                    let code = err.error_code();
                                    Self::route_dead_letter(
                                        &registry,
                                        &producer,
                                        &envelope,
                                        code,
                                        err.to_string(),
                                        timeout,
                                    )
                                    .await;
                                }
                            },
                            Err(e) => {
                                tracing::warn!(
                                    target: "spiceflow::bus::kafka",
                                    channel = %channel_name,
                                    error = %e,
                                    "skipping unparsable record"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            target: "spiceflow::bus::kafka",
                            channel = %channel_name,
                            error = %e,
                            "consumer poll failed; backing off"
                        );
                        tokio::time::sleep(Duration::from_millis(250)).await;
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
        // decodable one is produced onto its channel's topic so the
        // consumer loops deliver it, an undecodable one routes to the
        // dead-letter topic. The offset advances either way.
        match self.registry.decode(&envelope) {
            Ok(event) => {
                let key = event
                    .tool_call_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| envelope.event_id.clone());
                let channel = envelope.channel_name.clone();
                Self::send_envelope(
                    &self.producer,
                    &channel,
                    &key,
                    &envelope,
                    self.config.send_timeout,
                )
                .await?;
                Ok(())
            }
            Err(err) => {
                let code = err.error_code();
                Self::route_dead_letter(
                    &self.registry,
                    &self.producer,
                    &envelope,
                    code,
                    err.to_string(),
                    self.config.send_timeout,
                )
                .await;
                Ok(())
            }
        }
    }
}
