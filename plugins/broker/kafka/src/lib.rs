//! Kafka broker client on librdkafka.
//!
//! Uses `ThreadedProducer`: `send` only enqueues into librdkafka's outbound
//! queue and delivery reports are executed on the producer's polling thread,
//! which forwards them to the `DeliveryListener`. A saturated queue
//! (`queue.buffering.max.messages`) is reported as `SendError::QueueFull`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;

use logpipe_api::{
    BrokerClient, BrokerConnector, DeliveryListener, DeliveryOutcome, FailureKind, OutboundMessage,
    PluginError, SendError, TicketId,
};

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// host:port list, joined into `bootstrap.servers`.
    pub endpoints: Vec<String>,
    /// `queue.buffering.max.messages`: QueueFull threshold.
    pub queue_capacity: usize,
    pub linger_ms: u64,
    /// `message.timeout.ms`: after this librdkafka fails the message itself.
    pub message_timeout_ms: u64,
    /// Raw librdkafka properties, applied last.
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["kafka:9092".into()],
            queue_capacity: 100_000,
            linger_ms: 5,
            message_timeout_ms: 120_000,
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    fn client_config(&self) -> Result<ClientConfig, PluginError> {
        if self.endpoints.is_empty() {
            return Err(PluginError::config("broker.endpoints is empty"));
        }

        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", self.endpoints.join(","));
        cfg.set("queue.buffering.max.messages", self.queue_capacity.to_string());
        cfg.set("linger.ms", self.linger_ms.to_string());
        cfg.set("message.timeout.ms", self.message_timeout_ms.to_string());
        // librdkafka retries internally; idempotence keeps those retries duplicate-free.
        cfg.set("acks", "all");
        cfg.set("enable.idempotence", "true");
        for (key, value) in &self.properties {
            cfg.set(key, value);
        }
        Ok(cfg)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Delivery callbacks
// ═══════════════════════════════════════════════════════════════

struct DeliveryContext {
    listener: Arc<dyn DeliveryListener>,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<TicketId>;

    fn delivery(&self, result: &DeliveryResult<'_>, ticket: Self::DeliveryOpaque) {
        let outcome = match result {
            Ok(msg) => DeliveryOutcome::Delivered {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
            },
            Err((err, _msg)) => DeliveryOutcome::failed(classify(err), err.to_string()),
        };
        self.listener.on_delivery(*ticket, outcome);
    }
}

fn classify(err: &KafkaError) -> FailureKind {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut) | Some(RDKafkaErrorCode::RequestTimedOut) => {
            FailureKind::TimedOut
        }
        Some(RDKafkaErrorCode::BrokerTransportFailure)
        | Some(RDKafkaErrorCode::AllBrokersDown)
        | Some(RDKafkaErrorCode::NetworkException) => FailureKind::Transport,
        Some(RDKafkaErrorCode::BrokerDestroy)
        | Some(RDKafkaErrorCode::PurgeQueue)
        | Some(RDKafkaErrorCode::PurgeInflight) => FailureKind::Shutdown,
        _ => FailureKind::Rejected,
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaConnector / KafkaClient
// ═══════════════════════════════════════════════════════════════

pub struct KafkaConnector {
    config: KafkaConfig,
}

impl KafkaConnector {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

impl BrokerConnector for KafkaConnector {
    fn describe(&self) -> String {
        format!("kafka ({})", self.config.endpoints.join(","))
    }

    fn connect(&self, listener: Arc<dyn DeliveryListener>) -> Result<Arc<dyn BrokerClient>, PluginError> {
        let producer: ThreadedProducer<DeliveryContext> = self
            .config
            .client_config()?
            .create_with_context(DeliveryContext { listener })
            .map_err(|e| PluginError::config(format!("failed to create producer: {e}")))?;
        tracing::info!(
            bootstrap = %self.config.endpoints.join(","),
            queue_capacity = self.config.queue_capacity,
            "kafka producer created"
        );
        Ok(Arc::new(KafkaClient { producer: Arc::new(producer) }))
    }
}

pub struct KafkaClient {
    producer: Arc<ThreadedProducer<DeliveryContext>>,
}

impl BrokerClient for KafkaClient {
    fn send(&self, ticket: TicketId, message: OutboundMessage) -> Result<(), SendError> {
        let mut record = BaseRecord::<(), [u8], Box<TicketId>>::with_opaque_to(&message.topic, Box::new(ticket))
            .payload(&message.payload[..]);
        if let Some(ts) = message.timestamp_ms {
            record = record.timestamp(ts);
        }

        let result = self.producer.send(record).map_err(|(err, _record)| err);
        match result {
            Ok(()) => Ok(()),
            Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => Err(SendError::QueueFull(message)),
            Err(err) => Err(SendError::Rejected {
                message,
                error: PluginError::io(format!("produce: {err}")),
            }),
        }
    }

    fn flush(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        let producer = self.producer.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| PluginError::new(format!("flush task: {e}")))?
                .map_err(|e| PluginError::io(format!("flush: {e}")))
        })
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }
}
