use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use logpipe_api::{
    now_ms, BrokerClient, BrokerConnector, DeliveryListener, DeliveryOutcome, FailureKind,
    OutboundMessage, PluginError, SendError, TicketId,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryBrokerConfig
// ═══════════════════════════════════════════════════════════════

fn default_partitions() -> u32 {
    3
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    500
}
fn default_linger_ms() -> u64 {
    5
}
fn default_max_retained() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryBrokerConfig {
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Outbound buffer size; `send` answers QueueFull beyond it.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    /// Per-partition retention (oldest messages are evicted, offsets keep growing).
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
    /// When non-empty, messages to any other topic are negatively acknowledged.
    #[serde(default)]
    pub known_topics: Vec<String>,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            linger_ms: default_linger_ms(),
            max_retained: default_max_retained(),
            known_topics: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryLog: partitioned append-only topic logs
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
    pub payload: Arc<[u8]>,
}

#[derive(Default)]
struct PartitionLog {
    next_offset: i64,
    records: VecDeque<StoredMessage>,
}

/// Committed messages of every topic. Shared between the connector (for
/// inspection) and the transmitter task.
pub struct MemoryLog {
    topics: Mutex<HashMap<String, Vec<PartitionLog>>>,
    partitions: u32,
    max_retained: usize,
}

impl MemoryLog {
    fn new(partitions: u32, max_retained: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            partitions: partitions.max(1),
            max_retained,
        }
    }

    fn append(&self, message: &OutboundMessage, partition: i32) -> i64 {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let parts = topics
            .entry(message.topic.clone())
            .or_insert_with(|| (0..self.partitions).map(|_| PartitionLog::default()).collect());
        let log = &mut parts[partition as usize];

        let offset = log.next_offset;
        log.next_offset += 1;
        if log.records.len() >= self.max_retained {
            log.records.pop_front();
        }
        log.records.push_back(StoredMessage {
            partition,
            offset,
            timestamp_ms: message.timestamp_ms.unwrap_or_else(now_ms),
            payload: message.payload.clone(),
        });
        offset
    }

    /// Retained messages of a topic, ordered by (partition, offset).
    pub fn messages(&self, topic: &str) -> Vec<StoredMessage> {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|parts| parts.iter().flat_map(|p| p.records.iter().cloned()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|parts| parts.iter().map(|p| p.records.len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConnector
// ═══════════════════════════════════════════════════════════════

pub struct MemoryConnector {
    config: MemoryBrokerConfig,
    log: Arc<MemoryLog>,
}

impl MemoryConnector {
    pub fn new(config: MemoryBrokerConfig) -> Self {
        let log = Arc::new(MemoryLog::new(config.partitions, config.max_retained));
        Self { config, log }
    }

    pub fn log(&self) -> Arc<MemoryLog> {
        self.log.clone()
    }
}

impl BrokerConnector for MemoryConnector {
    fn describe(&self) -> String {
        format!("memory ({} partitions)", self.log.partitions)
    }

    fn connect(&self, listener: Arc<dyn DeliveryListener>) -> Result<Arc<dyn BrokerClient>, PluginError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PluginError::config(format!("memory broker needs a tokio runtime: {e}")))?;

        let (tx, rx) = mpsc::channel::<Envelope>(self.config.queue_capacity.max(1));
        let in_flight = Arc::new(InFlight::default());

        runtime.spawn(transmit(
            rx,
            listener,
            self.log.clone(),
            in_flight.clone(),
            self.config.clone(),
        ));
        tracing::info!(
            partitions = self.log.partitions,
            queue_capacity = self.config.queue_capacity,
            "memory broker started"
        );

        Ok(Arc::new(MemoryBroker { tx, in_flight }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker: BrokerClient
// ═══════════════════════════════════════════════════════════════

struct Envelope {
    ticket: TicketId,
    message: OutboundMessage,
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct MemoryBroker {
    tx: mpsc::Sender<Envelope>,
    in_flight: Arc<InFlight>,
}

impl BrokerClient for MemoryBroker {
    fn send(&self, ticket: TicketId, message: OutboundMessage) -> Result<(), SendError> {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(Envelope { ticket, message }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(env)) => {
                self.in_flight.done();
                Err(SendError::QueueFull(env.message))
            }
            Err(mpsc::error::TrySendError::Closed(env)) => {
                self.in_flight.done();
                Err(SendError::Rejected {
                    message: env.message,
                    error: PluginError::io("memory broker closed"),
                })
            }
        }
    }

    fn flush(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let idle = self.in_flight.idle.notified();
                let pending = self.in_flight.count.load(Ordering::Acquire);
                if pending == 0 {
                    return Ok(());
                }
                if tokio::time::timeout_at(deadline, idle).await.is_err() {
                    return Err(PluginError::io(format!(
                        "flush timed out with {} messages in flight",
                        self.in_flight.count.load(Ordering::Acquire)
                    )));
                }
            }
        })
    }

    fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }
}

/// Transmitter: drains the outbound queue in batches, appends each batch
/// to one partition (sticky, rotating per batch) and acknowledges.
async fn transmit(
    mut rx: mpsc::Receiver<Envelope>,
    listener: Arc<dyn DeliveryListener>,
    log: Arc<MemoryLog>,
    in_flight: Arc<InFlight>,
    config: MemoryBrokerConfig,
) {
    let batch_size = config.batch_size.max(1);
    let linger = Duration::from_millis(config.linger_ms);
    let mut batch: Vec<Envelope> = Vec::with_capacity(batch_size);
    let mut next_partition: u32 = 0;

    loop {
        if rx.recv_many(&mut batch, batch_size).await == 0 {
            break;
        }
        if !linger.is_zero() && batch.len() < batch_size {
            tokio::time::sleep(linger).await;
            while batch.len() < batch_size {
                match rx.try_recv() {
                    Ok(env) => batch.push(env),
                    Err(_) => break,
                }
            }
        }

        let partition = (next_partition % log.partitions) as i32;
        next_partition = next_partition.wrapping_add(1);

        for env in batch.drain(..) {
            let known = config.known_topics.is_empty() || config.known_topics.contains(&env.message.topic);
            let outcome = if known {
                let offset = log.append(&env.message, partition);
                DeliveryOutcome::Delivered {
                    topic: env.message.topic.clone(),
                    partition,
                    offset,
                }
            } else {
                DeliveryOutcome::failed(
                    FailureKind::Rejected,
                    format!("unknown topic or partition: {}", env.message.topic),
                )
            };
            listener.on_delivery(env.ticket, outcome);
            in_flight.done();
        }
    }

    tracing::debug!("memory broker transmitter stopped");
}
