use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logpipe_api::{
    preview, BrokerClient, BrokerConnector, DeliveryListener, DeliveryOutcome, FailureKind,
    LogRecord, PluginError, PublishTicket, SendError, TicketId,
};

use crate::DeliveryTracker;

// ═══════════════════════════════════════════════════════════════
//  DeliveryReporter: broker acknowledgments → tracker
// ═══════════════════════════════════════════════════════════════

/// Listener handed to the broker client. Resolves tickets and logs each
/// outcome against the record it belongs to.
pub struct DeliveryReporter {
    tracker: Arc<DeliveryTracker>,
}

impl DeliveryReporter {
    pub fn new(tracker: Arc<DeliveryTracker>) -> Self {
        Self { tracker }
    }
}

impl DeliveryListener for DeliveryReporter {
    fn on_delivery(&self, ticket: TicketId, outcome: DeliveryOutcome) {
        let Some(resolved) = self.tracker.resolve(ticket, &outcome) else {
            tracing::debug!(ticket, "duplicate or late delivery report ignored");
            return;
        };
        match &outcome {
            DeliveryOutcome::Delivered { topic, partition, offset } => {
                tracing::debug!(ticket, line = resolved.line_no, %topic, partition, offset, "delivered");
            }
            DeliveryOutcome::Failed { kind, reason } => {
                tracing::warn!(
                    ticket,
                    line = resolved.line_no,
                    topic = %resolved.topic,
                    %kind,
                    %reason,
                    payload = %preview(&resolved.payload),
                    "delivery failed"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Publisher
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Backpressure: nothing was handed to the broker client.
    #[error("outbound queue full")]
    QueueFull,
    /// The client refused the message; the ticket is already resolved as failed.
    #[error("ticket {ticket} rejected: {error}")]
    Rejected { ticket: TicketId, error: PluginError },
    #[error("serialize: {0}")]
    Serialize(PluginError),
}

/// Explicitly constructed broker client wrapper, owned by one pipeline run.
pub struct Publisher {
    client: Arc<dyn BrokerClient>,
    reporter: Arc<DeliveryReporter>,
    tracker: Arc<DeliveryTracker>,
    next_ticket: AtomicU64,
    max_in_flight: usize,
}

impl Publisher {
    pub fn connect(
        connector: &dyn BrokerConnector,
        tracker: Arc<DeliveryTracker>,
        max_in_flight: usize,
    ) -> Result<Self, PluginError> {
        let reporter = Arc::new(DeliveryReporter::new(tracker.clone()));
        let client = connector.connect(reporter.clone())?;
        tracing::info!(broker = %connector.describe(), max_in_flight, "publisher connected");
        Ok(Self {
            client,
            reporter,
            tracker,
            next_ticket: AtomicU64::new(1),
            max_in_flight,
        })
    }

    /// Serialize `record` and hand it to the broker client's send buffer.
    ///
    /// Never waits. On success the returned ticket is pending in the tracker
    /// and will be resolved exactly once by the delivery report.
    pub fn submit(&self, record: &LogRecord, topic: &str) -> Result<TicketId, SubmitError> {
        if self.tracker.pending_count() >= self.max_in_flight {
            return Err(SubmitError::QueueFull);
        }
        let payload: Arc<[u8]> = record.to_payload().map_err(SubmitError::Serialize)?.into();

        // Registered before the send: the report may arrive before `send` returns.
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let ticket = PublishTicket::new(id, record.line_no, topic, payload);
        let message = ticket.message(record.timestamp_ms);
        self.tracker.register(ticket);

        match self.client.send(id, message) {
            Ok(()) => Ok(id),
            Err(SendError::QueueFull(_)) => {
                self.tracker.withdraw(id);
                Err(SubmitError::QueueFull)
            }
            Err(SendError::Rejected { error, .. }) => {
                self.reporter
                    .on_delivery(id, DeliveryOutcome::failed(FailureKind::Rejected, error.to_string()));
                Err(SubmitError::Rejected { ticket: id, error })
            }
        }
    }

    /// Wait for the broker client to transmit everything it accepted.
    pub async fn flush(&self, timeout: Duration) -> Result<(), PluginError> {
        self.client.flush(timeout).await
    }

    pub fn in_flight(&self) -> usize {
        self.client.in_flight()
    }

    /// Release the broker client. Tickets still pending are the tracker's to expire.
    pub fn close(self) {
        let in_flight = self.client.in_flight();
        if in_flight > 0 {
            tracing::warn!(in_flight, "publisher closed with messages in flight");
        } else {
            tracing::info!("publisher closed");
        }
    }
}
