use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::{DeliveryOutcome, LogRecord, OutboundMessage, PluginError, RawLine, TicketId};

// ════════════════════════════════════════════════════════════════
//  Line source
// ════════════════════════════════════════════════════════════════

/// Opens a line supplier. Implementations: local file, streaming HTTP.
///
/// A source can be opened more than once (open retries); each supplier it
/// returns is single-use.
pub trait LineSource: Send + Sync {
    /// Human-readable location (for logging).
    fn describe(&self) -> String;

    /// Acquire the underlying handle/connection. An error here means the
    /// source is unavailable.
    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn LineSupplier>, PluginError>> + Send + '_>>;
}

/// Lazy, ordered sequence of raw lines. Not restartable once exhausted.
///
/// Holds the open handle for its whole lifetime; dropping the supplier
/// releases it, `close()` releases it explicitly.
pub trait LineSupplier: Send {
    /// Next line. `Ok(None)` = end of stream, `Err` = I/O failure.
    /// Errors are never reported as end of stream.
    fn next_line(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<RawLine>, PluginError>> + Send + '_>>;

    /// Release the handle. Idempotent.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

// ════════════════════════════════════════════════════════════════
//  Record parser
// ════════════════════════════════════════════════════════════════

/// RawLine → LogRecord. Must be pure: no I/O, no shared mutable state,
/// the same input always gives the same result.
pub trait RecordParser: Send + Sync {
    fn parse(&self, line: &RawLine) -> Result<LogRecord, PluginError>;
}

// ════════════════════════════════════════════════════════════════
//  Broker client
// ════════════════════════════════════════════════════════════════

/// Receives acknowledgments from the broker client.
///
/// Called from the client's own delivery context (a librdkafka polling
/// thread, a transmitter task), never from the submitting task. Must not
/// block.
pub trait DeliveryListener: Send + Sync {
    fn on_delivery(&self, ticket: TicketId, outcome: DeliveryOutcome);
}

/// Why a message was not accepted into the client's send buffer.
/// Ownership of the message goes back to the caller.
#[derive(Debug)]
pub enum SendError {
    /// Outbound buffer saturated; back off and retry.
    QueueFull(OutboundMessage),
    /// Refused synchronously (message too large, unknown topic, client closed).
    Rejected { message: OutboundMessage, error: PluginError },
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::QueueFull(m) => write!(f, "outbound queue full (topic {})", m.topic),
            SendError::Rejected { message, error } => {
                write!(f, "rejected (topic {}): {error}", message.topic)
            }
        }
    }
}

/// Asynchronous, batching broker client.
///
/// `send` only hands the message to the client's internal buffer. Exactly
/// one `on_delivery` call follows for every accepted ticket.
pub trait BrokerClient: Send + Sync {
    fn send(&self, ticket: TicketId, message: OutboundMessage) -> Result<(), SendError>;

    /// Wait until every accepted message has been acknowledged, at most
    /// `timeout`. Err = messages still in flight.
    fn flush(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>>;

    /// Messages accepted but not yet acknowledged.
    fn in_flight(&self) -> usize;
}

/// Constructs a broker client bound to a delivery listener.
pub trait BrokerConnector: Send + Sync {
    fn describe(&self) -> String;

    fn connect(&self, listener: Arc<dyn DeliveryListener>) -> Result<Arc<dyn BrokerClient>, PluginError>;
}
