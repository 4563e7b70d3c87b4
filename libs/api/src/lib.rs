//! Shared contracts of the log pipeline: the data model flowing from line
//! sources to the broker, component traits and the component error type.
//!
//! The crate carries no runtime dependency; async trait methods return
//! boxed futures so any executor can drive them.

mod error;
mod pipeline;
mod types;
pub mod util;

pub use error::{ErrorKind, PluginError};
pub use pipeline::{
    BrokerClient, BrokerConnector, DeliveryListener, LineSource, LineSupplier, RecordParser,
    SendError,
};
pub use types::{
    DeliveryOutcome, FailureKind, LogRecord, OutboundMessage, PublishTicket, RawLine, TicketId,
    TicketStatus,
};
pub use util::{now_ms, preview};
