pub mod config;
pub mod error;
mod orchestrator;
mod pacing;
mod publisher;
mod tracker;

pub use config::{DrainConfig, PacingConfig, PipelineConfig, TopicConfig};
pub use error::PipelineError;
pub use orchestrator::{PipelineOrchestrator, PipelineState, RunReport, StopReason};
pub use pacing::{Backoff, Pacer};
pub use publisher::{DeliveryReporter, Publisher, SubmitError};
pub use tracker::{DeliveryTracker, DrainReport};
