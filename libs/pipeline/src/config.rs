use std::time::Duration;

use serde::Deserialize;

use crate::pacing::Backoff;
use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Topic
// ═══════════════════════════════════════════════════════════════

fn default_topic_name() -> String {
    "nginx_access_logs".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    #[serde(default = "default_topic_name")]
    pub name: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self { name: default_topic_name() }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Pacing
// ═══════════════════════════════════════════════════════════════

fn default_backoff_initial_ms() -> u64 {
    10
}
fn default_backoff_max_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    10
}
fn default_max_in_flight() -> usize {
    100_000
}

/// Submission rate and QueueFull handling.
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    /// Minimum gap between submissions; 0 = unpaced.
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// QueueFull retries for one record before it is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Cap on unresolved tickets.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 0,
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_retries: default_max_retries(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl PacingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff_with_retries(self.max_retries)
    }

    pub fn backoff_with_retries(&self, retries: u32) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
            retries,
        )
    }
}

// ═══════════════════════════════════════════════════════════════
//  Drain
// ═══════════════════════════════════════════════════════════════

fn default_drain_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    #[serde(default = "default_drain_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self { timeout_ms: default_drain_timeout_ms() }
    }
}

impl DrainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ═══════════════════════════════════════════════════════════════
//  PipelineConfig
// ═══════════════════════════════════════════════════════════════

/// Everything the orchestrator needs besides its components.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub topic: TopicConfig,
    pub pacing: PacingConfig,
    pub drain: DrainConfig,
    /// Extra attempts to open the source before giving up.
    pub open_retries: u32,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.topic.name.trim().is_empty() {
            return Err(PipelineError::Config("topic.name is empty".into()));
        }
        if self.pacing.backoff_initial_ms > self.pacing.backoff_max_ms {
            return Err(PipelineError::Config(format!(
                "pacing.backoff_initial_ms ({}) exceeds pacing.backoff_max_ms ({})",
                self.pacing.backoff_initial_ms, self.pacing.backoff_max_ms
            )));
        }
        if self.pacing.max_in_flight == 0 {
            return Err(PipelineError::Config("pacing.max_in_flight must be positive".into()));
        }
        Ok(())
    }
}
