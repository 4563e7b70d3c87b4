use std::collections::BTreeMap;

use clap::Args;
use serde::Deserialize;

use codec_json::JsonParserConfig;
use pipeline::{DrainConfig, PacingConfig, PipelineConfig, TopicConfig};

use super::error::CliError;

pub const DEFAULT_CONFIG: &str = "logpipe.toml";

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub topic: TopicConfig,
    #[serde(default)]
    pub parser: JsonParserConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub drain: DrainConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    #[default]
    Kafka,
    /// In-process broker, nothing leaves the process.
    Memory,
}

fn default_endpoints() -> Vec<String> {
    vec!["kafka:9092".into()]
}
fn default_queue_capacity() -> usize {
    100_000
}
fn default_linger_ms() -> u64 {
    5
}
fn default_message_timeout_ms() -> u64 {
    120_000
}
fn default_partitions() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default)]
    pub kind: BrokerKind,
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    /// Partition count of the in-process broker.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Raw librdkafka properties (kafka only).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            kind: BrokerKind::default(),
            endpoints: default_endpoints(),
            queue_capacity: default_queue_capacity(),
            linger_ms: default_linger_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            partitions: default_partitions(),
            properties: BTreeMap::new(),
        }
    }
}

fn default_source_url() -> String {
    "https://raw.githubusercontent.com/elastic/examples/master/Common%20Data%20Formats/nginx_json_logs/nginx_json_logs"
        .into()
}
fn default_max_line_length() -> usize {
    1024 * 1024
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_open_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    /// http(s):// URL, file:// URI or plain path.
    #[serde(default = "default_source_url")]
    pub url: String,
    /// Longer lines are skipped as malformed. Must be positive.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_open_retries")]
    pub open_retries: u32,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            max_line_length: default_max_line_length(),
            connect_timeout_ms: default_connect_timeout_ms(),
            open_retries: default_open_retries(),
        }
    }
}

pub fn load_config(path: &str) -> Result<Config, CliError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| CliError::Config(format!("cannot read config {path}: {e}")))?;
    parse_config(&content).map_err(|e| CliError::Config(format!("bad config {path}: {e}")))
}

fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    /// Path to the TOML config [default: logpipe.toml]
    #[arg(long, env = "LOGPIPE_CONFIG")]
    pub config: Option<String>,

    /// Broker endpoints, comma separated (host:port)
    #[arg(long, env = "LOGPIPE_BROKERS", value_delimiter = ',')]
    pub brokers: Option<Vec<String>>,

    /// Log source: http(s) URL, file:// URI or path
    #[arg(long, env = "LOGPIPE_SOURCE")]
    pub source: Option<String>,

    /// Target topic
    #[arg(long, env = "LOGPIPE_TOPIC")]
    pub topic: Option<String>,

    /// Minimum gap between submissions, ms
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// How long to wait for outstanding acknowledgments at shutdown, ms
    #[arg(long)]
    pub drain_timeout_ms: Option<u64>,

    /// Publish to the in-process broker instead of the configured one
    #[arg(long)]
    pub dry_run: bool,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final configuration: defaults < logpipe.toml < env < CLI.
#[derive(Debug)]
pub struct Effective {
    pub broker: BrokerSection,
    pub source: SourceSection,
    pub parser: JsonParserConfig,
    pub pipeline: PipelineConfig,
}

impl Effective {
    pub fn new(args: &RunArgs) -> Result<Self, CliError> {
        let cfg = match &args.config {
            Some(path) => load_config(path)?,
            None if std::path::Path::new(DEFAULT_CONFIG).exists() => load_config(DEFAULT_CONFIG)?,
            None => Config::default(),
        };
        Self::merge(cfg, args)
    }

    fn merge(cfg: Config, args: &RunArgs) -> Result<Self, CliError> {
        let Config { mut broker, mut source, mut topic, parser, mut pacing, mut drain } = cfg;

        if let Some(brokers) = &args.brokers {
            broker.endpoints = brokers.iter().map(|b| b.trim().to_string()).filter(|b| !b.is_empty()).collect();
        }
        if args.dry_run {
            broker.kind = BrokerKind::Memory;
        }
        if let Some(url) = &args.source {
            source.url = url.clone();
        }
        if let Some(name) = &args.topic {
            topic.name = name.clone();
        }
        if let Some(interval) = args.interval_ms {
            pacing.interval_ms = interval;
        }
        if let Some(timeout) = args.drain_timeout_ms {
            drain.timeout_ms = timeout;
        }

        if broker.kind == BrokerKind::Kafka && broker.endpoints.is_empty() {
            return Err(CliError::Config("broker.endpoints is empty".into()));
        }
        if broker.queue_capacity == 0 {
            return Err(CliError::Config("broker.queue_capacity must be positive".into()));
        }
        if source.url.trim().is_empty() {
            return Err(CliError::Config("source.url is empty".into()));
        }
        if source.max_line_length == 0 {
            return Err(CliError::Config("source.max_line_length must be positive".into()));
        }

        let pipeline = PipelineConfig { topic, pacing, drain, open_retries: source.open_retries };
        pipeline.validate()?;

        Ok(Self { broker, source, parser, pipeline })
    }
}
