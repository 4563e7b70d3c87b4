use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use broker_memory::{MemoryBrokerConfig, MemoryConnector};
use codec_json::JsonRecordParser;
use logpipe_api::{BrokerConnector, LineSource};
use pipeline::{PipelineOrchestrator, StopReason};
use source_file::FileSource;
use source_http::HttpSource;

use super::config::{BrokerKind, BrokerSection, Effective, SourceSection};
use super::error::CliError;

// ═══════════════════════════════════════════════════════════════
//  Main dispatch
// ═══════════════════════════════════════════════════════════════

/// Run the pipeline once. Returns the process exit code.
pub async fn run(eff: Effective) -> Result<i32, CliError> {
    let source = build_source(&eff.source)?;
    let parser = Arc::new(JsonRecordParser::new(eff.parser.clone()));
    let connector = build_connector(&eff.broker)?;

    tracing::info!(
        source = %source.describe(),
        broker = %connector.describe(),
        topic = %eff.pipeline.topic.name,
        "starting logpipe"
    );
    let orchestrator = PipelineOrchestrator::new(source, parser, connector, eff.pipeline)?;

    let token = CancellationToken::new();
    let stop = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested, draining");
        stop.cancel();
    });

    let report = orchestrator.run(token).await?;
    match &report.stop_reason {
        StopReason::SourceFailed(reason) => tracing::error!(%reason, "stopped on source failure"),
        StopReason::Cancelled => tracing::info!("stopped on request"),
        StopReason::Exhausted => {}
    }
    if report.tally.timed_out > 0 {
        tracing::error!(unresolved = report.tally.timed_out, "drain timed out with unresolved tickets");
    }
    if report.dropped > 0 {
        tracing::warn!(dropped = report.dropped, "records dropped under backpressure");
    }
    Ok(report.exit_code())
}

// ═══════════════════════════════════════════════════════════════
//  Component wiring
// ═══════════════════════════════════════════════════════════════

fn build_source(cfg: &SourceSection) -> Result<Arc<dyn LineSource>, CliError> {
    let url = cfg.url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        let source = HttpSource::new(url, Duration::from_millis(cfg.connect_timeout_ms), cfg.max_line_length)?;
        Ok(Arc::new(source))
    } else {
        Ok(Arc::new(FileSource::new(url, cfg.max_line_length)))
    }
}

fn build_connector(cfg: &BrokerSection) -> Result<Arc<dyn BrokerConnector>, CliError> {
    match cfg.kind {
        BrokerKind::Memory => Ok(Arc::new(MemoryConnector::new(MemoryBrokerConfig {
            partitions: cfg.partitions,
            queue_capacity: cfg.queue_capacity,
            linger_ms: cfg.linger_ms,
            ..Default::default()
        }))),
        BrokerKind::Kafka => kafka_connector(cfg),
    }
}

#[cfg(feature = "kafka")]
fn kafka_connector(cfg: &BrokerSection) -> Result<Arc<dyn BrokerConnector>, CliError> {
    Ok(Arc::new(broker_kafka::KafkaConnector::new(broker_kafka::KafkaConfig {
        endpoints: cfg.endpoints.clone(),
        queue_capacity: cfg.queue_capacity,
        linger_ms: cfg.linger_ms,
        message_timeout_ms: cfg.message_timeout_ms,
        properties: cfg.properties.clone(),
    })))
}

#[cfg(not(feature = "kafka"))]
fn kafka_connector(_cfg: &BrokerSection) -> Result<Arc<dyn BrokerConnector>, CliError> {
    Err(CliError::Config("built without kafka support, use broker.kind = \"memory\"".into()))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::config::RunArgs;

    #[test]
    fn picks_source_by_scheme() {
        let mut cfg = SourceSection { url: "https://example.com/logs".into(), ..Default::default() };
        assert!(build_source(&cfg).unwrap().describe().contains("example.com"));

        cfg.url = "file:///var/log/nginx/access.json".into();
        assert!(build_source(&cfg).unwrap().describe().contains("/var/log/nginx/access.json"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dry_run_over_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.json");
        std::fs::write(
            &path,
            "{\"remote_ip\":\"93.180.71.3\",\"response\":304}\nnot-json\n{\"remote_ip\":\"80.91.33.133\",\"response\":200}\n",
        )
        .unwrap();

        let args = RunArgs {
            source: Some(path.to_string_lossy().into_owned()),
            dry_run: true,
            ..Default::default()
        };
        let mut eff = Effective::new(&args).unwrap();
        eff.pipeline.drain.timeout_ms = 5_000;
        assert_eq!(run(eff).await.unwrap(), 0);
    }
}
