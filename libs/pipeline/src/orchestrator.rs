use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use logpipe_api::{preview, BrokerConnector, LineSource, LineSupplier, LogRecord, RecordParser};

use crate::pacing::Pacer;
use crate::{DeliveryTracker, DrainReport, PipelineConfig, PipelineError, Publisher, SubmitError};

// ═══════════════════════════════════════════════════════════════
//  State / report
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Starting,
    Streaming,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Source reached end of stream.
    Exhausted,
    /// External stop signal.
    Cancelled,
    /// Fatal source error while streaming.
    SourceFailed(String),
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub lines_read: u64,
    /// Malformed lines (parse errors and oversized lines), skipped.
    pub parse_errors: u64,
    /// Records that received a ticket.
    pub submitted: u64,
    /// Records given up on before reaching the broker client.
    pub dropped: u64,
    pub tally: DrainReport,
    pub states: Vec<PipelineState>,
    pub stop_reason: StopReason,
}

impl RunReport {
    fn new() -> Self {
        Self {
            lines_read: 0,
            parse_errors: 0,
            submitted: 0,
            dropped: 0,
            tally: DrainReport::default(),
            states: vec![PipelineState::Starting],
            stop_reason: StopReason::Exhausted,
        }
    }

    /// 0 clean, 2 fatal source error, 3 unresolved tickets at drain timeout.
    pub fn exit_code(&self) -> i32 {
        if matches!(self.stop_reason, StopReason::SourceFailed(_)) {
            2
        } else if self.tally.timed_out > 0 {
            3
        } else {
            0
        }
    }

    pub fn final_state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Starting)
    }
}

enum Submission {
    Accepted,
    /// The ticket exists and is already resolved as failed.
    Rejected,
    Dropped,
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════
//  PipelineOrchestrator
// ═══════════════════════════════════════════════════════════════

/// Drives one run: STARTING → STREAMING → DRAINING → STOPPED.
pub struct PipelineOrchestrator {
    source: Arc<dyn LineSource>,
    parser: Arc<dyn RecordParser>,
    connector: Arc<dyn BrokerConnector>,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        source: Arc<dyn LineSource>,
        parser: Arc<dyn RecordParser>,
        connector: Arc<dyn BrokerConnector>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { source, parser, connector, config })
    }

    /// Run until the source is exhausted, fails, or `token` is cancelled.
    ///
    /// `Err` only for failures before streaming starts (broker client
    /// creation, source unavailable after all open retries).
    pub async fn run(&self, token: CancellationToken) -> Result<RunReport, PipelineError> {
        let mut report = RunReport::new();
        tracing::info!(source = %self.source.describe(), topic = %self.config.topic.name, "pipeline starting");

        let tracker = Arc::new(DeliveryTracker::new());
        let publisher = Publisher::connect(&*self.connector, tracker.clone(), self.config.pacing.max_in_flight)
            .map_err(|error| PipelineError::Broker { broker: self.connector.describe(), error })?;

        let Some(mut supplier) = self.open_source(&token).await? else {
            tracing::info!("cancelled while opening source");
            report.stop_reason = StopReason::Cancelled;
            publisher.close();
            report.states.push(PipelineState::Stopped);
            return Ok(report);
        };

        self.enter(&mut report, PipelineState::Streaming);
        let reason = self.stream(&mut *supplier, &publisher, &token, &mut report).await;
        report.stop_reason = reason;

        // ─── Draining ───
        self.enter(&mut report, PipelineState::Draining);
        if let Err(e) = supplier.close().await {
            tracing::warn!(error = ?e, "source close error");
        }
        drop(supplier);

        let drain_timeout = self.config.drain.timeout();
        let deadline = Instant::now() + drain_timeout;
        if let Err(e) = publisher.flush(drain_timeout).await {
            tracing::warn!(error = %e, pending = tracker.pending_count(), "broker flush incomplete");
        }
        report.tally = tracker.drain(deadline.saturating_duration_since(Instant::now())).await;
        publisher.close();

        self.enter(&mut report, PipelineState::Stopped);
        tracing::info!(
            lines = report.lines_read,
            parse_errors = report.parse_errors,
            submitted = report.submitted,
            dropped = report.dropped,
            delivered = report.tally.delivered,
            failed = report.tally.failed,
            timed_out = report.tally.timed_out,
            reason = ?report.stop_reason,
            "pipeline stopped"
        );
        Ok(report)
    }

    fn enter(&self, report: &mut RunReport, state: PipelineState) {
        tracing::info!(from = ?report.final_state(), to = ?state, "pipeline state");
        report.states.push(state);
    }

    /// `Ok(None)` when cancelled during the retries.
    async fn open_source(&self, token: &CancellationToken) -> Result<Option<Box<dyn LineSupplier>>, PipelineError> {
        let mut backoff = self.config.pacing.backoff_with_retries(self.config.open_retries);
        loop {
            let error = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                opened = self.source.open() => match opened {
                    Ok(supplier) => return Ok(Some(supplier)),
                    Err(e) => e,
                },
            };

            let delay = if error.is_permanent() { None } else { backoff.next_delay() };
            let Some(delay) = delay else {
                return Err(PipelineError::SourceUnavailable { location: self.source.describe(), error });
            };
            tracing::warn!(attempt = backoff.attempts(), ?delay, error = %error, "source open failed, retrying");
            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn stream(
        &self,
        supplier: &mut dyn LineSupplier,
        publisher: &Publisher,
        token: &CancellationToken,
        report: &mut RunReport,
    ) -> StopReason {
        let mut pacer = Pacer::new(self.config.pacing.interval());

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return StopReason::Cancelled,
                next = supplier.next_line() => next,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!(lines = report.lines_read, "source exhausted");
                    return StopReason::Exhausted;
                }
                Err(e) if e.is_skippable() => {
                    report.lines_read += 1;
                    report.parse_errors += 1;
                    tracing::warn!(error = %e, "unreadable line, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, lines = report.lines_read, "source failed");
                    return StopReason::SourceFailed(e.to_string());
                }
            };
            report.lines_read += 1;

            let record = match self.parser.parse(&line) {
                Ok(record) => record,
                Err(e) => {
                    report.parse_errors += 1;
                    tracing::warn!(line = line.line_no, error = %e, payload = %preview(&line.bytes), "parse error, skipping");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    report.dropped += 1;
                    tracing::warn!(line = record.line_no, payload = %preview(&line.bytes), "record dropped at shutdown");
                    return StopReason::Cancelled;
                }
                _ = pacer.tick() => {}
            }

            match self.submit_with_backoff(publisher, &record, token).await {
                Submission::Accepted | Submission::Rejected => report.submitted += 1,
                Submission::Dropped => report.dropped += 1,
                Submission::Cancelled => {
                    report.dropped += 1;
                    return StopReason::Cancelled;
                }
            }
        }
    }

    /// Submit one record, pausing on QueueFull with bounded backoff.
    async fn submit_with_backoff(
        &self,
        publisher: &Publisher,
        record: &LogRecord,
        token: &CancellationToken,
    ) -> Submission {
        let topic = &self.config.topic.name;
        let mut backoff = self.config.pacing.backoff();

        loop {
            match publisher.submit(record, topic) {
                Ok(ticket) => {
                    tracing::trace!(ticket, line = record.line_no, "submitted");
                    return Submission::Accepted;
                }
                Err(SubmitError::QueueFull) => {
                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(
                            line = record.line_no,
                            retries = backoff.attempts(),
                            payload = %record_preview(record),
                            "queue full, retries exhausted, record dropped"
                        );
                        return Submission::Dropped;
                    };
                    tracing::debug!(line = record.line_no, attempt = backoff.attempts(), ?delay, "queue full, backing off");
                    tokio::select! {
                        _ = token.cancelled() => {
                            tracing::warn!(line = record.line_no, payload = %record_preview(record), "record dropped at shutdown");
                            return Submission::Cancelled;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(SubmitError::Rejected { ticket, error }) => {
                    tracing::debug!(ticket, line = record.line_no, error = %error, "submission rejected");
                    return Submission::Rejected;
                }
                Err(SubmitError::Serialize(e)) => {
                    tracing::error!(line = record.line_no, error = %e, "record not serializable, dropped");
                    return Submission::Dropped;
                }
            }
        }
    }
}

fn record_preview(record: &LogRecord) -> String {
    record.to_payload().map(|p| preview(&p)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpipe_api::PluginError;

    fn report(stop_reason: StopReason, timed_out: u64) -> RunReport {
        RunReport {
            tally: DrainReport { delivered: 1, failed: 0, timed_out },
            stop_reason,
            ..RunReport::new()
        }
    }

    #[test]
    fn exit_codes() {
        assert_eq!(report(StopReason::Exhausted, 0).exit_code(), 0);
        assert_eq!(report(StopReason::Cancelled, 0).exit_code(), 0);
        assert_eq!(report(StopReason::Exhausted, 2).exit_code(), 3);
        assert_eq!(report(StopReason::SourceFailed("reset".into()), 0).exit_code(), 2);
        assert_eq!(report(StopReason::SourceFailed("reset".into()), 2).exit_code(), 2);
    }

    #[test]
    fn pre_stream_errors_map_to_exit_codes() {
        let unavailable = PipelineError::SourceUnavailable {
            location: "http://logs".into(),
            error: PluginError::io("connection refused"),
        };
        assert_eq!(unavailable.exit_code(), 2);
        assert_eq!(PipelineError::Config("topic.name is empty".into()).exit_code(), 1);
    }
}
