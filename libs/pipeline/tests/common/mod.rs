//! Scripted line sources and brokers for orchestrator tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use logpipe_api::{
    BrokerClient, BrokerConnector, DeliveryListener, DeliveryOutcome, FailureKind, LineSource,
    LineSupplier, OutboundMessage, PluginError, RawLine, SendError, TicketId,
};

// ═══════════════════════════════════════════════════════════════
//  ScriptedSource
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub enum Step {
    Line(String),
    Fail(PluginError),
    /// Never yields; only cancellation gets past it.
    Hang,
}

pub fn lines(lines: &[&str]) -> Vec<Step> {
    lines.iter().map(|l| Step::Line(l.to_string())).collect()
}

#[derive(Clone)]
pub struct ScriptedSource {
    steps: Vec<Step>,
    open_failures: Arc<AtomicUsize>,
    opens: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            open_failures: Arc::new(AtomicUsize::new(0)),
            opens: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail the first `n` open attempts.
    pub fn failing_opens(self, n: usize) -> Self {
        self.open_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LineSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".into()
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Box<dyn LineSupplier>, PluginError>> + Send + '_>> {
        Box::pin(async move {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .open_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(PluginError::io("connection refused"));
            }
            Ok(Box::new(ScriptedSupplier {
                steps: self.steps.clone().into(),
                line_no: 0,
                closed: self.closed.clone(),
            }) as Box<dyn LineSupplier>)
        })
    }
}

struct ScriptedSupplier {
    steps: VecDeque<Step>,
    line_no: u64,
    closed: Arc<AtomicBool>,
}

impl LineSupplier for ScriptedSupplier {
    fn next_line(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<RawLine>, PluginError>> + Send + '_>> {
        Box::pin(async move {
            match self.steps.pop_front() {
                Some(Step::Line(text)) => {
                    self.line_no += 1;
                    Ok(Some(RawLine::new(self.line_no, text)))
                }
                Some(Step::Fail(e)) => Err(e),
                Some(Step::Hang) => std::future::pending().await,
                None => Ok(None),
            }
        })
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        self.closed.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

// ═══════════════════════════════════════════════════════════════
//  ScriptedBroker
// ═══════════════════════════════════════════════════════════════

#[derive(Clone, Copy)]
pub enum AckMode {
    /// Acknowledge each accepted message from a separate task.
    Deliver,
    /// Negatively acknowledge each accepted message.
    Fail,
    /// Never acknowledge.
    Hold,
}

struct BrokerState {
    mode: AckMode,
    queue_full: AtomicUsize,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    accepted: Mutex<Vec<(TicketId, OutboundMessage)>>,
}

#[derive(Clone)]
pub struct ScriptedBroker {
    state: Arc<BrokerState>,
}

impl ScriptedBroker {
    pub fn new(mode: AckMode) -> Self {
        Self {
            state: Arc::new(BrokerState {
                mode,
                queue_full: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                accepted: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Answer the next `n` sends with QueueFull.
    pub fn queue_full(self, n: usize) -> Self {
        self.state.queue_full.store(n, Ordering::SeqCst);
        self
    }

    /// Every `send` call, accepted or not.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<(TicketId, OutboundMessage)> {
        self.state.accepted.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.accepted()
            .into_iter()
            .map(|(_, m)| String::from_utf8(m.payload.to_vec()).unwrap())
            .collect()
    }
}

impl BrokerConnector for ScriptedBroker {
    fn describe(&self) -> String {
        "scripted".into()
    }

    fn connect(&self, listener: Arc<dyn DeliveryListener>) -> Result<Arc<dyn BrokerClient>, PluginError> {
        Ok(Arc::new(ScriptedClient { state: self.state.clone(), listener }))
    }
}

struct ScriptedClient {
    state: Arc<BrokerState>,
    listener: Arc<dyn DeliveryListener>,
}

impl BrokerClient for ScriptedClient {
    fn send(&self, ticket: TicketId, message: OutboundMessage) -> Result<(), SendError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let full = self
            .state
            .queue_full
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if full {
            return Err(SendError::QueueFull(message));
        }

        let offset = {
            let mut accepted = self.state.accepted.lock().unwrap();
            accepted.push((ticket, message.clone()));
            accepted.len() as i64 - 1
        };
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);

        let outcome = match self.state.mode {
            AckMode::Hold => return Ok(()),
            AckMode::Deliver => DeliveryOutcome::Delivered { topic: message.topic, partition: 0, offset },
            AckMode::Fail => DeliveryOutcome::failed(FailureKind::Rejected, "not leader for partition"),
        };
        let state = self.state.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            listener.on_delivery(ticket, outcome);
        });
        Ok(())
    }

    fn flush(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + '_>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            while self.in_flight() > 0 {
                if tokio::time::Instant::now() >= deadline {
                    return Err(PluginError::io(format!("{} messages in flight", self.in_flight())));
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(())
        })
    }

    fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }
}
