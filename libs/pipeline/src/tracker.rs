use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;

use logpipe_api::{preview, DeliveryOutcome, PublishTicket, TicketId, TicketStatus};

/// Final (or current) delivery tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: u64,
    pub failed: u64,
    /// Tickets still pending when the drain window closed.
    pub timed_out: u64,
}

impl DrainReport {
    pub fn total(&self) -> u64 {
        self.delivered + self.failed + self.timed_out
    }
}

#[derive(Default)]
struct TrackerState {
    pending: HashMap<TicketId, PublishTicket>,
    tally: DrainReport,
}

impl TrackerState {
    /// Move every pending ticket out as failed, counting it as timed out.
    fn expire_pending(&mut self) -> Vec<PublishTicket> {
        let mut expired: Vec<PublishTicket> = self
            .pending
            .drain()
            .map(|(_, mut ticket)| {
                ticket.status = TicketStatus::Failed;
                ticket
            })
            .collect();
        expired.sort_by_key(|t| t.id);
        self.tally.timed_out += expired.len() as u64;
        expired
    }
}

/// Owns every in-flight `PublishTicket` from registration until its outcome.
///
/// The pending set is the only structure touched from both the submitting
/// task and the broker's delivery context; a single mutex guards it and no
/// lock is held across an await point.
#[derive(Default)]
pub struct DeliveryTracker {
    state: Mutex<TrackerState>,
    /// Signalled whenever the pending set becomes empty.
    settled: Notify,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, ticket: PublishTicket) {
        let mut state = self.lock();
        state.pending.insert(ticket.id, ticket);
    }

    /// Remove a ticket that never reached the broker client (QueueFull).
    /// Not counted in the tally.
    pub fn withdraw(&self, id: TicketId) -> Option<PublishTicket> {
        let mut state = self.lock();
        let ticket = state.pending.remove(&id);
        if ticket.is_some() && state.pending.is_empty() {
            self.settled.notify_waiters();
        }
        ticket
    }

    /// Record the outcome of a pending ticket.
    ///
    /// Only the first resolution counts: unknown, already resolved or
    /// expired ids return `None` and leave the tally untouched.
    pub fn resolve(&self, id: TicketId, outcome: &DeliveryOutcome) -> Option<PublishTicket> {
        let mut state = self.lock();
        let mut ticket = state.pending.remove(&id)?;
        if outcome.is_delivered() {
            ticket.status = TicketStatus::Acknowledged;
            state.tally.delivered += 1;
        } else {
            ticket.status = TicketStatus::Failed;
            state.tally.failed += 1;
        }
        if state.pending.is_empty() {
            self.settled.notify_waiters();
        }
        Some(ticket)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn tally(&self) -> DrainReport {
        self.lock().tally
    }

    /// Wait until nothing is pending or `timeout` elapses, then reclassify
    /// whatever is still pending as timed out and return the final tally.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a resolve in between is not missed.
            notified.as_mut().enable();
            if self.pending_count() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let mut state = self.lock();
        let expired = state.expire_pending();
        for ticket in &expired {
            tracing::error!(
                ticket = ticket.id,
                line = ticket.line_no,
                topic = %ticket.topic,
                waited_ms = ticket.submitted_at.elapsed().as_millis() as u64,
                payload = %preview(&ticket.payload),
                "ticket unresolved at drain timeout"
            );
        }
        state.tally
    }
}
