//! # Poll engine
//!
//! ## Purpose
//!
//! The budgeted, re-schedulable work loop driving both datapath directions:
//! transmit reclamation across every queue, then receive completion
//! consumption for one queue's polling context.
//!
//! ## How it works
//!
//! `Nic::poll` is the synchronous entry point the host's interrupt-mitigation
//! scheduler calls with a work budget; it reports how much receive work was
//! done and whether the context must be rescheduled because completions
//! remain. The reclaim sweep uses try-locks so a transmit path holding a
//! queue never blocks the polling context — that queue is simply skipped
//! until the next pass.
//!
//! `drive` is the cooperative async rendition of the same contract: one task
//! per receive queue parks on its interrupt line, then polls in
//! budget-bounded passes with a yield between them until the queue reports
//! idle, and exits promptly on cancellation so teardown never races a poll.

use crate::nic::Nic;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Default per-pass work budget, matching the classic interrupt-mitigation
/// weight.
pub const DEFAULT_POLL_BUDGET: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResult {
    /// Receive completions consumed this pass.
    pub work: u32,
    /// More completions remain; the caller must schedule another pass.
    pub reschedule: bool,
}

impl Nic {
    /// Runs one polling pass for the given receive queue's context: reclaims
    /// completed transmissions on every transmit queue, then consumes at most
    /// `budget` receive completions.
    pub fn poll(&self, qid: u16, budget: u32) -> PollResult {
        let st = crate::read(&self.state);

        for slot in st.tx.iter() {
            if let Some(mutex) = slot.queue.as_ref() {
                // Skip, never block: the transmit path may hold the queue.
                if let Some(mut queue) = crate::try_lock(mutex) {
                    queue.reclaim();
                }
            }
        }

        let Some(mutex) = st.rx_queue(qid) else {
            return PollResult {
                work: 0,
                reschedule: false,
            };
        };
        let tx_companion = st.tx_queue(qid);
        let result = crate::lock(mutex).poll(
            budget,
            tx_companion,
            self.stack.as_ref(),
            self.redirect.as_deref(),
        );
        PollResult {
            work: result.work,
            reschedule: result.rescheduled,
        }
    }

    /// Polls every receive queue once with the same budget. Convenience for
    /// single-context hosts; reports the summed work and whether any queue
    /// wants another pass.
    pub fn poll_all(&self, budget: u32) -> PollResult {
        let mut total = PollResult {
            work: 0,
            reschedule: false,
        };
        for qid in 0..self.config.rx_queues {
            let r = self.poll(qid, budget);
            total.work += r.work;
            total.reschedule |= r.reschedule;
        }
        total
    }
}

/// Drives one receive queue's polling context until cancelled.
///
/// `irq` stands in for the queue's interrupt line: the device implementation
/// notifies it when new completions land (the completion-tail publish re-arms
/// it). Between budget-bounded passes the task yields instead of hogging the
/// executor, which is the cooperative equivalent of rescheduling the polling
/// context.
pub async fn drive(nic: Arc<Nic>, qid: u16, irq: Arc<Notify>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = irq.notified() => {}
        }
        loop {
            let result = nic.poll(qid, DEFAULT_POLL_BUDGET);
            if !result.reschedule || shutdown.is_cancelled() {
                break;
            }
            tokio::task::yield_now().await;
        }
    }
}
