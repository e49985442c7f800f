//! # Receive queue
//!
//! ## Purpose
//!
//! The receive side of the datapath: consuming device-written completion
//! entries, classifying each packet through the fast-path filter, disposing
//! of the buffer according to the verdict, and keeping the descriptor ring
//! replenished.
//!
//! ## How it works
//!
//! A receive queue pairs a descriptor ring (slots armed with buffer-pool
//! pages the device fills) with a completion ring (entries the device writes
//! as packets land). `poll` consumes completions up to the hardware-published
//! producer index, bounded by a work budget; when the budget runs out
//! mid-batch nothing is published and the caller reschedules, and when the
//! consumer genuinely catches up the completion tail is published together
//! with an interrupt re-arm. Consumed descriptor slots are re-armed in
//! fixed-size batches once the armed backlog falls under the watermark.

use crate::counters::Counters;
use crate::desc::{
    pack_rx_desc, unpack_cmpl_stat, unpack_rx_cmpl, RxDesc, CMPL_STAT_SIZE, RX_CMPL_SIZE,
    RX_DESC_SIZE, WB_STAT_SIZE,
};
use crate::filter::{FilterProgram, PacketView, Verdict};
use crate::hw::{Hardware, RxQueueParams};
use crate::pool::{BufferPool, PageId};
use crate::ring::{Ring, Writeback};
use crate::stack::{HostStack, RedirectTarget};
use crate::tx::{RedirectFrame, TransmitError, TxPayload, TxQueue};
use std::io;
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Mutex};

/// Granularity of descriptor-ring replenishment: the head is republished in
/// batches of this many freshly armed slots, never one at a time.
pub const RX_REFILL_STEP: u16 = 256;

static_assertions::const_assert!(RX_REFILL_STEP.is_power_of_two());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxPollResult {
    pub work: u32,
    /// More completions remain; the polling context must run again.
    pub rescheduled: bool,
}

struct RxSlot {
    page: PageId,
    offset: usize,
    dma_addr: u64,
}

pub struct RxQueue {
    qid: u16,
    vector: u16,
    desc_ring: Ring,
    cmpl_ring: Ring,
    pool: Arc<Mutex<BufferPool>>,
    slots: Vec<Option<RxSlot>>,
    program: Option<Arc<dyn FilterProgram>>,
    headroom: usize,
    buf_size: usize,
    desc_base: u64,
    cmpl_base: u64,
    hw: Arc<dyn Hardware>,
    counters: Arc<Counters>,
}

impl RxQueue {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        qid: u16,
        depth: u16,
        cmpl_depth: u16,
        buf_size: usize,
        headroom: usize,
        vector: u16,
        program: Option<Arc<dyn FilterProgram>>,
        hw: Arc<dyn Hardware>,
        counters: Arc<Counters>,
    ) -> io::Result<RxQueue> {
        if headroom >= buf_size {
            return Err(io::Error::other(format!(
                "headroom {} leaves no room in {}-byte buffers",
                headroom, buf_size
            )));
        }
        let desc_ring = Ring::new(
            depth,
            RX_DESC_SIZE,
            Writeback::Colocated {
                stat_size: WB_STAT_SIZE,
            },
        )?;
        let mut cmpl_ring = Ring::new(
            cmpl_depth,
            RX_CMPL_SIZE,
            Writeback::Colocated {
                stat_size: CMPL_STAT_SIZE,
            },
        )?;
        /* Completion entries and the completion ring start with colors 0 and
         * 1 respectively. The device writes entries with color 1, matching
         * the ring, so a zeroed (never-written) entry can always be told
         * apart from a filled one. Each time the producer index wraps the
         * device flips the color it writes, and the ring flips its expected
         * color when the consumer index wraps, keeping both sides in step. */
        cmpl_ring.color = 1;

        let pool = Arc::new(Mutex::new(BufferPool::new(depth, buf_size)?));

        let desc_base = hw.dma_map(desc_ring.base_ptr(), desc_ring.size())?;
        let cmpl_base = match hw.dma_map(cmpl_ring.base_ptr(), cmpl_ring.size()) {
            Ok(addr) => addr,
            Err(e) => {
                hw.dma_unmap(desc_base, desc_ring.size());
                return Err(e);
            }
        };
        let params = RxQueueParams {
            depth,
            cmpl_depth,
            buf_size: buf_size as u32,
            desc_base,
            cmpl_base,
            vector,
        };
        if let Err(e) = hw.init_rx_queue(qid, &params) {
            hw.dma_unmap(desc_base, desc_ring.size());
            hw.dma_unmap(cmpl_base, cmpl_ring.size());
            return Err(e);
        }

        let slots = (0..desc_ring.usable_capacity()).map(|_| None).collect();
        let mut q = RxQueue {
            qid,
            vector,
            desc_ring,
            cmpl_ring,
            pool,
            slots,
            program,
            headroom,
            buf_size,
            desc_base,
            cmpl_base,
            hw,
            counters,
        };

        // Arm an initial batch of descriptors and let the device run.
        let initial = RX_REFILL_STEP.min(q.desc_ring.usable_capacity() - 1);
        for _ in 0..initial {
            if let Err(e) = q.arm_slot() {
                q.release_all_slots();
                q.hw.dma_unmap(q.desc_base, q.desc_ring.size());
                q.hw.dma_unmap(q.cmpl_base, q.cmpl_ring.size());
                return Err(e);
            }
        }
        fence(Ordering::Release);
        q.hw.set_rx_head(qid, q.desc_ring.next_to_use);
        q.hw.set_completion_tail(qid, 0, true);
        Ok(q)
    }

    pub fn qid(&self) -> u16 {
        self.qid
    }

    /// The polling vector this queue's context runs on.
    pub fn vector(&self) -> u16 {
        self.vector
    }

    /// Consumes device completions, at most `budget` of them.
    pub fn poll(
        &mut self,
        budget: u32,
        tx: Option<&Mutex<TxQueue>>,
        stack: &dyn HostStack,
        redirect: Option<&dyn RedirectTarget>,
    ) -> RxPollResult {
        let mut work = 0u32;
        let stat = unpack_cmpl_stat(self.cmpl_ring.writeback());
        log::trace!(
            "rx queue {}: poll pidx {} color {} next_to_clean {}",
            self.qid,
            stat.pidx,
            stat.color,
            self.cmpl_ring.next_to_clean
        );
        if stat.pidx >= self.cmpl_ring.usable_capacity() {
            log::error!("rx queue {}: status pidx {} out of range", self.qid, stat.pidx);
            return RxPollResult {
                work: 0,
                rescheduled: false,
            };
        }

        while self.cmpl_ring.next_to_clean != stat.pidx {
            if work >= budget {
                // Out of budget mid-batch: publish nothing, resume (not
                // restart) on the next poll.
                return RxPollResult {
                    work,
                    rescheduled: true,
                };
            }

            let cidx = self.cmpl_ring.next_to_clean;
            let cmpl = unpack_rx_cmpl(self.cmpl_ring.entry(cidx));
            if cmpl.color != self.cmpl_ring.color {
                log::debug!(
                    "rx queue {}: completion color {} disagrees with expected {}",
                    self.qid,
                    cmpl.color,
                    self.cmpl_ring.color
                );
            }

            let len = cmpl.pkt_len as usize;
            let dindex = self.desc_ring.next_to_clean as usize;
            match self.slots[dindex].take() {
                Some(slot) => {
                    self.counters.count_rx_packet(len as u64);
                    if cmpl.err {
                        log::warn!(
                            "rx queue {}: completion error on packet {}",
                            self.qid,
                            cmpl.pkt_id
                        );
                        self.hw.clear_error_interrupt();
                        // Consumed and disposed; one bad entry does not abort
                        // the batch.
                        self.release_slot(&slot);
                    } else {
                        self.dispatch(slot, len, tx, stack, redirect);
                    }
                }
                None => {
                    log::error!(
                        "rx queue {}: completion for unarmed slot {}",
                        self.qid,
                        dindex
                    );
                }
            }

            self.desc_ring.advance_tail();
            if self.below_watermark() {
                log::debug!(
                    "rx queue {}: watermark, head {} tail {}",
                    self.qid,
                    self.desc_ring.next_to_use,
                    self.desc_ring.next_to_clean
                );
                self.refill();
            }

            if self.cmpl_ring.advance_tail() {
                self.cmpl_ring.color ^= 1;
            }
            work += 1;
        }

        // Genuinely idle: the consumer caught the producer (the wrap to index
        // zero lands here as well). Publish the tail and re-arm the interrupt.
        self.hw
            .set_completion_tail(self.qid, self.cmpl_ring.next_to_clean, true);
        RxPollResult {
            work,
            rescheduled: false,
        }
    }

    fn dispatch(
        &mut self,
        slot: RxSlot,
        len: usize,
        tx: Option<&Mutex<TxQueue>>,
        stack: &dyn HostStack,
        redirect: Option<&dyn RedirectTarget>,
    ) {
        let verdict;
        let mut passed: Option<Vec<u8>> = None;
        {
            let mut pool = crate::lock(&self.pool);
            let buf = pool.page_mut(slot.page);
            let mut view = PacketView::new(buf, slot.offset, len);
            verdict = match &self.program {
                Some(program) => program.run(&mut view),
                None => Verdict::Pass,
            };
            if verdict == Verdict::Pass {
                passed = Some(view.data().to_vec());
            }
        }

        match verdict {
            Verdict::Pass => {
                self.release_slot(&slot);
                self.counters.count_pass();
                stack.deliver(self.qid, passed.unwrap_or_default());
            }
            Verdict::Drop => {
                self.counters.count_drop();
                self.release_slot(&slot);
            }
            Verdict::RetransmitOut => self.retransmit(slot, len, tx),
            Verdict::Redirect => {
                self.counters.count_redirect();
                crate::lock(&self.pool).lend_to_redirect(slot.page);
                if let Some(target) = redirect {
                    let pool = crate::lock(&self.pool);
                    let page = pool.page(slot.page);
                    target.redirect(self.qid, &page[slot.offset..slot.offset + len]);
                }
                self.release_slot(&slot);
            }
        }
    }

    /// Builds a zero-copy outbound frame over the received page and enqueues
    /// it on the transmit queue with the same id. Any failure degrades to a
    /// counted drop; the frame's own release path returns the page.
    fn retransmit(&mut self, slot: RxSlot, len: usize, tx: Option<&Mutex<TxQueue>>) {
        let Some(txq) = tx else {
            log::debug!("rx queue {}: no transmit queue for retransmit", self.qid);
            self.counters.count_retransmit_drop();
            self.release_slot(&slot);
            return;
        };
        crate::lock(&self.pool).lend_to_redirect(slot.page);
        let frame = RedirectFrame::new(
            self.pool.clone(),
            self.hw.clone(),
            slot.page,
            slot.dma_addr,
            self.buf_size,
            slot.dma_addr + slot.offset as u64,
            len,
        );
        // Redirect transmissions and host-context submissions target the same
        // queue from different execution contexts; the per-queue lock
        // serializes them.
        let mut guard = crate::lock(txq);
        match guard.enqueue(TxPayload::Frame(frame), false) {
            Ok(()) => self.counters.count_retransmit(),
            Err(e) => {
                if let TransmitError::Busy(_) = e {
                    log::debug!("rx queue {}: retransmit ring full", self.qid);
                }
                self.counters.count_retransmit_drop();
            }
        }
    }

    fn release_slot(&self, slot: &RxSlot) {
        self.hw.dma_unmap(slot.dma_addr, self.buf_size);
        crate::lock(&self.pool).recycle(slot.page);
    }

    fn below_watermark(&self) -> bool {
        self.desc_ring.outstanding() < RX_REFILL_STEP / 2
    }

    /// Re-arms up to one refill step of consumed descriptor slots and
    /// publishes the new head. Skipped under pool pressure — resource
    /// exhaustion degrades a cycle, it never fails the poll.
    fn refill(&mut self) {
        let usable = self.desc_ring.usable_capacity();
        let free_slots = usable - 1 - self.desc_ring.outstanding();
        let step = RX_REFILL_STEP.min(free_slots);
        if step == 0 {
            return;
        }
        if crate::lock(&self.pool).free_count() < step as usize {
            log::debug!("rx queue {}: pool pressure, refill skipped", self.qid);
            return;
        }
        let mut armed = 0;
        for _ in 0..step {
            match self.arm_slot() {
                Ok(()) => armed += 1,
                Err(e) => {
                    log::warn!("rx queue {}: refill stopped: {}", self.qid, e);
                    break;
                }
            }
        }
        if armed > 0 {
            fence(Ordering::Release);
            self.hw.set_rx_head(self.qid, self.desc_ring.next_to_use);
        }
    }

    fn arm_slot(&mut self) -> io::Result<()> {
        let (page, ptr) = {
            let mut pool = crate::lock(&self.pool);
            let page = pool
                .acquire()
                .ok_or_else(|| io::Error::other("buffer pool exhausted"))?;
            (page, pool.page_ptr(page))
        };
        let dma_addr = match self.hw.dma_map(ptr, self.buf_size) {
            Ok(addr) => addr,
            Err(e) => {
                crate::lock(&self.pool).recycle(page);
                return Err(e);
            }
        };
        let index = self.desc_ring.next_to_use;
        if let Some(old) = self.slots[index as usize].take() {
            log::error!("rx queue {}: arming occupied slot {}", self.qid, index);
            self.hw.dma_unmap(old.dma_addr, self.buf_size);
            crate::lock(&self.pool).recycle(old.page);
        }
        pack_rx_desc(
            self.desc_ring.entry_mut(index),
            &RxDesc {
                dst_addr: dma_addr + self.headroom as u64,
            },
        );
        self.slots[index as usize] = Some(RxSlot {
            page,
            offset: self.headroom,
            dma_addr,
        });
        self.desc_ring.advance_head();
        Ok(())
    }

    fn release_all_slots(&mut self) {
        for entry in self.slots.iter_mut() {
            if let Some(slot) = entry.take() {
                self.hw.dma_unmap(slot.dma_addr, self.buf_size);
                crate::lock(&self.pool).recycle(slot.page);
            }
        }
    }

    /// Releases all armed buffers and ring memory. The device-side queue and
    /// the polling context must already be stopped.
    pub(crate) fn teardown(&mut self) {
        self.release_all_slots();
        self.hw.dma_unmap(self.desc_base, self.desc_ring.size());
        self.hw.dma_unmap(self.cmpl_base, self.cmpl_ring.size());
        let lent = crate::lock(&self.pool).lent_count();
        if lent != 0 {
            log::warn!("rx queue {}: {} pages still lent at teardown", self.qid, lent);
        }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Arc<Mutex<BufferPool>> {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn armed(&self) -> u16 {
        self.desc_ring.outstanding()
    }

    #[cfg(test)]
    pub(crate) fn expected_color(&self) -> u8 {
        self.cmpl_ring.color
    }
}
