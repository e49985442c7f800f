//! # Transmit queue
//!
//! ## Purpose
//!
//! This module owns the transmit side of the datapath: producing descriptors
//! for outgoing packets and reclaiming the buffers of descriptors the device
//! has completed.
//!
//! ## How it works
//!
//! The queue pairs a descriptor ring with a parallel array of in-flight
//! buffer records. `enqueue` first runs an opportunistic reclaim, then maps
//! the payload, writes the descriptor and defers the doorbell while the
//! caller promises more work (descriptor aggregation). `reclaim` reads the
//! completion index the device published into the writeback area and releases
//! every newly completed slot back to its origin.
//!
//! The queue is shared between the host transmit context and the polling
//! context (redirect-originated transmissions and the reclaim sweep), so it
//! always sits behind a per-queue mutex; the poll-side sweep uses a try-lock
//! and skips on contention instead of blocking.
//!
//! ## Main components
//!
//! - `TxQueue`: ring, slot array, doorbell policy.
//! - `TxPayload`: tagged host-packet / retransmit-frame union.
//! - `RedirectFrame`: zero-copy frame over a receive pool page.
//! - `TransmitError`: backpressure vs. hard failure.

use crate::counters::Counters;
use crate::desc::{
    pack_tx_desc, unpack_wb_stat, TxDesc, TX_DESC_SIZE, WB_STAT_SIZE,
};
use crate::hw::{Hardware, TxQueueParams};
use crate::pool::{BufferPool, PageId};
use crate::ring::{Ring, Writeback};
use std::fmt;
use std::io;
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Minimum transmitted frame length; shorter host packets are zero-padded.
pub const MIN_FRAME_LEN: usize = 60;

/// A frame retransmitted out of the receive path, built directly over the
/// receive buffer page it arrived in. Holds its pool handle so the page and
/// its device mapping are released exactly once, on drop, whatever path the
/// frame takes.
pub struct RedirectFrame {
    pool: Arc<Mutex<BufferPool>>,
    hw: Arc<dyn Hardware>,
    page: PageId,
    map_base: u64,
    map_len: usize,
    dma_addr: u64,
    len: usize,
}

impl RedirectFrame {
    pub(crate) fn new(
        pool: Arc<Mutex<BufferPool>>,
        hw: Arc<dyn Hardware>,
        page: PageId,
        map_base: u64,
        map_len: usize,
        dma_addr: u64,
        len: usize,
    ) -> RedirectFrame {
        RedirectFrame {
            pool,
            hw,
            page,
            map_base,
            map_len,
            dma_addr,
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dma_addr(&self) -> u64 {
        self.dma_addr
    }
}

impl Drop for RedirectFrame {
    fn drop(&mut self) {
        self.hw.dma_unmap(self.map_base, self.map_len);
        crate::lock(&self.pool).recycle(self.page);
    }
}

impl fmt::Debug for RedirectFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedirectFrame")
            .field("page", &self.page)
            .field("len", &self.len)
            .finish()
    }
}

/// Tagged transmit payload. Reclaim matches exhaustively on the tag to
/// release each buffer to its origin.
#[derive(Debug)]
pub enum TxPayload {
    /// A packet handed down by the host stack.
    Packet(Vec<u8>),
    /// A retransmitted receive frame (zero-copy).
    Frame(RedirectFrame),
}

impl TxPayload {
    pub fn len(&self) -> usize {
        match self {
            TxPayload::Packet(p) => p.len(),
            TxPayload::Frame(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub enum TransmitError {
    /// Ring full. Flow control, not an error: the payload is handed back and
    /// the caller retries later.
    Busy(TxPayload),
    /// The payload could not be mapped for device access. It has been
    /// released and counted; the caller must not retry the same packet.
    Mapping,
    /// Queue id outside the configured range or queue not up.
    InvalidQueue(u16),
    /// The interface is closed.
    Down,
}

struct TxSlot {
    payload: TxPayload,
    dma_addr: u64,
    len: u32,
    enqueued_at: Instant,
}

pub struct TxQueue {
    qid: u16,
    vector: u16,
    ring: Ring,
    slots: Vec<Option<TxSlot>>,
    desc_base: u64,
    hw: Arc<dyn Hardware>,
    counters: Arc<Counters>,
}

impl TxQueue {
    pub(crate) fn new(
        qid: u16,
        depth: u16,
        vector: u16,
        hw: Arc<dyn Hardware>,
        counters: Arc<Counters>,
    ) -> io::Result<TxQueue> {
        let ring = Ring::new(
            depth,
            TX_DESC_SIZE,
            Writeback::Appended {
                stat_size: WB_STAT_SIZE,
            },
        )?;
        let desc_base = hw.dma_map(ring.base_ptr(), ring.size())?;
        let params = TxQueueParams {
            depth,
            desc_base,
            vector,
        };
        if let Err(e) = hw.init_tx_queue(qid, &params) {
            hw.dma_unmap(desc_base, ring.size());
            return Err(e);
        }
        let slots = (0..ring.usable_capacity()).map(|_| None).collect();
        Ok(TxQueue {
            qid,
            vector,
            ring,
            slots,
            desc_base,
            hw,
            counters,
        })
    }

    pub fn qid(&self) -> u16 {
        self.qid
    }

    /// The polling vector this queue is served by.
    pub fn vector(&self) -> u16 {
        self.vector
    }

    /// Descriptors enqueued and not yet reclaimed.
    pub fn outstanding(&self) -> u16 {
        self.ring.outstanding()
    }

    /// Enqueues one payload for transmission.
    ///
    /// Runs a reclaim pass first so completed slots free up before the
    /// fullness check. With `xmit_more` the doorbell is deferred, batching
    /// descriptor publication across a burst; the final enqueue of the burst
    /// (or a full ring) publishes the head.
    pub fn enqueue(&mut self, payload: TxPayload, xmit_more: bool) -> Result<(), TransmitError> {
        self.reclaim();

        if self.ring.is_full() {
            return Err(TransmitError::Busy(payload));
        }

        let payload = match payload {
            TxPayload::Packet(mut p) => {
                if p.len() < MIN_FRAME_LEN {
                    p.resize(MIN_FRAME_LEN, 0);
                }
                TxPayload::Packet(p)
            }
            frame => frame,
        };
        let len = payload.len();

        let dma_addr = match &payload {
            TxPayload::Packet(p) => match self.hw.dma_map(p.as_ptr(), len) {
                Ok(addr) => addr,
                Err(e) => {
                    log::warn!("tx queue {}: mapping failed: {}", self.qid, e);
                    self.counters.count_tx_mapping_failure();
                    return Err(TransmitError::Mapping);
                }
            },
            TxPayload::Frame(f) => {
                // The receive path established this mapping; only push CPU
                // writes out to the device.
                self.hw.dma_sync(f.dma_addr(), len);
                f.dma_addr()
            }
        };

        let index = self.ring.next_to_use;
        pack_tx_desc(
            self.ring.entry_mut(index),
            &TxDesc {
                metadata: len as u32,
                len: len as u32,
                src_addr: dma_addr,
            },
        );
        self.slots[index as usize] = Some(TxSlot {
            payload,
            dma_addr,
            len: len as u32,
            enqueued_at: Instant::now(),
        });

        self.counters.count_tx_packet(len as u64);
        self.ring.advance_head();

        if self.ring.is_full() || !xmit_more {
            // Descriptor contents must reach memory before the device sees
            // the new head.
            fence(Ordering::Release);
            self.hw.set_tx_head(self.qid, self.ring.next_to_use);
        }

        Ok(())
    }

    /// Publishes the current head unconditionally, flushing a doorbell that
    /// `enqueue` deferred under `xmit_more`.
    pub fn kick(&mut self) {
        fence(Ordering::Release);
        self.hw.set_tx_head(self.qid, self.ring.next_to_use);
    }

    /// Releases every slot the device has completed since the last pass,
    /// in ring order. No-op (and cheap) when the writeback index has not
    /// moved.
    pub fn reclaim(&mut self) -> usize {
        let wb = unpack_wb_stat(self.ring.writeback());
        if wb.cidx == self.ring.next_to_clean {
            return 0;
        }
        let usable = self.ring.usable_capacity();
        if wb.cidx >= usable {
            log::error!(
                "tx queue {}: writeback cidx {} out of range",
                self.qid,
                wb.cidx
            );
            return 0;
        }
        let work = (wb.cidx + usable - self.ring.next_to_clean) % usable;
        for _ in 0..work {
            let index = self.ring.next_to_clean as usize;
            match self.slots[index].take() {
                Some(slot) => {
                    log::trace!(
                        "tx queue {}: slot {} completed after {:?}",
                        self.qid,
                        index,
                        slot.enqueued_at.elapsed()
                    );
                    match slot.payload {
                        TxPayload::Packet(packet) => {
                            self.hw.dma_unmap(slot.dma_addr, slot.len as usize);
                            drop(packet);
                        }
                        // The frame's drop returns the page to its pool and
                        // undoes the receive-side mapping.
                        TxPayload::Frame(frame) => drop(frame),
                    }
                }
                None => {
                    log::error!("tx queue {}: completion for empty slot {}", self.qid, index);
                }
            }
            self.ring.advance_tail();
        }
        work as usize
    }

    /// Releases everything still in flight. The device-side queue must be
    /// disabled before this runs.
    pub(crate) fn teardown(&mut self) {
        for entry in self.slots.iter_mut() {
            if let Some(slot) = entry.take() {
                match slot.payload {
                    TxPayload::Packet(packet) => {
                        self.hw.dma_unmap(slot.dma_addr, slot.len as usize);
                        drop(packet);
                    }
                    TxPayload::Frame(frame) => drop(frame),
                }
            }
        }
        self.hw.dma_unmap(self.desc_base, self.ring.size());
    }
}
