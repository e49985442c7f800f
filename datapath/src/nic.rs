//! # Interface surface
//!
//! ## Purpose
//!
//! The top-level object tying the datapath together: queue set construction
//! and teardown, the host-facing transmit entry point, fast-path program
//! attachment, and counter exposure.
//!
//! ## How it works
//!
//! Queues live in size-checked tables keyed by queue id, each entry carrying
//! an explicit lifecycle state. The tables sit behind an `RwLock`: transmit
//! and poll take the read side (per-queue mutexes serialize actual queue
//! access), while `open`/`close` take the write side — so teardown can never
//! free memory under a poll in flight. `open` is atomic: any queue that fails
//! to come up rolls back every queue this call already brought up, leaving
//! the interface fully closed.
//!
//! ## Main components
//!
//! - `Nic`: the interface object and its collaborators.
//! - `NicConfig`: queue counts, ring depths, buffer sizing.
//! - `QueueState`: per-queue lifecycle.

use crate::counters::{CounterSnapshot, Counters};
use crate::filter::{FilterProgram, DEFAULT_HEADROOM};
use crate::hw::Hardware;
use crate::rx::RxQueue;
use crate::stack::{HostStack, RedirectTarget};
use crate::tx::{TransmitError, TxPayload, TxQueue};
use std::io;
use std::sync::{Arc, Mutex, RwLock};

pub const MAX_QUEUES: u16 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NicConfig {
    pub tx_queues: u16,
    pub rx_queues: u16,
    /// Interrupt vectors; queues are assigned round-robin.
    pub vectors: u16,
    pub tx_ring_depth: u16,
    pub rx_ring_depth: u16,
    pub cmpl_ring_depth: u16,
    /// Per-packet receive buffer size (headroom included).
    pub buf_size: usize,
    pub mtu: usize,
}

impl Default for NicConfig {
    fn default() -> Self {
        NicConfig {
            tx_queues: 1,
            rx_queues: 1,
            vectors: 1,
            tx_ring_depth: 1024,
            rx_ring_depth: 1024,
            cmpl_ring_depth: 1024,
            buf_size: 4096,
            mtu: 1514,
        }
    }
}

impl NicConfig {
    fn validate(&self) -> io::Result<()> {
        if self.tx_queues == 0 || self.rx_queues == 0 || self.vectors == 0 {
            return Err(io::Error::other("queue and vector counts must be nonzero"));
        }
        if self.tx_queues > MAX_QUEUES || self.rx_queues > MAX_QUEUES {
            return Err(io::Error::other(format!(
                "at most {} queues per direction",
                MAX_QUEUES
            )));
        }
        if self.tx_ring_depth < 2 || self.rx_ring_depth < 2 || self.cmpl_ring_depth < 2 {
            return Err(io::Error::other("ring depths must be at least 2"));
        }
        if self.buf_size == 0 || self.mtu == 0 {
            return Err(io::Error::other("buffer size and MTU must be nonzero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Down,
    Initializing,
    Up,
    TearingDown,
}

pub(crate) struct QueueSlot<T> {
    pub(crate) state: QueueState,
    pub(crate) queue: Option<T>,
}

impl<T> QueueSlot<T> {
    fn down() -> QueueSlot<T> {
        QueueSlot {
            state: QueueState::Down,
            queue: None,
        }
    }
}

pub(crate) struct NicState {
    pub(crate) running: bool,
    pub(crate) program: Option<Arc<dyn FilterProgram>>,
    pub(crate) tx: Vec<QueueSlot<Mutex<TxQueue>>>,
    pub(crate) rx: Vec<QueueSlot<Mutex<RxQueue>>>,
}

impl NicState {
    pub(crate) fn tx_queue(&self, qid: u16) -> Option<&Mutex<TxQueue>> {
        self.tx
            .get(qid as usize)
            .filter(|slot| slot.state == QueueState::Up)
            .and_then(|slot| slot.queue.as_ref())
    }

    pub(crate) fn rx_queue(&self, qid: u16) -> Option<&Mutex<RxQueue>> {
        self.rx
            .get(qid as usize)
            .filter(|slot| slot.state == QueueState::Up)
            .and_then(|slot| slot.queue.as_ref())
    }
}

pub struct Nic {
    pub(crate) hw: Arc<dyn Hardware>,
    pub(crate) stack: Arc<dyn HostStack>,
    pub(crate) redirect: Option<Arc<dyn RedirectTarget>>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) config: NicConfig,
    pub(crate) state: RwLock<NicState>,
}

impl Nic {
    pub fn new(
        hw: Arc<dyn Hardware>,
        stack: Arc<dyn HostStack>,
        redirect: Option<Arc<dyn RedirectTarget>>,
        config: NicConfig,
    ) -> io::Result<Nic> {
        config.validate()?;
        let state = NicState {
            running: false,
            program: None,
            tx: (0..config.tx_queues).map(|_| QueueSlot::down()).collect(),
            rx: (0..config.rx_queues).map(|_| QueueSlot::down()).collect(),
        };
        Ok(Nic {
            hw,
            stack,
            redirect,
            counters: Arc::new(Counters::default()),
            config,
            state: RwLock::new(state),
        })
    }

    pub fn is_running(&self) -> bool {
        crate::read(&self.state).running
    }

    pub fn queue_state(&self, qid: u16) -> (QueueState, QueueState) {
        let st = crate::read(&self.state);
        (
            st.tx
                .get(qid as usize)
                .map_or(QueueState::Down, |slot| slot.state),
            st.rx
                .get(qid as usize)
                .map_or(QueueState::Down, |slot| slot.state),
        )
    }

    /// Brings the whole queue set up. Atomic: on any failure every queue this
    /// call created is torn down again and the error is propagated — the
    /// interface is never left half-open.
    pub fn open(&self) -> io::Result<()> {
        let mut st = crate::write(&self.state);
        if st.running {
            return Err(io::Error::other("interface already open"));
        }
        let headroom = st
            .program
            .as_ref()
            .map_or(DEFAULT_HEADROOM, |p| p.required_headroom());
        if self.config.mtu + headroom > self.config.buf_size {
            return Err(io::Error::other(format!(
                "MTU {} plus headroom {} exceeds {}-byte buffers",
                self.config.mtu, headroom, self.config.buf_size
            )));
        }

        for qid in 0..self.config.tx_queues {
            if let Err(e) = self.init_tx_queue(&mut st, qid) {
                log::error!("tx queue {} failed to come up: {}", qid, e);
                self.teardown_queues(&mut st);
                return Err(io::Error::other(format!(
                    "Failed to open tx queue {}: {}",
                    qid, e
                )));
            }
        }
        for qid in 0..self.config.rx_queues {
            if let Err(e) = self.init_rx_queue(&mut st, qid, headroom) {
                log::error!("rx queue {} failed to come up: {}", qid, e);
                self.teardown_queues(&mut st);
                return Err(io::Error::other(format!(
                    "Failed to open rx queue {}: {}",
                    qid, e
                )));
            }
        }
        st.running = true;
        Ok(())
    }

    /// Tears the whole queue set down, releasing every in-flight buffer.
    pub fn close(&self) {
        let mut st = crate::write(&self.state);
        // Stop accepting transmissions before any queue goes away.
        st.running = false;
        self.teardown_queues(&mut st);
    }

    fn init_tx_queue(&self, st: &mut NicState, qid: u16) -> io::Result<()> {
        if st.tx[qid as usize].queue.is_some() {
            log::debug!("re-initializing live tx queue {}", qid);
            self.clear_tx_queue(st, qid);
        }
        st.tx[qid as usize].state = QueueState::Initializing;
        let vector = qid % self.config.vectors;
        match TxQueue::new(
            qid,
            self.config.tx_ring_depth,
            vector,
            self.hw.clone(),
            self.counters.clone(),
        ) {
            Ok(queue) => {
                st.tx[qid as usize] = QueueSlot {
                    state: QueueState::Up,
                    queue: Some(Mutex::new(queue)),
                };
                Ok(())
            }
            Err(e) => {
                st.tx[qid as usize].state = QueueState::Down;
                Err(e)
            }
        }
    }

    fn init_rx_queue(&self, st: &mut NicState, qid: u16, headroom: usize) -> io::Result<()> {
        if st.rx[qid as usize].queue.is_some() {
            log::debug!("re-initializing live rx queue {}", qid);
            self.clear_rx_queue(st, qid);
        }
        st.rx[qid as usize].state = QueueState::Initializing;
        let vector = qid % self.config.vectors;
        match RxQueue::new(
            qid,
            self.config.rx_ring_depth,
            self.config.cmpl_ring_depth,
            self.config.buf_size,
            headroom,
            vector,
            st.program.clone(),
            self.hw.clone(),
            self.counters.clone(),
        ) {
            Ok(queue) => {
                st.rx[qid as usize] = QueueSlot {
                    state: QueueState::Up,
                    queue: Some(Mutex::new(queue)),
                };
                Ok(())
            }
            Err(e) => {
                self.hw.clear_rx_queue(qid);
                st.rx[qid as usize].state = QueueState::Down;
                Err(e)
            }
        }
    }

    fn clear_tx_queue(&self, st: &mut NicState, qid: u16) {
        if let Some(mutex) = st.tx[qid as usize].queue.take() {
            st.tx[qid as usize].state = QueueState::TearingDown;
            // Device side first, buffers second; the reverse could let the
            // device touch freed memory.
            self.hw.clear_tx_queue(qid);
            let mut queue = mutex.into_inner().unwrap_or_else(|p| p.into_inner());
            queue.teardown();
            st.tx[qid as usize].state = QueueState::Down;
        }
    }

    fn clear_rx_queue(&self, st: &mut NicState, qid: u16) {
        if let Some(mutex) = st.rx[qid as usize].queue.take() {
            st.rx[qid as usize].state = QueueState::TearingDown;
            self.hw.clear_rx_queue(qid);
            let mut queue = mutex.into_inner().unwrap_or_else(|p| p.into_inner());
            queue.teardown();
            st.rx[qid as usize].state = QueueState::Down;
        }
    }

    fn teardown_queues(&self, st: &mut NicState) {
        for qid in (0..self.config.tx_queues).rev() {
            self.clear_tx_queue(st, qid);
        }
        for qid in (0..self.config.rx_queues).rev() {
            self.clear_rx_queue(st, qid);
        }
    }

    /// Submits one packet from the host stack. `Busy` is backpressure (the
    /// packet comes back for a later retry); `Mapping` is a hard per-packet
    /// failure that must not be retried.
    pub fn transmit(&self, packet: Vec<u8>, qid: u16) -> Result<(), TransmitError> {
        self.transmit_more(packet, qid, false)
    }

    /// Like `transmit`, with a hint that more packets follow immediately, so
    /// the doorbell may be deferred and descriptors aggregated.
    pub fn transmit_more(
        &self,
        packet: Vec<u8>,
        qid: u16,
        xmit_more: bool,
    ) -> Result<(), TransmitError> {
        let st = crate::read(&self.state);
        if !st.running {
            return Err(TransmitError::Down);
        }
        let Some(mutex) = st.tx_queue(qid) else {
            return Err(TransmitError::InvalidQueue(qid));
        };
        crate::lock(mutex).enqueue(TxPayload::Packet(packet), xmit_more)
    }

    /// Submits a burst, deferring the doorbell until the last packet.
    /// Returns the number submitted; stops at the first failure.
    pub fn transmit_batch(
        &self,
        packets: Vec<Vec<u8>>,
        qid: u16,
    ) -> Result<usize, TransmitError> {
        let total = packets.len();
        for (i, packet) in packets.into_iter().enumerate() {
            let more = i + 1 < total;
            if let Err(e) = self.transmit_more(packet, qid, more) {
                if i > 0 {
                    // Packets already queued under a deferred doorbell must
                    // still be published.
                    let st = crate::read(&self.state);
                    if let Some(mutex) = st.tx_queue(qid) {
                        crate::lock(mutex).kick();
                    }
                }
                return if i == 0 { Err(e) } else { Ok(i) };
            }
        }
        Ok(total)
    }

    /// Attaches (or detaches) the fast-path program. A running interface is
    /// rebuilt — close then open — so every receive queue honors the new
    /// program's buffer requirements.
    pub fn set_program(&self, program: Option<Arc<dyn FilterProgram>>) -> io::Result<()> {
        if let Some(p) = &program {
            if self.config.mtu + p.required_headroom() > self.config.buf_size {
                return Err(io::Error::other(format!(
                    "MTU {} incompatible with program headroom {}",
                    self.config.mtu,
                    p.required_headroom()
                )));
            }
        }
        let running = self.is_running();
        if running {
            self.close();
        }
        crate::write(&self.state).program = program;
        if running {
            self.open()?;
        }
        Ok(())
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

impl Drop for Nic {
    fn drop(&mut self) {
        let mut st = crate::write(&self.state);
        if st.running
            || st.tx.iter().any(|s| s.queue.is_some())
            || st.rx.iter().any(|s| s.queue.is_some())
        {
            st.running = false;
            self.teardown_queues(&mut st);
        }
    }
}
