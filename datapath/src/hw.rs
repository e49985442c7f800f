//! # Register-programming collaborator
//!
//! The datapath never touches device registers directly; queue setup, index
//! publication (doorbells), interrupt latches and DMA address translation all
//! go through this trait. A production implementation programs the DMA engine
//! register file; tests drive the datapath with a simulated device.

use std::io;

/// Parameters for bringing up one transmit queue on the device.
#[derive(Debug, Clone, Copy)]
pub struct TxQueueParams {
    /// Descriptor ring capacity, writeback area excluded.
    pub depth: u16,
    /// DMA address of the descriptor ring memory.
    pub desc_base: u64,
    /// Interrupt vector serving this queue.
    pub vector: u16,
}

/// Parameters for bringing up one receive queue on the device.
#[derive(Debug, Clone, Copy)]
pub struct RxQueueParams {
    pub depth: u16,
    pub cmpl_depth: u16,
    /// Per-packet buffer size the device may write.
    pub buf_size: u32,
    pub desc_base: u64,
    pub cmpl_base: u64,
    pub vector: u16,
}

pub trait Hardware: Send + Sync {
    fn init_tx_queue(&self, qid: u16, params: &TxQueueParams) -> io::Result<()>;
    fn clear_tx_queue(&self, qid: u16);
    fn init_rx_queue(&self, qid: u16, params: &RxQueueParams) -> io::Result<()>;
    fn clear_rx_queue(&self, qid: u16);

    /// Publishes a new transmit descriptor head (doorbell). Descriptor
    /// contents must be made visible before this is called.
    fn set_tx_head(&self, qid: u16, index: u16);
    /// Publishes a new receive descriptor head after a refill.
    fn set_rx_head(&self, qid: u16, index: u16);
    /// Publishes the completion-ring consumer index; `rearm` re-enables the
    /// queue's interrupt.
    fn set_completion_tail(&self, qid: u16, index: u16, rearm: bool);
    /// Clears the device's latched error interrupt after an error-flagged
    /// completion entry.
    fn clear_error_interrupt(&self);

    /// Maps `len` bytes at `data` for device access, returning the
    /// device-visible address.
    fn dma_map(&self, data: *const u8, len: usize) -> io::Result<u64>;
    fn dma_unmap(&self, addr: u64, len: usize);
    /// Makes CPU writes in an existing mapping visible to the device.
    fn dma_sync(&self, addr: u64, len: usize);
}
