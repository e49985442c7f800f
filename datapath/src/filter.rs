//! # Fast-path packet filter
//!
//! ## Purpose
//!
//! The dispatch contract around the externally supplied per-packet filter
//! program: every received packet is shown to the program (when one is
//! attached) before host-stack delivery, and the program's verdict decides
//! the buffer disposition.
//!
//! ## How it works
//!
//! The program itself is opaque — a `FilterProgram` trait object running over
//! a `PacketView` built directly on the receive buffer page (headroom,
//! payload, tailroom). The verdict space is the closed `Verdict` enum; raw
//! program actions outside the known range collapse to `Drop`, never to an
//! error. With no program attached the dispatch behaves as the identity
//! program returning `Pass`.

/// Headroom reserved in front of the packet data in every receive buffer,
/// available to programs that grow headers.
pub const DEFAULT_HEADROOM: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver to the host stack.
    Pass,
    /// Discard silently.
    Drop,
    /// Transmit back out of the queue the packet arrived on.
    RetransmitOut,
    /// Hand off to the external redirect target.
    Redirect,
}

impl Verdict {
    /// Maps a raw program action code to a verdict. Anything outside the four
    /// known actions is treated as `Drop` — the fail-safe default.
    pub fn from_raw(action: u32) -> Verdict {
        match action {
            2 => Verdict::Pass,
            1 => Verdict::Drop,
            3 => Verdict::RetransmitOut,
            4 => Verdict::Redirect,
            _ => Verdict::Drop,
        }
    }
}

/// A mutable window over one receive buffer page: `headroom` bytes in front
/// of the packet, `len` bytes of packet data, the rest tailroom.
pub struct PacketView<'a> {
    buf: &'a mut [u8],
    headroom: usize,
    len: usize,
}

impl<'a> PacketView<'a> {
    pub fn new(buf: &'a mut [u8], headroom: usize, len: usize) -> PacketView<'a> {
        debug_assert!(headroom + len <= buf.len());
        PacketView { buf, headroom, len }
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.headroom..self.headroom + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.headroom..self.headroom + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn headroom(&self) -> usize {
        self.headroom
    }

    /// Full buffer size, headroom and tailroom included.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// An externally supplied per-packet classifier.
pub trait FilterProgram: Send + Sync {
    fn run(&self, packet: &mut PacketView<'_>) -> Verdict;

    /// Headroom this program needs in front of packet data; receive queues
    /// are built to honor it.
    fn required_headroom(&self) -> usize {
        DEFAULT_HEADROOM
    }
}
