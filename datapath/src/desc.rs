//! # Hardware record layouts
//!
//! ## Purpose
//!
//! Pack and unpack functions for the fixed-size records shared with the
//! device: the transmit descriptor, the transmit writeback status, the receive
//! descriptor, the receive completion entry, and the completion ring status.
//!
//! ## How it works
//!
//! Device-shared memory is never aliased as native structs; every record is
//! read and written field-by-field over a byte range at explicit little-endian
//! offsets, so alignment and endianness never depend on the compiler.

use static_assertions::const_assert;

/// Transmit descriptor: metadata u32 @0, len u32 @4, src_addr u64 @8.
pub const TX_DESC_SIZE: usize = 16;
/// Writeback status: pidx u16 @0, cidx u16 @2, reserved @4.
pub const WB_STAT_SIZE: usize = 8;
/// Receive descriptor: dst_addr u64 @0.
pub const RX_DESC_SIZE: usize = 8;
/// Receive completion: flags u8 @0 (bit0 color, bit1 error), pkt_len u16 @2,
/// pkt_id u16 @4.
pub const RX_CMPL_SIZE: usize = 8;
/// Completion status: pidx u16 @0, cidx u16 @2, flags u8 @4 (bit0 color,
/// bits1-2 intr_state).
pub const CMPL_STAT_SIZE: usize = 8;

const_assert!(RX_CMPL_SIZE == CMPL_STAT_SIZE);
const_assert!(TX_DESC_SIZE >= RX_DESC_SIZE);

const CMPL_COLOR_BIT: u8 = 0x01;
const CMPL_ERR_BIT: u8 = 0x02;
const STAT_COLOR_BIT: u8 = 0x01;
const STAT_INTR_SHIFT: u8 = 1;
const STAT_INTR_MASK: u8 = 0x03;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDesc {
    pub metadata: u32,
    pub len: u32,
    pub src_addr: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WbStat {
    pub pidx: u16,
    pub cidx: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDesc {
    pub dst_addr: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxCmpl {
    pub color: u8,
    pub err: bool,
    pub pkt_len: u16,
    pub pkt_id: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmplStat {
    pub pidx: u16,
    pub cidx: u16,
    pub color: u8,
    pub intr_state: u8,
}

pub fn pack_tx_desc(buf: &mut [u8], desc: &TxDesc) {
    debug_assert!(buf.len() >= TX_DESC_SIZE);
    buf[0..4].copy_from_slice(&desc.metadata.to_le_bytes());
    buf[4..8].copy_from_slice(&desc.len.to_le_bytes());
    buf[8..16].copy_from_slice(&desc.src_addr.to_le_bytes());
}

pub fn unpack_tx_desc(buf: &[u8]) -> TxDesc {
    debug_assert!(buf.len() >= TX_DESC_SIZE);
    TxDesc {
        metadata: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
        len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        src_addr: u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]),
    }
}

pub fn pack_wb_stat(buf: &mut [u8], wb: &WbStat) {
    debug_assert!(buf.len() >= WB_STAT_SIZE);
    buf[0..2].copy_from_slice(&wb.pidx.to_le_bytes());
    buf[2..4].copy_from_slice(&wb.cidx.to_le_bytes());
    buf[4..8].fill(0);
}

pub fn unpack_wb_stat(buf: &[u8]) -> WbStat {
    debug_assert!(buf.len() >= WB_STAT_SIZE);
    WbStat {
        pidx: u16::from_le_bytes([buf[0], buf[1]]),
        cidx: u16::from_le_bytes([buf[2], buf[3]]),
    }
}

pub fn pack_rx_desc(buf: &mut [u8], desc: &RxDesc) {
    debug_assert!(buf.len() >= RX_DESC_SIZE);
    buf[0..8].copy_from_slice(&desc.dst_addr.to_le_bytes());
}

pub fn unpack_rx_desc(buf: &[u8]) -> RxDesc {
    debug_assert!(buf.len() >= RX_DESC_SIZE);
    RxDesc {
        dst_addr: u64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]),
    }
}

pub fn pack_rx_cmpl(buf: &mut [u8], cmpl: &RxCmpl) {
    debug_assert!(buf.len() >= RX_CMPL_SIZE);
    let mut flags = 0u8;
    if cmpl.color != 0 {
        flags |= CMPL_COLOR_BIT;
    }
    if cmpl.err {
        flags |= CMPL_ERR_BIT;
    }
    buf[0] = flags;
    buf[1] = 0;
    buf[2..4].copy_from_slice(&cmpl.pkt_len.to_le_bytes());
    buf[4..6].copy_from_slice(&cmpl.pkt_id.to_le_bytes());
    buf[6..8].fill(0);
}

pub fn unpack_rx_cmpl(buf: &[u8]) -> RxCmpl {
    debug_assert!(buf.len() >= RX_CMPL_SIZE);
    RxCmpl {
        color: buf[0] & CMPL_COLOR_BIT,
        err: buf[0] & CMPL_ERR_BIT != 0,
        pkt_len: u16::from_le_bytes([buf[2], buf[3]]),
        pkt_id: u16::from_le_bytes([buf[4], buf[5]]),
    }
}

pub fn pack_cmpl_stat(buf: &mut [u8], stat: &CmplStat) {
    debug_assert!(buf.len() >= CMPL_STAT_SIZE);
    buf[0..2].copy_from_slice(&stat.pidx.to_le_bytes());
    buf[2..4].copy_from_slice(&stat.cidx.to_le_bytes());
    let mut flags = 0u8;
    if stat.color != 0 {
        flags |= STAT_COLOR_BIT;
    }
    flags |= (stat.intr_state & STAT_INTR_MASK) << STAT_INTR_SHIFT;
    buf[4] = flags;
    buf[5..8].fill(0);
}

pub fn unpack_cmpl_stat(buf: &[u8]) -> CmplStat {
    debug_assert!(buf.len() >= CMPL_STAT_SIZE);
    CmplStat {
        pidx: u16::from_le_bytes([buf[0], buf[1]]),
        cidx: u16::from_le_bytes([buf[2], buf[3]]),
        color: buf[4] & STAT_COLOR_BIT,
        intr_state: (buf[4] >> STAT_INTR_SHIFT) & STAT_INTR_MASK,
    }
}
