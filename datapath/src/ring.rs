use crate::dma::DmaRegion;
use std::io;

/// Where the device publishes its index writeback relative to the descriptor
/// entries of a ring.
///
/// The placement decides the usable capacity: a status slot colocated in the
/// same entry array costs one descriptor position, an appended status area
/// does not. The mode is fixed at construction so the modulus can never be
/// computed before the writeback location is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Writeback {
    None,
    /// Status area appended after all `capacity` entries.
    Appended { stat_size: usize },
    /// Last entry position doubles as the status slot.
    Colocated { stat_size: usize },
}

/// A fixed-capacity circular index space over device-shared descriptor or
/// completion memory. Owns no buffers, only the backing bytes and the index
/// arithmetic; callers serialize access per ring.
pub struct Ring {
    mem: DmaRegion,
    entry_size: usize,
    capacity: u16,
    usable: u16,
    wb_offset: Option<usize>,
    wb_size: usize,
    pub next_to_use: u16,
    pub next_to_clean: u16,
    pub color: u8,
}

impl Ring {
    pub fn new(capacity: u16, entry_size: usize, wb: Writeback) -> io::Result<Ring> {
        if capacity < 2 {
            return Err(io::Error::other(format!(
                "ring capacity {} too small",
                capacity
            )));
        }
        let (usable, size, wb_offset, wb_size) = match wb {
            Writeback::None => (capacity, entry_size * capacity as usize, None, 0),
            Writeback::Appended { stat_size } => {
                let entries = entry_size * capacity as usize;
                (capacity, entries + stat_size, Some(entries), stat_size)
            }
            Writeback::Colocated { stat_size } => {
                let entries = entry_size * (capacity as usize - 1);
                (capacity - 1, entries + stat_size, Some(entries), stat_size)
            }
        };
        let mem = DmaRegion::alloc(size)?;
        Ok(Ring {
            mem,
            entry_size,
            capacity,
            usable,
            wb_offset,
            wb_size,
            next_to_use: 0,
            next_to_clean: 0,
            color: 0,
        })
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Descriptor positions actually available for entries, accounting for a
    /// colocated writeback slot.
    pub fn usable_capacity(&self) -> u16 {
        self.usable
    }

    pub fn is_full(&self) -> bool {
        (self.next_to_use + 1) % self.usable == self.next_to_clean
    }

    pub fn advance_head(&mut self) {
        self.next_to_use = (self.next_to_use + 1) % self.usable;
    }

    /// Advances the clean index and reports whether it wrapped past zero.
    /// Completion rings flip their expected color exactly on that wrap.
    pub fn advance_tail(&mut self) -> bool {
        self.next_to_clean = (self.next_to_clean + 1) % self.usable;
        self.next_to_clean == 0
    }

    /// Entries between the head and the clean index.
    pub fn outstanding(&self) -> u16 {
        (self.next_to_use + self.usable - self.next_to_clean) % self.usable
    }

    pub fn entry(&self, index: u16) -> &[u8] {
        debug_assert!(index < self.usable);
        self.mem.bytes(index as usize * self.entry_size, self.entry_size)
    }

    pub fn entry_mut(&mut self, index: u16) -> &mut [u8] {
        debug_assert!(index < self.usable);
        self.mem
            .bytes_mut(index as usize * self.entry_size, self.entry_size)
    }

    /// The device-written status bytes. Empty when the ring carries no
    /// writeback area.
    pub fn writeback(&self) -> &[u8] {
        match self.wb_offset {
            Some(offset) => self.mem.bytes(offset, self.wb_size),
            None => &[],
        }
    }

    pub fn base_ptr(&self) -> *mut u8 {
        self.mem.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.mem.len()
    }
}
