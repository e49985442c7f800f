// Public modules and re-exports
pub mod counters;
pub mod desc;
pub mod dma;
pub mod engine;
pub mod filter;
pub mod hw;
pub mod nic;
pub mod pool;
pub mod ring;
pub mod rx;
pub mod stack;
pub mod tx;

pub use counters::CounterSnapshot;
pub use engine::{drive, PollResult, DEFAULT_POLL_BUDGET};
pub use filter::{FilterProgram, PacketView, Verdict, DEFAULT_HEADROOM};
pub use hw::{Hardware, RxQueueParams, TxQueueParams};
pub use nic::{Nic, NicConfig, QueueState, MAX_QUEUES};
pub use rx::RX_REFILL_STEP;
pub use stack::{HostStack, NullStack, RedirectTarget};
pub use tx::{TransmitError, TxPayload, MIN_FRAME_LEN};

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Poisoning only happens if a panic unwound through a guard; the datapath
// state is still index-consistent, so recover the guard instead of
// propagating the panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

pub(crate) fn try_lock<T>(mutex: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    use std::sync::TryLockError;
    match mutex.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    }
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|p| p.into_inner())
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests;
