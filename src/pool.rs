// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Reusable backing storage for large per-context tables.
//!
//! Models borrow a buffer with [`TablePool::allocate`] and hand it back with
//! [`TablePool::release`]. The optimizer rebuilds the same model shapes over
//! and over, so returned buffers are kept and lent out again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::error::{Error, Result};

const CELL_BYTES: usize = std::mem::size_of::<u32>();

#[derive(Default)]
struct PoolState {
    free: Vec<Vec<u32>>,
    lent_bytes: usize,
    limit_bytes: Option<usize>,
}

/// Shared pool of `u32` tables, cheap to clone
#[derive(Clone, Default)]
pub struct TablePool {
    state: Arc<Mutex<PoolState>>,
}

impl TablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool refusing to lend more than `max_memory_mb` at once
    pub fn with_limit_mb(max_memory_mb: usize) -> Self {
        let state = PoolState { limit_bytes: Some(max_memory_mb << 20), ..PoolState::default() };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    // Buffers hold no invariants beyond their length, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lends a table of exactly `len` cells, contents unspecified
    pub fn allocate(&self, len: usize) -> Result<Vec<u32>> {
        let mut state = self.lock();
        let requested = len * CELL_BYTES;
        if let Some(limit) = state.limit_bytes {
            if state.lent_bytes + requested > limit {
                return Err(Error::OutOfMemory { requested, limit });
            }
        }
        state.lent_bytes += requested;

        match state.free.iter().position(|buf| buf.len() == len) {
            Some(idx) => {
                trace!(len, "reusing pooled table");
                Ok(state.free.swap_remove(idx))
            }
            None => Ok(vec![0; len]),
        }
    }

    /// Takes a table back for later reuse
    pub fn release(&self, buf: Vec<u32>) {
        let mut state = self.lock();
        state.lent_bytes = state.lent_bytes.saturating_sub(buf.len() * CELL_BYTES);
        state.free.push(buf);
    }

    /// Bytes currently lent out
    pub fn lent_bytes(&self) -> usize {
        self.lock().lent_bytes
    }

    /// Most bytes the pool lends at once, `None` when unlimited
    pub fn limit_bytes(&self) -> Option<usize> {
        self.lock().limit_bytes
    }

    /// Bytes held by the pool, lent or idle, in MB
    pub fn memory_usage_mb(&self) -> f64 {
        let state = self.lock();
        let idle: usize = state.free.iter().map(|buf| buf.len() * CELL_BYTES).sum();
        (state.lent_bytes + idle) as f64 / f64::from(1 << 20)
    }
}
