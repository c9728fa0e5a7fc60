use serde::{Deserialize, Serialize};

use super::{hash_context, Bit, Model, ScaledFreq};
use crate::counters::{CounterRates, CounterTable};
use crate::error::{Error, Result};
use crate::pool::TablePool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectContextModelOptions {
    pub in_bits: u32,
    pub context_bits: u32,
    pub precision: u32,
    pub model_max_count: u32,
    pub model_recip_base_count: u32,
}

impl DirectContextModelOptions {
    pub fn rates(&self) -> CounterRates {
        CounterRates {
            precision: self.precision,
            max_count: self.model_max_count,
            recip_base_count: self.model_recip_base_count,
        }
    }
}

/// One adaptive counter per context value.
///
/// The context is the caller's context hashed together with the bits of the
/// current symbol seen so far (with a leading 1 marking their count).
pub struct DirectContextModel {
    table: CounterTable,
    bit_context: u32,
}

impl DirectContextModel {
    pub fn new(options: &DirectContextModelOptions, pool: Option<&TablePool>) -> Result<Self> {
        if !(1..=16).contains(&options.in_bits) {
            return Err(Error::InvalidConfig(format!("in_bits must be in 1..=16, got {}", options.in_bits)));
        }
        let table = CounterTable::new(options.context_bits, options.rates(), pool)?;
        Ok(Self { table, bit_context: 1 })
    }

    #[inline(always)]
    fn index(&self, ctx: u32) -> usize {
        (hash_context(ctx) ^ self.bit_context) as usize
    }

    /// Counter hits recorded for `ctx` at the current bit position
    pub fn count(&self, ctx: u32) -> u32 {
        self.table.count(self.index(ctx))
    }
}

impl Model for DirectContextModel {
    fn predict(&self, ctx: u32) -> ScaledFreq {
        self.table.p(self.index(ctx))
    }

    fn update(&mut self, bit: Bit, ctx: u32) {
        self.table.update(self.index(ctx), bit);
        self.bit_context = (self.bit_context << 1) | u32::from(bit);
    }

    fn flush_byte(&mut self, _current_byte: u32, _in_bits: u32) {
        self.bit_context = 1;
    }

    fn release(&mut self) {
        self.table.release();
    }
}
