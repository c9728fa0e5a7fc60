// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

pub mod default;
pub mod direct;
pub mod logistic_mix;
pub mod sparse;

pub use self::{default::*, direct::*, logistic_mix::*, sparse::*};

/// A single binary symbol, 0 or 1
pub type Bit = u8;

/// Probability of the next bit being 1, scaled by `2^precision`,
/// always strictly between 0 and `2^precision`
pub type ScaledFreq = u32;

/// Context value that selects a model's own default context
pub const DEFAULT_CONTEXT: u32 = 0;

/// A bit predictor.
///
/// Encoder and decoder must drive a model through the exact same calls:
/// `predict`, then `update` with the true bit, for every bit of a symbol,
/// then `flush_byte` once the symbol is complete.
pub trait Model {
    /// Probability of a 1 for the next bit, has no side effects
    fn predict(&self, ctx: u32) -> ScaledFreq;

    /// Learns the actual bit, called exactly once after each `predict`
    fn update(&mut self, bit: Bit, ctx: u32);

    /// Folds a completed symbol into the model's history
    fn flush_byte(&mut self, current_byte: u32, in_bits: u32);

    /// Returns pooled memory, safe to call more than once
    fn release(&mut self) {}
}

impl<M: Model + ?Sized> Model for Box<M> {
    fn predict(&self, ctx: u32) -> ScaledFreq {
        (**self).predict(ctx)
    }

    fn update(&mut self, bit: Bit, ctx: u32) {
        (**self).update(bit, ctx);
    }

    fn flush_byte(&mut self, current_byte: u32, in_bits: u32) {
        (**self).flush_byte(current_byte, in_bits);
    }

    fn release(&mut self) {
        (**self).release();
    }
}

/// Spreads a context value over all 32 bits, 0 stays 0
#[inline(always)]
pub(crate) fn hash_context(ctx: u32) -> u32 {
    let mut h = ctx;
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^ (h >> 16)
}

/// Merges a caller supplied context into a derived one, `(a, 0)` gives `a`
#[inline(always)]
pub(crate) fn combine_contexts(derived: u32, ctx: u32) -> u32 {
    derived ^ ctx.wrapping_mul(0x9e37_79b1).rotate_left(11)
}
