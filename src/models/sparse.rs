use serde::{Deserialize, Serialize};

use super::{combine_contexts, Bit, DirectContextModel, DirectContextModelOptions, Model, ScaledFreq};
use crate::error::Result;
use crate::pool::TablePool;

/// Symbols of history a selector can reach
pub const SPARSE_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseContextModelOptions {
    #[serde(flatten)]
    pub direct: DirectContextModelOptions,
    /// Bit `i` selects the symbol `i + 1` positions back
    pub sparse_selector: u32,
}

/// A [`DirectContextModel`] whose context is a chosen subset of past symbols
pub struct SparseContextModel {
    inner: DirectContextModel,
    selector: u32,
    history: [u32; SPARSE_HISTORY],
    sparse_ctx: u32,
}

impl SparseContextModel {
    pub fn new(options: &SparseContextModelOptions, pool: Option<&TablePool>) -> Result<Self> {
        let mut model = Self {
            inner: DirectContextModel::new(&options.direct, pool)?,
            selector: options.sparse_selector,
            history: [0; SPARSE_HISTORY],
            sparse_ctx: 0,
        };
        model.sparse_ctx = model.select();
        Ok(model)
    }

    pub fn selector(&self) -> u32 {
        self.selector
    }

    /// Hash of the selected history symbols
    fn select(&self) -> u32 {
        self.history
            .iter()
            .enumerate()
            .filter(|&(i, _)| (self.selector >> i) & 1 == 1)
            .fold(0u32, |h, (_, &sym)| (h ^ sym.wrapping_add(1)).wrapping_mul(0x0100_0193))
    }
}

impl Model for SparseContextModel {
    fn predict(&self, ctx: u32) -> ScaledFreq {
        self.inner.predict(combine_contexts(self.sparse_ctx, ctx))
    }

    fn update(&mut self, bit: Bit, ctx: u32) {
        self.inner.update(bit, combine_contexts(self.sparse_ctx, ctx));
    }

    fn flush_byte(&mut self, current_byte: u32, in_bits: u32) {
        self.history.copy_within(..SPARSE_HISTORY - 1, 1);
        self.history[0] = current_byte;
        self.sparse_ctx = self.select();
        self.inner.flush_byte(current_byte, in_bits);
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_CONTEXT;

    fn options(sparse_selector: u32) -> SparseContextModelOptions {
        SparseContextModelOptions {
            direct: DirectContextModelOptions {
                in_bits: 8,
                context_bits: 16,
                precision: 16,
                model_max_count: 5,
                model_recip_base_count: 20,
            },
            sparse_selector,
        }
    }

    fn feed(model: &mut SparseContextModel, byte: u32) -> u32 {
        // returns the probability given to the first bit
        let p = model.predict(DEFAULT_CONTEXT);
        for i in (0..8).rev() {
            model.update(((byte >> i) & 1) as Bit, DEFAULT_CONTEXT);
        }
        model.flush_byte(byte, 8);
        p
    }

    #[test]
    fn captures_a_fixed_period() {
        // 3 byte records, the first column flips between 0x80 and 0x00 every row
        let mut model = SparseContextModel::new(&options(0b100), None).unwrap();
        let mut third_column = 0;
        for row in 0..200u32 {
            let first_column = if row % 2 == 0 { 0x80 } else { 0x00 };
            feed(&mut model, first_column);
            feed(&mut model, 0x11);
            third_column = feed(&mut model, 0x22);
        }
        assert!(third_column < 1 << 14);

        // three symbols back is the 0x00 of the last row, so the next one starts with a 1
        assert!(model.predict(DEFAULT_CONTEXT) > 60000);
    }

    #[test]
    fn empty_selector_is_order_zero() {
        let mut model = SparseContextModel::new(&options(0), None).unwrap();
        let before = model.sparse_ctx;
        feed(&mut model, 0x41);
        feed(&mut model, 0x42);
        assert_eq!(model.sparse_ctx, before);
    }

    #[test]
    fn only_selected_positions_matter() {
        let mut a = SparseContextModel::new(&options(0b1), None).unwrap();
        let mut b = SparseContextModel::new(&options(0b1), None).unwrap();
        feed(&mut a, 1);
        feed(&mut a, 9);
        feed(&mut b, 2);
        feed(&mut b, 9);
        assert_eq!(a.sparse_ctx, b.sparse_ctx);
    }
}
