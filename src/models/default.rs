use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{
    combine_contexts, Bit, DirectContextModel, DirectContextModelOptions, LogisticMixModel, LogisticMixModelOptions,
    Model, ScaledFreq, SparseContextModel, SparseContextModelOptions,
};
use crate::error::Result;
use crate::pool::TablePool;

/// Number of sparse contexts used when nothing else is asked for
pub const DEFAULT_NUM_CONTEXTS: usize = 12;

/// Symbols that open (and close) a quoted run
pub const QUOTE_BYTES: [u32; 3] = [b'"' as u32, b'\'' as u32, b'`' as u32];

// Most useful first: contiguous orders, then skips over one or two symbols
const PREFERRED_SELECTORS: [u32; 16] = [
    0b1, 0b11, 0b111, 0b1111, 0b11111, 0b111111, 0b10, 0b110, 0b101, 0b1011, 0b1101, 0b100, 0b1000, 0b1001,
    0b11011, 0b10010,
];

/// A deterministic selector set with `num_contexts` distinct entries
pub fn default_sparse_selectors(num_contexts: usize) -> Vec<u32> {
    let rest = (1..=u32::MAX).filter(|sel| !PREFERRED_SELECTORS.contains(sel));
    PREFERRED_SELECTORS.iter().copied().chain(rest).take(num_contexts).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultModelOptions {
    pub in_bits: u32,
    pub context_bits: u32,
    pub precision: u32,
    pub model_max_count: u32,
    pub model_recip_base_count: u32,
    pub recip_learning_rate: u32,
    pub sparse_selectors: Vec<u32>,
    pub model_quotes: bool,
}

impl DefaultModelOptions {
    pub fn direct(&self) -> DirectContextModelOptions {
        DirectContextModelOptions {
            in_bits: self.in_bits,
            context_bits: self.context_bits,
            precision: self.precision,
            model_max_count: self.model_max_count,
            model_recip_base_count: self.model_recip_base_count,
        }
    }

    pub fn mix(&self) -> LogisticMixModelOptions {
        LogisticMixModelOptions { recip_learning_rate: self.recip_learning_rate, precision: self.precision }
    }

    /// Tables the model allocates, one direct plus one per selector
    pub fn num_tables(&self) -> usize {
        1 + self.sparse_selectors.len()
    }
}

/// One direct model and one sparse model per selector, mixed together.
///
/// With `model_quotes` set, the quote symbol of the run we are in (if any)
/// becomes part of every sub-model's context.
pub struct DefaultModel {
    mix: LogisticMixModel,
    model_quotes: bool,
    quote: u32,
    quotes_seen: BTreeSet<u32>,
}

impl DefaultModel {
    pub fn new(options: &DefaultModelOptions, pool: Option<&TablePool>) -> Result<Self> {
        let direct = options.direct();
        let mut models: Vec<Box<dyn Model>> = Vec::with_capacity(options.num_tables());
        models.push(Box::new(DirectContextModel::new(&direct, pool)?));
        for &sparse_selector in &options.sparse_selectors {
            let sparse = SparseContextModelOptions { direct: direct.clone(), sparse_selector };
            models.push(Box::new(SparseContextModel::new(&sparse, pool)?));
        }

        Ok(Self {
            mix: LogisticMixModel::new(models, &options.mix()),
            model_quotes: options.model_quotes,
            quote: 0,
            quotes_seen: BTreeSet::new(),
        })
    }

    /// Quote symbols that have opened at least one run
    pub fn quotes_seen(&self) -> &BTreeSet<u32> {
        &self.quotes_seen
    }

    /// The quote symbol of the current run, if inside one
    pub fn current_quote(&self) -> Option<u32> {
        (self.quote != 0).then_some(self.quote)
    }

    #[inline(always)]
    fn context(&self, ctx: u32) -> u32 {
        combine_contexts(ctx, self.quote)
    }

    fn track_quotes(&mut self, current_byte: u32) {
        if self.quote != 0 {
            if current_byte == self.quote {
                self.quote = 0;
            }
        } else if QUOTE_BYTES.contains(&current_byte) {
            self.quote = current_byte;
            self.quotes_seen.insert(current_byte);
        }
    }
}

impl Model for DefaultModel {
    fn predict(&self, ctx: u32) -> ScaledFreq {
        self.mix.predict(self.context(ctx))
    }

    fn update(&mut self, bit: Bit, ctx: u32) {
        let ctx = self.context(ctx);
        self.mix.update(bit, ctx);
    }

    fn flush_byte(&mut self, current_byte: u32, in_bits: u32) {
        self.mix.flush_byte(current_byte, in_bits);
        if self.model_quotes {
            self.track_quotes(current_byte);
        }
    }

    fn release(&mut self) {
        self.mix.release();
    }
}
