// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Session configuration.
//!
//! Encoder and decoder only agree if they share every coder option and
//! every model knob, so all of them live in one [`SessionConfig`] whose
//! digest travels with the payload.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::counters::MAX_CONTEXT_BITS;
use crate::entropy_coding::AnsOptions;
use crate::error::{Error, Result};
use crate::models::{default_sparse_selectors, DefaultModelOptions, DEFAULT_NUM_CONTEXTS};
use crate::pipeline::CompressOptions;

/// The knobs the optimizer searches over
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelParams {
    pub sparse_selectors: Vec<u32>,
    pub model_max_count: u32,
    pub model_recip_base_count: u32,
    pub recip_learning_rate: u32,
    /// Only meaningful to preprocessing outside this crate
    pub num_abbreviations: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        SessionConfig::default().params()
    }
}

/// Everything that has to match bit for bit between compression and decompression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub out_bits: u32,
    pub precision: u32,
    pub in_bits: u32,
    pub context_bits: u32,
    pub model_max_count: u32,
    pub model_recip_base_count: u32,
    pub recip_learning_rate: u32,
    pub sparse_selectors: Vec<u32>,
    pub model_quotes: bool,
    pub num_abbreviations: u32,
    /// Symbols run through the model before the input, never encoded
    pub preset: Vec<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            out_bits: 8,
            precision: 16,
            in_bits: 8,
            context_bits: 20,
            model_max_count: 5,
            model_recip_base_count: 20,
            recip_learning_rate: 1000,
            sparse_selectors: default_sparse_selectors(DEFAULT_NUM_CONTEXTS),
            model_quotes: true,
            num_abbreviations: 64,
            preset: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Bumped whenever the coded format changes meaning
    pub const FORMAT_VERSION: u32 = 1;

    pub fn validate(&self) -> Result<()> {
        self.ans_options().validate()?;
        self.model_options().direct().rates().validate()?;
        if !(1..=16).contains(&self.in_bits) {
            return Err(Error::InvalidConfig(format!("in_bits must be in 1..=16, got {}", self.in_bits)));
        }
        if !(1..=MAX_CONTEXT_BITS).contains(&self.context_bits) {
            return Err(Error::InvalidConfig(format!(
                "context_bits must be in 1..={MAX_CONTEXT_BITS}, got {}",
                self.context_bits
            )));
        }
        if self.recip_learning_rate == 0 {
            return Err(Error::InvalidConfig("recip_learning_rate must be positive".into()));
        }
        if let Some(&symbol) = self.preset.iter().find(|&&sym| sym >> self.in_bits != 0) {
            return Err(Error::SymbolOutOfRange { symbol, in_bits: self.in_bits });
        }
        Ok(())
    }

    pub fn ans_options(&self) -> AnsOptions {
        AnsOptions { out_bits: self.out_bits, precision: self.precision }
    }

    pub fn compress_options(&self) -> CompressOptions {
        CompressOptions {
            out_bits: self.out_bits,
            precision: self.precision,
            in_bits: self.in_bits,
            preset: self.preset.clone(),
            calculate_byte_entropy: false,
        }
    }

    pub fn model_options(&self) -> DefaultModelOptions {
        DefaultModelOptions {
            in_bits: self.in_bits,
            context_bits: self.context_bits,
            precision: self.precision,
            model_max_count: self.model_max_count,
            model_recip_base_count: self.model_recip_base_count,
            recip_learning_rate: self.recip_learning_rate,
            sparse_selectors: self.sparse_selectors.clone(),
            model_quotes: self.model_quotes,
        }
    }

    pub fn params(&self) -> ModelParams {
        ModelParams {
            sparse_selectors: self.sparse_selectors.clone(),
            model_max_count: self.model_max_count,
            model_recip_base_count: self.model_recip_base_count,
            recip_learning_rate: self.recip_learning_rate,
            num_abbreviations: self.num_abbreviations,
        }
    }

    pub fn with_params(&self, params: &ModelParams) -> Self {
        Self {
            sparse_selectors: params.sparse_selectors.clone(),
            model_max_count: params.model_max_count,
            model_recip_base_count: params.model_recip_base_count,
            recip_learning_rate: params.recip_learning_rate,
            num_abbreviations: params.num_abbreviations,
            ..self.clone()
        }
    }

    /// Memory taken by the model tables of one session
    pub fn memory_usage_mb(&self) -> f64 {
        let tables = self.model_options().num_tables() as f64;
        tables * (4u64 << self.context_bits) as f64 / f64::from(1 << 20)
    }

    /// Shrinks `context_bits` until one session fits in `max_memory_mb`
    pub fn with_memory_limit(mut self, max_memory_mb: u32) -> Result<Self> {
        while self.memory_usage_mb() > f64::from(max_memory_mb) {
            if self.context_bits <= 1 {
                return Err(Error::InvalidConfig(format!("no context width fits in {max_memory_mb} MB")));
            }
            self.context_bits -= 1;
        }
        Ok(self)
    }

    /// Fingerprint of the whole configuration, stored next to payloads
    pub fn digest(&self) -> Result<u64> {
        let canonical = serde_json::to_vec(&(Self::FORMAT_VERSION, self))?;
        Ok(xxh3_64(&canonical))
    }
}
