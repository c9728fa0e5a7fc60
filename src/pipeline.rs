// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Drives a model and the ANS coder in lockstep.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SessionConfig;
use crate::entropy_coding::{AnsDecoder, AnsEncoder, AnsOptions};
use crate::error::{Error, Result};
use crate::helpers::EntropyTrace;
use crate::models::{Bit, DefaultModel, Model, DEFAULT_CONTEXT};
use crate::pool::TablePool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressOptions {
    pub out_bits: u32,
    pub precision: u32,
    /// Bits per input symbol, coded most significant first
    pub in_bits: u32,
    /// Known symbols fed to the model ahead of the input
    #[serde(default)]
    pub preset: Vec<u32>,
    #[serde(default)]
    pub calculate_byte_entropy: bool,
}

impl CompressOptions {
    pub fn ans_options(&self) -> AnsOptions {
        AnsOptions { out_bits: self.out_bits, precision: self.precision }
    }

    fn check_symbols(&self, symbols: &[u32]) -> Result<()> {
        if !(1..=16).contains(&self.in_bits) {
            return Err(Error::InvalidConfig(format!("in_bits must be in 1..=16, got {}", self.in_bits)));
        }
        match symbols.iter().find(|&&sym| sym >> self.in_bits != 0) {
            Some(&symbol) => Err(Error::SymbolOutOfRange { symbol, in_bits: self.in_bits }),
            None => Ok(()),
        }
    }
}

/// A compressed payload, `input_length` is needed to know when to stop decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub input_length: usize,
    pub state: u32,
    pub buf: Vec<u32>,
}

/// [`Output`] plus bookkeeping about how it was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputExtra {
    #[serde(flatten)]
    pub output: Output,
    pub buf_length_in_bytes: usize,
    /// Bits spent on each input symbol
    pub byte_entropy: Option<Vec<f64>>,
}

impl OutputExtra {
    pub fn into_output(self) -> Output {
        self.output
    }
}

/// Bits of `symbol`, most significant first
fn bits(symbol: u32, in_bits: u32) -> impl Iterator<Item = Bit> {
    (0..in_bits).rev().map(move |i| ((symbol >> i) & 1) as Bit)
}

fn feed_preset<M: Model + ?Sized>(model: &mut M, options: &CompressOptions) {
    for &symbol in &options.preset {
        for bit in bits(symbol, options.in_bits) {
            model.update(bit, DEFAULT_CONTEXT);
        }
        model.flush_byte(symbol, options.in_bits);
    }
}

/// Compresses `input` with a fresh `model`, which must not be reused afterwards
pub fn compress_with_model<M: Model + ?Sized>(
    input: &[u32],
    model: &mut M,
    options: &CompressOptions,
) -> Result<OutputExtra> {
    options.check_symbols(&options.preset)?;
    options.check_symbols(input)?;
    let ans_options = options.ans_options();
    let mut encoder = AnsEncoder::new(ans_options)?;
    let mut trace = options.calculate_byte_entropy.then(EntropyTrace::new);

    feed_preset(model, options);
    for &symbol in input {
        for bit in bits(symbol, options.in_bits) {
            let p = model.predict(DEFAULT_CONTEXT);
            encoder.write_bit(bit, p)?;
            if let Some(trace) = &mut trace {
                trace.add_bit(bit, p, options.precision);
            }
            model.update(bit, DEFAULT_CONTEXT);
        }
        model.flush_byte(symbol, options.in_bits);
        if let Some(trace) = &mut trace {
            trace.end_symbol();
        }
    }

    let coded = encoder.finish();
    let buf_length_in_bytes = (coded.buf.len() * options.out_bits as usize).div_ceil(8);
    debug!(
        symbols = input.len(),
        words = coded.buf.len(),
        bytes = buf_length_in_bytes,
        "compressed"
    );

    Ok(OutputExtra {
        output: Output { input_length: input.len(), state: coded.state, buf: coded.buf },
        buf_length_in_bytes,
        byte_entropy: trace.map(EntropyTrace::into_symbols),
    })
}

/// Mirror of [`compress_with_model`], `model` must be configured identically
pub fn decompress_with_model<M: Model + ?Sized>(
    output: &Output,
    model: &mut M,
    options: &CompressOptions,
) -> Result<Vec<u32>> {
    options.check_symbols(&options.preset)?;
    let mut decoder = AnsDecoder::new(output.state, &output.buf, options.ans_options())?;

    feed_preset(model, options);
    let mut decoded = Vec::with_capacity(output.input_length);
    for _ in 0..output.input_length {
        let mut symbol = 0;
        for _ in 0..options.in_bits {
            let p = model.predict(DEFAULT_CONTEXT);
            let bit = decoder.read_bit(p)?;
            model.update(bit, DEFAULT_CONTEXT);
            symbol = (symbol << 1) | u32::from(bit);
        }
        model.flush_byte(symbol, options.in_bits);
        decoded.push(symbol);
    }

    debug!(symbols = decoded.len(), leftover_words = decoder.remaining(), "decompressed");
    Ok(decoded)
}

/// An [`Output`] stamped with the digest of the configuration that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub config_digest: u64,
    pub output: Output,
}

/// Compresses and decompresses with a [`DefaultModel`] built from one configuration
pub struct Session {
    config: SessionConfig,
    digest: u64,
    pool: Option<TablePool>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let digest = config.digest()?;
        Ok(Self { config, digest, pool: None })
    }

    /// Backs model tables with `pool` instead of fresh allocations
    pub fn with_pool(mut self, pool: TablePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }

    /// A fresh model, every compression or decompression needs its own
    pub fn model(&self) -> Result<DefaultModel> {
        DefaultModel::new(&self.config.model_options(), self.pool.as_ref())
    }

    pub fn compress_extra(&self, input: &[u32], calculate_byte_entropy: bool) -> Result<OutputExtra> {
        let options = CompressOptions { calculate_byte_entropy, ..self.config.compress_options() };
        let mut model = self.model()?;
        let res = compress_with_model(input, &mut model, &options);
        model.release();
        res
    }

    pub fn compress(&self, input: &[u32]) -> Result<Payload> {
        let output = self.compress_extra(input, false)?.into_output();
        Ok(Payload { config_digest: self.digest, output })
    }

    pub fn compress_bytes(&self, input: &[u8]) -> Result<Payload> {
        let symbols: Vec<u32> = input.iter().copied().map(u32::from).collect();
        self.compress(&symbols)
    }

    pub fn decompress(&self, payload: &Payload) -> Result<Vec<u32>> {
        if payload.config_digest != self.digest {
            return Err(Error::ConfigMismatch { expected: self.digest, found: payload.config_digest });
        }
        let mut model = self.model()?;
        let res = decompress_with_model(&payload.output, &mut model, &self.config.compress_options());
        model.release();
        res
    }

    pub fn decompress_bytes(&self, payload: &Payload) -> Result<Vec<u8>> {
        self.decompress(payload)?
            .into_iter()
            .map(|sym| {
                u8::try_from(sym).map_err(|_| Error::SymbolOutOfRange { symbol: sym, in_bits: 8 })
            })
            .collect()
    }
}
