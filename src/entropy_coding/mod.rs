// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Binary asymmetric numeral system coder.
//!
//! Every bit is coded against a [`ScaledFreq`] giving the probability of a 1
//! as `p / 2^precision`. Bit 1 owns the slots `[0, p)` and bit 0 owns
//! `[p, 2^precision)`.
//!
//! ANS is last-in-first-out, so the encoder queues its input and codes it
//! backwards in [`AnsEncoder::finish`]. The decoder then walks the words
//! front to back and sees bits in the same order the encoder was given them.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Bit, ScaledFreq};


/// Width of the coder state in bits
const STATE_BITS: u32 = 31;
/// Marks a queued bit of 1 (frequencies never reach bit 31)
const BIT_FLAG: u32 = 1 << 31;

/// Word width and probability scale, shared by encoder and decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnsOptions {
    pub out_bits: u32,
    pub precision: u32,
}

impl AnsOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.out_bits) {
            return Err(Error::InvalidConfig(format!("out_bits must be in 1..=16, got {}", self.out_bits)));
        }
        if !(1..=16).contains(&self.precision) {
            return Err(Error::InvalidConfig(format!("precision must be in 1..=16, got {}", self.precision)));
        }
        if self.out_bits + self.precision > STATE_BITS {
            return Err(Error::InvalidConfig(format!(
                "out_bits + precision must not exceed {STATE_BITS}, got {}",
                self.out_bits + self.precision
            )));
        }
        Ok(())
    }

    /// Lower bound of the normalized state interval
    #[inline(always)]
    fn lower_bound(&self) -> u32 {
        1 << (STATE_BITS - self.out_bits)
    }

    #[inline(always)]
    fn word_mask(&self) -> u32 {
        (1 << self.out_bits) - 1
    }

    /// Checks `0 < freq < 2^precision`
    #[inline(always)]
    pub fn check_freq(&self, freq: ScaledFreq) -> Result<()> {
        if freq == 0 || freq >= 1 << self.precision {
            return Err(Error::FreqOutOfRange { freq, precision: self.precision });
        }
        Ok(())
    }
}

/// Final coder state and the emitted words in decoding order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsOutput {
    pub state: u32,
    pub buf: Vec<u32>,
}

/// Returns `(freq, start)` of the slot range owned by `bit`
#[inline(always)]
fn slot_range(bit: Bit, p: ScaledFreq, precision: u32) -> (u32, u32) {
    match bit {
        0 => ((1 << precision) - p, p),
        _ => (p, 0),
    }
}

/// The `AnsEncoder` collects bits with their predictions and codes them on `finish`
pub struct AnsEncoder {
    options: AnsOptions,
    queue: Vec<u32>,
}

impl AnsEncoder {
    pub fn new(options: AnsOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, queue: Vec::new() })
    }

    /// Queues `bit`, coded with `predicted_freq` as the probability of a 1
    pub fn write_bit(&mut self, bit: Bit, predicted_freq: ScaledFreq) -> Result<()> {
        debug_assert!(bit <= 1, "Provided value wasn't a valid bit");
        self.options.check_freq(predicted_freq)?;
        let flag = if bit == 0 { 0 } else { BIT_FLAG };
        self.queue.push(predicted_freq | flag);
        Ok(())
    }

    /// Number of bits written so far
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Codes every queued bit and returns the state with the emitted words
    pub fn finish(self) -> AnsOutput {
        let AnsOptions { out_bits, precision } = self.options;
        let lower = self.options.lower_bound();
        let mask = self.options.word_mask();
        // state must be below (L / M) * b * freq before pushing a symbol of freq
        let bound_unit = u64::from(lower >> precision) << out_bits;

        let mut state = lower;
        let mut buf = Vec::with_capacity(self.queue.len() / 8);
        for &entry in self.queue.iter().rev() {
            let bit = Bit::from(entry & BIT_FLAG != 0);
            let (freq, start) = slot_range(bit, entry & !BIT_FLAG, precision);

            let x_max = bound_unit * u64::from(freq);
            while u64::from(state) >= x_max {
                buf.push(state & mask);
                state >>= out_bits;
            }
            state = ((state / freq) << precision) + state % freq + start;
            debug_assert!(state >= lower && u64::from(state) < u64::from(lower) << out_bits);
        }

        buf.reverse();
        AnsOutput { state, buf }
    }
}

/// The `AnsDecoder` recovers bits given the same predictions the encoder saw
pub struct AnsDecoder<'a> {
    options: AnsOptions,
    state: u32,
    buf: &'a [u32],
    pos: usize,
}

impl<'a> AnsDecoder<'a> {
    pub fn new(state: u32, buf: &'a [u32], options: AnsOptions) -> Result<Self> {
        options.validate()?;
        let lower = options.lower_bound();
        if state < lower || u64::from(state) >= u64::from(lower) << options.out_bits {
            return Err(Error::CorruptPayload(format!("state {state:#x} is not normalized")));
        }
        if let Some(word) = buf.iter().find(|&&word| word > options.word_mask()) {
            return Err(Error::CorruptPayload(format!(
                "word {word:#x} is wider than {} bits",
                options.out_bits
            )));
        }
        Ok(Self { options, state, buf, pos: 0 })
    }

    pub fn from_output(output: &'a AnsOutput, options: AnsOptions) -> Result<Self> {
        Self::new(output.state, &output.buf, options)
    }

    /// Decodes one bit, `predicted_freq` must match what the encoder used here
    pub fn read_bit(&mut self, predicted_freq: ScaledFreq) -> Result<Bit> {
        let AnsOptions { out_bits, precision } = self.options;
        self.options.check_freq(predicted_freq)?;

        let slot = self.state & ((1 << precision) - 1);
        let bit = Bit::from(slot < predicted_freq);
        let (freq, start) = slot_range(bit, predicted_freq, precision);
        self.state = freq * (self.state >> precision) + slot - start;

        // Renormalize -> pull words until the state is back in range
        let lower = self.options.lower_bound();
        while self.state < lower {
            match self.buf.get(self.pos) {
                Some(&word) => {
                    self.state = (self.state << out_bits) | word;
                    self.pos += 1;
                }
                None => break,
            }
        }

        Ok(bit)
    }

    /// Words not consumed yet
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
