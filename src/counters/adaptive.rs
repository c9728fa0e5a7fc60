use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Bit, ScaledFreq};

const PROB_MASK: u32 = 0xffff;
const COUNT_SHIFT: u32 = 16;

/// Learning rate knobs shared by every counter of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRates {
    pub precision: u32,
    /// Confidence cap, the step never gets smaller than `1 / (max_count + 1)`
    pub max_count: u32,
    /// Larger values take bigger first steps in fresh contexts
    pub recip_base_count: u32,
}

impl CounterRates {
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.precision) {
            return Err(Error::InvalidConfig(format!("precision must be in 1..=16, got {}", self.precision)));
        }
        if !(1..=255).contains(&self.max_count) {
            return Err(Error::InvalidConfig(format!("model_max_count must be in 1..=255, got {}", self.max_count)));
        }
        if !(1..=1 << 16).contains(&self.recip_base_count) {
            return Err(Error::InvalidConfig(format!(
                "model_recip_base_count must be in 1..=65536, got {}",
                self.recip_base_count
            )));
        }
        Ok(())
    }
}

/// Probability of a 1 and a saturating hit count, packed in one `u32`
///
/// Bits 0..16 hold the probability scaled by `2^precision`, bits 16..24 the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveCounter(u32);

impl AdaptiveCounter {
    /// Fresh counter predicting 1/2
    pub const fn new(precision: u32) -> Self {
        Self(1 << (precision - 1))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn p(self) -> ScaledFreq {
        self.0 & PROB_MASK
    }

    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0 >> COUNT_SHIFT
    }

    /// Moves the estimate toward `bit` by `r / ((count + 1) * r + 1)` of the gap
    #[inline]
    pub fn update(self, bit: Bit, rates: &CounterRates) -> Self {
        let one = 1i64 << rates.precision;
        let p = i64::from(self.p());
        let count = self.count();
        let target = if bit == 0 { 0 } else { one };

        let r = i64::from(rates.recip_base_count);
        let step = (target - p) * r / ((i64::from(count) + 1) * r + 1);
        // both ends stay reachable for the coder
        let p = (p + step).clamp(1, one - 1) as u32;
        let count = (count + 1).min(rates.max_count);
        Self(p | (count << COUNT_SHIFT))
    }
}
