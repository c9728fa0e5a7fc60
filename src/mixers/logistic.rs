// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Fixed-point logistic mixing.
//!
//! Probabilities are 12-bit, the stretch domain is 8.8 fixed point clamped
//! to `[-2047, 2047]` and weights are 16.16. Everything is integer so the
//! encoder and the decoder agree on every bit, on every platform.

use std::sync::OnceLock;

use crate::models::{Bit, ScaledFreq};

/// Probability scale of the mixing domain
pub const MIX_BITS: u32 = 12;
/// Largest magnitude in the stretch domain
pub const STRETCH_LIMIT: i32 = 2047;
/// 1.0 in weight units
pub const WEIGHT_ONE: i32 = 1 << 16;
/// Weights never leave `[-WEIGHT_LIMIT, WEIGHT_LIMIT]`
pub const WEIGHT_LIMIT: i32 = 1 << 24;

/// `4096 / (1 + e^-(x/256))`, sampled every 128 steps
const SQUASH_KNOTS: [i32; 33] = [
    1, 2, 3, 6, 10, 16, 27, 45, 73, 120, 194, 310, 488, 747, 1101, 1546, 2047, 2549, 2994, 3348,
    3607, 3785, 3901, 3975, 4022, 4050, 4068, 4079, 4085, 4089, 4092, 4093, 4094,
];

/// Logistic function, stretch domain to a 12-bit probability in `[1, 4095]`
pub fn squash(x: i32) -> i32 {
    if x > STRETCH_LIMIT {
        return 4095;
    }
    if x < -STRETCH_LIMIT {
        return 1;
    }
    let w = x & 127;
    let idx = ((x >> 7) + 16) as usize;
    (SQUASH_KNOTS[idx] * (128 - w) + SQUASH_KNOTS[idx + 1] * w + 64) >> 7
}

fn stretch_table() -> &'static [i16] {
    static TABLE: OnceLock<Vec<i16>> = OnceLock::new();
    TABLE.get_or_init(|| {
        // Invert squash()
        let mut table = vec![STRETCH_LIMIT as i16; 1 << MIX_BITS];
        let mut pi = 0;
        for x in -STRETCH_LIMIT..=STRETCH_LIMIT {
            let v = squash(x) as usize;
            for slot in table.iter_mut().take(v + 1).skip(pi) {
                *slot = x as i16;
            }
            pi = pi.max(v + 1);
        }
        table
    })
}

/// Logit of a 12-bit probability, inverse of [`squash`]
pub fn stretch(p: i32) -> i32 {
    let p = p.clamp(0, (1 << MIX_BITS) - 1) as usize;
    i32::from(stretch_table()[p])
}

/// Rescales a probability from `precision` bits into the mixing domain
#[inline]
pub fn to_mix_domain(p: ScaledFreq, precision: u32) -> i32 {
    let p = if precision >= MIX_BITS { p >> (precision - MIX_BITS) } else { p << (MIX_BITS - precision) };
    p as i32
}

/// Rescales a mixed probability back to `precision` bits, strictly inside `(0, 2^precision)`
#[inline]
pub fn from_mix_domain(p: i32, precision: u32) -> ScaledFreq {
    let p = p.clamp(1, (1 << MIX_BITS) - 1) as u32;
    let p = if precision >= MIX_BITS { p << (precision - MIX_BITS) } else { p >> (MIX_BITS - precision) };
    p.clamp(1, (1 << precision) - 1)
}

/// One adaptive weight per input, trained online by gradient descent
#[derive(Debug, Clone)]
pub struct LogisticMixer {
    weights: Vec<i32>,
    recip_learning_rate: i64,
}

impl LogisticMixer {
    /// Starts with weights summing to one
    pub fn new(inputs: usize, recip_learning_rate: u32) -> Self {
        let initial = WEIGHT_ONE / i32::try_from(inputs.max(1)).unwrap_or(i32::MAX);
        Self { weights: vec![initial; inputs], recip_learning_rate: i64::from(recip_learning_rate.max(1)) }
    }

    /// Weighted sum of stretched inputs, clamped to the stretch domain
    pub fn dot(&self, inputs: &[i32]) -> i32 {
        debug_assert_eq!(inputs.len(), self.weights.len());
        let sum: i64 = self.weights.iter().zip(inputs).map(|(&w, &x)| i64::from(w) * i64::from(x)).sum();
        (sum >> 16).clamp(-i64::from(STRETCH_LIMIT), i64::from(STRETCH_LIMIT)) as i32
    }

    /// Mixed 12-bit probability of a 1
    pub fn mix(&self, inputs: &[i32]) -> i32 {
        squash(self.dot(inputs))
    }

    /// Steps every weight along `input * (bit - p)`
    pub fn train(&mut self, inputs: &[i32], p: i32, bit: Bit) {
        let err = (i64::from(bit) << MIX_BITS) - i64::from(p);
        for (w, &x) in self.weights.iter_mut().zip(inputs) {
            let dw = i64::from(x) * err / self.recip_learning_rate;
            let limit = i64::from(WEIGHT_LIMIT);
            *w = (i64::from(*w) + dw).clamp(-limit, limit) as i32;
        }
    }

    pub fn weights(&self) -> &[i32] {
        &self.weights
    }
}
