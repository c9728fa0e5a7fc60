use crate::models::{Bit, ScaledFreq};

/// Ideal cost in bits of coding `bit` when bit 1 was given probability `p`
#[inline]
pub fn bit_cost(bit: Bit, p: ScaledFreq, precision: u32) -> f64 {
    let one = f64::from(p) / (1u64 << precision) as f64;
    let prob = if bit == 1 { one } else { 1.0 - one };
    -prob.log2()
}

/// Accumulates [`bit_cost`] per coded symbol
#[derive(Debug, Default)]
pub struct EntropyTrace {
    current: f64,
    symbols: Vec<f64>,
}

impl EntropyTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bit(&mut self, bit: Bit, p: ScaledFreq, precision: u32) {
        self.current += bit_cost(bit, p, precision);
    }

    pub fn end_symbol(&mut self) {
        self.symbols.push(self.current);
        self.current = 0.0;
    }

    pub fn into_symbols(self) -> Vec<f64> {
        self.symbols
    }
}
