// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Error types shared by the coder, the models and the optimizer.

use thiserror::Error;

/// Everything that can go wrong in a compression session
#[derive(Debug, Error)]
pub enum Error {
    /// A scaled frequency was not strictly inside `(0, 2^precision)`.
    #[error("scaled frequency {freq} is outside (0, 2^{precision})")]
    FreqOutOfRange { freq: u32, precision: u32 },

    /// Options failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input or preset symbol is wider than `in_bits`.
    #[error("symbol {symbol:#x} does not fit in {in_bits} bits")]
    SymbolOutOfRange { symbol: u32, in_bits: u32 },

    /// The coder state or word buffer cannot have come from the encoder.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// The table pool would exceed its memory limit.
    #[error("allocating {requested} bytes would exceed the pool limit of {limit} bytes")]
    OutOfMemory { requested: usize, limit: usize },

    /// A payload was produced under a different session configuration.
    #[error("payload digest {found:016x} does not match configuration digest {expected:016x}")]
    ConfigMismatch { expected: u64, found: u64 },

    /// The configuration descriptor could not be canonicalized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
