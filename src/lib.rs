// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Context mixing bit models driving a binary rANS coder.
//!
//! A [`models::Model`] predicts every bit of the input, the
//! [`entropy_coding`] coder spends bits according to those predictions, and
//! decoding replays the exact same model calls to get the input back.
//! [`Session`] ties a [`SessionConfig`] to both directions and
//! [`optimizer::Optimizer`] searches for model parameters that compress a
//! given set of inputs best.

pub mod config;
pub mod counters;
pub mod entropy_coding;
pub mod error;
pub mod helpers;
pub mod mixers;
pub mod models;
pub mod optimizer;
pub mod pipeline;
pub mod pool;

pub use config::{ModelParams, SessionConfig};
pub use error::{Error, Result};
pub use pipeline::{compress_with_model, decompress_with_model, CompressOptions, Output, OutputExtra, Payload, Session};
pub use pool::TablePool;
