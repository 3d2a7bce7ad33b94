//! Component implementations.
//!
//! This crate contains the span normalization rules and the trace agent payload encoders.

#![deny(missing_docs)]

pub mod encoders;
pub mod transforms;
