//! Core primitives shared by the trace payload encoders.
#![deny(missing_docs)]

pub mod collections;
pub mod data_model;
