//! Data model.

pub mod trace;
