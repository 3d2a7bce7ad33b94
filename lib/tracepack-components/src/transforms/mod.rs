//! Transform implementations.

pub mod normalize;
