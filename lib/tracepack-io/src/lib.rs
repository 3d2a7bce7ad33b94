//! Buffers and MessagePack writers used to build trace intake payloads.
#![deny(missing_docs)]

pub mod buf;
pub mod msgpack;
