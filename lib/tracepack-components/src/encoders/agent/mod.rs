//! Trace agent payload encoders.
//!
//! Tracers send spans to the trace agent as MessagePack payloads, in one of two formats: `v0.4`, where every span is a
//! self-describing map, and `v0.5`, where every string is replaced by an index into a table sent once per payload.
//!
//! Encoders accumulate traces across calls to [`TraceEncoder::encode`], and hand back a complete payload, resetting
//! themselves, on each call to [`TraceEncoder::make_payload`]. Encoders never perform I/O: once the accumulated data
//! grows past a soft limit, they raise a [`FlushSignal`], and it is up to the caller to make and send the payload.

use bytes::Bytes;
use serde::Deserialize;
use tracepack_core::data_model::trace::Span;

mod common;

mod configuration;
pub use self::configuration::AgentEncoderConfiguration;

mod flush;
pub use self::flush::{FlushSignal, NoopFlush};

mod v04;
pub use self::v04::AgentEncoderV04;

mod v05;
pub use self::v05::AgentEncoderV05;

const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";

/// Trace agent intake protocol version.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum ProtocolVersion {
    /// Map-keyed spans.
    #[default]
    #[serde(rename = "v0.4", alias = "0.4")]
    V04,

    /// Positional spans with a shared string table.
    #[serde(rename = "v0.5", alias = "0.5")]
    V05,
}

impl ProtocolVersion {
    /// Returns the path of the trace agent endpoint accepting payloads of this version.
    pub const fn endpoint_path(&self) -> &'static str {
        match self {
            Self::V04 => "/v0.4/traces",
            Self::V05 => "/v0.5/traces",
        }
    }

    /// Returns the content type of payloads of this version.
    pub const fn content_type(&self) -> &'static str {
        CONTENT_TYPE_MSGPACK
    }
}

/// A trace payload encoder.
pub trait TraceEncoder {
    /// Encodes a trace, appending it to the pending payload.
    ///
    /// Spans are normalized and truncated as they are encoded; the given spans are never modified.
    fn encode(&mut self, trace: &[Span]);

    /// Returns the pending payload, and resets the encoder.
    ///
    /// When no traces have been encoded since the last reset, this returns a valid, empty payload.
    fn make_payload(&mut self) -> Bytes;

    /// Returns the number of traces encoded since the last reset.
    fn count(&self) -> usize;

    /// Returns the protocol version of the payloads produced by this encoder.
    fn protocol(&self) -> ProtocolVersion;
}
