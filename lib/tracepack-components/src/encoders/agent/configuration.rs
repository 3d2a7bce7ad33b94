use serde::Deserialize;
use tracepack_config::{ConfigurationError, GenericConfiguration};
use tracepack_io::buf::DEFAULT_CHUNK_SIZE;

use super::{
    flush::DEFAULT_SOFT_LIMIT_BYTES, AgentEncoderV04, AgentEncoderV05, FlushSignal, ProtocolVersion, TraceEncoder,
};

const fn default_soft_limit_bytes() -> usize {
    DEFAULT_SOFT_LIMIT_BYTES
}

const fn default_buffer_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Configuration for the trace agent payload encoders.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AgentEncoderConfiguration {
    /// Protocol version to encode payloads with.
    ///
    /// Either `v0.4` or `v0.5`. Defaults to `v0.4`.
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Size, in bytes, past which the encoder requests a flush.
    ///
    /// This is a soft limit: encoding continues past it, and the flush request is only advisory.
    ///
    /// Defaults to 8 MiB.
    #[serde(default = "default_soft_limit_bytes")]
    pub soft_limit_bytes: usize,

    /// Minimum step, in bytes, by which encoding buffers grow.
    ///
    /// Defaults to 2 MiB.
    #[serde(default = "default_buffer_chunk_size")]
    pub buffer_chunk_size: usize,

    /// Whether to encode span events as a top-level span field.
    ///
    /// Only applies to `v0.4`, and requires a trace agent that accepts them. Otherwise, span events are sent as a
    /// JSON-encoded tag.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub native_span_events: bool,

    /// Whether to log the bytes of every encoded trace.
    ///
    /// Defaults to `false`.
    #[serde(default)]
    pub debug_encoding: bool,
}

impl AgentEncoderConfiguration {
    /// Creates a new `AgentEncoderConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If any of the encoder settings are present but invalid, an error will be returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, ConfigurationError> {
        config.as_typed()
    }

    /// Builds an encoder for the configured protocol version.
    pub fn build<F>(&self, flush: F) -> Box<dyn TraceEncoder + Send>
    where
        F: FlushSignal + 'static,
    {
        match self.protocol_version {
            ProtocolVersion::V04 => Box::new(
                AgentEncoderV04::new(flush)
                    .with_buffer_chunk_size(self.buffer_chunk_size)
                    .with_soft_limit_bytes(self.soft_limit_bytes)
                    .with_native_span_events(self.native_span_events)
                    .with_debug_encoding(self.debug_encoding),
            ),
            ProtocolVersion::V05 => Box::new(
                AgentEncoderV05::new(flush)
                    .with_buffer_chunk_size(self.buffer_chunk_size)
                    .with_soft_limit_bytes(self.soft_limit_bytes)
                    .with_debug_encoding(self.debug_encoding),
            ),
        }
    }
}

impl Default for AgentEncoderConfiguration {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::default(),
            soft_limit_bytes: default_soft_limit_bytes(),
            buffer_chunk_size: default_buffer_chunk_size(),
            native_span_events: false,
            debug_encoding: false,
        }
    }
}
