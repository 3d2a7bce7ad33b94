//! Encoder implementations.

mod agent;
pub use self::agent::{
    AgentEncoderConfiguration, AgentEncoderV04, AgentEncoderV05, FlushSignal, NoopFlush, ProtocolVersion, TraceEncoder,
};
