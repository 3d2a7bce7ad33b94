//! Traces.
//!
//! A trace is an ordered sequence of [`Span`]s sharing a single trace identifier. Encoders accept traces as `&[Span]`,
//! and never modify the spans they are given.

use serde::{Serialize, Serializer};

use crate::collections::FastIndexMap;

mod meta_struct;
pub use self::meta_struct::{MetaStruct, MetaStructId, MetaStructValue};

/// A span.
#[derive(Clone, Debug, Default)]
pub struct Span {
    /// Trace identifier.
    ///
    /// Tracers may generate 128-bit trace identifiers, but only the low 64 bits are sent on the wire.
    pub trace_id: u128,
    /// Span identifier.
    pub span_id: u64,
    /// Identifier of the parent span, or zero for a root span.
    pub parent_id: u64,
    /// Operation name.
    pub name: String,
    /// Service name.
    pub service: String,
    /// Resource name.
    pub resource: String,
    /// Span type, such as `web` or `sql`.
    pub span_type: Option<String>,
    /// Error flag.
    pub error: i32,
    /// Start time, in nanoseconds since the Unix epoch.
    pub start: i64,
    /// Duration, in nanoseconds.
    pub duration: i64,
    /// Tags.
    pub meta: FastIndexMap<String, TagValue>,
    /// Numeric tags.
    pub metrics: FastIndexMap<String, TagValue>,
    /// Span events, in the order they were recorded.
    pub span_events: Vec<SpanEvent>,
    /// Span links.
    pub span_links: Vec<SpanLink>,
    /// Structured metadata.
    pub meta_struct: Option<MetaStruct>,
}

impl Span {
    /// Creates a new span with the given identifiers and all other fields empty.
    pub fn new(trace_id: u128, span_id: u64, parent_id: u64) -> Self {
        Self {
            trace_id,
            span_id,
            parent_id,
            ..Self::default()
        }
    }

    /// Sets the operation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the service name.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Sets the resource name.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Sets the span type.
    pub fn with_span_type(mut self, span_type: impl Into<Option<String>>) -> Self {
        self.span_type = span_type.into();
        self
    }

    /// Sets the error flag.
    pub fn with_error(mut self, error: i32) -> Self {
        self.error = error;
        self
    }

    /// Sets the start time and duration, in nanoseconds.
    pub fn with_timing(mut self, start: i64, duration: i64) -> Self {
        self.start = start;
        self.duration = duration;
        self
    }

    /// Adds a tag.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Adds a numeric tag.
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    /// Appends a span event.
    pub fn with_span_event(mut self, event: SpanEvent) -> Self {
        self.span_events.push(event);
        self
    }

    /// Appends a span link.
    pub fn with_span_link(mut self, link: SpanLink) -> Self {
        self.span_links.push(link);
        self
    }

    /// Sets the structured metadata.
    pub fn with_meta_struct(mut self, meta_struct: impl Into<Option<MetaStruct>>) -> Self {
        self.meta_struct = meta_struct.into();
        self
    }
}

/// A tag value.
///
/// Tracers attach loosely-typed values to spans. The value type is fixed here, at the boundary of the data model, so
/// that encoders only need to decide what to do with each variant: string and number values are sent, while boolean
/// values are not supported by the intake and are dropped.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// A string value.
    String(String),

    /// A numeric value.
    Number(f64),

    /// A boolean value.
    Bool(bool),
}

impl TagValue {
    /// Returns the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value as a number, if it is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A span event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpanEvent {
    /// Event name.
    pub name: String,
    /// Time the event occurred, in nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
    /// Event attributes.
    #[serde(skip_serializing_if = "FastIndexMap::is_empty")]
    pub attributes: FastIndexMap<String, AttributeValue>,
}

impl SpanEvent {
    /// Creates a new span event without attributes.
    pub fn new(name: impl Into<String>, time_unix_nano: u64) -> Self {
        Self {
            name: name.into(),
            time_unix_nano,
            attributes: FastIndexMap::default(),
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A span event attribute value.
///
/// Nested arrays and maps can be represented, since tracers may record them, but the native span event encoding only
/// carries scalars and arrays of scalars.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),

    /// A boolean value.
    Bool(bool),

    /// An integer value.
    Int(i64),

    /// A floating-point value.
    ///
    /// Integral values within the range of exactly representable integers serialize without a fractional part, the
    /// way JavaScript formats numbers.
    #[serde(serialize_with = "serialize_double")]
    Double(f64),

    /// An array of values.
    Array(Vec<AttributeValue>),

    /// A map of values.
    Map(FastIndexMap<String, AttributeValue>),
}

/// Largest magnitude below which every integer is exactly representable as an `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn serialize_double<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.fract() == 0.0 && value.abs() < MAX_SAFE_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(values: Vec<AttributeValue>) -> Self {
        Self::Array(values)
    }
}

/// A link from a span to another span, possibly in a different trace.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanLink {
    /// Low 64 bits of the linked trace identifier.
    pub trace_id: u64,
    /// High 64 bits of the linked trace identifier, if it is a 128-bit identifier.
    pub trace_id_high: Option<u64>,
    /// Identifier of the linked span.
    pub span_id: u64,
    /// Link attributes.
    pub attributes: FastIndexMap<String, String>,
    /// W3C trace state of the linked span.
    pub tracestate: Option<String>,
    /// W3C trace flags of the linked span.
    pub flags: Option<u32>,
}

impl SpanLink {
    /// Creates a new span link to the given trace and span.
    pub fn new(trace_id: u64, span_id: u64) -> Self {
        Self {
            trace_id,
            span_id,
            ..Self::default()
        }
    }

    /// Sets the high 64 bits of the linked trace identifier.
    pub fn with_trace_id_high(mut self, trace_id_high: u64) -> Self {
        self.trace_id_high = Some(trace_id_high);
        self
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the trace state.
    pub fn with_tracestate(mut self, tracestate: impl Into<String>) -> Self {
        self.tracestate = Some(tracestate.into());
        self
    }

    /// Sets the trace flags.
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = Some(flags);
        self
    }
}
