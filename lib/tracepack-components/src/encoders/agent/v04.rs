use bytes::Bytes;
use tracepack_core::{
    collections::{FastHashMap, FastHashSet},
    data_model::trace::{AttributeValue, MetaStruct, MetaStructId, MetaStructValue, Span, SpanEvent},
};
use tracepack_io::{buf::GrowableBuffer, msgpack::*};
use tracing::debug;

use super::{
    common::{log_encoded_trace, meta_entries, metric_entries, DerivedMeta, TagRef},
    flush::{SoftLimit, DEFAULT_SOFT_LIMIT_BYTES},
    FlushSignal, ProtocolVersion, TraceEncoder,
};
use crate::transforms::normalize::{prepare_span, wire_trace_id};

/// Number of fields present in every encoded span.
const BASE_SPAN_FIELD_COUNT: usize = 11;

/// Number of unsupported span event attribute keys remembered for deduplicating logs.
const MAX_LOGGED_UNSUPPORTED_KEYS: usize = 1024;

const ATTRIBUTE_TYPE_STRING: u64 = 0;
const ATTRIBUTE_TYPE_BOOL: u64 = 1;
const ATTRIBUTE_TYPE_INT: u64 = 2;
const ATTRIBUTE_TYPE_DOUBLE: u64 = 3;
const ATTRIBUTE_TYPE_ARRAY: u64 = 4;

/// Encoded strings, each written once and then copied on every use.
#[derive(Debug)]
struct StringCache {
    bytes: GrowableBuffer,
    ranges: FastHashMap<String, (usize, usize)>,
}

impl StringCache {
    fn new(chunk_size: usize) -> Self {
        Self {
            bytes: GrowableBuffer::with_chunk_size(chunk_size),
            ranges: FastHashMap::default(),
        }
    }

    fn write(&mut self, value: &str, target: &mut GrowableBuffer) {
        let (start, end) = match self.ranges.get(value) {
            Some(range) => *range,
            None => {
                let start = self.bytes.len();
                let written = self.bytes.write_str(value);
                let range = (start, start + written);
                self.ranges.insert(value.to_string(), range);
                range
            }
        };
        self.bytes.copy_into(target, start, end);
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn clear(&mut self) {
        self.bytes.clear();
        self.ranges.clear();
    }
}

#[derive(Clone, Copy)]
enum NativeScalar<'a> {
    String(&'a str),
    Bool(bool),
    Int(i64),
    Double(f64),
}

impl<'a> NativeScalar<'a> {
    fn from_attribute(value: &'a AttributeValue) -> Option<Self> {
        match value {
            AttributeValue::String(s) => Some(Self::String(s)),
            AttributeValue::Bool(b) => Some(Self::Bool(*b)),
            AttributeValue::Int(i) => Some(Self::Int(*i)),
            AttributeValue::Double(d) => Some(Self::Double(*d)),
            AttributeValue::Array(_) | AttributeValue::Map(_) => None,
        }
    }
}

enum NativeAttribute<'a> {
    Scalar(NativeScalar<'a>),
    Array(Vec<NativeScalar<'a>>),
}

/// A `v0.4` trace payload encoder.
///
/// Every span is encoded as a map keyed by field name, and a payload is an array of traces, each an array of spans.
/// Strings are encoded once per payload and copied from a cache on every subsequent use.
#[derive(Debug)]
pub struct AgentEncoderV04 {
    trace_bytes: GrowableBuffer,
    strings: StringCache,
    trace_count: usize,
    soft_limit: SoftLimit,
    native_span_events: bool,
    debug_encoding: bool,
    logged_unsupported_keys: FastHashSet<String>,
}

impl AgentEncoderV04 {
    /// Creates a new `AgentEncoderV04` that raises `flush` when the pending payload grows past the soft limit.
    pub fn new<F>(flush: F) -> Self
    where
        F: FlushSignal + 'static,
    {
        let chunk_size = tracepack_io::buf::DEFAULT_CHUNK_SIZE;
        Self {
            trace_bytes: GrowableBuffer::with_chunk_size(chunk_size),
            strings: StringCache::new(chunk_size),
            trace_count: 0,
            soft_limit: SoftLimit::new(DEFAULT_SOFT_LIMIT_BYTES, Box::new(flush)),
            native_span_events: false,
            debug_encoding: false,
            logged_unsupported_keys: FastHashSet::default(),
        }
    }

    /// Sets the minimum step, in bytes, by which the encoding buffers grow.
    ///
    /// Any pending data is discarded.
    pub fn with_buffer_chunk_size(mut self, chunk_size: usize) -> Self {
        self.trace_bytes = GrowableBuffer::with_chunk_size(chunk_size);
        self.strings = StringCache::new(chunk_size);
        self.trace_count = 0;
        self
    }

    /// Sets the size, in bytes, past which a flush is requested.
    pub fn with_soft_limit_bytes(mut self, soft_limit_bytes: usize) -> Self {
        self.soft_limit.set_limit_bytes(soft_limit_bytes);
        self
    }

    /// Sets whether span events are encoded as a top-level span field.
    ///
    /// When disabled, span events are sent as a JSON-encoded tag instead.
    pub fn with_native_span_events(mut self, native_span_events: bool) -> Self {
        self.native_span_events = native_span_events;
        self
    }

    /// Sets whether the bytes of every encoded trace are logged.
    pub fn with_debug_encoding(mut self, debug_encoding: bool) -> Self {
        self.debug_encoding = debug_encoding;
        self
    }

    fn write_str(&mut self, value: &str) {
        self.strings.write(value, &mut self.trace_bytes);
    }

    fn encode_span(&mut self, span: &Span) {
        let derived = DerivedMeta::from_span(span, !self.native_span_events);
        let native_events = self.native_span_events && !span.span_events.is_empty();

        let field_count = BASE_SPAN_FIELD_COUNT
            + usize::from(span.span_type.is_some())
            + usize::from(span.meta_struct.is_some())
            + usize::from(native_events);
        write_map_header(&mut self.trace_bytes, field_count);

        if let Some(span_type) = &span.span_type {
            self.write_str("type");
            self.write_str(span_type);
        }

        self.write_str("trace_id");
        write_id64(&mut self.trace_bytes, wire_trace_id(span.trace_id));
        self.write_str("span_id");
        write_id64(&mut self.trace_bytes, span.span_id);
        self.write_str("parent_id");
        write_id64(&mut self.trace_bytes, span.parent_id);
        self.write_str("name");
        self.write_str(&span.name);
        self.write_str("resource");
        self.write_str(&span.resource);
        self.write_str("service");
        self.write_str(&span.service);
        self.write_str("error");
        write_int32(&mut self.trace_bytes, span.error);
        self.write_str("start");
        write_long64(&mut self.trace_bytes, span.start);
        self.write_str("duration");
        write_long64(&mut self.trace_bytes, span.duration);

        self.write_str("meta");
        self.write_tags(&meta_entries(span, &derived));
        self.write_str("metrics");
        self.write_tags(&metric_entries(span));

        if native_events {
            self.write_str("span_events");
            self.write_native_span_events(&span.span_events);
        }

        if let Some(meta_struct) = &span.meta_struct {
            self.write_str("meta_struct");
            self.write_meta_struct(meta_struct);
        }
    }

    fn write_tags(&mut self, entries: &[(&str, TagRef<'_>)]) {
        write_map_header(&mut self.trace_bytes, entries.len());
        for (key, value) in entries {
            self.write_str(key);
            match value {
                TagRef::Str(value) => self.write_str(value),
                TagRef::Number(value) => write_float64(&mut self.trace_bytes, *value),
            }
        }
    }

    fn write_native_span_events(&mut self, events: &[SpanEvent]) {
        write_array_header(&mut self.trace_bytes, events.len());
        for event in events {
            let attributes = self.native_attributes(event);

            write_map_header(&mut self.trace_bytes, 2 + usize::from(!attributes.is_empty()));
            self.write_str("name");
            self.write_str(&event.name);
            self.write_str("time_unix_nano");
            write_unsigned(&mut self.trace_bytes, event.time_unix_nano);

            if !attributes.is_empty() {
                self.write_str("attributes");
                write_map_header(&mut self.trace_bytes, attributes.len());
                for (key, attribute) in attributes {
                    self.write_str(key);
                    match attribute {
                        NativeAttribute::Scalar(scalar) => self.write_native_scalar(scalar),
                        NativeAttribute::Array(scalars) => {
                            write_map_header(&mut self.trace_bytes, 2);
                            self.write_str("type");
                            write_unsigned(&mut self.trace_bytes, ATTRIBUTE_TYPE_ARRAY);
                            self.write_str("array_value");
                            write_map_header(&mut self.trace_bytes, 1);
                            self.write_str("values");
                            write_array_header(&mut self.trace_bytes, scalars.len());
                            for scalar in scalars {
                                self.write_native_scalar(scalar);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Collects the attributes of `event` that can be encoded natively.
    ///
    /// Map values, and nested arrays within arrays, are dropped. Arrays left empty are dropped entirely.
    fn native_attributes<'a>(&mut self, event: &'a SpanEvent) -> Vec<(&'a str, NativeAttribute<'a>)> {
        let mut attributes = Vec::with_capacity(event.attributes.len());
        for (key, value) in &event.attributes {
            match value {
                AttributeValue::Array(values) => {
                    let scalars = values
                        .iter()
                        .filter_map(NativeScalar::from_attribute)
                        .collect::<Vec<_>>();
                    if scalars.len() != values.len() {
                        self.log_unsupported_attribute(key);
                    }
                    if !scalars.is_empty() {
                        attributes.push((key.as_str(), NativeAttribute::Array(scalars)));
                    }
                }
                value => match NativeScalar::from_attribute(value) {
                    Some(scalar) => attributes.push((key.as_str(), NativeAttribute::Scalar(scalar))),
                    None => self.log_unsupported_attribute(key),
                },
            }
        }
        attributes
    }

    fn log_unsupported_attribute(&mut self, key: &str) {
        if self.logged_unsupported_keys.contains(key) {
            return;
        }

        // Keys may be logged again once the set fills up.
        if self.logged_unsupported_keys.len() >= MAX_LOGGED_UNSUPPORTED_KEYS {
            self.logged_unsupported_keys.clear();
        }
        self.logged_unsupported_keys.insert(key.to_string());
        debug!(
            "Encountered unsupported data type for span event v0.4 encoding, key: {}",
            key
        );
    }

    fn write_native_scalar(&mut self, scalar: NativeScalar<'_>) {
        write_map_header(&mut self.trace_bytes, 2);
        self.write_str("type");
        match scalar {
            NativeScalar::String(value) => {
                write_unsigned(&mut self.trace_bytes, ATTRIBUTE_TYPE_STRING);
                self.write_str("string_value");
                self.write_str(value);
            }
            NativeScalar::Bool(value) => {
                write_unsigned(&mut self.trace_bytes, ATTRIBUTE_TYPE_BOOL);
                self.write_str("bool_value");
                write_bool(&mut self.trace_bytes, value);
            }
            NativeScalar::Int(value) => {
                write_unsigned(&mut self.trace_bytes, ATTRIBUTE_TYPE_INT);
                self.write_str("int_value");
                write_signed(&mut self.trace_bytes, value);
            }
            NativeScalar::Double(value) => {
                write_unsigned(&mut self.trace_bytes, ATTRIBUTE_TYPE_DOUBLE);
                self.write_str("double_value");
                write_float64(&mut self.trace_bytes, value);
            }
        }
    }

    /// Writes the structured metadata of a span.
    ///
    /// Each root entry is written as a binary value wrapping its own MessagePack encoding. A root that is not a map is
    /// written as an empty map.
    fn write_meta_struct(&mut self, meta_struct: &MetaStruct) {
        let entries = match meta_struct.get(meta_struct.root()) {
            Some(MetaStructValue::Map(entries)) => entries
                .iter()
                .filter(|(_, id)| is_encodable(meta_struct, *id))
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };

        write_map_header(&mut self.trace_bytes, entries.len());
        for (key, id) in entries {
            self.write_str(key);

            let offset = begin_bin32(&mut self.trace_bytes);
            let mut visited = FastHashSet::default();
            write_meta_struct_value(&mut self.trace_bytes, meta_struct, *id, &mut visited);
            finish_bin32(&mut self.trace_bytes, offset);
        }
    }

    fn reset(&mut self) {
        self.trace_bytes.clear();
        self.strings.clear();
        self.trace_count = 0;
        self.soft_limit.reset();
    }
}

impl TraceEncoder for AgentEncoderV04 {
    fn encode(&mut self, trace: &[Span]) {
        let start = self.trace_bytes.len();

        write_array32_header(&mut self.trace_bytes, trace.len());
        for span in trace {
            let span = prepare_span(span);
            self.encode_span(&span);
        }
        self.trace_count += 1;

        if self.debug_encoding {
            log_encoded_trace(&self.trace_bytes.as_slice()[start..]);
        }

        self.soft_limit.check(self.trace_bytes.len(), self.strings.len());
    }

    fn make_payload(&mut self) -> Bytes {
        let mut payload = GrowableBuffer::with_chunk_size(5 + self.trace_bytes.len());
        write_array32_header(&mut payload, self.trace_count);
        payload.put_slice(self.trace_bytes.as_slice());

        debug!(
            traces = self.trace_count,
            payload_len = payload.len(),
            "Created v0.4 trace payload."
        );

        self.reset();
        payload.freeze()
    }

    fn count(&self) -> usize {
        self.trace_count
    }

    fn protocol(&self) -> ProtocolVersion {
        ProtocolVersion::V04
    }
}

fn is_encodable(meta_struct: &MetaStruct, id: MetaStructId) -> bool {
    !matches!(
        meta_struct.get(id),
        None | Some(MetaStructValue::Null) | Some(MetaStructValue::Bool(_))
    )
}

fn is_container(meta_struct: &MetaStruct, id: MetaStructId) -> bool {
    matches!(
        meta_struct.get(id),
        Some(MetaStructValue::Array(_)) | Some(MetaStructValue::Map(_))
    )
}

fn is_writable_child(meta_struct: &MetaStruct, id: MetaStructId, visited: &FastHashSet<MetaStructId>) -> bool {
    is_encodable(meta_struct, id) && !(is_container(meta_struct, id) && visited.contains(&id))
}

/// Writes a node of a `MetaStruct`, and all of its descendants.
///
/// Null and boolean children are skipped, as are arrays and maps already present in `visited`, which breaks cycles.
/// Scalars are written wherever they appear.
fn write_meta_struct_value(
    buf: &mut GrowableBuffer, meta_struct: &MetaStruct, id: MetaStructId, visited: &mut FastHashSet<MetaStructId>,
) {
    if is_container(meta_struct, id) {
        visited.insert(id);
    }

    match meta_struct.get(id) {
        Some(MetaStructValue::Int(value)) => write_signed(buf, *value),
        Some(MetaStructValue::UInt(value)) => write_unsigned(buf, *value),
        Some(MetaStructValue::Float(value)) => write_float64(buf, *value),
        Some(MetaStructValue::String(value)) => {
            buf.write_str(value);
        }
        Some(MetaStructValue::Array(children)) => {
            let children = children
                .iter()
                .copied()
                .filter(|child| is_writable_child(meta_struct, *child, visited))
                .collect::<Vec<_>>();

            write_array_header(buf, children.len());
            for child in children {
                write_meta_struct_value(buf, meta_struct, child, visited);
            }
        }
        Some(MetaStructValue::Map(entries)) => {
            let entries = entries
                .iter()
                .filter(|(_, child)| is_writable_child(meta_struct, *child, visited))
                .collect::<Vec<_>>();

            write_map_header(buf, entries.len());
            for (key, child) in entries {
                buf.write_str(key);
                write_meta_struct_value(buf, meta_struct, *child, visited);
            }
        }
        // Skipped by callers.
        None | Some(MetaStructValue::Null) | Some(MetaStructValue::Bool(_)) => write_nil(buf),
    }
}
