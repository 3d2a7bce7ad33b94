use bytes::Bytes;
use tracepack_core::{collections::FastIndexSet, data_model::trace::Span};
use tracepack_io::{buf::GrowableBuffer, msgpack::*};
use tracing::debug;

use super::{
    common::{log_encoded_trace, meta_entries, metric_entries, DerivedMeta, TagRef},
    flush::{SoftLimit, DEFAULT_SOFT_LIMIT_BYTES},
    FlushSignal, ProtocolVersion, TraceEncoder,
};
use crate::transforms::normalize::{prepare_span, wire_trace_id};

/// Number of elements in an encoded span.
const SPAN_ELEMENT_COUNT: usize = 12;

/// A `v0.5` trace payload encoder.
///
/// Spans are encoded as fixed-size arrays, and every string is replaced by its index in a string table which is sent
/// once, ahead of the traces, in each payload.
#[derive(Debug)]
pub struct AgentEncoderV05 {
    strings: FastIndexSet<String>,
    string_bytes: GrowableBuffer,
    trace_bytes: GrowableBuffer,
    trace_count: usize,
    soft_limit: SoftLimit,
    debug_encoding: bool,
}

impl AgentEncoderV05 {
    /// Creates a new `AgentEncoderV05` that raises `flush` when the pending payload grows past the soft limit.
    pub fn new<F>(flush: F) -> Self
    where
        F: FlushSignal + 'static,
    {
        let chunk_size = tracepack_io::buf::DEFAULT_CHUNK_SIZE;
        let mut encoder = Self {
            strings: FastIndexSet::default(),
            string_bytes: GrowableBuffer::with_chunk_size(chunk_size),
            trace_bytes: GrowableBuffer::with_chunk_size(chunk_size),
            trace_count: 0,
            soft_limit: SoftLimit::new(DEFAULT_SOFT_LIMIT_BYTES, Box::new(flush)),
            debug_encoding: false,
        };
        encoder.seed_strings();
        encoder
    }

    /// Sets the minimum step, in bytes, by which the encoding buffers grow.
    ///
    /// Any pending data is discarded.
    pub fn with_buffer_chunk_size(mut self, chunk_size: usize) -> Self {
        self.string_bytes = GrowableBuffer::with_chunk_size(chunk_size);
        self.trace_bytes = GrowableBuffer::with_chunk_size(chunk_size);
        self.trace_count = 0;
        self.seed_strings();
        self
    }

    /// Sets the size, in bytes, past which a flush is requested.
    pub fn with_soft_limit_bytes(mut self, soft_limit_bytes: usize) -> Self {
        self.soft_limit.set_limit_bytes(soft_limit_bytes);
        self
    }

    /// Sets whether the bytes of every encoded trace are logged.
    pub fn with_debug_encoding(mut self, debug_encoding: bool) -> Self {
        self.debug_encoding = debug_encoding;
        self
    }

    // Index 0 is always the empty string.
    fn seed_strings(&mut self) {
        self.strings.clear();
        self.string_bytes.clear();
        self.string_index("");
    }

    /// Returns the index of `value` in the string table, adding it if it is not yet present.
    fn string_index(&mut self, value: &str) -> u32 {
        let index = match self.strings.get_index_of(value) {
            Some(index) => index,
            None => {
                self.string_bytes.write_str(value);
                self.strings.insert_full(value.to_string()).0
            }
        };

        // A payload never holds anywhere close to `u32::MAX` distinct strings.
        index as u32
    }

    fn write_string(&mut self, value: &str) {
        let index = self.string_index(value);
        write_uint32(&mut self.trace_bytes, index);
    }

    fn encode_span(&mut self, span: &Span) {
        let derived = DerivedMeta::from_span(span, true);

        write_array_header(&mut self.trace_bytes, SPAN_ELEMENT_COUNT);
        self.write_string(&span.service);
        self.write_string(&span.name);
        self.write_string(&span.resource);
        write_id64(&mut self.trace_bytes, wire_trace_id(span.trace_id));
        write_id64(&mut self.trace_bytes, span.span_id);
        write_id64(&mut self.trace_bytes, span.parent_id);
        write_long64(&mut self.trace_bytes, span.start);
        write_long64(&mut self.trace_bytes, span.duration);
        write_int32(&mut self.trace_bytes, span.error);

        // Meta values are always strings, and metric values always numbers.
        let meta = meta_entries(span, &derived)
            .into_iter()
            .filter_map(|(key, value)| match value {
                TagRef::Str(value) => Some((key, value)),
                TagRef::Number(_) => None,
            })
            .collect::<Vec<_>>();
        write_map_header(&mut self.trace_bytes, meta.len());
        for (key, value) in meta {
            self.write_string(key);
            self.write_string(value);
        }

        let metrics = metric_entries(span)
            .into_iter()
            .filter_map(|(key, value)| match value {
                TagRef::Number(value) => Some((key, value)),
                TagRef::Str(_) => None,
            })
            .collect::<Vec<_>>();
        write_map_header(&mut self.trace_bytes, metrics.len());
        for (key, value) in metrics {
            self.write_string(key);
            write_float64(&mut self.trace_bytes, value);
        }

        self.write_string(span.span_type.as_deref().unwrap_or_default());
    }

    fn reset(&mut self) {
        self.trace_bytes.clear();
        self.trace_count = 0;
        self.seed_strings();
        self.soft_limit.reset();
    }
}

impl TraceEncoder for AgentEncoderV05 {
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

        self.soft_limit.check(self.trace_bytes.len(), self.string_bytes.len());
    }

    fn make_payload(&mut self) -> Bytes {
        let mut payload =
            GrowableBuffer::with_chunk_size(1 + 5 + self.string_bytes.len() + 5 + self.trace_bytes.len());
        write_array_header(&mut payload, 2);
        write_array32_header(&mut payload, self.strings.len());
        payload.put_slice(self.string_bytes.as_slice());
        write_array32_header(&mut payload, self.trace_count);
        payload.put_slice(self.trace_bytes.as_slice());

        debug!(
            traces = self.trace_count,
            strings = self.strings.len(),
            payload_len = payload.len(),
            "Created v0.5 trace payload."
        );

        self.reset();
        payload.freeze()
    }

    fn count(&self) -> usize {
        self.trace_count
    }

    fn protocol(&self) -> ProtocolVersion {
        ProtocolVersion::V05
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use rmpv::Value;
    use similar_asserts::assert_eq;
    use tracepack_core::data_model::trace::{SpanEvent, SpanLink};

    use super::*;
    use crate::encoders::{agent::common::capture_log_messages, NoopFlush};

    fn test_span() -> Span {
        Span::new(0x1234abcd1234abcd, 0x1234abcd1234abcd, 0x1234abcd1234abcd)
            .with_name("test")
            .with_resource("test-r")
            .with_service("test-s")
            .with_timing(123123123123123120, 456456456456456456)
            .with_meta("bar", "baz")
            .with_metric("example", 1.0)
    }

    struct Decoded {
        strings: Vec<String>,
        traces: Vec<Value>,
    }

    impl Decoded {
        fn resolve(&self, value: &Value) -> &str {
            &self.strings[value.as_u64().unwrap() as usize]
        }

        fn span(&self, trace: usize, span: usize) -> &[Value] {
            self.traces[trace].as_array().unwrap()[span].as_array().unwrap()
        }
    }

    fn decode(bytes: &[u8]) -> Decoded {
        let mut reader = bytes;
        let value = rmpv::decode::read_value(&mut reader).unwrap();
        assert!(reader.is_empty(), "trailing bytes after payload");

        let parts = value.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        Decoded {
            strings: parts[0]
                .as_array()
                .unwrap()
                .iter()
                .map(|s| s.as_str().unwrap().to_string())
                .collect(),
            traces: parts[1].as_array().unwrap().clone(),
        }
    }

    fn resolved_map(decoded: &Decoded, map: &Value) -> Vec<(String, String)> {
        map.as_map()
            .unwrap()
            .iter()
            .map(|(k, v)| (decoded.resolve(k).to_string(), decoded.resolve(v).to_string()))
            .collect()
    }

    #[test]
    fn string_table_scenario() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        encoder.encode(&[test_span()]);
        let decoded = decode(&encoder.make_payload());

        assert_eq!(
            decoded.strings,
            vec!["", "test-s", "test", "test-r", "bar", "baz", "example"]
        );
        assert_eq!(decoded.traces.len(), 1);

        let span = decoded.span(0, 0);
        assert_eq!(span.len(), 12);
        assert_eq!(decoded.resolve(&span[0]), "test-s");
        assert_eq!(decoded.resolve(&span[1]), "test");
        assert_eq!(decoded.resolve(&span[2]), "test-r");
        assert_eq!(span[3].as_u64(), Some(0x1234abcd1234abcd));
        assert_eq!(span[4].as_u64(), Some(0x1234abcd1234abcd));
        assert_eq!(span[5].as_u64(), Some(0x1234abcd1234abcd));
        assert_eq!(span[6].as_i64(), Some(123123123123123120));
        assert_eq!(span[7].as_i64(), Some(456456456456456456));
        assert_eq!(span[8].as_i64(), Some(0));
        assert_eq!(
            resolved_map(&decoded, &span[9]),
            vec![("bar".to_string(), "baz".to_string())]
        );
        let metrics = span[10].as_map().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(decoded.resolve(&metrics[0].0), "example");
        assert_eq!(metrics[0].1.as_f64(), Some(1.0));
        assert_eq!(decoded.resolve(&span[11]), "");
    }

    #[test]
    fn indices_are_fixed_width() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        encoder.encode(&[test_span()]);
        let payload = encoder.make_payload();

        // Payload header, string table, both array32 headers, then the span's fixarray header.
        let table_len = 1 + 5 + (1 + 7 + 5 + 7 + 4 + 4 + 8);
        let span_start = table_len + 5 + 5 + 1;
        assert_eq!(&payload[span_start..span_start + 5], &[0xCE, 0, 0, 0, 1]);
    }

    #[test]
    fn empty_payload_after_reset() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        encoder.encode(&[test_span()]);
        assert_eq!(encoder.count(), 1);
        encoder.make_payload();

        assert_eq!(encoder.count(), 0);
        assert_eq!(
            &encoder.make_payload()[..],
            &[0x92, 0xDD, 0, 0, 0, 1, 0xA0, 0xDD, 0, 0, 0, 0]
        );
    }

    #[test]
    fn reset_matches_fresh_encoder() {
        let mut reused = AgentEncoderV05::new(NoopFlush);
        reused.encode(&[test_span().with_meta("other", "value")]);
        reused.make_payload();
        reused.encode(&[test_span()]);

        let mut fresh = AgentEncoderV05::new(NoopFlush);
        fresh.encode(&[test_span()]);

        assert_eq!(reused.make_payload(), fresh.make_payload());
    }

    #[test]
    fn strings_interned_once() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        encoder.encode(&vec![test_span(); 100]);
        let decoded = decode(&encoder.make_payload());

        assert_eq!(decoded.strings.iter().filter(|s| *s == "test-s").count(), 1);
        let spans = decoded.traces[0].as_array().unwrap();
        assert_eq!(spans.len(), 100);
        for span in spans {
            assert_eq!(span.as_array().unwrap()[0].as_u64(), Some(1));
        }
    }

    #[test]
    fn tags_keep_matching_kinds_only() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        let span = test_span()
            .with_span_type(Some("web".to_string()))
            .with_meta("count", 2.0)
            .with_meta("flag", true)
            .with_metric("label", "x")
            .with_metric("enabled", false);
        encoder.encode(&[span]);
        let decoded = decode(&encoder.make_payload());
        let span = decoded.span(0, 0);

        assert_eq!(
            resolved_map(&decoded, &span[9]),
            vec![("bar".to_string(), "baz".to_string())]
        );
        assert_eq!(span[10].as_map().unwrap().len(), 1);
        assert_eq!(decoded.resolve(&span[11]), "web");
    }

    #[test]
    fn events_and_links_as_json_tags() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        let span = test_span()
            .with_span_event(SpanEvent::new("Something went so wrong", 1_000_000))
            .with_span_link(
                SpanLink::new(0x1234abcd1234abcd, 0x1234abcd1234abcd)
                    .with_trace_id_high(0x10)
                    .with_flags(3),
            );
        encoder.encode(&[span]);
        let decoded = decode(&encoder.make_payload());

        assert_eq!(
            resolved_map(&decoded, &decoded.span(0, 0)[9]),
            vec![
                ("bar".to_string(), "baz".to_string()),
                (
                    "events".to_string(),
                    r#"[{"name":"Something went so wrong","time_unix_nano":1000000}]"#.to_string()
                ),
                (
                    "_dd.span_links".to_string(),
                    r#"[{"trace_id":"00000000000000101234abcd1234abcd","span_id":"1234abcd1234abcd","flags":1}]"#
                        .to_string()
                ),
            ]
        );
    }

    #[test]
    fn normalizes_spans() {
        let mut encoder = AgentEncoderV05::new(NoopFlush);
        let mut span = test_span()
            .with_service("")
            .with_name("")
            .with_resource("")
            .with_meta("long", "x".repeat(30000));
        span.trace_id = 0xffff_0000_0000_0000_0000_0000_0000_0001;
        encoder.encode(&[span]);
        let decoded = decode(&encoder.make_payload());
        let span = decoded.span(0, 0);

        assert_eq!(decoded.resolve(&span[0]), "unnamed-service");
        assert_eq!(decoded.resolve(&span[1]), "unnamed_operation");
        assert_eq!(decoded.resolve(&span[2]), "unnamed_operation");
        assert_eq!(span[3].as_u64(), Some(1));
        let meta = resolved_map(&decoded, &span[9]);
        assert_eq!(meta[1].1.chars().count(), 25003);
    }

    #[test]
    fn soft_limit_requests_flush_once() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&flushes);
        let mut encoder = AgentEncoderV05::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .with_soft_limit_bytes(1024);

        encoder.encode(&[test_span()]);
        assert_eq!(flushes.load(Ordering::Relaxed), 0);

        encoder.encode(&[test_span().with_meta("big", "x".repeat(2048))]);
        encoder.encode(&[test_span().with_meta("bigger", "y".repeat(2048))]);
        assert_eq!(flushes.load(Ordering::Relaxed), 1);

        encoder.make_payload();
        encoder.encode(&[test_span().with_meta("big", "x".repeat(2048))]);
        assert_eq!(flushes.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn debug_encoding_logs_trace_bytes() {
        let mut encoder = AgentEncoderV05::new(NoopFlush).with_debug_encoding(true);
        let messages = capture_log_messages(|| encoder.encode(&[test_span()]));

        let dumps = messages
            .iter()
            .filter(|message| message.starts_with("Adding encoded trace"))
            .collect::<Vec<_>>();
        assert_eq!(dumps.len(), 1);
        // Trace header, then the span's fixarray header and its service index.
        assert!(dumps[0].starts_with("Adding encoded trace to buffer: dd 00 00 00 01 9c ce 00 00 00 01"));

        let mut encoder = AgentEncoderV05::new(NoopFlush);
        let messages = capture_log_messages(|| encoder.encode(&[test_span()]));
        assert!(messages.iter().all(|message| !message.starts_with("Adding encoded trace")));
    }
}
