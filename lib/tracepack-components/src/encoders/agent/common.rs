use std::fmt::Write as _;

use serde::Serialize;
use tracepack_core::{
    collections::FastIndexMap,
    data_model::trace::{Span, SpanEvent, SpanLink, TagValue},
};
use tracing::debug;

/// Tag holding span events, for intakes that do not accept them natively.
pub(super) const SPAN_EVENTS_META_KEY: &str = "events";

/// Tag holding span links.
pub(super) const SPAN_LINKS_META_KEY: &str = "_dd.span_links";

/// A tag value, borrowed from a span.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum TagRef<'a> {
    Str(&'a str),
    Number(f64),
}

/// Tags derived from the structured fields of a span.
///
/// Span events, when not encoded natively, and span links are sent as JSON-encoded tags. A derived tag replaces any tag
/// of the same name already set on the span.
#[derive(Debug, Default)]
pub(super) struct DerivedMeta {
    events: Option<String>,
    links: Option<String>,
}

impl DerivedMeta {
    pub(super) fn from_span(span: &Span, include_events: bool) -> Self {
        let events = if include_events && !span.span_events.is_empty() {
            span_events_json(&span.span_events)
        } else {
            None
        };
        let links = if span.span_links.is_empty() {
            None
        } else {
            span_links_json(&span.span_links)
        };

        Self { events, links }
    }

    fn overrides(&self, key: &str) -> bool {
        (self.events.is_some() && key == SPAN_EVENTS_META_KEY) || (self.links.is_some() && key == SPAN_LINKS_META_KEY)
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let events = self.events.as_deref().map(|json| (SPAN_EVENTS_META_KEY, json));
        let links = self.links.as_deref().map(|json| (SPAN_LINKS_META_KEY, json));
        events.into_iter().chain(links)
    }
}

/// Collects the tags of a span that can be sent, followed by the derived tags.
///
/// Boolean tags are dropped.
pub(super) fn meta_entries<'a>(span: &'a Span, derived: &'a DerivedMeta) -> Vec<(&'a str, TagRef<'a>)> {
    let mut entries = Vec::with_capacity(span.meta.len() + 2);
    entries.extend(tag_entries(&span.meta).filter(|(key, _)| !derived.overrides(key)));
    entries.extend(derived.iter().map(|(key, json)| (key, TagRef::Str(json))));
    entries
}

/// Collects the numeric tags of a span that can be sent.
///
/// Boolean tags are dropped.
pub(super) fn metric_entries(span: &Span) -> Vec<(&str, TagRef<'_>)> {
    tag_entries(&span.metrics).collect()
}

fn tag_entries(tags: &FastIndexMap<String, TagValue>) -> impl Iterator<Item = (&str, TagRef<'_>)> {
    tags.iter().filter_map(|(key, value)| {
        let value = match value {
            TagValue::String(s) => TagRef::Str(s),
            TagValue::Number(n) => TagRef::Number(*n),
            TagValue::Bool(_) => return None,
        };
        Some((key.as_str(), value))
    })
}

fn span_events_json(events: &[SpanEvent]) -> Option<String> {
    match serde_json::to_string(events) {
        Ok(json) => Some(json),
        Err(e) => {
            debug!(error = %e, "Failed to serialize span events. Skipping.");
            None
        }
    }
}

#[derive(Serialize)]
struct EncodedSpanLink<'a> {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a FastIndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tracestate: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flags: Option<u32>,
}

impl<'a> From<&'a SpanLink> for EncodedSpanLink<'a> {
    fn from(link: &'a SpanLink) -> Self {
        Self {
            trace_id: format!("{:016x}{:016x}", link.trace_id_high.unwrap_or_default(), link.trace_id),
            span_id: format!("{:016x}", link.span_id),
            attributes: (!link.attributes.is_empty()).then_some(&link.attributes),
            tracestate: link.tracestate.as_deref(),
            // Only the sampled bit is carried.
            flags: link.flags.map(|flags| flags & 1),
        }
    }
}

fn span_links_json(links: &[SpanLink]) -> Option<String> {
    let links = links.iter().map(EncodedSpanLink::from).collect::<Vec<_>>();
    match serde_json::to_string(&links) {
        Ok(json) => Some(json),
        Err(e) => {
            debug!(error = %e, "Failed to serialize span links. Skipping.");
            None
        }
    }
}

/// Formats bytes as space-separated lowercase hex pairs, each preceded by a space.
pub(super) fn hex_dump(bytes: &[u8]) -> String {
    let mut dump = String::with_capacity(bytes.len() * 3);
    for byte in bytes {
        let _ = write!(dump, " {:02x}", byte);
    }
    dump
}

/// Logs the bytes of a freshly encoded trace.
pub(super) fn log_encoded_trace(encoded: &[u8]) {
    debug!("Adding encoded trace to buffer:{}", hex_dump(encoded));
}

/// Captures the messages of every event emitted while `f` runs on the current thread.
#[cfg(test)]
pub(super) fn capture_log_messages<F>(f: F) -> Vec<String>
where
    F: FnOnce(),
{
    use std::sync::{Arc, Mutex};

    use tracing::{field::Visit, Event, Subscriber};
    use tracing_subscriber::{
        layer::{Context, SubscriberExt as _},
        Layer, Registry,
    };

    #[derive(Default)]
    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                let _ = write!(self.0, "{:?}", value);
            }
        }

        fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
            if field.name() == "message" {
                self.0.push_str(value);
            }
        }
    }

    struct CapturingLayer(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for CapturingLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.0);
        }
    }

    let messages = Arc::new(Mutex::new(Vec::new()));
    let subscriber = Registry::default().with(CapturingLayer(Arc::clone(&messages)));
    tracing::subscriber::with_default(subscriber, f);

    let captured = messages.lock().unwrap().clone();
    captured
}
