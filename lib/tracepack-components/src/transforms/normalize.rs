//! Span normalization and truncation.
//!
//! Before a span is encoded, its fields are brought within the limits accepted by the trace agent. Normalization fills
//! in missing identifying fields and caps their length, while truncation caps the length of the free-form fields,
//! marking each cut with [`TRUNCATION_SUFFIX`].
//!
//! All lengths are counted in characters, and cuts always land on a character boundary. Every function here is total
//! and idempotent: applying it to an already-prepared span changes nothing.

use std::borrow::Cow;

use tracepack_core::{
    collections::FastIndexMap,
    data_model::trace::{Span, TagValue},
};
use tracing::debug;

/// Maximum length of a service name.
pub const MAX_SERVICE_LEN: usize = 100;

/// Maximum length of an operation name.
pub const MAX_NAME_LEN: usize = 100;

/// Maximum length of a span type.
pub const MAX_TYPE_LEN: usize = 100;

/// Maximum length of a resource name, before the truncation suffix.
pub const MAX_RESOURCE_LEN: usize = 5000;

/// Maximum length of a tag key, before the truncation suffix.
pub const MAX_META_KEY_LEN: usize = 200;

/// Maximum length of a tag value, before the truncation suffix.
pub const MAX_META_VALUE_LEN: usize = 25000;

/// Maximum length of a numeric tag key, before the truncation suffix.
pub const MAX_METRIC_KEY_LEN: usize = 200;

/// Suffix appended to truncated resources and tags.
pub const TRUNCATION_SUFFIX: &str = "...";

/// Service name used when a span has none.
pub const DEFAULT_SERVICE_NAME: &str = "unnamed-service";

/// Operation name used when a span has none.
pub const DEFAULT_SPAN_NAME: &str = "unnamed_operation";

/// Returns the identifier sent on the wire for the given trace identifier.
///
/// Only the low 64 bits of a 128-bit trace identifier are sent.
pub const fn wire_trace_id(trace_id: u128) -> u64 {
    trace_id as u64
}

/// Fills in missing identifying fields and caps their length.
///
/// - an empty service becomes [`DEFAULT_SERVICE_NAME`], otherwise it is capped at [`MAX_SERVICE_LEN`]
/// - an empty name becomes [`DEFAULT_SPAN_NAME`], otherwise it is capped at [`MAX_NAME_LEN`]
/// - an empty resource becomes the (normalized) name
/// - a span type, if present, is capped at [`MAX_TYPE_LEN`]
///
/// No truncation suffix is added by these rules.
pub fn normalize_span(span: &mut Span) {
    if span.service.is_empty() {
        span.service = DEFAULT_SERVICE_NAME.to_string();
    } else if cap_in_place(&mut span.service, MAX_SERVICE_LEN) {
        debug!(service = %span.service, "Service name is too long, truncated.");
    }

    if span.name.is_empty() {
        span.name = DEFAULT_SPAN_NAME.to_string();
    } else if cap_in_place(&mut span.name, MAX_NAME_LEN) {
        debug!(name = %span.name, "Span name is too long, truncated.");
    }

    if span.resource.is_empty() {
        span.resource = span.name.clone();
    }

    if let Some(span_type) = span.span_type.as_mut() {
        cap_in_place(span_type, MAX_TYPE_LEN);
    }
}

/// Truncates the resource and tags of a span.
///
/// The resource is cut to [`MAX_RESOURCE_LEN`], tag keys to [`MAX_META_KEY_LEN`], string tag values to
/// [`MAX_META_VALUE_LEN`] and numeric tag keys to [`MAX_METRIC_KEY_LEN`]. Each cut value has [`TRUNCATION_SUFFIX`]
/// appended. Numeric values are never modified.
pub fn truncate_span(span: &mut Span) {
    truncate_in_place(&mut span.resource, MAX_RESOURCE_LEN);

    if needs_tag_truncation(&span.meta, MAX_META_KEY_LEN, Some(MAX_META_VALUE_LEN)) {
        span.meta = truncate_tags(std::mem::take(&mut span.meta), MAX_META_KEY_LEN, Some(MAX_META_VALUE_LEN));
    }

    if needs_tag_truncation(&span.metrics, MAX_METRIC_KEY_LEN, None) {
        span.metrics = truncate_tags(std::mem::take(&mut span.metrics), MAX_METRIC_KEY_LEN, None);
    }
}

/// Prepares a span for encoding.
///
/// Applies [`normalize_span`] and then [`truncate_span`]. The span is only cloned if one of the rules would change it.
pub fn prepare_span(span: &Span) -> Cow<'_, Span> {
    if !needs_preparation(span) {
        return Cow::Borrowed(span);
    }

    let mut prepared = span.clone();
    normalize_span(&mut prepared);
    truncate_span(&mut prepared);
    Cow::Owned(prepared)
}

fn needs_preparation(span: &Span) -> bool {
    span.service.is_empty()
        || span.name.is_empty()
        || span.resource.is_empty()
        || exceeds(&span.service, MAX_SERVICE_LEN)
        || exceeds(&span.name, MAX_NAME_LEN)
        || span.span_type.as_deref().is_some_and(|t| exceeds(t, MAX_TYPE_LEN))
        || truncation_changes(&span.resource, MAX_RESOURCE_LEN)
        || needs_tag_truncation(&span.meta, MAX_META_KEY_LEN, Some(MAX_META_VALUE_LEN))
        || needs_tag_truncation(&span.metrics, MAX_METRIC_KEY_LEN, None)
}

fn needs_tag_truncation(
    tags: &FastIndexMap<String, TagValue>, max_key_len: usize, max_value_len: Option<usize>,
) -> bool {
    tags.iter().any(|(key, value)| {
        truncation_changes(key, max_key_len)
            || match (value, max_value_len) {
                (TagValue::String(value), Some(max_value_len)) => truncation_changes(value, max_value_len),
                _ => false,
            }
    })
}

fn truncate_tags(
    tags: FastIndexMap<String, TagValue>, max_key_len: usize, max_value_len: Option<usize>,
) -> FastIndexMap<String, TagValue> {
    tags.into_iter()
        .map(|(mut key, mut value)| {
            truncate_in_place(&mut key, max_key_len);
            if let (TagValue::String(value), Some(max_value_len)) = (&mut value, max_value_len) {
                truncate_in_place(value, max_value_len);
            }
            (key, value)
        })
        .collect()
}

/// Returns the byte offset of the character at `max_chars`, if `value` is longer than `max_chars` characters.
fn char_boundary(value: &str, max_chars: usize) -> Option<usize> {
    // A string can't have more characters than bytes.
    if value.len() <= max_chars {
        return None;
    }
    value.char_indices().nth(max_chars).map(|(idx, _)| idx)
}

fn exceeds(value: &str, max_chars: usize) -> bool {
    char_boundary(value, max_chars).is_some()
}

/// Returns `true` if truncating `value` to `max_chars` would change it.
///
/// A value already cut to `max_chars` and suffixed is left as is.
fn truncation_changes(value: &str, max_chars: usize) -> bool {
    char_boundary(value, max_chars).is_some_and(|idx| &value[idx..] != TRUNCATION_SUFFIX)
}

fn cap_in_place(value: &mut String, max_chars: usize) -> bool {
    match char_boundary(value, max_chars) {
        Some(idx) => {
            value.truncate(idx);
            true
        }
        None => false,
    }
}

fn truncate_in_place(value: &mut String, max_chars: usize) {
    if truncation_changes(value, max_chars) && cap_in_place(value, max_chars) {
        value.push_str(TRUNCATION_SUFFIX);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn base_span() -> Span {
        Span::new(1, 2, 0)
            .with_name("web.request")
            .with_service("api")
            .with_resource("GET /")
    }

    #[test]
    fn defaults_missing_fields() {
        let mut span = Span::new(1, 2, 0);
        normalize_span(&mut span);

        assert_eq!(span.service, DEFAULT_SERVICE_NAME);
        assert_eq!(span.name, DEFAULT_SPAN_NAME);
        assert_eq!(span.resource, DEFAULT_SPAN_NAME);
        assert_eq!(span.span_type, None);
    }

    #[test]
    fn resource_defaults_to_capped_name() {
        let mut span = Span::new(1, 2, 0).with_name("n".repeat(150));
        normalize_span(&mut span);

        assert_eq!(span.name.chars().count(), MAX_NAME_LEN);
        assert_eq!(span.resource, span.name);
    }

    #[test]
    fn caps_identifying_fields_without_suffix() {
        let mut span = base_span()
            .with_service("s".repeat(101))
            .with_span_type(Some("t".repeat(200)));
        normalize_span(&mut span);

        assert_eq!(span.service, "s".repeat(100));
        assert_eq!(span.span_type, Some("t".repeat(100)));
    }

    #[test]
    fn truncates_resource_and_tags() {
        let mut span = base_span()
            .with_resource("r".repeat(6000))
            .with_meta("k".repeat(250), "v")
            .with_meta("long", "v".repeat(30000))
            .with_meta("flag", true)
            .with_metric("m".repeat(201), 42.0);
        truncate_span(&mut span);

        assert_eq!(span.resource.len(), 5003);
        assert!(span.resource.ends_with(TRUNCATION_SUFFIX));

        let keys = span.meta.keys().map(|k| k.len()).collect::<Vec<_>>();
        assert_eq!(keys, vec![203, 4, 4]);
        assert_eq!(span.meta.get("long").and_then(TagValue::as_str).map(str::len), Some(25003));
        assert_eq!(span.meta.get("flag"), Some(&TagValue::Bool(true)));

        let (metric_key, metric_value) = span.metrics.first().unwrap();
        assert_eq!(metric_key.len(), 203);
        assert_eq!(metric_value, &TagValue::Number(42.0));
    }

    #[test]
    fn truncation_counts_characters() {
        let mut span = base_span().with_resource("é".repeat(5001));
        truncate_span(&mut span);

        assert_eq!(span.resource.chars().count(), 5003);
        assert!(span.resource.starts_with(&"é".repeat(5000)));
        assert!(span.resource.ends_with(TRUNCATION_SUFFIX));

        // Exactly at the limit in characters, but well over it in bytes.
        let mut span = base_span().with_resource("é".repeat(5000));
        truncate_span(&mut span);
        assert_eq!(span.resource.chars().count(), 5000);
    }

    #[test]
    fn prepare_span_borrows_when_unchanged() {
        let span = base_span().with_meta("a", "b").with_metric("c", 1.0);
        assert!(matches!(prepare_span(&span), Cow::Borrowed(_)));

        let span = span.with_service("");
        let prepared = prepare_span(&span);
        assert!(matches!(prepared, Cow::Owned(_)));
        assert_eq!(prepared.service, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn wire_trace_id_keeps_low_bits() {
        assert_eq!(
            wire_trace_id(0xffff_ffff_ffff_ffff_1234_abcd_1234_abcd),
            0x1234_abcd_1234_abcd
        );
        assert_eq!(wire_trace_id(7), 7);
    }

    fn arb_text() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-z]{0,120}",
            "[a-zé🐶]{90,130}",
            (0usize..6100).prop_map(|len| "x".repeat(len)),
        ]
    }

    proptest! {
        #[test]
        fn property_test_prepare_is_idempotent(
            name in arb_text(),
            service in arb_text(),
            resource in arb_text(),
            key in arb_text(),
            value in arb_text(),
        ) {
            let span = Span::new(1, 1, 0)
                .with_name(name)
                .with_service(service)
                .with_resource(resource)
                .with_meta(key.clone(), value)
                .with_metric(key, 1.0);

            let once = prepare_span(&span).into_owned();
            let twice = prepare_span(&once);

            prop_assert!(matches!(twice, Cow::Borrowed(_)));
            prop_assert!(once.name.chars().count() <= MAX_NAME_LEN);
            prop_assert!(once.service.chars().count() <= MAX_SERVICE_LEN);
            prop_assert!(once.resource.chars().count() <= MAX_RESOURCE_LEN + TRUNCATION_SUFFIX.len());
            prop_assert!(!once.name.is_empty() && !once.service.is_empty() && !once.resource.is_empty());
        }
    }
}
