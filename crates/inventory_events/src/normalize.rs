use tracing::{debug, warn};

use crate::{
    parse_timestamp, NormalizationContext, NormalizationWarning, NormalizedEvent, RawRecord,
};

/// Result of normalizing one record: the event plus any warning raised on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub event: NormalizedEvent,
    pub warning: Option<NormalizationWarning>,
}

/// Wraps `raw` in an envelope routed by `context`.
///
/// The record is moved into the envelope unchanged. When the context names a timestamp
/// field it is parsed into epoch seconds; a missing or unparseable value leaves `time`
/// unset and is reported as a warning instead of an error.
pub fn normalize(raw: RawRecord, context: &NormalizationContext) -> Normalized {
    let (time, warning) = match context.timestamp.as_ref() {
        None => (None, None),
        Some(spec) => match raw.lookup(&spec.field) {
            None => {
                debug!(field = %spec.field, "record has no timestamp field");
                (
                    None,
                    Some(NormalizationWarning::MissingTimestamp {
                        field: spec.field.clone(),
                    }),
                )
            }
            Some(value) => match parse_timestamp(value, &spec.format) {
                Ok(seconds) => (Some(seconds), None),
                Err(source) => {
                    warn!(
                        field = %spec.field,
                        format = %spec.format,
                        error = %source,
                        "unparseable timestamp, delivering event without time"
                    );
                    (
                        None,
                        Some(NormalizationWarning::UnparseableTimestamp {
                            field: spec.field.clone(),
                            source,
                        }),
                    )
                }
            },
        },
    };

    Normalized {
        event: NormalizedEvent {
            host: context.host.clone(),
            source: context.source.clone(),
            sourcetype: context.sourcetype.clone(),
            index: context.index.clone(),
            time,
            event: raw,
        },
        warning,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::TimestampFormat;

    fn ctx() -> NormalizationContext {
        NormalizationContext::new("inventory-host", "instances list", "cloud:instance", "inventory")
            .unwrap()
            .with_timestamp(Some("creationTimestamp"), Some(TimestampFormat::Iso8601))
            .unwrap()
    }

    fn record(value: serde_json::Value) -> RawRecord {
        RawRecord::from_value(value).unwrap()
    }

    #[test]
    fn event_is_an_unmodified_copy_of_the_record() {
        let raw = record(json!({"id": "a", "creationTimestamp": "2022-01-01T00:00:00.000Z"}));
        let out = normalize(raw.clone(), &ctx());
        assert_eq!(out.event.event, raw);
        assert_eq!(out.event.time, Some(1_640_995_200));
        assert!(out.warning.is_none());
    }

    #[test]
    fn malformed_timestamp_yields_warning_and_no_time() {
        let out = normalize(record(json!({"creationTimestamp": "not a date"})), &ctx());
        assert_eq!(out.event.time, None);
        assert!(matches!(
            out.warning,
            Some(NormalizationWarning::UnparseableTimestamp { ref field, .. }) if field == "creationTimestamp"
        ));
    }

    #[test]
    fn non_string_timestamp_yields_warning() {
        let out = normalize(record(json!({"creationTimestamp": {"seconds": 1}})), &ctx());
        assert_eq!(out.event.time, None);
        assert_eq!(out.warning.as_ref().map(|w| w.kind()), Some("unparseable_timestamp"));
    }

    #[test]
    fn no_timestamp_configured_means_no_warning() {
        let context = NormalizationContext::new("h", "s", "st", "idx").unwrap();
        let out = normalize(record(json!({"id": 1})), &context);
        assert_eq!(out.event.time, None);
        assert!(out.warning.is_none());
    }

    #[test]
    fn envelope_serializes_without_absent_time() {
        let out = normalize(record(json!({"id": "b"})), &ctx());
        let line = String::from_utf8(out.event.to_ndjson_line().unwrap()).unwrap();
        assert_eq!(
            line,
            "{\"host\":\"inventory-host\",\"source\":\"instances list\",\"sourcetype\":\"cloud:instance\",\"index\":\"inventory\",\"event\":{\"id\":\"b\"}}\n"
        );
    }

    #[test]
    fn nested_timestamp_path_is_resolved() {
        let context = NormalizationContext::new("h", "s", "st", "idx")
            .unwrap()
            .with_timestamp(Some("metadata.created"), None)
            .unwrap();
        let out = normalize(
            record(json!({"metadata": {"created": "2022-01-01T00:00:00Z"}})),
            &context,
        );
        assert_eq!(out.event.time, Some(1_640_995_200));
    }

    #[test]
    fn format_without_field_is_rejected() {
        let err = NormalizationContext::new("h", "s", "st", "idx")
            .unwrap()
            .with_timestamp(Some("  "), Some(TimestampFormat::EpochSeconds))
            .unwrap_err();
        assert_eq!(err, crate::ContextError::FormatWithoutField);
    }
}
