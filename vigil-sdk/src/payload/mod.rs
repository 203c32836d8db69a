//! Session payload wire format.
//!
//! Keys are short for compactness and are a compatibility contract with the
//! collector. Session timestamps are unix milliseconds; span timestamps are
//! unix nanoseconds.

mod builder;

pub use builder::{SessionPayloadBuilder, next_session_counter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_core::resource::keys;
use vigil_core::span::{SpanEvent, SpanStatus};
use vigil_core::storage::SessionSpans;
use vigil_core::{Attributes, ResourceRecord, SessionId, SessionRecord, SessionState, SpanData};

/// Payload format version.
pub const FORMAT_VERSION: u32 = 15;

/// Session type tag.
pub const SESSION_TYPE: &str = "en";

/// A session ready for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Format version.
    #[serde(rename = "v")]
    pub format_version: u32,
    /// Session info.
    #[serde(rename = "s")]
    pub session: SessionInfoPayload,
    /// App resources, keys without the `emb.app.` prefix.
    #[serde(rename = "a")]
    pub app: Attributes,
    /// Device resources, keys without the `emb.device.` prefix.
    #[serde(rename = "d")]
    pub device: Attributes,
    /// User resources, keys without the `emb.user.` prefix.
    #[serde(rename = "u")]
    pub user: Attributes,
    /// Completed spans.
    pub spans: Vec<SpanPayload>,
    /// Spans still recording when last persisted.
    pub span_snapshots: Vec<SpanPayload>,
    /// Session type tag.
    #[serde(rename = "ty")]
    pub session_type: String,
    /// Whether the app was terminated during the session.
    #[serde(rename = "tr")]
    pub terminated: bool,
    /// Whether the session ended cleanly.
    #[serde(rename = "ce")]
    pub clean_exit: bool,
    /// Whether the session began with a process launch.
    #[serde(rename = "cs")]
    pub cold_start: bool,
}

impl SessionPayload {
    /// Assemble a payload from stored rows. No side effects.
    pub fn from_parts(
        session: &SessionRecord,
        resources: &[ResourceRecord],
        spans: &SessionSpans,
        counter: i64,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            session: SessionInfoPayload::new(session, counter),
            app: project(resources, keys::APP_PREFIX),
            device: project(resources, keys::DEVICE_PREFIX),
            user: project(resources, keys::USER_PREFIX),
            spans: spans.completed.iter().map(SpanPayload::from).collect(),
            span_snapshots: spans.snapshots.iter().map(SpanPayload::from).collect(),
            session_type: SESSION_TYPE.to_string(),
            terminated: session.app_terminated,
            clean_exit: session.clean_exit,
            cold_start: session.cold_start,
        }
    }
}

fn project(resources: &[ResourceRecord], prefix: &str) -> Attributes {
    resources
        .iter()
        .filter_map(|resource| {
            resource
                .key
                .strip_prefix(prefix)
                .map(|key| (key.to_string(), resource.value.clone()))
        })
        .collect()
}

/// Session info block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfoPayload {
    /// Session id.
    pub id: SessionId,
    /// Start, unix millis.
    #[serde(rename = "st")]
    pub start_time: i64,
    /// End, unix millis.
    #[serde(rename = "et", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Last heartbeat, unix millis.
    #[serde(rename = "ht")]
    pub last_heartbeat_time: i64,
    /// Foreground/background.
    #[serde(rename = "as")]
    pub state: SessionState,
    /// Per-device session counter.
    #[serde(rename = "sn")]
    pub counter: i64,
    /// Cold start flag.
    #[serde(rename = "cs")]
    pub cold_start: bool,
    /// Clean exit flag.
    #[serde(rename = "ce")]
    pub clean_exit: bool,
    /// App terminated flag.
    #[serde(rename = "tr")]
    pub app_terminated: bool,
    /// Correlated crash report.
    #[serde(rename = "crash_report_id", default, skip_serializing_if = "Option::is_none")]
    pub crash_report_id: Option<String>,
}

impl SessionInfoPayload {
    fn new(session: &SessionRecord, counter: i64) -> Self {
        Self {
            id: session.id,
            start_time: session.start_time.timestamp_millis(),
            end_time: session.end_time.map(|t| t.timestamp_millis()),
            last_heartbeat_time: session.last_heartbeat_time.timestamp_millis(),
            state: session.state,
            counter,
            cold_start: session.cold_start,
            clean_exit: session.clean_exit,
            app_terminated: session.app_terminated,
            crash_report_id: session.crash_report_id.clone(),
        }
    }
}

/// One span on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanPayload {
    /// Trace id, hex.
    pub trace_id: String,
    /// Span id, hex.
    pub span_id: String,
    /// Parent span id, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Span name.
    pub name: String,
    /// Semantic type tag.
    #[serde(rename = "type")]
    pub span_type: String,
    /// Start, unix nanos.
    pub start_time_unix_nano: i64,
    /// End, unix nanos. Absent for snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_unix_nano: Option<i64>,
    /// `unset`, `ok` or `error`.
    pub status: String,
    /// Attributes.
    pub attributes: Attributes,
    /// Events in call order.
    pub events: Vec<SpanEventPayload>,
}

impl From<&SpanData> for SpanPayload {
    fn from(span: &SpanData) -> Self {
        Self {
            trace_id: span.trace_id.to_hex(),
            span_id: span.span_id.to_hex(),
            parent_span_id: span.parent_span_id.map(|id| id.to_hex()),
            name: span.name.clone(),
            span_type: span.span_type.as_str().to_string(),
            start_time_unix_nano: unix_nanos(span.start_time),
            end_time_unix_nano: span.end_time.map(unix_nanos),
            status: status_tag(span.status).to_string(),
            attributes: span.attributes.clone(),
            events: span.events.iter().map(SpanEventPayload::from).collect(),
        }
    }
}

/// One span event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEventPayload {
    /// Event name.
    pub name: String,
    /// Timestamp, unix nanos.
    pub time_unix_nano: i64,
    /// Attributes.
    pub attributes: Attributes,
}

impl From<&SpanEvent> for SpanEventPayload {
    fn from(event: &SpanEvent) -> Self {
        Self {
            name: event.name.clone(),
            time_unix_nano: unix_nanos(event.timestamp),
            attributes: event.attributes.clone(),
        }
    }
}

fn status_tag(status: SpanStatus) -> &'static str {
    match status {
        SpanStatus::Unset => "unset",
        SpanStatus::Ok => "ok",
        SpanStatus::Error => "error",
    }
}

fn unix_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt()
        .unwrap_or_else(|| time.timestamp_micros().saturating_mul(1_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_core::prelude::*;

    fn session() -> SessionRecord {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let mut session = SessionRecord::new(SessionId::new(), ProcessId::random(), start)
            .with_cold_start(true);
        session.close_with_crash("crash-9", start + chrono::Duration::seconds(3));
        session
    }

    fn span(end: bool) -> SpanData {
        let tracer = Tracer::new(std::sync::Arc::new(NoopSpanProcessor));
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 1).unwrap();
        let span = tracer
            .span_builder("fetch", SpanType::NetworkHttp)
            .with_start_time(start)
            .with_attribute("http.response.status_code", 200)
            .start();
        span.add_event_at("first-byte", start, Attributes::new());
        if end {
            span.end_at(start + chrono::Duration::milliseconds(250));
        }
        span.snapshot()
    }

    #[test]
    fn wire_keys_are_stable() {
        let session = session();
        let spans = SessionSpans {
            completed: vec![span(true)],
            snapshots: vec![span(false)],
        };
        let payload = SessionPayload::from_parts(&session, &[], &spans, 7);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["v"], 15);
        assert_eq!(json["ty"], "en");
        assert_eq!(json["tr"], true);
        assert_eq!(json["ce"], false);
        assert_eq!(json["cs"], true);
        assert_eq!(json["s"]["sn"], 7);
        assert_eq!(json["s"]["id"], session.id.to_string());
        assert_eq!(json["s"]["st"], session.start_time.timestamp_millis());
        assert_eq!(json["s"]["as"], "foreground");
        assert_eq!(json["s"]["crash_report_id"], "crash-9");
        assert_eq!(json["spans"].as_array().unwrap().len(), 1);
        assert_eq!(json["span_snapshots"].as_array().unwrap().len(), 1);

        let completed = &json["spans"][0];
        assert_eq!(completed["type"], "perf.network_http_request");
        assert_eq!(completed["status"], "ok");
        assert_eq!(
            completed["end_time_unix_nano"].as_i64().unwrap() - completed["start_time_unix_nano"].as_i64().unwrap(),
            250_000_000
        );
        assert_eq!(completed["attributes"]["http.response.status_code"], 200);
        assert_eq!(completed["events"][0]["name"], "first-byte");
        assert!(json["span_snapshots"][0].get("end_time_unix_nano").is_none());
    }

    #[test]
    fn resources_are_projected_by_prefix() {
        let resources = vec![
            ResourceRecord::permanent("emb.app.version", "1.4.0"),
            ResourceRecord::permanent("emb.device.model", "Pixel 8"),
            ResourceRecord::permanent("emb.user.id", "u-17"),
            ResourceRecord::permanent("emb.session.upload_index", 3),
        ];
        let payload =
            SessionPayload::from_parts(&session(), &resources, &SessionSpans::default(), 1);

        assert_eq!(payload.app.get("version"), Some(&AttributeValue::from("1.4.0")));
        assert_eq!(payload.device.get("model"), Some(&AttributeValue::from("Pixel 8")));
        assert_eq!(payload.user.get("id"), Some(&AttributeValue::from("u-17")));
        assert_eq!(payload.app.len() + payload.device.len() + payload.user.len(), 3);
    }
}
