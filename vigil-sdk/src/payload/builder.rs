//! Turns stored session rows into a payload.

use super::SessionPayload;
use vigil_core::resource::keys;
use vigil_core::{AttributeValue, ResourceScope, Result, SessionRecord, Storage};

/// Atomically bump the permanent session counter and return the new value.
///
/// A missing counter starts at 1. A counter stored as a numeric string is
/// accepted and rewritten as an integer.
pub fn next_session_counter(storage: &Storage) -> Result<i64> {
    let record = storage.update_resource(
        keys::SESSION_UPLOAD_INDEX,
        ResourceScope::Permanent,
        |current| {
            let next = current
                .and_then(AttributeValue::as_i64)
                .map_or(1, |value| value.saturating_add(1));
            AttributeValue::Int(next)
        },
    )?;
    Ok(record.value.as_i64().unwrap_or(1))
}

/// Builds [`SessionPayload`]s from storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPayloadBuilder;

impl SessionPayloadBuilder {
    /// Build the payload for `session`, consuming one counter value.
    pub fn build(storage: &Storage, session: &SessionRecord) -> Result<SessionPayload> {
        let counter = next_session_counter(storage)?;
        let resources = storage.fetch_resources_for_session(session);
        let spans = storage.fetch_spans_for_session(session.id);

        tracing::debug!(
            session_id = %session.id,
            counter,
            spans = spans.completed.len(),
            snapshots = spans.snapshots.len(),
            "Built session payload"
        );
        Ok(SessionPayload::from_parts(session, &resources, &spans, counter))
    }
}
