use log::{debug, warn};

use crate::{
    RidewatchError,
    backend::{Backend, ChangeRequest, Filter, Subscription},
    config::TableNames,
    records::{INSERTED_AT_COLUMN, RIDER_COLUMN, Row, TelemetrySample, TimedEvent},
};

/// Logical channel name, one per (kind, rider, session).
pub fn channel_key(kind: &str, rider_id: &str, session_id: &str) -> String {
    format!("{kind}:{rider_id}:{session_id}")
}

fn open(
    backend: &dyn Backend,
    channel: &str,
    request: ChangeRequest,
) -> Result<Subscription, RidewatchError> {
    debug!("Subscribing to {channel}");
    backend
        .subscribe(channel, &request)
        .map_err(|e| RidewatchError::SubscriptionFailed {
            channel: channel.to_string(),
            reason: e.to_string(),
        })
}

/// Insert feed of one event kind for a rider. Polling backends window it by
/// insertion time, so late uploads of old events are still seen.
fn event_request<T: TimedEvent>(tables: &TableNames, rider_id: &str) -> ChangeRequest {
    ChangeRequest::inserts(T::KIND.table(tables))
        .filter(Filter::eq(RIDER_COLUMN, rider_id))
        .recent_by(INSERTED_AT_COLUMN)
}

/// Opens the insert feed of one event kind. The backend filters on the
/// rider only, so callers must check the session of every row themselves
/// (see [`accept_event`]).
pub fn subscribe_events<T: TimedEvent>(
    backend: &dyn Backend,
    tables: &TableNames,
    rider_id: &str,
    session_id: &str,
) -> Result<Subscription, RidewatchError> {
    let channel = channel_key(&T::KIND.to_string(), rider_id, session_id);
    open(backend, &channel, event_request::<T>(tables, rider_id))
}

pub fn subscribe_telemetry(
    backend: &dyn Backend,
    tables: &TableNames,
    rider_id: &str,
    session_id: &str,
) -> Result<Subscription, RidewatchError> {
    let channel = channel_key("telemetry", rider_id, session_id);
    let request = ChangeRequest::inserts(&tables.telemetry)
        .filter(Filter::eq(RIDER_COLUMN, rider_id))
        .recent_by(INSERTED_AT_COLUMN);
    open(backend, &channel, request)
}

/// Parses a notified row, keeping it only if it belongs to `session_id`.
pub fn accept_event<T: TimedEvent>(row: &Row, session_id: &str) -> Option<T> {
    match T::from_row(row) {
        Ok(event) if event.session_id() == session_id => Some(event),
        Ok(event) => {
            debug!(
                "Discarding {} {} from session {}",
                T::KIND,
                event.id(),
                event.session_id()
            );
            None
        }
        Err(e) => {
            warn!("Discarding {} notification: {e}", T::KIND);
            None
        }
    }
}

/// Telemetry rows without a session are accepted, rows tagged with another
/// session are not.
pub fn accept_sample(row: &Row, session_id: &str) -> Option<TelemetrySample> {
    match TelemetrySample::from_row(row) {
        Ok(sample) if sample.session_id.as_deref().is_none_or(|s| s == session_id) => {
            Some(sample)
        }
        Ok(_) => None,
        Err(e) => {
            warn!("Discarding telemetry notification: {e}");
            None
        }
    }
}
