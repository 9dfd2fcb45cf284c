use log::{debug, warn};

use crate::{
    RidewatchError,
    backend::{Backend, Query},
    config::TableNames,
    records::{RIDER_COLUMN, Row, SESSION_COLUMN, SortOrder, TimedEvent},
};

/// Existing rows of one event kind for a rider's session, ordered by the
/// kind's timestamp column.
fn fetch_rows(
    backend: &dyn Backend,
    table: &str,
    time_column: &str,
    rider_id: &str,
    session_id: &str,
    order: SortOrder,
    limit: Option<usize>,
) -> Result<Vec<Row>, RidewatchError> {
    let query = Query::new(table)
        .eq(RIDER_COLUMN, rider_id)
        .eq(SESSION_COLUMN, session_id)
        .order_by(time_column, order.is_descending())
        .limit(limit);
    let rows = backend.query(&query)?;
    debug!("Fetched {} rows from {table} for {rider_id}/{session_id}", rows.len());
    Ok(rows)
}

/// Turns fetched rows into typed events, skipping rows that do not validate.
fn parse_rows<T: TimedEvent>(rows: &[Row]) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match T::from_row(row) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping {} row: {e}", T::KIND);
                None
            }
        })
        .collect()
}

/// Existing events of kind `T` for a rider's session. Backend errors come
/// back as [`RidewatchError::FetchFailed`].
pub fn fetch_snapshot<T: TimedEvent>(
    backend: &dyn Backend,
    tables: &TableNames,
    rider_id: &str,
    session_id: &str,
    order: SortOrder,
    limit: Option<usize>,
) -> Result<Vec<T>, RidewatchError> {
    let rows = fetch_rows(
        backend,
        T::KIND.table(tables),
        T::TIME_COLUMN,
        rider_id,
        session_id,
        order,
        limit,
    )
    .map_err(|e| RidewatchError::FetchFailed {
        kind: T::KIND.to_string(),
        reason: e.to_string(),
    })?;
    Ok(parse_rows(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailurePoint, MemoryBackend};
    use crate::records::{PotholeEvent, RideEvent};
    use serde_json::json;

    fn seeded() -> (MemoryBackend, TableNames) {
        let backend = MemoryBackend::new();
        let tables = TableNames::default();
        backend.seed(
            &tables.potholes,
            vec![
                json!({"id": "p1", "detected_at": "2024-03-01T10:00:00Z", "rider_id": "R1", "session_id": "F1"}),
                json!({"id": "p2", "detected_at": "2024-03-01T10:05:00Z", "rider_id": "R1", "session_id": "F1"}),
                json!({"id": "p3", "detected_at": "2024-03-01T10:07:00Z", "rider_id": "R1", "session_id": "F0"}),
                json!({"id": "bad", "detected_at": "whenever", "rider_id": "R1", "session_id": "F1"}),
            ],
        );
        (backend, tables)
    }

    #[test]
    fn test_fetch_orders_and_scopes_to_session() {
        let (backend, tables) = seeded();

        let newest: Vec<PotholeEvent> =
            fetch_snapshot(&backend, &tables, "R1", "F1", SortOrder::Newest, None).unwrap();
        let ids: Vec<_> = newest.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);

        let oldest: Vec<PotholeEvent> =
            fetch_snapshot(&backend, &tables, "R1", "F1", SortOrder::Oldest, Some(1)).unwrap();
        assert_eq!(oldest.len(), 1);
        assert_eq!(oldest[0].id, "p1");
    }

    #[test]
    fn test_fetch_failure_is_fetch_failed() {
        let (backend, tables) = seeded();
        backend.fail(FailurePoint::Query(tables.ride_events.clone()));

        let result: Result<Vec<RideEvent>, _> =
            fetch_snapshot(&backend, &tables, "R1", "F1", SortOrder::Newest, None);
        assert!(matches!(result, Err(RidewatchError::FetchFailed { kind, .. }) if kind == "ride_events"));
    }
}
