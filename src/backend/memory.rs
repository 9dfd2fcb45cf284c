// In-process backend, used by the tests and the offline demo mode

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::AtomicBool,
        mpsc::{self, Sender},
    },
};

use log::debug;

use crate::{RidewatchError, records::Row};

use super::{Backend, ChangeEvent, ChangeRequest, Query, Subscription, compare_values};

/// Operations a test can make fail on purpose.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Query(String),
    Subscribe(String),
    Insert(String),
}

struct Subscriber {
    channel: String,
    request: ChangeRequest,
    sender: Sender<ChangeEvent>,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Row>>,
    subscribers: Vec<Subscriber>,
    failures: HashSet<FailurePoint>,
    queries: usize,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores rows without notifying subscribers, as if they existed before
    /// anyone was listening.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn fail(&self, point: FailurePoint) {
        self.state().failures.insert(point);
    }

    pub fn heal(&self, point: &FailurePoint) {
        self.state().failures.remove(point);
    }

    /// Number of queries served so far.
    pub fn query_count(&self) -> usize {
        self.state().queries
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|s| s.is_live());
        state.subscribers.len()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut state = self.state();
        state.subscribers.retain(|s| s.is_live());
        state.subscribers.iter().map(|s| s.channel.clone()).collect()
    }

    /// Delivers a feed error to every subscriber of `channel`.
    pub fn emit_error(&self, channel: &str, message: &str) {
        for subscriber in self.state().subscribers.iter() {
            if subscriber.channel == channel {
                let _ = subscriber
                    .sender
                    .send(ChangeEvent::Error(message.to_string()));
            }
        }
    }

    /// Re-delivers a row to matching subscribers without storing it again,
    /// like a feed replaying a notification.
    pub fn replay(&self, table: &str, row: Row) {
        self.state().broadcast(table, &row);
    }
}

impl Subscriber {
    fn is_live(&self) -> bool {
        self.active.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl MemoryState {
    fn check(&self, point: FailurePoint) -> Result<(), RidewatchError> {
        if self.failures.contains(&point) {
            let operation = match &point {
                FailurePoint::Query(_) => "query",
                FailurePoint::Subscribe(_) => "subscribe",
                FailurePoint::Insert(_) => "insert",
            };
            return Err(RidewatchError::backend(operation, format!("{point:?} failed")));
        }
        Ok(())
    }

    fn broadcast(&mut self, table: &str, row: &Row) {
        // a dropped receiver means the subscription is gone
        self.subscribers.retain(|s| {
            if !s.is_live() {
                return false;
            }
            if !s.request.matches(table, row) {
                return true;
            }
            s.sender.send(ChangeEvent::Inserted(row.clone())).is_ok()
        });
    }
}

impl Backend for MemoryBackend {
    fn query(&self, query: &Query) -> Result<Vec<Row>, RidewatchError> {
        let mut state = self.state();
        state.queries += 1;
        state.check(FailurePoint::Query(query.table.clone()))?;

        let mut rows: Vec<Row> = state
            .tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn subscribe(
        &self,
        channel: &str,
        request: &ChangeRequest,
    ) -> Result<Subscription, RidewatchError> {
        let mut state = self.state();
        state.check(FailurePoint::Subscribe(request.table.clone()))?;

        state.subscribers.retain(|s| s.channel != channel);
        let (sender, receiver) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(true));
        state.subscribers.push(Subscriber {
            channel: channel.to_string(),
            request: request.clone(),
            sender,
            active: active.clone(),
        });
        debug!("Memory backend subscribed {channel} to {}", request.table);
        Ok(Subscription::new(channel, receiver, active))
    }

    fn unsubscribe(&self, channel: &str) {
        self.state().subscribers.retain(|s| s.channel != channel);
    }

    fn insert(&self, table: &str, record: Row) -> Result<(), RidewatchError> {
        let mut state = self.state();
        state.check(FailurePoint::Insert(table.to_string()))?;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        state.broadcast(table, &record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Filter;
    use serde_json::json;

    fn pothole(id: &str, at: &str) -> Row {
        json!({"id": id, "detected_at": at, "rider_id": "R1", "session_id": "F1"})
    }

    #[test]
    fn test_query_filters_orders_and_limits() {
        let backend = MemoryBackend::new();
        backend.seed(
            "potholes",
            vec![
                pothole("a", "2024-03-01T10:00:00Z"),
                pothole("b", "2024-03-01T12:00:00Z"),
                pothole("c", "2024-03-01T11:00:00Z"),
                json!({"id": "x", "detected_at": "2024-03-01T13:00:00Z", "rider_id": "R2"}),
            ],
        );

        let rows = backend
            .query(
                &Query::new("potholes")
                    .eq("rider_id", "R1")
                    .order_by("detected_at", true)
                    .limit(Some(2)),
            )
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(backend.query_count(), 1);
    }

    #[test]
    fn test_insert_reaches_matching_subscribers_only() {
        let backend = MemoryBackend::new();
        let request = ChangeRequest::inserts("potholes").filter(Filter::eq("rider_id", "R1"));
        let subscription = backend.subscribe("potholes:R1:F1", &request).unwrap();

        backend
            .insert("potholes", json!({"id": "other", "rider_id": "R2"}))
            .unwrap();
        backend
            .insert("potholes", pothole("p1", "2024-03-01T10:00:00Z"))
            .unwrap();

        assert_eq!(
            subscription.try_next(),
            Some(ChangeEvent::Inserted(pothole("p1", "2024-03-01T10:00:00Z")))
        );
        assert_eq!(subscription.try_next(), None);
    }

    #[test]
    fn test_dropping_subscription_detaches_it() {
        let backend = MemoryBackend::new();
        let subscription = backend
            .subscribe("potholes:R1:F1", &ChangeRequest::inserts("potholes"))
            .unwrap();
        assert_eq!(backend.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_closes_feed() {
        let backend = MemoryBackend::new();
        let subscription = backend
            .subscribe("potholes:R1:F1", &ChangeRequest::inserts("potholes"))
            .unwrap();

        backend.unsubscribe("potholes:R1:F1");
        assert_eq!(subscription.try_next(), Some(ChangeEvent::Closed));
        assert_eq!(subscription.try_next(), None);
    }

    #[test]
    fn test_resubscribing_replaces_channel() {
        let backend = MemoryBackend::new();
        let request = ChangeRequest::inserts("potholes");
        let first = backend.subscribe("potholes:R1:F1", &request).unwrap();
        let _second = backend.subscribe("potholes:R1:F1", &request).unwrap();

        assert_eq!(backend.channels(), vec!["potholes:R1:F1".to_string()]);
        assert_eq!(first.try_next(), Some(ChangeEvent::Closed));
    }

    #[test]
    fn test_injected_failures() {
        let backend = MemoryBackend::new();
        backend.fail(FailurePoint::Insert("commands".to_string()));
        assert!(backend.insert("commands", json!({})).is_err());
        assert!(backend.rows("commands").is_empty());

        backend.heal(&FailurePoint::Insert("commands".to_string()));
        assert!(backend.insert("commands", json!({})).is_ok());
        assert_eq!(backend.rows("commands").len(), 1);
    }
}
