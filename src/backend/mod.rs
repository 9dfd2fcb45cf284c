//! Capabilities the dashboard needs from its hosted backend: row queries, an
//! insert-only change feed, and writes.

pub mod memory;
pub mod supabase;

use std::{
    cell::Cell,
    cmp::Ordering,
    sync::{
        Arc,
        atomic::{self, AtomicBool},
        mpsc::{Receiver, TryRecvError},
    },
};

use serde_json::Value;

use crate::{
    RidewatchError,
    records::{Row, parse_timestamp},
};

pub use memory::{FailurePoint, MemoryBackend};
pub use supabase::SupabaseBackend;

/// Column equality, the only predicate the dashboard needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: &str, value: &str) -> Self {
        Self {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match row.get(&self.column) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

/// What a change feed listens to. Only insertions are delivered.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeRequest {
    pub table: String,
    pub filter: Option<Filter>,
    /// Column that orders rows by recency, used by backends that poll
    pub recent_by: Option<String>,
}

impl ChangeRequest {
    pub fn inserts(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filter: None,
            recent_by: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn recent_by(mut self, column: &str) -> Self {
        self.recent_by = Some(column.to_string());
        self
    }

    pub fn matches(&self, table: &str, row: &Row) -> bool {
        self.table == table && self.filter.as_ref().is_none_or(|f| f.matches(row))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    Inserted(Row),
    Error(String),
    /// The feed ended without being unsubscribed
    Closed,
}

/// Handle to an open change feed. Dropping it stops delivery.
pub struct Subscription {
    channel: String,
    events: Receiver<ChangeEvent>,
    active: Arc<AtomicBool>,
    closed: Cell<bool>,
}

impl Subscription {
    pub fn new(channel: &str, events: Receiver<ChangeEvent>, active: Arc<AtomicBool>) -> Self {
        Self {
            channel: channel.to_string(),
            events,
            active,
            closed: Cell::new(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next pending notification, without blocking. A disconnected feed is
    /// reported once as [`ChangeEvent::Closed`].
    pub fn try_next(&self) -> Option<ChangeEvent> {
        if self.closed.get() {
            return None;
        }
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed.set(true);
                Some(ChangeEvent::Closed)
            }
        }
    }

    pub fn cancel(&self) {
        self.active.store(false, atomic::Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub trait Backend: Send + Sync {
    fn query(&self, query: &Query) -> Result<Vec<Row>, RidewatchError>;

    /// Opens the feed named `channel`. Subscribing again under the same name
    /// replaces the previous feed.
    fn subscribe(
        &self,
        channel: &str,
        request: &ChangeRequest,
    ) -> Result<Subscription, RidewatchError>;

    fn unsubscribe(&self, channel: &str);

    fn insert(&self, table: &str, record: Row) -> Result<(), RidewatchError>;
}

/// Orders two cell values the way a database would for timestamps, numbers
/// and text. Missing values sort first.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (parse_timestamp(x), parse_timestamp(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
