use std::{cmp::Ordering, collections::HashSet};

use crate::records::{SortOrder, TimedEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
    ForeignSession,
}

#[derive(Clone, Debug)]
struct Entry<T> {
    /// Arrival sequence, breaks timestamp ties
    seq: u64,
    item: T,
}

/// Ordered, deduplicated events of one kind for one session.
///
/// The collection is sorted by the event timestamp in the current direction
/// after every mutation. Events with equal timestamps keep their arrival order
/// in both directions.
#[derive(Clone, Debug)]
pub struct MergeStore<T: TimedEvent> {
    session_id: String,
    order: SortOrder,
    entries: Vec<Entry<T>>,
    ids: HashSet<String>,
    next_seq: u64,
}

impl<T: TimedEvent> MergeStore<T> {
    pub fn new(session_id: &str, order: SortOrder) -> Self {
        Self {
            session_id: session_id.to_string(),
            order,
            entries: Vec::new(),
            ids: HashSet::new(),
            next_seq: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn insert(&mut self, item: T) -> InsertOutcome {
        if item.session_id() != self.session_id {
            return InsertOutcome::ForeignSession;
        }
        if self.ids.contains(item.id()) {
            return InsertOutcome::Duplicate;
        }

        let ts = item.timestamp();
        // the new entry has the highest sequence, so it goes after its equals
        let position = if self.order.is_descending() {
            self.entries.partition_point(|e| e.item.timestamp() >= ts)
        } else {
            self.entries.partition_point(|e| e.item.timestamp() <= ts)
        };
        self.ids.insert(item.id().to_string());
        let seq = self.next_seq();
        self.entries.insert(position, Entry { seq, item });
        InsertOutcome::Inserted
    }

    /// Replaces the whole collection with a fresh snapshot. Returns how many
    /// items were kept after dropping foreign and repeated ones.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) -> usize {
        self.entries.clear();
        self.ids.clear();
        for item in items {
            if item.session_id() != self.session_id || !self.ids.insert(item.id().to_string()) {
                continue;
            }
            let seq = self.next_seq();
            self.entries.push(Entry { seq, item });
        }
        self.sort();
        self.entries.len()
    }

    /// Re-sorts the held events. Returns whether the direction changed.
    pub fn set_sort_order(&mut self, order: SortOrder) -> bool {
        if self.order == order {
            return false;
        }
        self.order = order;
        self.sort();
        true
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn sort(&mut self) {
        let descending = self.order.is_descending();
        self.entries.sort_by(|a, b| {
            let by_time = a.item.timestamp().cmp(&b.item.timestamp());
            let by_time = if descending { by_time.reverse() } else { by_time };
            match by_time {
                Ordering::Equal => a.seq.cmp(&b.seq),
                other => other,
            }
        });
    }
}
