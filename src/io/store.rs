//! Arrival persistence
//!
//! The queue talks to storage only through [`ArrivalStore`], so a durable
//! backend can replace [`MemoryStore`] without touching queue logic. All
//! methods are synchronous and are called with the queue lock held.

use crate::domain::arrival::{ArrivalEvent, ArrivalId, ArrivalStatus};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

pub trait ArrivalStore: Send + Sync {
    fn insert(&mut self, event: ArrivalEvent);

    /// Overwrite the status of an event; returns false if the id is unknown
    fn update_status(&mut self, id: &ArrivalId, status: ArrivalStatus) -> bool;

    fn get(&self, id: &ArrivalId) -> Option<ArrivalEvent>;

    /// Events bound for `stop`, optionally restricted to one status
    fn query_by_stop(&self, stop: &str, status: Option<ArrivalStatus>) -> Vec<ArrivalEvent>;

    /// Delete every event detected strictly before `cutoff`; returns how many
    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> usize;

    fn snapshot(&self) -> Vec<ArrivalEvent>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store indexed by id and by destination stop
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: FxHashMap<ArrivalId, ArrivalEvent>,
    by_destination: FxHashMap<String, Vec<ArrivalId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArrivalStore for MemoryStore {
    fn insert(&mut self, event: ArrivalEvent) {
        let ids = self.by_destination.entry(event.destination_stop.clone()).or_default();
        if !ids.contains(&event.id) {
            ids.push(event.id.clone());
        }
        self.events.insert(event.id.clone(), event);
    }

    fn update_status(&mut self, id: &ArrivalId, status: ArrivalStatus) -> bool {
        match self.events.get_mut(id) {
            Some(event) => {
                event.status = status;
                true
            }
            None => false,
        }
    }

    fn get(&self, id: &ArrivalId) -> Option<ArrivalEvent> {
        self.events.get(id).cloned()
    }

    fn query_by_stop(&self, stop: &str, status: Option<ArrivalStatus>) -> Vec<ArrivalEvent> {
        let Some(ids) = self.by_destination.get(stop) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.events.get(id))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect()
    }

    fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.events.len();
        self.events.retain(|_, e| e.detected_at >= cutoff);

        let events = &self.events;
        self.by_destination.retain(|_, ids| {
            ids.retain(|id| events.contains_key(id));
            !ids.is_empty()
        });

        before - self.events.len()
    }

    fn snapshot(&self) -> Vec<ArrivalEvent> {
        self.events.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arrival::ArrivalSource;
    use crate::domain::line::LineRecord;
    use chrono::{Duration, TimeZone};

    fn event(dest: &str, detected_at: DateTime<Utc>) -> ArrivalEvent {
        let line = LineRecord::new("437", "TI Caxangá (Conde da Boa Vista)", 5.0, 2.5);
        ArrivalEvent::new(&line, "A", dest, detected_at, ArrivalSource::Manual)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_query_by_stop_and_status() {
        let mut store = MemoryStore::new();
        let a = event("B", t0());
        let b = event("B", t0());
        let c = event("C", t0());
        store.insert(a.clone());
        store.insert(b.clone());
        store.insert(c);

        assert_eq!(store.query_by_stop("B", None).len(), 2);
        assert!(store.update_status(&a.id, ArrivalStatus::Expired));

        let en_route = store.query_by_stop("B", Some(ArrivalStatus::EnRoute));
        assert_eq!(en_route.len(), 1);
        assert_eq!(en_route[0].id, b.id);
        assert!(store.query_by_stop("Z", None).is_empty());
    }

    #[test]
    fn test_update_unknown_id() {
        let mut store = MemoryStore::new();
        assert!(!store.update_status(&ArrivalId::from("missing"), ArrivalStatus::Arrived));
    }

    #[test]
    fn test_delete_older_than_is_strict() {
        let mut store = MemoryStore::new();
        let old = event("B", t0() - Duration::minutes(31));
        let boundary = event("B", t0() - Duration::minutes(30));
        store.insert(old.clone());
        store.insert(boundary.clone());

        let removed = store.delete_older_than(t0() - Duration::minutes(30));
        assert_eq!(removed, 1);
        assert!(store.get(&old.id).is_none());
        assert!(store.get(&boundary.id).is_some());
        assert_eq!(store.query_by_stop("B", None).len(), 1);
    }

    #[test]
    fn test_delete_drops_empty_index_entries() {
        let mut store = MemoryStore::new();
        store.insert(event("C", t0() - Duration::hours(1)));
        store.delete_older_than(t0());

        assert!(store.is_empty());
        assert!(store.by_destination.is_empty());
    }
}
