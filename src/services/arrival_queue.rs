//! Arrival queue - the time-decaying set of "vehicle approaching stop X" events
//!
//! Lifecycle per event:
//! - `record` creates it `EnRoute` with a fixed predicted arrival
//! - `query` lazily moves stale events to `Expired` (grace window past prediction)
//! - `confirm_arrival` moves it to `Arrived`
//! - the retention sweep deletes it once `detected_at` falls outside the horizon
//!
//! The store sits behind one `RwLock`. Mutations take the write lock. `query`
//! reads under a shared lock and only takes the write lock when something must
//! expire, re-checking each status there. Egress entries are sent after the
//! lock is released.

use crate::domain::arrival::{
    ArrivalEvent, ArrivalId, ArrivalSource, ArrivalStatus, PredictionView,
};
use crate::domain::errors::QueueError;
use crate::domain::line::LineRegistry;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress::{ArrivalLogEntry, EgressSender};
use crate::io::store::{ArrivalStore, MemoryStore};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const TOP_LINES: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// How long past its prediction an event stays visible
    pub expiry_grace: Duration,
    /// Events detected longer ago than this are deleted
    pub retention: Duration,
    pub max_predictions: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            expiry_grace: Duration::minutes(1),
            retention: Duration::minutes(30),
            max_predictions: 10,
        }
    }
}

impl QueueSettings {
    /// Windows that do not fit a `Duration` keep their defaults
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let expiry_grace = i64::try_from(config.expiry_grace_secs())
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or_else(|| {
                warn!(value = %config.expiry_grace_secs(), "expiry_grace_out_of_range");
                defaults.expiry_grace
            });
        let retention = i64::try_from(config.retention_minutes())
            .ok()
            .and_then(Duration::try_minutes)
            .unwrap_or_else(|| {
                warn!(value = %config.retention_minutes(), "retention_out_of_range");
                defaults.retention
            });

        Self { expiry_grace, retention, max_predictions: config.max_predictions() }
    }
}

/// Result of a successful `record`
#[derive(Debug, Clone, Serialize)]
pub struct RecordedArrival {
    #[serde(flatten)]
    pub event: ArrivalEvent,
    /// 1-based position among en-route arrivals for the same destination
    pub queue_position: usize,
}

/// Ranked predictions for one stop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopPredictions {
    /// Live predictions before the `max_predictions` cap
    pub total: usize,
    pub predictions: Vec<PredictionView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineCount {
    pub line_code: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub en_route: usize,
    pub arrived: usize,
    pub expired: usize,
    pub top_lines: Vec<LineCount>,
    pub registered_lines: usize,
}

pub struct ArrivalQueue {
    registry: Arc<LineRegistry>,
    store: RwLock<Box<dyn ArrivalStore>>,
    settings: QueueSettings,
    metrics: Arc<Metrics>,
    egress: Option<EgressSender>,
}

impl ArrivalQueue {
    /// Queue over an in-memory store
    pub fn new(registry: Arc<LineRegistry>, settings: QueueSettings, metrics: Arc<Metrics>) -> Self {
        Self::with_store(registry, Box::new(MemoryStore::new()), settings, metrics)
    }

    pub fn with_store(
        registry: Arc<LineRegistry>,
        store: Box<dyn ArrivalStore>,
        settings: QueueSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { registry, store: RwLock::new(store), settings, metrics, egress: None }
    }

    pub fn with_egress(mut self, egress: EgressSender) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn registry(&self) -> &LineRegistry {
        &self.registry
    }

    /// Record a manually registered arrival
    pub fn record(
        &self,
        line_code: &str,
        origin_stop: &str,
        destination_stop: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordedArrival, QueueError> {
        self.record_with_source(line_code, origin_stop, destination_stop, now, ArrivalSource::Manual)
    }

    /// Create an `EnRoute` event. Unknown lines are rejected before any state
    /// changes; otherwise stale events are expired and old ones purged first.
    pub fn record_with_source(
        &self,
        line_code: &str,
        origin_stop: &str,
        destination_stop: &str,
        now: DateTime<Utc>,
        source: ArrivalSource,
    ) -> Result<RecordedArrival, QueueError> {
        let Some(line) = self.registry.get(line_code) else {
            warn!(line_code = %line_code, "arrival_rejected_unknown_line");
            self.metrics.record_arrival_rejected();
            return Err(QueueError::UnknownLine(line_code.to_string()));
        };

        let event = ArrivalEvent::new(line, origin_stop, destination_stop, now, source);
        let mut entries = Vec::new();

        let queue_position = {
            let mut store = self.store.write();

            let stale: Vec<ArrivalId> = store
                .snapshot()
                .into_iter()
                .filter(|e| e.status == ArrivalStatus::EnRoute)
                .filter(|e| e.is_stale(now, self.settings.expiry_grace))
                .map(|e| e.id)
                .collect();
            self.expire(&mut **store, &stale, now, &mut entries);

            self.purge(&mut **store, now, self.settings.retention, &mut entries);

            store.insert(event.clone());

            store
                .query_by_stop(destination_stop, Some(ArrivalStatus::EnRoute))
                .iter()
                .filter(|e| e.detected_at <= now)
                .count()
        };

        self.metrics.record_arrival_recorded();
        info!(
            arrival_id = %event.id,
            line_code = %event.line_code,
            origin = %event.origin_stop,
            destination = %event.destination_stop,
            source = ?event.source,
            predicted_arrival = %event.predicted_arrival.to_rfc3339(),
            queue_position = %queue_position,
            "arrival_recorded"
        );

        entries.push(ArrivalLogEntry::Recorded { arrival: event.clone() });
        self.emit(entries);

        Ok(RecordedArrival { event, queue_position })
    }

    /// En-route predictions for `stop`, soonest first, capped at `max_predictions`.
    /// Events at least the grace window past their prediction are expired here.
    pub fn query(&self, stop: &str, now: DateTime<Utc>) -> Vec<PredictionView> {
        self.predictions(stop, now).predictions
    }

    /// Same as [`query`](Self::query), also reporting the uncapped count
    pub fn predictions(&self, stop: &str, now: DateTime<Utc>) -> StopPredictions {
        let grace = self.settings.expiry_grace;

        let (stale, mut fresh): (Vec<ArrivalEvent>, Vec<ArrivalEvent>) = self
            .store
            .read()
            .query_by_stop(stop, Some(ArrivalStatus::EnRoute))
            .into_iter()
            .partition(|e| e.is_stale(now, grace));

        if !stale.is_empty() {
            let mut entries = Vec::new();
            {
                let mut store = self.store.write();
                let ids: Vec<ArrivalId> = stale.into_iter().map(|e| e.id).collect();
                self.expire(&mut **store, &ids, now, &mut entries);
            }
            self.emit(entries);
        }

        fresh.sort_by(|a, b| {
            a.predicted_arrival
                .cmp(&b.predicted_arrival)
                .then_with(|| a.detected_at.cmp(&b.detected_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        let total = fresh.len();
        fresh.truncate(self.settings.max_predictions);

        StopPredictions {
            total,
            predictions: fresh.iter().map(|e| PredictionView::from_event(e, now)).collect(),
        }
    }

    /// Delete every event detected before `now - horizon`, whatever its status
    pub fn retention_sweep(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let mut entries = Vec::new();
        let count = {
            let mut store = self.store.write();
            self.purge(&mut **store, now, horizon, &mut entries)
        };
        self.emit(entries);
        count
    }

    /// Mark an en-route event as arrived
    pub fn confirm_arrival(
        &self,
        id: &ArrivalId,
        now: DateTime<Utc>,
    ) -> Result<ArrivalEvent, QueueError> {
        let (event, entry) = {
            let mut store = self.store.write();
            transition(&mut **store, id, ArrivalStatus::Arrived, now)?
        };

        self.metrics.record_arrival_confirmed();
        info!(
            arrival_id = %event.id,
            line_code = %event.line_code,
            destination = %event.destination_stop,
            "arrival_confirmed"
        );
        self.emit(vec![entry]);
        Ok(event)
    }

    pub fn stats(&self) -> QueueStats {
        let events = self.store.read().snapshot();

        let mut stats = QueueStats {
            total: events.len(),
            en_route: 0,
            arrived: 0,
            expired: 0,
            top_lines: Vec::new(),
            registered_lines: self.registry.len(),
        };

        let mut per_line: FxHashMap<&str, usize> = FxHashMap::default();
        for event in &events {
            match event.status {
                ArrivalStatus::EnRoute => stats.en_route += 1,
                ArrivalStatus::Arrived => stats.arrived += 1,
                ArrivalStatus::Expired => stats.expired += 1,
            }
            *per_line.entry(event.line_code.as_str()).or_default() += 1;
        }

        let mut top: Vec<LineCount> = per_line
            .into_iter()
            .map(|(code, count)| LineCount { line_code: code.to_string(), count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.line_code.cmp(&b.line_code)));
        top.truncate(TOP_LINES);
        stats.top_lines = top;

        stats
    }

    pub fn get(&self, id: &ArrivalId) -> Option<ArrivalEvent> {
        self.store.read().get(id)
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events still marked en-route across all stops
    pub fn en_route_count(&self) -> usize {
        self.store
            .read()
            .snapshot()
            .iter()
            .filter(|e| e.status == ArrivalStatus::EnRoute)
            .count()
    }

    fn expire(
        &self,
        store: &mut dyn ArrivalStore,
        ids: &[ArrivalId],
        now: DateTime<Utc>,
        entries: &mut Vec<ArrivalLogEntry>,
    ) {
        let mut expired = 0u64;
        for id in ids {
            // Another writer may have moved it since the read
            if let Ok((event, entry)) = transition(store, id, ArrivalStatus::Expired, now) {
                debug!(arrival_id = %event.id, line_code = %event.line_code, "arrival_expired");
                entries.push(entry);
                expired += 1;
            }
        }
        if expired > 0 {
            self.metrics.record_arrivals_expired(expired);
            info!(count = %expired, "arrivals_expired");
        }
    }

    fn purge(
        &self,
        store: &mut dyn ArrivalStore,
        now: DateTime<Utc>,
        horizon: Duration,
        entries: &mut Vec<ArrivalLogEntry>,
    ) -> usize {
        // A horizon reaching past the representable range deletes nothing
        let Some(cutoff) = now.checked_sub_signed(horizon) else {
            return 0;
        };
        let count = store.delete_older_than(cutoff);
        if count > 0 {
            self.metrics.record_arrivals_purged(count as u64);
            info!(count = %count, cutoff = %cutoff.to_rfc3339(), "arrivals_purged");
            entries.push(ArrivalLogEntry::Purged { count, cutoff });
        }
        count
    }

    fn emit(&self, entries: Vec<ArrivalLogEntry>) {
        let Some(egress) = &self.egress else {
            return;
        };
        for entry in entries {
            if !egress.send(entry) {
                self.metrics.record_egress_dropped();
            }
        }
    }
}

/// Apply a forward-only status change, returning the updated event and its log entry
fn transition(
    store: &mut dyn ArrivalStore,
    id: &ArrivalId,
    to: ArrivalStatus,
    now: DateTime<Utc>,
) -> Result<(ArrivalEvent, ArrivalLogEntry), QueueError> {
    let mut event = store.get(id).ok_or_else(|| QueueError::UnknownArrival(id.clone()))?;
    let from = event.status;

    if !from.can_transition_to(to) {
        return Err(QueueError::InvalidTransition { id: id.clone(), from, to });
    }

    store.update_status(id, to);
    event.status = to;

    let entry = ArrivalLogEntry::StatusChanged {
        arrival_id: event.id.clone(),
        line_code: event.line_code.clone(),
        destination_stop: event.destination_stop.clone(),
        from,
        to,
        at: now,
    };
    Ok((event, entry))
}
