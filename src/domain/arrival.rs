//! Arrival event model - one detected vehicle heading to a destination stop

use crate::domain::line::LineRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque arrival identifier (UUIDv7, time-sortable)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrivalId(pub String);

impl ArrivalId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArrivalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArrivalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Arrival lifecycle. `Arrived` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalStatus {
    EnRoute,
    Arrived,
    Expired,
}

impl ArrivalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalStatus::EnRoute => "en_route",
            ArrivalStatus::Arrived => "arrived",
            ArrivalStatus::Expired => "expired",
        }
    }

    /// Status only moves forward, out of `EnRoute`
    #[inline]
    pub fn can_transition_to(&self, next: ArrivalStatus) -> bool {
        matches!(
            (self, next),
            (ArrivalStatus::EnRoute, ArrivalStatus::Arrived)
                | (ArrivalStatus::EnRoute, ArrivalStatus::Expired)
        )
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ArrivalStatus::EnRoute)
    }
}

impl std::fmt::Display for ArrivalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry point that created an arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalSource {
    Camera,
    Manual,
}

/// A predicted vehicle arrival at `destination_stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalEvent {
    pub id: ArrivalId,
    pub line_code: String,
    pub line_name: String,
    pub distance_km: f64,
    pub origin_stop: String,
    pub destination_stop: String,
    pub detected_at: DateTime<Utc>,
    pub predicted_arrival: DateTime<Utc>,
    pub status: ArrivalStatus,
    pub source: ArrivalSource,
}

impl ArrivalEvent {
    /// Create an en-route arrival; the prediction is fixed here and never recomputed
    pub fn new(
        line: &LineRecord,
        origin_stop: &str,
        destination_stop: &str,
        detected_at: DateTime<Utc>,
        source: ArrivalSource,
    ) -> Self {
        // Registry rejects negative travel times; clamp anyway so the invariant holds
        let travel = line.travel_time().max(Duration::zero());

        Self {
            id: ArrivalId::generate(),
            line_code: line.code.clone(),
            line_name: line.display_name.clone(),
            distance_km: line.distance_km,
            origin_stop: origin_stop.to_string(),
            destination_stop: destination_stop.to_string(),
            detected_at,
            predicted_arrival: detected_at.checked_add_signed(travel).unwrap_or(detected_at),
            status: ArrivalStatus::EnRoute,
            source,
        }
    }

    /// True once `now` is at least `grace` past the predicted arrival
    #[inline]
    pub fn is_stale(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now - self.predicted_arrival >= grace
    }
}

/// Display label for a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionLabel {
    Arriving,
    EnRoute,
}

impl PredictionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionLabel::Arriving => "arriving",
            PredictionLabel::EnRoute => "en_route",
        }
    }
}

/// Read-only view of an en-route arrival for display clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionView {
    pub arrival_id: ArrivalId,
    pub line_code: String,
    pub line_name: String,
    pub minutes_remaining: i64,
    pub predicted_arrival: DateTime<Utc>,
    /// Predicted arrival as HH:MM (UTC)
    pub predicted_time: String,
    pub status: PredictionLabel,
}

impl PredictionView {
    pub fn from_event(event: &ArrivalEvent, now: DateTime<Utc>) -> Self {
        let remaining_secs = (event.predicted_arrival - now).num_seconds();
        let minutes_remaining = remaining_secs.div_euclid(60).max(0);

        let status = if minutes_remaining == 0 {
            PredictionLabel::Arriving
        } else {
            PredictionLabel::EnRoute
        };

        Self {
            arrival_id: event.id.clone(),
            line_code: event.line_code.clone(),
            line_name: event.line_name.clone(),
            minutes_remaining,
            predicted_arrival: event.predicted_arrival,
            predicted_time: event.predicted_arrival.format("%H:%M").to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_status_transitions_forward_only() {
        use ArrivalStatus::*;
        assert!(EnRoute.can_transition_to(Arrived));
        assert!(EnRoute.can_transition_to(Expired));
        assert!(!Arrived.can_transition_to(EnRoute));
        assert!(!Expired.can_transition_to(EnRoute));
        assert!(!Expired.can_transition_to(Arrived));
        assert!(!Arrived.can_transition_to(Expired));
        assert!(!EnRoute.can_transition_to(EnRoute));
    }

    #[test]
    fn test_new_event_prediction() {
        let line = LineRecord::new("437", "Caxangá", 5.0, 2.5);
        let event = ArrivalEvent::new(&line, "A", "B", t0(), ArrivalSource::Manual);

        assert_eq!(event.predicted_arrival, t0() + Duration::minutes(5));
        assert_eq!(event.status, ArrivalStatus::EnRoute);
        assert!(event.predicted_arrival >= event.detected_at);
    }

    #[test]
    fn test_unique_ids() {
        let line = LineRecord::new("437", "Caxangá", 5.0, 2.5);
        let a = ArrivalEvent::new(&line, "A", "B", t0(), ArrivalSource::Camera);
        let b = ArrivalEvent::new(&line, "A", "B", t0(), ArrivalSource::Camera);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_prediction_view_minutes() {
        let line = LineRecord::new("437", "Caxangá", 5.0, 2.5);
        let event = ArrivalEvent::new(&line, "A", "B", t0(), ArrivalSource::Camera);

        let view = PredictionView::from_event(&event, t0() + Duration::minutes(4));
        assert_eq!(view.minutes_remaining, 1);
        assert_eq!(view.status, PredictionLabel::EnRoute);
        assert_eq!(view.predicted_time, "12:05");

        let view = PredictionView::from_event(&event, t0() + Duration::seconds(250));
        assert_eq!(view.minutes_remaining, 0);
        assert_eq!(view.status, PredictionLabel::Arriving);

        // Past the prediction but inside the grace window
        let view = PredictionView::from_event(&event, t0() + Duration::seconds(330));
        assert_eq!(view.minutes_remaining, 0);
        assert_eq!(view.status, PredictionLabel::Arriving);
    }

    #[test]
    fn test_is_stale() {
        let line = LineRecord::new("437", "Caxangá", 5.0, 2.5);
        let event = ArrivalEvent::new(&line, "A", "B", t0(), ArrivalSource::Camera);
        let grace = Duration::minutes(1);

        assert!(!event.is_stale(t0() + Duration::seconds(359), grace));
        assert!(event.is_stale(t0() + Duration::minutes(6), grace));
    }
}
