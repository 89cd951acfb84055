use crate::aircraft::TypeCode;
use crate::model::PositionRecord;
use crate::session::InterruptionSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderableFlight {
    pub hex_code: String,
    pub callsign: String,
    pub type_code: TypeCode,
    pub display_name: Option<String>,
    pub distance_km: f64,
    pub bearing_deg: f64,
    pub compass: &'static str,
    pub altitude_ft: Option<i64>,
    pub ground_speed_kt: Option<f64>,
    pub position: usize,
    pub count: usize,
}

impl RenderableFlight {
    fn from_record(record: &PositionRecord, position: usize, count: usize) -> Self {
        RenderableFlight {
            hex_code: record.hex_code.clone(),
            callsign: record.callsign.clone(),
            type_code: record.aircraft.type_code,
            display_name: record.aircraft.display_name.clone(),
            distance_km: record.distance_km,
            bearing_deg: record.bearing_deg,
            compass: record.compass,
            altitude_ft: record.altitude_ft,
            ground_speed_kt: record.ground_speed_kt,
            position,
            count,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PollStatus {
    pub polling_active: bool,
    pub in_window: bool,
    pub token_valid: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub in_backoff: bool,
}

struct Inner {
    records: Arc<Vec<PositionRecord>>,
    selected: Option<usize>,
    last_switch: Option<Instant>,
    display_duration: Duration,
    session: InterruptionSession,
    status: PollStatus,
}

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<Inner>>,
}

impl SharedState {
    pub fn new(session: InterruptionSession, display_duration: Duration) -> Self {
        SharedState {
            inner: Arc::new(Mutex::new(Inner {
                records: Arc::new(Vec::new()),
                selected: None,
                last_switch: None,
                display_duration,
                session,
                status: PollStatus::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish(&self, records: Vec<PositionRecord>) {
        self.publish_at(records, Instant::now());
    }

    pub fn publish_at(&self, records: Vec<PositionRecord>, now: Instant) {
        let records = Arc::new(records);
        let mut inner = self.lock();
        let previous = inner
            .selected
            .and_then(|idx| inner.records.get(idx))
            .map(|r| r.hex_code.clone());
        let carried = previous
            .as_deref()
            .and_then(|hex| records.iter().position(|r| r.hex_code == hex));
        match carried {
            Some(idx) => inner.selected = Some(idx),
            None if records.is_empty() => {
                inner.selected = None;
                inner.last_switch = None;
            }
            None => {
                inner.selected = Some(0);
                inner.last_switch = Some(now);
            }
        }
        inner.records = records;
    }

    pub fn snapshot(&self) -> (Arc<Vec<PositionRecord>>, Option<PositionRecord>) {
        let inner = self.lock();
        let selected = inner
            .selected
            .and_then(|idx| inner.records.get(idx))
            .cloned();
        (Arc::clone(&inner.records), selected)
    }

    pub fn has_live_content(&self) -> bool {
        self.has_live_content_at(Instant::now())
    }

    pub fn has_live_content_at(&self, now: Instant) -> bool {
        let mut inner = self.lock();
        let records = Arc::clone(&inner.records);
        inner
            .session
            .evaluate_at(records.iter().map(|r| r.hex_code.as_str()), now)
    }

    pub fn current_record(&self) -> Option<RenderableFlight> {
        self.current_record_at(Instant::now())
    }

    pub fn current_record_at(&self, now: Instant) -> Option<RenderableFlight> {
        let mut inner = self.lock();
        let count = inner.records.len();
        let mut idx = inner.selected?;
        if count > 1 {
            let due = inner
                .last_switch
                .map_or(true, |at| now.saturating_duration_since(at) >= inner.display_duration);
            if due {
                if inner.last_switch.is_some() {
                    idx = (idx + 1) % count;
                    debug!("rotating to flight {}/{}", idx + 1, count);
                }
                inner.selected = Some(idx);
                inner.last_switch = Some(now);
            }
        }
        inner
            .records
            .get(idx)
            .map(|record| RenderableFlight::from_record(record, idx + 1, count))
    }

    pub fn is_session_active(&self) -> bool {
        self.lock().session.is_active()
    }

    pub fn cooldown_count_at(&self, now: Instant) -> usize {
        self.lock().session.cooldown_count_at(now)
    }

    pub fn update_status<F>(&self, apply: F)
    where
        F: FnOnce(&mut PollStatus),
    {
        apply(&mut self.lock().status);
    }

    pub fn poll_status(&self) -> PollStatus {
        self.lock().status.clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aircraft::AircraftInfo;

    pub(crate) fn record(hex: &str, distance_km: f64) -> PositionRecord {
        PositionRecord {
            hex_code: hex.to_string(),
            callsign: format!("TST{}", &hex[..3]),
            latitude: 41.6,
            longitude: -93.6,
            altitude_ft: Some(12000),
            ground_speed_kt: Some(250.0),
            heading: Some(90.0),
            vertical_rate: None,
            distance_km,
            bearing_deg: 45.0,
            compass: "NE",
            observed_at: Utc::now(),
            aircraft: AircraftInfo::heuristic(hex, TypeCode::Jet),
        }
    }

    fn state() -> SharedState {
        SharedState::new(
            InterruptionSession::new(Duration::from_secs(120), Duration::from_secs(30)),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn empty_state_has_nothing_to_show() {
        let s = state();
        let (records, selected) = s.snapshot();
        assert!(records.is_empty());
        assert!(selected.is_none());
        assert!(s.current_record().is_none());
        assert!(!s.has_live_content());
    }

    #[test]
    fn publish_selects_closest_and_keeps_selection() {
        let s = state();
        let t0 = Instant::now();
        s.publish_at(vec![record("aaaaaa", 1.0), record("bbbbbb", 2.0)], t0);
        assert_eq!(s.snapshot().1.unwrap().hex_code, "aaaaaa");

        // Rotate to the second aircraft.
        let second = s.current_record_at(t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(second.hex_code, "bbbbbb");
        assert_eq!((second.position, second.count), (2, 2));

        // New poll reorders; the selection follows bbbbbb.
        s.publish_at(
            vec![record("bbbbbb", 0.5), record("cccccc", 1.5), record("aaaaaa", 3.0)],
            t0 + Duration::from_secs(6),
        );
        assert_eq!(s.snapshot().1.unwrap().hex_code, "bbbbbb");

        // Selection vanished: reset to the closest.
        s.publish_at(vec![record("dddddd", 4.0)], t0 + Duration::from_secs(7));
        assert_eq!(s.snapshot().1.unwrap().hex_code, "dddddd");

        s.publish_at(Vec::new(), t0 + Duration::from_secs(8));
        assert!(s.snapshot().1.is_none());
    }

    #[test]
    fn rotation_waits_for_display_period() {
        let s = state();
        let t0 = Instant::now();
        s.publish_at(
            vec![record("aaaaaa", 1.0), record("bbbbbb", 2.0), record("cccccc", 3.0)],
            t0,
        );
        let seq: Vec<String> = [0u64, 4, 5, 9, 10, 15]
            .iter()
            .map(|secs| {
                s.current_record_at(t0 + Duration::from_secs(*secs))
                    .unwrap()
                    .hex_code
            })
            .collect();
        assert_eq!(
            seq,
            vec!["aaaaaa", "aaaaaa", "bbbbbb", "bbbbbb", "cccccc", "aaaaaa"]
        );
    }

    #[test]
    fn single_aircraft_never_rotates() {
        let s = state();
        let t0 = Instant::now();
        s.publish_at(vec![record("aaaaaa", 1.0)], t0);
        let r = s.current_record_at(t0 + Duration::from_secs(60)).unwrap();
        assert_eq!(r.hex_code, "aaaaaa");
        assert_eq!((r.position, r.count), (1, 1));
    }

    #[test]
    fn live_content_follows_session() {
        let s = state();
        let t0 = Instant::now();
        s.publish_at(vec![record("aaaaaa", 1.0)], t0);
        assert!(s.has_live_content_at(t0));
        assert!(s.is_session_active());
        assert_eq!(s.cooldown_count_at(t0), 1);
        assert!(!s.has_live_content_at(t0 + Duration::from_secs(30)));
        s.publish_at(Vec::new(), t0 + Duration::from_secs(31));
        assert!(!s.has_live_content_at(t0 + Duration::from_secs(31)));
    }

    #[test]
    fn status_updates_are_visible() {
        let s = state();
        s.update_status(|st| {
            st.consecutive_errors = 3;
            st.in_window = true;
        });
        let st = s.poll_status();
        assert_eq!(st.consecutive_errors, 3);
        assert!(st.in_window);
    }
}
