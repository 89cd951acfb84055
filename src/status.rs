use std::time::Instant;

use chrono::{DateTime, Local, Timelike, Utc};
use serde::Serialize;

use crate::config::Config;
use crate::identify::{Identifier, IdentifierStatus};
use crate::state::SharedState;

#[derive(Clone, Debug, Serialize)]
pub struct HomeLocation {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PollingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub currently_active: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub enabled: bool,
    pub mode: &'static str,
    pub home: HomeLocation,
    pub radius_km: f64,
    pub radius_miles: f64,
    pub polling_window: PollingWindow,
    pub live_flights: usize,
    pub current_callsign: Option<String>,
    pub has_live_content: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub authenticated: bool,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub in_backoff: bool,
    pub cooldown_count: usize,
    pub update_interval_secs: u64,
    pub display_secs: u64,
    pub background_polling: bool,
    pub databases: IdentifierStatus,
}

impl StatusReport {
    pub fn collect(config: &Config, state: &SharedState, identifier: &Identifier) -> Self {
        let now = Instant::now();
        let poll = state.poll_status();
        let (records, selected) = state.snapshot();
        let mode = if !config.enabled {
            "disabled"
        } else if config.has_credentials() {
            "authenticated"
        } else {
            "anonymous"
        };
        StatusReport {
            enabled: config.enabled,
            mode,
            home: HomeLocation {
                lat: config.home_lat,
                lon: config.home_lon,
            },
            radius_km: config.radius_km,
            radius_miles: config.radius_miles(),
            polling_window: PollingWindow {
                start_hour: config.start_hour,
                end_hour: config.end_hour,
                currently_active: config.in_polling_window(Local::now().hour()),
            },
            live_flights: records.len(),
            current_callsign: selected.map(|r| r.callsign),
            has_live_content: state.is_session_active(),
            last_update: poll.last_update,
            authenticated: poll.token_valid,
            consecutive_errors: poll.consecutive_errors,
            last_error: poll.last_error,
            in_backoff: poll.in_backoff,
            cooldown_count: state.cooldown_count_at(now),
            update_interval_secs: config.poll_interval.as_secs(),
            display_secs: config.display_duration.as_secs(),
            background_polling: poll.polling_active,
            databases: identifier.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::MilitaryHeloThresholds;
    use crate::session::InterruptionSession;
    use crate::state::tests::record;

    #[test]
    fn report_reflects_shared_state() {
        let config = Config::default();
        let state = SharedState::new(
            InterruptionSession::new(config.cooldown, config.max_session),
            config.display_duration,
        );
        let identifier = Identifier::new(MilitaryHeloThresholds::default(), 20);
        state.publish(vec![record("a12345", 2.0), record("b00001", 4.0)]);
        assert!(state.has_live_content());
        state.update_status(|s| s.consecutive_errors = 2);

        let report = StatusReport::collect(&config, &state, &identifier);
        assert_eq!(report.mode, "disabled");
        assert_eq!(report.live_flights, 2);
        assert_eq!(report.current_callsign.as_deref(), Some("TSTa12"));
        assert!(report.has_live_content);
        assert_eq!(report.cooldown_count, 2);
        assert_eq!(report.consecutive_errors, 2);
        assert!((report.radius_miles - 4.97).abs() < 0.01);
        assert!(report.databases.registry.is_none());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["home"]["lat"], 41.6);
        assert_eq!(json["polling_window"]["start_hour"], 6);
    }
}
