use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Timelike, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::geo::{bearing_deg, compass_point, compute_bounding_box, distance_km, BoundingBox};
use crate::identify::Identifier;
use crate::model::{parse_state_vector, PositionRecord, StateVector, StatesResponse, TokenResponse};
use crate::state::SharedState;

const DEFAULT_TOKEN_EXPIRY_SECS: u64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);
const STOP_CHECK_STEP: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FetchError {
    #[error("client credentials are not configured")]
    MissingCredentials,
    #[error("credentials rejected")]
    Unauthorized,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

pub trait PositionSource: Send {
    fn refresh_credentials(&mut self, now: Instant) -> Result<(), FetchError>;
    fn fetch_states(&mut self, bbox: &BoundingBox) -> Result<StatesResponse, FetchError>;
    fn has_valid_token(&self, now: Instant) -> bool;
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct OpenSkyClient {
    http: reqwest::blocking::Client,
    token_url: String,
    states_url: String,
    client_id: String,
    client_secret: String,
    token_timeout: Duration,
    positions_timeout: Duration,
    token: Option<CachedToken>,
}

impl OpenSkyClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("flight-live/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build position API client")?;
        Ok(OpenSkyClient {
            http,
            token_url: config.token_url.clone(),
            states_url: config.states_url.clone(),
            client_id: config.client_id.trim().to_string(),
            client_secret: config.client_secret.trim().to_string(),
            token_timeout: config.token_timeout,
            positions_timeout: config.positions_timeout,
            token: None,
        })
    }
}

impl PositionSource for OpenSkyClient {
    fn refresh_credentials(&mut self, now: Instant) -> Result<(), FetchError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(FetchError::MissingCredentials);
        }
        if self
            .token
            .as_ref()
            .is_some_and(|token| now + TOKEN_REFRESH_MARGIN < token.expires_at)
        {
            return Ok(());
        }
        let resp = self
            .http
            .post(&self.token_url)
            .timeout(self.token_timeout)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .map_err(transport)?;
        let status = resp.status();
        if matches!(status.as_u16(), 400 | 401 | 403) {
            self.token = None;
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body: TokenResponse = resp
            .json()
            .map_err(|err| FetchError::Decode(err.to_string()))?;
        let expires_in = body.expires_in.unwrap_or(DEFAULT_TOKEN_EXPIRY_SECS);
        self.token = Some(CachedToken {
            value: body.access_token,
            expires_at: now + Duration::from_secs(expires_in),
        });
        debug!("access token refreshed, expires in {}s", expires_in);
        Ok(())
    }

    fn fetch_states(&mut self, bbox: &BoundingBox) -> Result<StatesResponse, FetchError> {
        let token = self
            .token
            .as_ref()
            .map(|token| token.value.clone())
            .ok_or(FetchError::Unauthorized)?;
        let resp = self
            .http
            .get(states_query_url(&self.states_url, bbox))
            .timeout(self.positions_timeout)
            .bearer_auth(token)
            .send()
            .map_err(transport)?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.token = None;
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json::<StatesResponse>()
            .map_err(|err| FetchError::Decode(err.to_string()))
    }

    fn has_valid_token(&self, now: Instant) -> bool {
        self.token.as_ref().is_some_and(|token| now < token.expires_at)
    }
}

fn transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Transport("timed out".to_string())
    } else {
        FetchError::Transport(err.to_string())
    }
}

fn states_query_url(base: &str, bbox: &BoundingBox) -> String {
    let query: Vec<String> = bbox
        .query_pairs()
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, query.join("&"))
}

#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    Disabled,
    OutsideWindow,
    BackingOff,
    Failed(FetchError),
    Published(usize),
}

struct Candidate {
    state: StateVector,
    callsign: String,
    latitude: f64,
    longitude: f64,
    distance_km: f64,
}

pub struct Poller {
    config: Config,
    bbox: BoundingBox,
    source: Box<dyn PositionSource>,
    identifier: Arc<Identifier>,
    state: SharedState,
    consecutive_errors: u32,
    backoff_until: Option<Instant>,
    last_status_log: Option<Instant>,
}

impl Poller {
    pub fn new(
        config: Config,
        source: Box<dyn PositionSource>,
        identifier: Arc<Identifier>,
        state: SharedState,
    ) -> Self {
        let bbox = compute_bounding_box(config.home_lat, config.home_lon, config.radius_km);
        Poller {
            config,
            bbox,
            source,
            identifier,
            state,
            consecutive_errors: 0,
            backoff_until: None,
            last_status_log: None,
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bbox
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn poll_once(&mut self) -> PollOutcome {
        self.poll_once_at(Instant::now(), Local::now().hour())
    }

    pub fn poll_once_at(&mut self, now: Instant, hour: u32) -> PollOutcome {
        if !self.config.enabled {
            self.state.publish_at(Vec::new(), now);
            return PollOutcome::Disabled;
        }
        let in_window = self.config.in_polling_window(hour);
        self.state.update_status(|status| status.in_window = in_window);
        if !in_window {
            self.state.publish_at(Vec::new(), now);
            return PollOutcome::OutsideWindow;
        }

        if let Some(until) = self.backoff_until {
            if now < until {
                return PollOutcome::BackingOff;
            }
            info!("error backoff elapsed, resuming polling");
            self.backoff_until = None;
            self.consecutive_errors = 0;
            self.state.update_status(|status| status.in_backoff = false);
        }

        match self.fetch(now) {
            Ok(resp) => {
                let records = self.build_records(resp);
                let count = records.len();
                self.log_status(now, &records);
                self.state.publish_at(records, now);
                self.consecutive_errors = 0;
                let token_valid = self.source.has_valid_token(now);
                self.state.update_status(|status| {
                    status.last_update = Some(Utc::now());
                    status.consecutive_errors = 0;
                    status.last_error = None;
                    status.token_valid = token_valid;
                });
                PollOutcome::Published(count)
            }
            Err(err) => {
                self.record_failure(now, &err);
                PollOutcome::Failed(err)
            }
        }
    }

    fn fetch(&mut self, now: Instant) -> Result<StatesResponse, FetchError> {
        self.source.refresh_credentials(now)?;
        self.source.fetch_states(&self.bbox)
    }

    fn record_failure(&mut self, now: Instant, err: &FetchError) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        warn!(
            "flight poll failed ({}/{}): {}",
            self.consecutive_errors, self.config.max_consecutive_errors, err
        );
        let entering_backoff = self.consecutive_errors >= self.config.max_consecutive_errors;
        if entering_backoff {
            self.backoff_until = Some(now + self.config.error_backoff);
            warn!(
                "too many consecutive errors, backing off for {}s",
                self.config.error_backoff.as_secs()
            );
            // Stale aircraft should not stay on the display through the backoff.
            self.state.publish_at(Vec::new(), now);
        }
        let errors = self.consecutive_errors;
        let message = err.to_string();
        let token_valid = self.source.has_valid_token(now);
        self.state.update_status(|status| {
            status.consecutive_errors = errors;
            status.last_error = Some(message);
            status.token_valid = token_valid;
            status.in_backoff = entering_backoff;
        });
    }

    fn build_records(&self, resp: StatesResponse) -> Vec<PositionRecord> {
        let observed_at = resp
            .time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        let rows = resp.states.unwrap_or_default();
        let mut skipped = 0usize;
        let mut candidates: Vec<Candidate> = Vec::new();
        for row in &rows {
            match row.as_array().and_then(|values| parse_state_vector(values)) {
                Some(state) => {
                    if let Some(candidate) = self.candidate(state) {
                        candidates.push(candidate);
                    }
                }
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("skipped {} malformed state vectors", skipped);
        }

        candidates.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        candidates.truncate(self.config.max_flights);

        candidates
            .into_iter()
            .map(|c| self.to_record(c, observed_at))
            .collect()
    }

    fn candidate(&self, state: StateVector) -> Option<Candidate> {
        if state.on_ground {
            return None;
        }
        let (latitude, longitude) = (state.latitude?, state.longitude?);
        let callsign = state.callsign.clone()?;
        if state
            .baro_altitude_m
            .is_some_and(|alt| alt < self.config.min_altitude_m)
        {
            return None;
        }
        let distance_km = distance_km(self.config.home_lat, self.config.home_lon, latitude, longitude);
        if distance_km > self.config.radius_km {
            return None;
        }
        Some(Candidate {
            state,
            callsign,
            latitude,
            longitude,
            distance_km,
        })
    }

    fn to_record(&self, c: Candidate, observed_at: DateTime<Utc>) -> PositionRecord {
        let altitude_ft = c.state.altitude_ft();
        let ground_speed_kt = c.state.ground_speed_kt();
        let aircraft = self
            .identifier
            .identify(&c.state.icao24, &c.callsign, altitude_ft, ground_speed_kt);
        let bearing = bearing_deg(self.config.home_lat, self.config.home_lon, c.latitude, c.longitude);
        PositionRecord {
            hex_code: c.state.icao24,
            callsign: c.callsign,
            latitude: c.latitude,
            longitude: c.longitude,
            altitude_ft,
            ground_speed_kt,
            heading: c.state.true_track,
            vertical_rate: c.state.vertical_rate,
            distance_km: c.distance_km,
            bearing_deg: bearing,
            compass: compass_point(bearing),
            observed_at,
            aircraft,
        }
    }

    fn log_status(&mut self, now: Instant, records: &[PositionRecord]) {
        if self
            .last_status_log
            .is_some_and(|at| now.saturating_duration_since(at) < STATUS_LOG_INTERVAL)
        {
            return;
        }
        self.last_status_log = Some(now);
        if records.is_empty() {
            info!("no flights within {:.1} km", self.config.radius_km);
            return;
        }
        let closest: Vec<String> = records
            .iter()
            .take(3)
            .map(|r| format!("{} {:.1}km {}", r.callsign, r.distance_km, r.aircraft.type_code))
            .collect();
        info!("{} live flight(s): {}", records.len(), closest.join(", "));
    }
}

/// Runs the poller on its own thread until `stop` is set. The stop flag is
/// checked at least every half second, also while waiting between polls.
pub fn spawn_poller(mut poller: Poller, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    thread::spawn(move || {
        let interval = poller.config.poll_interval;
        info!("flight poller started (every {}s)", interval.as_secs());
        poller.state.update_status(|status| status.polling_active = true);
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            let outcome = poller.poll_once_at(started, Local::now().hour());
            debug!("poll outcome: {:?}", outcome);
            let next = started + interval;
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let remaining = next.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                thread::sleep(remaining.min(STOP_CHECK_STEP));
            }
        }
        poller.state.update_status(|status| status.polling_active = false);
        info!("flight poller stopped");
    })
}
