use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Decides whether in-range aircraft should take over the display.
///
/// Every aircraft present when a session starts (or that joins one) is put
/// into cooldown immediately, so a lingering aircraft cannot start a second
/// session until its cooldown lapses. A session ends when the sky empties or
/// after `max_session`; a genuinely new arrival restarts the session clock.
#[derive(Debug)]
pub struct InterruptionSession {
    active: bool,
    started_at: Option<Instant>,
    cooldown_until: HashMap<String, Instant>,
    cooldown: Duration,
    max_session: Duration,
}

impl InterruptionSession {
    pub fn new(cooldown: Duration, max_session: Duration) -> Self {
        InterruptionSession {
            active: false,
            started_at: None,
            cooldown_until: HashMap::new(),
            cooldown,
            max_session,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn in_cooldown(&self, hex_code: &str, now: Instant) -> bool {
        self.cooldown_until
            .get(hex_code)
            .is_some_and(|until| now < *until)
    }

    pub fn cooldown_count_at(&self, now: Instant) -> usize {
        self.cooldown_until.values().filter(|until| now < **until).count()
    }

    pub fn evaluate_at<'a, I>(&mut self, present: I, now: Instant) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: Vec<&str> = present.into_iter().collect();
        self.cooldown_until.retain(|_, until| *until > now);

        if !self.active {
            if present.is_empty() || present.iter().all(|hex| self.in_cooldown(hex, now)) {
                return false;
            }
            self.active = true;
            self.started_at = Some(now);
            self.start_cooldowns(&present, now);
            info!("flight interruption started with {} aircraft", present.len());
            return true;
        }

        if present.is_empty() {
            self.finish();
            info!("flight interruption ended: no aircraft in range");
            return false;
        }

        let started = *self.started_at.get_or_insert(now);
        if now.saturating_duration_since(started) >= self.max_session {
            self.start_cooldowns(&present, now);
            self.finish();
            info!(
                "flight interruption ended after {}s; {} aircraft cooling down",
                self.max_session.as_secs(),
                present.len()
            );
            return false;
        }

        let arrivals: Vec<&str> = present
            .iter()
            .copied()
            .filter(|hex| !self.in_cooldown(hex, now))
            .collect();
        if !arrivals.is_empty() {
            self.start_cooldowns(&arrivals, now);
            self.started_at = Some(now);
            debug!("new arrival {:?} restarted the interruption window", arrivals);
        }
        true
    }

    fn start_cooldowns(&mut self, hexes: &[&str], now: Instant) {
        let until = now + self.cooldown;
        for hex in hexes {
            self.cooldown_until.insert((*hex).to_string(), until);
        }
    }

    fn finish(&mut self) {
        self.active = false;
        self.started_at = None;
    }
}
