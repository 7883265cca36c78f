use deadtab_core::config::Config;
use deadtab_core::keymap::{self, KeyId};
use std::time::{Duration, Instant};
use tracing::debug;

/// Actions the monitor wants the caller to perform.
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Ask the supervisor to close the focused tab.
    RequestClosure,
    /// The switch armed or disarmed; broadcast to subscribers.
    StatusChanged { armed: bool },
}

/// The dead man's switch proper. While armed, the tab survives only as long
/// as the watched key stays held; release (or never pressing it within the
/// grace period) surrenders it.
///
/// Two closure triggers exist: the key-up event (primary) and the periodic
/// safety poll (backup, for a key-up the host swallowed). Both route through
/// `request_closure`, the single guarded choke point.
pub struct Monitor {
    armed: bool,
    watched_key: Option<KeyId>,
    key_held: bool,
    key_ever_held: bool,
    armed_at: Option<Instant>,
    last_poll: Option<Instant>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        Self {
            armed: false,
            watched_key: None,
            key_held: false,
            key_ever_held: false,
            armed_at: None,
            last_poll: None,
            poll_interval: Duration::from_millis(config.general.poll_interval_ms),
            grace_period: Duration::from_millis(config.general.grace_period_ms),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn watched_key(&self) -> Option<KeyId> {
        self.watched_key
    }

    /// Arm the switch on `key`. Re-arming while armed overwrites all
    /// tracking state (fresh grace window included).
    pub fn arm(&mut self, key: KeyId) -> Vec<Action> {
        let was_armed = self.armed;
        self.armed = true;
        self.watched_key = Some(key);
        self.key_held = false;
        self.key_ever_held = false;
        self.armed_at = Some(Instant::now());
        self.last_poll = Some(Instant::now());
        debug!(key = %keymap::display_name(key), "armed");
        if was_armed {
            Vec::new()
        } else {
            vec![Action::StatusChanged { armed: true }]
        }
    }

    /// Disarm from any state. Reentrant.
    ///
    /// `armed` and `watched_key` are zeroed before anything else: a poll
    /// tick or key event already queued behind this disarm must find the
    /// closure guard shut.
    pub fn disarm(&mut self) -> Vec<Action> {
        let was_armed = self.armed;
        self.armed = false;
        self.watched_key = None;
        self.key_held = false;
        self.key_ever_held = false;
        self.armed_at = None;
        self.last_poll = None;
        if was_armed {
            debug!("disarmed");
            vec![Action::StatusChanged { armed: false }]
        } else {
            Vec::new()
        }
    }

    /// Replace the watched key while armed. The hold of the old key is
    /// dropped with it — its release can no longer match, and a stale held
    /// flag would block the safety poll forever — while `key_ever_held`
    /// and the grace window carry over. Returns false when disarmed.
    pub fn update_key(&mut self, key: KeyId) -> bool {
        if !self.armed {
            return false;
        }
        debug!(key = %keymap::display_name(key), "watched key updated");
        self.watched_key = Some(key);
        self.key_held = false;
        true
    }

    /// Drop any hold the monitor believes is in effect. Used when the key
    /// stream was diverted (a capture session consumes every transition)
    /// and a release may have gone unseen. `key_ever_held` stays set, so
    /// the next poll treats an unheld key as surrendered.
    pub fn assume_key_released(&mut self) {
        self.key_held = false;
    }

    pub fn on_key_down(&mut self, key: KeyId) {
        if !self.armed {
            return;
        }
        if self.watched_key == Some(key) && !self.key_held {
            debug!("watched key held");
            self.key_held = true;
            self.key_ever_held = true;
        }
    }

    /// Primary closure trigger: releasing the watched key surrenders the
    /// switch.
    pub fn on_key_up(&mut self, key: KeyId) -> Vec<Action> {
        if !self.armed || self.watched_key.is_none() {
            return Vec::new();
        }
        if self.watched_key == Some(key) {
            self.key_held = false;
            debug!("watched key released, requesting closure");
            return self.request_closure();
        }
        Vec::new()
    }

    /// Backup closure trigger, fired every poll interval while armed.
    /// Compensates for a key-up the host never delivered.
    pub fn safety_poll(&mut self) -> Vec<Action> {
        // Stale-timer defense: a disarm may have landed between this tick
        // being scheduled and firing.
        if !self.armed || self.watched_key.is_none() {
            return Vec::new();
        }
        self.last_poll = Some(Instant::now());

        if self.key_held {
            return Vec::new();
        }
        if self.key_ever_held {
            debug!("poll: key was held but no longer is, requesting closure");
            return self.request_closure();
        }
        let since_arm = self.armed_at.map(|t| t.elapsed()).unwrap_or_default();
        if since_arm > self.grace_period {
            debug!(elapsed_ms = since_arm.as_millis() as u64, "poll: grace period expired with key never held");
            return self.request_closure();
        }
        Vec::new()
    }

    /// The single choke point both triggers route through. State is
    /// re-checked at the instant of the call, so a disarm that landed since
    /// the caller's snapshot suppresses the request. On success the monitor
    /// resets itself: one surrender, one closure.
    fn request_closure(&mut self) -> Vec<Action> {
        if !self.armed || self.watched_key.is_none() {
            debug!("closure request suppressed: not armed");
            return Vec::new();
        }
        let mut actions = self.disarm();
        actions.insert(0, Action::RequestClosure);
        actions
    }

    /// Next instant the safety poll needs to run, or None when disarmed —
    /// disarm inherently cancels the poll, no timer can dangle.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.armed {
            return None;
        }
        self.last_poll.map(|t| t + self.poll_interval)
    }

}
