use deadtab_core::config::Config;
use deadtab_core::keymap::{self, KeyId};
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of feeding a key transition or countdown tick to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Countdown still running; render remaining time and fraction complete.
    Progress {
        ticks_remaining: u8,
        fraction: f32,
        candidate: Option<KeyId>,
    },
    /// A key was chosen; the session is finished.
    Committed(KeyId),
    /// The window expired with no candidate; the session is finished.
    Cancelled,
}

/// Timed key-capture interaction: the first key pressed during the
/// countdown becomes the candidate, and the candidate commits on its own
/// release, on Enter pressed over it, or on countdown expiry. No key by
/// expiry cancels.
///
/// The session is dropped by the owner once it yields Committed or
/// Cancelled; there is no resurrecting a resolved capture.
pub struct CaptureSession {
    candidate: Option<KeyId>,
    ticks_total: u8,
    ticks_done: u8,
    tick: Duration,
    started: Instant,
}

impl CaptureSession {
    pub fn new(config: &Config) -> Self {
        debug!(
            ticks = config.capture.countdown_ticks,
            tick_ms = config.capture.tick_ms,
            "capture started"
        );
        Self {
            candidate: None,
            ticks_total: config.capture.countdown_ticks.max(1),
            ticks_done: 0,
            tick: Duration::from_millis(config.capture.tick_ms),
            started: Instant::now(),
        }
    }

    /// Current countdown state, for the initial display before any tick.
    pub fn progress(&self) -> CaptureEvent {
        CaptureEvent::Progress {
            ticks_remaining: self.ticks_total - self.ticks_done,
            fraction: f32::from(self.ticks_done) / f32::from(self.ticks_total),
            candidate: self.candidate,
        }
    }

    pub fn on_key_down(&mut self, key: KeyId) -> Option<CaptureEvent> {
        match self.candidate {
            None => {
                debug!(key = %keymap::display_name(key), "capture candidate");
                self.candidate = Some(key);
                Some(self.progress())
            }
            // Enter confirms an existing candidate immediately. Enter can
            // still BE the candidate if it was the first key pressed.
            Some(candidate) if key == keymap::KEY_ENTER && candidate != keymap::KEY_ENTER => {
                Some(CaptureEvent::Committed(candidate))
            }
            // First key-down wins; later presses don't replace it.
            Some(_) => None,
        }
    }

    pub fn on_key_up(&mut self, key: KeyId) -> Option<CaptureEvent> {
        match self.candidate {
            Some(candidate) if candidate == key => Some(CaptureEvent::Committed(candidate)),
            _ => None,
        }
    }

    /// Advance the countdown by one tick. On expiry a candidate commits,
    /// no candidate cancels.
    pub fn on_tick(&mut self) -> CaptureEvent {
        self.ticks_done += 1;
        if self.ticks_done >= self.ticks_total {
            match self.candidate {
                Some(candidate) => CaptureEvent::Committed(candidate),
                None => CaptureEvent::Cancelled,
            }
        } else {
            self.progress()
        }
    }

    /// Instant of the next countdown tick. Always Some: a live session
    /// always has a tick pending, and a resolved one no longer exists.
    pub fn next_deadline(&self) -> Option<Instant> {
        Some(self.started + self.tick * u32::from(self.ticks_done + 1))
    }
}
