use crate::closer::TabCloser;
use tracing::{info, warn};

/// Single source of truth for armed/disarmed status and the relay between
/// closure requests and the host tab-closing primitive. Stateless beyond
/// the cached status flag.
pub struct Supervisor {
    last_known_status: bool,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            last_known_status: false,
        }
    }

    pub fn status(&self) -> bool {
        self.last_known_status
    }

    pub fn set_status(&mut self, armed: bool) {
        if self.last_known_status != armed {
            info!(armed, "status changed");
        }
        self.last_known_status = armed;
    }

    /// Forward a closure request to the host. A failed close is logged and
    /// dropped, never retried: the user already surrendered the tab, so
    /// there is nothing useful left to do with the error.
    pub fn relay_closure(&self, closer: &mut dyn TabCloser) {
        info!("relaying closure request to host");
        if let Err(e) = closer.close_active_tab() {
            warn!(error = %e, "closing tab failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    struct RecordingCloser {
        closes: usize,
    }

    impl TabCloser for RecordingCloser {
        fn close_active_tab(&mut self) -> Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    struct FailingCloser;

    impl TabCloser for FailingCloser {
        fn close_active_tab(&mut self) -> Result<()> {
            anyhow::bail!("tab already gone")
        }
    }

    #[test]
    fn starts_disarmed() {
        assert!(!Supervisor::new().status());
    }

    #[test]
    fn set_status_is_reported_back() {
        let mut sup = Supervisor::new();
        sup.set_status(true);
        assert!(sup.status());
        sup.set_status(false);
        assert!(!sup.status());
    }

    #[test]
    fn relay_invokes_the_closer_exactly_once() {
        let sup = Supervisor::new();
        let mut closer = RecordingCloser { closes: 0 };
        sup.relay_closure(&mut closer);
        assert_eq!(closer.closes, 1);
    }

    #[test]
    fn relay_swallows_closer_failure() {
        let sup = Supervisor::new();
        let mut closer = FailingCloser;
        // Must not panic or propagate; the failure is only logged
        sup.relay_closure(&mut closer);
    }
}
