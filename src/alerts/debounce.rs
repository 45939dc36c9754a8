use std::time::Duration;
use tokio::time::Instant;

pub const ALERT_DEBOUNCE_QUIET_PERIOD: Duration = Duration::from_millis(1_500);

/// Releases a value once it has stayed unchanged for the quiet period.
/// Each push restarts the window.
#[derive(Debug)]
pub struct Debouncer<T> {
    quiet_period: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            pending: None,
        }
    }

    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.quiet_period));
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, deadline)| *deadline)
    }

    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.pending.take() {
            Some((value, deadline)) if deadline <= now => Some(value),
            pending => {
                self.pending = pending;
                None
            }
        }
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
