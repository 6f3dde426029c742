use std::time::Duration;
use tokio::time::Instant;

/// Holds the latest value until it has been left alone for `delay`.
///
/// Every [`schedule`](Self::schedule) replaces the pending value and restarts the timer.
#[derive(Debug, Clone)]
pub struct Debounce<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> Debounce<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some((now + self.delay, value));
    }

    /// Takes the pending value once its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((deadline, _)) if *deadline <= now => self.pending.take().map(|(_, value)| value),
            _ => None,
        }
    }

    /// Takes the pending value regardless of its deadline.
    pub fn flush(&mut self) -> Option<T> {
        self.pending.take().map(|(_, value)| value)
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(deadline, _)| *deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_held_until_quiet() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(1000));

        debounce.schedule(1, start);
        debounce.schedule(2, start + Duration::from_millis(600));

        assert_eq!(debounce.take_due(start + Duration::from_millis(1000)), None);
        assert_eq!(debounce.take_due(start + Duration::from_millis(1600)), Some(2));
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_flush_and_cancel() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(1000));
        debounce.schedule("a", start);
        assert_eq!(debounce.flush(), Some("a"));

        debounce.schedule("b", start);
        debounce.cancel();
        assert_eq!(debounce.take_due(start + Duration::from_secs(5)), None);
    }
}
