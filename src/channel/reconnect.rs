//! Reconnect schedule

use std::time::Duration;

/// Longest wait between attempts
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(120);

/// Waits before successive reconnect attempts
///
/// The first attempt is immediate, then the wait doubles from one second up
/// to [`MAX_RECONNECT_DELAY`]: 0, 1, 2, 4, 8, 16, 32, 64, 120, 120, ...
#[derive(Debug, Clone, Default)]
pub struct ReconnectSchedule {
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.attempt {
            0 => Duration::ZERO,
            n => Duration::from_secs(1u64 << (n - 1).min(7)).min(MAX_RECONNECT_DELAY),
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

impl Iterator for ReconnectSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        let delays: Vec<u64> = ReconnectSchedule::new()
            .take(11)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![0, 1, 2, 4, 8, 16, 32, 64, 120, 120, 120]);
    }

    #[test]
    fn test_schedule_counts_attempts() {
        let mut schedule = ReconnectSchedule::new();
        assert_eq!(schedule.next_delay(), Duration::ZERO);
        assert_eq!(schedule.next_delay(), Duration::from_secs(1));
        assert_eq!(schedule.attempts(), 2);
    }
}
