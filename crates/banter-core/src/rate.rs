use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub limit: usize,
    pub window: Duration,
}

impl RateWindow {
    pub fn new(limit: usize, seconds: u64) -> Self {
        Self {
            limit,
            window: Duration::from_secs(seconds),
        }
    }
}

/// Sliding-window admission for outbound channel messages.
///
/// Keeps at most `limit` send timestamps, oldest first. The ring starts with a
/// single "never" slot, so a burst of `limit` sends fits into an empty window
/// before the age of the oldest entry is consulted.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: RateWindow,
    sent: VecDeque<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(window: RateWindow) -> Self {
        let mut sent = VecDeque::with_capacity(window.limit + 1);
        sent.push_back(None);
        Self { window, sent }
    }

    pub fn window(&self) -> RateWindow {
        self.window
    }

    /// Swap in a new quota, keeping the retained timestamps.
    pub fn set_window(&mut self, window: RateWindow) {
        self.window = window;
        self.trim();
    }

    pub fn try_admit(&mut self) -> bool {
        self.try_admit_at(Instant::now())
    }

    pub fn try_admit_at(&mut self, now: Instant) -> bool {
        let at_quota = self.sent.len() >= self.window.limit.saturating_sub(1);
        let oldest_recent = match self.sent.front() {
            Some(Some(oldest)) => now.saturating_duration_since(*oldest) < self.window.window,
            _ => false,
        };
        if at_quota && oldest_recent {
            return false;
        }
        self.sent.push_back(Some(now));
        self.trim();
        true
    }

    /// Number of real sends currently retained.
    pub fn recorded(&self) -> usize {
        self.sent.iter().filter(|t| t.is_some()).count()
    }

    fn trim(&mut self) {
        while self.sent.len() > self.window.limit.max(1) {
            self.sent.pop_front();
        }
    }
}
