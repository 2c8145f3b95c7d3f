//! Per-operation rate limiting.
//!
//! Fixed 60-second windows, counted independently per (operation, local
//! user). A rejected attempt never consumes a slot, so a player hammering a
//! capped command is not locked out longer than one window.

use std::collections::HashMap;

/// Operations subject to per-minute caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKind {
    Tell,
    Channel,
    Who,
}

impl RateKind {
    /// What the player is sending, for the rejection line.
    pub fn noun(self) -> &'static str {
        match self {
            RateKind::Tell => "tells",
            RateKind::Channel => "channel messages",
            RateKind::Who => "who requests",
        }
    }
}

/// Per-minute caps, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateCaps {
    pub tells: u32,
    pub channels: u32,
    pub who: u32,
}

impl Default for RateCaps {
    fn default() -> Self {
        Self {
            tells: 20,
            channels: 30,
            who: 5,
        }
    }
}

const WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone, Copy)]
struct Window {
    start: u64,
    count: u32,
}

/// Sliding counters per (operation, user).
#[derive(Debug, Default)]
pub struct RateLimiter {
    caps: RateCaps,
    windows: HashMap<(RateKind, String), Window>,
}

impl RateLimiter {
    pub fn new(caps: RateCaps) -> Self {
        Self {
            caps,
            windows: HashMap::new(),
        }
    }

    /// Record one attempt at `now` (monotonic seconds). Returns `false` and
    /// leaves the counter untouched when the cap is already reached.
    pub fn check(&mut self, kind: RateKind, user: &str, now: u64) -> bool {
        let cap = match kind {
            RateKind::Tell => self.caps.tells,
            RateKind::Channel => self.caps.channels,
            RateKind::Who => self.caps.who,
        };

        let window = self
            .windows
            .entry((kind, user.to_owned()))
            .or_insert(Window { start: now, count: 0 });

        if now.saturating_sub(window.start) >= WINDOW_SECS {
            window.start = now;
            window.count = 0;
        }
        if window.count >= cap {
            return false;
        }
        window.count += 1;
        true
    }
}
