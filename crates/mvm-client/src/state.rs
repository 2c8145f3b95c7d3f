//! Connection lifecycle primitives: the state enum, the reconnect backoff
//! schedule, and heartbeat bookkeeping. All pure so the transition table is
//! testable without sockets.

use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Where the gateway link currently is.
///
/// `Fatal` is terminal: a host-requested shutdown lands here and nothing
/// schedules further reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Handshaking,
    Authenticating,
    Authenticated,
    Fatal,
}

impl LinkState {
    /// Label used by the `stats` rendering.
    pub fn label(self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Handshaking => "Handshaking",
            LinkState::Authenticating => "Authenticating",
            LinkState::Authenticated => "Connected",
            LinkState::Fatal => "Shut down",
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

/// Delay before the next connection attempt after `failures` consecutive
/// failed attempts: `base · backoff^(failures−1)`, capped at `max_delay`.
/// A fresh disconnect (zero failures) waits the base delay.
pub fn reconnect_delay(base: Duration, backoff: u32, max_delay: Duration, failures: u32) -> Duration {
    let mut delay = base;
    for _ in 1..failures {
        delay = delay.saturating_mul(backoff);
        if delay >= max_delay {
            return max_delay;
        }
    }
    delay.min(max_delay)
}

// ---------------------------------------------------------------------------
// Heartbeat bookkeeping
// ---------------------------------------------------------------------------

/// Ping/pong timestamps for one authenticated session.
///
/// Both stamps start at the moment of authentication: the first ping goes
/// out one interval after connecting, and a gateway that never answers a
/// single ping still trips the liveness check.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub last_ping: Instant,
    pub last_pong: Instant,
}

impl Heartbeat {
    pub fn new(connected_at: Instant) -> Self {
        Self {
            last_ping: connected_at,
            last_pong: connected_at,
        }
    }

    pub fn ping_due(&self, now: Instant, interval: Duration) -> bool {
        now.duration_since(self.last_ping) >= interval
    }

    pub fn record_ping(&mut self, now: Instant) {
        self.last_ping = now;
    }

    /// A pong answers the most recent ping.
    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = now;
    }

    /// Liveness fails when the most recent ping has gone unanswered for two
    /// full intervals, or (with no ping outstanding) when no pong has been
    /// seen for that long.
    pub fn expired(&self, now: Instant, interval: Duration) -> bool {
        if self.last_pong < self.last_ping {
            now.duration_since(self.last_ping) >= interval * 2
        } else {
            now.duration_since(self.last_pong) > interval * 2
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
