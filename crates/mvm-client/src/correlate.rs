//! Request/response correlation for who, finger, and locate.
//!
//! A response carries the envelope id of the request it answers. Each
//! outbound request maps its id to the invoking local player for a short
//! TTL; unmatched or late responses are dropped by the router.

use std::collections::HashMap;

/// Seconds a pending request stays claimable.
pub const CORRELATION_TTL_SECS: u64 = 30;

#[derive(Debug, Clone)]
struct Pending {
    caller: String,
    created: u64,
}

#[derive(Debug, Default)]
pub struct CorrelationMap {
    pending: HashMap<String, Pending>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, caller: impl Into<String>, now: u64) {
        self.pending.insert(
            id.into(),
            Pending {
                caller: caller.into(),
                created: now,
            },
        );
    }

    /// Claim the caller for a response id. Expired entries are treated as
    /// absent; the entry is consumed either way.
    pub fn take(&mut self, id: &str, now: u64) -> Option<String> {
        let pending = self.pending.remove(id)?;
        if now.saturating_sub(pending.created) >= CORRELATION_TTL_SECS {
            return None;
        }
        Some(pending.caller)
    }

    /// Drop expired entries; called from the periodic tick.
    pub fn purge(&mut self, now: u64) {
        self.pending
            .retain(|_, p| now.saturating_sub(p.created) < CORRELATION_TTL_SECS);
    }

    /// Forget everything (connection teardown). In-flight callers simply
    /// never hear back, which surfaces host-side as "no reply".
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
