//! Presence and directory caches: peer MUDs and remote users, with
//! TTL-based staleness. Entries past their TTL stay in the map (the next
//! update refreshes them in place) but are never returned to callers.

use std::collections::HashMap;

/// What we know about a peer MUD on the mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMud {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub version: String,
    pub admin_email: String,
    pub user_count: u32,
    pub uptime_seconds: u64,
    /// Monotonic seconds of the last envelope or listing naming this MUD.
    pub last_seen: u64,
}

/// Cached profile of a user on a peer MUD.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteUser {
    pub mud: String,
    pub username: String,
    pub display_name: String,
    pub level: Option<i64>,
    pub idle_seconds: i64,
    pub location: String,
    pub race: String,
    pub class: String,
    pub guild: String,
    pub last_login: String,
    /// Monotonic seconds when this entry was cached.
    pub cached_at: u64,
}

/// Both caches, sharing one TTL discipline.
#[derive(Debug)]
pub struct Directory {
    ttl_seconds: u64,
    muds: HashMap<String, PeerMud>,
    users: HashMap<(String, String), RemoteUser>,
}

impl Directory {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            muds: HashMap::new(),
            users: HashMap::new(),
        }
    }

    /// Refresh the last-seen stamp for a MUD, creating a minimal record if
    /// it was unknown. Called for every inbound envelope's `from.mud`.
    pub fn touch_mud(&mut self, name: &str, now: u64) {
        let entry = self.muds.entry(name.to_owned()).or_insert_with(|| PeerMud {
            name: name.to_owned(),
            ..PeerMud::default()
        });
        entry.last_seen = now;
    }

    /// Replace a MUD record from a gateway listing.
    pub fn upsert_mud(&mut self, mut mud: PeerMud, now: u64) {
        mud.last_seen = now;
        self.muds.insert(mud.name.clone(), mud);
    }

    /// Fresh peer records, name-sorted. Stale entries are skipped.
    pub fn fresh_muds(&self, now: u64) -> Vec<&PeerMud> {
        let mut muds: Vec<&PeerMud> = self
            .muds
            .values()
            .filter(|m| now.saturating_sub(m.last_seen) < self.ttl_seconds)
            .collect();
        muds.sort_by(|a, b| a.name.cmp(&b.name));
        muds
    }

    pub fn upsert_user(&mut self, mut user: RemoteUser, now: u64) {
        user.cached_at = now;
        self.users
            .insert((user.mud.clone(), user.username.to_lowercase()), user);
    }

    /// Fresh cache entry for one remote user, if any.
    pub fn fresh_user(&self, mud: &str, username: &str, now: u64) -> Option<&RemoteUser> {
        self.users
            .get(&(mud.to_owned(), username.to_lowercase()))
            .filter(|u| now.saturating_sub(u.cached_at) < self.ttl_seconds)
    }

    /// Drop entries past their TTL; called from the periodic tick.
    pub fn purge(&mut self, now: u64) {
        let ttl = self.ttl_seconds;
        self.muds
            .retain(|_, m| now.saturating_sub(m.last_seen) < ttl);
        self.users
            .retain(|_, u| now.saturating_sub(u.cached_at) < ttl);
    }
}
