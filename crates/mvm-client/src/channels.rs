//! Channel registry: named channels and their local member sets.
//!
//! Membership authority is local: joining mutates our set and merely
//! informs the gateway. Channel records survive their last member leaving
//! so descriptions announced by the gateway are not lost.

use std::collections::{BTreeMap, BTreeSet};

use mvm_protocol::validate;

use crate::error::MeshError;

/// One known channel. Member names are stored lowercased; MUD-side player
/// names are case-insensitive.
#[derive(Debug, Default)]
pub struct Channel {
    pub description: String,
    pub moderated: bool,
    members: BTreeSet<String>,
}

impl Channel {
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// All channels this MUD has seen, keyed by name.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a channel (auto-join list, gateway announcements).
    pub fn ensure(&mut self, name: &str) -> Result<(), MeshError> {
        validated(name)?;
        self.channels.entry(name.to_owned()).or_default();
        Ok(())
    }

    /// Add `user` to the channel's local member set, creating the channel
    /// with default attributes if it is unknown. Returns `true` when the
    /// membership actually changed.
    pub fn join(&mut self, name: &str, user: &str) -> Result<bool, MeshError> {
        validated(name)?;
        let channel = self.channels.entry(name.to_owned()).or_default();
        Ok(channel.members.insert(user.to_lowercase()))
    }

    /// Remove `user` from the channel. The channel record is retained even
    /// when its member set empties.
    pub fn leave(&mut self, name: &str, user: &str) -> Result<bool, MeshError> {
        validated(name)?;
        match self.channels.get_mut(name) {
            Some(channel) => Ok(channel.members.remove(&user.to_lowercase())),
            None => Err(MeshError::NotFound(format!("Channel '{name}'"))),
        }
    }

    pub fn is_member(&self, name: &str, user: &str) -> bool {
        self.channels
            .get(name)
            .is_some_and(|c| c.members.contains(&user.to_lowercase()))
    }

    /// Local members of a channel; empty when the channel is unknown.
    pub fn members(&self, name: &str) -> Vec<String> {
        self.channels
            .get(name)
            .map(|c| c.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    /// (name, channel) pairs in name order.
    pub fn list(&self) -> impl Iterator<Item = (&str, &Channel)> {
        self.channels.iter().map(|(n, c)| (n.as_str(), c))
    }
}

fn validated(name: &str) -> Result<(), MeshError> {
    if validate::channel_name(name) {
        Ok(())
    } else {
        Err(MeshError::Protocol(format!("invalid channel name '{name}'")))
    }
}
