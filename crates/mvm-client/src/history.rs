//! Bounded recent-message log, one ring per conversation kind.

use std::collections::VecDeque;

use mvm_protocol::MessageKind;

/// One logged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub kind: MessageKind,
    /// `user@mud` or a bare MUD name.
    pub from: String,
    /// `user@mud`, a local user, or a channel name.
    pub to: String,
    pub message: String,
    /// ISO-8601 UTC.
    pub timestamp: String,
}

/// Fixed-capacity FIFO; oldest entries are evicted first.
#[derive(Debug)]
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first, at most `count` entries.
    pub fn recent(&self, count: usize) -> Vec<&HistoryEntry> {
        self.entries.iter().rev().take(count).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The per-kind rings the client keeps. Tells and emotes share the default
/// capacity; channel traffic is noisier and keeps a shorter tail.
#[derive(Debug)]
pub struct HistoryLog {
    tells: HistoryRing,
    emotes: HistoryRing,
    channel: HistoryRing,
}

impl HistoryLog {
    pub fn new(default_capacity: usize, channel_capacity: usize) -> Self {
        Self {
            tells: HistoryRing::new(default_capacity),
            emotes: HistoryRing::new(default_capacity),
            channel: HistoryRing::new(channel_capacity),
        }
    }

    /// Ring for a kind; directed emotes share the emote ring. Kinds without
    /// history (session and directory traffic) return `None`.
    pub fn ring_mut(&mut self, kind: MessageKind) -> Option<&mut HistoryRing> {
        match kind {
            MessageKind::Tell => Some(&mut self.tells),
            MessageKind::Emote | MessageKind::EmoteTo => Some(&mut self.emotes),
            MessageKind::Channel => Some(&mut self.channel),
            _ => None,
        }
    }

    pub fn ring(&self, kind: MessageKind) -> Option<&HistoryRing> {
        match kind {
            MessageKind::Tell => Some(&self.tells),
            MessageKind::Emote | MessageKind::EmoteTo => Some(&self.emotes),
            MessageKind::Channel => Some(&self.channel),
            _ => None,
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        if let Some(ring) = self.ring_mut(entry.kind) {
            ring.push(entry);
        }
    }
}
