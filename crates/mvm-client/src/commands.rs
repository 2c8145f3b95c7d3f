//! Player command surface.
//!
//! The host's command table parses arguments and enqueues one [`Command`]
//! per invocation; the core validates, gates, rate-limits, and answers the
//! player through the host adapter. Handlers return the envelopes to send,
//! mirroring the router.

use tokio::time::Instant;
use uuid::Uuid;

use mvm_protocol::builders::{self, ChannelAction};
use mvm_protocol::{MessageKind, validate};

use crate::client::Core;
use crate::error::MeshError;
use crate::history::HistoryEntry;
use crate::host::{Capability, DeliveryStyle};
use crate::rate::RateKind;
use crate::state::LinkState;

/// One queued host-side invocation.
#[derive(Debug, Clone)]
pub enum Command {
    Tell { from: String, target: String, message: String },
    Emote { from: String, mud: String, action: String },
    EmoteTo { from: String, target: String, action: String },
    ChannelMsg { from: String, channel: String, message: String },
    Join { from: String, channel: String },
    Leave { from: String, channel: String },
    Who { from: String, mud: String },
    Finger { from: String, target: String },
    Locate { from: String, user: String },
    ListMuds { from: String },
    ListChannels { from: String },
    Stats { from: String },
    History { from: String, kind: String, count: Option<usize> },
    Help { from: String },
    Reconnect { from: String },
    NotifyLogin { user: String },
    NotifyLogout { user: String },
    Shutdown,
}

impl Core {
    /// Execute one host command. Returns the records to send.
    pub fn handle_command(&mut self, cmd: Command, now: Instant) -> Vec<String> {
        match cmd {
            Command::Tell { from, target, message } => self.cmd_tell(&from, &target, &message, now),
            Command::Emote { from, mud, action } => self.cmd_emote(&from, &mud, &action),
            Command::EmoteTo { from, target, action } => self.cmd_emoteto(&from, &target, &action),
            Command::ChannelMsg { from, channel, message } => {
                self.cmd_channel(&from, &channel, &message, now)
            }
            Command::Join { from, channel } => self.cmd_join(&from, &channel),
            Command::Leave { from, channel } => self.cmd_leave(&from, &channel),
            Command::Who { from, mud } => self.cmd_who(&from, &mud, now),
            Command::Finger { from, target } => self.cmd_finger(&from, &target, now),
            Command::Locate { from, user } => self.cmd_locate(&from, &user, now),
            Command::ListMuds { from } => {
                self.cmd_list_muds(&from, now);
                Vec::new()
            }
            Command::ListChannels { from } => {
                self.cmd_list_channels(&from);
                Vec::new()
            }
            Command::Stats { from } => {
                self.cmd_stats(&from, now);
                Vec::new()
            }
            Command::History { from, kind, count } => {
                self.cmd_history(&from, &kind, count);
                Vec::new()
            }
            Command::Help { from } => {
                self.cmd_help(&from);
                Vec::new()
            }
            Command::Reconnect { from } => {
                self.info(&from, "Forcing mesh reconnection...");
                self.force_reconnect(now);
                Vec::new()
            }
            Command::NotifyLogin { user } => self.cmd_presence(&user, "online"),
            Command::NotifyLogout { user } => self.cmd_presence(&user, "offline"),
            // Handled by the event loop before it gets here.
            Command::Shutdown => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Conversation commands
    // -----------------------------------------------------------------------

    fn cmd_tell(&mut self, from: &str, target: &str, message: &str, now: Instant) -> Vec<String> {
        if !self.feature(from, self.cfg.features.tell, "tells") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !self.gate(from, Capability::UseTell, self.cfg.levels.tell, "use imctell") {
            return Vec::new();
        }
        let Some((user, mud)) = validate::split_target(target) else {
            self.error_line(from, "You must specify the target as player@mudname.");
            return Vec::new();
        };
        if !self.acceptable_message(from, message) {
            return Vec::new();
        }
        if !self.limiter.check(RateKind::Tell, from, self.mono_secs(now)) {
            self.fail(from, &MeshError::RateLimited(RateKind::Tell.noun().to_owned()));
            return Vec::new();
        }

        let wire = builders::tell(&self.cfg.mud_name, from, mud, user, message).build();
        self.host.deliver(
            from,
            &format!("You tell {user}@{mud}: {message}"),
            DeliveryStyle::Tell,
        );
        self.audit(&format!("tell {from} -> {user}@{mud}: {message}"));
        self.history.record(HistoryEntry {
            kind: MessageKind::Tell,
            from: from.to_owned(),
            to: format!("{user}@{mud}"),
            message: message.to_owned(),
            timestamp: now_iso(),
        });
        vec![wire]
    }

    fn cmd_emote(&mut self, from: &str, mud: &str, action: &str) -> Vec<String> {
        if !self.feature(from, self.cfg.features.emote, "emotes") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !validate::mud_name(mud) {
            self.error_line(from, "Invalid MUD name format.");
            return Vec::new();
        }
        if !self.acceptable_message(from, action) {
            return Vec::new();
        }
        let wire = builders::emote(&self.cfg.mud_name, from, mud, action).build();
        self.host.deliver(
            from,
            &format!("You emote to {mud}: {from} {action}"),
            DeliveryStyle::Emote,
        );
        self.history.record(HistoryEntry {
            kind: MessageKind::Emote,
            from: from.to_owned(),
            to: mud.to_owned(),
            message: action.to_owned(),
            timestamp: now_iso(),
        });
        vec![wire]
    }

    fn cmd_emoteto(&mut self, from: &str, target: &str, action: &str) -> Vec<String> {
        if !self.feature(from, self.cfg.features.emote, "emotes") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        let Some((user, mud)) = validate::split_target(target) else {
            self.error_line(from, "You must specify the target as player@mudname.");
            return Vec::new();
        };
        if !self.acceptable_message(from, action) {
            return Vec::new();
        }
        let wire = builders::emoteto(&self.cfg.mud_name, from, mud, user, action).build();
        self.host.deliver(
            from,
            &format!("You emote to {user}@{mud}: {from} {action}"),
            DeliveryStyle::Emote,
        );
        self.history.record(HistoryEntry {
            kind: MessageKind::EmoteTo,
            from: from.to_owned(),
            to: format!("{user}@{mud}"),
            message: action.to_owned(),
            timestamp: now_iso(),
        });
        vec![wire]
    }

    fn cmd_channel(&mut self, from: &str, channel: &str, message: &str, now: Instant) -> Vec<String> {
        if !self.feature(from, self.cfg.features.channel, "channels") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !self.gate(from, Capability::UseChannel, self.cfg.levels.channel, "use channels") {
            return Vec::new();
        }
        if !validate::channel_name(channel) {
            self.error_line(from, "Invalid channel name format.");
            return Vec::new();
        }
        if !self.channels.is_member(channel, from) {
            self.error_line(
                from,
                &format!("You are not on channel '{channel}'. Use 'join {channel}' first."),
            );
            return Vec::new();
        }
        if !self.acceptable_message(from, message) {
            return Vec::new();
        }
        if !self.limiter.check(RateKind::Channel, from, self.mono_secs(now)) {
            self.fail(
                from,
                &MeshError::RateLimited(RateKind::Channel.noun().to_owned()),
            );
            return Vec::new();
        }

        let wire = builders::channel_message(&self.cfg.mud_name, from, channel, message).build();
        self.host.deliver(
            from,
            &format!("[{channel}] {from}: {message}"),
            DeliveryStyle::Channel,
        );
        self.audit(&format!("channel [{channel}] {from}: {message}"));
        self.history.record(HistoryEntry {
            kind: MessageKind::Channel,
            from: from.to_owned(),
            to: channel.to_owned(),
            message: message.to_owned(),
            timestamp: now_iso(),
        });
        vec![wire]
    }

    fn cmd_join(&mut self, from: &str, channel: &str) -> Vec<String> {
        if !self.feature(from, self.cfg.features.channel, "channels") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !self.gate(from, Capability::UseChannel, self.cfg.levels.channel, "use channels") {
            return Vec::new();
        }
        match self.channels.join(channel, from) {
            Err(_) => {
                self.error_line(from, "Invalid channel name format.");
                Vec::new()
            }
            Ok(false) => {
                self.error_line(from, &format!("You are already on channel '{channel}'."));
                Vec::new()
            }
            Ok(true) => {
                self.info(from, &format!("You have joined channel '{channel}'."));
                vec![
                    builders::channel_action(&self.cfg.mud_name, from, channel, ChannelAction::Join)
                        .build(),
                ]
            }
        }
    }

    fn cmd_leave(&mut self, from: &str, channel: &str) -> Vec<String> {
        if !self.feature(from, self.cfg.features.channel, "channels") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        match self.channels.leave(channel, from) {
            Ok(true) => {
                self.info(from, &format!("You have left channel '{channel}'."));
                vec![
                    builders::channel_action(&self.cfg.mud_name, from, channel, ChannelAction::Leave)
                        .build(),
                ]
            }
            _ => {
                self.error_line(from, &format!("You are not on channel '{channel}'."));
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Directory commands
    // -----------------------------------------------------------------------

    fn cmd_who(&mut self, from: &str, mud: &str, now: Instant) -> Vec<String> {
        if !self.feature(from, self.cfg.features.who, "who lists") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !self.gate(from, Capability::UseWho, self.cfg.levels.who, "use imcwho") {
            return Vec::new();
        }
        if !validate::mud_name(mud) {
            self.error_line(from, "Invalid MUD name format.");
            return Vec::new();
        }
        if !self.limiter.check(RateKind::Who, from, self.mono_secs(now)) {
            self.fail(from, &MeshError::RateLimited(RateKind::Who.noun().to_owned()));
            return Vec::new();
        }

        let id = Uuid::new_v4().to_string();
        self.correlations.insert(&id, from, self.mono_secs(now));
        self.info(from, &format!("Requesting who list from {mud}..."));
        vec![builders::who_request(&self.cfg.mud_name, mud).id(id).build()]
    }

    fn cmd_finger(&mut self, from: &str, target: &str, now: Instant) -> Vec<String> {
        if !self.feature(from, self.cfg.features.finger, "finger lookups") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !self.gate(from, Capability::UseFinger, self.cfg.levels.finger, "use imcfinger") {
            return Vec::new();
        }
        let Some((user, mud)) = validate::split_target(target) else {
            self.error_line(from, "You must specify the target as player@mudname.");
            return Vec::new();
        };

        let id = Uuid::new_v4().to_string();
        self.correlations.insert(&id, from, self.mono_secs(now));
        self.info(from, &format!("Requesting information about {user}@{mud}..."));
        vec![
            builders::finger_request(&self.cfg.mud_name, mud, user)
                .id(id)
                .build(),
        ]
    }

    fn cmd_locate(&mut self, from: &str, user: &str, now: Instant) -> Vec<String> {
        if !self.feature(from, self.cfg.features.locate, "locate lookups") {
            return Vec::new();
        }
        if !self.require_connected(from) {
            return Vec::new();
        }
        if !validate::user_name(user) {
            self.error_line(from, "Invalid username format.");
            return Vec::new();
        }

        let id = Uuid::new_v4().to_string();
        self.correlations.insert(&id, from, self.mono_secs(now));
        self.info(
            from,
            &format!("Searching for {user} across all connected MUDs..."),
        );
        vec![builders::locate_request(&self.cfg.mud_name, user).id(id).build()]
    }

    fn cmd_presence(&mut self, user: &str, status: &str) -> Vec<String> {
        if self.state() != LinkState::Authenticated {
            return Vec::new();
        }
        let location = self
            .host
            .find_user(user)
            .map(|u| u.location)
            .unwrap_or_default();
        vec![builders::presence(&self.cfg.mud_name, user, status, &location).build()]
    }

    // -----------------------------------------------------------------------
    // Render-only commands
    // -----------------------------------------------------------------------

    fn cmd_list_muds(&mut self, from: &str, now: Instant) {
        let secs = self.mono_secs(now);
        self.info(from, "Connected MUDs:");
        self.info(from, "===============");
        let muds = self.directory.fresh_muds(secs);
        if muds.is_empty() {
            self.host
                .deliver(from, "No peer MUDs are currently known.", DeliveryStyle::Info);
            return;
        }
        let lines: Vec<String> = muds
            .iter()
            .map(|mud| {
                let mut line = format!("  {}", mud.name);
                if !mud.host.is_empty() {
                    line.push_str(&format!("  {}:{}", mud.host, mud.port));
                }
                if mud.user_count > 0 {
                    line.push_str(&format!("  {} users", mud.user_count));
                }
                if !mud.version.is_empty() {
                    line.push_str(&format!("  v{}", mud.version));
                }
                line
            })
            .collect();
        for line in lines {
            self.host.deliver(from, &line, DeliveryStyle::Info);
        }
    }

    fn cmd_list_channels(&mut self, from: &str) {
        self.info(from, "Mesh channels:");
        self.info(from, "==============");
        let lines: Vec<String> = self
            .channels
            .list()
            .map(|(name, channel)| {
                let mut line = format!("  {name}  {} local members", channel.member_count());
                if !channel.description.is_empty() {
                    line.push_str(&format!("  - {}", channel.description));
                }
                if channel.moderated {
                    line.push_str("  [moderated]");
                }
                line
            })
            .collect();
        if lines.is_empty() {
            self.info(from, "No mesh channels are known yet.");
        }
        for line in lines {
            self.host.deliver(from, &line, DeliveryStyle::Info);
        }
    }

    fn cmd_stats(&mut self, from: &str, now: Instant) {
        self.info(from, "MudVault Mesh status:");
        self.info(from, &format!("  State: {}", self.state().label()));
        if let Some(connected_at) = self.connected_at {
            let uptime = now.duration_since(connected_at).as_secs();
            self.info(
                from,
                &format!(
                    "  Uptime: {}h {}m {}s",
                    uptime / 3600,
                    (uptime % 3600) / 60,
                    uptime % 60
                ),
            );
            self.info(
                from,
                &format!(
                    "  Gateway: {}:{}",
                    self.cfg.gateway.host, self.cfg.gateway.port
                ),
            );
            if let Some(hb) = self.heartbeat {
                self.info(
                    from,
                    &format!(
                        "  Last ping: {}s ago",
                        now.duration_since(hb.last_ping).as_secs()
                    ),
                );
                self.info(
                    from,
                    &format!(
                        "  Last pong: {}s ago",
                        now.duration_since(hb.last_pong).as_secs()
                    ),
                );
            }
        } else {
            self.info(
                from,
                &format!(
                    "  Reconnect attempts: {}/{}",
                    self.failures, self.cfg.timing.max_reconnects
                ),
            );
        }
        self.info(from, &format!("  MUD name: {}", self.cfg.mud_name));
        self.info(
            from,
            &format!("  Protocol version: {}", mvm_protocol::PROTOCOL_VERSION),
        );
    }

    fn cmd_history(&mut self, from: &str, kind: &str, count: Option<usize>) {
        let kind = match kind {
            "tell" => MessageKind::Tell,
            "emote" => MessageKind::Emote,
            "channel" => MessageKind::Channel,
            _ => {
                self.error_line(from, "Valid history kinds: tell, emote, channel");
                return;
            }
        };
        let count = count.unwrap_or(10).max(1);
        self.info(from, &format!("Message history ({}):", kind.as_str()));
        let Some(ring) = self.history.ring(kind) else {
            return;
        };
        if ring.is_empty() {
            self.info(from, "  (no messages)");
            return;
        }
        let lines: Vec<String> = ring
            .recent(count)
            .into_iter()
            .map(|e| format!("  [{}] {} -> {}: {}", e.timestamp, e.from, e.to, e.message))
            .collect();
        for line in lines {
            self.host.deliver(from, &line, DeliveryStyle::Info);
        }
    }

    fn cmd_help(&mut self, from: &str) {
        const LINES: &[&str] = &[
            "MudVault Mesh commands:",
            "  tell <player@mud> <message>   - Send a tell to another MUD",
            "  emote <mud> <action>          - Send an emote to another MUD",
            "  emoteto <player@mud> <action> - Send a directed emote",
            "  who <mud>                     - See who is online on a MUD",
            "  finger <player@mud>           - Get player information",
            "  locate <player>               - Find which MUD a player is on",
            "  list                          - List connected MUDs",
            "  stats                         - Show mesh status",
            "  channels                      - List known channels",
            "  join <channel>                - Join a mesh channel",
            "  leave <channel>               - Leave a mesh channel",
            "  channel <name> <message>      - Send a channel message",
            "  history [kind] [count]        - Show message history",
        ];
        for line in LINES {
            self.host.deliver(from, line, DeliveryStyle::Info);
        }
    }

    // -----------------------------------------------------------------------
    // Gates and feedback
    // -----------------------------------------------------------------------

    fn require_connected(&self, user: &str) -> bool {
        if self.state() == LinkState::Authenticated {
            true
        } else {
            self.error_line(user, "MudVault Mesh is not connected.");
            false
        }
    }

    fn feature(&self, user: &str, enabled: bool, what: &str) -> bool {
        if enabled {
            true
        } else {
            self.error_line(user, &format!("Inter-MUD {what} are disabled."));
            false
        }
    }

    /// Level gate first, then the host's capability check.
    fn gate(&self, user: &str, capability: Capability, min_level: u32, what: &str) -> bool {
        if self.host.user_level(user) < min_level || !self.host.user_can(user, capability) {
            self.fail(user, &MeshError::Permission(what.to_owned()));
            return false;
        }
        true
    }

    /// Length cap, then the optional profanity predicate.
    fn acceptable_message(&self, user: &str, message: &str) -> bool {
        if message.is_empty() {
            self.error_line(user, "What do you want to say?");
            return false;
        }
        if message.len() > self.cfg.limits.max_message_len {
            self.fail(
                user,
                &MeshError::Capacity(format!(
                    "message exceeds {} characters",
                    self.cfg.limits.max_message_len
                )),
            );
            return false;
        }
        if self.cfg.policy.filter_profanity && self.host.is_profane(message) {
            self.error_line(user, "Your message contains inappropriate content.");
            return false;
        }
        true
    }

    fn fail(&self, user: &str, err: &MeshError) {
        self.host
            .deliver(user, &err.player_line(), DeliveryStyle::Error);
    }

    fn error_line(&self, user: &str, line: &str) {
        self.host.deliver(user, line, DeliveryStyle::Error);
    }

    fn info(&self, user: &str, line: &str) {
        self.host.deliver(user, line, DeliveryStyle::Info);
    }
}

fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
