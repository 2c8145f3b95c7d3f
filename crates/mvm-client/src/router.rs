//! Inbound envelope dispatch.
//!
//! Classifies each parsed envelope by kind and applies it: deliveries to
//! local players, directory/cache updates, and any envelopes owed back to
//! the wire (who/finger/locate responses, error replies, pongs). Handlers
//! are synchronous; the event loop sends whatever they return.

use tokio::time::Instant;
use tracing::{debug, warn};

use mvm_protocol::builders::{self, WhoEntry};
use mvm_protocol::{Envelope, MessageKind, error_codes, json};

use crate::client::Core;
use crate::directory::RemoteUser;
use crate::history::HistoryEntry;
use crate::host::{DeliveryStyle, LogLevel};
use crate::state::LinkState;

impl Core {
    /// Route one inbound envelope. Returns the records to send back.
    pub fn dispatch(&mut self, env: &Envelope, now: Instant) -> Vec<String> {
        let secs = self.mono_secs(now);
        if env.from.mud != self.cfg.mud_name {
            self.directory.touch_mud(&env.from.mud, secs);
        }

        // Until authenticated, only the auth outcome matters.
        if self.state() == LinkState::Authenticating {
            match env.kind {
                MessageKind::Auth => self.on_auth_reply(env, now),
                MessageKind::Error => self.on_auth_rejected(env, now),
                kind => debug!(%kind, "ignoring envelope while authenticating"),
            }
            return Vec::new();
        }
        if self.state() != LinkState::Authenticated {
            debug!(kind = %env.kind, "dropping envelope outside a session");
            return Vec::new();
        }

        match env.kind {
            MessageKind::Tell => self.on_tell(env),
            MessageKind::Emote => self.on_emote(env),
            MessageKind::EmoteTo => self.on_emoteto(env),
            MessageKind::Channel => self.on_channel(env),
            MessageKind::Who => self.on_who(env, secs),
            MessageKind::Finger => self.on_finger(env, secs),
            MessageKind::Locate => self.on_locate(env, secs),
            MessageKind::Presence => self.on_presence(env, secs),
            MessageKind::Ping => self.on_ping(env),
            MessageKind::Pong => {
                if let Some(hb) = self.heartbeat.as_mut() {
                    hb.record_pong(now);
                }
                Vec::new()
            }
            MessageKind::Error => {
                self.on_error(env);
                Vec::new()
            }
            MessageKind::Auth => {
                warn!("auth envelope outside authentication, ignoring");
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Authentication outcome
    // -----------------------------------------------------------------------

    fn on_auth_reply(&mut self, env: &Envelope, now: Instant) {
        match env.payload_str("status").as_deref() {
            Some("success") => self.on_authenticated(now),
            status => {
                warn!(?status, "gateway rejected authentication");
                self.teardown("auth rejected", true, now);
            }
        }
    }

    fn on_auth_rejected(&mut self, env: &Envelope, now: Instant) {
        let code = env.payload_str("code").unwrap_or_default();
        let message = env.payload_str("message").unwrap_or_default();
        warn!(%code, %message, "authentication failed");
        self.host.log(
            LogLevel::Warn,
            &format!("mesh authentication failed: {code} {message}"),
        );
        self.teardown("auth rejected", true, now);
    }

    // -----------------------------------------------------------------------
    // Conversation traffic
    // -----------------------------------------------------------------------

    fn on_tell(&mut self, env: &Envelope) -> Vec<String> {
        if !self.cfg.features.tell || self.is_own_echo(env) {
            return Vec::new();
        }
        let (Some(message), Some(to_user)) = (env.payload_str("message"), env.to.user.as_deref())
        else {
            debug!("tell missing message or target, dropping");
            return Vec::new();
        };

        let Some(user) = self.host.find_user(to_user) else {
            return vec![
                builders::error(
                    &self.cfg.mud_name,
                    env.from.clone(),
                    error_codes::USER_NOT_FOUND,
                    &format!("{to_user} is not online here"),
                )
                .build(),
            ];
        };

        let text = format!("{} tells you: {}", env.from.label(), message);
        self.host.deliver(&user.name, &text, DeliveryStyle::Tell);
        self.audit(&format!("tell {} -> {}: {}", env.from.label(), user.name, message));
        self.history.record(HistoryEntry {
            kind: MessageKind::Tell,
            from: env.from.label(),
            to: user.name,
            message,
            timestamp: entry_timestamp(env),
        });
        Vec::new()
    }

    fn on_emote(&mut self, env: &Envelope) -> Vec<String> {
        if !self.cfg.features.emote || self.is_own_echo(env) {
            return Vec::new();
        }
        let Some(action) = env.payload_str("action") else {
            debug!("emote missing action, dropping");
            return Vec::new();
        };
        let text = format!("{} {}", env.from.label(), action);
        for user in self.host.online_users() {
            self.host.deliver(&user.name, &text, DeliveryStyle::Emote);
        }
        self.audit(&format!("emote {}: {}", env.from.label(), action));
        self.history.record(HistoryEntry {
            kind: MessageKind::Emote,
            from: env.from.label(),
            to: "all".to_owned(),
            message: action,
            timestamp: entry_timestamp(env),
        });
        Vec::new()
    }

    fn on_emoteto(&mut self, env: &Envelope) -> Vec<String> {
        if !self.cfg.features.emote || self.is_own_echo(env) {
            return Vec::new();
        }
        let (Some(action), Some(to_user)) = (env.payload_str("action"), env.to.user.as_deref())
        else {
            debug!("emoteto missing action or target, dropping");
            return Vec::new();
        };
        let Some(user) = self.host.find_user(to_user) else {
            return vec![
                builders::error(
                    &self.cfg.mud_name,
                    env.from.clone(),
                    error_codes::USER_NOT_FOUND,
                    &format!("{to_user} is not online here"),
                )
                .build(),
            ];
        };
        let text = format!("{} {}", env.from.label(), action);
        self.host.deliver(&user.name, &text, DeliveryStyle::Emote);
        self.history.record(HistoryEntry {
            kind: MessageKind::EmoteTo,
            from: env.from.label(),
            to: user.name,
            message: action,
            timestamp: entry_timestamp(env),
        });
        Vec::new()
    }

    fn on_channel(&mut self, env: &Envelope) -> Vec<String> {
        if !self.cfg.features.channel {
            return Vec::new();
        }
        let Some(channel) = env.payload_str("channel") else {
            debug!("channel envelope without channel name, dropping");
            return Vec::new();
        };
        let action = env.payload_str("action");
        let message = env.payload_str("message");

        let text = match action.as_deref() {
            Some("join") => format!("[{channel}] {} has joined the channel.", env.from.label()),
            Some("leave") => format!("[{channel}] {} has left the channel.", env.from.label()),
            _ => {
                let Some(message) = message.as_deref() else {
                    debug!("channel envelope without message or action, dropping");
                    return Vec::new();
                };
                format!("[{channel}] {}: {}", env.from.label(), message)
            }
        };

        // The originator saw a local echo when they sent; don't replay the
        // gateway's fan-back at them.
        let suppress = (env.from.mud == self.cfg.mud_name)
            .then(|| env.from.user.as_deref().unwrap_or_default().to_lowercase());
        for member in self.channels.members(&channel) {
            if suppress.as_deref() == Some(member.as_str()) {
                continue;
            }
            self.host.deliver(&member, &text, DeliveryStyle::Channel);
        }

        self.audit(&format!("channel [{channel}] {}", env.from.label()));
        self.history.record(HistoryEntry {
            kind: MessageKind::Channel,
            from: env.from.label(),
            to: channel,
            message: message.or(action).unwrap_or_default(),
            timestamp: entry_timestamp(env),
        });
        Vec::new()
    }

    // -----------------------------------------------------------------------
    // Directory traffic
    // -----------------------------------------------------------------------

    fn on_who(&mut self, env: &Envelope, secs: u64) -> Vec<String> {
        if !self.cfg.features.who {
            return Vec::new();
        }
        if let Some(caller) = self.correlations.take(&env.id, secs) {
            self.render_who_response(&caller, env);
            return Vec::new();
        }
        if env.payload_raw("users").is_some() {
            debug!(id = %env.id, "dropping unmatched who response");
            return Vec::new();
        }

        // A request: answer with the current online list.
        let users: Vec<WhoEntry> = self
            .host
            .online_users()
            .into_iter()
            .map(|u| WhoEntry {
                name: u.name,
                display_name: u.display_name,
                level: Some(i64::from(u.level)),
                idle_seconds: u.idle_seconds as i64,
                location: u.location,
            })
            .collect();
        vec![builders::who_response(&self.cfg.mud_name, &env.from.mud, &env.id, &users).build()]
    }

    fn render_who_response(&mut self, caller: &str, env: &Envelope) {
        let items = env
            .payload_raw("users")
            .and_then(json::array_items)
            .unwrap_or_default();
        self.host.deliver(
            caller,
            &format!("Players on {}:", env.from.mud),
            DeliveryStyle::Info,
        );
        for item in &items {
            let name = json::get_string(item, "displayName")
                .or_else(|| json::get_string(item, "name"))
                .unwrap_or_else(|| "?".to_owned());
            let mut line = format!("  {name}");
            if let Some(level) = json::get_int(item, "level") {
                line.push_str(&format!(" [{level}]"));
            }
            if let Some(idle) = json::get_int(item, "idle") {
                line.push_str(&format!(" (idle {idle}s)"));
            }
            if let Some(location) = json::get_string(item, "location") {
                line.push_str(&format!(" - {location}"));
            }
            self.host.deliver(caller, &line, DeliveryStyle::Info);
        }
        self.host.deliver(
            caller,
            &format!("({} players)", items.len()),
            DeliveryStyle::Info,
        );
    }

    fn on_finger(&mut self, env: &Envelope, secs: u64) -> Vec<String> {
        if !self.cfg.features.finger {
            return Vec::new();
        }
        if let Some(caller) = self.correlations.take(&env.id, secs) {
            self.render_finger_response(&caller, env, secs);
            return Vec::new();
        }

        let Some(target) = env.payload_str("user") else {
            debug!("finger request without user, dropping");
            return Vec::new();
        };
        let Some(user) = self.host.find_user(&target) else {
            return vec![
                builders::error(
                    &self.cfg.mud_name,
                    env.from.clone(),
                    error_codes::USER_NOT_FOUND,
                    &format!("{target} is not online here"),
                )
                .build(),
            ];
        };
        let Some(info) = self.host.finger_info(&user.name) else {
            return vec![
                builders::error(
                    &self.cfg.mud_name,
                    env.from.clone(),
                    error_codes::PERMISSION_DENIED,
                    &format!("{target} does not share profile information"),
                )
                .build(),
            ];
        };
        let profile = builders::FingerProfile {
            user: user.name,
            display_name: user.display_name,
            level: Some(i64::from(user.level)),
            idle_seconds: user.idle_seconds as i64,
            email: info.email,
            plan: info.plan,
            last_login: info.last_login,
        };
        vec![builders::finger_response(&self.cfg.mud_name, &env.from.mud, &env.id, &profile).build()]
    }

    fn render_finger_response(&mut self, caller: &str, env: &Envelope, secs: u64) {
        let username = env.payload_str("user").unwrap_or_else(|| "?".to_owned());
        let display_name = env
            .payload_str("displayName")
            .unwrap_or_else(|| username.clone());
        self.host.deliver(
            caller,
            &format!("{}@{}:", username, env.from.mud),
            DeliveryStyle::Info,
        );
        self.host.deliver(
            caller,
            &format!("  Display name: {display_name}"),
            DeliveryStyle::Info,
        );
        if let Some(level) = env.payload_int("level") {
            self.host
                .deliver(caller, &format!("  Level: {level}"), DeliveryStyle::Info);
        }
        if let Some(idle) = env.payload_int("idle") {
            self.host
                .deliver(caller, &format!("  Idle: {idle}s"), DeliveryStyle::Info);
        }
        for (label, key) in [("Email", "email"), ("Plan", "plan"), ("Last login", "lastLogin")] {
            if let Some(value) = env.payload_str(key) {
                self.host
                    .deliver(caller, &format!("  {label}: {value}"), DeliveryStyle::Info);
            }
        }

        // Finger responses refresh the remote-user cache.
        self.directory.upsert_user(
            RemoteUser {
                mud: env.from.mud.clone(),
                username,
                display_name,
                level: env.payload_int("level"),
                idle_seconds: env.payload_int("idle").unwrap_or(0),
                last_login: env.payload_str("lastLogin").unwrap_or_default(),
                ..RemoteUser::default()
            },
            secs,
        );
    }

    fn on_locate(&mut self, env: &Envelope, secs: u64) -> Vec<String> {
        if !self.cfg.features.locate {
            return Vec::new();
        }
        if let Some(caller) = self.correlations.take(&env.id, secs) {
            let user = env.payload_str("user").unwrap_or_else(|| "?".to_owned());
            let mud = env
                .payload_str("mud")
                .unwrap_or_else(|| env.from.mud.clone());
            self.host.deliver(
                caller.as_str(),
                &format!("{user} is on {mud}."),
                DeliveryStyle::Info,
            );
            return Vec::new();
        }

        // A broadcast request: answer only when the player is online here.
        let Some(target) = env.payload_str("user") else {
            return Vec::new();
        };
        match self.host.find_user(&target) {
            Some(user) => vec![
                builders::locate_response(&self.cfg.mud_name, &env.from.mud, &env.id, &user.name)
                    .build(),
            ],
            None => Vec::new(),
        }
    }

    fn on_presence(&mut self, env: &Envelope, secs: u64) -> Vec<String> {
        let Some(username) = env.from.user.clone() else {
            debug!("presence without user, dropping");
            return Vec::new();
        };
        self.directory.upsert_user(
            RemoteUser {
                mud: env.from.mud.clone(),
                display_name: username.clone(),
                username,
                location: env.payload_str("location").unwrap_or_default(),
                idle_seconds: env.payload_int("idle").unwrap_or(0),
                ..RemoteUser::default()
            },
            secs,
        );
        Vec::new()
    }

    // -----------------------------------------------------------------------
    // Session traffic
    // -----------------------------------------------------------------------

    fn on_ping(&mut self, env: &Envelope) -> Vec<String> {
        let echo = env.payload_int("timestamp").unwrap_or(0);
        vec![builders::pong(&self.cfg.mud_name, &env.from.mud, echo).build()]
    }

    fn on_error(&mut self, env: &Envelope) {
        let code = env.payload_str("code").unwrap_or_default();
        let message = env.payload_str("message").unwrap_or_default();
        warn!(%code, %message, from = %env.from.mud, "error envelope from mesh");
        self.host
            .log(LogLevel::Warn, &format!("mesh error {code}: {message}"));
    }

    // -----------------------------------------------------------------------
    // Shared helpers
    // -----------------------------------------------------------------------

    /// True for envelopes the gateway fanned back that originated here.
    /// The sender already saw a local echo at send time.
    fn is_own_echo(&self, env: &Envelope) -> bool {
        if env.from.mud == self.cfg.mud_name {
            debug!(kind = %env.kind, "own envelope fanned back, dropping");
            true
        } else {
            false
        }
    }

    /// Durable audit line, only when the operator opted in.
    pub(crate) fn audit(&self, line: &str) {
        if self.cfg.policy.log_all_messages {
            self.host.log(LogLevel::Info, line);
        }
    }
}

/// History rows prefer the wire timestamp and fall back to local time.
fn entry_timestamp(env: &Envelope) -> String {
    if env.timestamp.is_empty() {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    } else {
        env.timestamp.clone()
    }
}
