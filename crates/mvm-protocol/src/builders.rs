//! Outbound envelope construction.
//!
//! One builder per wire kind, all funnelling through [`EnvelopeBuilder`] so
//! every outbound record carries the same outer shape. Ids default to a
//! fresh UUID v4 (unique for the process lifetime) and timestamps to the
//! current UTC second; both can be pinned for deterministic tests and for
//! responses, which must echo the id of the request they answer.

use chrono::Utc;
use uuid::Uuid;

use crate::envelope::{Address, Metadata, MessageKind, PROTOCOL_VERSION};
use crate::json::{ArrayBuilder, ObjectBuilder};

/// Destination MUD name for gateway-directed envelopes (auth, ping).
pub const GATEWAY: &str = "Gateway";

// ---------------------------------------------------------------------------
// Generic builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    kind: MessageKind,
    from: Address,
    to: Address,
    payload: ObjectBuilder,
    metadata: Metadata,
    id: Option<String>,
    timestamp: Option<String>,
}

impl EnvelopeBuilder {
    pub fn new(kind: MessageKind, from: Address, to: Address) -> Self {
        Self {
            kind,
            from,
            to,
            payload: ObjectBuilder::new(),
            metadata: Metadata::default(),
            id: None,
            timestamp: None,
        }
    }

    /// Pin the envelope id. Responses echo the id of their request.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn payload_str(mut self, key: &str, value: &str) -> Self {
        self.payload = self.payload.string(key, value);
        self
    }

    pub fn payload_int(mut self, key: &str, value: i64) -> Self {
        self.payload = self.payload.int(key, value);
        self
    }

    pub fn payload_raw(mut self, key: &str, raw: &str) -> Self {
        self.payload = self.payload.raw(key, raw);
        self
    }

    /// Serialize to one wire record.
    pub fn build(self) -> String {
        let id = self.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());

        let mut from = ObjectBuilder::new().string("mud", &self.from.mud);
        if let Some(user) = &self.from.user {
            from = from.string("user", user);
        }
        let mut to = ObjectBuilder::new().string("mud", &self.to.mud);
        if let Some(user) = &self.to.user {
            to = to.string("user", user);
        }
        let metadata = ObjectBuilder::new()
            .int("priority", self.metadata.priority)
            .int("ttl", self.metadata.ttl)
            .string("encoding", &self.metadata.encoding)
            .string("language", &self.metadata.language);

        ObjectBuilder::new()
            .string("version", PROTOCOL_VERSION)
            .string("id", &id)
            .string("timestamp", &timestamp)
            .string("type", self.kind.as_str())
            .object("from", from)
            .object("to", to)
            .object("payload", self.payload)
            .object("metadata", metadata)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Conversation kinds
// ---------------------------------------------------------------------------

pub fn tell(
    local_mud: &str,
    from_user: &str,
    to_mud: &str,
    to_user: &str,
    message: &str,
) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Tell,
        Address::user(local_mud, from_user),
        Address::user(to_mud, to_user),
    )
    .payload_str("message", message)
}

pub fn emote(local_mud: &str, from_user: &str, to_mud: &str, action: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Emote,
        Address::user(local_mud, from_user),
        Address::mud(to_mud),
    )
    .payload_str("action", action)
}

pub fn emoteto(
    local_mud: &str,
    from_user: &str,
    to_mud: &str,
    to_user: &str,
    action: &str,
) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::EmoteTo,
        Address::user(local_mud, from_user),
        Address::user(to_mud, to_user),
    )
    .payload_str("action", action)
}

/// Gateway-visible channel membership and traffic actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAction {
    Join,
    Leave,
    Message,
}

impl ChannelAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelAction::Join => "join",
            ChannelAction::Leave => "leave",
            ChannelAction::Message => "message",
        }
    }
}

pub fn channel_message(
    local_mud: &str,
    from_user: &str,
    channel: &str,
    message: &str,
) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Channel,
        Address::user(local_mud, from_user),
        Address::mud(GATEWAY),
    )
    .payload_str("channel", channel)
    .payload_str("action", ChannelAction::Message.as_str())
    .payload_str("message", message)
}

pub fn channel_action(
    local_mud: &str,
    from_user: &str,
    channel: &str,
    action: ChannelAction,
) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Channel,
        Address::user(local_mud, from_user),
        Address::mud(GATEWAY),
    )
    .payload_str("channel", channel)
    .payload_str("action", action.as_str())
}

// ---------------------------------------------------------------------------
// Directory kinds
// ---------------------------------------------------------------------------

/// One row in a `who` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoEntry {
    pub name: String,
    pub display_name: String,
    /// Absent when the host declines to share levels.
    pub level: Option<i64>,
    pub idle_seconds: i64,
    pub location: String,
}

pub fn who_request(local_mud: &str, to_mud: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Who,
        Address::mud(local_mud),
        Address::mud(to_mud),
    )
}

pub fn who_response(
    local_mud: &str,
    to_mud: &str,
    request_id: &str,
    users: &[WhoEntry],
) -> EnvelopeBuilder {
    let mut list = ArrayBuilder::new();
    for user in users {
        let mut entry = ObjectBuilder::new()
            .string("name", &user.name)
            .string("displayName", &user.display_name);
        if let Some(level) = user.level {
            entry = entry.int("level", level);
        }
        entry = entry
            .int("idle", user.idle_seconds)
            .string("location", &user.location);
        list.push_object(entry);
    }
    EnvelopeBuilder::new(
        MessageKind::Who,
        Address::mud(local_mud),
        Address::mud(to_mud),
    )
    .id(request_id)
    .payload_raw("users", &list.finish())
}

pub fn finger_request(local_mud: &str, to_mud: &str, to_user: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Finger,
        Address::mud(local_mud),
        Address::user(to_mud, to_user),
    )
    .payload_str("user", to_user)
}

/// Profile block for a `finger` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerProfile {
    pub user: String,
    pub display_name: String,
    pub level: Option<i64>,
    pub idle_seconds: i64,
    pub email: Option<String>,
    pub plan: Option<String>,
    pub last_login: Option<String>,
}

pub fn finger_response(
    local_mud: &str,
    to_mud: &str,
    request_id: &str,
    profile: &FingerProfile,
) -> EnvelopeBuilder {
    let mut builder = EnvelopeBuilder::new(
        MessageKind::Finger,
        Address::mud(local_mud),
        Address::mud(to_mud),
    )
    .id(request_id)
    .payload_str("user", &profile.user)
    .payload_str("displayName", &profile.display_name)
    .payload_int("idle", profile.idle_seconds);
    if let Some(level) = profile.level {
        builder = builder.payload_int("level", level);
    }
    if let Some(email) = &profile.email {
        builder = builder.payload_str("email", email);
    }
    if let Some(plan) = &profile.plan {
        builder = builder.payload_str("plan", plan);
    }
    if let Some(last_login) = &profile.last_login {
        builder = builder.payload_str("lastLogin", last_login);
    }
    builder
}

/// Locate requests fan out to every MUD on the mesh.
pub fn locate_request(local_mud: &str, user: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(MessageKind::Locate, Address::mud(local_mud), Address::mud("*"))
        .payload_str("user", user)
}

pub fn locate_response(
    local_mud: &str,
    to_mud: &str,
    request_id: &str,
    user: &str,
) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Locate,
        Address::mud(local_mud),
        Address::mud(to_mud),
    )
    .id(request_id)
    .payload_str("user", user)
    .payload_str("mud", local_mud)
}

pub fn presence(local_mud: &str, user: &str, status: &str, location: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Presence,
        Address::user(local_mud, user),
        Address::mud("*"),
    )
    .payload_str("status", status)
    .payload_str("location", location)
}

// ---------------------------------------------------------------------------
// Session kinds
// ---------------------------------------------------------------------------

pub fn auth(local_mud: &str, token: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Auth,
        Address::mud(local_mud),
        Address::mud(GATEWAY),
    )
    .payload_str("mudName", local_mud)
    .payload_str("token", token)
}

pub fn ping(local_mud: &str, unix_seconds: i64) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Ping,
        Address::mud(local_mud),
        Address::mud(GATEWAY),
    )
    .payload_int("timestamp", unix_seconds)
}

/// A pong echoes the timestamp carried by the ping it answers.
pub fn pong(local_mud: &str, to_mud: &str, echo_timestamp: i64) -> EnvelopeBuilder {
    EnvelopeBuilder::new(
        MessageKind::Pong,
        Address::mud(local_mud),
        Address::mud(to_mud),
    )
    .payload_int("timestamp", echo_timestamp)
}

pub fn error(local_mud: &str, to: Address, code: &str, message: &str) -> EnvelopeBuilder {
    EnvelopeBuilder::new(MessageKind::Error, Address::mud(local_mud), to)
        .payload_str("code", code)
        .payload_str("message", message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn tell_round_trips_through_parse() {
        let wire = tell("Alpha", "Bob", "Beta", "Alice", "hi there")
            .id("a1")
            .timestamp("2024-01-01T00:00:00Z")
            .build();
        let env = Envelope::parse(&wire).unwrap();
        assert_eq!(env.kind, MessageKind::Tell);
        assert_eq!(env.id, "a1");
        assert_eq!(env.timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(env.from, Address::user("Alpha", "Bob"));
        assert_eq!(env.to, Address::user("Beta", "Alice"));
        assert_eq!(env.payload_str("message").as_deref(), Some("hi there"));
        assert_eq!(env.metadata, Metadata::default());
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = tell("Alpha", "Bob", "Beta", "Alice", "x").build();
        let b = tell("Alpha", "Bob", "Beta", "Alice", "x").build();
        let ida = Envelope::parse(&a).unwrap().id;
        let idb = Envelope::parse(&b).unwrap().id;
        assert_ne!(ida, idb);
    }

    #[test]
    fn auth_carries_mud_name_and_token() {
        let wire = auth("Alpha", "secret-token").build();
        let env = Envelope::parse(&wire).unwrap();
        assert_eq!(env.kind, MessageKind::Auth);
        assert_eq!(env.from.mud, "Alpha");
        assert_eq!(env.to.mud, GATEWAY);
        assert_eq!(env.payload_str("mudName").as_deref(), Some("Alpha"));
        assert_eq!(env.payload_str("token").as_deref(), Some("secret-token"));
    }

    #[test]
    fn ping_pong_echo_timestamps() {
        let ping_wire = ping("Alpha", 1_700_000_000).build();
        let env = Envelope::parse(&ping_wire).unwrap();
        assert_eq!(env.payload_int("timestamp"), Some(1_700_000_000));

        let pong_wire = pong("Alpha", "Beta", 1_700_000_000).build();
        let env = Envelope::parse(&pong_wire).unwrap();
        assert_eq!(env.kind, MessageKind::Pong);
        assert_eq!(env.payload_int("timestamp"), Some(1_700_000_000));
    }

    #[test]
    fn who_response_echoes_request_id_and_lists_users() {
        let users = vec![
            WhoEntry {
                name: "Bob".to_owned(),
                display_name: "Bob the Builder".to_owned(),
                level: Some(12),
                idle_seconds: 30,
                location: "The Square".to_owned(),
            },
            WhoEntry {
                name: "Carol".to_owned(),
                display_name: "Carol".to_owned(),
                level: None,
                idle_seconds: 0,
                location: "Recall".to_owned(),
            },
        ];
        let wire = who_response("Alpha", "Beta", "req-7", &users).build();
        let env = Envelope::parse(&wire).unwrap();
        assert_eq!(env.id, "req-7");
        let raw = env.payload_raw("users").unwrap();
        let items = crate::json::array_items(raw).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            crate::json::get_string(items[0], "displayName").as_deref(),
            Some("Bob the Builder")
        );
        assert_eq!(crate::json::get_int(items[0], "level"), Some(12));
        assert_eq!(crate::json::get_int(items[1], "level"), None);
    }

    #[test]
    fn channel_join_carries_action_without_message() {
        let wire = channel_action("Alpha", "Bob", "gossip", ChannelAction::Join).build();
        let env = Envelope::parse(&wire).unwrap();
        assert_eq!(env.payload_str("channel").as_deref(), Some("gossip"));
        assert_eq!(env.payload_str("action").as_deref(), Some("join"));
        assert_eq!(env.payload_str("message"), None);
    }

    #[test]
    fn error_targets_the_originator() {
        let wire = error(
            "Alpha",
            Address::user("Beta", "Alice"),
            "user-not-found",
            "no such player",
        )
        .build();
        let env = Envelope::parse(&wire).unwrap();
        assert_eq!(env.kind, MessageKind::Error);
        assert_eq!(env.to, Address::user("Beta", "Alice"));
        assert_eq!(env.payload_str("code").as_deref(), Some("user-not-found"));
    }

    #[test]
    fn emitted_envelopes_are_valid_json() {
        let wire = tell("Alpha", "Bob", "Beta", "Alice", "quote \" and\nnewline").build();
        let v: serde_json::Value = serde_json::from_str(&wire).expect("valid JSON");
        assert_eq!(v["payload"]["message"], "quote \" and\nnewline");
    }
}
