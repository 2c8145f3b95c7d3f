//! Typed view over the wire envelope.
//!
//! Every message on the mesh is one JSON object with the same outer shape:
//! `version`, `id`, `timestamp`, `type`, `from`, `to`, `payload`, `metadata`.
//! [`Envelope::parse`] validates the outer shape and classifies the kind;
//! payload fields stay lazy because they are kind-specific and the router
//! only reads the ones it needs.

use crate::json;

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The closed set of wire message kinds. Anything else is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Tell,
    Emote,
    EmoteTo,
    Channel,
    Who,
    Finger,
    Locate,
    Presence,
    Auth,
    Ping,
    Pong,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Tell => "tell",
            MessageKind::Emote => "emote",
            MessageKind::EmoteTo => "emoteto",
            MessageKind::Channel => "channel",
            MessageKind::Who => "who",
            MessageKind::Finger => "finger",
            MessageKind::Locate => "locate",
            MessageKind::Presence => "presence",
            MessageKind::Auth => "auth",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
            MessageKind::Error => "error",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Some(match s {
            "tell" => MessageKind::Tell,
            "emote" => MessageKind::Emote,
            "emoteto" => MessageKind::EmoteTo,
            "channel" => MessageKind::Channel,
            "who" => MessageKind::Who,
            "finger" => MessageKind::Finger,
            "locate" => MessageKind::Locate,
            "presence" => MessageKind::Presence,
            "auth" => MessageKind::Auth,
            "ping" => MessageKind::Ping,
            "pong" => MessageKind::Pong,
            "error" => MessageKind::Error,
            _ => return None,
        })
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Addresses and metadata
// ---------------------------------------------------------------------------

/// A routing endpoint: a MUD, optionally narrowed to one user on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub mud: String,
    pub user: Option<String>,
}

impl Address {
    pub fn mud(mud: impl Into<String>) -> Self {
        Self {
            mud: mud.into(),
            user: None,
        }
    }

    pub fn user(mud: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            mud: mud.into(),
            user: Some(user.into()),
        }
    }

    /// `user@mud`, or just the MUD name for mud-level addresses.
    pub fn label(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.mud),
            None => self.mud.clone(),
        }
    }
}

/// Envelope metadata block. Defaults match the gateway's expectations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// 1–10; 5 is routine traffic.
    pub priority: i64,
    /// Seconds the gateway may hold the message before dropping it.
    pub ttl: i64,
    pub encoding: String,
    pub language: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            priority: 5,
            ttl: 300,
            encoding: "utf-8".to_owned(),
            language: "en".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("envelope missing version")]
    MissingVersion,
    #[error("incompatible protocol version: {0}")]
    IncompatibleVersion(String),
    #[error("envelope missing type")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("envelope missing from.mud")]
    MissingOrigin,
    #[error("envelope missing id")]
    MissingId,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A parsed inbound envelope.
///
/// Outer fields are decoded eagerly; the payload is read on demand through
/// the `payload_*` accessors.
#[derive(Debug, Clone)]
pub struct Envelope {
    raw: String,
    pub version: String,
    pub id: String,
    pub timestamp: String,
    pub kind: MessageKind,
    pub from: Address,
    pub to: Address,
    pub metadata: Metadata,
}

impl Envelope {
    /// Validate the outer shape of one wire record.
    ///
    /// Rejects envelopes with a missing version, an incompatible major
    /// version, an unknown type, or no originating MUD.
    pub fn parse(text: &str) -> Result<Envelope, ParseError> {
        let version = json::get_string(text, "version").ok_or(ParseError::MissingVersion)?;
        if !compatible_version(&version) {
            return Err(ParseError::IncompatibleVersion(version));
        }
        let type_str = json::get_string(text, "type").ok_or(ParseError::MissingType)?;
        let kind = MessageKind::from_wire(&type_str).ok_or(ParseError::UnknownType(type_str))?;
        let from_mud = json::get_string(text, "from.mud").ok_or(ParseError::MissingOrigin)?;
        let id = json::get_string(text, "id").ok_or(ParseError::MissingId)?;

        Ok(Envelope {
            version,
            id,
            timestamp: json::get_string(text, "timestamp").unwrap_or_default(),
            kind,
            from: Address {
                mud: from_mud,
                user: json::get_string(text, "from.user"),
            },
            to: Address {
                mud: json::get_string(text, "to.mud").unwrap_or_default(),
                user: json::get_string(text, "to.user"),
            },
            metadata: Metadata {
                priority: json::get_int(text, "metadata.priority").unwrap_or(5),
                ttl: json::get_int(text, "metadata.ttl").unwrap_or(300),
                encoding: json::get_string(text, "metadata.encoding")
                    .unwrap_or_else(|| "utf-8".to_owned()),
                language: json::get_string(text, "metadata.language")
                    .unwrap_or_else(|| "en".to_owned()),
            },
            raw: text.to_owned(),
        })
    }

    pub fn payload_str(&self, key: &str) -> Option<String> {
        json::get_string(&self.raw, &format!("payload.{key}"))
    }

    pub fn payload_int(&self, key: &str) -> Option<i64> {
        json::get_int(&self.raw, &format!("payload.{key}"))
    }

    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        json::get_bool(&self.raw, &format!("payload.{key}"))
    }

    /// Raw JSON of a payload member, for array-valued fields.
    pub fn payload_raw(&self, key: &str) -> Option<&str> {
        json::raw_value(&self.raw, &format!("payload.{key}"))
    }

    /// The wire text this envelope was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Major-version compatibility check. "1.x" is accepted, everything else
/// is rejected.
fn compatible_version(version: &str) -> bool {
    version
        .split('.')
        .next()
        .is_some_and(|major| major == PROTOCOL_VERSION.split('.').next().unwrap_or("1"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TELL: &str = r#"{"version":"1.0","id":"a1","timestamp":"2024-01-01T00:00:00Z","type":"tell","from":{"mud":"Beta","user":"Alice"},"to":{"mud":"Alpha","user":"Bob"},"payload":{"message":"hi"},"metadata":{"priority":5,"ttl":300,"encoding":"utf-8","language":"en"}}"#;

    #[test]
    fn parses_a_complete_tell() {
        let env = Envelope::parse(TELL).unwrap();
        assert_eq!(env.kind, MessageKind::Tell);
        assert_eq!(env.id, "a1");
        assert_eq!(env.from, Address::user("Beta", "Alice"));
        assert_eq!(env.to, Address::user("Alpha", "Bob"));
        assert_eq!(env.payload_str("message").as_deref(), Some("hi"));
        assert_eq!(env.metadata.priority, 5);
        assert_eq!(env.metadata.ttl, 300);
    }

    #[test]
    fn rejects_missing_version() {
        let doc = r#"{"id":"a1","type":"tell","from":{"mud":"Beta"}}"#;
        assert_eq!(Envelope::parse(doc).unwrap_err(), ParseError::MissingVersion);
    }

    #[test]
    fn rejects_incompatible_major_version() {
        let doc = r#"{"version":"2.0","id":"a1","type":"tell","from":{"mud":"Beta"}}"#;
        assert!(matches!(
            Envelope::parse(doc),
            Err(ParseError::IncompatibleVersion(_))
        ));
    }

    #[test]
    fn accepts_minor_version_drift() {
        let doc = r#"{"version":"1.3","id":"a1","type":"ping","from":{"mud":"Beta"},"to":{"mud":"Alpha"},"payload":{}}"#;
        assert!(Envelope::parse(doc).is_ok());
    }

    #[test]
    fn rejects_unknown_type() {
        let doc = r#"{"version":"1.0","id":"a1","type":"teleport","from":{"mud":"Beta"}}"#;
        assert_eq!(
            Envelope::parse(doc).unwrap_err(),
            ParseError::UnknownType("teleport".to_owned())
        );
    }

    #[test]
    fn rejects_missing_origin_mud() {
        let doc = r#"{"version":"1.0","id":"a1","type":"tell","from":{"user":"Alice"}}"#;
        assert_eq!(Envelope::parse(doc).unwrap_err(), ParseError::MissingOrigin);
    }

    #[test]
    fn address_labels() {
        assert_eq!(Address::user("Beta", "Alice").label(), "Alice@Beta");
        assert_eq!(Address::mud("Beta").label(), "Beta");
    }

    #[test]
    fn envelope_parse_impl_eq_for_tests() {
        // PartialEq on Envelope is deliberately absent (raw text differences
        // are not semantic); compare fields instead.
        let a = Envelope::parse(TELL).unwrap();
        let b = Envelope::parse(TELL).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.kind, b.kind);
    }
}
