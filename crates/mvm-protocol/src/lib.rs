// mvm-protocol: MudVault Mesh wire model.
//
// The mesh exchanges one JSON envelope per WebSocket text frame. This crate
// owns the envelope schema: the shallow scanner/emitter, the typed envelope
// view, outbound builders per message kind, and identifier validation. It
// performs no I/O.

pub mod builders;
pub mod envelope;
pub mod json;
pub mod validate;

pub use envelope::{Address, Envelope, MessageKind, Metadata, ParseError, PROTOCOL_VERSION};

/// Wire error codes carried in `payload.code` of `error` envelopes.
pub mod error_codes {
    pub const USER_NOT_FOUND: &str = "user-not-found";
    pub const MUD_NOT_FOUND: &str = "mud-not-found";
    pub const CHANNEL_NOT_FOUND: &str = "channel-not-found";
    pub const RATE_LIMITED: &str = "rate-limited";
    pub const PERMISSION_DENIED: &str = "permission-denied";
    pub const AUTH_FAILED: &str = "auth-failed";
    pub const PROTOCOL_ERROR: &str = "protocol-error";
}
