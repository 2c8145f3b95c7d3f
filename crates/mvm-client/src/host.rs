//! Host adapter: the contract the embedding MUD implements.
//!
//! The core never touches the MUD's player table, output pipeline, or
//! logger directly; everything flows through this trait. One implementation
//! per codebase replaces the macro soup older IMC clients shipped.
//!
//! Implementations must be `Send + Sync`: the core runs on its own tokio
//! task and calls in from there, so hosts with a single-threaded main loop
//! are expected to marshal `deliver`/`log` onto it (typically via a queue
//! drained once per host tick).

/// How a delivered line should be styled. The host maps styles to colour
/// codes per player preference; the core never emits ANSI itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStyle {
    Tell,
    Emote,
    Channel,
    Info,
    Error,
}

/// Capabilities gating the player command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    UseTell,
    UseChannel,
    UseWho,
    UseFinger,
}

/// Severity for host-side audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Snapshot of one online local player, as shared with peer MUDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub name: String,
    pub display_name: String,
    pub level: u32,
    pub idle_seconds: u64,
    pub location: String,
}

/// Profile detail a host is willing to share in finger responses.
/// `None` from [`HostAdapter::finger_info`] means the player exists but
/// declined (or is not permitted) to be fingered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerInfo {
    pub email: Option<String>,
    pub plan: Option<String>,
    pub last_login: Option<String>,
}

/// Operations the core requires from its embedder, and nothing more.
pub trait HostAdapter: Send + Sync {
    /// Case-insensitive exact lookup of an online local player.
    fn find_user(&self, name: &str) -> Option<LocalUser>;

    /// Snapshot of all online local players, each visited once.
    fn online_users(&self) -> Vec<LocalUser>;

    /// Deliver one formatted line to a local player.
    fn deliver(&self, user: &str, text: &str, style: DeliveryStyle);

    /// Host-visible logging (audit trail, operator console).
    fn log(&self, level: LogLevel, message: &str);

    fn user_level(&self, user: &str) -> u32;

    fn user_can(&self, user: &str, capability: Capability) -> bool;

    /// Extended profile for finger responses; `None` withholds the profile.
    fn finger_info(&self, user: &str) -> Option<FingerInfo>;

    /// External profanity predicate, consulted only when the
    /// `filter_profanity` toggle is set.
    fn is_profane(&self, _text: &str) -> bool {
        false
    }
}
