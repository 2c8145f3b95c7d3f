//! Error taxonomy for the client core.
//!
//! Every public operation reports failure through [`MeshError`]; the variant
//! is the kind tag callers branch on. Transport and auth failures feed the
//! connection state machine and never reach players directly; the
//! caller-facing variants (rate-limited, permission, not-found, capacity)
//! are rendered to the invoking player as one-line error-styled messages.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeshError {
    /// Socket or stream failure, malformed handshake, frame violation.
    #[error("transport: {0}")]
    Transport(String),

    /// Token rejected or authentication timed out.
    #[error("authentication: {0}")]
    Auth(String),

    /// Valid frame but malformed envelope or unknown type/version.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Caller exceeded a per-minute operation cap.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Caller lacks the capability or level for the operation.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Target user, MUD, or channel is unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// Frame or message exceeds a configured size cap, or a queue is full.
    #[error("capacity: {0}")]
    Capacity(String),

    /// Invariant violation inside the core.
    #[error("internal: {0}")]
    Internal(String),
}

impl MeshError {
    /// One-line rendering for player-visible delivery.
    pub fn player_line(&self) -> String {
        match self {
            MeshError::RateLimited(what) => {
                format!("You are sending {what} too quickly. Please wait.")
            }
            MeshError::Permission(what) => format!("You don't have permission to {what}."),
            MeshError::NotFound(what) => format!("{what} was not found."),
            MeshError::Capacity(what) => format!("Rejected: {what}."),
            other => format!("Mesh error: {other}."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_lines_are_single_lines() {
        let errors = [
            MeshError::RateLimited("tells".to_owned()),
            MeshError::Permission("use channels".to_owned()),
            MeshError::NotFound("Channel 'gossip'".to_owned()),
            MeshError::Capacity("message exceeds 4096 characters".to_owned()),
            MeshError::Transport("socket closed".to_owned()),
        ];
        for err in errors {
            assert!(!err.player_line().contains('\n'));
        }
    }
}
