//! Name validation for the three identifier spaces on the mesh.
//!
//! Channel names must match `^[a-z0-9_-]{1,32}$`. User and MUD names use
//! the same alphabet plus uppercase letters, since MUD-side display names
//! are conventionally capitalised.

const MAX_NAME_LEN: usize = 32;

/// Channel names: lowercase alphanumerics, underscore, dash; 1–32 chars.
pub fn channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

/// User names: alphanumerics, underscore, dash; 1–32 chars.
pub fn user_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// MUD names: same alphabet as user names.
pub fn mud_name(name: &str) -> bool {
    user_name(name)
}

/// Split a `user@mud` target into its parts, validating both.
pub fn split_target(target: &str) -> Option<(&str, &str)> {
    let (user, mud) = target.split_once('@')?;
    if user_name(user) && mud_name(mud) {
        Some((user, mud))
    } else {
        None
    }
}
