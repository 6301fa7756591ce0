//! Opaque, prefixed entity identifiers.

/// Generates a new opaque id with the given prefix, e.g. `ses_`, `run_`, `lnch_`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}{}", nanoid::nanoid!(21))
}

pub fn session_id() -> String {
    new_id("ses_")
}

pub fn run_id() -> String {
    new_id("run_")
}

pub fn event_id() -> String {
    new_id("evt_")
}

pub fn launch_id() -> String {
    new_id("lnch_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_their_prefix() {
        assert!(session_id().starts_with("ses_"));
        assert!(run_id().starts_with("run_"));
        assert!(event_id().starts_with("evt_"));
    }

    #[test]
    fn ids_are_not_trivially_collidable() {
        let a = run_id();
        let b = run_id();
        assert_ne!(a, b);
    }
}
