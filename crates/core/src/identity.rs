//! Per-session identity context.
//!
//! An [Identity] is constructed once at session start and passed explicitly to
//! everything that talks to the backend. It is never read from ambient storage;
//! persistence, if any, is the caller's concern.

use serde::Deserialize;
use serde::Serialize;

/// How many characters of the generated id end up in the `Guest-XXXX` fallback name.
const GUEST_SUFFIX_LEN: usize = 4;

/// An opaque user id plus an optional display name.
///
/// Exactly one live identity exists per client session. The id is stable for the
/// lifetime of the value; only the display name may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque identifier sent as `X-User-ID` and in WebSocket query params.
    pub user_id: String,
    /// Display name chosen by the user, if any.
    pub user_name: Option<String>,
}

impl Identity {
    /// Generate a fresh identity with a random id and no display name.
    pub fn generate() -> Self {
        Self {
            user_id: uuid::Uuid::new_v4().to_string(),
            user_name: None,
        }
    }

    /// Construct an identity from a known id, e.g. one issued by the auth backend.
    pub fn from_user_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: None,
        }
    }

    /// Set the display name.
    pub fn set_user_name(&mut self, name: impl Into<String>) {
        self.user_name = Some(name.into());
    }

    /// The name shown to other users: the chosen display name, or `Guest-XXXX`
    /// derived from the first characters of the id.
    pub fn display_name(&self) -> String {
        match &self.user_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => {
                let prefix: String = self.user_id.chars().take(GUEST_SUFFIX_LEN).collect();
                format!("Guest-{}", prefix)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_is_stable() {
        let id = Identity::generate();
        assert_eq!(id.display_name(), id.display_name());
        assert_eq!(id.user_id, id.clone().user_id);
    }

    #[test]
    fn test_guest_fallback_pattern() {
        let id = Identity::from_user_id("abcdef-123456");
        assert_eq!(id.display_name(), "Guest-abcd");
    }

    #[test]
    fn test_explicit_name_wins() {
        let mut id = Identity::generate();
        id.set_user_name("ada");
        assert_eq!(id.display_name(), "ada");
    }

    #[test]
    fn test_empty_name_falls_back_to_guest() {
        let mut id = Identity::from_user_id("xyz9rest");
        id.set_user_name("");
        assert_eq!(id.display_name(), "Guest-xyz9");
    }
}
