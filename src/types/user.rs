//! User types for the graph kernel.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Numeric account identifier on the remote network.
///
/// Wraps an `i64` and implements `Ord` so id sets iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Create a new UserId.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// An account on the network.
///
/// Identity is the `id` alone: two users with the same id are equal even if
/// their descriptive fields differ (renames between snapshots are common).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Account id.
    pub id: UserId,
    /// Handle, never empty.
    pub username: String,
    /// Display name, may be empty.
    #[serde(default)]
    pub full_name: String,
}

impl User {
    /// Create a new user.
    pub fn new(id: impl Into<UserId>, username: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            full_name: full_name.into(),
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.id)
    }
}

/// A raw user item as it appears in a page of the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Primary key on the remote side.
    pub pk: i64,
    /// Handle.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub full_name: String,
}

impl UserRecord {
    /// Create a new record.
    pub fn new(pk: i64, username: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            pk,
            username: username.into(),
            full_name: full_name.into(),
        }
    }

    /// Convert into a `User`. Returns `None` when the handle is empty.
    pub fn to_user(&self) -> Option<User> {
        if self.username.trim().is_empty() {
            return None;
        }
        Some(User::new(self.pk, self.username.clone(), self.full_name.clone()))
    }
}

impl From<&User> for UserRecord {
    fn from(user: &User) -> Self {
        Self::new(user.id.get(), user.username.clone(), user.full_name.clone())
    }
}

/// Normalize a handle for comparisons: trims whitespace and a leading `@`,
/// lowercases the rest. Handles are case-insensitive on the network.
pub fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

/// Check that a handle is syntactically valid (1-30 of `[A-Za-z0-9._]`).
pub fn is_valid_username(name: &str) -> bool {
    static USERNAME: OnceLock<Option<Regex>> = OnceLock::new();
    USERNAME
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._]{1,30}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(name.trim().trim_start_matches('@')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_user_equality_is_by_id() {
        let a = User::new(1, "alice", "Alice");
        let renamed = User::new(1, "alice_new", "");
        let other = User::new(2, "alice", "Alice");

        assert_eq!(a, renamed);
        assert_ne!(a, other);

        let set: HashSet<_> = [a, renamed, other].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_record_without_username_is_rejected() {
        assert!(UserRecord::new(7, "  ", "x").to_user().is_none());
        let user = UserRecord::new(7, "bob", "Bob").to_user().unwrap();
        assert_eq!(user.id, UserId::new(7));
        assert_eq!(user.full_name, "Bob");
    }

    #[test]
    fn test_username_normalization() {
        assert_eq!(normalize_username(" @Some.User "), "some.user");
        assert!(is_valid_username("@some_user.1"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(&"a".repeat(31)));
    }

    #[test]
    fn test_user_serde_field_names() {
        let json = serde_json::to_value(User::new(42, "carol", "")).unwrap();
        assert_eq!(json["id"], 42);
        assert_eq!(json["username"], "carol");
        assert_eq!(json["full_name"], "");
    }
}
