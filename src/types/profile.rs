//! Profile signals used to classify low-value accounts.

use serde::{Deserialize, Serialize};

/// Default followings-count threshold above which an account looks automated.
pub const DEFAULT_USELESS_THRESHOLD: u64 = 500;

/// Why a profile was flagged. A profile can carry several reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UselessReason {
    /// Follows at least the configured number of accounts.
    MassFollowing,
    /// Marked as fake/spam by the network.
    Fraud,
    /// Business or creator account.
    Business,
    /// Has never posted.
    NoMedia,
}

/// Profile facts fetched from the remote side for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSignals {
    /// Number of accounts this user follows.
    pub followings_count: u64,
    /// Network-side fake/spam flag.
    #[serde(default)]
    pub is_fraud: bool,
    /// Business or creator account.
    #[serde(default)]
    pub is_business: bool,
    /// Number of posts.
    pub media_count: u64,
}

impl ProfileSignals {
    /// Reasons this profile counts as useless under `threshold`.
    ///
    /// `followings_count >= threshold` is inclusive.
    pub fn reasons(&self, threshold: u64) -> Vec<UselessReason> {
        let mut reasons = Vec::new();
        if self.followings_count >= threshold {
            reasons.push(UselessReason::MassFollowing);
        }
        if self.is_fraud {
            reasons.push(UselessReason::Fraud);
        }
        if self.is_business {
            reasons.push(UselessReason::Business);
        }
        if self.media_count == 0 {
            reasons.push(UselessReason::NoMedia);
        }
        reasons
    }

    /// Disjunction of all four signals.
    pub fn is_useless(&self, threshold: u64) -> bool {
        !self.reasons(threshold).is_empty()
    }
}
