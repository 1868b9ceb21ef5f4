//! Batch types: labelled, time-stamped user lists and their diff history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use super::user::{User, UserId};
use crate::canonical::canonical_hash_hex;

/// Semantic role of a stored batch.
///
/// `Unknown` is the zero value and is never valid at a store boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    /// Zero value.
    #[default]
    Unknown,
    /// Accounts following us.
    Followers,
    /// Accounts we follow.
    Followings,
    /// Accounts we follow that do not follow back.
    NotMutualFollowers,
    /// Followers flagged by the classifier, bot-dominated.
    Bots,
    /// Followers present in the previous snapshot but not the current one.
    LostFollowers,
    /// Followers present now but not in the previous snapshot.
    NewFollowers,
    /// Followings present in the previous snapshot but not the current one.
    LostFollowings,
    /// Followings present now but not in the previous snapshot.
    NewFollowings,
    /// Followers flagged by the classifier, business-dominated.
    BusinessAccounts,
    /// Generic low-value accounts.
    Useless,
}

impl BatchType {
    /// Every variant, `Unknown` included.
    pub const ALL: [BatchType; 11] = [
        Self::Unknown,
        Self::Followers,
        Self::Followings,
        Self::NotMutualFollowers,
        Self::Bots,
        Self::LostFollowers,
        Self::NewFollowers,
        Self::LostFollowings,
        Self::NewFollowings,
        Self::BusinessAccounts,
        Self::Useless,
    ];

    /// True for every variant except `Unknown`.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Stable string form used in persisted documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Followers => "followers",
            Self::Followings => "followings",
            Self::NotMutualFollowers => "not_mutual_followers",
            Self::Bots => "bots",
            Self::LostFollowers => "lost_followers",
            Self::NewFollowers => "new_followers",
            Self::LostFollowings => "lost_followings",
            Self::NewFollowings => "new_followings",
            Self::BusinessAccounts => "business_accounts",
            Self::Useless => "useless",
        }
    }

    /// Parse the persisted string form.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for BatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, typed, time-stamped list of users.
///
/// User order is the order produced by the collector (pagination order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsersBatch {
    /// Role of this batch.
    pub batch_type: BatchType,
    /// Users in collection order.
    pub users: Vec<User>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl UsersBatch {
    /// Create a batch stamped with the current time.
    pub fn new(batch_type: BatchType, users: Vec<User>) -> Self {
        Self::with_created_at(batch_type, users, Utc::now())
    }

    /// Create a batch with an explicit timestamp.
    pub fn with_created_at(batch_type: BatchType, users: Vec<User>, created_at: DateTime<Utc>) -> Self {
        Self {
            batch_type,
            users,
            created_at,
        }
    }

    /// Create an empty batch stamped with the current time.
    pub fn empty(batch_type: BatchType) -> Self {
        Self::new(batch_type, Vec::new())
    }

    /// Number of users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// True if the batch holds no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Set of user ids.
    pub fn ids(&self) -> HashSet<UserId> {
        self.users.iter().map(|u| u.id).collect()
    }

    /// Deterministic digest of the batch membership (order-independent).
    pub fn fingerprint(&self) -> String {
        let mut ids: Vec<i64> = self.users.iter().map(|u| u.id.get()).collect();
        ids.sort_unstable();
        canonical_hash_hex(&(self.batch_type.as_str(), ids))
    }
}

/// Which side of the graph a diff is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffDirection {
    /// Accounts following us.
    Followers,
    /// Accounts we follow.
    Followings,
}

impl DiffDirection {
    /// Batch type of the full snapshot for this direction.
    pub fn snapshot_type(&self) -> BatchType {
        match self {
            Self::Followers => BatchType::Followers,
            Self::Followings => BatchType::Followings,
        }
    }

    /// Batch type of the "lost" side.
    pub fn lost_type(&self) -> BatchType {
        match self {
            Self::Followers => BatchType::LostFollowers,
            Self::Followings => BatchType::LostFollowings,
        }
    }

    /// Batch type of the "new" side.
    pub fn new_type(&self) -> BatchType {
        match self {
            Self::Followers => BatchType::NewFollowers,
            Self::Followings => BatchType::NewFollowings,
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "followers" => Some(Self::Followers),
            "followings" | "following" => Some(Self::Followings),
            _ => None,
        }
    }
}

impl fmt::Display for DiffDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Followers => write!(f, "followers"),
            Self::Followings => write!(f, "followings"),
        }
    }
}

/// Lost and new members between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffPair {
    /// Members of the old list missing from the new one.
    pub lost: UsersBatch,
    /// Members of the new list missing from the old one.
    pub new: UsersBatch,
}

/// Integrity violations found while assembling a diff history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// More than one lost and one new batch on the same day.
    #[error("{count} diff batches recorded on {date}, at most 2 allowed")]
    TooManyBatches {
        /// Offending date.
        date: NaiveDate,
        /// Number of batches found.
        count: usize,
    },
    /// Two batches of the same kind on the same day.
    #[error("duplicate {batch_type} batch on {date}")]
    DuplicateType {
        /// Offending date.
        date: NaiveDate,
        /// Repeated type.
        batch_type: BatchType,
    },
    /// A batch whose type does not belong to this direction's diff.
    #[error("batch of type {batch_type} does not belong to the {direction} history")]
    UnexpectedType {
        /// Direction being assembled.
        direction: DiffDirection,
        /// Type found.
        batch_type: BatchType,
    },
}

/// Lost/new batches grouped by calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffHistory {
    /// Direction of the history.
    pub direction: DiffDirection,
    /// Date to batches, each day holding at most one lost and one new batch
    /// (lost first).
    pub history: BTreeMap<NaiveDate, Vec<UsersBatch>>,
}

impl DiffHistory {
    /// Group stored lost/new batches by the date portion of `created_at`.
    pub fn from_batches(
        direction: DiffDirection,
        batches: impl IntoIterator<Item = UsersBatch>,
    ) -> Result<Self, HistoryError> {
        let (lost_type, new_type) = (direction.lost_type(), direction.new_type());
        let mut history: BTreeMap<NaiveDate, Vec<UsersBatch>> = BTreeMap::new();

        for batch in batches {
            if batch.batch_type != lost_type && batch.batch_type != new_type {
                return Err(HistoryError::UnexpectedType {
                    direction,
                    batch_type: batch.batch_type,
                });
            }
            history
                .entry(batch.created_at.date_naive())
                .or_default()
                .push(batch);
        }

        for (date, day) in history.iter_mut() {
            if day.len() > 2 {
                return Err(HistoryError::TooManyBatches {
                    date: *date,
                    count: day.len(),
                });
            }
            if day.len() == 2 && day[0].batch_type == day[1].batch_type {
                return Err(HistoryError::DuplicateType {
                    date: *date,
                    batch_type: day[0].batch_type,
                });
            }
            // Lost before new.
            day.sort_by_key(|b| b.batch_type != lost_type);
        }

        Ok(Self { direction, history })
    }

    /// Number of distinct days.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Days from most recent to oldest.
    pub fn newest_first(&self) -> impl Iterator<Item = (&NaiveDate, &Vec<UsersBatch>)> {
        self.history.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn batch(batch_type: BatchType, ids: &[i64], created_at: DateTime<Utc>) -> UsersBatch {
        let users = ids.iter().map(|&i| User::new(i, format!("user{i}"), "")).collect();
        UsersBatch::with_created_at(batch_type, users, created_at)
    }

    #[test]
    fn test_batch_type_validity_and_strings() {
        assert!(!BatchType::Unknown.is_valid());
        assert!(BatchType::ALL.iter().skip(1).all(|t| t.is_valid()));
        for t in BatchType::ALL {
            assert_eq!(BatchType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(BatchType::from_str("followerz"), None);
        assert_eq!(BatchType::default(), BatchType::Unknown);
    }

    #[test]
    fn test_fingerprint_ignores_order() {
        let now = Utc::now();
        let a = batch(BatchType::Followers, &[3, 1, 2], now);
        let b = batch(BatchType::Followers, &[1, 2, 3], now);
        let c = batch(BatchType::Followings, &[1, 2, 3], now);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_history_groups_by_day_lost_first() {
        let history = DiffHistory::from_batches(
            DiffDirection::Followers,
            vec![
                batch(BatchType::NewFollowers, &[4], at(2, 10)),
                batch(BatchType::LostFollowers, &[1], at(2, 10)),
                batch(BatchType::LostFollowers, &[5], at(1, 9)),
            ],
        )
        .unwrap();

        assert_eq!(history.len(), 2);
        let day2 = &history.history[&at(2, 0).date_naive()];
        assert_eq!(day2[0].batch_type, BatchType::LostFollowers);
        assert_eq!(day2[1].batch_type, BatchType::NewFollowers);

        let newest: Vec<_> = history.newest_first().map(|(d, _)| *d).collect();
        assert_eq!(newest[0], at(2, 0).date_naive());
    }

    #[test]
    fn test_history_rejects_three_batches_per_day() {
        let err = DiffHistory::from_batches(
            DiffDirection::Followers,
            vec![
                batch(BatchType::LostFollowers, &[1], at(2, 8)),
                batch(BatchType::NewFollowers, &[2], at(2, 9)),
                batch(BatchType::NewFollowers, &[3], at(2, 10)),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, HistoryError::TooManyBatches { count: 3, .. }));
    }

    #[test]
    fn test_history_rejects_duplicate_type_and_foreign_type() {
        let dup = DiffHistory::from_batches(
            DiffDirection::Followings,
            vec![
                batch(BatchType::LostFollowings, &[1], at(2, 8)),
                batch(BatchType::LostFollowings, &[2], at(2, 9)),
            ],
        );
        assert!(matches!(dup, Err(HistoryError::DuplicateType { .. })));

        let foreign = DiffHistory::from_batches(
            DiffDirection::Followings,
            vec![batch(BatchType::LostFollowers, &[1], at(2, 8))],
        );
        assert!(matches!(foreign, Err(HistoryError::UnexpectedType { .. })));
    }
}
