//! Set differences between user lists.
//!
//! All operations are linear in the input sizes and preserve the order of
//! the side they return members from. Inputs are assumed deduplicated by id.

use std::collections::HashSet;

use chrono::Utc;

use crate::types::{BatchType, DiffDirection, DiffPair, User, UserId, UsersBatch};

/// Members of `keep` whose id is absent from `exclude`, in `keep` order.
///
/// The id set is built from the shorter side.
fn difference(keep: &[User], exclude: &[User]) -> Vec<User> {
    if keep.is_empty() {
        return Vec::new();
    }
    if exclude.len() <= keep.len() {
        let excluded: HashSet<UserId> = exclude.iter().map(|u| u.id).collect();
        keep.iter().filter(|u| !excluded.contains(&u.id)).cloned().collect()
    } else {
        let mut remaining: HashSet<UserId> = keep.iter().map(|u| u.id).collect();
        for user in exclude {
            remaining.remove(&user.id);
            if remaining.is_empty() {
                return Vec::new();
            }
        }
        keep.iter().filter(|u| remaining.contains(&u.id)).cloned().collect()
    }
}

/// Users in `old` that are no longer in `new`.
pub fn lost(old: &[User], new: &[User]) -> Vec<User> {
    difference(old, new)
}

/// Users in `new` that were not in `old`.
pub fn new_members(old: &[User], new: &[User]) -> Vec<User> {
    difference(new, old)
}

/// Accounts we follow that do not follow back, in `followings` order.
pub fn not_mutual(followers: &[User], followings: &[User]) -> Vec<User> {
    difference(followings, followers)
}

/// Lost/new batches for `direction`, both stamped with the same "now".
pub fn diff_batches(direction: DiffDirection, old: &[User], new: &[User]) -> DiffPair {
    let now = Utc::now();
    DiffPair {
        lost: UsersBatch::with_created_at(direction.lost_type(), lost(old, new), now),
        new: UsersBatch::with_created_at(direction.new_type(), new_members(old, new), now),
    }
}

/// Non-mutual followings packaged as a `NotMutualFollowers` batch.
pub fn not_mutual_batch(followers: &[User], followings: &[User]) -> UsersBatch {
    UsersBatch::new(BatchType::NotMutualFollowers, not_mutual(followers, followings))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(ids: &[i64]) -> Vec<User> {
        ids.iter().map(|&i| User::new(i, format!("user{i}"), "")).collect()
    }

    fn ids(users: &[User]) -> Vec<i64> {
        users.iter().map(|u| u.id.get()).collect()
    }

    #[test]
    fn test_lost_and_new() {
        let old = users(&[1, 2, 3]);
        let new = users(&[2, 3, 4]);
        assert_eq!(ids(&lost(&old, &new)), vec![1]);
        assert_eq!(ids(&new_members(&old, &new)), vec![4]);
    }

    #[test]
    fn test_order_preserved_with_either_side_shorter() {
        let long = users(&[9, 7, 5, 3, 1, 8]);
        let short = users(&[5, 8]);
        assert_eq!(ids(&lost(&long, &short)), vec![9, 7, 3, 1]);
        assert_eq!(ids(&lost(&short, &long)), Vec::<i64>::new());
        assert_eq!(ids(&lost(&users(&[4, 5, 2]), &users(&[5, 6, 7, 8, 9]))), vec![4, 2]);
    }

    #[test]
    fn test_full_overlap_is_empty_not_marker() {
        let a = users(&[1, 2]);
        assert!(lost(&a, &a).is_empty());
        assert!(new_members(&a, &a).is_empty());
        assert!(lost(&[], &a).is_empty());
        assert_eq!(ids(&new_members(&[], &a)), vec![1, 2]);
    }

    #[test]
    fn test_not_mutual() {
        let followers = users(&[1, 2, 3]);
        let followings = users(&[1, 2, 3, 4, 5]);
        assert_eq!(ids(&not_mutual(&followers, &followings)), vec![4, 5]);
        assert!(not_mutual(&followers, &followers).is_empty());
    }

    #[test]
    fn test_batches_are_typed() {
        let pair = diff_batches(DiffDirection::Followings, &users(&[1]), &users(&[2]));
        assert_eq!(pair.lost.batch_type, BatchType::LostFollowings);
        assert_eq!(pair.new.batch_type, BatchType::NewFollowings);
        assert_eq!(pair.lost.created_at, pair.new.created_at);

        let nm = not_mutual_batch(&users(&[1]), &users(&[1, 2]));
        assert_eq!(nm.batch_type, BatchType::NotMutualFollowers);
        assert_eq!(ids(&nm.users), vec![2]);
    }
}
