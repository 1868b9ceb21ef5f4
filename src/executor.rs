//! Bounded, whitelist-respecting batch mutations.
//!
//! One run visits the targets in input order. Per user:
//!
//! 1. cancellation stops the run (`Cancelled`)
//! 2. whitelisted handles are skipped, no charge, no tick
//! 3. an exhausted budget stops the run (`LimitExceeded`)
//! 4. in debug mode the intent is logged and ticked, nothing else
//! 5. the remote call is made; success charges the budget and ticks,
//!    a session-fatal error stops the run (`Corrupted`), any other error
//!    is logged and the user is skipped
//!
//! The budget is checked only when another mutation is about to happen, so a
//! run whose last target exactly fills the cap still completes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::budget::{ActionBudget, Charge, Limits};
use crate::client::{ClientError, RemoteClient};
use crate::config::Whitelist;
use crate::error::{ActionReport, Outcome};
use crate::pacing::pause;
use crate::progress::ProgressSink;
use crate::types::User;

/// Kind of relationship change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Stop following.
    Unfollow,
    /// Force-remove a follower.
    Remove,
    /// Block.
    Block,
    /// Follow.
    Follow,
}

impl Mutation {
    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unfollow => "unfollow",
            Self::Remove => "remove",
            Self::Block => "block",
            Self::Follow => "follow",
        }
    }

    /// Cap that applies to this mutation. Follows have their own limit,
    /// everything else counts against the unfollow limit.
    pub fn cap(&self, limits: &Limits) -> u32 {
        match self {
            Self::Follow => limits.follow,
            Self::Unfollow | Self::Remove | Self::Block => limits.unfollow,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies one mutation to a list of users.
pub struct MutationExecutor<C: RemoteClient + ?Sized> {
    client: Arc<C>,
    whitelist: Whitelist,
    debug: bool,
    pacing: Duration,
}

impl<C: RemoteClient + ?Sized> MutationExecutor<C> {
    /// Create an executor that mutates for real with no pacing.
    pub fn new(client: Arc<C>, whitelist: Whitelist) -> Self {
        Self {
            client,
            whitelist,
            debug: false,
            pacing: Duration::ZERO,
        }
    }

    /// Only log intended mutations.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Pause between remote calls.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    async fn apply(&self, mutation: Mutation, user: &User) -> Result<(), ClientError> {
        match mutation {
            Mutation::Unfollow => self.client.unfollow(user).await,
            Mutation::Remove => self.client.remove_follower(user).await,
            Mutation::Block => self.client.block(user).await,
            Mutation::Follow => self.client.follow(user).await,
        }
    }

    /// Run `mutation` over `users`, charging `budget` for each success.
    pub async fn run(
        &self,
        users: &[User],
        mutation: Mutation,
        budget: &mut ActionBudget,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ActionReport {
        if users.is_empty() {
            tracing::info!(%mutation, "no users to process");
            return ActionReport::no_users(mutation);
        }

        let mut report = ActionReport::new(mutation);
        progress.start(users.len());

        for user in users {
            if cancel.is_cancelled() {
                report.outcome = Outcome::Cancelled;
                break;
            }
            if self.whitelist.contains(&user.username) {
                tracing::debug!(%mutation, username = %user.username, "skipping whitelisted user");
                report.skipped += 1;
                continue;
            }
            if budget.is_exhausted() {
                report.outcome = Outcome::LimitExceeded;
                break;
            }
            if self.debug {
                tracing::info!(%mutation, user_id = %user.id, username = %user.username, "dry run, not applying");
                report.simulated += 1;
                progress.tick();
                continue;
            }

            match self.apply(mutation, user).await {
                Ok(()) => {
                    if budget.charge() == Charge::CapReached {
                        tracing::debug!(%mutation, cap = budget.cap(), "cap reached");
                    }
                    report.performed = budget.performed();
                    tracing::debug!(%mutation, user_id = %user.id, username = %user.username, "applied");
                    progress.tick();
                }
                Err(e) if e.is_session_fatal() => {
                    tracing::error!(%mutation, username = %user.username, error = %e, "session no longer usable");
                    report.outcome = Outcome::Corrupted { reason: e.to_string() };
                    break;
                }
                Err(e) => {
                    tracing::warn!(%mutation, username = %user.username, error = %e, "mutation failed, skipping user");
                    report.failed += 1;
                }
            }

            pause(self.pacing, cancel).await;
        }

        progress.finish();
        tracing::info!(
            %mutation,
            performed = report.performed,
            cap = budget.cap(),
            skipped = report.skipped,
            failed = report.failed,
            outcome = %report.outcome,
            "mutation run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FixtureClient;
    use crate::progress::{NoOpProgress, RecordingProgress};
    use crate::types::UserId;

    fn users(ids: &[i64]) -> Vec<User> {
        ids.iter().map(|&i| User::new(i, format!("user{i}"), "")).collect()
    }

    fn executor(client: &Arc<FixtureClient>, whitelist: &[&str]) -> MutationExecutor<FixtureClient> {
        MutationExecutor::new(Arc::clone(client), Whitelist::new(whitelist))
    }

    fn called_ids(client: &FixtureClient) -> Vec<i64> {
        client.calls().iter().map(|c| c.user_id.get()).collect()
    }

    #[tokio::test]
    async fn test_empty_input_is_no_users() {
        let client = Arc::new(FixtureClient::new("me"));
        let mut budget = ActionBudget::new(10);
        let report = executor(&client, &[])
            .run(&[], Mutation::Unfollow, &mut budget, &CancellationToken::new(), &NoOpProgress)
            .await;
        assert_eq!(report.outcome, Outcome::NoUsers);
        assert_eq!(report.performed, 0);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cap_exactly_met_completes() {
        let client = Arc::new(FixtureClient::new("me").with_followings(&users(&[1, 2])));
        let mut budget = ActionBudget::new(2);
        let report = executor(&client, &[])
            .run(&users(&[1, 2]), Mutation::Unfollow, &mut budget, &CancellationToken::new(), &NoOpProgress)
            .await;
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.performed, 2);
    }

    #[tokio::test]
    async fn test_limit_exceeded_stops_before_next_call() {
        let client = Arc::new(FixtureClient::new("me"));
        let mut budget = ActionBudget::new(2);
        let report = executor(&client, &[])
            .run(&users(&[1, 2, 3, 4]), Mutation::Block, &mut budget, &CancellationToken::new(), &NoOpProgress)
            .await;
        assert_eq!(report.outcome, Outcome::LimitExceeded);
        assert_eq!(report.performed, 2);
        assert_eq!(called_ids(&client), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_zero_cap_mutates_nothing() {
        let client = Arc::new(FixtureClient::new("me"));
        let mut budget = ActionBudget::new(0);
        let report = executor(&client, &[])
            .run(&users(&[1]), Mutation::Follow, &mut budget, &CancellationToken::new(), &NoOpProgress)
            .await;
        assert_eq!(report.outcome, Outcome::LimitExceeded);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_whitelisted_users_are_not_charged_or_ticked() {
        let client = Arc::new(FixtureClient::new("me"));
        let progress = RecordingProgress::new();
        let mut budget = ActionBudget::new(10);
        let report = executor(&client, &["@USER2"])
            .run(&users(&[1, 2, 3]), Mutation::Unfollow, &mut budget, &CancellationToken::new(), &progress)
            .await;
        assert_eq!(report.performed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(progress.ticks(), 2);
        assert_eq!(called_ids(&client), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_whitelisted_tail_after_cap_still_completes() {
        let client = Arc::new(FixtureClient::new("me"));
        let mut budget = ActionBudget::new(1);
        let report = executor(&client, &["user2"])
            .run(&users(&[1, 2]), Mutation::Unfollow, &mut budget, &CancellationToken::new(), &NoOpProgress)
            .await;
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.performed, 1);
    }

    #[tokio::test]
    async fn test_debug_mode_makes_no_calls() {
        let client = Arc::new(FixtureClient::new("me"));
        let progress = RecordingProgress::new();
        let mut budget = ActionBudget::new(2);
        let report = executor(&client, &[])
            .with_debug(true)
            .run(&users(&[1, 2, 3, 4]), Mutation::Unfollow, &mut budget, &CancellationToken::new(), &progress)
            .await;
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.performed, 0);
        assert_eq!(report.simulated, 4);
        assert_eq!(progress.ticks(), 4);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_skips_user() {
        let client = Arc::new(FixtureClient::new("me"));
        client.fail_mutation(UserId::new(2), ClientError::Request("500".into()));
        let progress = RecordingProgress::new();
        let mut budget = ActionBudget::new(10);
        let report = executor(&client, &[])
            .run(&users(&[1, 2, 3]), Mutation::Remove, &mut budget, &CancellationToken::new(), &progress)
            .await;
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.performed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(progress.ticks(), 2);
    }

    #[tokio::test]
    async fn test_session_fatal_error_corrupts_run() {
        let client = Arc::new(FixtureClient::new("me"));
        client.fail_mutation(UserId::new(2), ClientError::RateLimited("429".into()));
        let mut budget = ActionBudget::new(10);
        let report = executor(&client, &[])
            .run(&users(&[1, 2, 3]), Mutation::Unfollow, &mut budget, &CancellationToken::new(), &NoOpProgress)
            .await;
        assert_eq!(report.performed, 1);
        assert!(matches!(report.outcome, Outcome::Corrupted { .. }));
        assert_eq!(called_ids(&client), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let client = Arc::new(FixtureClient::new("me"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut budget = ActionBudget::new(10);
        let report = executor(&client, &[])
            .run(&users(&[1, 2]), Mutation::Unfollow, &mut budget, &cancel, &NoOpProgress)
            .await;
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert_eq!(client.call_count(), 0);
    }

    #[test]
    fn test_mutation_caps() {
        let limits = Limits::new(3, 7);
        assert_eq!(Mutation::Follow.cap(&limits), 3);
        assert_eq!(Mutation::Unfollow.cap(&limits), 7);
        assert_eq!(Mutation::Remove.cap(&limits), 7);
        assert_eq!(Mutation::Block.cap(&limits), 7);
    }
}
