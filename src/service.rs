//! User-facing graph operations.
//!
//! [`GraphService`] wires the collector, diff algebra, snapshot store,
//! classifier and executor together. Every operation runs inside the
//! service's `graph_service{account=..}` span, so diagnostics from all
//! components carry the account without a process-wide logger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::budget::{ActionBudget, Limits};
use crate::classifier::UselessClassifier;
use crate::client::{ClientError, RemoteClient, UserSource};
use crate::collector::UserCollector;
use crate::config::{EngineConfig, Whitelist};
use crate::diff::{diff_batches, not_mutual_batch};
use crate::error::{ActionReport, EngineError, Outcome};
use crate::executor::{Mutation, MutationExecutor};
use crate::progress::ProgressSink;
use crate::store::SnapshotStore;
use crate::types::{
    DiffDirection, DiffHistory, DiffPair, User, UsersBatch, DEFAULT_USELESS_THRESHOLD,
};

/// Orchestrates graph reads, diffs and mutations for one account.
pub struct GraphService<C: RemoteClient + ?Sized, S: SnapshotStore + ?Sized> {
    client: Arc<C>,
    store: Arc<S>,
    limits: Limits,
    whitelist: Whitelist,
    debug: bool,
    incognito: bool,
    pacing: Duration,
    useless_threshold: u64,
    span: Span,
}

impl<C: RemoteClient + ?Sized, S: SnapshotStore + ?Sized> GraphService<C, S> {
    /// Create a service with zero limits, an empty whitelist and no pacing.
    pub fn new(client: Arc<C>, store: Arc<S>) -> Self {
        let span = tracing::info_span!("graph_service", account = %client.username());
        Self {
            client,
            store,
            limits: Limits::default(),
            whitelist: Whitelist::default(),
            debug: false,
            incognito: false,
            pacing: Duration::ZERO,
            useless_threshold: DEFAULT_USELESS_THRESHOLD,
            span,
        }
    }

    /// Create a service from configuration.
    pub fn from_config(client: Arc<C>, store: Arc<S>, config: &EngineConfig) -> Self {
        Self::new(client, store)
            .with_limits(config.limits)
            .with_whitelist(config.whitelist())
            .with_debug(config.debug)
            .with_incognito(config.incognito)
            .with_pacing(config.pacing())
            .with_useless_threshold(config.useless_threshold)
    }

    /// Set action caps.
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set protected handles.
    pub fn with_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    /// Log mutations instead of performing them.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Never write snapshots.
    pub fn with_incognito(mut self, incognito: bool) -> Self {
        self.incognito = incognito;
        self
    }

    /// Pause between remote calls.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Classifier followings threshold.
    pub fn with_useless_threshold(mut self, threshold: u64) -> Self {
        self.useless_threshold = threshold;
        self
    }

    /// Remote client.
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Snapshot store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Configured caps.
    pub fn limits(&self) -> Limits {
        self.limits
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// Collect our followers and persist them as the `Followers` snapshot.
    pub async fn get_followers(&self, cancel: &CancellationToken) -> Result<UsersBatch, EngineError> {
        self.snapshot(DiffDirection::Followers, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Collect our followings and persist them as the `Followings` snapshot.
    pub async fn get_followings(&self, cancel: &CancellationToken) -> Result<UsersBatch, EngineError> {
        self.snapshot(DiffDirection::Followings, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Collect another account's followers. Not persisted.
    pub async fn get_user_followers(&self, name: &str, cancel: &CancellationToken) -> Result<Vec<User>, EngineError> {
        async {
            let target = self.resolve(name).await?;
            let label = format!("{} followers", target.username);
            self.collect(self.client.user_followers(&target).await, &label, cancel)
                .await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Collect another account's followings. Not persisted.
    pub async fn get_user_followings(&self, name: &str, cancel: &CancellationToken) -> Result<Vec<User>, EngineError> {
        async {
            let target = self.resolve(name).await?;
            let label = format!("{} followings", target.username);
            self.collect(self.client.user_followings(&target).await, &label, cancel)
                .await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Accounts we follow that do not follow back, persisted as
    /// `NotMutualFollowers`.
    pub async fn get_not_mutual_followers(&self, cancel: &CancellationToken) -> Result<UsersBatch, EngineError> {
        self.not_mutual(cancel).instrument(self.span.clone()).await
    }

    /// Followers lost and gained since the last `Followers` snapshot.
    pub async fn get_diff_followers(&self, cancel: &CancellationToken) -> Result<DiffPair, EngineError> {
        self.diff(DiffDirection::Followers, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Followings lost and gained since the last `Followings` snapshot.
    pub async fn get_diff_followings(&self, cancel: &CancellationToken) -> Result<DiffPair, EngineError> {
        self.diff(DiffDirection::Followings, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Stored follower diffs grouped by day.
    pub async fn get_history_diff_followers(&self, cancel: &CancellationToken) -> Result<DiffHistory, EngineError> {
        self.history(DiffDirection::Followers, cancel)
            .instrument(self.span.clone())
            .await
    }

    /// Stored following diffs grouped by day.
    pub async fn get_history_diff_followings(&self, cancel: &CancellationToken) -> Result<DiffHistory, EngineError> {
        self.history(DiffDirection::Followings, cancel)
            .instrument(self.span.clone())
            .await
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    /// Unfollow every non-mutual following that is not whitelisted.
    pub async fn unfollow_all_not_mutual_except_whitelisted(
        &self,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ActionReport, EngineError> {
        async {
            let targets = self.not_mutual(cancel).await?;
            Ok(self.execute(&targets.users, Mutation::Unfollow, cancel, progress).await)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Force-remove the named followers.
    pub async fn remove_followers_by_username<N: AsRef<str>>(
        &self,
        names: &[N],
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ActionReport, EngineError> {
        self.mutate_by_names(names, Mutation::Remove, cancel, progress)
            .instrument(self.span.clone())
            .await
    }

    /// Unfollow the named accounts.
    pub async fn unfollow_users<N: AsRef<str>>(
        &self,
        names: &[N],
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ActionReport, EngineError> {
        self.mutate_by_names(names, Mutation::Unfollow, cancel, progress)
            .instrument(self.span.clone())
            .await
    }

    /// Block the named accounts.
    pub async fn block_users<N: AsRef<str>>(
        &self,
        names: &[N],
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ActionReport, EngineError> {
        self.mutate_by_names(names, Mutation::Block, cancel, progress)
            .instrument(self.span.clone())
            .await
    }

    /// Follow the named accounts.
    pub async fn follow_users<N: AsRef<str>>(
        &self,
        names: &[N],
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ActionReport, EngineError> {
        self.mutate_by_names(names, Mutation::Follow, cancel, progress)
            .instrument(self.span.clone())
            .await
    }

    /// Classify current followers and persist the flagged ones as `Bots`,
    /// or `BusinessAccounts` when business profiles dominate.
    pub async fn business_accounts_or_bots_from_followers(
        &self,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<UsersBatch, EngineError> {
        async {
            let followers = self.fetch(DiffDirection::Followers, cancel).await?;
            let result = UselessClassifier::new(Arc::clone(&self.client), self.useless_threshold)
                .with_pacing(self.pacing)
                .classify(&followers, cancel, progress)
                .await;
            if result.cancelled {
                return Err(EngineError::Cancelled);
            }
            let batch = result.into_batch();
            self.persist(&batch, cancel).await?;
            Ok(batch)
        }
        .instrument(self.span.clone())
        .await
    }

    /// End the remote session.
    pub async fn logout(&self) -> Result<(), EngineError> {
        async {
            self.client
                .logout()
                .await
                .map_err(|e| EngineError::remote("logging out", e))?;
            tracing::info!("logged out");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    // ─── Internals ───────────────────────────────────────────────────────

    async fn resolve(&self, name: &str) -> Result<User, EngineError> {
        self.client
            .get_user_by_name(name)
            .await
            .map_err(|e| EngineError::remote(format!("resolving {name}"), e))
    }

    async fn collect(
        &self,
        source: Result<Box<dyn UserSource>, ClientError>,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<User>, EngineError> {
        let mut source = source.map_err(|e| EngineError::remote(format!("opening {label}"), e))?;
        let users = UserCollector::new(self.pacing)
            .collect(source.as_mut(), label, cancel)
            .await?;
        Ok(users)
    }

    async fn fetch(&self, direction: DiffDirection, cancel: &CancellationToken) -> Result<Vec<User>, EngineError> {
        let label = direction.to_string();
        match direction {
            DiffDirection::Followers => self.collect(self.client.followers().await, &label, cancel).await,
            DiffDirection::Followings => self.collect(self.client.followings().await, &label, cancel).await,
        }
    }

    async fn persist(&self, batch: &UsersBatch, cancel: &CancellationToken) -> Result<(), EngineError> {
        if self.incognito {
            tracing::debug!(batch_type = %batch.batch_type, "incognito, not persisting");
            return Ok(());
        }
        self.store.insert(batch, cancel).await?;
        tracing::info!(
            batch_type = %batch.batch_type,
            users = batch.len(),
            fingerprint = %batch.fingerprint(),
            "batch persisted"
        );
        Ok(())
    }

    async fn snapshot(&self, direction: DiffDirection, cancel: &CancellationToken) -> Result<UsersBatch, EngineError> {
        let users = self.fetch(direction, cancel).await?;
        let batch = UsersBatch::new(direction.snapshot_type(), users);
        self.persist(&batch, cancel).await?;
        Ok(batch)
    }

    async fn not_mutual(&self, cancel: &CancellationToken) -> Result<UsersBatch, EngineError> {
        let followers = self.fetch(DiffDirection::Followers, cancel).await?;
        let followings = self.fetch(DiffDirection::Followings, cancel).await?;
        let batch = not_mutual_batch(&followers, &followings);
        tracing::info!(
            followers = followers.len(),
            followings = followings.len(),
            not_mutual = batch.len(),
            "computed non-mutual followings"
        );
        self.persist(&batch, cancel).await?;
        Ok(batch)
    }

    async fn diff(&self, direction: DiffDirection, cancel: &CancellationToken) -> Result<DiffPair, EngineError> {
        let previous = self.store.latest_by_type(direction.snapshot_type()).await?;
        let current = UsersBatch::new(direction.snapshot_type(), self.fetch(direction, cancel).await?);

        let pair = match previous {
            None => {
                tracing::info!(%direction, "no previous snapshot, recording baseline");
                DiffPair {
                    lost: UsersBatch::empty(direction.lost_type()),
                    new: UsersBatch::empty(direction.new_type()),
                }
            }
            Some(previous) => {
                let pair = diff_batches(direction, &previous.users, &current.users);
                tracing::info!(
                    %direction,
                    previous = previous.len(),
                    current = current.len(),
                    lost = pair.lost.len(),
                    new = pair.new.len(),
                    "computed diff"
                );
                self.persist(&pair.lost, cancel).await?;
                self.persist(&pair.new, cancel).await?;
                pair
            }
        };

        self.persist(&current, cancel).await?;
        Ok(pair)
    }

    async fn history(&self, direction: DiffDirection, cancel: &CancellationToken) -> Result<DiffHistory, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !self.store.keeps_history() {
            tracing::debug!(%direction, "store keeps only the latest batch per type");
        }
        let lost = self.store.all_by_type(direction.lost_type()).await?;
        let new = self.store.all_by_type(direction.new_type()).await?;
        let history = DiffHistory::from_batches(direction, lost.into_iter().chain(new))?;
        tracing::info!(%direction, days = history.len(), "loaded diff history");
        Ok(history)
    }

    async fn execute(
        &self,
        users: &[User],
        mutation: Mutation,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> ActionReport {
        let mut budget = ActionBudget::new(mutation.cap(&self.limits));
        MutationExecutor::new(Arc::clone(&self.client), self.whitelist.clone())
            .with_debug(self.debug)
            .with_pacing(self.pacing)
            .run(users, mutation, &mut budget, cancel, progress)
            .await
    }

    async fn mutate_by_names<N: AsRef<str>>(
        &self,
        names: &[N],
        mutation: Mutation,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<ActionReport, EngineError> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref();
            if cancel.is_cancelled() {
                return Ok(ActionReport {
                    outcome: Outcome::Cancelled,
                    ..ActionReport::new(mutation)
                });
            }
            match self.client.get_user_by_name(name).await {
                Ok(user) => {
                    if seen.insert(user.id) {
                        targets.push(user);
                    }
                }
                Err(ClientError::UserNotFound(_)) => {
                    tracing::warn!(username = name, %mutation, "unknown username, skipping");
                }
                Err(e) => return Err(EngineError::remote(format!("resolving {name}"), e)),
            }
        }

        Ok(self.execute(&targets, mutation, cancel, progress).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FixtureClient;
    use crate::progress::NoOpProgress;
    use crate::store::InMemorySnapshotStore;
    use crate::types::BatchType;

    fn users(ids: &[i64]) -> Vec<User> {
        ids.iter().map(|&i| User::new(i, format!("user{i}"), "")).collect()
    }

    fn ids(users: &[User]) -> Vec<i64> {
        users.iter().map(|u| u.id.get()).collect()
    }

    fn service(client: FixtureClient) -> GraphService<FixtureClient, InMemorySnapshotStore> {
        GraphService::new(Arc::new(client), Arc::new(InMemorySnapshotStore::new()))
    }

    #[tokio::test]
    async fn test_get_followers_persists_snapshot() {
        let svc = service(FixtureClient::new("me").with_followers(&users(&[1, 2, 3])));
        let batch = svc.get_followers(&CancellationToken::new()).await.unwrap();
        assert_eq!(batch.batch_type, BatchType::Followers);
        assert_eq!(ids(&batch.users), vec![1, 2, 3]);

        let stored = svc.store().latest_by_type(BatchType::Followers).await.unwrap();
        assert_eq!(stored, Some(batch));
    }

    #[tokio::test]
    async fn test_incognito_writes_nothing() {
        let svc = service(FixtureClient::new("me").with_followers(&users(&[1]))).with_incognito(true);
        svc.get_followers(&CancellationToken::new()).await.unwrap();
        svc.get_diff_followers(&CancellationToken::new()).await.unwrap();
        assert!(svc.store().is_empty());
    }

    #[tokio::test]
    async fn test_not_mutual_persisted() {
        let svc = service(
            FixtureClient::new("me")
                .with_followers(&users(&[1, 2]))
                .with_followings(&users(&[2, 3, 4])),
        );
        let batch = svc.get_not_mutual_followers(&CancellationToken::new()).await.unwrap();
        assert_eq!(ids(&batch.users), vec![3, 4]);
        assert!(svc
            .store()
            .latest_by_type(BatchType::NotMutualFollowers)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unknown_target_account_is_user_not_found() {
        let svc = service(FixtureClient::new("me"));
        let err = svc
            .get_user_followers("nobody", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_names_are_skipped() {
        let svc = service(FixtureClient::new("me").with_followers(&users(&[1, 2])))
            .with_limits(Limits::new(0, 10));
        let report = svc
            .remove_followers_by_username(&["user1", "ghost", "USER1"], &CancellationToken::new(), &NoOpProgress)
            .await
            .unwrap();
        assert_eq!(report.performed, 1);
        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(svc.client().current_followers().len(), 1);
    }

    #[tokio::test]
    async fn test_all_names_unknown_is_no_users() {
        let svc = service(FixtureClient::new("me")).with_limits(Limits::new(0, 10));
        let report = svc
            .unfollow_users(&["ghost"], &CancellationToken::new(), &NoOpProgress)
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::NoUsers);
    }

    #[tokio::test]
    async fn test_logout_delegates() {
        let svc = service(FixtureClient::new("me"));
        svc.logout().await.unwrap();
        assert!(svc.client().is_logged_out());
    }
}
