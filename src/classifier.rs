//! Heuristic detection of low-value followers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::RemoteClient;
use crate::pacing::pause;
use crate::progress::ProgressSink;
use crate::types::{BatchType, ProfileSignals, UselessReason, User, UsersBatch};

/// Result of a classification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Flagged users, in input order.
    pub flagged: Vec<User>,
    /// Flagged users with the business flag set.
    pub business: usize,
    /// Users skipped because their profile could not be resolved.
    pub unresolved: usize,
    /// Users visited before the pass ended.
    pub visited: usize,
    /// The pass stopped early on cancellation.
    pub cancelled: bool,
}

impl Classification {
    /// `BusinessAccounts` when business profiles are the majority of the
    /// flagged set, `Bots` otherwise.
    pub fn batch_type(&self) -> BatchType {
        if self.business * 2 > self.flagged.len() {
            BatchType::BusinessAccounts
        } else {
            BatchType::Bots
        }
    }

    /// Package the flagged users.
    pub fn into_batch(self) -> UsersBatch {
        UsersBatch::new(self.batch_type(), self.flagged)
    }
}

/// Flags accounts by followings count, fraud flag, business flag and
/// media count.
pub struct UselessClassifier<C: RemoteClient + ?Sized> {
    client: Arc<C>,
    threshold: u64,
    pacing: Duration,
}

impl<C: RemoteClient + ?Sized> UselessClassifier<C> {
    /// Create a classifier with the given followings threshold.
    pub fn new(client: Arc<C>, threshold: u64) -> Self {
        Self {
            client,
            threshold,
            pacing: Duration::ZERO,
        }
    }

    /// Pause between profile lookups.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    /// Classify `users` one by one, ticking `progress` for each.
    pub async fn classify(
        &self,
        users: &[User],
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Classification {
        let mut result = Classification::default();
        progress.start(users.len());

        for user in users {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            result.visited += 1;

            match self.client.profile_signals(user).await {
                Ok(signals) => self.record(&mut result, user, &signals),
                Err(e) => {
                    tracing::warn!(username = %user.username, error = %e, "profile unresolved, skipping");
                    result.unresolved += 1;
                }
            }
            progress.tick();
            pause(self.pacing, cancel).await;
        }

        progress.finish();
        tracing::info!(
            visited = result.visited,
            flagged = result.flagged.len(),
            business = result.business,
            unresolved = result.unresolved,
            cancelled = result.cancelled,
            "classification finished"
        );
        result
    }

    fn record(&self, result: &mut Classification, user: &User, signals: &ProfileSignals) {
        let reasons = signals.reasons(self.threshold);
        if reasons.is_empty() {
            return;
        }
        tracing::debug!(username = %user.username, ?reasons, "flagged");
        if reasons.contains(&UselessReason::Business) {
            result.business += 1;
        }
        result.flagged.push(user.clone());
    }
}
