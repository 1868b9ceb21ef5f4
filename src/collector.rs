//! Drains a paginated user source into a deduplicated, ordered list.
//!
//! The upstream paginator repeats users near page boundaries, and every set
//! operation downstream assumes ids are unique, so dedup is global across
//! pages and keeps the first occurrence.

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, UserSource};
use crate::pacing::pause;
use crate::types::{User, UserId};

/// Error type for collection.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Cancelled between pages. Carries everything collected so far.
    #[error("collection cancelled after {} users", partial.len())]
    Cancelled {
        /// Users collected before cancellation, in order.
        partial: Vec<User>,
    },
    /// The source failed. Partial results are discarded.
    #[error("{context}: {source}")]
    Source {
        /// What was being collected.
        context: String,
        /// Underlying error.
        #[source]
        source: ClientError,
    },
}

/// Collects users from a [`UserSource`].
#[derive(Debug, Clone, Default)]
pub struct UserCollector {
    pacing: Duration,
}

impl UserCollector {
    /// Create a collector that pauses `pacing` between pages.
    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    /// Drain `source` page by page.
    ///
    /// `label` names the list in logs and error context.
    pub async fn collect(
        &self,
        source: &mut dyn UserSource,
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<User>, CollectError> {
        let mut seen: HashSet<UserId> = HashSet::new();
        let mut users: Vec<User> = Vec::new();
        let mut pages = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(list = label, collected = users.len(), "collection cancelled");
                return Err(CollectError::Cancelled { partial: users });
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => continue,
                page = source.next_page() => page,
            };

            let records = match page {
                Ok(Some(records)) => records,
                Ok(None) => break,
                Err(e) if e.is_end_of_stream() => break,
                Err(e) => {
                    return Err(CollectError::Source {
                        context: format!("fetching {label} page {}", pages + 1),
                        source: e,
                    })
                }
            };
            pages += 1;

            let before = users.len();
            for record in records {
                if seen.contains(&UserId::new(record.pk)) {
                    continue;
                }
                match record.to_user() {
                    Some(user) => {
                        seen.insert(user.id);
                        users.push(user);
                    }
                    None => tracing::warn!(list = label, user_id = record.pk, "skipping record without username"),
                }
            }
            tracing::debug!(
                list = label,
                page = pages,
                added = users.len() - before,
                total = users.len(),
                "page collected"
            );

            pause(self.pacing, cancel).await;
        }

        tracing::debug!(list = label, pages, total = users.len(), "collection finished");
        Ok(users)
    }
}
