//! # social-graph-kernel
//!
//! Diff and mutation engine for an account's social graph.
//!
//! The kernel answers two questions:
//!
//! > Who changed in my followers/followings since the last snapshot?
//! > Which of them should I act on, and how many am I allowed to?
//!
//! ## Core Contract
//!
//! 1. Drain paginated follower/following lists into deduplicated, ordered batches
//! 2. Diff them against the last persisted snapshot (lost, new, non-mutual)
//! 3. Apply bounded, whitelist-respecting mutations and report partial progress
//!
//! ## Architecture
//!
//! ```text
//! RemoteClient → UserCollector → DiffAlgebra → MutationExecutor → ActionReport
//!                      ↓               ↑              ↑
//!               SnapshotStore (Memory or Postgres)  ActionBudget + Whitelist
//! ```
//!
//! ## Guarantees
//!
//! - User identity is the numeric id; usernames are descriptive only
//! - Collector and diff output preserve source order
//! - `performed` never exceeds the cap and never counts skipped or dry-run users
//! - Every long-running loop honors a `CancellationToken` between remote calls

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod canonical;
pub mod client;
pub mod collector;
pub mod diff;
pub mod store;
pub mod classifier;
pub mod budget;
pub mod executor;
pub mod progress;
pub mod config;
pub mod error;
pub mod service;

mod pacing;

// Re-exports
pub use types::{
    BatchType, DiffDirection, DiffHistory, DiffPair, HistoryError, ProfileSignals, UselessReason,
    User, UserId, UserRecord, UsersBatch, DEFAULT_USELESS_THRESHOLD,
};
pub use canonical::{canonical_hash, canonical_hash_hex, to_canonical_bytes};
pub use client::{AccountFixture, ClientError, FixtureClient, RecordedCall, RemoteClient, UserSource};
pub use collector::{CollectError, UserCollector};
pub use diff::{diff_batches, lost, new_members, not_mutual, not_mutual_batch};
pub use store::{InMemorySnapshotStore, SnapshotStore, StoreError};
#[cfg(feature = "postgres")]
pub use store::{DocumentStoreConfig, PostgresSnapshotStore};
pub use classifier::{Classification, UselessClassifier};
pub use budget::{ActionBudget, Charge, Limits};
pub use executor::{Mutation, MutationExecutor};
pub use progress::{ChannelProgress, NoOpProgress, ProgressEvent, ProgressSink, RecordingProgress};
pub use config::{ConfigError, EngineConfig, StorageConfig, StorageKind, Whitelist};
pub use error::{ActionReport, EngineError, Outcome};
pub use service::GraphService;

// Cancellation is part of every operation's signature.
pub use tokio_util::sync::CancellationToken;
