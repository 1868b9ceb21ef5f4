//! Core types for the graph kernel.

pub mod user;
pub mod batch;
pub mod profile;

pub use user::{User, UserId, UserRecord, normalize_username, is_valid_username};
pub use batch::{BatchType, UsersBatch, DiffDirection, DiffPair, DiffHistory, HistoryError};
pub use profile::{ProfileSignals, UselessReason, DEFAULT_USELESS_THRESHOLD};
