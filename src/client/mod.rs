//! Remote client capability set.
//!
//! The transport (login, session files, challenges) lives behind this trait;
//! the engine only ever receives a ready-to-use client.

pub mod fixture;

use async_trait::async_trait;

use crate::types::{ProfileSignals, User, UserRecord};

pub use fixture::{AccountFixture, FixtureClient, RecordedCall};

/// Errors reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No account with that handle.
    #[error("user not found: {0}")]
    UserNotFound(String),
    /// Terminal pagination sentinel.
    #[error("no more pages")]
    NoMore,
    /// Stream closed by the remote side before a `NoMore`.
    #[error("end of stream")]
    EndOfStream,
    /// Session is no longer authenticated.
    #[error("login required: {0}")]
    LoginRequired(String),
    /// The network wants an interactive challenge solved.
    #[error("challenge required: {0}")]
    ChallengeRequired(String),
    /// Account-wide throttling.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Any other request failure, scoped to a single call.
    #[error("request failed: {0}")]
    Request(String),
}

impl ClientError {
    /// Benign end-of-pagination signals.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::NoMore | Self::EndOfStream)
    }

    /// Errors after which the session cannot be trusted for further calls.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoginRequired(_) | Self::ChallengeRequired(_) | Self::RateLimited(_)
        )
    }
}

/// A paginated cursor over user records.
///
/// `Ok(None)` and `Err(ClientError::NoMore)` both signal exhaustion.
#[async_trait]
pub trait UserSource: Send {
    /// Fetch the next page of records.
    async fn next_page(&mut self) -> Result<Option<Vec<UserRecord>>, ClientError>;
}

/// Remote account operations consumed by the engine.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Handle of the authenticated account.
    fn username(&self) -> String;

    /// Resolve a handle to a user.
    async fn get_user_by_name(&self, name: &str) -> Result<User, ClientError>;

    /// Accounts following us.
    async fn followers(&self) -> Result<Box<dyn UserSource>, ClientError>;

    /// Accounts we follow.
    async fn followings(&self) -> Result<Box<dyn UserSource>, ClientError>;

    /// Accounts following `user`.
    async fn user_followers(&self, user: &User) -> Result<Box<dyn UserSource>, ClientError>;

    /// Accounts `user` follows.
    async fn user_followings(&self, user: &User) -> Result<Box<dyn UserSource>, ClientError>;

    /// Follow `user`.
    async fn follow(&self, user: &User) -> Result<(), ClientError>;

    /// Stop following `user`.
    async fn unfollow(&self, user: &User) -> Result<(), ClientError>;

    /// Force `user` to stop following us.
    async fn remove_follower(&self, user: &User) -> Result<(), ClientError>;

    /// Block `user`.
    async fn block(&self, user: &User) -> Result<(), ClientError>;

    /// Unblock `user`.
    async fn unblock(&self, user: &User) -> Result<(), ClientError>;

    /// Fetch the classifier signals for `user`. May issue several requests.
    async fn profile_signals(&self, user: &User) -> Result<ProfileSignals, ClientError>;

    /// Whether `user` looks like a low-value account.
    async fn is_useless(&self, user: &User, threshold: u64) -> Result<bool, ClientError> {
        Ok(self.profile_signals(user).await?.is_useless(threshold))
    }

    /// End the session.
    async fn logout(&self) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ClientError::NoMore.is_end_of_stream());
        assert!(ClientError::EndOfStream.is_end_of_stream());
        assert!(!ClientError::Request("x".into()).is_end_of_stream());

        assert!(ClientError::RateLimited("429".into()).is_session_fatal());
        assert!(ClientError::LoginRequired("expired".into()).is_session_fatal());
        assert!(ClientError::ChallengeRequired("sms".into()).is_session_fatal());
        assert!(!ClientError::Request("500".into()).is_session_fatal());
        assert!(!ClientError::UserNotFound("ghost".into()).is_session_fatal());
    }
}
