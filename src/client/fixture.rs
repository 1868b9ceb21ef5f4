//! In-process account graph implementing [`RemoteClient`].
//!
//! Backs the test suite and lets the binary run against an exported account
//! dump. Mutations update the fixture state, every mutation call is recorded,
//! and failures can be injected per user, per profile or per page.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ClientError, RemoteClient, UserSource};
use crate::types::{normalize_username, ProfileSignals, User, UserId, UserRecord};

fn default_page_size() -> usize {
    50
}

/// Followers/followings of an account other than ours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountLists {
    /// Accounts following this account.
    #[serde(default)]
    pub followers: Vec<UserRecord>,
    /// Accounts this account follows.
    #[serde(default)]
    pub followings: Vec<UserRecord>,
}

/// Serialized form of a fixture (JSON account export).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountFixture {
    /// Our handle.
    pub username: String,
    /// Records per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Repeat the last record of each page at the head of the next one,
    /// the way the real paginator sometimes does.
    #[serde(default)]
    pub repeat_page_boundary: bool,
    /// Accounts following us.
    #[serde(default)]
    pub followers: Vec<UserRecord>,
    /// Accounts we follow.
    #[serde(default)]
    pub followings: Vec<UserRecord>,
    /// Other resolvable accounts (e.g. targets of follow/block).
    #[serde(default)]
    pub directory: Vec<UserRecord>,
    /// Lists of other accounts, by handle.
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountLists>,
    /// Classifier signals, by handle. Missing profiles count as engaged.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSignals>,
}

/// A mutation call issued against the fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedCall {
    /// Client method name.
    pub action: &'static str,
    /// Target.
    pub user_id: UserId,
}

#[derive(Debug, Default)]
struct FixtureState {
    followers: Vec<UserRecord>,
    followings: Vec<UserRecord>,
    directory: Vec<UserRecord>,
    accounts: BTreeMap<String, AccountLists>,
    profiles: BTreeMap<String, ProfileSignals>,
    blocked: BTreeSet<UserId>,
    follower_pages: Option<Vec<Vec<UserRecord>>>,
    following_pages: Option<Vec<Vec<UserRecord>>>,
    page_failure: Option<(usize, ClientError)>,
    mutation_failures: HashMap<UserId, ClientError>,
    profile_failures: HashSet<String>,
    calls: Vec<RecordedCall>,
    logged_out: bool,
}

/// Fixture-backed remote client.
#[derive(Debug)]
pub struct FixtureClient {
    username: String,
    page_size: usize,
    repeat_page_boundary: bool,
    page_requests: Arc<AtomicUsize>,
    state: Mutex<FixtureState>,
}

impl FixtureClient {
    /// Create an empty account.
    pub fn new(username: impl Into<String>) -> Self {
        Self::from_fixture(AccountFixture {
            username: username.into(),
            page_size: default_page_size(),
            ..AccountFixture::default()
        })
    }

    /// Build from a deserialized fixture.
    pub fn from_fixture(fixture: AccountFixture) -> Self {
        Self {
            username: fixture.username,
            page_size: fixture.page_size.max(1),
            repeat_page_boundary: fixture.repeat_page_boundary,
            page_requests: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(FixtureState {
                followers: fixture.followers,
                followings: fixture.followings,
                directory: fixture.directory,
                accounts: fixture.accounts,
                profiles: fixture
                    .profiles
                    .into_iter()
                    .map(|(name, signals)| (normalize_username(&name), signals))
                    .collect(),
                ..FixtureState::default()
            }),
        }
    }

    /// Load a JSON account export.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Request(format!("reading {}: {e}", path.display())))?;
        let fixture: AccountFixture = serde_json::from_str(&content)
            .map_err(|e| ClientError::Request(format!("parsing {}: {e}", path.display())))?;
        Ok(Self::from_fixture(fixture))
    }

    /// Records per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Set our followers.
    pub fn with_followers(self, users: &[User]) -> Self {
        self.state.lock().followers = users.iter().map(UserRecord::from).collect();
        self
    }

    /// Set our followings.
    pub fn with_followings(self, users: &[User]) -> Self {
        self.state.lock().followings = users.iter().map(UserRecord::from).collect();
        self
    }

    /// Make a user resolvable by name without being in either list.
    pub fn with_directory_user(self, user: &User) -> Self {
        self.state.lock().directory.push(UserRecord::from(user));
        self
    }

    /// Serve followers as exactly these pages (duplicates included).
    pub fn with_follower_pages(self, pages: Vec<Vec<User>>) -> Self {
        self.state.lock().follower_pages = Some(to_record_pages(pages));
        self
    }

    /// Serve followings as exactly these pages (duplicates included).
    pub fn with_following_pages(self, pages: Vec<Vec<User>>) -> Self {
        self.state.lock().following_pages = Some(to_record_pages(pages));
        self
    }

    /// Set classifier signals for a handle.
    pub fn with_profile(self, username: &str, signals: ProfileSignals) -> Self {
        self.state
            .lock()
            .profiles
            .insert(normalize_username(username), signals);
        self
    }

    /// Set another account's lists.
    pub fn with_account(self, username: &str, lists: AccountLists) -> Self {
        self.state
            .lock()
            .accounts
            .insert(normalize_username(username), lists);
        self
    }

    /// Fail the page request with this zero-based index, on every source.
    pub fn fail_page(&self, index: usize, error: ClientError) {
        self.state.lock().page_failure = Some((index, error));
    }

    /// Fail every mutation against `user_id`.
    pub fn fail_mutation(&self, user_id: UserId, error: ClientError) {
        self.state.lock().mutation_failures.insert(user_id, error);
    }

    /// Fail profile lookups for a handle.
    pub fn fail_profile(&self, username: &str) {
        self.state.lock().profile_failures.insert(normalize_username(username));
    }

    /// Mutation calls issued so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Number of mutation calls issued so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of pages served so far.
    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// Whether `logout` was called.
    pub fn is_logged_out(&self) -> bool {
        self.state.lock().logged_out
    }

    /// Current followers.
    pub fn current_followers(&self) -> Vec<UserRecord> {
        self.state.lock().followers.clone()
    }

    /// Current followings.
    pub fn current_followings(&self) -> Vec<UserRecord> {
        self.state.lock().followings.clone()
    }

    /// Ids currently blocked.
    pub fn blocked(&self) -> Vec<UserId> {
        self.state.lock().blocked.iter().copied().collect()
    }

    fn paginate(&self, records: &[UserRecord]) -> Vec<Vec<UserRecord>> {
        let mut pages: Vec<Vec<UserRecord>> = Vec::new();
        for chunk in records.chunks(self.page_size) {
            let mut page = Vec::with_capacity(chunk.len() + 1);
            if self.repeat_page_boundary {
                if let Some(last) = pages.last().and_then(|p| p.last()) {
                    page.push(last.clone());
                }
            }
            page.extend_from_slice(chunk);
            pages.push(page);
        }
        pages
    }

    fn source(&self, pages: Vec<Vec<UserRecord>>) -> Box<dyn UserSource> {
        let failure = self.state.lock().page_failure.clone();
        Box::new(FixtureSource {
            pages: pages.into(),
            served: 0,
            failure,
            page_requests: Arc::clone(&self.page_requests),
        })
    }

    fn mutate(&self, action: &'static str, user: &User) -> Result<(), ClientError> {
        let mut state = self.state.lock();
        if state.logged_out {
            return Err(ClientError::LoginRequired("session closed".to_string()));
        }
        state.calls.push(RecordedCall {
            action,
            user_id: user.id,
        });
        if let Some(err) = state.mutation_failures.get(&user.id) {
            return Err(err.clone());
        }
        let id = user.id.get();
        match action {
            "follow" => {
                if !state.followings.iter().any(|r| r.pk == id) {
                    state.followings.push(UserRecord::from(user));
                }
            }
            "unfollow" => state.followings.retain(|r| r.pk != id),
            "remove_follower" => state.followers.retain(|r| r.pk != id),
            "block" => {
                state.followers.retain(|r| r.pk != id);
                state.followings.retain(|r| r.pk != id);
                state.blocked.insert(user.id);
            }
            "unblock" => {
                state.blocked.remove(&user.id);
            }
            _ => {}
        }
        Ok(())
    }

    fn find_record(&self, name: &str) -> Option<UserRecord> {
        let wanted = normalize_username(name);
        let state = self.state.lock();
        state
            .followers
            .iter()
            .chain(state.followings.iter())
            .chain(state.directory.iter())
            .chain(
                state
                    .accounts
                    .values()
                    .flat_map(|a| a.followers.iter().chain(a.followings.iter())),
            )
            .find(|r| normalize_username(&r.username) == wanted)
            .cloned()
    }
}

fn to_record_pages(pages: Vec<Vec<User>>) -> Vec<Vec<UserRecord>> {
    pages
        .into_iter()
        .map(|page| page.iter().map(UserRecord::from).collect())
        .collect()
}

struct FixtureSource {
    pages: VecDeque<Vec<UserRecord>>,
    served: usize,
    failure: Option<(usize, ClientError)>,
    page_requests: Arc<AtomicUsize>,
}

#[async_trait]
impl UserSource for FixtureSource {
    async fn next_page(&mut self) -> Result<Option<Vec<UserRecord>>, ClientError> {
        if let Some((index, err)) = &self.failure {
            if *index == self.served {
                return Err(err.clone());
            }
        }
        let page = self.pages.pop_front();
        if page.is_some() {
            self.served += 1;
            self.page_requests.fetch_add(1, Ordering::SeqCst);
        }
        Ok(page)
    }
}

#[async_trait]
impl RemoteClient for FixtureClient {
    fn username(&self) -> String {
        self.username.clone()
    }

    async fn get_user_by_name(&self, name: &str) -> Result<User, ClientError> {
        self.find_record(name)
            .and_then(|r| r.to_user())
            .ok_or_else(|| ClientError::UserNotFound(name.to_string()))
    }

    async fn followers(&self) -> Result<Box<dyn UserSource>, ClientError> {
        let pages = {
            let state = self.state.lock();
            state.follower_pages.clone().unwrap_or_else(|| self.paginate(&state.followers))
        };
        Ok(self.source(pages))
    }

    async fn followings(&self) -> Result<Box<dyn UserSource>, ClientError> {
        let pages = {
            let state = self.state.lock();
            state.following_pages.clone().unwrap_or_else(|| self.paginate(&state.followings))
        };
        Ok(self.source(pages))
    }

    async fn user_followers(&self, user: &User) -> Result<Box<dyn UserSource>, ClientError> {
        let records = self
            .state
            .lock()
            .accounts
            .get(&normalize_username(&user.username))
            .map(|a| a.followers.clone())
            .ok_or_else(|| ClientError::UserNotFound(user.username.clone()))?;
        Ok(self.source(self.paginate(&records)))
    }

    async fn user_followings(&self, user: &User) -> Result<Box<dyn UserSource>, ClientError> {
        let records = self
            .state
            .lock()
            .accounts
            .get(&normalize_username(&user.username))
            .map(|a| a.followings.clone())
            .ok_or_else(|| ClientError::UserNotFound(user.username.clone()))?;
        Ok(self.source(self.paginate(&records)))
    }

    async fn follow(&self, user: &User) -> Result<(), ClientError> {
        self.mutate("follow", user)
    }

    async fn unfollow(&self, user: &User) -> Result<(), ClientError> {
        self.mutate("unfollow", user)
    }

    async fn remove_follower(&self, user: &User) -> Result<(), ClientError> {
        self.mutate("remove_follower", user)
    }

    async fn block(&self, user: &User) -> Result<(), ClientError> {
        self.mutate("block", user)
    }

    async fn unblock(&self, user: &User) -> Result<(), ClientError> {
        self.mutate("unblock", user)
    }

    async fn profile_signals(&self, user: &User) -> Result<ProfileSignals, ClientError> {
        let key = normalize_username(&user.username);
        let state = self.state.lock();
        if state.profile_failures.contains(&key) {
            return Err(ClientError::Request(format!("profile lookup failed for {}", user.username)));
        }
        Ok(state.profiles.get(&key).cloned().unwrap_or(ProfileSignals {
            followings_count: 0,
            is_fraud: false,
            is_business: false,
            media_count: 1,
        }))
    }

    async fn logout(&self) -> Result<(), ClientError> {
        self.state.lock().logged_out = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users(ids: &[i64]) -> Vec<User> {
        ids.iter().map(|&i| User::new(i, format!("user{i}"), "")).collect()
    }

    async fn drain(mut source: Box<dyn UserSource>) -> Vec<Vec<i64>> {
        let mut pages = Vec::new();
        while let Some(page) = source.next_page().await.unwrap() {
            pages.push(page.iter().map(|r| r.pk).collect());
        }
        pages
    }

    #[tokio::test]
    async fn test_pagination_chunks_by_page_size() {
        let client = FixtureClient::new("me")
            .with_page_size(2)
            .with_followers(&users(&[1, 2, 3, 4, 5]));

        let pages = drain(client.followers().await.unwrap()).await;
        assert_eq!(pages, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(client.page_requests(), 3);
    }

    #[tokio::test]
    async fn test_repeat_page_boundary() {
        let client = FixtureClient::from_fixture(AccountFixture {
            username: "me".into(),
            page_size: 2,
            repeat_page_boundary: true,
            followers: users(&[1, 2, 3]).iter().map(UserRecord::from).collect(),
            ..AccountFixture::default()
        });

        let pages = drain(client.followers().await.unwrap()).await;
        assert_eq!(pages, vec![vec![1, 2], vec![2, 3]]);
    }

    #[tokio::test]
    async fn test_mutations_update_state_and_are_recorded() {
        let client = FixtureClient::new("me")
            .with_followers(&users(&[1, 2]))
            .with_followings(&users(&[2, 3]));

        client.unfollow(&User::new(3, "user3", "")).await.unwrap();
        client.remove_follower(&User::new(1, "user1", "")).await.unwrap();
        client.block(&User::new(2, "user2", "")).await.unwrap();

        assert!(client.current_followers().is_empty());
        assert!(client.current_followings().is_empty());
        assert_eq!(client.blocked(), vec![UserId::new(2)]);
        let actions: Vec<_> = client.calls().iter().map(|c| c.action).collect();
        assert_eq!(actions, vec!["unfollow", "remove_follower", "block"]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = FixtureClient::new("me").with_followers(&users(&[1, 2]));
        client.fail_mutation(UserId::new(1), ClientError::Request("boom".into()));
        client.fail_page(0, ClientError::RateLimited("429".into()));

        assert!(client.unfollow(&User::new(1, "user1", "")).await.is_err());
        let mut source = client.followers().await.unwrap();
        assert_eq!(source.next_page().await, Err(ClientError::RateLimited("429".into())));
    }

    #[tokio::test]
    async fn test_lookup_and_logout() {
        let client = FixtureClient::new("me").with_directory_user(&User::new(9, "Celebrity", ""));

        let user = client.get_user_by_name("@celebrity").await.unwrap();
        assert_eq!(user.id, UserId::new(9));
        assert!(matches!(
            client.get_user_by_name("ghost").await,
            Err(ClientError::UserNotFound(_))
        ));

        client.logout().await.unwrap();
        assert!(client.is_logged_out());
        assert!(matches!(client.follow(&user).await, Err(ClientError::LoginRequired(_))));
    }

    #[test]
    fn test_fixture_json_defaults() {
        let fixture: AccountFixture = serde_json::from_str(
            r#"{"username":"me","followers":[{"pk":1,"username":"a"}]}"#,
        )
        .unwrap();
        assert_eq!(fixture.page_size, 50);
        assert_eq!(fixture.followers[0].full_name, "");
        assert!(fixture.followings.is_empty());
    }
}
