//! Narrow capability traits for the three backing stores.
//!
//! Handlers and the voting engine only see these traits, so the Postgres and Redis
//! implementations can be swapped for [`crate::memory::MemoryStore`] in tests.

use agora_common::model::{
    Id, ModelValidationError,
    auth::{PasswordHashError, SessionId},
    comment::CommentMarker,
    post::{CreatePost, Post, PostMarker},
    user::{CreateUser, User, UserCredentials, UserMarker, Username},
};
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("A stored timestamp was out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

/// Change applied to a post inside a transaction.
///
/// Implementations may call it more than once when a transaction is retried, each
/// time on a freshly read copy of the post.
pub type PostMutation<'a> = &'a (dyn Fn(&mut Post) + Send + Sync);

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn fetch_posts(&self) -> Result<Vec<Post>>;

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>>;

    /// Counts a view and returns the post as it is afterwards.
    async fn view_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>>;

    async fn fetch_category_posts(&self, category: &str) -> Result<Vec<Post>>;

    async fn fetch_user_posts(&self, username: &str) -> Result<Vec<Post>>;

    async fn create_post(&self, post: CreatePost, author: &User) -> Result<Post>;

    /// Replaces the stored document with the same id. Returns `false` if there was none.
    async fn update_post(&self, post: &Post) -> Result<bool>;

    async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool>;

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        author: &User,
        body: String,
    ) -> Result<Option<Post>>;

    /// Removing a comment id the post does not have leaves the post untouched.
    async fn delete_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
    ) -> Result<Option<Post>>;

    /// Reads the post, applies `mutation` and writes the whole document back atomically.
    ///
    /// Returns `None` without writing anything if the post does not exist. On error
    /// the stored post is left unchanged.
    async fn with_post_transaction(
        &self,
        post_id: Id<PostMarker>,
        mutation: PostMutation<'_>,
    ) -> Result<Option<Post>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_exists(&self, username: &Username) -> Result<bool>;

    /// Inserts without checking for an existing username; callers check first.
    async fn create_user(&self, user: &CreateUser) -> Result<User>;

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;

    async fn fetch_credentials(&self, username: &Username) -> Result<Option<UserCredentials>>;

    /// Returns the user if `password` matches the stored hash.
    async fn authenticate(&self, username: &Username, password: &str) -> Result<Option<User>> {
        let Some(credentials) = self.fetch_credentials(username).await? else {
            return Ok(None);
        };

        if credentials.password_hash.verify(password)? {
            Ok(Some(credentials.user))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates or overwrites the expiry of one session.
    async fn store_session(
        &self,
        user_id: Id<UserMarker>,
        session_id: &SessionId,
        expires_at: OffsetDateTime,
    ) -> Result<()>;

    async fn fetch_session_expiry(
        &self,
        user_id: Id<UserMarker>,
        session_id: &SessionId,
    ) -> Result<Option<OffsetDateTime>>;

    async fn fetch_user_sessions(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Vec<(SessionId, OffsetDateTime)>>;

    async fn delete_session(&self, user_id: Id<UserMarker>, session_id: &SessionId) -> Result<()>;
}
