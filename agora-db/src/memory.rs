//! In-memory implementation of every store trait.
//!
//! State lives behind one mutex per collection; each operation holds the lock for
//! its whole read-modify-write, which makes post transactions atomic within the
//! process. Nothing is persisted.

use crate::store::{PostMutation, PostStore, Result, SessionStore, UserStore};
use agora_common::{
    model::{
        Id,
        auth::SessionId,
        comment::{Comment, CommentMarker},
        post::{CreatePost, Post, PostMarker},
        user::{CreateUser, User, UserCredentials, UserMarker, Username},
    },
    util::now_utc,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use time::OffsetDateTime;

#[derive(Debug, Default)]
pub struct MemoryStore {
    posts: Mutex<Vec<Post>>,
    users: Mutex<Vec<UserCredentials>>,
    sessions: Mutex<HashMap<Id<UserMarker>, HashMap<SessionId, OffsetDateTime>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    #[must_use]
    pub fn user_count(&self) -> usize {
        lock(&self.users).len()
    }

    fn modify_post<T>(
        &self,
        post_id: Id<PostMarker>,
        modify: impl FnOnce(&mut Post) -> T,
    ) -> Option<(T, Post)> {
        let mut posts = lock(&self.posts);
        let post = posts.iter_mut().find(|post| post.id == post_id)?;
        let output = modify(post);
        Some((output, post.clone()))
    }

    fn filter_posts(&self, predicate: impl Fn(&Post) -> bool) -> Vec<Post> {
        lock(&self.posts)
            .iter()
            .filter(|post| predicate(post))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn fetch_posts(&self) -> Result<Vec<Post>> {
        Ok(lock(&self.posts).clone())
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        Ok(self.modify_post(post_id, |_| ()).map(|((), post)| post))
    }

    async fn view_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let viewed = self.modify_post(post_id, |post| post.views += 1);
        Ok(viewed.map(|((), post)| post))
    }

    async fn fetch_category_posts(&self, category: &str) -> Result<Vec<Post>> {
        Ok(self.filter_posts(|post| post.category == category))
    }

    async fn fetch_user_posts(&self, username: &str) -> Result<Vec<Post>> {
        Ok(self.filter_posts(|post| post.author.username.get() == username))
    }

    async fn create_post(&self, post: CreatePost, author: &User) -> Result<Post> {
        let post = Post::new(Id::generate(), author.clone(), post, now_utc());
        lock(&self.posts).push(post.clone());
        Ok(post)
    }

    async fn update_post(&self, post: &Post) -> Result<bool> {
        let replaced = self.modify_post(post.id, |stored| *stored = post.clone());
        Ok(replaced.is_some())
    }

    async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let mut posts = lock(&self.posts);
        let len_before = posts.len();
        posts.retain(|post| post.id != post_id);
        Ok(posts.len() != len_before)
    }

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        author: &User,
        body: String,
    ) -> Result<Option<Post>> {
        let comment = Comment {
            id: Id::generate(),
            author: author.clone(),
            created: now_utc(),
            body,
        };

        let commented = self.modify_post(post_id, |post| post.comments.push(comment));
        Ok(commented.map(|((), post)| post))
    }

    async fn delete_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
    ) -> Result<Option<Post>> {
        let pruned = self.modify_post(post_id, |post| {
            post.comments.retain(|comment| comment.id != comment_id);
        });
        Ok(pruned.map(|((), post)| post))
    }

    async fn with_post_transaction(
        &self,
        post_id: Id<PostMarker>,
        mutation: PostMutation<'_>,
    ) -> Result<Option<Post>> {
        Ok(self.modify_post(post_id, mutation).map(|((), post)| post))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user_exists(&self, username: &Username) -> Result<bool> {
        Ok(lock(&self.users)
            .iter()
            .any(|credentials| credentials.user.username == *username))
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let created = User {
            id: Id::generate(),
            username: user.username.clone(),
        };

        lock(&self.users).push(UserCredentials {
            user: created.clone(),
            password_hash: user.password_hash.clone(),
        });
        Ok(created)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(lock(&self.users)
            .iter()
            .find(|credentials| credentials.user.id == user_id)
            .map(|credentials| credentials.user.clone()))
    }

    async fn fetch_credentials(&self, username: &Username) -> Result<Option<UserCredentials>> {
        Ok(lock(&self.users)
            .iter()
            .find(|credentials| credentials.user.username == *username)
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn store_session(
        &self,
        user_id: Id<UserMarker>,
        session_id: &SessionId,
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        lock(&self.sessions)
            .entry(user_id)
            .or_default()
            .insert(session_id.clone(), expires_at);
        Ok(())
    }

    async fn fetch_session_expiry(
        &self,
        user_id: Id<UserMarker>,
        session_id: &SessionId,
    ) -> Result<Option<OffsetDateTime>> {
        Ok(lock(&self.sessions)
            .get(&user_id)
            .and_then(|sessions| sessions.get(session_id))
            .copied())
    }

    async fn fetch_user_sessions(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Vec<(SessionId, OffsetDateTime)>> {
        Ok(lock(&self.sessions)
            .get(&user_id)
            .map(|sessions| {
                sessions
                    .iter()
                    .map(|(session_id, expiry)| (session_id.clone(), *expiry))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_session(&self, user_id: Id<UserMarker>, session_id: &SessionId) -> Result<()> {
        if let Some(sessions) = lock(&self.sessions).get_mut(&user_id) {
            sessions.remove(session_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        memory::MemoryStore,
        store::{PostStore, SessionStore, UserStore},
    };
    use agora_common::model::{
        Id,
        auth::{PasswordHash, SessionId},
        post::{CreatePost, PostContent},
        user::{CreateUser, User, Username},
    };
    use time::{Duration, OffsetDateTime};

    fn user(name: &str) -> User {
        User {
            id: Id::generate(),
            username: Username::new(name.to_owned()).unwrap(),
        }
    }

    fn create_post(title: &str, category: &str) -> CreatePost {
        CreatePost {
            title: title.to_owned(),
            content: PostContent::Link {
                url: "https://example.com".to_owned(),
            },
            category: category.to_owned(),
        }
    }

    #[tokio::test]
    async fn created_post_round_trips() {
        let store = MemoryStore::default();
        let author = user("pike");

        let request = create_post("Hello", "news");
        let created = store.create_post(request.clone(), &author).await.unwrap();
        let fetched = store.fetch_post(created.id).await.unwrap().unwrap();

        assert_eq!(fetched, created);
        assert_eq!(fetched.author, author);
        assert_eq!(fetched.title, request.title);
        assert_eq!(fetched.content, request.content);
        assert_eq!(fetched.category, request.category);
        assert!(fetched.comments.is_empty() && fetched.votes.is_empty());
        assert!(store.fetch_post(Id::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listings_filter_and_never_fail_when_empty() {
        let store = MemoryStore::default();
        let (pike, rob) = (user("pike"), user("rob"));

        assert!(store.fetch_posts().await.unwrap().is_empty());
        assert!(store.fetch_category_posts("news").await.unwrap().is_empty());
        assert!(store.fetch_user_posts("pike").await.unwrap().is_empty());

        store.create_post(create_post("a", "news"), &pike).await.unwrap();
        store.create_post(create_post("b", "music"), &rob).await.unwrap();
        store.create_post(create_post("c", "news"), &rob).await.unwrap();

        let titles = |posts: Vec<agora_common::model::post::Post>| {
            posts.into_iter().map(|post| post.title).collect::<Vec<_>>()
        };
        assert_eq!(titles(store.fetch_posts().await.unwrap()), ["a", "b", "c"]);
        assert_eq!(titles(store.fetch_category_posts("news").await.unwrap()), ["a", "c"]);
        assert_eq!(titles(store.fetch_user_posts("rob").await.unwrap()), ["b", "c"]);
        assert!(store.fetch_category_posts("funny").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn views_are_counted() {
        let store = MemoryStore::default();
        let post = store.create_post(create_post("a", "news"), &user("pike")).await.unwrap();

        store.view_post(post.id).await.unwrap();
        let viewed = store.view_post(post.id).await.unwrap().unwrap();

        assert_eq!(viewed.views, 2);
        assert!(store.view_post(Id::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn comments_are_pushed_and_pulled() {
        let store = MemoryStore::default();
        let (author, commenter) = (user("pike"), user("rob"));
        let post = store.create_post(create_post("a", "news"), &author).await.unwrap();

        let commented = store
            .add_comment(post.id, &commenter, "first".to_owned())
            .await
            .unwrap()
            .unwrap();
        let commented = store
            .add_comment(commented.id, &commenter, "second".to_owned())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(commented.comments.len(), 2);
        assert_eq!(commented.comments[0].author, commenter);
        let first_id = commented.comments[0].id;

        let pruned = store.delete_comment(post.id, first_id).await.unwrap().unwrap();
        assert_eq!(pruned.comments.len(), 1);
        assert_eq!(pruned.comments[0].body, "second");

        let unchanged = store
            .delete_comment(post.id, Id::generate())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged, pruned);

        assert!(
            store
                .add_comment(Id::generate(), &commenter, "lost".to_owned())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn update_and_delete_posts() {
        let store = MemoryStore::default();
        let mut post = store.create_post(create_post("a", "news"), &user("pike")).await.unwrap();

        post.title = "edited".to_owned();
        assert!(store.update_post(&post).await.unwrap());
        assert_eq!(store.fetch_post(post.id).await.unwrap().unwrap().title, "edited");

        assert!(store.delete_post(post.id).await.unwrap());
        assert!(!store.delete_post(post.id).await.unwrap());
        assert!(!store.update_post(&post).await.unwrap());
    }

    #[tokio::test]
    async fn users_and_credentials() {
        let store = MemoryStore::default();
        let username = Username::new("pike".to_owned()).unwrap();
        let password_hash = PasswordHash::with_salt("sdfsdfsdf", *b"12345678").unwrap();

        assert!(!store.user_exists(&username).await.unwrap());
        let created = store
            .create_user(&CreateUser {
                username: username.clone(),
                password_hash,
            })
            .await
            .unwrap();

        assert!(store.user_exists(&username).await.unwrap());
        assert_eq!(store.fetch_user(created.id).await.unwrap(), Some(created.clone()));
        assert_eq!(
            store.authenticate(&username, "sdfsdfsdf").await.unwrap(),
            Some(created)
        );
        assert_eq!(store.authenticate(&username, "wrong").await.unwrap(), None);

        let stranger = Username::new("rob".to_owned()).unwrap();
        assert_eq!(store.authenticate(&stranger, "sdfsdfsdf").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sessions_per_user() {
        let store = MemoryStore::default();
        let (pike, rob) = (user("pike"), user("rob"));
        let expiry = OffsetDateTime::UNIX_EPOCH + Duration::days(20_000);
        let session_id = SessionId::generate();

        store.store_session(pike.id, &session_id, expiry).await.unwrap();
        store
            .store_session(pike.id, &SessionId::generate(), expiry)
            .await
            .unwrap();

        assert_eq!(
            store.fetch_session_expiry(pike.id, &session_id).await.unwrap(),
            Some(expiry)
        );
        assert_eq!(store.fetch_session_expiry(rob.id, &session_id).await.unwrap(), None);
        assert_eq!(store.fetch_user_sessions(pike.id).await.unwrap().len(), 2);

        store.delete_session(pike.id, &session_id).await.unwrap();
        assert_eq!(store.fetch_session_expiry(pike.id, &session_id).await.unwrap(), None);
        assert_eq!(store.fetch_user_sessions(pike.id).await.unwrap().len(), 1);
        assert!(store.fetch_user_sessions(rob.id).await.unwrap().is_empty());
    }
}
