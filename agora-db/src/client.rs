use crate::{
    record::{CredentialsRecord, PostRecord, UserRecord},
    store::{DbError, PostMutation, PostStore, Result, UserStore},
};
use agora_common::{
    model::{
        Id,
        comment::{Comment, CommentMarker},
        post::{CreatePost, Post, PostMarker},
        user::{CreateUser, User, UserCredentials, UserMarker, Username},
    },
    util::now_utc,
};
use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, postgres::PgPoolOptions, query, query_as, query_scalar, types::Json};
use tracing::{debug, warn};

/// Attempts per post transaction, counting the first.
const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

/// Postgres-backed identity and content store.
#[derive(Clone, Debug)]
pub struct DbClient {
    pool: PgPool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn try_post_transaction(
        &self,
        post_id: Id<PostMarker>,
        mutation: PostMutation<'_>,
    ) -> Result<Option<Post>> {
        // Rolled back on drop, so every early return releases the transaction.
        let mut transaction = self.pool.begin().await?;

        query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *transaction)
            .await?;

        let record = query_as::<_, PostRecord>(
            "
            SELECT
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            FROM
                posts.posts
            WHERE
                post_id = $1
            FOR UPDATE
            ",
        )
        .bind(post_id.uuid())
        .fetch_optional(&mut *transaction)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let mut post = Post::try_from(record)?;
        mutation(&mut post);
        write_post(&mut *transaction, &post).await?;

        transaction.commit().await?;
        Ok(Some(post))
    }
}

async fn write_post<'e>(executor: impl PgExecutor<'e>, post: &Post) -> Result<bool> {
    let result = query(
        "
        UPDATE posts.posts
        SET
            author_id = $2,
            author_username = $3,
            title = $4,
            kind = $5,
            body = $6,
            category = $7,
            views = $8,
            created_at = $9,
            score = $10,
            upvote_percentage = $11,
            comments = $12,
            votes = $13
        WHERE
            post_id = $1
        ",
    )
    .bind(post.id.uuid())
    .bind(post.author.id.uuid())
    .bind(post.author.username.get())
    .bind(&post.title)
    .bind(post.content.kind())
    .bind(post.content.body())
    .bind(&post.category)
    .bind(stored_views(post))
    .bind(post.created)
    .bind(post.score)
    .bind(post.upvote_percentage)
    .bind(Json(&post.comments))
    .bind(Json(&post.votes))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn stored_views(post: &Post) -> i64 {
    i64::try_from(post.views).unwrap_or(i64::MAX)
}

/// Serialization failures and deadlocks are safe to retry from the start.
fn is_transient(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db_err| db_err.code())
        .is_some_and(|code| matches!(code.as_ref(), "40001" | "40P01"))
}

fn into_posts(records: Vec<PostRecord>) -> Result<Vec<Post>> {
    records
        .into_iter()
        .map(|record| Post::try_from(record).map_err(DbError::from))
        .collect()
}

#[async_trait]
impl PostStore for DbClient {
    async fn fetch_posts(&self) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            FROM
                posts.posts
            ORDER BY
                created_at, post_id
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        into_posts(records)
    }

    async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            SELECT
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            FROM
                posts.posts
            WHERE
                post_id = $1
            ",
        )
        .bind(post_id.uuid())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn view_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            UPDATE posts.posts
            SET views = views + 1
            WHERE post_id = $1
            RETURNING
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            ",
        )
        .bind(post_id.uuid())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn fetch_category_posts(&self, category: &str) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            FROM
                posts.posts
            WHERE
                category = $1
            ORDER BY
                created_at, post_id
            ",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        into_posts(records)
    }

    async fn fetch_user_posts(&self, username: &str) -> Result<Vec<Post>> {
        let records = query_as::<_, PostRecord>(
            "
            SELECT
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            FROM
                posts.posts
            WHERE
                author_username = $1
            ORDER BY
                created_at, post_id
            ",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        into_posts(records)
    }

    async fn create_post(&self, post: CreatePost, author: &User) -> Result<Post> {
        let post = Post::new(Id::generate(), author.clone(), post, now_utc());

        query(
            "
            INSERT INTO posts.posts (
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(post.id.uuid())
        .bind(post.author.id.uuid())
        .bind(post.author.username.get())
        .bind(&post.title)
        .bind(post.content.kind())
        .bind(post.content.body())
        .bind(&post.category)
        .bind(stored_views(&post))
        .bind(post.created)
        .bind(post.score)
        .bind(post.upvote_percentage)
        .bind(Json(&post.comments))
        .bind(Json(&post.votes))
        .execute(&self.pool)
        .await?;

        debug!(post_id = %post.id, author = %post.author.username, "Created post");
        Ok(post)
    }

    async fn update_post(&self, post: &Post) -> Result<bool> {
        write_post(&self.pool, post).await
    }

    async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = query("DELETE FROM posts.posts WHERE post_id = $1")
            .bind(post_id.uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
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

        let record = query_as::<_, PostRecord>(
            "
            UPDATE posts.posts
            SET comments = comments || $2::jsonb
            WHERE post_id = $1
            RETURNING
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            ",
        )
        .bind(post_id.uuid())
        .bind(Json([&comment]))
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn delete_comment(
        &self,
        post_id: Id<PostMarker>,
        comment_id: Id<CommentMarker>,
    ) -> Result<Option<Post>> {
        let record = query_as::<_, PostRecord>(
            "
            UPDATE posts.posts AS post
            SET comments = COALESCE(
                (
                    SELECT jsonb_agg(elements.comment ORDER BY elements.position)
                    FROM jsonb_array_elements(post.comments)
                        WITH ORDINALITY AS elements(comment, position)
                    WHERE elements.comment->>'id' <> $2
                ),
                '[]'::jsonb
            )
            WHERE post_id = $1
            RETURNING
                post_id, author_id, author_username, title, kind, body, category,
                views, created_at, score, upvote_percentage, comments, votes
            ",
        )
        .bind(post_id.uuid())
        .bind(comment_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    async fn with_post_transaction(
        &self,
        post_id: Id<PostMarker>,
        mutation: PostMutation<'_>,
    ) -> Result<Option<Post>> {
        let mut attempt = 1;
        loop {
            match self.try_post_transaction(post_id, mutation).await {
                Err(DbError::Sqlx(err))
                    if attempt < MAX_TRANSACTION_ATTEMPTS && is_transient(&err) =>
                {
                    warn!(%post_id, attempt, error = %err, "Post transaction conflicted, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl UserStore for DbClient {
    async fn user_exists(&self, username: &Username) -> Result<bool> {
        let exists = query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM users.users WHERE username = $1)",
        )
        .bind(username.get())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn create_user(&self, user: &CreateUser) -> Result<User> {
        let user_id = Id::<UserMarker>::generate();

        let record = query_as::<_, UserRecord>(
            "
            INSERT INTO users.users (user_id, username, password_hash)
            VALUES ($1, $2, $3)
            RETURNING user_id, username
            ",
        )
        .bind(user_id.uuid())
        .bind(user.username.get())
        .bind(user.password_hash.as_bytes())
        .fetch_one(&self.pool)
        .await?;

        Ok(User::try_from(record)?)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                user_id,
                username
            FROM
                users.users
            WHERE
                user_id = $1
            ",
        )
        .bind(user_id.uuid())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_credentials(&self, username: &Username) -> Result<Option<UserCredentials>> {
        let record = query_as::<_, CredentialsRecord>(
            "
            SELECT
                user_id,
                username,
                password_hash
            FROM
                users.users
            WHERE
                username = $1
            LIMIT 1
            ",
        )
        .bind(username.get())
        .fetch_optional(&self.pool)
        .await?;

        let credentials = record.map(UserCredentials::try_from).transpose()?;
        Ok(credentials)
    }
}
