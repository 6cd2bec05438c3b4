use agora_common::model::{
    ModelValidationError,
    comment::Comment,
    post::{Post, PostContent},
    user::{User, UserCredentials, Username},
    vote::Vote,
};
use sqlx::{FromRow, types::Json};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CredentialsRecord {
    pub user_id: Uuid,
    pub username: String,
    pub password_hash: Vec<u8>,
}

#[derive(Clone, Debug, FromRow)]
pub(crate) struct PostRecord {
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub author_username: String,
    pub title: String,
    pub kind: String,
    pub body: String,
    pub category: String,
    pub views: i64,
    pub created_at: OffsetDateTime,
    pub score: i64,
    pub upvote_percentage: i64,
    pub comments: Json<Vec<Comment>>,
    pub votes: Json<Vec<Vote>>,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.user_id.into(),
            username: Username::new(value.username)?,
        })
    }
}

impl TryFrom<CredentialsRecord> for UserCredentials {
    type Error = ModelValidationError;

    fn try_from(value: CredentialsRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: User {
                id: value.user_id.into(),
                username: Username::new(value.username)?,
            },
            password_hash: value.password_hash.try_into()?,
        })
    }
}

impl TryFrom<PostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        let views = u64::try_from(value.views)
            .map_err(|_| ModelValidationError::NegativeCounter(value.views))?;

        Ok(Self {
            id: value.post_id.into(),
            author: User {
                id: value.author_id.into(),
                username: Username::new(value.author_username)?,
            },
            title: value.title,
            content: PostContent::from_parts(&value.kind, value.body)?,
            category: value.category,
            views,
            created: value.created_at,
            score: value.score,
            upvote_percentage: value.upvote_percentage,
            comments: value.comments.0,
            votes: value.votes.0,
        })
    }
}
