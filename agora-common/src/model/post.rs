use crate::model::{
    Id,
    comment::Comment,
    user::{User, UserMarker},
    vote::{Rating, Vote, VoteDirection, VoteOutcome, apply_vote},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub const POST_KIND_TEXT: &str = "text";
pub const POST_KIND_LINK: &str = "link";

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    pub title: String,
    #[serde(flatten)]
    pub content: PostContent,
    pub category: String,
    pub views: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub score: i64,
    pub upvote_percentage: i64,
    pub comments: Vec<Comment>,
    pub votes: Vec<Vote>,
}

/// A text post carries its body, a link post its target URL.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PostContent {
    Text { text: String },
    Link { url: String },
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreatePost {
    pub title: String,
    #[serde(flatten)]
    pub content: PostContent,
    pub category: String,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown post kind: {0:?}")]
pub struct UnknownPostKindError(String);

impl PostContent {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PostContent::Text { .. } => POST_KIND_TEXT,
            PostContent::Link { .. } => POST_KIND_LINK,
        }
    }

    /// The text of a text post, or the URL of a link post.
    #[must_use]
    pub fn body(&self) -> &str {
        match self {
            PostContent::Text { text } => text,
            PostContent::Link { url } => url,
        }
    }

    pub fn from_parts(kind: &str, body: String) -> Result<Self, UnknownPostKindError> {
        match kind {
            POST_KIND_TEXT => Ok(PostContent::Text { text: body }),
            POST_KIND_LINK => Ok(PostContent::Link { url: body }),
            other => Err(UnknownPostKindError(other.to_owned())),
        }
    }
}

impl Post {
    /// A freshly submitted post: no views, comments or votes yet.
    #[must_use]
    pub fn new(id: Id<PostMarker>, author: User, post: CreatePost, created: OffsetDateTime) -> Self {
        Self {
            id,
            author,
            title: post.title,
            content: post.content,
            category: post.category,
            views: 0,
            created,
            score: 0,
            upvote_percentage: 0,
            comments: Vec::new(),
            votes: Vec::new(),
        }
    }

    /// Applies `voter`'s request and recomputes the rating from all votes.
    pub fn cast_vote(
        &mut self,
        voter: Id<UserMarker>,
        requested: Option<VoteDirection>,
    ) -> VoteOutcome {
        let outcome = apply_vote(&mut self.votes, voter, requested);

        let Rating {
            score,
            upvote_percentage,
        } = Rating::from_votes(&self.votes);
        self.score = score;
        self.upvote_percentage = upvote_percentage;

        outcome
    }

    #[must_use]
    pub fn vote_of(&self, user_id: Id<UserMarker>) -> Option<VoteDirection> {
        self.votes
            .iter()
            .find(|vote| vote.user_id == user_id)
            .map(|vote| vote.direction)
    }
}
