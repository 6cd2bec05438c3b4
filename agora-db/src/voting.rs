//! Entry point of the voting engine.

use crate::store::{PostStore, Result};
use agora_common::model::{
    Id,
    post::{Post, PostMarker},
    user::UserMarker,
    vote::VoteDirection,
};
use tracing::debug;

/// Casts `voter`'s vote on a post inside a store transaction.
///
/// `requested` is `None` for an unvote. The vote transition and the rating
/// recomputation run on the copy read inside the transaction, so concurrent voters
/// never overwrite each other's votes. Returns `None` if the post does not exist.
pub async fn cast_vote(
    store: &dyn PostStore,
    post_id: Id<PostMarker>,
    voter: Id<UserMarker>,
    requested: Option<VoteDirection>,
) -> Result<Option<Post>> {
    store
        .with_post_transaction(post_id, &|post: &mut Post| {
            let outcome = post.cast_vote(voter, requested);
            debug!(%post_id, %voter, ?requested, ?outcome, score = post.score, "Applied vote");
        })
        .await
}
