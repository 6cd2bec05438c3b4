use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AuthenticatedUser,
    json::{Created, Json, Message},
};
use agora_common::model::{
    Id,
    comment::CommentMarker,
    post::{CreatePost, Post, PostMarker},
    vote::VoteDirection,
};
use agora_db::{PostStore, voting::cast_vote};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_posts)
        .typed_post(create_post)
        .typed_get(list_category_posts)
        .typed_get(get_post)
        .typed_delete(delete_post)
        .typed_post(add_comment)
        .typed_delete(delete_comment)
        .typed_get(upvote)
        .typed_get(downvote)
        .typed_get(unvote)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/", rejection(ServerError))]
struct ListPostsPath();

async fn list_posts(
    ListPostsPath(): ListPostsPath,
    State(posts): State<Arc<dyn PostStore>>,
) -> Result<Json<Vec<Post>>> {
    Ok(Json(posts.fetch_posts().await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct CreatePostPath();

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(posts): State<Arc<dyn PostStore>>,
    user: AuthenticatedUser,
    Json(post): Json<CreatePost>,
) -> Result<Created<Post>> {
    let post = posts.create_post(post, user.user()).await?;

    info!(post_id = %post.id, author = %post.author.username, "Created post");
    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{category}", rejection(ServerError))]
struct CategoryPostsPath {
    category: String,
}

async fn list_category_posts(
    CategoryPostsPath { category }: CategoryPostsPath,
    State(posts): State<Arc<dyn PostStore>>,
) -> Result<Json<Vec<Post>>> {
    Ok(Json(posts.fetch_category_posts(&category).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

/// Returns the post and counts the view.
async fn get_post(
    PostPath { id }: PostPath,
    State(posts): State<Arc<dyn PostStore>>,
) -> Result<Json<Post>> {
    let post = posts
        .view_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(posts): State<Arc<dyn PostStore>>,
    user: AuthenticatedUser,
) -> Result<Json<Message>> {
    let post = posts
        .fetch_post(id)
        .await?
        .ok_or(ServerError::DeletedPostNotFound(id))?;

    let user_id = user.user().id;
    if post.author.id != user_id {
        return Err(ServerError::NotPostAuthor {
            post_id: id,
            user_id,
        });
    }

    if !posts.delete_post(id).await? {
        return Err(ServerError::DeletedPostNotFound(id));
    }

    info!(post_id = %id, %user_id, "Deleted post");
    Ok(Json(Message::success()))
}

#[derive(Deserialize)]
struct NewComment {
    #[serde(rename = "Comment", alias = "comment")]
    comment: String,
}

async fn add_comment(
    PostPath { id }: PostPath,
    State(posts): State<Arc<dyn PostStore>>,
    user: AuthenticatedUser,
    Json(NewComment { comment }): Json<NewComment>,
) -> Result<Created<Post>> {
    let post = posts
        .add_comment(id, user.user(), comment)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Created(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/{id}/{comment_id}", rejection(ServerError))]
struct CommentPath {
    id: Id<PostMarker>,
    comment_id: String,
}

/// Removes a comment by id. Ids the post has no comment for, including ones that
/// are not valid comment ids at all, leave the post as it is.
async fn delete_comment(
    CommentPath { id, comment_id }: CommentPath,
    State(posts): State<Arc<dyn PostStore>>,
) -> Result<Json<Post>> {
    let post = match comment_id.parse::<Id<CommentMarker>>() {
        Ok(comment_id) => posts.delete_comment(id, comment_id).await?,
        Err(_) => posts.fetch_post(id).await?,
    }
    .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/{id}/upvote", rejection(ServerError))]
struct UpvotePath {
    id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/{id}/downvote", rejection(ServerError))]
struct DownvotePath {
    id: Id<PostMarker>,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/post/{id}/unvote", rejection(ServerError))]
struct UnvotePath {
    id: Id<PostMarker>,
}

async fn upvote(
    UpvotePath { id }: UpvotePath,
    State(posts): State<Arc<dyn PostStore>>,
    user: AuthenticatedUser,
) -> Result<Json<Post>> {
    vote(&*posts, id, &user, Some(VoteDirection::Up)).await
}

async fn downvote(
    DownvotePath { id }: DownvotePath,
    State(posts): State<Arc<dyn PostStore>>,
    user: AuthenticatedUser,
) -> Result<Json<Post>> {
    vote(&*posts, id, &user, Some(VoteDirection::Down)).await
}

async fn unvote(
    UnvotePath { id }: UnvotePath,
    State(posts): State<Arc<dyn PostStore>>,
    user: AuthenticatedUser,
) -> Result<Json<Post>> {
    vote(&*posts, id, &user, None).await
}

async fn vote(
    posts: &dyn PostStore,
    id: Id<PostMarker>,
    user: &AuthenticatedUser,
    requested: Option<VoteDirection>,
) -> Result<Json<Post>> {
    let post = cast_vote(posts, id, user.user().id, requested)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}
