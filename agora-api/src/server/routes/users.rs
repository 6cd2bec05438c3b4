use crate::server::{Result, ServerError, ServerRouter, json::Json};
use agora_common::model::post::Post;
use agora_db::PostStore;
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(list_user_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/user/{username}", rejection(ServerError))]
struct UserPostsPath {
    username: String,
}

/// Posts by author username. Unknown users simply have no posts.
async fn list_user_posts(
    UserPostsPath { username }: UserPostsPath,
    State(posts): State<Arc<dyn PostStore>>,
) -> Result<Json<Vec<Post>>> {
    Ok(Json(posts.fetch_user_posts(&username).await?))
}
