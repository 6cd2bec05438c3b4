use crate::{
    server::{
        Result, ServerError, ServerRouter,
        json::{Created, Json},
    },
    session::SessionAuthority,
};
use agora_common::model::{
    auth::PasswordHash,
    user::{CreateUser, Username},
};
use agora_db::UserStore;
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(register).typed_post(login)
}

#[derive(Deserialize)]
struct Credentials {
    username: Username,
    password: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize)]
struct SessionToken {
    token: String,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/register", rejection(ServerError))]
struct RegisterPath();

async fn register(
    RegisterPath(): RegisterPath,
    State(users): State<Arc<dyn UserStore>>,
    State(sessions): State<Arc<SessionAuthority>>,
    Json(Credentials { username, password }): Json<Credentials>,
) -> Result<Created<SessionToken>> {
    if users.user_exists(&username).await? {
        return Err(ServerError::UsernameTaken(username));
    }

    let password_hash = PasswordHash::generate(&password)?;
    let user = users
        .create_user(&CreateUser {
            username,
            password_hash,
        })
        .await?;
    let token = sessions.issue_token(&user).await?;

    info!(user_id = %user.id, username = %user.username, "Registered user");
    Ok(Created(SessionToken { token }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/login", rejection(ServerError))]
struct LoginPath();

async fn login(
    LoginPath(): LoginPath,
    State(users): State<Arc<dyn UserStore>>,
    State(sessions): State<Arc<SessionAuthority>>,
    Json(Credentials { username, password }): Json<Credentials>,
) -> Result<Json<SessionToken>> {
    let Some(user) = users.authenticate(&username, &password).await? else {
        return Err(ServerError::InvalidCredentials(username));
    };

    let pruned = sessions.prune_expired_sessions(user.id).await?;
    let token = sessions.issue_token(&user).await?;

    info!(user_id = %user.id, username = %user.username, pruned, "Logged in");
    Ok(Json(SessionToken { token }))
}
