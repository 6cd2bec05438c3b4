use crate::server::{Result, ServerError, ServerState};
use agora_common::model::user::User;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tokio::time::timeout;
use tracing::{debug, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// The user behind the request's session token.
///
/// Only present when [`resolve_session`] accepted a token. Handlers that take this
/// extractor reject anonymous requests.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthenticatedUser(User);

impl AuthenticatedUser {
    #[must_use]
    pub fn user(&self) -> &User {
        &self.0
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(ServerError::NotAuthorized)
    }
}

/// Takes the token out of an `Authorization` header, with or without a `Bearer ` prefix.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();

    (!token.is_empty()).then(|| token.to_owned())
}

/// Attaches an [`AuthenticatedUser`] to requests carrying a valid session token.
///
/// Missing or invalid tokens leave the request anonymous. A valid token whose user
/// cannot be loaded in time fails the request.
pub async fn resolve_session(
    State(state): State<ServerState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let Some(token) = session_token(request.headers()) else {
        return Ok(next.run(request).await);
    };

    let session_user = match state.sessions.validate_token(&token).await {
        Ok(user) => user,
        Err(err) => {
            warn!(error = %err, "Treating request with rejected session token as anonymous");
            return Ok(next.run(request).await);
        }
    };

    let user_id = session_user.id;
    let user = match timeout(state.auth_lookup_timeout, state.users.fetch_user(user_id)).await {
        Ok(Ok(Some(user))) => user,
        Ok(Ok(None)) => return Err(ServerError::SessionUserNotFound(user_id)),
        Ok(Err(err)) => return Err(ServerError::SessionUserLookup(user_id, err)),
        Err(_) => return Err(ServerError::SessionUserLookupTimeout(user_id)),
    };

    debug!(%user_id, username = %user.username, "Resolved session");
    request.extensions_mut().insert(AuthenticatedUser(user));

    Ok(next.run(request).await)
}
