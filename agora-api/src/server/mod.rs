use crate::session::{SessionAuthority, SessionError};
use agora_common::model::{
    Id,
    auth::PasswordHashError,
    post::PostMarker,
    user::{UserMarker, Username},
};
use agora_db::{DbError, PostStore, UserStore};
use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
};
use json::Json;
use serde::Serialize;
use std::{borrow::Cow, sync::Arc, time::Duration};
use thiserror::Error;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info_span};

pub mod auth;
pub mod json;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub posts: Arc<dyn PostStore>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<SessionAuthority>,
    /// Upper bound for re-loading the session's user on authenticated requests.
    #[from_ref(skip)]
    pub auth_lookup_timeout: Duration,
}

/// The complete service: every route under `/api`, session resolution, and request tracing.
pub fn app(state: ServerState) -> Router {
    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request| {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id
        )
    });

    Router::new()
        .nest("/api", routes::routes())
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_session,
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace_layer)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("Request requires an authenticated user")]
    NotAuthorized,
    #[error("User {0} of a valid session no longer exists")]
    SessionUserNotFound(Id<UserMarker>),
    #[error("Looking up user {0} of a valid session failed: {1}")]
    SessionUserLookup(Id<UserMarker>, DbError),
    #[error("Looking up user {0} of a valid session timed out")]
    SessionUserLookupTimeout(Id<UserMarker>),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Password could not be hashed: {0}")]
    PasswordHash(#[from] PasswordHashError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Post with id {0} was not found.")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("Post with id {0} to delete was not found.")]
    DeletedPostNotFound(Id<PostMarker>),
    #[error("User {user_id} tried to delete post {post_id} of another author")]
    NotPostAuthor {
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    },
    #[error("Username {0} is already taken")]
    UsernameTaken(Username),
    #[error("Invalid credentials for {0}")]
    InvalidCredentials(Username),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::InvalidCredentials(_) => StatusCode::NOT_FOUND,
            ServerError::JsonRejection(_)
            | ServerError::NotAuthorized
            | ServerError::SessionUserNotFound(_)
            | ServerError::SessionUserLookup(..)
            | ServerError::SessionUserLookupTimeout(_) => StatusCode::BAD_REQUEST,
            ServerError::UsernameTaken(_) => StatusCode::CONFLICT,
            ServerError::JsonResponse(_)
            | ServerError::Session(_)
            | ServerError::PasswordHash(_)
            | ServerError::Database(_)
            | ServerError::DeletedPostNotFound(_)
            | ServerError::NotPostAuthor { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal details stay in the logs.
    pub fn message(&self) -> Cow<'static, str> {
        match self {
            ServerError::UnknownRoute(_) | ServerError::PathRejection(_) => "not found".into(),
            ServerError::JsonRejection(_) => "bad request format".into(),
            ServerError::NotAuthorized => "not authorized".into(),
            ServerError::SessionUserNotFound(_)
            | ServerError::SessionUserLookup(..)
            | ServerError::SessionUserLookupTimeout(_)
            | ServerError::InvalidCredentials(_) => "user not found".into(),
            ServerError::Session(_) => "user authentication failed".into(),
            ServerError::PostByIdNotFound(_) | ServerError::DeletedPostNotFound(_) => {
                "post not found".into()
            }
            ServerError::NotPostAuthor { .. } => "only the author can remove the post".into(),
            ServerError::UsernameTaken(username) => {
                format!("user \"{username}\" already exists").into()
            }
            ServerError::JsonResponse(_)
            | ServerError::PasswordHash(_)
            | ServerError::Database(_) => "internal server error".into(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
struct ErrorResponse {
    status: u16,
    message: Cow<'static, str>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message: self.message(),
        };
        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use crate::server::ServerError;
    use agora_common::model::{Id, user::Username};
    use axum::http::StatusCode;

    #[test]
    fn conflict_message_names_the_user() {
        let error = ServerError::UsernameTaken(Username::new("pike".to_owned()).unwrap());
        assert_eq!(error.status(), StatusCode::CONFLICT);
        assert_eq!(error.message(), "user \"pike\" already exists");
    }

    #[test]
    fn session_user_failures_are_client_errors() {
        let user_id = Id::generate();
        for error in [
            ServerError::SessionUserNotFound(user_id),
            ServerError::SessionUserLookupTimeout(user_id),
        ] {
            assert_eq!(error.status(), StatusCode::BAD_REQUEST);
            assert_eq!(error.message(), "user not found");
        }
    }

    #[test]
    fn non_author_delete_is_a_server_error() {
        let error = ServerError::NotPostAuthor {
            post_id: Id::generate(),
            user_id: Id::generate(),
        };
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message(), "only the author can remove the post");
    }

    #[test]
    fn missing_post_on_delete_is_a_server_error() {
        let post_id = Id::generate();
        assert_eq!(
            ServerError::PostByIdNotFound(post_id).status(),
            StatusCode::NOT_FOUND
        );

        let error = ServerError::DeletedPostNotFound(post_id);
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message(), "post not found");
    }
}
