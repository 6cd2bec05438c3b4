//! Session authority: signs session tokens and keeps their server-side records.
//!
//! A token is only accepted while its signature and `exp` claim are valid *and* the
//! session store still holds an unexpired record for its `jti`. Records that are
//! about to lapse are pushed out again on use, so active users stay logged in.

use agora_common::{
    model::{
        Id,
        auth::{SessionClaims, SessionId},
        user::{User, UserMarker},
    },
    util::PositiveDuration,
};
use agora_db::{DbError, SessionStore};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info};

pub const DEFAULT_SESSION_LIFETIME: PositiveDuration =
    PositiveDuration::new_unchecked(Duration::days(90));
pub const DEFAULT_SESSION_REFRESH_WINDOW: PositiveDuration =
    PositiveDuration::new_unchecked(Duration::hours(24));

const SESSION_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session token was rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("Session {0} is not known")]
    UnknownSession(SessionId),
    #[error("Session {0} expired at {1}")]
    Expired(SessionId, OffsetDateTime),
    #[error(transparent)]
    Store(#[from] DbError),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct SessionPolicy {
    /// How long a new or refreshed session lives.
    pub lifetime: PositiveDuration,
    /// Remaining lifetime below which a validated session is refreshed.
    pub refresh_window: PositiveDuration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_SESSION_LIFETIME,
            refresh_window: DEFAULT_SESSION_REFRESH_WINDOW,
        }
    }
}

pub struct SessionAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    store: Arc<dyn SessionStore>,
    policy: SessionPolicy,
}

impl SessionAuthority {
    #[must_use]
    pub fn new(secret: &[u8], store: Arc<dyn SessionStore>, policy: SessionPolicy) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(SESSION_ALGORITHM),
            store,
            policy,
        }
    }

    /// Opens a new session for `user` and returns its signed token.
    pub async fn issue_token(&self, user: &User) -> Result<String, SessionError> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + self.policy.lifetime.get();

        let claims = SessionClaims {
            user: user.clone(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
            jti: SessionId::generate(),
        };
        let token = encode(&Header::new(SESSION_ALGORITHM), &claims, &self.encoding_key)?;

        self.store
            .store_session(user.id, &claims.jti, expires_at)
            .await?;

        debug!(user_id = %user.id, session_id = %claims.jti, "Opened session");
        Ok(token)
    }

    /// Checks `token` and its session record, returning the user snapshot it carries.
    pub async fn validate_token(&self, token: &str) -> Result<User, SessionError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)?.claims;
        let user_id = claims.user.id;

        let expires_at = self
            .store
            .fetch_session_expiry(user_id, &claims.jti)
            .await?
            .ok_or_else(|| SessionError::UnknownSession(claims.jti.clone()))?;

        let now = OffsetDateTime::now_utc();
        if now > expires_at {
            return Err(SessionError::Expired(claims.jti, expires_at));
        }

        if expires_at - now < self.policy.refresh_window.get() {
            let refreshed = now + self.policy.lifetime.get();
            self.store
                .store_session(user_id, &claims.jti, refreshed)
                .await?;
            debug!(%user_id, session_id = %claims.jti, %refreshed, "Extended session");
        }

        Ok(claims.user)
    }

    /// Deletes every session of the user that has already expired.
    pub async fn prune_expired_sessions(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<usize, SessionError> {
        let now = OffsetDateTime::now_utc();
        let mut pruned = 0;

        for (session_id, expires_at) in self.store.fetch_user_sessions(user_id).await? {
            if now > expires_at {
                self.store.delete_session(user_id, &session_id).await?;
                info!(%user_id, %session_id, %expires_at, "Removed expired session");
                pruned += 1;
            }
        }

        Ok(pruned)
    }
}
