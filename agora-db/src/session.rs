//! Redis-backed session records.
//!
//! Each user has one hash, `sessions:{user_id}`, mapping session ids to their expiry
//! as unix seconds.

use crate::store::{Result, SessionStore};
use agora_common::model::{Id, auth::SessionId, user::UserMarker};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Clone)]
pub struct RedisSessionStore {
    connection: ConnectionManager,
}

impl RedisSessionStore {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let connection = client.get_connection_manager().await?;

        Ok(Self::new(connection))
    }
}

fn sessions_key(user_id: Id<UserMarker>) -> String {
    format!("sessions:{user_id}")
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn store_session(
        &self,
        user_id: Id<UserMarker>,
        session_id: &SessionId,
        expires_at: OffsetDateTime,
    ) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(
                sessions_key(user_id),
                session_id.get(),
                expires_at.unix_timestamp(),
            )
            .await?;

        Ok(())
    }

    async fn fetch_session_expiry(
        &self,
        user_id: Id<UserMarker>,
        session_id: &SessionId,
    ) -> Result<Option<OffsetDateTime>> {
        let mut connection = self.connection.clone();
        let expiry: Option<i64> = connection
            .hget(sessions_key(user_id), session_id.get())
            .await?;

        let expiry = expiry
            .map(OffsetDateTime::from_unix_timestamp)
            .transpose()?;
        Ok(expiry)
    }

    async fn fetch_user_sessions(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Vec<(SessionId, OffsetDateTime)>> {
        let mut connection = self.connection.clone();
        let sessions: HashMap<String, i64> = connection.hgetall(sessions_key(user_id)).await?;

        let mut user_sessions = Vec::with_capacity(sessions.len());
        for (session_id, expiry) in sessions {
            user_sessions.push((
                SessionId::new(session_id),
                OffsetDateTime::from_unix_timestamp(expiry)?,
            ));
        }

        Ok(user_sessions)
    }

    async fn delete_session(&self, user_id: Id<UserMarker>, session_id: &SessionId) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hdel(sessions_key(user_id), session_id.get())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::session::sessions_key;
    use agora_common::model::Id;
    use uuid::Uuid;

    #[test]
    fn key_per_user() {
        let user_id = Id::new(Uuid::nil());
        assert_eq!(
            sessions_key(user_id),
            "sessions:00000000-0000-0000-0000-000000000000"
        );
    }
}
