use agora_api::{
    server::{self, ServerState},
    session::{SessionAuthority, SessionPolicy},
};
use agora_common::util::{NonPositiveDurationError, PositiveDuration};
use agora_db::{DbError, client::DbClient, session::RedisSessionStore};
use serde::Deserialize;
use std::{
    fmt::{self, Debug, Formatter},
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid session duration: {0}")]
    SessionPolicy(#[from] NonPositiveDurationError),
    #[error("Error setting up storage: {0}")]
    Storage(#[from] DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

/// A configuration value that must not end up in logs.
#[derive(Clone, Eq, PartialEq, Hash, Deserialize)]
#[serde(transparent)]
struct Secret(String);

impl Secret {
    fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

fn default_auth_lookup_timeout_secs() -> u64 {
    5
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_session_lifetime_hours() -> i64 {
    90 * 24
}

fn default_session_refresh_window_hours() -> i64 {
    24
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: Secret,
    redis_url: Secret,
    session_secret: Secret,
    #[serde(default = "default_auth_lookup_timeout_secs")]
    auth_lookup_timeout_secs: u64,
    #[serde(default = "default_database_max_connections")]
    database_max_connections: u32,
    #[serde(default = "default_session_lifetime_hours")]
    session_lifetime_hours: i64,
    #[serde(default = "default_session_refresh_window_hours")]
    session_refresh_window_hours: i64,
}

fn hours(hours: i64) -> Result<PositiveDuration, NonPositiveDurationError> {
    PositiveDuration::try_from(time::Duration::seconds(hours.saturating_mul(3600)))
}

fn session_policy(env: &Env) -> Result<SessionPolicy, InitError> {
    Ok(SessionPolicy {
        lifetime: hours(env.session_lifetime_hours)?,
        refresh_window: hours(env.session_refresh_window_hours)?,
    })
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "agora_api=debug,agora_db=debug,agora_common=debug,\
                tower_http=debug,axum::rejection=trace,sqlx=warn"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn get_env() -> Result<Env, InitError> {
    if let Err(e) = dotenvy::dotenv() {
        if e.not_found() {
            debug!("No .dotenv file found");
        } else {
            return Err(e.into());
        }
    }

    envy::from_env().map_err(InitError::from)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;

    let db_client = Arc::new(
        DbClient::connect(env.database_url.expose(), env.database_max_connections).await?,
    );
    db_client.migrate().await?;

    let policy = session_policy(&env)?;
    let session_store = Arc::new(RedisSessionStore::connect(env.redis_url.expose()).await?);
    let sessions = SessionAuthority::new(
        env.session_secret.expose().as_bytes(),
        session_store,
        policy,
    );

    let state = ServerState {
        posts: db_client.clone(),
        users: db_client,
        sessions: Arc::new(sessions),
        auth_lookup_timeout: Duration::from_secs(env.auth_lookup_timeout_secs),
    };
    let app = server::app(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;

    info!(%server_address, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
