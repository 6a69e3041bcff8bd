use axum::{ServiceExt, extract::Request};
use lectern_common::{
    model::{
        auth::{PasswordHashError, hash_password},
        user::CreateUser,
    },
    util::PositiveDuration,
};
use lectern_db::client::{DbClient, DbError};
use serde::Deserialize;
use server::{ServerConfig, ServerState};
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use thiserror::Error;
use time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("SESSION_TTL_HOURS must be positive")]
    SessionTtl,
    #[error("Error opening database: {0}")]
    Database(#[from] DbError),
    #[error("Error hashing the administrator password: {0}")]
    AdminPassword(#[from] PasswordHashError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

fn default_database_url() -> String {
    "sqlite://lectern.db".to_owned()
}

fn default_session_ttl_hours() -> u32 {
    24
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    #[serde(default = "default_database_url")]
    database_url: String,
    #[serde(default = "default_session_ttl_hours")]
    session_ttl_hours: u32,
    admin_username: Option<String>,
    admin_email: Option<String>,
    admin_password: Option<String>,
}

impl Env {
    fn server_config(&self) -> Result<ServerConfig, InitError> {
        let session_ttl = PositiveDuration::new(Duration::hours(self.session_ttl_hours.into()))
            .ok_or(InitError::SessionTtl)?;

        Ok(ServerConfig { session_ttl })
    }
}

fn install_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lectern_api=debug,\
                lectern_db=debug,\
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

/// Creates the configured administrator unless a user with that name already exists.
async fn bootstrap_admin(db: &DbClient, env: &Env) -> Result<(), InitError> {
    let (Some(username), Some(email), Some(password)) =
        (&env.admin_username, &env.admin_email, &env.admin_password)
    else {
        debug!("No administrator configured");
        return Ok(());
    };

    if db.fetch_user_by_username(username).await?.is_some() {
        debug!(%username, "Administrator already exists");
        return Ok(());
    }

    let (admin, _profile) = db
        .create_user(&CreateUser {
            username: username.clone(),
            email: email.clone(),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: hash_password(password)?,
            is_staff: true,
            is_superuser: true,
        })
        .await?;

    info!(user_id = %admin.id, %username, "Created administrator");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "Could not listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    install_tracing();
    let env = get_env()?;
    let config = env.server_config()?;

    let db = DbClient::connect(&env.database_url).await?;
    bootstrap_admin(&db, &env).await?;

    let state = ServerState {
        db_client: Arc::new(db),
        config: Arc::new(config),
    };
    let app = server::app(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InitError::TcpServe)?;

    Ok(())
}
