extern crate dotenvy;

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod schema;
pub mod store;
pub mod voice;

use auth::{AdminCredentials, TokenService};
use config::AppConfig;
use store::{MemoryPatientStore, PatientStore, PgPatientStore};
use voice::{HttpConversationClient, VoiceGateway};

/// Shared per-process state handed to every worker.
pub struct AppState {
    pub store: Arc<dyn PatientStore>,
    pub tokens: TokenService,
    pub admin: AdminCredentials,
    pub voice: VoiceGateway,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn PatientStore> = match &config.database_url {
            Some(url) => {
                let pool = store::build_pool(url, config.database_pool_size)
                    .context("failed to create database pool")?;
                Arc::new(PgPatientStore::new(pool))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, patient records are kept in memory only");
                Arc::new(MemoryPatientStore::new())
            }
        };

        let client = HttpConversationClient::new(config.conversation_service_url.clone())
            .context("failed to build conversation service client")?;

        let tokens = TokenService::new(&config.jwt_secret, config.jwt_ttl_hours)
            .context("failed to build token service")?;

        Ok(Self {
            store,
            tokens,
            admin: AdminCredentials::new(&config.admin_username, &config.admin_password),
            voice: VoiceGateway::new(Arc::new(client), config.voice_session_ttl),
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    if config.uses_default_secret() {
        tracing::warn!("JWT_SECRET not set, using the development secret");
    }
    if config.uses_default_admin() {
        tracing::warn!("admin credential is the built-in default");
    }

    let state = web::Data::new(AppState::from_config(&config)?);
    tracing::info!(
        host = %config.host,
        port = config.port,
        store = state.store.backend(),
        conversation_service = %config.conversation_service_url,
        "starting patient intake server"
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
