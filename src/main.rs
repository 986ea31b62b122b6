//! Coursegate - passkey lifecycle and paid course access
//!
//! Architecture:
//! - SeaORM for database access (SQLite)
//! - Axum for the HTTP API with rate limiting
//! - Razorpay for orders, SMS for best-effort notices
//! - Supervised plugins for the server and expiry reconciliation

mod auth;
mod code;
mod config;
mod entity;
mod error;
mod gateway;
mod notify;
mod plugins;
mod prelude;
mod state;
mod sv;
mod utils;

use tracing_subscriber::{
  EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{config::Config, plugins::App, prelude::*, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
      "coursegate=debug,tower_http=debug,sea_orm=warn".into()
    }))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = Config::from_env()?;
  info!("Starting Coursegate v{}", env!("CARGO_PKG_VERSION"));

  let app = Arc::new(AppState::new(config).await?);

  let supervisors = App::new()
    .register(plugins::server::Plugin)
    .register(plugins::reconcile::Reconcile)
    .run(app);

  tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
  info!("Shutting down");
  for supervisor in supervisors {
    supervisor.abort();
  }

  Ok(())
}
