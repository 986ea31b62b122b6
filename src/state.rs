use migration::Migrator;

use crate::{
  auth::{Jwt, TokenVerifier},
  config::Config,
  gateway::{PaymentGateway, Razorpay},
  notify::{self, NotificationSender},
  prelude::*,
  sv,
};

pub struct Services<'a> {
  pub passkeys: sv::Passkeys<'a, DatabaseConnection>,
  pub students: sv::Students<'a, DatabaseConnection>,
  pub enrollments: sv::Enrollments<'a, DatabaseConnection>,
  pub access: sv::Access<'a, DatabaseConnection>,
  pub checkout: sv::Checkout<'a, DatabaseConnection>,
}

pub struct AppState {
  pub db: DatabaseConnection,
  pub config: Config,
  pub gateway: Arc<dyn PaymentGateway>,
  pub notifier: Arc<dyn NotificationSender>,
  pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
  pub async fn new(config: Config) -> anyhow::Result<Self> {
    info!("Connecting to database...");
    let db = Database::connect(&config.database_url)
      .await
      .context("Failed to connect to database")?;

    info!("Running migrations...");
    Migrator::up(&db, None).await.context("Failed to run migrations")?;

    let gateway = Arc::new(Razorpay::new(&config.gateway)?);
    let notifier: Arc<dyn NotificationSender> = match &config.sms {
      Some(sms) => Arc::new(notify::Sms::new(sms, config.gateway.timeout)?),
      None => {
        warn!("SMS provider not configured, notifications disabled");
        Arc::new(notify::Disabled)
      }
    };
    let verifier = Arc::new(Jwt::new(&config.jwt_secret));

    Ok(Self::with_parts(db, config, gateway, notifier, verifier))
  }

  pub fn with_parts(
    db: DatabaseConnection,
    config: Config,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSender>,
    verifier: Arc<dyn TokenVerifier>,
  ) -> Self {
    Self { db, config, gateway, notifier, verifier }
  }

  pub fn sv(&self) -> Services<'_> {
    Services {
      passkeys: sv::Passkeys::new(&self.db),
      students: sv::Students::new(&self.db),
      enrollments: sv::Enrollments::new(&self.db),
      access: sv::Access::new(&self.db),
      checkout: sv::Checkout::new(
        &self.db,
        &*self.gateway,
        &*self.notifier,
        &self.config,
      ),
    }
  }
}
