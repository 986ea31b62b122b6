use std::env;

use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Gateway {
  pub base_url: String,
  pub key_id: String,
  /// Shared with the gateway, also signs `order_id|payment_id`
  pub key_secret: String,
  pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Sms {
  pub api_url: String,
  pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub database_url: String,
  pub port: u16,
  pub jwt_secret: String,
  pub gateway: Gateway,
  pub sms: Option<Sms>,
  /// Fixed platform fee in major currency units
  pub platform_fee: i64,
  /// How long an unpaid order blocks another order for the same fee
  pub order_hold: Duration,
  pub reconcile_interval: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      database_url: String::from("sqlite:coursegate.db?mode=rwc"),
      port: 3000,
      jwt_secret: String::from("dev-secret"),
      gateway: Gateway {
        base_url: String::from("https://api.razorpay.com/v1"),
        key_id: String::new(),
        key_secret: String::from("dev-gateway-secret"),
        timeout: Duration::from_secs(10),
      },
      sms: None,
      platform_fee: 90,
      order_hold: Duration::from_secs(30 * 60),
      reconcile_interval: Duration::from_secs(300),
    }
  }
}

fn required(key: &str) -> anyhow::Result<String> {
  env::var(key).with_context(|| format!("{key} not set"))
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
  T: std::str::FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(key) {
    Ok(raw) => {
      raw.trim().parse().with_context(|| format!("invalid {key}: {raw}"))
    }
    Err(_) => Ok(default),
  }
}

fn duration(key: &str, default: Duration) -> anyhow::Result<Duration> {
  match env::var(key) {
    Ok(raw) => humantime::parse_duration(raw.trim())
      .with_context(|| format!("invalid {key}: {raw}")),
    Err(_) => Ok(default),
  }
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    let defaults = Self::default();

    let sms = match (env::var("SMS_API_URL"), env::var("SMS_API_KEY")) {
      (Ok(api_url), Ok(api_key)) => Some(Sms { api_url, api_key }),
      _ => None,
    };

    Ok(Self {
      database_url: env::var("DATABASE_URL")
        .unwrap_or(defaults.database_url),
      port: parsed("PORT", defaults.port)?,
      jwt_secret: required("JWT_SECRET")?,
      gateway: Gateway {
        base_url: env::var("RAZORPAY_BASE_URL")
          .unwrap_or(defaults.gateway.base_url),
        key_id: required("RAZORPAY_KEY_ID")?,
        key_secret: required("RAZORPAY_KEY_SECRET")?,
        timeout: duration("GATEWAY_TIMEOUT", defaults.gateway.timeout)?,
      },
      sms,
      platform_fee: parsed("PLATFORM_FEE", defaults.platform_fee)?,
      order_hold: duration("ORDER_HOLD", defaults.order_hold)?,
      reconcile_interval: duration(
        "RECONCILE_INTERVAL",
        defaults.reconcile_interval,
      )?,
    })
  }
}
