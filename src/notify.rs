//! Outbound notifications (SMS)

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::{config, prelude::*};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
  Sent(String),
  Disabled,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
  async fn send(&self, destination: &str, message: &str) -> Result<Delivery>;
}

/// Sends nothing, used when no provider is configured.
pub struct Disabled;

#[async_trait]
impl NotificationSender for Disabled {
  async fn send(&self, _: &str, _: &str) -> Result<Delivery> {
    Ok(Delivery::Disabled)
  }
}

pub struct Sms {
  client: Client,
  api_url: String,
  api_key: String,
}

#[derive(Serialize)]
struct SmsReq<'a> {
  to: &'a str,
  body: &'a str,
}

#[derive(Deserialize)]
struct SmsRes {
  id: String,
}

impl Sms {
  pub fn new(config: &config::Sms, timeout: Duration) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .context("Failed to build SMS client")?;

    Ok(Self {
      client,
      api_url: config.api_url.clone(),
      api_key: config.api_key.clone(),
    })
  }
}

#[async_trait]
impl NotificationSender for Sms {
  async fn send(&self, destination: &str, message: &str) -> Result<Delivery> {
    let res = self
      .client
      .post(&self.api_url)
      .bearer_auth(&self.api_key)
      .json(&SmsReq { to: destination, body: message })
      .send()
      .await
      .and_then(|res| res.error_for_status())
      .map_err(|err| Error::Gateway(format!("sms delivery: {err}")))?
      .json::<SmsRes>()
      .await
      .map_err(|err| Error::Gateway(format!("sms response: {err}")))?;

    Ok(Delivery::Sent(res.id))
  }
}

/// Delivery must never fail the operation that triggered it.
pub async fn best_effort(
  sender: &dyn NotificationSender,
  destination: Option<&str>,
  message: &str,
) -> Option<Delivery> {
  let destination = destination?;

  match sender.send(destination, message).await {
    Ok(delivery) => Some(delivery),
    Err(err) => {
      warn!("Notification to {destination} not delivered: {err}");
      None
    }
  }
}
