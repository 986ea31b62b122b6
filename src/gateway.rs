//! Payment gateway contract and the Razorpay REST client

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{config, prelude::*};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
  /// Amount in minor units (paise for INR)
  pub amount: i64,
  pub currency: String,
  pub receipt: String,
  pub notes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHandle {
  pub id: String,
  pub amount: i64,
  pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
  Created,
  Authorized,
  Captured,
  Refunded,
  Failed,
}

impl RemoteStatus {
  fn parse(raw: &str) -> Self {
    match raw {
      "authorized" => Self::Authorized,
      "captured" => Self::Captured,
      "refunded" => Self::Refunded,
      "failed" => Self::Failed,
      _ => Self::Created,
    }
  }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
  async fn create_order(&self, order: OrderRequest) -> Result<OrderHandle>;

  async fn fetch_payment(&self, payment_id: &str) -> Result<RemoteStatus>;
}

fn checkout_mac(
  secret: &str,
  order_id: &str,
  payment_id: &str,
) -> Result<HmacSha256> {
  let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
    .map_err(|err| Error::Internal(format!("checkout key rejected: {err}")))?;
  mac.update(format!("{order_id}|{payment_id}").as_bytes());
  Ok(mac)
}

/// Signature the gateway attaches to a checkout: hex HMAC-SHA256 of
/// `order_id|payment_id` keyed with the shared secret.
#[cfg(test)]
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> String {
  let mac = checkout_mac(secret, order_id, payment_id).unwrap();
  hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature. A malformed signature is a
/// mismatch, not an error.
pub fn verify_signature(
  secret: &str,
  order_id: &str,
  payment_id: &str,
  signature: &str,
) -> Result<bool> {
  let Ok(expected) = hex::decode(signature.trim()) else {
    return Ok(false);
  };
  let mac = checkout_mac(secret, order_id, payment_id)?;
  Ok(mac.verify_slice(&expected).is_ok())
}

pub struct Razorpay {
  client: Client,
  base_url: String,
  key_id: String,
  key_secret: String,
}

#[derive(Debug, Deserialize)]
struct PaymentRes {
  status: String,
}

impl Razorpay {
  pub fn new(config: &config::Gateway) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .context("Failed to build gateway client")?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      key_id: config.key_id.clone(),
      key_secret: config.key_secret.clone(),
    })
  }
}

fn gateway_err(context: &str) -> impl FnOnce(reqwest::Error) -> Error + '_ {
  move |err| {
    if err.is_timeout() {
      Error::Gateway(format!("{context}: timed out"))
    } else {
      Error::Gateway(format!("{context}: {err}"))
    }
  }
}

#[async_trait]
impl PaymentGateway for Razorpay {
  async fn create_order(&self, order: OrderRequest) -> Result<OrderHandle> {
    let handle = self
      .client
      .post(format!("{}/orders", self.base_url))
      .basic_auth(&self.key_id, Some(&self.key_secret))
      .json(&order)
      .send()
      .await
      .map_err(gateway_err("create order"))?
      .error_for_status()
      .map_err(gateway_err("create order"))?
      .json::<OrderHandle>()
      .await
      .map_err(gateway_err("decode order"))?;

    debug!("Gateway order {} opened for {}", handle.id, order.receipt);
    Ok(handle)
  }

  async fn fetch_payment(&self, payment_id: &str) -> Result<RemoteStatus> {
    let res = self
      .client
      .get(format!("{}/payments/{payment_id}", self.base_url))
      .basic_auth(&self.key_id, Some(&self.key_secret))
      .send()
      .await
      .map_err(gateway_err("fetch payment"))?
      .error_for_status()
      .map_err(gateway_err("fetch payment"))?
      .json::<PaymentRes>()
      .await
      .map_err(gateway_err("decode payment"))?;

    Ok(RemoteStatus::parse(&res.status))
  }
}
