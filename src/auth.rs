//! Bearer token verification and role scoping

use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{prelude::*, state::AppState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  SuperAdmin,
  Principal,
  Teacher,
  Student,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  pub subject_id: String,
  pub role: Role,
  pub institute_id: Option<String>,
  pub passkey_id: Option<String>,
}

/// Institutes an identity may act for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
  Any,
  Institute(String),
}

impl Scope {
  pub fn owns(&self, institute_id: &str) -> bool {
    match self {
      Scope::Any => true,
      Scope::Institute(own) => own == institute_id,
    }
  }
}

impl Identity {
  pub fn institute_scope(&self) -> Result<Scope> {
    match self.role {
      Role::SuperAdmin => Ok(Scope::Any),
      Role::Principal => self
        .institute_id
        .clone()
        .map(Scope::Institute)
        .ok_or_else(|| Error::Authorization("no institute on token".into())),
      Role::Teacher | Role::Student => {
        Err(Error::Authorization("institute administrators only".into()))
      }
    }
  }

  pub fn student_id(&self) -> Result<&str> {
    match self.role {
      Role::Student => Ok(&self.subject_id),
      Role::SuperAdmin | Role::Principal | Role::Teacher => {
        Err(Error::Authorization("students only".into()))
      }
    }
  }
}

pub trait TokenVerifier: Send + Sync {
  fn verify(&self, bearer: &str) -> Result<Identity>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub role: Role,
  pub exp: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub institute_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub passkey_id: Option<String>,
}

/// HS256 tokens signed by the login service.
pub struct Jwt {
  key: DecodingKey,
  validation: Validation,
}

impl Jwt {
  pub fn new(secret: &str) -> Self {
    Self {
      key: DecodingKey::from_secret(secret.as_bytes()),
      validation: Validation::new(Algorithm::HS256),
    }
  }
}

impl TokenVerifier for Jwt {
  fn verify(&self, bearer: &str) -> Result<Identity> {
    let data =
      jsonwebtoken::decode::<Claims>(bearer, &self.key, &self.validation)
        .map_err(|err| {
          debug!("Rejected token: {err}");
          Error::Unauthenticated
        })?;

    let claims = data.claims;
    Ok(Identity {
      subject_id: claims.sub,
      role: claims.role,
      institute_id: claims.institute_id,
      passkey_id: claims.passkey_id,
    })
  }
}

impl FromRequestParts<Arc<AppState>> for Identity {
  type Rejection = Error;

  async fn from_request_parts(
    parts: &mut Parts,
    app: &Arc<AppState>,
  ) -> Result<Self> {
    let bearer = parts
      .headers
      .get(axum::http::header::AUTHORIZATION)
      .and_then(|value| value.to_str().ok())
      .and_then(|value| value.strip_prefix("Bearer "))
      .ok_or(Error::Unauthenticated)?;

    app.verifier.verify(bearer.trim())
  }
}
