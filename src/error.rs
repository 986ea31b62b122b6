//! Error taxonomy shared by every service

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum Policy {
  #[error("refund window of {days} days has closed")]
  RefundWindowClosed { days: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("missing or invalid credential")]
  Unauthenticated,

  #[error("not allowed: {0}")]
  Authorization(String),

  #[error("{0}")]
  NotFound(String),

  #[error("{message} (current status: {state})")]
  Conflict { state: String, message: String },

  #[error(transparent)]
  Policy(#[from] Policy),

  #[error("payment gateway error: {0}")]
  Gateway(String),

  #[error("database error: {0}")]
  Database(#[from] sea_orm::DbErr),

  #[error("internal error: {0}")]
  Internal(String),
}

impl Error {
  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation(message.into())
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::NotFound(message.into())
  }

  pub fn conflict(
    state: impl std::fmt::Display,
    message: impl Into<String>,
  ) -> Self {
    Self::Conflict { state: state.to_string(), message: message.into() }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      Error::Validation(_) => StatusCode::BAD_REQUEST,
      Error::Unauthenticated => StatusCode::UNAUTHORIZED,
      Error::Authorization(_) => StatusCode::FORBIDDEN,
      Error::NotFound(_) => StatusCode::NOT_FOUND,
      Error::Conflict { .. } => StatusCode::CONFLICT,
      Error::Policy(_) => StatusCode::BAD_REQUEST,
      Error::Gateway(_) => StatusCode::BAD_GATEWAY,
      Error::Database(_) | Error::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let message = match &self {
      Error::Gateway(_) => {
        tracing::error!("{self}");
        "Payment provider unavailable, please retry".to_string()
      }
      Error::Database(_) | Error::Internal(_) => {
        tracing::error!("{self}");
        "Internal error".to_string()
      }
      other => other.to_string(),
    };

    let body = json::json!({
      "success": false,
      "error": message,
    });

    (self.status_code(), axum::Json(body)).into_response()
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
