mod handlers;

use std::net::SocketAddr;

use axum::{
  Router,
  routing::{get, post},
};
use tower::ServiceBuilder;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};

use crate::{prelude::*, state::AppState};

pub fn routes() -> Router<Arc<AppState>> {
  Router::new()
    .route("/health", get(handlers::health))
    .route("/api/courses/{course_id}/passkeys", post(handlers::generate))
    .route("/api/courses/{course_id}/access", get(handlers::access))
    .route("/api/passkeys/claim", post(handlers::claim))
    .route("/api/passkeys/{code}/revoke", post(handlers::revoke))
    .route("/api/passkeys/{code}/history", get(handlers::history))
    .route("/api/passkeys/{code}/activate", post(handlers::switch))
    .route("/api/passkeys/{code}/orders", post(handlers::order))
    .route("/api/students/me/passkeys", get(handlers::owned))
    .route("/api/payments/verify", post(handlers::verify))
    .route("/api/payments/failure", post(handlers::failure))
    .route("/api/enrollments/{id}/refund", post(handlers::refund))
}

pub struct Plugin;

#[async_trait]
impl super::Plugin for Plugin {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let governor_conf = Arc::new(
      GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(100)
        .finish()
        .context("Failed to build rate limiter config")?,
    );
    let limiter = governor_conf.limiter().clone();

    let addr = SocketAddr::from(([0, 0, 0, 0], app.config.port));
    let router = routes()
      .layer(
        ServiceBuilder::new()
          .layer(TraceLayer::new_for_http())
          .layer(GovernorLayer::new(governor_conf))
          .layer(
            CorsLayer::new()
              .allow_origin(Any)
              .allow_methods(Any)
              .allow_headers(Any),
          ),
      )
      .with_state(app)
      .into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(addr)
      .await
      .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {addr}");

    let limiter = async {
      loop {
        time::sleep(Duration::from_secs(60)).await;
        limiter.retain_recent();
      }
    };

    let server = async {
      axum::serve(listener, router).await.context("Axum server error")
    };

    tokio::select! {
      result = server => {
        if let Err(err) = &result {
          error!("HTTP server stopped: {err:#}");
        }
        result
      }
      _ = limiter => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use axum::{
    body::{self, Body},
    http::{Request, StatusCode, header},
  };
  use jsonwebtoken::{EncodingKey, Header};
  use tower::ServiceExt;

  use super::*;
  use crate::{
    auth::{Claims, Jwt, Role},
    entity::PricingModel,
    sv::testing,
  };

  const JWT_SECRET: &str = "jwt-test-secret";

  async fn app() -> Arc<AppState> {
    let db = testing::setup_db().await;
    testing::seed_course(&db, "C1", "inst-1", PricingModel::Subscription).await;

    Arc::new(AppState::with_parts(
      db,
      testing::config(),
      Arc::new(testing::FakeGateway::default()),
      Arc::new(testing::Recorder::default()),
      Arc::new(Jwt::new(JWT_SECRET)),
    ))
  }

  fn bearer(sub: &str, role: Role, institute_id: Option<&str>) -> String {
    let claims = Claims {
      sub: sub.into(),
      role,
      exp: Utc::now().timestamp() + 600,
      institute_id: institute_id.map(Into::into),
      passkey_id: None,
    };
    let token = jsonwebtoken::encode(
      &Header::default(),
      &claims,
      &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
  }

  async fn call(
    app: &Arc<AppState>,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<json::Value>,
  ) -> (StatusCode, json::Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
      req = req.header(header::AUTHORIZATION, auth);
    }
    let req = match body {
      Some(body) => req
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string())),
      None => req.body(Body::empty()),
    }
    .unwrap();

    let res = routes().with_state(app.clone()).oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, json::from_slice(&bytes).unwrap())
  }

  #[tokio::test]
  async fn health_is_public() {
    let app = app().await;
    let (status, body) = call(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
  }

  #[tokio::test]
  async fn protected_routes_need_a_valid_token() {
    let app = app().await;

    let (status, body) =
      call(&app, "GET", "/api/students/me/passkeys", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let student = bearer("s-1", Role::Student, None);
    let (status, _) = call(
      &app,
      "POST",
      "/api/courses/C1/passkeys",
      Some(&student),
      Some(json::json!({ "count": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn generate_claim_and_list_over_http() {
    let app = app().await;
    let principal = bearer("p-1", Role::Principal, Some("inst-1"));

    let (status, body) = call(
      &app,
      "POST",
      "/api/courses/C1/passkeys",
      Some(&principal),
      Some(json::json!({ "count": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
      &app,
      "POST",
      "/api/passkeys/claim",
      None,
      Some(json::json!({ "device_id": "dev-1", "code": code, "name": "Asha" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["passkey"]["status"], "STUDENT_ASSIGNED");
    let student_id = body["data"]["student"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
      &app,
      "POST",
      "/api/passkeys/claim",
      None,
      Some(json::json!({ "device_id": "dev-2", "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("STUDENT_ASSIGNED"));

    let student = bearer(&student_id, Role::Student, None);
    let (status, body) =
      call(&app, "GET", "/api/students/me/passkeys", Some(&student), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["passkey_id"], code.as_str());
    assert_eq!(body["data"][0]["is_active"], true);

    let (status, body) = call(
      &app,
      "GET",
      "/api/courses/C1/access?device_id=dev-1",
      Some(&student),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["granted"], false);
    assert_eq!(body["data"]["reason"], "not_enrolled");
  }

  #[tokio::test]
  async fn revoke_takes_an_optional_reason() {
    let app = app().await;
    let principal = bearer("p-1", Role::Principal, Some("inst-1"));
    let (_, body) = call(
      &app,
      "POST",
      "/api/courses/C1/passkeys",
      Some(&principal),
      Some(json::json!({ "count": 2 })),
    )
    .await;
    let bare = body["data"][0]["id"].as_str().unwrap().to_string();
    let explained = body["data"][1]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/passkeys/{bare}/revoke");
    let (status, body) = call(&app, "POST", &uri, Some(&principal), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "REVOKED");

    let uri = format!("/api/passkeys/{explained}/revoke");
    let (status, body) = call(
      &app,
      "POST",
      &uri,
      Some(&principal),
      Some(json::json!({ "reason": "course cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "REVOKED");

    let uri = format!("/api/passkeys/{explained}/history");
    let (_, body) = call(&app, "GET", &uri, Some(&principal), None).await;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.last().unwrap()["reason"], "course cancelled");
  }
}
