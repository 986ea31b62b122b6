use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};

use crate::{
  auth::{Identity, Role},
  entity::{PaymentKind, enrollment, passkey, passkey_event, payment},
  gateway::OrderHandle,
  notify,
  prelude::*,
  state::AppState,
  sv::{Claimed, Decision, Denial, Owned, Profile, Settlement, Subject},
};

#[derive(Debug, Serialize)]
pub struct Reply<T> {
  pub success: bool,
  pub data: T,
}

fn ok<T: Serialize>(data: T) -> Result<Json<Reply<T>>> {
  Ok(Json(Reply { success: true, data }))
}

type Res<T> = Result<Json<Reply<T>>>;

pub async fn health() -> Json<json::Value> {
  Json(json::json!({
    "status": "ok",
    "version": env!("CARGO_PKG_VERSION"),
  }))
}

#[derive(Debug, Deserialize)]
pub struct GenerateReq {
  pub count: u32,
}

pub async fn generate(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(course_id): Path<String>,
  Json(req): Json<GenerateReq>,
) -> Res<Vec<passkey::Model>> {
  let scope = identity.institute_scope()?;
  let passkeys = app
    .sv()
    .passkeys
    .generate(&scope, &identity.subject_id, &course_id, req.count)
    .await?;
  ok(passkeys)
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeReq {
  pub reason: Option<String>,
}

pub async fn revoke(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(code): Path<String>,
  req: Option<Json<RevokeReq>>,
) -> Res<passkey::Model> {
  // the body is optional, a bare POST revokes without a reason
  let req = req.map(|Json(req)| req).unwrap_or_default();
  let scope = identity.institute_scope()?;
  let sv = app.sv();
  let revoked = sv
    .passkeys
    .revoke(&scope, &identity.subject_id, &code, req.reason.as_deref())
    .await?;

  if let Some(student_id) = &revoked.student_id {
    let phone = match sv.students.by_id(student_id).await {
      Ok(student) => student.phone_number,
      Err(err) => {
        warn!("No contact for student {student_id}: {err}");
        None
      }
    };
    let message =
      format!("Passkey {} was revoked. Course access has ended.", revoked.id);
    notify::best_effort(&*app.notifier, phone.as_deref(), &message).await;
  }

  ok(revoked)
}

pub async fn history(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(code): Path<String>,
) -> Res<Vec<passkey_event::Model>> {
  let scope = identity.institute_scope()?;
  ok(app.sv().passkeys.history(&scope, &code).await?)
}

#[derive(Debug, Deserialize)]
pub struct ClaimReq {
  pub device_id: String,
  pub code: String,
  #[serde(flatten)]
  pub profile: Profile,
}

/// Devices claim before they hold a token, the device id is the credential.
pub async fn claim(
  State(app): State<Arc<AppState>>,
  Json(req): Json<ClaimReq>,
) -> Res<Claimed> {
  ok(app.sv().students.claim(&req.device_id, &req.code, req.profile).await?)
}

pub async fn owned(
  State(app): State<Arc<AppState>>,
  identity: Identity,
) -> Res<Vec<Owned>> {
  ok(app.sv().students.owned(identity.student_id()?).await?)
}

pub async fn switch(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(code): Path<String>,
) -> Res<Vec<Owned>> {
  let student_id = identity.student_id()?;
  let students = app.sv().students;
  students.switch_active(student_id, &code).await?;
  ok(students.owned(student_id).await?)
}

#[derive(Debug, Deserialize)]
pub struct OrderReq {
  pub kind: PaymentKind,
  pub duration_months: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct OrderRes {
  pub payment: payment::Model,
  pub order: OrderHandle,
  /// Public key the client opens checkout with
  pub key_id: String,
}

pub async fn order(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(code): Path<String>,
  Json(req): Json<OrderReq>,
) -> Res<OrderRes> {
  let student_id = identity.student_id()?;
  let (payment, order) = app
    .sv()
    .checkout
    .start(student_id, &code, req.kind, req.duration_months)
    .await?;

  ok(OrderRes { payment, order, key_id: app.config.gateway.key_id.clone() })
}

#[derive(Debug, Deserialize)]
pub struct VerifyReq {
  pub order_id: String,
  pub payment_id: String,
  pub signature: String,
}

/// The signature is the proof of payment, the token only gates the route.
pub async fn verify(
  State(app): State<Arc<AppState>>,
  _: Identity,
  Json(req): Json<VerifyReq>,
) -> Res<Settlement> {
  let settlement = app
    .sv()
    .checkout
    .verify(&req.order_id, &req.payment_id, &req.signature)
    .await?;
  ok(settlement)
}

#[derive(Debug, Deserialize)]
pub struct FailureReq {
  pub order_id: String,
  pub payment_id: Option<String>,
  pub reason: Option<String>,
}

pub async fn failure(
  State(app): State<Arc<AppState>>,
  _: Identity,
  Json(req): Json<FailureReq>,
) -> Res<payment::Model> {
  let payment = app
    .sv()
    .checkout
    .fail(&req.order_id, req.payment_id.as_deref(), req.reason.as_deref())
    .await?;
  ok(payment)
}

#[derive(Debug, Deserialize)]
pub struct RefundReq {
  pub reason: String,
}

pub async fn refund(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(id): Path<String>,
  Json(req): Json<RefundReq>,
) -> Res<enrollment::Model> {
  let student_id = identity.student_id()?;
  let enrollments = app.sv().enrollments;

  let enrollment = enrollments.by_id(&id).await?;
  if enrollment.student_id != student_id {
    return Err(Error::not_found("Enrollment not found"));
  }
  ok(enrollments.request_refund(&id, &req.reason).await?)
}

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
  pub device_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AccessRes {
  pub granted: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub reason: Option<Denial>,
}

pub async fn access(
  State(app): State<Arc<AppState>>,
  identity: Identity,
  Path(course_id): Path<String>,
  Query(query): Query<AccessQuery>,
) -> Res<AccessRes> {
  let subject = match (identity.role, &identity.passkey_id) {
    (Role::Student, _) => Subject::Student(&identity.subject_id),
    (_, Some(code)) => Subject::Passkey(code),
    _ => {
      return Err(Error::Authorization("no student or passkey on token".into()));
    }
  };

  let decision = app
    .sv()
    .access
    .evaluate(subject, &course_id, query.device_id.as_deref())
    .await?;

  ok(match decision {
    Decision::Granted => AccessRes { granted: true, reason: None },
    Decision::Denied(denial) => {
      AccessRes { granted: false, reason: Some(denial) }
    }
  })
}
