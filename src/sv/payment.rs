//! Payment ledger - gateway orders and their settlement

use std::collections::HashMap;

use crate::{
  entity::{PaymentKind, PaymentStatus, course, passkey, payment},
  gateway::{self, OrderHandle, OrderRequest, PaymentGateway, RemoteStatus},
  prelude::*,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
  pub platform_fee: i64,
  pub course_fee: i64,
}

impl FeeBreakdown {
  /// Fees for an order of `kind` on `course`. Both fees are priced for the
  /// course term, a renewal scales them to `months` rounding up.
  pub fn price(
    kind: PaymentKind,
    platform_fee: i64,
    course: &course::Model,
    months: i32,
  ) -> Result<Self> {
    let course_fee = course.course_fee();
    let (platform_fee, course_fee) = match kind {
      PaymentKind::PlatformFee => (platform_fee, 0),
      PaymentKind::CourseFee => (0, course_fee),
      PaymentKind::Combined => (platform_fee, course_fee),
      PaymentKind::Renewal => {
        let term = course.term_months().unwrap_or(months);
        (
          prorate(platform_fee, months, term)?,
          prorate(course_fee, months, term)?,
        )
      }
    };
    Ok(Self { platform_fee, course_fee })
  }

  pub fn total(&self) -> i64 {
    self.platform_fee + self.course_fee
  }
}

fn prorate(fee: i64, months: i32, term: i32) -> Result<i64> {
  let term = i64::from(term.max(1));
  let scaled = fee
    .checked_mul(i64::from(months))
    .ok_or_else(|| Error::validation("amount out of range"))?;
  Ok((scaled + term - 1) / term)
}

fn minor_units(amount: i64) -> Result<i64> {
  amount
    .checked_mul(100)
    .ok_or_else(|| Error::validation("amount out of range"))
}

/// Handle for an order that is already open at the gateway.
pub fn order_handle(payment: &payment::Model) -> Result<OrderHandle> {
  Ok(OrderHandle {
    id: payment.order_id.clone(),
    amount: minor_units(payment.amount)?,
    currency: payment.currency.clone(),
  })
}

#[derive(Debug, Clone)]
pub struct OrderDraft {
  pub passkey_id: String,
  pub course_id: String,
  pub institute_id: String,
  pub student_id: Option<String>,
  pub device_id: Option<String>,
  pub kind: PaymentKind,
  pub duration_months: i32,
  pub amount: i64,
  pub currency: String,
  pub fees: FeeBreakdown,
}

impl OrderDraft {
  pub fn for_passkey(
    passkey: &passkey::Model,
    kind: PaymentKind,
    duration_months: i32,
    currency: &str,
    fees: FeeBreakdown,
  ) -> Self {
    Self {
      passkey_id: passkey.id.clone(),
      course_id: passkey.course_id.clone(),
      institute_id: passkey.institute_id.clone(),
      student_id: passkey.student_id.clone(),
      device_id: passkey.device_id.clone(),
      kind,
      duration_months,
      amount: fees.total(),
      currency: currency.to_string(),
      fees,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Verified {
  pub payment: payment::Model,
  /// The same triple was already settled earlier
  pub replay: bool,
}

pub struct Payments<'a, C> {
  db: &'a C,
  gateway: &'a dyn PaymentGateway,
  secret: &'a str,
}

impl<'a, C: ConnectionTrait> Payments<'a, C> {
  pub fn new(
    db: &'a C,
    gateway: &'a dyn PaymentGateway,
    secret: &'a str,
  ) -> Self {
    Self { db, gateway, secret }
  }

  pub async fn by_order(&self, order_id: &str) -> Result<payment::Model> {
    payment::Entity::find_by_id(order_id)
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Payment not found"))
  }

  /// `CREATED` orders for a passkey opened after `since`, oldest first.
  pub async fn open_orders(
    &self,
    passkey_id: &str,
    since: DateTime,
  ) -> Result<Vec<payment::Model>> {
    Ok(
      payment::Entity::find()
        .filter(payment::Column::PasskeyId.eq(passkey_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Created))
        .filter(payment::Column::CreatedAt.gt(since))
        .order_by_asc(payment::Column::CreatedAt)
        .all(self.db)
        .await?,
    )
  }

  /// Opens a gateway order and records it as `CREATED`. The amounts are
  /// frozen here, repricing needs a new order.
  pub async fn create_order(
    &self,
    draft: OrderDraft,
  ) -> Result<(payment::Model, OrderHandle)> {
    let (fees, amount) = (draft.fees, draft.amount);
    if fees.platform_fee < 0 || fees.course_fee < 0 {
      return Err(Error::validation("fees cannot be negative"));
    }
    if amount <= 0 {
      return Err(Error::validation("amount must be positive"));
    }
    if amount != fees.total() {
      return Err(Error::validation(format!(
        "amount {amount} does not match fee breakdown {}",
        fees.total()
      )));
    }

    let minor = minor_units(amount)?;
    let receipt =
      format!("pk_{}_{}", draft.passkey_id, utils::now().and_utc().timestamp());
    let notes = HashMap::from([
      ("passkey_id".to_string(), draft.passkey_id.clone()),
      ("course_id".to_string(), draft.course_id.clone()),
      ("institute_id".to_string(), draft.institute_id.clone()),
    ]);

    let handle = self
      .gateway
      .create_order(OrderRequest {
        amount: minor,
        currency: draft.currency.clone(),
        receipt,
        notes,
      })
      .await?;

    if handle.amount != minor {
      return Err(Error::Gateway(format!(
        "order {} opened for {} instead of {minor}",
        handle.id, handle.amount
      )));
    }

    let payment = payment::ActiveModel {
      order_id: Set(handle.id.clone()),
      payment_id: Set(None),
      institute_id: Set(draft.institute_id),
      course_id: Set(draft.course_id),
      passkey_id: Set(draft.passkey_id),
      student_id: Set(draft.student_id),
      device_id: Set(draft.device_id),
      kind: Set(draft.kind),
      duration_months: Set(draft.duration_months),
      amount: Set(amount),
      platform_fee: Set(fees.platform_fee),
      course_fee: Set(fees.course_fee),
      currency: Set(draft.currency),
      status: Set(PaymentStatus::Created),
      signature: Set(None),
      failure_reason: Set(None),
      created_at: Set(utils::now()),
      completed_at: Set(None),
      applied_at: Set(None),
    }
    .insert(self.db)
    .await?;

    info!(
      "Opened order {} for passkey {} ({amount} {})",
      payment.order_id, payment.passkey_id, payment.currency
    );
    Ok((payment, handle))
  }

  /// Checks the checkout signature and settles the order. Replaying an
  /// already settled triple succeeds without touching the row.
  pub async fn verify(
    &self,
    order_id: &str,
    payment_id: &str,
    signature: &str,
  ) -> Result<Verified> {
    if payment_id.trim().is_empty() {
      return Err(Error::validation("payment id is required"));
    }
    let valid =
      gateway::verify_signature(self.secret, order_id, payment_id, signature)?;
    if !valid {
      warn!("Signature mismatch for order {order_id}");
      return Err(Error::validation("payment signature mismatch"));
    }

    let payment = self.by_order(order_id).await?;
    match payment.status {
      PaymentStatus::Completed => return settled(payment, payment_id),
      PaymentStatus::Failed => {
        return Err(Error::conflict("FAILED", "Payment already failed"));
      }
      PaymentStatus::Created => {}
    }

    let taken = payment::Entity::find()
      .filter(payment::Column::PaymentId.eq(payment_id))
      .one(self.db)
      .await?;
    if taken.is_some() {
      return Err(Error::conflict(
        "COMPLETED",
        "Gateway payment already settles another order",
      ));
    }

    let res = payment::Entity::update_many()
      .set(payment::ActiveModel {
        payment_id: Set(Some(payment_id.to_string())),
        signature: Set(Some(signature.trim().to_string())),
        status: Set(PaymentStatus::Completed),
        completed_at: Set(Some(utils::now())),
        ..Default::default()
      })
      .filter(payment::Column::OrderId.eq(order_id))
      .filter(payment::Column::Status.eq(PaymentStatus::Created))
      .exec(self.db)
      .await?;

    let payment = self.by_order(order_id).await?;
    if res.rows_affected == 0 {
      // settled concurrently
      return settled(payment, payment_id);
    }

    info!("Payment {payment_id} completed order {order_id}");
    Ok(Verified { payment, replay: false })
  }

  /// Records that a completed payment reached the passkey. Fails if another
  /// verification applied it first.
  pub async fn mark_applied(&self, order_id: &str) -> Result<payment::Model> {
    let res = payment::Entity::update_many()
      .set(payment::ActiveModel {
        applied_at: Set(Some(utils::now())),
        failure_reason: Set(None),
        ..Default::default()
      })
      .filter(payment::Column::OrderId.eq(order_id))
      .filter(payment::Column::Status.eq(PaymentStatus::Completed))
      .filter(payment::Column::AppliedAt.is_null())
      .exec(self.db)
      .await?;

    if res.rows_affected == 0 {
      return Err(Error::conflict("COMPLETED", "Payment was already applied"));
    }
    self.by_order(order_id).await
  }

  /// Keeps a captured payment on record when it cannot be applied. The order
  /// stays `COMPLETED` so the money is never lost, `failure_reason` says why.
  pub async fn hold_unapplied(
    &self,
    order_id: &str,
    reason: &str,
  ) -> Result<payment::Model> {
    payment::Entity::update_many()
      .set(payment::ActiveModel {
        failure_reason: Set(Some(format!("captured, not applied: {reason}"))),
        ..Default::default()
      })
      .filter(payment::Column::OrderId.eq(order_id))
      .filter(payment::Column::Status.eq(PaymentStatus::Completed))
      .filter(payment::Column::AppliedAt.is_null())
      .exec(self.db)
      .await?;

    self.by_order(order_id).await
  }

  /// Marks a `CREATED` order as `FAILED`, but only once the gateway confirms
  /// the failure.
  pub async fn sync_failure(
    &self,
    order_id: &str,
    payment_id: Option<&str>,
    reason: Option<&str>,
  ) -> Result<payment::Model> {
    let payment = self.by_order(order_id).await?;
    match payment.status {
      PaymentStatus::Failed => return Ok(payment),
      PaymentStatus::Completed => {
        return Err(Error::conflict("COMPLETED", "Payment already completed"));
      }
      PaymentStatus::Created => {}
    }

    let Some(payment_id) = payment_id else {
      debug!("Failure for {order_id} reported without a gateway payment");
      return Ok(payment);
    };

    let remote = self.gateway.fetch_payment(payment_id).await?;
    if remote != RemoteStatus::Failed {
      debug!("Gateway reports {remote:?} for {payment_id}, keeping order open");
      return Ok(payment);
    }

    payment::Entity::update_many()
      .set(payment::ActiveModel {
        status: Set(PaymentStatus::Failed),
        failure_reason: Set(Some(
          reason.unwrap_or("declined by gateway").to_string(),
        )),
        ..Default::default()
      })
      .filter(payment::Column::OrderId.eq(order_id))
      .filter(payment::Column::Status.eq(PaymentStatus::Created))
      .exec(self.db)
      .await?;

    warn!("Order {order_id} failed at the gateway");
    self.by_order(order_id).await
  }
}

fn settled(payment: payment::Model, payment_id: &str) -> Result<Verified> {
  if payment.payment_id.as_deref() == Some(payment_id) {
    debug!("Replayed verification for order {}", payment.order_id);
    Ok(Verified { payment, replay: true })
  } else {
    Err(Error::conflict("COMPLETED", "Order settled by a different payment"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    auth::Scope,
    entity::PricingModel,
    gateway::sign,
    sv::{
      Catalog, Passkeys,
      testing::{self, FakeGateway, SECRET},
    },
  };

  async fn claimed_passkey(db: &DatabaseConnection) -> passkey::Model {
    testing::seed_course(db, "C1", "inst-1", PricingModel::Subscription).await;
    testing::seed_student(db, "stu-1", "dev-1").await;

    let sv = Passkeys::new(db);
    let scope = Scope::Institute("inst-1".into());
    let key = sv.generate(&scope, "p", "C1", 1).await.unwrap().remove(0);
    sv.claim(&key.id, "stu-1", "dev-1").await.unwrap()
  }

  fn combined(key: &passkey::Model) -> OrderDraft {
    OrderDraft::for_passkey(
      key,
      PaymentKind::Combined,
      6,
      "INR",
      FeeBreakdown { platform_fee: 90, course_fee: 2000 },
    )
  }

  #[tokio::test]
  async fn create_order_sends_minor_units() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();

    let (payment, handle) = Payments::new(&db, &gateway, SECRET)
      .create_order(combined(&key))
      .await
      .unwrap();

    assert_eq!(payment.status, PaymentStatus::Created);
    assert_eq!(payment.amount, 2090);
    assert_eq!(payment.course_fee, 2000);
    assert_eq!(handle.amount, 209_000);
    assert_eq!(gateway.last_request().unwrap().amount, 209_000);
  }

  #[tokio::test]
  async fn amount_must_match_breakdown() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();

    let mut draft = combined(&key);
    draft.amount = 2000;

    assert!(matches!(
      Payments::new(&db, &gateway, SECRET).create_order(draft).await,
      Err(Error::Validation(_))
    ));
    assert!(gateway.last_request().is_none());
  }

  #[tokio::test]
  async fn gateway_failure_surfaces_and_records_nothing() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();
    gateway.fail(true);

    let res =
      Payments::new(&db, &gateway, SECRET).create_order(combined(&key)).await;
    assert!(matches!(res, Err(Error::Gateway(_))));
    assert_eq!(payment::Entity::find().count(&db).await.unwrap(), 0);
  }

  #[tokio::test]
  async fn bad_signature_leaves_payment_untouched() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();
    let sv = Payments::new(&db, &gateway, SECRET);
    let (payment, _) = sv.create_order(combined(&key)).await.unwrap();

    let forged = sign("other-secret", &payment.order_id, "pay_1");
    assert!(matches!(
      sv.verify(&payment.order_id, "pay_1", &forged).await,
      Err(Error::Validation(_))
    ));

    let stored = sv.by_order(&payment.order_id).await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Created);
    assert!(stored.payment_id.is_none());
  }

  #[tokio::test]
  async fn verify_is_idempotent() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();
    let sv = Payments::new(&db, &gateway, SECRET);
    let (payment, _) = sv.create_order(combined(&key)).await.unwrap();
    let order_id = payment.order_id.as_str();
    let signature = sign(SECRET, order_id, "pay_1");

    let first = sv.verify(order_id, "pay_1", &signature).await.unwrap();
    assert!(!first.replay);
    assert!(first.payment.is_completed());

    let second = sv.verify(order_id, "pay_1", &signature).await.unwrap();
    assert!(second.replay);
    assert_eq!(second.payment, first.payment);

    let completed = payment::Entity::find()
      .filter(payment::Column::Status.eq(PaymentStatus::Completed))
      .count(&db)
      .await
      .unwrap();
    assert_eq!(completed, 1);

    let other = sign(SECRET, order_id, "pay_2");
    assert!(matches!(
      sv.verify(order_id, "pay_2", &other).await,
      Err(Error::Conflict { .. })
    ));
  }

  #[tokio::test]
  async fn failure_needs_gateway_confirmation() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();
    let sv = Payments::new(&db, &gateway, SECRET);
    let (payment, _) = sv.create_order(combined(&key)).await.unwrap();
    let order_id = payment.order_id.as_str();

    gateway.set_remote(RemoteStatus::Authorized);
    let open = sv.sync_failure(order_id, Some("pay_1"), None).await.unwrap();
    assert_eq!(open.status, PaymentStatus::Created);

    gateway.set_remote(RemoteStatus::Failed);
    let failed = sv
      .sync_failure(order_id, Some("pay_1"), Some("card declined"))
      .await
      .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("card declined"));

    let signature = sign(SECRET, order_id, "pay_1");
    assert!(matches!(
      sv.verify(order_id, "pay_1", &signature).await,
      Err(Error::Conflict { .. })
    ));
  }

  #[tokio::test]
  async fn renewal_price_scales_with_the_term() {
    let db = testing::setup_db().await;
    testing::seed_course(&db, "C1", "inst-1", PricingModel::Subscription).await;
    let course = Catalog::new(&db).by_id("C1").await.unwrap();
    let price = |kind, months| FeeBreakdown::price(kind, 90, &course, months);

    // the course fee covers six months, a part month rounds up
    let monthly = price(PaymentKind::Renewal, 1).unwrap();
    assert_eq!(monthly, FeeBreakdown { platform_fee: 15, course_fee: 334 });
    assert_eq!(monthly.total(), 349);

    let yearly = price(PaymentKind::Renewal, 12).unwrap();
    assert_eq!(yearly, FeeBreakdown { platform_fee: 180, course_fee: 4000 });

    let first = price(PaymentKind::Combined, 6).unwrap();
    assert_eq!(first.total(), 2090);
    assert_eq!(price(PaymentKind::CourseFee, 6).unwrap().platform_fee, 0);
    assert_eq!(price(PaymentKind::PlatformFee, 6).unwrap().course_fee, 0);
  }

  #[tokio::test]
  async fn captured_payment_is_applied_once() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();
    let sv = Payments::new(&db, &gateway, SECRET);
    let (payment, _) = sv.create_order(combined(&key)).await.unwrap();
    let order_id = payment.order_id.as_str();
    let signature = sign(SECRET, order_id, "pay_1");

    let captured = sv.verify(order_id, "pay_1", &signature).await.unwrap();
    assert!(captured.payment.is_unapplied());

    let held = sv.hold_unapplied(order_id, "passkey revoked").await.unwrap();
    assert!(held.is_completed());
    assert_eq!(
      held.failure_reason.as_deref(),
      Some("captured, not applied: passkey revoked")
    );

    let applied = sv.mark_applied(order_id).await.unwrap();
    assert!(!applied.is_unapplied());
    assert!(applied.failure_reason.is_none());
    assert!(matches!(
      sv.mark_applied(order_id).await,
      Err(Error::Conflict { .. })
    ));

    // an applied payment is never held afterwards
    let kept = sv.hold_unapplied(order_id, "late").await.unwrap();
    assert!(kept.failure_reason.is_none());
  }

  #[tokio::test]
  async fn open_orders_skip_settled_and_stale() {
    let db = testing::setup_db().await;
    let key = claimed_passkey(&db).await;
    let gateway = FakeGateway::default();
    let sv = Payments::new(&db, &gateway, SECRET);
    let (payment, _) = sv.create_order(combined(&key)).await.unwrap();

    let before = utils::now() - TimeDelta::minutes(5);
    let open = sv.open_orders(&key.id, before).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(order_handle(&open[0]).unwrap().amount, 209_000);

    let after = utils::now() + TimeDelta::minutes(5);
    assert!(sv.open_orders(&key.id, after).await.unwrap().is_empty());

    let signature = sign(SECRET, &payment.order_id, "pay_1");
    sv.verify(&payment.order_id, "pay_1", &signature).await.unwrap();
    assert!(sv.open_orders(&key.id, before).await.unwrap().is_empty());
  }
}
