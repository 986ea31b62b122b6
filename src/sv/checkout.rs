//! Checkout - opening orders for a passkey and applying verified payments

use serde::Serialize;

use crate::{
  config::Config,
  entity::{PaymentKind, Status, enrollment, passkey, payment},
  gateway::{OrderHandle, PaymentGateway},
  notify::{self, NotificationSender},
  prelude::*,
  sv::{
    self,
    payment::{FeeBreakdown, OrderDraft, order_handle},
  },
};

#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
  pub payment: payment::Model,
  pub passkey: passkey::Model,
  /// Present once the passkey grants content
  pub enrollment: Option<enrollment::Model>,
  pub replay: bool,
}

pub struct Checkout<'a, C> {
  db: &'a C,
  gateway: &'a dyn PaymentGateway,
  notifier: &'a dyn NotificationSender,
  config: &'a Config,
}

impl<'a, C: ConnectionTrait + TransactionTrait> Checkout<'a, C> {
  pub fn new(
    db: &'a C,
    gateway: &'a dyn PaymentGateway,
    notifier: &'a dyn NotificationSender,
    config: &'a Config,
  ) -> Self {
    Self { db, gateway, notifier, config }
  }

  fn payments<'c, T: ConnectionTrait>(
    &'c self,
    db: &'c T,
  ) -> sv::Payments<'c, T> {
    sv::Payments::new(db, self.gateway, &self.config.gateway.key_secret)
  }

  /// Prices and opens an order for one of the student's passkeys. While an
  /// order is open, asking again for the same order returns it and an order
  /// that would collect one of its fees a second time is refused.
  pub async fn start(
    &self,
    student_id: &str,
    code: &str,
    kind: PaymentKind,
    duration_months: Option<i32>,
  ) -> Result<(payment::Model, OrderHandle)> {
    let passkeys = sv::Passkeys::new(self.db);
    let passkey = passkeys.by_id(code).await?;
    // someone else's passkey reads like a missing one
    if passkey.student_id.as_deref() != Some(student_id) {
      return Err(Error::not_found("Passkey not found"));
    }
    let course = sv::Catalog::new(self.db).by_id(&passkey.course_id).await?;

    let now = utils::now();
    let status = passkey.effective_status(now);
    let months = match kind {
      PaymentKind::Renewal => {
        if status != Status::Expired {
          return Err(Error::conflict(status, "Only expired passkeys renew"));
        }
        let months = duration_months.unwrap_or(1);
        if !matches!(months, 1 | 12) {
          return Err(Error::validation("renewal must be for 1 or 12 months"));
        }
        months
      }
      _ => {
        if status.after_payment(kind).is_none() {
          return Err(Error::conflict(
            status,
            "Payment does not apply in this state",
          ));
        }
        passkey.duration_months
      }
    };
    let fees =
      FeeBreakdown::price(kind, self.config.platform_fee, &course, months)?;

    let hold = TimeDelta::from_std(self.config.order_hold)
      .map_err(|_| Error::Internal("order hold out of range".into()))?;
    let payments = self.payments(self.db);
    for open in payments.open_orders(&passkey.id, now - hold).await? {
      if !open.kind.overlaps(kind) {
        continue;
      }
      if open.kind == kind
        && open.duration_months == months
        && open.amount == fees.total()
      {
        debug!("Reusing open order {} for {}", open.order_id, passkey.id);
        let handle = order_handle(&open)?;
        return Ok((open, handle));
      }
      return Err(Error::conflict(
        status,
        "Another order for this fee is still open",
      ));
    }

    let draft =
      OrderDraft::for_passkey(&passkey, kind, months, &course.currency, fees);
    let order = payments.create_order(draft).await?;

    passkeys.await_payment(&passkey.id, student_id).await?;
    Ok(order)
  }

  /// Verifies a checkout and applies it to the passkey, the enrollment
  /// ledger and the student's owned entry. The ledger commits the captured
  /// payment before the rest, so a payment that no longer applies stays
  /// `COMPLETED` with the reason kept in `failure_reason`. Verifying such a
  /// payment again retries it.
  pub async fn verify(
    &self,
    order_id: &str,
    payment_id: &str,
    signature: &str,
  ) -> Result<Settlement> {
    let payments = self.payments(self.db);
    let payment =
      payments.verify(order_id, payment_id, signature).await?.payment;
    if !payment.is_unapplied() {
      return self.replayed(payment).await;
    }

    let (payment, passkey, enrollment) = match self.apply(&payment).await {
      Ok(applied) => applied,
      Err(err) => {
        let stored = payments.by_order(order_id).await?;
        if !stored.is_unapplied() {
          // a concurrent verification got there first
          return self.replayed(stored).await;
        }
        error!("Payment {payment_id} for order {order_id} not applied: {err}");
        let reason = err.to_string();
        if let Err(hold) = payments.hold_unapplied(order_id, &reason).await {
          error!("Could not flag order {order_id}: {hold}");
        }
        return Err(err);
      }
    };

    if let Some(enrollment) = &enrollment {
      self.notify_access(enrollment).await;
    }

    Ok(Settlement { payment, passkey, enrollment, replay: false })
  }

  async fn apply(
    &self,
    payment: &payment::Model,
  ) -> Result<(payment::Model, passkey::Model, Option<enrollment::Model>)> {
    let txn = self.db.begin().await?;
    let passkeys = sv::Passkeys::new(&txn);
    let order_id = payment.order_id.as_str();

    let passkey = match payment.kind {
      PaymentKind::Renewal => {
        passkeys
          .renew(&payment.passkey_id, payment.duration_months, order_id)
          .await?
      }
      _ => passkeys.record_payment(&payment.passkey_id, order_id).await?,
    };

    let enrollment = match &passkey.student_id {
      Some(student_id)
        if passkey.effective_status(utils::now()).grants_content() =>
      {
        let enrollment = sv::Enrollments::new(&txn)
          .enroll(&passkey.id, &passkey.course_id, student_id, payment)
          .await?;
        Some(enrollment)
      }
      _ => None,
    };
    sv::Students::new(&txn).sync_terms(&passkey).await?;
    let payment = self.payments(&txn).mark_applied(order_id).await?;

    txn.commit().await?;
    Ok((payment, passkey, enrollment))
  }

  async fn replayed(&self, payment: payment::Model) -> Result<Settlement> {
    let passkey =
      sv::Passkeys::new(self.db).by_id(&payment.passkey_id).await?;
    let enrollment = match &passkey.student_id {
      Some(student_id) => {
        sv::Enrollments::new(self.db)
          .by_student_course(student_id, &passkey.course_id)
          .await?
      }
      None => None,
    };
    Ok(Settlement { payment, passkey, enrollment, replay: true })
  }

  pub async fn fail(
    &self,
    order_id: &str,
    payment_id: Option<&str>,
    reason: Option<&str>,
  ) -> Result<payment::Model> {
    self.payments(self.db).sync_failure(order_id, payment_id, reason).await
  }

  async fn notify_access(&self, enrollment: &enrollment::Model) {
    let phone = match sv::Students::new(self.db)
      .by_id(&enrollment.student_id)
      .await
    {
      Ok(student) => student.phone_number,
      Err(err) => {
        warn!("No contact for student {}: {err}", enrollment.student_id);
        return;
      }
    };

    let until = match enrollment.expires_at {
      Some(at) => format!("until {}", utils::format_date(at)),
      None => "with lifetime access".to_string(),
    };
    let message = format!(
      "Payment received. Course {} is unlocked {until}.",
      enrollment.course_id
    );
    notify::best_effort(self.notifier, phone.as_deref(), &message).await;
  }
}
