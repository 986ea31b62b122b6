//! Enrollment ledger - the durable grant that survives passkey churn

use uuid::Uuid;

use crate::{
  entity::{PaymentKind, PaymentStatus, enrollment, passkey, payment},
  prelude::*,
};

pub const REFUND_WINDOW_DAYS: i64 = 7;

type Json = json::Value;

pub struct Enrollments<'a, C> {
  db: &'a C,
}

impl<'a, C: ConnectionTrait> Enrollments<'a, C> {
  pub fn new(db: &'a C) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, id: &str) -> Result<enrollment::Model> {
    enrollment::Entity::find()
      .filter(enrollment::Column::Id.eq(id))
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Enrollment not found"))
  }

  pub async fn by_student_course(
    &self,
    student_id: &str,
    course_id: &str,
  ) -> Result<Option<enrollment::Model>> {
    Ok(
      enrollment::Entity::find_by_id((
        student_id.to_string(),
        course_id.to_string(),
      ))
      .one(self.db)
      .await?,
    )
  }

  /// Records the grant backed by `payment`. There is one row per student and
  /// course: a renewal extends it and a replayed payment leaves it as is.
  /// The term is the passkey's own, so both read the same expiry.
  pub async fn enroll(
    &self,
    passkey_id: &str,
    course_id: &str,
    student_id: &str,
    payment: &payment::Model,
  ) -> Result<enrollment::Model> {
    if !payment.is_completed() || payment.passkey_id != passkey_id {
      return Err(Error::validation(
        "enrollment needs a completed payment for this passkey",
      ));
    }
    let payment_id = payment
      .payment_id
      .clone()
      .ok_or_else(|| Error::validation("payment has no gateway id"))?;

    let passkey = passkey::Entity::find_by_id(passkey_id)
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Passkey not found"))?;
    if passkey.course_id != course_id {
      return Err(Error::validation("passkey is for another course"));
    }

    let existing = self.by_student_course(student_id, course_id).await?;
    if let Some(existing) = &existing
      && existing.payment_id == payment_id
    {
      return Ok(existing.clone());
    }

    let enrolled_at = utils::now();
    let status = passkey.effective_status(enrolled_at);
    if !status.grants_content() {
      return Err(Error::conflict(status, "Passkey does not grant content yet"));
    }

    let paid = match payment.kind {
      PaymentKind::Renewal => payment.amount,
      _ => settled_total(self.db, passkey_id).await?,
    };
    let (amount_paid, expires_at) = match &existing {
      // a second passkey for a course the student already holds
      Some(existing) if existing.passkey_id != passkey.id => {
        let expires_at = if existing.is_active {
          later(existing.expires_at, passkey.expires_at)
        } else {
          passkey.expires_at
        };
        (existing.amount_paid + paid, expires_at)
      }
      Some(existing) if payment.kind == PaymentKind::Renewal => {
        (existing.amount_paid + paid, passkey.expires_at)
      }
      _ => (paid, passkey.expires_at),
    };

    let model = match existing {
      Some(existing) => {
        let mut active: enrollment::ActiveModel = existing.into();
        active.passkey_id = Set(passkey.id.clone());
        active.institute_id = Set(passkey.institute_id.clone());
        active.amount_paid = Set(amount_paid);
        active.currency = Set(payment.currency.clone());
        active.payment_id = Set(payment_id);
        active.enrolled_at = Set(enrolled_at);
        active.expires_at = Set(expires_at);
        active.is_active = Set(true);
        active.update(self.db).await?
      }
      None => {
        enrollment::ActiveModel {
          student_id: Set(student_id.to_string()),
          course_id: Set(course_id.to_string()),
          id: Set(Uuid::new_v4().to_string()),
          passkey_id: Set(passkey.id.clone()),
          institute_id: Set(passkey.institute_id.clone()),
          amount_paid: Set(amount_paid),
          currency: Set(payment.currency.clone()),
          payment_method: Set("online".into()),
          payment_id: Set(payment_id),
          enrolled_at: Set(enrolled_at),
          expires_at: Set(expires_at),
          is_active: Set(true),
          metadata: Set(None),
        }
        .insert(self.db)
        .await?
      }
    };

    info!(
      "Student {student_id} enrolled in {course_id} until {}",
      model.expires_at.map_or("lifetime".into(), utils::format_date)
    );
    Ok(model)
  }

  pub async fn request_refund(
    &self,
    id: &str,
    reason: &str,
  ) -> Result<enrollment::Model> {
    let enrollment = self.by_id(id).await?;
    if !enrollment.is_active {
      return Err(Error::conflict("INACTIVE", "Enrollment is not active"));
    }

    let now = utils::now();
    if now - enrollment.enrolled_at > TimeDelta::days(REFUND_WINDOW_DAYS) {
      let days = REFUND_WINDOW_DAYS;
      return Err(Policy::RefundWindowClosed { days }.into());
    }

    let metadata = stamp(
      enrollment.metadata.clone(),
      "refund",
      json::json!({
        "requested_at": now,
        "reason": reason,
      }),
    );

    let mut active: enrollment::ActiveModel = enrollment.into();
    active.is_active = Set(false);
    active.metadata = Set(Some(metadata));
    let refunded = active.update(self.db).await?;

    info!("Refund requested for enrollment {id}");
    Ok(refunded)
  }

  /// Deactivates a grant whose term has passed. Returns whether this call
  /// made the change.
  pub async fn expire(&self, enrollment: &enrollment::Model) -> Result<bool> {
    let metadata = stamp(
      enrollment.metadata.clone(),
      "expired_at",
      json::json!(utils::now()),
    );

    let res = enrollment::Entity::update_many()
      .set(enrollment::ActiveModel {
        is_active: Set(false),
        metadata: Set(Some(metadata)),
        ..Default::default()
      })
      .filter(enrollment::Column::Id.eq(&enrollment.id))
      .filter(enrollment::Column::IsActive.eq(true))
      .exec(self.db)
      .await?;

    Ok(res.rows_affected == 1)
  }

  pub async fn deactivate_expired(&self, now: DateTime) -> Result<u64> {
    let lapsed = enrollment::Entity::find()
      .filter(enrollment::Column::IsActive.eq(true))
      .filter(enrollment::Column::ExpiresAt.lte(now))
      .all(self.db)
      .await?;

    let mut expired = 0;
    for enrollment in &lapsed {
      if self.expire(enrollment).await? {
        expired += 1;
      }
    }
    Ok(expired)
  }
}

/// `None` is a term that never ends.
fn later(a: Option<DateTime>, b: Option<DateTime>) -> Option<DateTime> {
  Some(a?.max(b?))
}

/// Sum of the settled first-term payments for a passkey.
async fn settled_total(
  db: &impl ConnectionTrait,
  passkey_id: &str,
) -> Result<i64> {
  let payments = payment::Entity::find()
    .filter(payment::Column::PasskeyId.eq(passkey_id))
    .filter(payment::Column::Status.eq(PaymentStatus::Completed))
    .filter(payment::Column::Kind.ne(PaymentKind::Renewal))
    .all(db)
    .await?;

  Ok(payments.iter().map(|payment| payment.amount).sum())
}

fn stamp(metadata: Option<Json>, key: &str, value: Json) -> Json {
  let mut map = match metadata {
    Some(Json::Object(map)) => map,
    _ => json::Map::new(),
  };
  map.insert(key.to_string(), value);
  Json::Object(map)
}
