//! Passkey registry - generation, claiming and every status transition

use std::collections::HashSet;

use sea_orm::sea_query::Expr;

use crate::{
  auth::Scope,
  code,
  entity::{PaymentKind, Status, passkey, passkey_event, payment},
  prelude::*,
  sv,
};

pub const MAX_BATCH: u32 = 100;
const CODE_ATTEMPTS: usize = 16;

pub struct Passkeys<'a, C> {
  db: &'a C,
}

impl<'a, C: ConnectionTrait + TransactionTrait> Passkeys<'a, C> {
  pub fn new(db: &'a C) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, code: &str) -> Result<passkey::Model> {
    let code = code::normalize(code)?;
    passkey::Entity::find_by_id(&code)
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Passkey not found"))
  }

  pub async fn history(
    &self,
    scope: &Scope,
    code: &str,
  ) -> Result<Vec<passkey_event::Model>> {
    let passkey = self.owned(scope, code).await?;

    Ok(
      passkey_event::Entity::find()
        .filter(passkey_event::Column::PasskeyId.eq(passkey.id))
        .order_by_asc(passkey_event::Column::Id)
        .all(self.db)
        .await?,
    )
  }

  /// Issues `count` fresh `PENDING` passkeys for one of the caller's courses.
  pub async fn generate(
    &self,
    scope: &Scope,
    actor: &str,
    course_id: &str,
    count: u32,
  ) -> Result<Vec<passkey::Model>> {
    if !(1..=MAX_BATCH).contains(&count) {
      return Err(Error::validation(format!(
        "count must be between 1 and {MAX_BATCH}"
      )));
    }

    let course = sv::Catalog::new(self.db).owned(scope, course_id).await?;

    let txn = self.db.begin().await?;

    let mut codes = HashSet::with_capacity(count as usize);
    while codes.len() < count as usize {
      codes.insert(unique_code(&txn, &codes).await?);
    }

    let now = utils::now();
    let passkeys = codes.iter().map(|id| passkey::ActiveModel {
      id: Set(id.clone()),
      institute_id: Set(course.institute_id.clone()),
      course_id: Set(course.id.clone()),
      student_id: Set(None),
      device_id: Set(None),
      payment_id: Set(None),
      status: Set(Status::Pending),
      // zero for courses that never lapse
      duration_months: Set(course.term_months().unwrap_or(0)),
      generated_at: Set(now),
      activated_at: Set(None),
      expires_at: Set(None),
      next_platform_fee_due: Set(None),
      access_count: Set(0),
      last_accessed_at: Set(None),
    });
    passkey::Entity::insert_many(passkeys).exec_without_returning(&txn).await?;

    let events = codes.iter().map(|id| passkey_event::ActiveModel {
      id: NotSet,
      passkey_id: Set(id.clone()),
      status: Set(Status::Pending),
      changed_at: Set(now),
      changed_by: Set(actor.to_string()),
      reason: Set(Some("generated".into())),
    });
    passkey_event::Entity::insert_many(events)
      .exec_without_returning(&txn)
      .await?;

    let generated = passkey::Entity::find()
      .filter(passkey::Column::Id.is_in(codes))
      .order_by_asc(passkey::Column::Id)
      .all(&txn)
      .await?;

    txn.commit().await?;

    info!(
      "Generated {} passkeys for course {} by {actor}",
      generated.len(),
      course.id
    );
    Ok(generated)
  }

  /// Binds an unclaimed passkey to a student and device. The guarded update
  /// lets exactly one of several concurrent claims win.
  pub async fn claim(
    &self,
    code: &str,
    student_id: &str,
    device_id: &str,
  ) -> Result<passkey::Model> {
    let code = code::normalize(code)?;
    let txn = self.db.begin().await?;

    let res = passkey::Entity::update_many()
      .set(passkey::ActiveModel {
        student_id: Set(Some(student_id.to_string())),
        device_id: Set(Some(device_id.to_string())),
        status: Set(Status::StudentAssigned),
        ..Default::default()
      })
      .filter(passkey::Column::Id.eq(&code))
      .filter(passkey::Column::Status.eq(Status::Pending))
      .filter(passkey::Column::DeviceId.is_null())
      .exec(&txn)
      .await?;

    let passkey = passkey::Entity::find_by_id(&code)
      .one(&txn)
      .await?
      .ok_or_else(|| Error::not_found("Passkey not found"))?;

    if res.rows_affected == 0 {
      let same_owner = passkey.student_id.as_deref() == Some(student_id)
        && passkey.device_id.as_deref() == Some(device_id);
      let status = passkey.effective_status(utils::now());

      // repeated claim from the bound device is a no-op
      if same_owner && status != Status::Revoked {
        return Ok(passkey);
      }

      let reason = if passkey.device_id.is_some() {
        "Passkey is already bound to another device"
      } else {
        "Passkey cannot be claimed"
      };
      return Err(Error::conflict(status, reason));
    }

    append_event(&txn, &code, Status::StudentAssigned, student_id, None)
      .await?;
    txn.commit().await?;

    info!("Passkey {code} claimed by student {student_id} on {device_id}");
    Ok(passkey)
  }

  /// `STUDENT_ASSIGNED -> PLATFORM_FEE_PENDING` once the first order opens.
  pub async fn await_payment(&self, code: &str, actor: &str) -> Result<()> {
    let txn = self.db.begin().await?;

    let res = passkey::Entity::update_many()
      .set(passkey::ActiveModel {
        status: Set(Status::PlatformFeePending),
        ..Default::default()
      })
      .filter(passkey::Column::Id.eq(code))
      .filter(passkey::Column::Status.eq(Status::StudentAssigned))
      .exec(&txn)
      .await?;

    if res.rows_affected == 1 {
      append_event(
        &txn,
        code,
        Status::PlatformFeePending,
        actor,
        Some("order opened"),
      )
      .await?;
    }

    txn.commit().await?;
    Ok(())
  }

  /// Applies a settled payment. The status moves according to the payment's
  /// kind. The access term starts on the first payment and follows the
  /// course, so a course that never lapses leaves `expires_at` empty.
  pub async fn record_payment(
    &self,
    code: &str,
    order_id: &str,
  ) -> Result<passkey::Model> {
    let txn = self.db.begin().await?;

    let passkey = by_code(&txn, code).await?;
    let payment = settled_payment(&txn, &passkey, order_id).await?;

    let now = utils::now();
    let current = passkey.effective_status(now);
    let target = current.after_payment(payment.kind).ok_or_else(|| {
      Error::conflict(current, "Payment does not apply in this state")
    })?;

    let (activated_at, expires_at) = match passkey.activated_at {
      Some(activated_at) => (activated_at, passkey.expires_at),
      None => {
        let course = sv::Catalog::new(&txn).by_id(&passkey.course_id).await?;
        (now, course.access_until(now, None)?)
      }
    };
    let next_platform_fee_due = match payment.kind {
      PaymentKind::PlatformFee | PaymentKind::Combined => expires_at,
      _ => passkey.next_platform_fee_due,
    };

    transition(
      &txn,
      &passkey,
      passkey::ActiveModel {
        status: Set(target),
        payment_id: Set(payment.payment_id.clone()),
        activated_at: Set(Some(activated_at)),
        expires_at: Set(expires_at),
        next_platform_fee_due: Set(next_platform_fee_due),
        ..Default::default()
      },
    )
    .await?;

    let reason = format!("{:?} payment {order_id}", payment.kind);
    append_event(&txn, &passkey.id, target, &actor(order_id), Some(&reason))
      .await?;

    let updated = by_code(&txn, &passkey.id).await?;
    txn.commit().await?;

    info!("Passkey {} moved {current} -> {target}", passkey.id);
    Ok(updated)
  }

  /// Starts a new term on an expired passkey, backed by a fresh renewal
  /// payment.
  pub async fn renew(
    &self,
    code: &str,
    duration_months: i32,
    order_id: &str,
  ) -> Result<passkey::Model> {
    if !matches!(duration_months, 1 | 12) {
      return Err(Error::validation("renewal must be for 1 or 12 months"));
    }

    let txn = self.db.begin().await?;

    let passkey = by_code(&txn, code).await?;
    let payment = settled_payment(&txn, &passkey, order_id).await?;

    let current = passkey.effective_status(utils::now());
    if current != Status::Expired {
      return Err(Error::conflict(current, "Only expired passkeys renew"));
    }
    if payment.kind != PaymentKind::Renewal
      || payment.duration_months != duration_months
    {
      return Err(Error::validation("payment is not for this renewal"));
    }
    if payment.payment_id.is_some() && payment.payment_id == passkey.payment_id
    {
      return Err(Error::conflict(current, "Payment was already applied"));
    }

    let course = sv::Catalog::new(&txn).by_id(&passkey.course_id).await?;
    let expires_at = course.access_until(utils::now(), Some(duration_months))?;

    transition(
      &txn,
      &passkey,
      passkey::ActiveModel {
        status: Set(Status::Active),
        payment_id: Set(payment.payment_id.clone()),
        expires_at: Set(expires_at),
        next_platform_fee_due: Set(expires_at),
        ..Default::default()
      },
    )
    .await?;

    let reason = format!(
      "renewed for {duration_months} months, platform fee {} {}",
      payment.platform_fee, payment.currency
    );
    append_event(
      &txn,
      &passkey.id,
      Status::Active,
      &actor(order_id),
      Some(&reason),
    )
    .await?;

    let updated = by_code(&txn, &passkey.id).await?;
    txn.commit().await?;

    info!(
      "Passkey {} renewed until {}",
      passkey.id,
      expires_at.map_or("lifetime".into(), utils::format_date)
    );
    Ok(updated)
  }

  /// Institute-initiated and irreversible.
  pub async fn revoke(
    &self,
    scope: &Scope,
    actor: &str,
    code: &str,
    reason: Option<&str>,
  ) -> Result<passkey::Model> {
    let txn = self.db.begin().await?;

    let passkey = by_code(&txn, code).await?;
    if !scope.owns(&passkey.institute_id) {
      return Err(Error::Authorization(
        "Passkey belongs to another institute".into(),
      ));
    }
    if passkey.status == Status::Revoked {
      return Err(Error::conflict(Status::Revoked, "Passkey already revoked"));
    }

    transition(
      &txn,
      &passkey,
      passkey::ActiveModel {
        status: Set(Status::Revoked),
        ..Default::default()
      },
    )
    .await?;
    append_event(&txn, &passkey.id, Status::Revoked, actor, reason).await?;

    let updated = by_code(&txn, &passkey.id).await?;
    txn.commit().await?;

    warn!("Passkey {} revoked by {actor}", passkey.id);
    Ok(updated)
  }

  pub async fn record_access(&self, code: &str) -> Result<()> {
    passkey::Entity::update_many()
      .col_expr(
        passkey::Column::AccessCount,
        Expr::col(passkey::Column::AccessCount).add(1),
      )
      .col_expr(passkey::Column::LastAccessedAt, Expr::value(utils::now()))
      .filter(passkey::Column::Id.eq(code))
      .exec(self.db)
      .await?;
    Ok(())
  }

  /// Persists `EXPIRED` for live passkeys whose term has passed.
  pub async fn reconcile_expired(&self, now: DateTime) -> Result<u64> {
    let lapsed = passkey::Entity::find()
      .filter(passkey::Column::Status.is_in(Status::LIVE))
      .filter(passkey::Column::ExpiresAt.lte(now))
      .all(self.db)
      .await?;

    let mut expired = 0;
    for passkey in lapsed {
      let txn = self.db.begin().await?;

      let res = passkey::Entity::update_many()
        .set(passkey::ActiveModel {
          status: Set(Status::Expired),
          ..Default::default()
        })
        .filter(passkey::Column::Id.eq(&passkey.id))
        .filter(passkey::Column::Status.eq(passkey.status))
        .exec(&txn)
        .await?;

      if res.rows_affected == 1 {
        append_event(&txn, &passkey.id, Status::Expired, "system", None)
          .await?;
        expired += 1;
      }
      txn.commit().await?;
    }

    Ok(expired)
  }

  async fn owned(&self, scope: &Scope, code: &str) -> Result<passkey::Model> {
    let passkey = self.by_id(code).await?;
    if !scope.owns(&passkey.institute_id) {
      return Err(Error::Authorization(
        "Passkey belongs to another institute".into(),
      ));
    }
    Ok(passkey)
  }
}

fn actor(order_id: &str) -> String {
  format!("payment:{order_id}")
}

async fn by_code(
  db: &impl ConnectionTrait,
  code: &str,
) -> Result<passkey::Model> {
  let code = code::normalize(code)?;
  passkey::Entity::find_by_id(&code)
    .one(db)
    .await?
    .ok_or_else(|| Error::not_found("Passkey not found"))
}

async fn unique_code(
  db: &impl ConnectionTrait,
  taken: &HashSet<String>,
) -> Result<String> {
  for _ in 0..CODE_ATTEMPTS {
    let candidate = code::generate();
    if taken.contains(&candidate) {
      continue;
    }
    if passkey::Entity::find_by_id(&candidate).one(db).await?.is_none() {
      return Ok(candidate);
    }
    debug!("Passkey code collision on {candidate}, regenerating");
  }
  Err(Error::Internal("could not allocate a unique passkey code".into()))
}

async fn settled_payment(
  db: &impl ConnectionTrait,
  passkey: &passkey::Model,
  order_id: &str,
) -> Result<payment::Model> {
  payment::Entity::find_by_id(order_id)
    .one(db)
    .await?
    .filter(|payment| {
      payment.is_completed() && payment.passkey_id == passkey.id
    })
    .ok_or_else(|| Error::not_found("No completed payment for this passkey"))
}

/// Optimistic update guarded by the status the caller read.
async fn transition(
  db: &impl ConnectionTrait,
  passkey: &passkey::Model,
  changes: passkey::ActiveModel,
) -> Result<()> {
  let res = passkey::Entity::update_many()
    .set(changes)
    .filter(passkey::Column::Id.eq(&passkey.id))
    .filter(passkey::Column::Status.eq(passkey.status))
    .exec(db)
    .await?;

  if res.rows_affected == 0 {
    return Err(Error::conflict(
      passkey.status,
      "Passkey changed concurrently, retry",
    ));
  }
  Ok(())
}

async fn append_event(
  db: &impl ConnectionTrait,
  code: &str,
  status: Status,
  changed_by: &str,
  reason: Option<&str>,
) -> Result<()> {
  passkey_event::ActiveModel {
    id: NotSet,
    passkey_id: Set(code.to_string()),
    status: Set(status),
    changed_at: Set(utils::now()),
    changed_by: Set(changed_by.to_string()),
    reason: Set(reason.map(Into::into)),
  }
  .insert(db)
  .await?;
  Ok(())
}
