//! Student identity binder - device accounts and their owned passkeys

use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  entity::{Status, passkey, student, student_passkey},
  prelude::*,
  sv,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
  pub name: Option<String>,
  pub email: Option<String>,
  pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Owned {
  #[serde(flatten)]
  pub entry: student_passkey::Model,
  pub status: Status,
}

#[derive(Debug, Clone, Serialize)]
pub struct Claimed {
  pub student: student::Model,
  pub passkey: passkey::Model,
}

pub struct Students<'a, C> {
  db: &'a C,
}

impl<'a, C: ConnectionTrait + TransactionTrait> Students<'a, C> {
  pub fn new(db: &'a C) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, id: &str) -> Result<student::Model> {
    student::Entity::find_by_id(id)
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Student not found"))
  }

  pub async fn by_device(&self, device_id: &str) -> Result<student::Model> {
    student::Entity::find()
      .filter(student::Column::DeviceId.eq(device_id))
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Student not found"))
  }

  /// Account for `device_id`, created on first sight. Profile fields that
  /// are given overwrite the stored ones.
  pub async fn register_device(
    &self,
    device_id: &str,
    profile: Profile,
  ) -> Result<student::Model> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
      return Err(Error::validation("device id is required"));
    }

    let existing = student::Entity::find()
      .filter(student::Column::DeviceId.eq(device_id))
      .one(self.db)
      .await?;

    let Some(existing) = existing else {
      let student = student::ActiveModel {
        id: Set(Uuid::new_v4().to_string()),
        device_id: Set(device_id.to_string()),
        name: Set(profile.name),
        email: Set(profile.email),
        phone_number: Set(profile.phone_number),
        created_at: Set(utils::now()),
      }
      .insert(self.db)
      .await?;

      info!("Registered student {} for device {device_id}", student.id);
      return Ok(student);
    };

    let Profile { name, email, phone_number } = profile;
    if name.is_none() && email.is_none() && phone_number.is_none() {
      return Ok(existing);
    }

    let mut active: student::ActiveModel = existing.into();
    if let Some(name) = name {
      active.name = Set(Some(name));
    }
    if let Some(email) = email {
      active.email = Set(Some(email));
    }
    if let Some(phone_number) = phone_number {
      active.phone_number = Set(Some(phone_number));
    }
    Ok(active.update(self.db).await?)
  }

  /// Claims a passkey from a device. The device account, the binding and the
  /// owned entry commit together and the new passkey becomes the active one.
  pub async fn claim(
    &self,
    device_id: &str,
    code: &str,
    profile: Profile,
  ) -> Result<Claimed> {
    let txn = self.db.begin().await?;
    let students = Students::new(&txn);

    let student = students.register_device(device_id, profile).await?;
    let passkey =
      sv::Passkeys::new(&txn).claim(code, &student.id, device_id).await?;
    students.attach(&student.id, &passkey).await?;
    students.switch_active(&student.id, &passkey.id).await?;

    txn.commit().await?;
    Ok(Claimed { student, passkey })
  }

  /// Adds `passkey` to the student's owned list, inactive.
  pub async fn attach(
    &self,
    student_id: &str,
    passkey: &passkey::Model,
  ) -> Result<student_passkey::Model> {
    let existing = student_passkey::Entity::find()
      .filter(student_passkey::Column::PasskeyId.eq(&passkey.id))
      .one(self.db)
      .await?;

    match existing {
      Some(entry) if entry.student_id == student_id => Ok(entry),
      Some(_) => Err(Error::conflict(
        passkey.effective_status(utils::now()),
        "Passkey is owned by another student",
      )),
      None => Ok(
        student_passkey::ActiveModel {
          student_id: Set(student_id.to_string()),
          passkey_id: Set(passkey.id.clone()),
          institute_id: Set(passkey.institute_id.clone()),
          course_id: Set(passkey.course_id.clone()),
          is_active: Set(false),
          attached_at: Set(utils::now()),
          activated_at: Set(passkey.activated_at),
          expires_at: Set(passkey.expires_at),
        }
        .insert(self.db)
        .await?,
      ),
    }
  }

  /// Makes `passkey_id` the only active entry. One statement flips every
  /// sibling, so no reader sees zero or two active passkeys.
  pub async fn switch_active(
    &self,
    student_id: &str,
    passkey_id: &str,
  ) -> Result<Vec<student_passkey::Model>> {
    let (_, passkey) = student_passkey::Entity::find_by_id((
      student_id.to_string(),
      passkey_id.to_string(),
    ))
    .find_also_related(passkey::Entity)
    .one(self.db)
    .await?
    .ok_or_else(|| Error::not_found("Passkey not found for this student"))?;

    if let Some(passkey) = passkey
      && passkey.status == Status::Revoked
    {
      return Err(Error::conflict(Status::Revoked, "Passkey was revoked"));
    }

    student_passkey::Entity::update_many()
      .col_expr(
        student_passkey::Column::IsActive,
        Expr::col(student_passkey::Column::PasskeyId).eq(passkey_id),
      )
      .filter(student_passkey::Column::StudentId.eq(student_id))
      .exec(self.db)
      .await?;

    debug!("Student {student_id} switched to passkey {passkey_id}");
    self.entries(student_id).await
  }

  /// Owned passkeys with their status as of now.
  pub async fn owned(&self, student_id: &str) -> Result<Vec<Owned>> {
    let now = utils::now();
    let rows = student_passkey::Entity::find()
      .filter(student_passkey::Column::StudentId.eq(student_id))
      .order_by_asc(student_passkey::Column::AttachedAt)
      .find_also_related(passkey::Entity)
      .all(self.db)
      .await?;

    rows
      .into_iter()
      .map(|(entry, passkey)| {
        let passkey = passkey.ok_or_else(|| {
          Error::Internal(format!("owned passkey {} missing", entry.passkey_id))
        })?;
        Ok(Owned { entry, status: passkey.effective_status(now) })
      })
      .collect()
  }

  pub async fn active(
    &self,
    student_id: &str,
  ) -> Result<Option<student_passkey::Model>> {
    Ok(
      student_passkey::Entity::find()
        .filter(student_passkey::Column::StudentId.eq(student_id))
        .filter(student_passkey::Column::IsActive.eq(true))
        .one(self.db)
        .await?,
    )
  }

  /// Copies the passkey's current term onto its owned entry.
  pub async fn sync_terms(&self, passkey: &passkey::Model) -> Result<()> {
    student_passkey::Entity::update_many()
      .set(student_passkey::ActiveModel {
        activated_at: Set(passkey.activated_at),
        expires_at: Set(passkey.expires_at),
        ..Default::default()
      })
      .filter(student_passkey::Column::PasskeyId.eq(&passkey.id))
      .exec(self.db)
      .await?;
    Ok(())
  }

  async fn entries(
    &self,
    student_id: &str,
  ) -> Result<Vec<student_passkey::Model>> {
    Ok(
      student_passkey::Entity::find()
        .filter(student_passkey::Column::StudentId.eq(student_id))
        .order_by_asc(student_passkey::Column::AttachedAt)
        .all(self.db)
        .await?,
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{auth::Scope, entity::PricingModel, sv::testing};

  async fn codes(db: &DatabaseConnection, count: u32) -> Vec<String> {
    testing::seed_course(db, "C1", "inst-1", PricingModel::Subscription).await;
    sv::Passkeys::new(db)
      .generate(&Scope::Institute("inst-1".into()), "p", "C1", count)
      .await
      .unwrap()
      .into_iter()
      .map(|key| key.id)
      .collect()
  }

  fn active_ids(entries: &[student_passkey::Model]) -> Vec<&str> {
    entries
      .iter()
      .filter(|entry| entry.is_active)
      .map(|entry| entry.passkey_id.as_str())
      .collect()
  }

  #[tokio::test]
  async fn register_device_is_idempotent() {
    let db = testing::setup_db().await;
    let sv = Students::new(&db);

    let first = sv.register_device("dev-1", Profile::default()).await.unwrap();
    let again = sv
      .register_device(
        "dev-1",
        Profile { name: Some("Asha".into()), ..Default::default() },
      )
      .await
      .unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(again.name.as_deref(), Some("Asha"));
    assert!(matches!(
      sv.register_device("  ", Profile::default()).await,
      Err(Error::Validation(_))
    ));
  }

  #[tokio::test]
  async fn claim_makes_newest_passkey_active() {
    let db = testing::setup_db().await;
    let codes = codes(&db, 2).await;
    let sv = Students::new(&db);

    let first = sv.claim("dev-1", &codes[0], Profile::default()).await.unwrap();
    assert_eq!(first.passkey.status, Status::StudentAssigned);
    assert_eq!(
      sv.active(&first.student.id).await.unwrap().unwrap().passkey_id,
      codes[0]
    );

    let second = sv.claim("dev-1", &codes[1], Profile::default()).await.unwrap();
    assert_eq!(second.student.id, first.student.id);

    let owned = sv.owned(&first.student.id).await.unwrap();
    assert_eq!(owned.len(), 2);
    let entries: Vec<_> = owned.into_iter().map(|o| o.entry).collect();
    assert_eq!(active_ids(&entries), [codes[1].as_str()]);
  }

  #[tokio::test]
  async fn switch_leaves_exactly_one_active() {
    let db = testing::setup_db().await;
    let codes = codes(&db, 3).await;
    let sv = Students::new(&db);

    let mut student_id = String::new();
    for code in &codes {
      student_id =
        sv.claim("dev-1", code, Profile::default()).await.unwrap().student.id;
    }

    for target in [&codes[0], &codes[2], &codes[1], &codes[1]] {
      let entries = sv.switch_active(&student_id, target).await.unwrap();
      assert_eq!(entries.len(), 3);
      assert_eq!(active_ids(&entries), [target.as_str()]);
    }
  }

  #[tokio::test]
  async fn switch_rejects_foreign_and_revoked_passkeys() {
    let db = testing::setup_db().await;
    let codes = codes(&db, 3).await;
    let sv = Students::new(&db);

    let mine = sv.claim("dev-1", &codes[0], Profile::default()).await.unwrap();
    sv.claim("dev-1", &codes[1], Profile::default()).await.unwrap();
    let theirs = sv.claim("dev-2", &codes[2], Profile::default()).await.unwrap();
    let student_id = mine.student.id.as_str();

    assert!(matches!(
      sv.switch_active(student_id, &codes[2]).await,
      Err(Error::NotFound(_))
    ));
    assert_eq!(
      sv.active(&theirs.student.id).await.unwrap().unwrap().passkey_id,
      codes[2]
    );

    sv::Passkeys::new(&db)
      .revoke(&Scope::Any, "admin", &codes[0], None)
      .await
      .unwrap();
    assert!(matches!(
      sv.switch_active(student_id, &codes[0]).await,
      Err(Error::Conflict { .. })
    ));
    assert_eq!(
      sv.active(student_id).await.unwrap().unwrap().passkey_id,
      codes[1]
    );
  }

  #[tokio::test]
  async fn failed_claim_leaves_no_trace() {
    let db = testing::setup_db().await;
    let codes = codes(&db, 1).await;
    let sv = Students::new(&db);

    sv.claim("dev-1", &codes[0], Profile::default()).await.unwrap();

    assert!(matches!(
      sv.claim("dev-2", &codes[0], Profile::default()).await,
      Err(Error::Conflict { .. })
    ));
    assert!(matches!(sv.by_device("dev-2").await, Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn owned_reports_effective_status() {
    let db = testing::setup_db().await;
    let codes = codes(&db, 1).await;
    let sv = Students::new(&db);
    let claimed =
      sv.claim("dev-1", &codes[0], Profile::default()).await.unwrap();

    let order = testing::seed_payment(
      &db,
      "order_a",
      &claimed.passkey,
      crate::entity::PaymentKind::Combined,
      crate::entity::PaymentStatus::Completed,
    )
    .await;
    let active = sv::Passkeys::new(&db)
      .record_payment(&codes[0], &order.order_id)
      .await
      .unwrap();
    sv.sync_terms(&active).await.unwrap();

    let owned = sv.owned(&claimed.student.id).await.unwrap();
    assert_eq!(owned[0].status, Status::FullyActive);
    assert_eq!(owned[0].entry.expires_at, active.expires_at);

    testing::expire_passkey(&db, &codes[0]).await;
    let owned = sv.owned(&claimed.student.id).await.unwrap();
    assert_eq!(owned[0].status, Status::Expired);
  }
}
