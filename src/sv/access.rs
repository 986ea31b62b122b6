//! Access evaluator - decides whether content may be served

use serde::Serialize;

use crate::{
  entity::{Status, passkey},
  prelude::*,
  sv,
};

#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
  Student(&'a str),
  Passkey(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
  NotEnrolled,
  Inactive,
  Expired,
  Revoked,
  DeviceMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Granted,
  Denied(Denial),
}

impl Decision {
  pub fn is_granted(self) -> bool {
    self == Decision::Granted
  }
}

pub struct Access<'a, C> {
  db: &'a C,
}

impl<'a, C: ConnectionTrait + TransactionTrait> Access<'a, C> {
  pub fn new(db: &'a C) -> Self {
    Self { db }
  }

  pub async fn has_access(
    &self,
    subject: Subject<'_>,
    course_id: &str,
    device_id: Option<&str>,
  ) -> Result<bool> {
    Ok(self.evaluate(subject, course_id, device_id).await?.is_granted())
  }

  /// Checks run in a fixed order and stop at the first failure: enrollment,
  /// its expiry, revocation of the backing passkey, then device binding.
  pub async fn evaluate(
    &self,
    subject: Subject<'_>,
    course_id: &str,
    device_id: Option<&str>,
  ) -> Result<Decision> {
    let Some(student_id) = self.resolve(subject).await? else {
      return Ok(Decision::Denied(Denial::NotEnrolled));
    };

    let enrollments = sv::Enrollments::new(self.db);
    let Some(enrollment) =
      enrollments.by_student_course(&student_id, course_id).await?
    else {
      return Ok(Decision::Denied(Denial::NotEnrolled));
    };
    if !enrollment.is_active {
      return Ok(Decision::Denied(Denial::Inactive));
    }

    let now = utils::now();
    if enrollment.is_expired(now) {
      if let Err(err) = enrollments.expire(&enrollment).await {
        warn!("Could not mark enrollment {} expired: {err}", enrollment.id);
      }
      return Ok(Decision::Denied(Denial::Expired));
    }

    let Some(passkey) = passkey::Entity::find_by_id(&enrollment.passkey_id)
      .one(self.db)
      .await?
    else {
      return Ok(Decision::Denied(Denial::NotEnrolled));
    };

    // revocation wins over any device match
    if passkey.effective_status(now) == Status::Revoked {
      return Ok(Decision::Denied(Denial::Revoked));
    }

    if let (Some(device_id), Some(bound)) = (device_id, &passkey.device_id)
      && bound != device_id
    {
      debug!("Passkey {} used from foreign device {device_id}", passkey.id);
      return Ok(Decision::Denied(Denial::DeviceMismatch));
    }

    let counted = sv::Passkeys::new(self.db).record_access(&passkey.id).await;
    if let Err(err) = counted {
      warn!("Access for {} not counted: {err}", passkey.id);
    }
    Ok(Decision::Granted)
  }

  async fn resolve(&self, subject: Subject<'_>) -> Result<Option<String>> {
    match subject {
      Subject::Student(id) => Ok(Some(id.to_string())),
      Subject::Passkey(code) => {
        match sv::Passkeys::new(self.db).by_id(code).await {
          Ok(passkey) => Ok(passkey.student_id),
          Err(Error::NotFound(_)) => Ok(None),
          Err(err) => Err(err),
        }
      }
    }
  }
}
