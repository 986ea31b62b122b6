//! Passkey entity - course access codes and their lifecycle state

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::payment::PaymentKind;

#[derive(
  Clone,
  Copy,
  Debug,
  PartialEq,
  Eq,
  Hash,
  EnumIter,
  DeriveActiveEnum,
  Serialize,
  Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  /// Generated by an institute, not yet claimed by any device.
  #[sea_orm(string_value = "PENDING")]
  Pending,
  #[sea_orm(string_value = "STUDENT_ASSIGNED")]
  StudentAssigned,
  #[sea_orm(string_value = "PLATFORM_FEE_PENDING")]
  PlatformFeePending,
  #[sea_orm(string_value = "PLATFORM_FEE_PAID")]
  PlatformFeePaid,
  /// Course fee settled, platform fee still outstanding.
  #[sea_orm(string_value = "COURSE_ACCESS_PENDING")]
  CourseAccessPending,
  #[sea_orm(string_value = "FULLY_ACTIVE")]
  FullyActive,
  /// Single-fee model, reached through renewal.
  #[sea_orm(string_value = "ACTIVE")]
  Active,
  #[sea_orm(string_value = "EXPIRED")]
  Expired,
  #[sea_orm(string_value = "REVOKED")]
  Revoked,
}

impl Status {
  pub const LIVE: [Status; 4] = [
    Status::PlatformFeePaid,
    Status::CourseAccessPending,
    Status::FullyActive,
    Status::Active,
  ];

  /// States that carry an `expires_at` and lapse into `Expired` once it passes.
  pub fn is_live(self) -> bool {
    Self::LIVE.contains(&self)
  }

  /// All fees settled, content may be served.
  pub fn grants_content(self) -> bool {
    matches!(self, Status::FullyActive | Status::Active)
  }

  /// Target state after a settled payment of `kind`, or `None` if the payment
  /// does not apply from this state.
  pub fn after_payment(self, kind: PaymentKind) -> Option<Status> {
    use PaymentKind::*;
    use Status::*;

    match (self, kind) {
      (_, Renewal) => None,
      // a half-paid passkey settles the missing fee alone
      (StudentAssigned | PlatformFeePending, Combined) => Some(FullyActive),
      (StudentAssigned | PlatformFeePending, PlatformFee) => {
        Some(PlatformFeePaid)
      }
      (CourseAccessPending, PlatformFee) => Some(FullyActive),
      (StudentAssigned | PlatformFeePending, CourseFee) => {
        Some(CourseAccessPending)
      }
      (PlatformFeePaid, CourseFee) => Some(FullyActive),
      _ => None,
    }
  }
}

impl Status {
  pub fn as_str(self) -> &'static str {
    match self {
      Status::Pending => "PENDING",
      Status::StudentAssigned => "STUDENT_ASSIGNED",
      Status::PlatformFeePending => "PLATFORM_FEE_PENDING",
      Status::PlatformFeePaid => "PLATFORM_FEE_PAID",
      Status::CourseAccessPending => "COURSE_ACCESS_PENDING",
      Status::FullyActive => "FULLY_ACTIVE",
      Status::Active => "ACTIVE",
      Status::Expired => "EXPIRED",
      Status::Revoked => "REVOKED",
    }
  }
}

impl std::fmt::Display for Status {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "passkeys")]
pub struct Model {
  /// Human-enterable access code
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: String,
  pub institute_id: String,
  pub course_id: String,
  pub student_id: Option<String>,
  pub device_id: Option<String>,
  /// Gateway id of the last payment applied to this passkey
  pub payment_id: Option<String>,
  pub status: Status,
  pub duration_months: i32,
  pub generated_at: DateTime,
  pub activated_at: Option<DateTime>,
  pub expires_at: Option<DateTime>,
  pub next_platform_fee_due: Option<DateTime>,
  pub access_count: i64,
  pub last_accessed_at: Option<DateTime>,
}

impl Model {
  /// Status as seen at `now`. A live passkey past `expires_at` reads as
  /// `Expired` even before the stored column is rewritten.
  pub fn effective_status(&self, now: DateTime) -> Status {
    match self.expires_at {
      Some(expires_at) if self.status.is_live() && expires_at <= now => {
        Status::Expired
      }
      _ => self.status,
    }
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::course::Entity",
    from = "Column::CourseId",
    to = "super::course::Column::Id"
  )]
  Course,
  #[sea_orm(has_many = "super::passkey_event::Entity")]
  Events,
}

impl Related<super::course::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Course.def()
  }
}

impl Related<super::passkey_event::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Events.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
