//! Payment entity - one gateway order and its settlement

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

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
pub enum PaymentKind {
  #[sea_orm(string_value = "PLATFORM_FEE")]
  PlatformFee,
  #[sea_orm(string_value = "COURSE_FEE")]
  CourseFee,
  #[sea_orm(string_value = "COMBINED")]
  Combined,
  #[sea_orm(string_value = "RENEWAL")]
  Renewal,
}

impl PaymentKind {
  pub fn charges_platform_fee(self) -> bool {
    !matches!(self, PaymentKind::CourseFee)
  }

  pub fn charges_course_fee(self) -> bool {
    !matches!(self, PaymentKind::PlatformFee)
  }

  /// Two open orders of these kinds would collect a fee twice.
  pub fn overlaps(self, other: Self) -> bool {
    (self.charges_platform_fee() && other.charges_platform_fee())
      || (self.charges_course_fee() && other.charges_course_fee())
  }
}

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize,
  Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
  #[sea_orm(string_value = "CREATED")]
  Created,
  #[sea_orm(string_value = "COMPLETED")]
  Completed,
  #[sea_orm(string_value = "FAILED")]
  Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
  /// Gateway order id
  #[sea_orm(primary_key, auto_increment = false)]
  pub order_id: String,
  /// Gateway payment id, known once captured
  #[sea_orm(unique)]
  pub payment_id: Option<String>,
  pub institute_id: String,
  pub course_id: String,
  pub passkey_id: String,
  pub student_id: Option<String>,
  pub device_id: Option<String>,
  pub kind: PaymentKind,
  pub duration_months: i32,
  /// Total in major currency units, `platform_fee + course_fee`
  pub amount: i64,
  pub platform_fee: i64,
  pub course_fee: i64,
  pub currency: String,
  pub status: PaymentStatus,
  pub signature: Option<String>,
  pub failure_reason: Option<String>,
  pub created_at: DateTime,
  pub completed_at: Option<DateTime>,
  /// Set once the settlement reached the passkey. A completed payment
  /// without it was captured but could not be applied.
  pub applied_at: Option<DateTime>,
}

impl Model {
  pub fn is_completed(&self) -> bool {
    self.status == PaymentStatus::Completed
  }

  /// Captured by the gateway but never reached the passkey.
  pub fn is_unapplied(&self) -> bool {
    self.is_completed() && self.applied_at.is_none()
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::passkey::Entity",
    from = "Column::PasskeyId",
    to = "super::passkey::Column::Id"
  )]
  Passkey,
}

impl Related<super::passkey::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Passkey.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
