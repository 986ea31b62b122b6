//! Enrollment entity - the durable, payment-backed grant of course access

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "enrollments")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub student_id: String,
  #[sea_orm(primary_key, auto_increment = false)]
  pub course_id: String,
  /// Stable handle used by refunds
  #[sea_orm(unique)]
  pub id: String,
  pub passkey_id: String,
  pub institute_id: String,
  pub amount_paid: i64,
  pub currency: String,
  pub payment_method: String,
  pub payment_id: String,
  pub enrolled_at: DateTime,
  /// `None` for free and lifetime courses
  pub expires_at: Option<DateTime>,
  pub is_active: bool,
  /// Refund and expiry stamps
  pub metadata: Option<Json>,
}

impl Model {
  pub fn is_expired(&self, now: DateTime) -> bool {
    self.expires_at.is_some_and(|expires_at| expires_at <= now)
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::student::Entity",
    from = "Column::StudentId",
    to = "super::student::Column::Id"
  )]
  Student,
  #[sea_orm(
    belongs_to = "super::passkey::Entity",
    from = "Column::PasskeyId",
    to = "super::passkey::Column::Id"
  )]
  Passkey,
}

impl Related<super::student::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Student.def()
  }
}

impl Related<super::passkey::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Passkey.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
