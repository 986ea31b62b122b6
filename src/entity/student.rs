//! Student entity - a device-bound account

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "students")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: String,
  #[sea_orm(unique)]
  pub device_id: String,
  pub name: Option<String>,
  pub email: Option<String>,
  pub phone_number: Option<String>,
  pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::student_passkey::Entity")]
  Passkeys,
  #[sea_orm(has_many = "super::enrollment::Entity")]
  Enrollments,
}

impl Related<super::student_passkey::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Passkeys.def()
  }
}

impl Related<super::enrollment::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Enrollments.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
