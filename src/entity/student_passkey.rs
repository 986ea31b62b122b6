//! Passkeys owned by a student, at most one of them active

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "student_passkeys")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub student_id: String,
  #[sea_orm(primary_key, auto_increment = false, unique)]
  pub passkey_id: String,
  pub institute_id: String,
  pub course_id: String,
  pub is_active: bool,
  pub attached_at: DateTime,
  pub activated_at: Option<DateTime>,
  pub expires_at: Option<DateTime>,
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
