//! Append-only status history of a passkey

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::passkey::Status;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "passkey_events")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub passkey_id: String,
  pub status: Status,
  pub changed_at: DateTime,
  pub changed_by: String,
  pub reason: Option<String>,
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
