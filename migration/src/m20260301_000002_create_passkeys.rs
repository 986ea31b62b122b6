use sea_orm_migration::prelude::*;

use super::m20260301_000001_create_courses::Courses;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Passkeys::Table)
          .if_not_exists()
          .col(ColumnDef::new(Passkeys::Id).string().not_null().primary_key())
          .col(ColumnDef::new(Passkeys::InstituteId).string().not_null())
          .col(ColumnDef::new(Passkeys::CourseId).string().not_null())
          .col(ColumnDef::new(Passkeys::StudentId).string().null())
          .col(ColumnDef::new(Passkeys::DeviceId).string().null())
          .col(ColumnDef::new(Passkeys::PaymentId).string().null())
          .col(
            ColumnDef::new(Passkeys::Status)
              .string()
              .not_null()
              .default("PENDING"),
          )
          .col(
            ColumnDef::new(Passkeys::DurationMonths)
              .integer()
              .not_null()
              .default(1),
          )
          .col(ColumnDef::new(Passkeys::GeneratedAt).date_time().not_null())
          .col(ColumnDef::new(Passkeys::ActivatedAt).date_time().null())
          .col(ColumnDef::new(Passkeys::ExpiresAt).date_time().null())
          .col(ColumnDef::new(Passkeys::NextPlatformFeeDue).date_time().null())
          .col(
            ColumnDef::new(Passkeys::AccessCount)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(ColumnDef::new(Passkeys::LastAccessedAt).date_time().null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_passkeys_course")
              .from(Passkeys::Table, Passkeys::CourseId)
              .to(Courses::Table, Courses::Id),
          )
          .to_owned(),
      )
      .await?;

    // lazy-expiry reconciliation scans live passkeys by expiry
    manager
      .create_index(
        Index::create()
          .name("idx_passkeys_status_expires")
          .table(Passkeys::Table)
          .col(Passkeys::Status)
          .col(Passkeys::ExpiresAt)
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(PasskeyEvents::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(PasskeyEvents::Id)
              .integer()
              .not_null()
              .auto_increment()
              .primary_key(),
          )
          .col(ColumnDef::new(PasskeyEvents::PasskeyId).string().not_null())
          .col(ColumnDef::new(PasskeyEvents::Status).string().not_null())
          .col(ColumnDef::new(PasskeyEvents::ChangedAt).date_time().not_null())
          .col(ColumnDef::new(PasskeyEvents::ChangedBy).string().not_null())
          .col(ColumnDef::new(PasskeyEvents::Reason).text().null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_passkey_events_passkey")
              .from(PasskeyEvents::Table, PasskeyEvents::PasskeyId)
              .to(Passkeys::Table, Passkeys::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_passkey_events_passkey")
          .table(PasskeyEvents::Table)
          .col(PasskeyEvents::PasskeyId)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(PasskeyEvents::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Passkeys::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Passkeys {
  Table,
  Id,
  InstituteId,
  CourseId,
  StudentId,
  DeviceId,
  PaymentId,
  Status,
  DurationMonths,
  GeneratedAt,
  ActivatedAt,
  ExpiresAt,
  NextPlatformFeeDue,
  AccessCount,
  LastAccessedAt,
}

#[derive(DeriveIden)]
enum PasskeyEvents {
  Table,
  Id,
  PasskeyId,
  Status,
  ChangedAt,
  ChangedBy,
  Reason,
}
