use sea_orm_migration::prelude::*;

use super::m20260301_000002_create_passkeys::Passkeys;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Students::Table)
          .if_not_exists()
          .col(ColumnDef::new(Students::Id).string().not_null().primary_key())
          .col(
            ColumnDef::new(Students::DeviceId).string().not_null().unique_key(),
          )
          .col(ColumnDef::new(Students::Name).string().null())
          .col(ColumnDef::new(Students::Email).string().null())
          .col(ColumnDef::new(Students::PhoneNumber).string().null())
          .col(ColumnDef::new(Students::CreatedAt).date_time().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_table(
        Table::create()
          .table(StudentPasskeys::Table)
          .if_not_exists()
          .col(ColumnDef::new(StudentPasskeys::StudentId).string().not_null())
          .col(
            ColumnDef::new(StudentPasskeys::PasskeyId)
              .string()
              .not_null()
              .unique_key(),
          )
          .col(ColumnDef::new(StudentPasskeys::InstituteId).string().not_null())
          .col(ColumnDef::new(StudentPasskeys::CourseId).string().not_null())
          .col(
            ColumnDef::new(StudentPasskeys::IsActive)
              .boolean()
              .not_null()
              .default(false),
          )
          .col(
            ColumnDef::new(StudentPasskeys::AttachedAt).date_time().not_null(),
          )
          .col(ColumnDef::new(StudentPasskeys::ActivatedAt).date_time().null())
          .col(ColumnDef::new(StudentPasskeys::ExpiresAt).date_time().null())
          .primary_key(
            Index::create()
              .col(StudentPasskeys::StudentId)
              .col(StudentPasskeys::PasskeyId),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_student_passkeys_student")
              .from(StudentPasskeys::Table, StudentPasskeys::StudentId)
              .to(Students::Table, Students::Id)
              .on_delete(ForeignKeyAction::Cascade),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_student_passkeys_passkey")
              .from(StudentPasskeys::Table, StudentPasskeys::PasskeyId)
              .to(Passkeys::Table, Passkeys::Id),
          )
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(StudentPasskeys::Table).to_owned())
      .await?;
    manager.drop_table(Table::drop().table(Students::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Students {
  Table,
  Id,
  DeviceId,
  Name,
  Email,
  PhoneNumber,
  CreatedAt,
}

#[derive(DeriveIden)]
enum StudentPasskeys {
  Table,
  StudentId,
  PasskeyId,
  InstituteId,
  CourseId,
  IsActive,
  AttachedAt,
  ActivatedAt,
  ExpiresAt,
}
