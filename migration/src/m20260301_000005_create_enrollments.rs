use sea_orm_migration::prelude::*;

use super::{
  m20260301_000002_create_passkeys::Passkeys,
  m20260301_000004_create_students::Students,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Enrollments::Table)
          .if_not_exists()
          .col(ColumnDef::new(Enrollments::StudentId).string().not_null())
          .col(ColumnDef::new(Enrollments::CourseId).string().not_null())
          .col(ColumnDef::new(Enrollments::Id).string().not_null().unique_key())
          .col(ColumnDef::new(Enrollments::PasskeyId).string().not_null())
          .col(ColumnDef::new(Enrollments::InstituteId).string().not_null())
          .col(ColumnDef::new(Enrollments::AmountPaid).big_integer().not_null())
          .col(ColumnDef::new(Enrollments::Currency).string().not_null())
          .col(ColumnDef::new(Enrollments::PaymentMethod).string().not_null())
          .col(ColumnDef::new(Enrollments::PaymentId).string().not_null())
          .col(ColumnDef::new(Enrollments::EnrolledAt).date_time().not_null())
          .col(ColumnDef::new(Enrollments::ExpiresAt).date_time().null())
          .col(
            ColumnDef::new(Enrollments::IsActive)
              .boolean()
              .not_null()
              .default(true),
          )
          .col(ColumnDef::new(Enrollments::Metadata).json().null())
          // one enrollment per student and course
          .primary_key(
            Index::create()
              .col(Enrollments::StudentId)
              .col(Enrollments::CourseId),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_enrollments_student")
              .from(Enrollments::Table, Enrollments::StudentId)
              .to(Students::Table, Students::Id),
          )
          .foreign_key(
            ForeignKey::create()
              .name("fk_enrollments_passkey")
              .from(Enrollments::Table, Enrollments::PasskeyId)
              .to(Passkeys::Table, Passkeys::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_enrollments_active_expires")
          .table(Enrollments::Table)
          .col(Enrollments::IsActive)
          .col(Enrollments::ExpiresAt)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .drop_table(Table::drop().table(Enrollments::Table).to_owned())
      .await
  }
}

#[derive(DeriveIden)]
enum Enrollments {
  Table,
  StudentId,
  CourseId,
  Id,
  PasskeyId,
  InstituteId,
  AmountPaid,
  Currency,
  PaymentMethod,
  PaymentId,
  EnrolledAt,
  ExpiresAt,
  IsActive,
  Metadata,
}
