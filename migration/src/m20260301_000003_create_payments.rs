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
          .table(Payments::Table)
          .if_not_exists()
          .col(
            ColumnDef::new(Payments::OrderId).string().not_null().primary_key(),
          )
          .col(ColumnDef::new(Payments::PaymentId).string().null().unique_key())
          .col(ColumnDef::new(Payments::InstituteId).string().not_null())
          .col(ColumnDef::new(Payments::CourseId).string().not_null())
          .col(ColumnDef::new(Payments::PasskeyId).string().not_null())
          .col(ColumnDef::new(Payments::StudentId).string().null())
          .col(ColumnDef::new(Payments::DeviceId).string().null())
          .col(ColumnDef::new(Payments::Kind).string().not_null())
          .col(ColumnDef::new(Payments::DurationMonths).integer().not_null())
          .col(ColumnDef::new(Payments::Amount).big_integer().not_null())
          .col(ColumnDef::new(Payments::PlatformFee).big_integer().not_null())
          .col(ColumnDef::new(Payments::CourseFee).big_integer().not_null())
          .col(ColumnDef::new(Payments::Currency).string().not_null())
          .col(
            ColumnDef::new(Payments::Status)
              .string()
              .not_null()
              .default("CREATED"),
          )
          .col(ColumnDef::new(Payments::Signature).string().null())
          .col(ColumnDef::new(Payments::FailureReason).text().null())
          .col(ColumnDef::new(Payments::CreatedAt).date_time().not_null())
          .col(ColumnDef::new(Payments::CompletedAt).date_time().null())
          .col(ColumnDef::new(Payments::AppliedAt).date_time().null())
          .foreign_key(
            ForeignKey::create()
              .name("fk_payments_passkey")
              .from(Payments::Table, Payments::PasskeyId)
              .to(Passkeys::Table, Passkeys::Id),
          )
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_payments_passkey_status")
          .table(Payments::Table)
          .col(Payments::PasskeyId)
          .col(Payments::Status)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Payments::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
enum Payments {
  Table,
  OrderId,
  PaymentId,
  InstituteId,
  CourseId,
  PasskeyId,
  StudentId,
  DeviceId,
  Kind,
  DurationMonths,
  Amount,
  PlatformFee,
  CourseFee,
  Currency,
  Status,
  Signature,
  FailureReason,
  CreatedAt,
  CompletedAt,
  AppliedAt,
}
