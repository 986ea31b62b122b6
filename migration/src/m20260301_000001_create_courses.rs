use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
  async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager
      .create_table(
        Table::create()
          .table(Courses::Table)
          .if_not_exists()
          .col(ColumnDef::new(Courses::Id).string().not_null().primary_key())
          .col(ColumnDef::new(Courses::InstituteId).string().not_null())
          .col(ColumnDef::new(Courses::Name).string().not_null())
          .col(ColumnDef::new(Courses::PricingModel).string().not_null())
          .col(
            ColumnDef::new(Courses::BasePrice)
              .big_integer()
              .not_null()
              .default(0),
          )
          .col(
            ColumnDef::new(Courses::SubscriptionMonths)
              .integer()
              .not_null()
              .default(1),
          )
          .col(ColumnDef::new(Courses::AccessMonths).integer().null())
          .col(
            ColumnDef::new(Courses::Currency)
              .string()
              .not_null()
              .default("INR"),
          )
          .col(ColumnDef::new(Courses::TaxRate).double().not_null().default(0.0))
          .col(ColumnDef::new(Courses::CreatedAt).date_time().not_null())
          .to_owned(),
      )
      .await?;

    manager
      .create_index(
        Index::create()
          .name("idx_courses_institute")
          .table(Courses::Table)
          .col(Courses::InstituteId)
          .to_owned(),
      )
      .await
  }

  async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
    manager.drop_table(Table::drop().table(Courses::Table).to_owned()).await
  }
}

#[derive(DeriveIden)]
pub enum Courses {
  Table,
  Id,
  InstituteId,
  Name,
  PricingModel,
  BasePrice,
  SubscriptionMonths,
  AccessMonths,
  Currency,
  TaxRate,
  CreatedAt,
}
