pub use sea_orm_migration::prelude::*;

mod m20260301_000001_create_courses;
mod m20260301_000002_create_passkeys;
mod m20260301_000003_create_payments;
mod m20260301_000004_create_students;
mod m20260301_000005_create_enrollments;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
  fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![
      Box::new(m20260301_000001_create_courses::Migration),
      Box::new(m20260301_000002_create_passkeys::Migration),
      Box::new(m20260301_000003_create_payments::Migration),
      Box::new(m20260301_000004_create_students::Migration),
      Box::new(m20260301_000005_create_enrollments::Migration),
    ]
  }
}
