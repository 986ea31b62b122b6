use crate::{auth::Scope, entity::course, prelude::*};

/// Read-only course and pricing lookups.
pub struct Catalog<'a, C> {
  db: &'a C,
}

impl<'a, C: ConnectionTrait> Catalog<'a, C> {
  pub fn new(db: &'a C) -> Self {
    Self { db }
  }

  pub async fn by_id(&self, course_id: &str) -> Result<course::Model> {
    course::Entity::find_by_id(course_id)
      .one(self.db)
      .await?
      .ok_or_else(|| Error::not_found("Course not found"))
  }

  /// Course visible to `scope`. A foreign course reads exactly like a
  /// missing one.
  pub async fn owned(
    &self,
    scope: &Scope,
    course_id: &str,
  ) -> Result<course::Model> {
    course::Entity::find_by_id(course_id)
      .one(self.db)
      .await?
      .filter(|course| scope.owns(&course.institute_id))
      .ok_or_else(|| Error::not_found("Course not found or access denied"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{entity::PricingModel, sv::testing};

  #[tokio::test]
  async fn foreign_course_is_indistinguishable_from_missing() {
    let db = testing::setup_db().await;
    testing::seed_course(&db, "C1", "inst-1", PricingModel::Subscription).await;
    let catalog = Catalog::new(&db);

    let own = Scope::Institute("inst-1".into());
    let other = Scope::Institute("inst-2".into());

    assert_eq!(catalog.owned(&own, "C1").await.unwrap().id, "C1");
    assert_eq!(catalog.owned(&Scope::Any, "C1").await.unwrap().id, "C1");

    let foreign = catalog.owned(&other, "C1").await.unwrap_err().to_string();
    let missing = catalog.owned(&own, "C9").await.unwrap_err().to_string();
    assert_eq!(foreign, missing);
  }
}
