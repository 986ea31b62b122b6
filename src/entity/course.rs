//! Course entity - the read-only pricing catalog

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::Result, utils};

#[derive(
  Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize,
  Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingModel {
  #[sea_orm(string_value = "FREE")]
  Free,
  #[sea_orm(string_value = "SUBSCRIPTION")]
  Subscription,
  #[sea_orm(string_value = "ONE_TIME")]
  OneTime,
  #[sea_orm(string_value = "ALREADY_PAID")]
  AlreadyPaid,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "courses")]
pub struct Model {
  #[sea_orm(primary_key, auto_increment = false)]
  pub id: String,
  pub institute_id: String,
  pub name: String,
  pub pricing_model: PricingModel,
  /// Course fee in major currency units, before tax
  pub base_price: i64,
  /// Term of subscription courses
  pub subscription_months: i32,
  /// Access window of one-time purchases, `None` for lifetime access
  pub access_months: Option<i32>,
  pub currency: String,
  /// Fraction, `0.18` for 18%
  pub tax_rate: f64,
  pub created_at: DateTime,
}

impl Model {
  /// Course fee including tax, rounded to whole units.
  pub fn course_fee(&self) -> i64 {
    match self.pricing_model {
      PricingModel::Free => 0,
      _ => {
        self.base_price
          + (self.base_price as f64 * self.tax_rate).round() as i64
      }
    }
  }

  /// Length of a first term, `None` for courses that never lapse.
  pub fn term_months(&self) -> Option<i32> {
    let months = match self.pricing_model {
      PricingModel::Free => None,
      PricingModel::Subscription => Some(self.subscription_months),
      PricingModel::OneTime | PricingModel::AlreadyPaid => self.access_months,
    };
    months.map(|months| months.max(1))
  }

  /// End of a term starting at `from`. `months` overrides the length of a
  /// bounded term, a course that never lapses stays `None`.
  pub fn access_until(
    &self,
    from: DateTime,
    months: Option<i32>,
  ) -> Result<Option<DateTime>> {
    match self.term_months() {
      Some(term) => utils::add_months(from, months.unwrap_or(term)).map(Some),
      None => Ok(None),
    }
  }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::passkey::Entity")]
  Passkeys,
}

impl Related<super::passkey::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Passkeys.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;

  fn course(pricing_model: PricingModel, access_months: Option<i32>) -> Model {
    Model {
      id: "C1".into(),
      institute_id: "inst".into(),
      name: "Physics".into(),
      pricing_model,
      base_price: 2000,
      subscription_months: 6,
      access_months,
      currency: "INR".into(),
      tax_rate: 0.18,
      created_at: DateTime::default(),
    }
  }

  fn day(y: i32, m: u32, d: u32) -> DateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(9, 0, 0).unwrap()
  }

  #[test]
  fn course_fee_includes_tax() {
    assert_eq!(course(PricingModel::Subscription, None).course_fee(), 2360);
    assert_eq!(course(PricingModel::Free, None).course_fee(), 0);
  }

  #[test]
  fn access_window_follows_pricing_model() {
    let from = day(2026, 1, 10);
    let until = |model, access, term| {
      course(model, access).access_until(from, term).unwrap()
    };

    assert_eq!(until(PricingModel::Free, None, Some(3)), None);
    assert_eq!(
      until(PricingModel::Subscription, None, None),
      Some(day(2026, 7, 10))
    );
    assert_eq!(
      until(PricingModel::Subscription, None, Some(1)),
      Some(day(2026, 2, 10))
    );
    assert_eq!(
      until(PricingModel::OneTime, Some(12), None),
      Some(day(2027, 1, 10))
    );
    assert_eq!(
      until(PricingModel::OneTime, Some(12), Some(1)),
      Some(day(2026, 2, 10))
    );
    assert_eq!(
      until(PricingModel::AlreadyPaid, Some(3), None),
      Some(day(2026, 4, 10))
    );
    assert_eq!(until(PricingModel::AlreadyPaid, None, None), None);
    assert_eq!(until(PricingModel::AlreadyPaid, None, Some(12)), None);
  }

  #[test]
  fn term_length_follows_pricing_model() {
    let term = |model, access| course(model, access).term_months();

    assert_eq!(term(PricingModel::Subscription, Some(12)), Some(6));
    assert_eq!(term(PricingModel::OneTime, Some(12)), Some(12));
    assert_eq!(term(PricingModel::AlreadyPaid, None), None);
    assert_eq!(term(PricingModel::Free, Some(12)), None);
  }
}
