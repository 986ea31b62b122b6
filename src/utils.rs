use crate::prelude::*;

pub fn now() -> DateTime {
  Utc::now().naive_utc()
}

pub fn format_date(date: DateTime) -> String {
  date.format("%d.%m.%Y %H:%M").to_string()
}

/// `from + months`, clamped to the last day of the target month.
pub fn add_months(from: DateTime, months: i32) -> Result<DateTime> {
  let months = u32::try_from(months)
    .ok()
    .filter(|&m| m >= 1)
    .ok_or_else(|| Error::validation("duration must be at least one month"))?;

  from
    .checked_add_months(Months::new(months))
    .ok_or_else(|| Error::validation("duration out of range"))
}
