//! Periodic sweep persisting lazily computed expiry

use crate::{plugins::Plugin, prelude::*, state::AppState, sv};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
  pub passkeys: u64,
  pub enrollments: u64,
}

pub async fn sweep<C>(db: &C, now: DateTime) -> Result<Sweep>
where
  C: ConnectionTrait + TransactionTrait,
{
  Ok(Sweep {
    passkeys: sv::Passkeys::new(db).reconcile_expired(now).await?,
    enrollments: sv::Enrollments::new(db).deactivate_expired(now).await?,
  })
}

pub struct Reconcile;

#[async_trait]
impl Plugin for Reconcile {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let mut interval = time::interval(app.config.reconcile_interval);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
      interval.tick().await;

      match sweep(&app.db, utils::now()).await {
        Ok(Sweep { passkeys: 0, enrollments: 0 }) => {
          debug!("Expiry sweep: nothing lapsed");
        }
        Ok(done) => info!(
          "Expiry sweep: {} passkeys expired, {} enrollments deactivated",
          done.passkeys, done.enrollments
        ),
        Err(err) => error!("Expiry sweep failed: {err}"),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    auth::Scope,
    entity::{PaymentKind, PaymentStatus, PricingModel, Status},
    sv::{Profile, testing},
  };

  #[tokio::test]
  async fn sweep_persists_lapsed_terms_once() {
    let db = testing::setup_db().await;
    testing::seed_course(&db, "C1", "inst-1", PricingModel::Subscription).await;

    let code = sv::Passkeys::new(&db)
      .generate(&Scope::Any, "admin", "C1", 1)
      .await
      .unwrap()
      .remove(0)
      .id;
    let claimed = sv::Students::new(&db)
      .claim("dev-1", &code, Profile::default())
      .await
      .unwrap();
    let payment = testing::seed_payment(
      &db,
      "order_a",
      &claimed.passkey,
      PaymentKind::Combined,
      PaymentStatus::Completed,
    )
    .await;
    sv::Passkeys::new(&db).record_payment(&code, "order_a").await.unwrap();
    let enrollment = sv::Enrollments::new(&db)
      .enroll(&code, "C1", &claimed.student.id, &payment)
      .await
      .unwrap();

    assert_eq!(sweep(&db, utils::now()).await.unwrap(), Sweep::default());

    // six month term, swept a year later
    let later = utils::now() + TimeDelta::days(365);
    assert_eq!(
      sweep(&db, later).await.unwrap(),
      Sweep { passkeys: 1, enrollments: 1 }
    );
    assert_eq!(sweep(&db, later).await.unwrap(), Sweep::default());

    let passkey = sv::Passkeys::new(&db).by_id(&code).await.unwrap();
    assert_eq!(passkey.status, Status::Expired);
    let stored =
      sv::Enrollments::new(&db).by_id(&enrollment.id).await.unwrap();
    assert!(!stored.is_active);
  }
}
