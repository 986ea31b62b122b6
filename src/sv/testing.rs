//! In-memory database and collaborator fakes for service tests

use std::sync::{
  Mutex,
  atomic::{AtomicBool, AtomicU64, Ordering},
};

use sea_orm::{DbBackend, Schema};

use crate::{
  config::Config,
  entity::{
    PaymentKind, PaymentStatus, PricingModel, course, enrollment, passkey,
    passkey_event, payment, student, student_passkey,
  },
  gateway::{OrderHandle, OrderRequest, PaymentGateway, RemoteStatus},
  notify::{Delivery, NotificationSender},
  prelude::*,
};

pub const SECRET: &str = "test-gateway-secret";
pub const PLATFORM_FEE: i64 = 90;
pub const COURSE_FEE: i64 = 2000;

pub fn config() -> Config {
  let mut config = Config::default();
  config.gateway.key_secret = SECRET.into();
  config.platform_fee = PLATFORM_FEE;
  config
}

pub async fn setup_db() -> DatabaseConnection {
  let db = Database::connect("sqlite::memory:").await.unwrap();
  let schema = Schema::new(DbBackend::Sqlite);

  // parents first, foreign keys are enforced
  let tables = [
    schema.create_table_from_entity(course::Entity),
    schema.create_table_from_entity(passkey::Entity),
    schema.create_table_from_entity(passkey_event::Entity),
    schema.create_table_from_entity(payment::Entity),
    schema.create_table_from_entity(student::Entity),
    schema.create_table_from_entity(student_passkey::Entity),
    schema.create_table_from_entity(enrollment::Entity),
  ];
  for stmt in tables {
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
  }

  db
}

pub async fn seed_course(
  db: &DatabaseConnection,
  id: &str,
  institute_id: &str,
  pricing_model: PricingModel,
) -> course::Model {
  course::ActiveModel {
    id: Set(id.into()),
    institute_id: Set(institute_id.into()),
    name: Set(format!("Course {id}")),
    pricing_model: Set(pricing_model),
    base_price: Set(COURSE_FEE),
    subscription_months: Set(6),
    access_months: Set(
      (pricing_model == PricingModel::OneTime).then_some(12),
    ),
    currency: Set("INR".into()),
    tax_rate: Set(0.0),
    created_at: Set(utils::now()),
  }
  .insert(db)
  .await
  .unwrap()
}

pub async fn seed_student(
  db: &DatabaseConnection,
  id: &str,
  device_id: &str,
) -> student::Model {
  student::ActiveModel {
    id: Set(id.into()),
    device_id: Set(device_id.into()),
    name: Set(Some(format!("Student {id}"))),
    email: Set(None),
    phone_number: Set(Some(format!("+91-{id}"))),
    created_at: Set(utils::now()),
  }
  .insert(db)
  .await
  .unwrap()
}

/// Payment row as the ledger would leave it, bypassing the gateway.
pub async fn seed_payment(
  db: &DatabaseConnection,
  order_id: &str,
  passkey: &passkey::Model,
  kind: PaymentKind,
  status: PaymentStatus,
) -> payment::Model {
  let (platform_fee, course_fee) = match kind {
    PaymentKind::PlatformFee => (PLATFORM_FEE, 0),
    PaymentKind::CourseFee => (0, COURSE_FEE),
    PaymentKind::Combined | PaymentKind::Renewal => {
      (PLATFORM_FEE, COURSE_FEE)
    }
  };
  let duration_months = match kind {
    PaymentKind::Renewal => 1,
    _ => passkey.duration_months,
  };
  let completed = status == PaymentStatus::Completed;

  payment::ActiveModel {
    order_id: Set(order_id.into()),
    payment_id: Set(completed.then(|| format!("pay_{order_id}"))),
    institute_id: Set(passkey.institute_id.clone()),
    course_id: Set(passkey.course_id.clone()),
    passkey_id: Set(passkey.id.clone()),
    student_id: Set(passkey.student_id.clone()),
    device_id: Set(passkey.device_id.clone()),
    kind: Set(kind),
    duration_months: Set(duration_months),
    amount: Set(platform_fee + course_fee),
    platform_fee: Set(platform_fee),
    course_fee: Set(course_fee),
    currency: Set("INR".into()),
    status: Set(status),
    signature: Set(None),
    failure_reason: Set(None),
    created_at: Set(utils::now()),
    completed_at: Set(completed.then(utils::now)),
    applied_at: Set(None),
  }
  .insert(db)
  .await
  .unwrap()
}

/// Moves the term into the past while leaving the stored status alone.
pub async fn expire_passkey(db: &DatabaseConnection, code: &str) {
  passkey::Entity::update_many()
    .set(passkey::ActiveModel {
      expires_at: Set(Some(utils::now() - TimeDelta::days(1))),
      ..Default::default()
    })
    .filter(passkey::Column::Id.eq(code))
    .exec(db)
    .await
    .unwrap();
}

#[derive(Default)]
pub struct FakeGateway {
  orders: AtomicU64,
  failing: AtomicBool,
  remote: Mutex<Option<RemoteStatus>>,
  pub requests: Mutex<Vec<OrderRequest>>,
}

impl FakeGateway {
  pub fn fail(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn set_remote(&self, status: RemoteStatus) {
    *self.remote.lock().unwrap() = Some(status);
  }

  pub fn last_request(&self) -> Option<OrderRequest> {
    self.requests.lock().unwrap().last().cloned()
  }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
  async fn create_order(&self, order: OrderRequest) -> Result<OrderHandle> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(Error::Gateway("create order: timed out".into()));
    }

    let n = self.orders.fetch_add(1, Ordering::SeqCst) + 1;
    let handle = OrderHandle {
      id: format!("order_{n}"),
      amount: order.amount,
      currency: order.currency.clone(),
    };
    self.requests.lock().unwrap().push(order);
    Ok(handle)
  }

  async fn fetch_payment(&self, _: &str) -> Result<RemoteStatus> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(Error::Gateway("fetch payment: timed out".into()));
    }
    Ok(self.remote.lock().unwrap().unwrap_or(RemoteStatus::Created))
  }
}

/// Notification fake that keeps every message it was asked to send.
#[derive(Default)]
pub struct Recorder {
  failing: bool,
  pub sent: Mutex<Vec<(String, String)>>,
}

impl Recorder {
  pub fn failing() -> Self {
    Self { failing: true, ..Default::default() }
  }

  pub fn messages(&self) -> Vec<(String, String)> {
    self.sent.lock().unwrap().clone()
  }
}

#[async_trait]
impl NotificationSender for Recorder {
  async fn send(&self, destination: &str, message: &str) -> Result<Delivery> {
    if self.failing {
      return Err(Error::Gateway("sms delivery: connection refused".into()));
    }

    let mut sent = self.sent.lock().unwrap();
    sent.push((destination.into(), message.into()));
    Ok(Delivery::Sent(format!("msg_{}", sent.len())))
  }
}
