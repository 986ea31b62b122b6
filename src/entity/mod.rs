//! SeaORM entity definitions

pub mod course;
pub mod enrollment;
pub mod passkey;
pub mod passkey_event;
pub mod payment;
pub mod student;
pub mod student_passkey;

pub use course::PricingModel;
pub use passkey::Status;
pub use payment::{PaymentKind, PaymentStatus};
