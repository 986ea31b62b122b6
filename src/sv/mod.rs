pub mod access;
pub mod catalog;
pub mod checkout;
pub mod enrollment;
pub mod passkey;
pub mod payment;
pub mod student;

pub use access::{Access, Decision, Denial, Subject};
pub use catalog::Catalog;
pub use checkout::{Checkout, Settlement};
pub use enrollment::Enrollments;
pub use passkey::Passkeys;
pub use payment::Payments;
pub use student::{Claimed, Owned, Profile, Students};

#[cfg(test)]
pub mod testing;
