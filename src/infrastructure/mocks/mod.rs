//! Test doubles for the application ports.

mod clock;
mod store;

pub use clock::ManualClock;
pub use store::UnavailableStore;
