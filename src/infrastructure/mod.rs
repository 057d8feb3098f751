//! Infrastructure layer: adapters implementing the application ports.

pub mod clock;
pub mod memory;
pub mod mocks;

#[cfg(feature = "redis-store")]
pub mod redis_store;
