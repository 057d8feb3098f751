//! Application layer: the limiter façade and the ports it depends on.

pub mod circuit_breaker;
pub mod limiter;
pub mod metrics;
pub mod ports;

pub(crate) mod strategy;
