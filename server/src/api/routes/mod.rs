//! Route handlers

pub mod health;
pub mod telemetry;
