//! HTTP surface for the Cadence scheduler.
//!
//! This crate provides routes to:
//! - Check service health
//! - Query a user's schedule status and daily plan
//! - Deliver inbound messages and resume after interrupts
//! - Override schedule times
//! - Start and stop a user's scheduler loop

mod error;
mod routes;

pub use error::WebError;
pub use routes::{AppState, create_router, serve};
