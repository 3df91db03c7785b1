//! Shared plumbing for the Social Rent services: error taxonomy, API envelopes,
//! auth and event types, axum middleware, and infrastructure clients.

pub mod types;
pub mod errors;
pub mod middleware;
pub mod clients;

pub use types::*;
pub use errors::{AppError, ErrorCode, AppResult};
