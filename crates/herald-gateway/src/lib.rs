//! # Herald Gateway
//!
//! The HTTP surface of Herald: the admin dashboard API (create, list,
//! cancel, stats, resend) and the inbound push endpoint the messaging
//! platform calls with delivery receipts.

pub mod routes;
pub mod server;

pub use server::{build_router, start, AppState};
