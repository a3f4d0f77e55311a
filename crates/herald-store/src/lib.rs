//! # Herald Store
//!
//! SQLite-backed persistence for the notification subsystem:
//! - scheduling store — planned broadcasts and their lifecycle status
//! - recipient ledger — one row per (notification, recipient), the unit of
//!   idempotence and retry
//! - participant directory — who can be targeted, written by collaborators
//! - stats — read-side aggregation over the ledger
//!
//! One `HeraldDb` owns the connection; the per-domain operations live in
//! `schedule`, `ledger`, `directory`, and `stats`.

pub mod db;
pub mod directory;
pub mod ledger;
pub mod schedule;
pub mod stats;

pub use db::HeraldDb;
