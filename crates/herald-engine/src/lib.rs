//! # Herald Engine
//!
//! The autonomous half of Herald: the periodic sweep that turns due
//! notifications into per-recipient sends, the explicit resend path, and
//! the targeting-rule resolver. Delivery itself goes through the injected
//! `DeliveryChannel`, so the engine is channel-agnostic and testable with
//! a stub.

pub mod engine;
pub mod resolver;

pub use engine::{spawn_dispatcher, DispatchEngine};
pub use resolver::resolve;
