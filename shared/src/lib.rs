//! Shared types and models for the stock ledger and alerting engine
//!
//! This crate holds the entities, their derived quantities and the pure
//! lifecycle rules. It has no storage or runtime dependencies; the backend
//! crate persists these types and drives the transitions.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
