//! Stockflow backend: warehouse stock ledger, purchase order lifecycle and
//! stock alerting
//!
//! Services talk to storage only through the [`store::Store`] seam. The
//! binary wires them to Postgres; tests use [`store::InMemoryStore`].

pub mod config;
pub mod error;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
