//! Domain models for the stock ledger and alerting engine

mod alert;
mod catalog;
mod notification;
mod order;
mod stock;

pub use alert::*;
pub use catalog::*;
pub use notification::*;
pub use order::*;
pub use stock::*;
