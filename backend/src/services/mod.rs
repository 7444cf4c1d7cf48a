//! Business logic services for the stock ledger and alerting engine

pub mod alerts;
pub mod delivery;
pub mod evaluator;
pub mod ledger;
pub mod orders;
pub mod scheduler;

pub use alerts::{AlertLifecycle, DispatchReport, RaisedAlert, AUTO_RESOLUTION_NOTE};
pub use delivery::{LoggingSender, NotificationSender};
pub use evaluator::{
    AlertEvaluator, EvaluationReport, LowStock, OutOfStock, Overstock, PredicateRegistry,
    RulePredicate, Violation,
};
pub use ledger::{AdjustRequest, BulkAdjustReport, StockLedger, TransferOutcome};
pub use orders::{
    CreateOrderInput, LineReceipt, NewOrderItem, OrderService, ReceiptOutcome, ReceivedItem,
    UpdateItemInput,
};
