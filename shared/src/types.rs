//! Common types used across the engine

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a stock movement originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    PurchaseOrder,
    Transfer,
    Rollback,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::PurchaseOrder => "purchase_order",
            ReferenceKind::Transfer => "transfer",
            ReferenceKind::Rollback => "rollback",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase_order" => Some(ReferenceKind::PurchaseOrder),
            "transfer" => Some(ReferenceKind::Transfer),
            "rollback" => Some(ReferenceKind::Rollback),
            _ => None,
        }
    }
}

/// Link from a movement back to the entity that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: Uuid,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn purchase_order(order_id: Uuid) -> Self {
        Self::new(ReferenceKind::PurchaseOrder, order_id)
    }

    pub fn transfer(transfer_id: Uuid) -> Self {
        Self::new(ReferenceKind::Transfer, transfer_id)
    }

    pub fn rollback(transfer_id: Uuid) -> Self {
        Self::new(ReferenceKind::Rollback, transfer_id)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// Identity of whoever performed an operator action (approval, resolution)
pub type ActorId = Uuid;
