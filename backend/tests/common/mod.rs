//! Shared fixtures for the service tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::{Category, NotificationChannel, Product, Warehouse};
use stockflow_backend::config::{AlertsConfig, LedgerConfig, OrdersConfig};
use stockflow_backend::services::{
    AlertEvaluator, AlertLifecycle, NotificationSender, OrderService, StockLedger,
};
use stockflow_backend::store::{CatalogStore, InMemoryStore, Store};
use uuid::Uuid;

/// One delivery handed to a [`RecordingSender`]
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: String,
}

/// Records deliveries and fails those addressed to `fail_for`
#[derive(Debug, Default)]
pub struct RecordingSender {
    pub deliveries: Mutex<Vec<Delivery>>,
    pub fail_for: Option<String>,
}

impl RecordingSender {
    pub fn failing_for(recipient: &str) -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail_for: Some(recipient.to_string()),
        }
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        channel: NotificationChannel,
        recipient: &str,
        subject: &str,
        _message: &str,
    ) -> Result<(), String> {
        if self.fail_for.as_deref() == Some(recipient) {
            return Err(format!("mailbox {recipient} unavailable"));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            channel,
            recipient: recipient.to_string(),
            subject: subject.to_string(),
        });
        Ok(())
    }
}

/// Services wired to one in-memory store
pub struct Fixture {
    pub memory: Arc<InMemoryStore>,
    pub store: Arc<dyn Store>,
    pub ledger: StockLedger,
    pub orders: OrderService,
    pub lifecycle: AlertLifecycle,
    pub evaluator: AlertEvaluator,
    pub sender: Arc<RecordingSender>,
}

pub fn alerts_config() -> AlertsConfig {
    AlertsConfig {
        email_recipients: vec![
            "buyer@example.com".to_string(),
            "manager@example.com".to_string(),
        ],
        dashboard_recipient: "dashboard".to_string(),
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_sender(RecordingSender::default())
    }

    pub fn with_sender(sender: RecordingSender) -> Self {
        let memory = InMemoryStore::arc();
        let store: Arc<dyn Store> = memory.clone();
        let sender = Arc::new(sender);

        let ledger = StockLedger::new(store.clone(), LedgerConfig::default());
        let orders = OrderService::new(store.clone(), ledger.clone(), OrdersConfig::default());
        let lifecycle = AlertLifecycle::new(store.clone(), alerts_config(), sender.clone());
        let evaluator = AlertEvaluator::new(store.clone(), lifecycle.clone());

        Self {
            memory,
            store,
            ledger,
            orders,
            lifecycle,
            evaluator,
            sender,
        }
    }

    pub async fn category(&self, name: &str) -> Uuid {
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.memory.insert_category(&category).await.unwrap();
        category.id
    }

    pub async fn product_in(&self, category_id: Uuid, name: &str, unit_price: Decimal) -> Product {
        let sku = format!("SKU-{}", &Uuid::new_v4().simple().to_string()[..8]).to_uppercase();
        let product = Product::new(&sku, name, category_id, unit_price);
        self.memory.insert_product(&product).await.unwrap();
        product
    }

    pub async fn product(&self, name: &str) -> Product {
        let category_id = self.category("General").await;
        self.product_in(category_id, name, Decimal::new(1000, 2)).await
    }

    pub async fn warehouse(&self, name: &str) -> Warehouse {
        let warehouse = Warehouse::new(name);
        self.memory.insert_warehouse(&warehouse).await.unwrap();
        warehouse
    }
}
