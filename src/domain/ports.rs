use super::approval::{ManagerCredentials, Principal};
use super::offline::OfflineTransaction;
use super::order::{Order, OrderNumber, Receipt, SideEffects};
use super::payment::{AuthorizationRequest, ProcessorResponse};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A payment processor reachable through a gateway.
///
/// Declines are returned as [`ProcessorResponse::Declined`]; connectivity
/// problems are returned as errors.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<ProcessorResponse>;
    async fn health_check(&self) -> Result<()>;
}

/// Append-only order ledger, idempotent by order number.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Stores the order, or returns the already stored one with the same number.
    async fn create_order(&self, order: Order) -> Result<Order>;
    async fn get_order(&self, order_number: &OrderNumber) -> Result<Option<Order>>;
    async fn attach_side_effects(&self, order_number: &OrderNumber, effects: SideEffects) -> Result<()>;
    async fn all_orders(&self) -> Result<Vec<Order>>;
}

/// Durable local queue for sales captured offline, keyed by transaction id.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Appends the record, or returns the existing one with the same id.
    async fn append(&self, tx: OfflineTransaction) -> Result<OfflineTransaction>;
    async fn get(&self, id: &str) -> Result<Option<OfflineTransaction>>;
    async fn pending(&self) -> Result<Vec<OfflineTransaction>>;
    async fn mark_synced(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Adds points and returns the new balance.
    async fn accrue_loyalty(&self, customer_id: &str, points: u64) -> Result<u64>;
}

#[async_trait]
pub trait ReceiptNotifier: Send + Sync {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<()>;
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &ManagerCredentials) -> Result<Option<Principal>>;
}

pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type OrderLedgerBox = Box<dyn OrderLedger>;
pub type OfflineStoreBox = Box<dyn OfflineStore>;
pub type CustomerDirectoryRef = Arc<dyn CustomerDirectory>;
pub type ReceiptNotifierRef = Arc<dyn ReceiptNotifier>;
pub type ConnectivityProbeRef = Arc<dyn ConnectivityProbe>;
pub type AuthenticatorRef = Arc<dyn Authenticator>;
