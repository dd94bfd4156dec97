use crate::domain::cart::Customer;
use crate::domain::offline::OfflineTransaction;
use crate::domain::order::{Order, OrderNumber, SideEffects};
use crate::domain::ports::{CustomerDirectory, OfflineStore, OrderLedger};
use crate::error::{PosError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory order ledger.
///
/// Keeps insertion order so `all_orders` reads back like an append-only log.
/// `Clone` shares the underlying storage.
#[derive(Default, Clone)]
pub struct InMemoryOrderLedger {
    orders: Arc<RwLock<Vec<Order>>>,
}

impl InMemoryOrderLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn create_order(&self, order: Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        if let Some(existing) = orders
            .iter()
            .find(|o| o.order_number == order.order_number)
        {
            return Ok(existing.clone());
        }
        orders.push(order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_number: &OrderNumber) -> Result<Option<Order>> {
        let orders = self.orders.read().await;
        Ok(orders
            .iter()
            .find(|o| &o.order_number == order_number)
            .cloned())
    }

    async fn attach_side_effects(&self, order_number: &OrderNumber, effects: SideEffects) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| &o.order_number == order_number)
            .ok_or_else(|| PosError::NotFound(format!("order {order_number}")))?;
        order.side_effects = effects;
        Ok(())
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        Ok(self.orders.read().await.clone())
    }
}

/// A thread-safe in-memory offline queue keyed by transaction id.
#[derive(Default, Clone)]
pub struct InMemoryOfflineStore {
    transactions: Arc<RwLock<Vec<OfflineTransaction>>>,
}

impl InMemoryOfflineStore {
    /// Creates a new, empty in-memory offline store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OfflineStore for InMemoryOfflineStore {
    async fn append(&self, tx: OfflineTransaction) -> Result<OfflineTransaction> {
        let mut transactions = self.transactions.write().await;
        if let Some(existing) = transactions.iter().find(|t| t.id == tx.id) {
            return Ok(existing.clone());
        }
        transactions.push(tx.clone());
        Ok(tx)
    }

    async fn get(&self, id: &str) -> Result<Option<OfflineTransaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn pending(&self) -> Result<Vec<OfflineTransaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.iter().filter(|t| !t.synced).cloned().collect())
    }

    async fn mark_synced(&self, id: &str) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PosError::NotFound(format!("offline transaction {id}")))?;
        tx.synced = true;
        Ok(())
    }
}

/// A thread-safe in-memory customer directory.
#[derive(Default, Clone)]
pub struct InMemoryCustomerDirectory {
    customers: Arc<RwLock<HashMap<String, Customer>>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, customer: Customer) {
        self.customers
            .write()
            .await
            .insert(customer.id.clone(), customer);
    }

    pub async fn get(&self, customer_id: &str) -> Option<Customer> {
        self.customers.read().await.get(customer_id).cloned()
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn accrue_loyalty(&self, customer_id: &str, points: u64) -> Result<u64> {
        let mut customers = self.customers.write().await;
        let customer = customers
            .get_mut(customer_id)
            .ok_or_else(|| PosError::NotFound(format!("customer {customer_id}")))?;
        customer.loyalty_points += points;
        Ok(customer.loyalty_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cart::Totals;
    use crate::domain::money::Money;
    use crate::domain::offline::OfflinePaymentMethod;
    use crate::domain::order::{OrderSource, OrderStatus, PaymentVerification};
    use chrono::Utc;

    fn totals() -> Totals {
        Totals {
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            tax: Money::ZERO,
            grand_total: Money::ZERO,
        }
    }

    fn order(number: &str, transaction_id: &str) -> Order {
        Order {
            order_number: OrderNumber::from(number),
            transaction_id: transaction_id.into(),
            items: vec![],
            totals: totals(),
            payment_lines: vec![],
            approval_id: None,
            customer_id: None,
            store_id: "store-1".into(),
            operator_id: "emp-1".into(),
            status: OrderStatus::Completed,
            source: OrderSource::Online,
            payment_verification: PaymentVerification::Verified,
            side_effects: SideEffects::default(),
            created_at: Utc::now(),
        }
    }

    fn offline(id: &str) -> OfflineTransaction {
        OfflineTransaction {
            id: id.into(),
            order_number: OrderNumber::from("ORD-1"),
            timestamp: Utc::now(),
            cart: vec![],
            totals: totals(),
            payment_lines: vec![],
            payment_method: OfflinePaymentMethod::Cash,
            customer_id: None,
            store_id: "store-1".into(),
            operator_id: "emp-1".into(),
            approval_id: None,
            integrity_hash: String::new(),
            synced: false,
        }
    }

    #[tokio::test]
    async fn test_ledger_is_idempotent_by_order_number() {
        let ledger = InMemoryOrderLedger::new();
        let first = ledger.create_order(order("ORD-1", "tx-a")).await.unwrap();
        let second = ledger.create_order(order("ORD-1", "tx-b")).await.unwrap();

        assert_eq!(second.transaction_id, first.transaction_id);
        assert_eq!(ledger.all_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ledger_attach_side_effects() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create_order(order("ORD-1", "tx-a")).await.unwrap();

        let effects = SideEffects {
            loyalty_points: Some(12),
            commission: None,
        };
        ledger
            .attach_side_effects(&OrderNumber::from("ORD-1"), effects.clone())
            .await
            .unwrap();

        let stored = ledger
            .get_order(&OrderNumber::from("ORD-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.side_effects, effects);

        assert!(
            ledger
                .attach_side_effects(&OrderNumber::from("ORD-404"), SideEffects::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_offline_store_append_pending_and_sync() {
        let store = InMemoryOfflineStore::new();
        store.append(offline("tx-1")).await.unwrap();
        store.append(offline("tx-2")).await.unwrap();
        store.append(offline("tx-1")).await.unwrap();

        assert_eq!(store.pending().await.unwrap().len(), 2);

        store.mark_synced("tx-1").await.unwrap();
        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "tx-2");
        assert!(store.get("tx-1").await.unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn test_customer_directory_accrues_points() {
        let directory = InMemoryCustomerDirectory::new();
        directory
            .insert(Customer {
                id: "c-1".into(),
                name: "Ada".into(),
                email: None,
                phone: None,
                loyalty_points: 10,
                address: None,
            })
            .await;

        assert_eq!(directory.accrue_loyalty("c-1", 5).await.unwrap(), 15);
        assert!(directory.accrue_loyalty("c-2", 5).await.is_err());
    }
}
