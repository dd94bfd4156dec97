use super::cart::{Customer, LineItem, Totals};
use super::money::Money;
use super::payment::PaymentLine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-generated idempotency key for the ledger: `ORD-<timestamp>-<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn generate() -> Self {
        let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
        Self(format!(
            "ORD-{}-{:04}",
            Utc::now().format("%Y%m%d%H%M%S"),
            suffix
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OrderNumber {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    Online,
    OfflineReplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentVerification {
    Verified,
    PendingVerification,
}

/// Post-commit effects attached to an order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SideEffects {
    pub loyalty_points: Option<u64>,
    pub commission: Option<Money>,
}

/// The authoritative sale record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_number: OrderNumber,
    pub transaction_id: String,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub payment_lines: Vec<PaymentLine>,
    pub approval_id: Option<String>,
    pub customer_id: Option<String>,
    pub store_id: String,
    pub operator_id: String,
    pub status: OrderStatus,
    pub source: OrderSource,
    pub payment_verification: PaymentVerification,
    #[serde(default)]
    pub side_effects: SideEffects,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn reference_numbers(&self) -> Vec<&str> {
        self.payment_lines
            .iter()
            .filter_map(|line| line.reference_number.as_deref())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptPayment {
    pub method: String,
    pub amount: Money,
    pub status: String,
    pub reference_number: Option<String>,
    pub change_due: Option<Money>,
}

/// Summary handed to the receipt collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub order_number: OrderNumber,
    pub store_name: String,
    pub timestamp: DateTime<Utc>,
    pub items: Vec<LineItem>,
    pub totals: Totals,
    pub payments: Vec<ReceiptPayment>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
}

impl Receipt {
    pub fn for_order(order: &Order, store_name: &str, customer: Option<&Customer>) -> Self {
        let payments = order
            .payment_lines
            .iter()
            .map(|line| ReceiptPayment {
                method: line.method.kind().to_string(),
                amount: line.amount.into(),
                status: format!("{:?}", line.status).to_lowercase(),
                reference_number: line.reference_number.clone(),
                change_due: line.change_due(),
            })
            .collect();

        Self {
            order_number: order.order_number.clone(),
            store_name: store_name.to_string(),
            timestamp: order.created_at,
            items: order.items.clone(),
            totals: order.totals,
            payments,
            customer_name: customer.map(|c| c.name.clone()),
            customer_email: customer.and_then(|c| c.email.clone()),
            customer_phone: customer.and_then(|c| c.phone.clone()),
        }
    }
}
