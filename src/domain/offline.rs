use super::cart::{LineItem, Totals};
use super::order::OrderNumber;
use super::payment::{MethodKind, PaymentLine};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How a sale captured without connectivity was paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OfflinePaymentMethod {
    /// Every tender was cash; nothing to authorize later.
    Cash,
    /// At least one tender needs live authorization that never happened.
    PendingVerification { methods: Vec<MethodKind> },
}

impl OfflinePaymentMethod {
    pub fn from_lines(lines: &[PaymentLine]) -> Self {
        let mut methods: Vec<MethodKind> = Vec::new();
        for line in lines.iter().filter(|l| l.method.requires_authorization()) {
            if !methods.contains(&line.method.kind()) {
                methods.push(line.method.kind());
            }
        }
        if methods.is_empty() {
            OfflinePaymentMethod::Cash
        } else {
            OfflinePaymentMethod::PendingVerification { methods }
        }
    }
}

/// Sale snapshot captured while offline, sealed with an integrity hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineTransaction {
    pub id: String,
    pub order_number: OrderNumber,
    pub timestamp: DateTime<Utc>,
    pub cart: Vec<LineItem>,
    pub totals: Totals,
    pub payment_lines: Vec<PaymentLine>,
    pub payment_method: OfflinePaymentMethod,
    pub customer_id: Option<String>,
    pub store_id: String,
    pub operator_id: String,
    pub approval_id: Option<String>,
    pub integrity_hash: String,
    #[serde(default)]
    pub synced: bool,
}

/// Fixed field order hashed for tamper detection. `synced` is excluded since
/// it is the only field allowed to change after sealing.
#[derive(Serialize)]
struct CanonicalSnapshot<'a> {
    id: &'a str,
    order_number: &'a OrderNumber,
    timestamp: &'a DateTime<Utc>,
    cart: &'a [LineItem],
    totals: &'a Totals,
    payment_lines: &'a [PaymentLine],
    payment_method: &'a OfflinePaymentMethod,
    customer_id: Option<&'a str>,
    store_id: &'a str,
    operator_id: &'a str,
    approval_id: Option<&'a str>,
}

impl OfflineTransaction {
    pub fn compute_hash(&self) -> Result<String> {
        let canonical = CanonicalSnapshot {
            id: &self.id,
            order_number: &self.order_number,
            timestamp: &self.timestamp,
            cart: &self.cart,
            totals: &self.totals,
            payment_lines: &self.payment_lines,
            payment_method: &self.payment_method,
            customer_id: self.customer_id.as_deref(),
            store_id: &self.store_id,
            operator_id: &self.operator_id,
            approval_id: self.approval_id.as_deref(),
        };
        let bytes = serde_json::to_vec(&canonical)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn seal(mut self) -> Result<Self> {
        self.integrity_hash = self.compute_hash()?;
        Ok(self)
    }

    pub fn is_intact(&self) -> Result<bool> {
        Ok(self.compute_hash()? == self.integrity_hash)
    }
}
