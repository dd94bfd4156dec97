use crate::domain::cart::{LineItem, Totals};
use crate::domain::offline::{OfflinePaymentMethod, OfflineTransaction};
use crate::domain::order::OrderNumber;
use crate::domain::payment::PaymentLine;
use crate::domain::ports::OfflineStoreBox;
use crate::error::{PosError, Result};
use chrono::Utc;
use tracing::{info, warn};

/// Everything needed to queue a sale that could not reach the backend.
#[derive(Debug, Clone)]
pub struct OfflineCapture {
    pub transaction_id: String,
    pub order_number: OrderNumber,
    pub cart: Vec<LineItem>,
    pub totals: Totals,
    pub payment_lines: Vec<PaymentLine>,
    pub customer_id: Option<String>,
    pub store_id: String,
    pub operator_id: String,
    pub approval_id: Option<String>,
}

/// Durable queue of sales captured without connectivity.
///
/// Records are sealed with an integrity hash when stored and must verify
/// before anything trusts them. The vault never contacts a processor.
pub struct OfflineVault {
    store: OfflineStoreBox,
}

impl OfflineVault {
    pub fn new(store: OfflineStoreBox) -> Self {
        Self { store }
    }

    /// Seals and appends the capture. Storing the same transaction id again
    /// returns the record already held.
    pub async fn store(&self, capture: OfflineCapture) -> Result<OfflineTransaction> {
        if let Some(existing) = self.store.get(&capture.transaction_id).await? {
            return Ok(existing);
        }

        let payment_method = OfflinePaymentMethod::from_lines(&capture.payment_lines);
        if let OfflinePaymentMethod::PendingVerification { methods } = &payment_method {
            warn!(
                transaction_id = %capture.transaction_id,
                ?methods,
                "Queued offline sale with payments that still need verification"
            );
        }

        let tx = OfflineTransaction {
            id: capture.transaction_id,
            order_number: capture.order_number,
            timestamp: Utc::now(),
            cart: capture.cart,
            totals: capture.totals,
            payment_lines: capture.payment_lines,
            payment_method,
            customer_id: capture.customer_id,
            store_id: capture.store_id,
            operator_id: capture.operator_id,
            approval_id: capture.approval_id,
            integrity_hash: String::new(),
            synced: false,
        }
        .seal()?;

        let stored = self.store.append(tx).await?;
        info!(offline_id = %stored.id, order_number = %stored.order_number, "Sale queued offline");
        Ok(stored)
    }

    /// Unsynced records, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<OfflineTransaction>> {
        let mut pending = self.store.pending().await?;
        pending.sort_by_key(|tx| tx.timestamp);
        Ok(pending)
    }

    pub async fn get(&self, id: &str) -> Result<Option<OfflineTransaction>> {
        self.store.get(id).await
    }

    /// Recomputes the hash of `tx` and checks it against the sealed record.
    pub async fn verify(&self, tx: &OfflineTransaction) -> Result<()> {
        if !tx.is_intact()? {
            return Err(PosError::IntegrityError(tx.id.clone()));
        }
        match self.store.get(&tx.id).await? {
            Some(stored) if stored.integrity_hash == tx.integrity_hash && stored.is_intact()? => Ok(()),
            Some(_) => Err(PosError::IntegrityError(tx.id.clone())),
            None => Err(PosError::NotFound(format!("offline transaction {}", tx.id))),
        }
    }

    pub async fn mark_synced(&self, id: &str) -> Result<()> {
        self.store.mark_synced(id).await?;
        info!(offline_id = id, "Offline transaction synced");
        Ok(())
    }
}
