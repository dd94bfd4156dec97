use crate::domain::money::Money;
use crate::domain::offline::{OfflinePaymentMethod, OfflineTransaction};
use crate::domain::payment::{PaymentLine, ProcessingStatus};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    line: usize,
    method: String,
    amount: Money,
    status: ProcessingStatus,
    reference: Option<&'a str>,
    gateway: Option<&'a str>,
    error: Option<&'a str>,
}

#[derive(Serialize)]
struct OfflineRow<'a> {
    id: &'a str,
    order_number: &'a str,
    timestamp: String,
    total: Money,
    payment: &'static str,
    synced: bool,
}

/// Writes checkout results and the offline queue as CSV.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// One row per payment line, numbered from 1.
    pub fn write_payment_lines(&mut self, lines: &[PaymentLine]) -> Result<()> {
        for (index, line) in lines.iter().enumerate() {
            self.writer.serialize(PaymentRow {
                line: index + 1,
                method: line.method.kind().to_string(),
                amount: line.amount.into(),
                status: line.status,
                reference: line.reference_number.as_deref(),
                gateway: line.gateway_id.as_deref(),
                error: line.error_message.as_deref(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_offline(&mut self, transactions: &[OfflineTransaction]) -> Result<()> {
        if transactions.is_empty() {
            // serialize() only emits the header alongside the first row.
            self.writer
                .write_record(["id", "order_number", "timestamp", "total", "payment", "synced"])?;
        }
        for tx in transactions {
            self.writer.serialize(OfflineRow {
                id: &tx.id,
                order_number: tx.order_number.as_str(),
                timestamp: tx.timestamp.to_rfc3339(),
                total: tx.totals.grand_total,
                payment: match tx.payment_method {
                    OfflinePaymentMethod::Cash => "cash",
                    OfflinePaymentMethod::PendingVerification { .. } => "pending_verification",
                },
                synced: tx.synced,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
