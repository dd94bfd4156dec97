use super::executor::PaymentExecutor;
use super::registry::GatewayRegistry;
use crate::config::PaymentConfig;
use crate::domain::money::Money;
use crate::domain::payment::{PaymentLine, PaymentMethod, ProcessingStatus};
use crate::error::{ErrorDetail, PosError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// Per-call switches for [`SplitPaymentCoordinator::process`].
#[derive(Debug, Clone, Copy)]
pub struct SplitPolicy {
    pub allow_partial: bool,
    /// Fraction of the total that may go unpaid, e.g. `0.05`.
    pub tolerance: Decimal,
}

impl SplitPolicy {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            allow_partial: config.allow_partial,
            tolerance: config.partial_tolerance,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineFailure {
    pub index: usize,
    pub message: String,
    pub retryable: bool,
}

/// Result of driving every line; lines carry their terminal status either way.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub lines: Vec<PaymentLine>,
    pub successful_amount: Money,
    pub success: bool,
    pub failures: Vec<LineFailure>,
}

impl SplitOutcome {
    /// Worth retrying only if something failed for a transient reason.
    pub fn is_retryable(&self) -> bool {
        !self.success && self.failures.iter().any(|f| f.retryable)
    }

    pub fn error_detail(&self, total_due: Money) -> ErrorDetail {
        let retryable = self.is_retryable();
        let (message, line) = match self.failures.last() {
            Some(failure) => (
                format!(
                    "Payment line {} failed: {} ({} of {} collected)",
                    failure.index + 1,
                    failure.message,
                    self.successful_amount,
                    total_due
                ),
                Some(failure.index),
            ),
            None => (
                format!(
                    "Collected {} of {}, below the accepted shortfall",
                    self.successful_amount, total_due
                ),
                None,
            ),
        };
        let err = if retryable {
            PosError::TransientError(message)
        } else {
            PosError::AuthorizationError(message)
        };
        let detail = ErrorDetail::from(&err);
        match line {
            Some(index) => detail.for_line(index),
            None => detail,
        }
    }
}

/// Splits one sale across several payment lines.
pub struct SplitPaymentCoordinator {
    registry: Arc<GatewayRegistry>,
    executor: PaymentExecutor,
    cash_min: Money,
    cash_max: Money,
}

impl SplitPaymentCoordinator {
    pub fn new(registry: Arc<GatewayRegistry>, executor: PaymentExecutor, config: &PaymentConfig) -> Self {
        Self {
            registry,
            executor,
            cash_min: config.cash_min,
            cash_max: config.cash_max,
        }
    }

    /// Checks the allocation and every line's own constraints.
    pub fn validate(&self, lines: &[PaymentLine], total_due: Money) -> Result<()> {
        if lines.is_empty() {
            return Err(PosError::validation("payment_lines", "At least one payment line is required"));
        }

        let allocated: Money = lines.iter().map(|l| Money::from(l.amount)).sum();
        if !allocated.within_cent(total_due) {
            return Err(PosError::validation(
                "payment_lines",
                format!("Payment lines total {allocated} but {total_due} is due"),
            ));
        }

        for (index, line) in lines.iter().enumerate() {
            let field = format!("payment_lines[{index}]");
            if let PaymentMethod::Cash { .. } = line.method {
                let amount = Money::from(line.amount);
                if amount < self.cash_min || amount > self.cash_max {
                    return Err(PosError::validation(
                        format!("{field}.amount"),
                        format!(
                            "Cash amount {amount} is outside the allowed range {} to {}",
                            self.cash_min, self.cash_max
                        ),
                    ));
                }
            }
            line.method.validate(&field, line.amount)?;
        }
        Ok(())
    }

    /// Drives each line in order against the currently active gateway.
    ///
    /// Lines already completed by an earlier attempt are kept and not charged again.
    pub async fn process(
        &self,
        transaction_id: &str,
        mut lines: Vec<PaymentLine>,
        total_due: Money,
        policy: SplitPolicy,
    ) -> Result<SplitOutcome> {
        self.validate(&lines, total_due)?;

        let mut failures = Vec::new();
        for index in 0..lines.len() {
            if lines[index].is_completed() {
                continue;
            }

            lines[index].status = ProcessingStatus::Processing;
            let gateway = if lines[index].method.requires_authorization() {
                self.registry.select_active().await
            } else {
                None
            };
            let result = self
                .executor
                .execute(transaction_id, index, &lines[index], gateway.as_ref())
                .await;
            lines[index].apply(&result);

            if !result.success {
                failures.push(LineFailure {
                    index,
                    message: result
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "Payment failed".to_string()),
                    retryable: result.retryable,
                });
                if !policy.allow_partial {
                    warn!(transaction_id, line = index, "Stopping split payment after failed line");
                    break;
                }
            }
        }

        let successful_amount: Money = lines
            .iter()
            .filter(|l| l.is_completed())
            .map(|l| Money::from(l.amount))
            .sum();
        let required = total_due * (Decimal::ONE - policy.tolerance);
        let success = successful_amount >= required && (policy.allow_partial || failures.is_empty());

        info!(
            transaction_id,
            collected = %successful_amount,
            due = %total_due,
            failed_lines = failures.len(),
            success,
            "Split payment processed"
        );

        Ok(SplitOutcome {
            lines,
            successful_amount,
            success,
            failures,
        })
    }
}
