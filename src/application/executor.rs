use super::registry::GatewayRegistry;
use crate::domain::gateway::Gateway;
use crate::domain::payment::{AuthorizationRequest, PaymentLine, PaymentMethod, PaymentResult, ProcessorResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Submits a single payment line and normalizes whatever comes back.
///
/// One call is one bounded attempt. Retrying is the caller's business.
pub struct PaymentExecutor {
    registry: Arc<GatewayRegistry>,
    timeout: Duration,
}

impl PaymentExecutor {
    pub fn new(registry: Arc<GatewayRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn execute(
        &self,
        transaction_id: &str,
        line_index: usize,
        line: &PaymentLine,
        gateway: Option<&Gateway>,
    ) -> PaymentResult {
        if !line.method.requires_authorization() {
            return settle_locally(line);
        }

        let Some(gateway) = gateway else {
            return PaymentResult::failed("No payment gateway available", None, true);
        };
        let gateway_id = Some(gateway.id.clone());
        let Some(processor) = self.registry.processor(&gateway.id) else {
            return PaymentResult::failed(
                format!("Gateway {} has no processor attached", gateway.id),
                gateway_id,
                true,
            );
        };

        let request = AuthorizationRequest {
            transaction_id: transaction_id.to_string(),
            line_index,
            amount: line.amount,
            method: line.method.clone(),
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, processor.authorize(&request)).await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(Ok(ProcessorResponse::Approved { authorization_code })) => PaymentResult::approved(
                format!("{}-{}", gateway.id.to_uppercase(), authorization_code),
                gateway_id,
            ),
            Ok(Ok(ProcessorResponse::Declined { reason })) => {
                PaymentResult::failed(format!("Payment declined: {reason}"), gateway_id, false)
            }
            Ok(Err(e)) => PaymentResult::failed(
                format!("Payment processor error: {e}"),
                gateway_id,
                e.is_retryable(),
            ),
            Err(_) => PaymentResult::failed(
                format!("Payment processor timed out after {:?}", self.timeout),
                gateway_id,
                true,
            ),
        };

        // A decline means the processor is healthy; only outages count against it.
        let processor_healthy = result.success || !result.retryable;
        self.registry
            .report_outcome(&gateway.id, processor_healthy, latency)
            .await;

        if result.success {
            debug!(gateway = %gateway.id, line = line_index, ?latency, "Payment approved");
        } else {
            warn!(
                gateway = %gateway.id,
                line = line_index,
                error = ?result.error_message,
                "Payment attempt failed"
            );
        }
        result
    }
}

/// Cash and checks never leave the till.
pub(crate) fn settle_locally(line: &PaymentLine) -> PaymentResult {
    let reference = match &line.method {
        PaymentMethod::Check { check_number, .. } => format!("CHK-{check_number}"),
        _ => format!("CASH-{}", Uuid::new_v4().simple()),
    };
    PaymentResult::approved(reference, None)
}
