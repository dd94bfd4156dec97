use crate::config::ApprovalConfig;
use crate::domain::approval::{
    ApprovalRequest, ApprovalStatus, ManagerCredentials, ResolutionMethod, Role,
};
use crate::domain::money::Money;
use crate::domain::ports::AuthenticatorRef;
use crate::error::{PosError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Default)]
struct RequestBook {
    by_id: HashMap<String, ApprovalRequest>,
    /// Latest request id per transaction.
    latest: HashMap<String, String>,
}

impl RequestBook {
    fn insert(&mut self, request: ApprovalRequest) {
        self.latest
            .insert(request.transaction_id.clone(), request.id.clone());
        self.by_id.insert(request.id.clone(), request);
    }

    /// Drops terminal requests resolved before `cutoff`.
    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, request| {
            !(request.status.is_terminal() && request.resolved_at.is_some_and(|at| at < cutoff))
        });
        let by_id = &self.by_id;
        self.latest.retain(|_, id| by_id.contains_key(id));
        before - self.by_id.len()
    }
}

/// Policy gate for sales under the configured minimum.
///
/// Requests live here until resolved and for `retention` afterwards. A
/// request's code only ever resolves that request, and a resolved request
/// stays resolved.
pub struct ApprovalGate {
    requests: Mutex<RequestBook>,
    authenticator: AuthenticatorRef,
    privileged_roles: Vec<Role>,
    ttl: Option<ChronoDuration>,
    retention: ChronoDuration,
}

impl ApprovalGate {
    pub fn new(config: &ApprovalConfig, authenticator: AuthenticatorRef) -> Self {
        Self {
            requests: Mutex::new(RequestBook::default()),
            authenticator,
            privileged_roles: config.privileged_roles.clone(),
            ttl: config
                .request_ttl_secs
                .map(|secs| ChronoDuration::seconds(secs as i64)),
            retention: ChronoDuration::seconds(config.retention_secs as i64),
        }
    }

    pub fn required(sale_amount: Money, minimum_amount: Money) -> bool {
        sale_amount < minimum_amount
    }

    pub async fn create_request(
        &self,
        transaction_id: &str,
        sale_amount: Money,
        minimum_amount: Money,
        requested_by: &str,
    ) -> ApprovalRequest {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let request = ApprovalRequest {
            id: format!("APR-{}", Uuid::new_v4().simple()),
            transaction_id: transaction_id.to_string(),
            sale_amount,
            minimum_amount,
            requested_by: requested_by.to_string(),
            code,
            status: ApprovalStatus::Pending,
            resolution: None,
            resolved_by: None,
            failed_attempts: 0,
            created_at: Utc::now(),
            resolved_at: None,
        };
        info!(
            approval_id = %request.id,
            transaction_id,
            sale = %sale_amount,
            minimum = %minimum_amount,
            "Manager approval requested"
        );
        let mut book = self.requests.lock().await;
        for existing in book.by_id.values_mut() {
            self.expire_if_due(existing);
        }
        let pruned = book.prune(Utc::now() - self.retention);
        if pruned > 0 {
            debug!(pruned, "Dropped settled approval requests");
        }
        book.insert(request.clone());
        request
    }

    pub async fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        let mut book = self.requests.lock().await;
        let request = book.by_id.get_mut(request_id)?;
        self.expire_if_due(request);
        Some(request.clone())
    }

    /// Latest request guarding a checkout, with expiry applied.
    pub async fn find_for_transaction(&self, transaction_id: &str) -> Option<ApprovalRequest> {
        let mut book = self.requests.lock().await;
        let id = book.latest.get(transaction_id)?.clone();
        let request = book.by_id.get_mut(&id)?;
        self.expire_if_due(request);
        Some(request.clone())
    }

    /// Approves when `code` matches this request's code. A mismatch leaves the
    /// request pending and returns `false`.
    pub async fn resolve_by_code(&self, request_id: &str, code: &str) -> Result<bool> {
        let mut book = self.requests.lock().await;
        let request = self.pending_mut(&mut book, request_id)?;

        if request.code != code {
            request.failed_attempts += 1;
            warn!(approval_id = request_id, attempts = request.failed_attempts, "Approval code rejected");
            return Ok(false);
        }

        request.resolve(ApprovalStatus::Approved, Some(ResolutionMethod::Code), None);
        info!(approval_id = request_id, "Sale approved by code");
        Ok(true)
    }

    /// Approves when the credentials authenticate a principal with a privileged role.
    pub async fn resolve_by_manager_auth(
        &self,
        request_id: &str,
        credentials: &ManagerCredentials,
    ) -> Result<bool> {
        // Authenticate before taking the lock; the authenticator may be remote.
        let principal = self.authenticator.authenticate(credentials).await?;

        let mut book = self.requests.lock().await;
        let request = self.pending_mut(&mut book, request_id)?;

        match principal {
            Some(principal) if self.privileged_roles.contains(&principal.role) => {
                request.resolve(
                    ApprovalStatus::Approved,
                    Some(ResolutionMethod::ManagerAuth),
                    Some(principal.employee_id.clone()),
                );
                info!(approval_id = request_id, manager = %principal.employee_id, "Sale approved by manager");
                Ok(true)
            }
            _ => {
                request.failed_attempts += 1;
                warn!(approval_id = request_id, employee = %credentials.employee_id, "Manager re-authentication rejected");
                Ok(false)
            }
        }
    }

    pub async fn deny(&self, request_id: &str) -> Result<()> {
        let mut book = self.requests.lock().await;
        let request = self.pending_mut(&mut book, request_id)?;
        request.resolve(ApprovalStatus::Denied, None, None);
        info!(approval_id = request_id, "Sale approval denied");
        Ok(())
    }

    fn pending_mut<'a>(
        &self,
        book: &'a mut RequestBook,
        request_id: &str,
    ) -> Result<&'a mut ApprovalRequest> {
        let request = book
            .by_id
            .get_mut(request_id)
            .ok_or_else(|| PosError::NotFound(format!("approval request {request_id}")))?;
        self.expire_if_due(request);
        if request.status.is_terminal() {
            return Err(PosError::AuthorizationError(format!(
                "Approval request {request_id} is already {:?}",
                request.status
            )));
        }
        Ok(request)
    }

    fn expire_if_due(&self, request: &mut ApprovalRequest) {
        if request.status != ApprovalStatus::Pending {
            return;
        }
        if let Some(ttl) = self.ttl
            && Utc::now() - request.created_at > ttl
        {
            request.resolve(ApprovalStatus::Expired, None, None);
            info!(approval_id = %request.id, "Approval request expired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::simulated::StaticAuthenticator;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn gate(ttl: Option<u64>) -> ApprovalGate {
        gate_with(ApprovalConfig {
            request_ttl_secs: ttl,
            ..ApprovalConfig::default()
        })
    }

    fn gate_with(config: ApprovalConfig) -> ApprovalGate {
        let config = ApprovalConfig {
            minimum_sale: Money::new(dec!(20)),
            ..config
        };
        let auth = StaticAuthenticator::new()
            .with_employee("mgr-1", "1234", Role::Manager)
            .with_employee("own-1", "4321", Role::Owner)
            .with_employee("cash-1", "1111", Role::Cashier);
        ApprovalGate::new(&config, Arc::new(auth))
    }

    async fn pending(gate: &ApprovalGate, tx: &str) -> ApprovalRequest {
        gate.create_request(tx, Money::new(dec!(8)), Money::new(dec!(20)), "cash-1")
            .await
    }

    fn creds(id: &str, pin: &str) -> ManagerCredentials {
        ManagerCredentials {
            employee_id: id.into(),
            pin: pin.into(),
        }
    }

    #[test]
    fn test_required_below_minimum_only() {
        assert!(ApprovalGate::required(Money::new(dec!(8)), Money::new(dec!(20))));
        assert!(!ApprovalGate::required(Money::new(dec!(20)), Money::new(dec!(20))));
        assert!(!ApprovalGate::required(Money::new(dec!(25)), Money::new(dec!(20))));
    }

    #[tokio::test]
    async fn test_code_approves_once() {
        let gate = gate(None);
        let request = pending(&gate, "tx-1").await;
        assert_eq!(request.code.len(), 6);

        assert!(gate.resolve_by_code(&request.id, &request.code).await.unwrap());
        let resolved = gate.get(&request.id).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.resolution, Some(ResolutionMethod::Code));

        assert!(matches!(
            gate.resolve_by_code(&request.id, &request.code).await,
            Err(PosError::AuthorizationError(_))
        ));
    }

    #[tokio::test]
    async fn test_code_is_scoped_to_its_request() {
        let gate = gate(None);
        let first = pending(&gate, "tx-1").await;
        let mut second = pending(&gate, "tx-2").await;
        while second.code == first.code {
            second = pending(&gate, "tx-2").await;
        }

        assert!(gate.resolve_by_code(&first.id, &first.code).await.unwrap());
        assert!(!gate.resolve_by_code(&second.id, &first.code).await.unwrap());
        assert_eq!(gate.get(&second.id).await.unwrap().status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn test_wrong_code_keeps_request_pending() {
        let gate = gate(None);
        let request = pending(&gate, "tx-1").await;
        let wrong = if request.code == "000000" { "000001" } else { "000000" };

        assert!(!gate.resolve_by_code(&request.id, wrong).await.unwrap());
        assert!(!gate.resolve_by_code(&request.id, wrong).await.unwrap());

        let current = gate.get(&request.id).await.unwrap();
        assert_eq!(current.status, ApprovalStatus::Pending);
        assert_eq!(current.failed_attempts, 2);

        assert!(gate.resolve_by_code(&request.id, &request.code).await.unwrap());
    }

    #[tokio::test]
    async fn test_manager_auth_requires_privileged_role() {
        let gate = gate(None);
        let request = pending(&gate, "tx-1").await;

        assert!(!gate.resolve_by_manager_auth(&request.id, &creds("cash-1", "1111")).await.unwrap());
        assert!(!gate.resolve_by_manager_auth(&request.id, &creds("mgr-1", "0000")).await.unwrap());
        assert!(gate.resolve_by_manager_auth(&request.id, &creds("own-1", "4321")).await.unwrap());

        let resolved = gate.get(&request.id).await.unwrap();
        assert_eq!(resolved.resolution, Some(ResolutionMethod::ManagerAuth));
        assert_eq!(resolved.resolved_by.as_deref(), Some("own-1"));
    }

    #[tokio::test]
    async fn test_denied_request_is_final() {
        let gate = gate(None);
        let request = pending(&gate, "tx-1").await;

        gate.deny(&request.id).await.unwrap();
        assert!(gate.resolve_by_code(&request.id, &request.code).await.is_err());
        assert!(gate.deny(&request.id).await.is_err());
        assert_eq!(gate.get(&request.id).await.unwrap().status, ApprovalStatus::Denied);
    }

    #[tokio::test]
    async fn test_request_expires_after_ttl() {
        let gate = gate(Some(0));
        let request = pending(&gate, "tx-1").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert!(gate.resolve_by_code(&request.id, &request.code).await.is_err());
        assert_eq!(gate.get(&request.id).await.unwrap().status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn test_find_for_transaction_returns_latest() {
        let gate = gate(None);
        let first = pending(&gate, "tx-1").await;
        gate.deny(&first.id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = pending(&gate, "tx-1").await;

        let found = gate.find_for_transaction("tx-1").await.unwrap();
        assert_eq!(found.id, second.id);
        assert!(gate.find_for_transaction("tx-9").await.is_none());
    }

    #[tokio::test]
    async fn test_settled_requests_are_dropped_after_retention() {
        let gate = gate_with(ApprovalConfig {
            retention_secs: 0,
            ..ApprovalConfig::default()
        });
        let denied = pending(&gate, "tx-1").await;
        gate.deny(&denied.id).await.unwrap();
        let waiting = pending(&gate, "tx-2").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        pending(&gate, "tx-3").await;

        assert!(gate.get(&denied.id).await.is_none());
        assert!(gate.find_for_transaction("tx-1").await.is_none());
        // Still pending, so kept regardless of age.
        assert_eq!(gate.find_for_transaction("tx-2").await.unwrap().id, waiting.id);
    }

    #[tokio::test]
    async fn test_settled_requests_kept_within_retention() {
        let gate = gate(None);
        let approved = pending(&gate, "tx-1").await;
        assert!(gate.resolve_by_code(&approved.id, &approved.code).await.unwrap());

        pending(&gate, "tx-2").await;

        assert!(gate.find_for_transaction("tx-1").await.unwrap().is_approved());
    }
}
