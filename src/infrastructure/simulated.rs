//! Stand-ins for the external collaborators.
//!
//! The CLI runs against these, and tests script them to produce declines,
//! timeouts and outages deterministically.

use crate::domain::approval::{ManagerCredentials, Principal, Role};
use crate::domain::order::Receipt;
use crate::domain::payment::{AuthorizationRequest, ProcessorResponse};
use crate::domain::ports::{Authenticator, ConnectivityProbe, PaymentProcessor, ReceiptNotifier};
use crate::error::{PosError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedOutcome {
    Approve,
    Decline(String),
    /// Sleeps before approving, to trip the caller's timeout.
    Delay(Duration),
    Unavailable(String),
}

/// Processor that answers from a script, then falls back to approving.
pub struct SimulatedProcessor {
    name: String,
    script: Mutex<VecDeque<SimulatedOutcome>>,
    healthy: AtomicBool,
    calls: Mutex<Vec<AuthorizationRequest>>,
    sequence: AtomicU64,
}

impl SimulatedProcessor {
    pub fn approving(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            healthy: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn scripted(name: &str, outcomes: impl IntoIterator<Item = SimulatedOutcome>) -> Self {
        let processor = Self::approving(name);
        for outcome in outcomes {
            processor.push_outcome(outcome);
        }
        processor
    }

    pub fn push_outcome(&self, outcome: SimulatedOutcome) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<AuthorizationRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    fn next_outcome(&self) -> SimulatedOutcome {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(SimulatedOutcome::Approve)
    }

    fn approve(&self) -> ProcessorResponse {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        ProcessorResponse::Approved {
            authorization_code: format!("{:06}", n),
        }
    }
}

#[async_trait]
impl PaymentProcessor for SimulatedProcessor {
    async fn authorize(&self, request: &AuthorizationRequest) -> Result<ProcessorResponse> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        match self.next_outcome() {
            SimulatedOutcome::Approve => Ok(self.approve()),
            SimulatedOutcome::Decline(reason) => Ok(ProcessorResponse::Declined { reason }),
            SimulatedOutcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.approve())
            }
            SimulatedOutcome::Unavailable(message) => Err(PosError::TransientError(format!(
                "{} unavailable: {message}",
                self.name
            ))),
        }
    }

    async fn health_check(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PosError::TransientError(format!("{} is not responding", self.name)))
        }
    }
}

/// Connectivity switch the caller flips.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for ConnectivityFlag {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Notifier that logs each receipt and keeps it for inspection.
#[derive(Default)]
pub struct LogNotifier {
    sent: Mutex<Vec<Receipt>>,
    failing: AtomicBool,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Receipt> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ReceiptNotifier for LogNotifier {
    async fn send_receipt(&self, receipt: &Receipt) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PosError::TransientError("receipt service unreachable".into()));
        }
        info!(
            order_number = %receipt.order_number,
            total = %receipt.totals.grand_total,
            "Receipt sent"
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(receipt.clone());
        }
        Ok(())
    }
}

/// Authenticator backed by a fixed employee table of `(pin, role)`.
#[derive(Default)]
pub struct StaticAuthenticator {
    employees: HashMap<String, (String, Role)>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_employee(mut self, employee_id: &str, pin: &str, role: Role) -> Self {
        self.employees
            .insert(employee_id.to_string(), (pin.to_string(), role));
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, credentials: &ManagerCredentials) -> Result<Option<Principal>> {
        Ok(self
            .employees
            .get(&credentials.employee_id)
            .filter(|(pin, _)| *pin == credentials.pin)
            .map(|(_, role)| Principal {
                employee_id: credentials.employee_id.clone(),
                role: *role,
            }))
    }
}
