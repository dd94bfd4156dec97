use super::approval::ApprovalGate;
use super::executor::{PaymentExecutor, settle_locally};
use super::registry::GatewayRegistry;
use super::split::{SplitPaymentCoordinator, SplitPolicy};
use super::vault::{OfflineCapture, OfflineVault};
use crate::config::{EngineConfig, LoyaltyConfig, RetryConfig, StoreConfig, TimeoutConfig};
use crate::domain::cart::{Cart, Customer, Totals};
use crate::domain::gateway::GatewayEvent;
use crate::domain::money::Money;
use crate::domain::offline::{OfflinePaymentMethod, OfflineTransaction};
use crate::domain::order::{
    Order, OrderNumber, OrderSource, OrderStatus, PaymentVerification, Receipt, SideEffects,
};
use crate::domain::payment::{PaymentLine, ProcessingStatus};
use crate::domain::ports::{
    AuthenticatorRef, ConnectivityProbeRef, CustomerDirectoryRef, OfflineStoreBox, OrderLedger,
    OrderLedgerBox, ReceiptNotifierRef,
};
use crate::error::{ErrorDetail, PosError, Result};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// One sale as submitted by the till.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Idempotency key for the whole checkout, reused on resubmission.
    pub transaction_id: String,
    pub order_number: OrderNumber,
    pub cart: Cart,
    pub payment_lines: Vec<PaymentLine>,
    pub customer: Option<Customer>,
    pub operator_id: String,
    pub discount: Money,
    /// Overrides `payments.allow_partial` for this checkout.
    pub allow_partial: Option<bool>,
}

impl CheckoutRequest {
    pub fn new(
        transaction_id: impl Into<String>,
        cart: Cart,
        payment_lines: Vec<PaymentLine>,
        operator_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            order_number: OrderNumber::generate(),
            cart,
            payment_lines,
            customer: None,
            operator_id: operator_id.into(),
            discount: Money::ZERO,
            allow_partial: None,
        }
    }

    pub fn with_customer(mut self, customer: Customer) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_discount(mut self, discount: Money) -> Self {
        self.discount = discount;
        self
    }

    pub fn with_order_number(mut self, order_number: OrderNumber) -> Self {
        self.order_number = order_number;
        self
    }

    pub fn allow_partial(mut self, allow: bool) -> Self {
        self.allow_partial = Some(allow);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutState {
    Idle,
    ApprovalCheck,
    Blocked,
    ConnectivityCheck,
    Paying,
    LedgerWrite,
    SideEffects,
    Complete,
    QueuedOffline,
    Failed,
}

/// Per-checkout state, threaded through every step instead of living on the
/// orchestrator.
#[derive(Debug, Clone)]
pub struct CheckoutContext {
    pub transaction_id: String,
    pub state: CheckoutState,
    pub trail: Vec<CheckoutState>,
    pub attempts: u32,
    pub warnings: Vec<String>,
}

impl CheckoutContext {
    fn new(transaction_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            state: CheckoutState::Idle,
            trail: vec![CheckoutState::Idle],
            attempts: 0,
            warnings: Vec::new(),
        }
    }

    fn advance(&mut self, next: CheckoutState) {
        debug!(transaction_id = %self.transaction_id, from = ?self.state, to = ?next, "Checkout state");
        self.state = next;
        self.trail.push(next);
    }

    fn warn(&mut self, message: String) {
        warn!(transaction_id = %self.transaction_id, "{message}");
        self.warnings.push(message);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Complete {
        order: Order,
        receipt: Receipt,
        warnings: Vec<String>,
    },
    /// Waiting on a manager; resubmit the same request once resolved.
    Blocked { approval_id: String },
    QueuedOffline { offline_id: String },
    Failed {
        detail: ErrorDetail,
        lines: Vec<PaymentLine>,
        attempts: u32,
    },
}

/// Cancels a running checkout. Ignored once the ledger write has started.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal nobody can trip.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplayStatus {
    Replayed(Order),
    AlreadySynced,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub synced: Vec<OrderNumber>,
    pub skipped: usize,
    pub failed: Vec<(String, ErrorDetail)>,
}

/// Everything the orchestrator talks to besides the gateways.
pub struct Collaborators {
    pub ledger: OrderLedgerBox,
    pub offline_store: OfflineStoreBox,
    pub customers: CustomerDirectoryRef,
    pub notifier: ReceiptNotifierRef,
    pub connectivity: ConnectivityProbeRef,
    pub authenticator: AuthenticatorRef,
}

enum ApprovalGateState {
    Open(Option<String>),
    Blocked(String),
}

/// Sequences approval, payment, ledger write and side effects for a checkout.
pub struct TransactionOrchestrator {
    registry: Arc<GatewayRegistry>,
    coordinator: SplitPaymentCoordinator,
    approvals: ApprovalGate,
    vault: OfflineVault,
    ledger: OrderLedgerBox,
    customers: CustomerDirectoryRef,
    notifier: ReceiptNotifierRef,
    connectivity: ConnectivityProbeRef,
    policy: SplitPolicy,
    minimum_sale: Money,
    store: StoreConfig,
    retry: RetryConfig,
    timeouts: TimeoutConfig,
    loyalty: LoyaltyConfig,
}

impl TransactionOrchestrator {
    pub fn new(config: &EngineConfig, registry: Arc<GatewayRegistry>, collaborators: Collaborators) -> Self {
        let executor = PaymentExecutor::new(registry.clone(), config.timeouts.processor());
        Self {
            coordinator: SplitPaymentCoordinator::new(registry.clone(), executor, &config.payments),
            registry,
            approvals: ApprovalGate::new(&config.approval, collaborators.authenticator),
            vault: OfflineVault::new(collaborators.offline_store),
            ledger: collaborators.ledger,
            customers: collaborators.customers,
            notifier: collaborators.notifier,
            connectivity: collaborators.connectivity,
            policy: SplitPolicy::from_config(&config.payments),
            minimum_sale: config.approval.minimum_sale,
            store: config.store.clone(),
            retry: config.retry.clone(),
            timeouts: config.timeouts.clone(),
            loyalty: config.loyalty.clone(),
        }
    }

    pub fn approvals(&self) -> &ApprovalGate {
        &self.approvals
    }

    pub fn vault(&self) -> &OfflineVault {
        &self.vault
    }

    pub fn ledger(&self) -> &dyn OrderLedger {
        self.ledger.as_ref()
    }

    pub fn registry(&self) -> &Arc<GatewayRegistry> {
        &self.registry
    }

    pub fn gateway_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.registry.subscribe()
    }

    /// Logs every change of active gateway until the registry goes away.
    pub fn spawn_gateway_watch(&self) -> JoinHandle<()> {
        let mut events = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(GatewayEvent::ActiveChanged { previous, current: Some(current) }) => {
                        info!(?previous, %current, "Payments now routed through gateway");
                    }
                    Ok(GatewayEvent::ActiveChanged { previous, current: None }) => {
                        warn!(?previous, "No payment gateway online");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed gateway events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn checkout(&self, request: CheckoutRequest) -> CheckoutOutcome {
        self.run(request, CancelSignal::never()).await.0
    }

    /// Drives one checkout to a terminal outcome and returns the context it
    /// accumulated on the way.
    #[instrument(
        skip_all,
        fields(transaction_id = %request.transaction_id, order_number = %request.order_number)
    )]
    pub async fn run(&self, request: CheckoutRequest, cancel: CancelSignal) -> (CheckoutOutcome, CheckoutContext) {
        let mut ctx = CheckoutContext::new(&request.transaction_id);
        let outcome = self.drive(&request, &cancel, &mut ctx).await;
        match &outcome {
            CheckoutOutcome::Complete { order, .. } => {
                info!(total = %order.totals.grand_total, attempts = ctx.attempts, "Checkout complete");
            }
            CheckoutOutcome::Blocked { approval_id } => {
                info!(%approval_id, "Checkout waiting for approval");
            }
            CheckoutOutcome::QueuedOffline { offline_id } => {
                info!(%offline_id, "Checkout queued offline");
            }
            CheckoutOutcome::Failed { detail, attempts, .. } => {
                warn!(kind = ?detail.kind, message = %detail.message, attempts, "Checkout failed");
            }
        }
        (outcome, ctx)
    }

    async fn drive(
        &self,
        request: &CheckoutRequest,
        cancel: &CancelSignal,
        ctx: &mut CheckoutContext,
    ) -> CheckoutOutcome {
        let submitted = request.payment_lines.clone();

        if let Err(e) = validate_request(request) {
            return failed(ctx, e.into(), submitted);
        }
        let totals = request.cart.totals(self.store.tax_rate, request.discount);
        if cancel.is_cancelled() {
            return failed(ctx, PosError::Cancelled.into(), submitted);
        }

        ctx.advance(CheckoutState::ApprovalCheck);
        let approval_id = match self.check_approval(request, totals.grand_total).await {
            Ok(ApprovalGateState::Open(approval_id)) => approval_id,
            Ok(ApprovalGateState::Blocked(approval_id)) => {
                ctx.advance(CheckoutState::Blocked);
                return CheckoutOutcome::Blocked { approval_id };
            }
            Err(detail) => return failed(ctx, detail, submitted),
        };

        ctx.advance(CheckoutState::ConnectivityCheck);
        if !self.connectivity.is_online().await {
            return self.queue_offline(request, totals, approval_id, ctx).await;
        }
        match self.vault.get(&request.transaction_id).await {
            Ok(Some(queued)) => {
                ctx.warn(format!("Transaction already queued offline as {}; sync to complete it", queued.id));
                ctx.advance(CheckoutState::QueuedOffline);
                return CheckoutOutcome::QueuedOffline { offline_id: queued.id };
            }
            Ok(None) => {}
            Err(e) => return failed(ctx, e.into(), submitted),
        }
        let existing = bounded(
            self.timeouts.ledger(),
            "Ledger lookup",
            self.ledger.get_order(&request.order_number),
        )
        .await;
        match existing {
            Ok(Some(order)) if order.transaction_id != request.transaction_id => {
                return failed(ctx, order_number_taken(&order).into(), submitted);
            }
            Ok(Some(order)) => {
                ctx.warn(format!("Order {} already recorded; no payment taken", order.order_number));
                ctx.advance(CheckoutState::Complete);
                let receipt = Receipt::for_order(&order, &self.store.store_name, request.customer.as_ref());
                return CheckoutOutcome::Complete {
                    order,
                    receipt,
                    warnings: ctx.warnings.clone(),
                };
            }
            Ok(None) => {}
            Err(e) => return failed(ctx, e.into(), submitted),
        }

        let policy = SplitPolicy {
            allow_partial: request.allow_partial.unwrap_or(self.policy.allow_partial),
            ..self.policy
        };
        let budget = self.attempt_budget().await;
        let mut lines = submitted;
        let mut ledger_started = false;

        loop {
            if !ledger_started && cancel.is_cancelled() {
                return failed(ctx, PosError::Cancelled.into(), lines);
            }
            ctx.attempts += 1;
            ctx.advance(CheckoutState::Paying);

            let outcome = match self
                .coordinator
                .process(&request.transaction_id, lines.clone(), totals.grand_total, policy)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => return failed(ctx, e.into(), lines),
            };
            lines = outcome.lines.clone();

            let detail = if outcome.success {
                if !ledger_started && cancel.is_cancelled() {
                    return failed(ctx, PosError::Cancelled.into(), lines);
                }
                ledger_started = true;
                ctx.advance(CheckoutState::LedgerWrite);
                match self.write_order(request, totals, &lines, approval_id.clone()).await {
                    Ok(order) if order.transaction_id != request.transaction_id => {
                        error!(
                            order_number = %order.order_number,
                            owner = %order.transaction_id,
                            "Payment taken but order number was claimed by another sale"
                        );
                        return failed(ctx, order_number_taken(&order).into(), lines);
                    }
                    Ok(order) => return self.apply_side_effects(order, request, ctx).await,
                    Err(e) => ErrorDetail::from(&e),
                }
            } else {
                outcome.error_detail(totals.grand_total)
            };

            if !detail.retryable || ctx.attempts >= budget {
                return failed(ctx, detail, lines);
            }
            warn!(
                attempt = ctx.attempts,
                budget,
                error = %detail.message,
                "Retrying checkout after transient failure"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.retry.backoff()) => {}
                _ = cancel.cancelled(), if !ledger_started => {}
            }
        }
    }

    async fn check_approval(
        &self,
        request: &CheckoutRequest,
        sale_amount: Money,
    ) -> std::result::Result<ApprovalGateState, ErrorDetail> {
        if !ApprovalGate::required(sale_amount, self.minimum_sale) {
            return Ok(ApprovalGateState::Open(None));
        }

        match self.approvals.find_for_transaction(&request.transaction_id).await {
            Some(existing) if existing.is_approved() => Ok(ApprovalGateState::Open(Some(existing.id))),
            Some(existing) if !existing.status.is_terminal() => Ok(ApprovalGateState::Blocked(existing.id)),
            Some(existing) => {
                let err = PosError::AuthorizationError(format!(
                    "Approval request {} was {:?}",
                    existing.id, existing.status
                ));
                Err(ErrorDetail::from(&err).for_approval(existing.id))
            }
            None => {
                let created = self
                    .approvals
                    .create_request(
                        &request.transaction_id,
                        sale_amount,
                        self.minimum_sale,
                        &request.operator_id,
                    )
                    .await;
                Ok(ApprovalGateState::Blocked(created.id))
            }
        }
    }

    async fn queue_offline(
        &self,
        request: &CheckoutRequest,
        totals: Totals,
        approval_id: Option<String>,
        ctx: &mut CheckoutContext,
    ) -> CheckoutOutcome {
        if let Err(e) = self.coordinator.validate(&request.payment_lines, totals.grand_total) {
            return failed(ctx, e.into(), request.payment_lines.clone());
        }
        let capture = OfflineCapture {
            transaction_id: request.transaction_id.clone(),
            order_number: request.order_number.clone(),
            cart: request.cart.items().to_vec(),
            totals,
            payment_lines: request.payment_lines.clone(),
            customer_id: request.customer.as_ref().map(|c| c.id.clone()),
            store_id: self.store.store_id.clone(),
            operator_id: request.operator_id.clone(),
            approval_id,
        };
        match self.vault.store(capture).await {
            Ok(stored) => {
                ctx.advance(CheckoutState::QueuedOffline);
                CheckoutOutcome::QueuedOffline { offline_id: stored.id }
            }
            Err(e) => failed(ctx, e.into(), request.payment_lines.clone()),
        }
    }

    /// Retry budget for the paying span: the configured attempts, capped by
    /// what the active gateway tolerates.
    async fn attempt_budget(&self) -> u32 {
        let configured = self.retry.max_attempts.max(1);
        match self.registry.select_active().await {
            Some(gateway) => configured.min(gateway.max_retries + 1),
            None => configured,
        }
    }

    async fn write_order(
        &self,
        request: &CheckoutRequest,
        totals: Totals,
        lines: &[PaymentLine],
        approval_id: Option<String>,
    ) -> Result<Order> {
        let order = Order {
            order_number: request.order_number.clone(),
            transaction_id: request.transaction_id.clone(),
            items: request.cart.items().to_vec(),
            totals,
            payment_lines: lines.to_vec(),
            approval_id,
            customer_id: request.customer.as_ref().map(|c| c.id.clone()),
            store_id: self.store.store_id.clone(),
            operator_id: request.operator_id.clone(),
            status: OrderStatus::Completed,
            source: OrderSource::Online,
            payment_verification: PaymentVerification::Verified,
            side_effects: SideEffects::default(),
            created_at: Utc::now(),
        };
        bounded(self.timeouts.ledger(), "Ledger write", self.ledger.create_order(order)).await
    }

    async fn apply_side_effects(
        &self,
        mut order: Order,
        request: &CheckoutRequest,
        ctx: &mut CheckoutContext,
    ) -> CheckoutOutcome {
        ctx.advance(CheckoutState::SideEffects);
        let total = order.totals.grand_total;
        let mut effects = SideEffects::default();

        if let Some(customer) = &request.customer {
            let points = (total.value() * self.loyalty.points_per_unit)
                .floor()
                .to_u64()
                .unwrap_or(0);
            if points > 0 {
                let accrued = bounded(
                    self.timeouts.loyalty(),
                    "Loyalty update",
                    self.customers.accrue_loyalty(&customer.id, points),
                )
                .await;
                match accrued {
                    Ok(balance) => {
                        debug!(customer = %customer.id, points, balance, "Loyalty points accrued");
                        effects.loyalty_points = Some(points);
                    }
                    Err(e) => ctx.warn(format!("Loyalty points not accrued: {e}")),
                }
            }
        }

        if self.loyalty.commission_rate > rust_decimal::Decimal::ZERO {
            effects.commission = Some((total * self.loyalty.commission_rate).round_cents());
        }

        if effects != SideEffects::default() {
            let attached = bounded(
                self.timeouts.ledger(),
                "Side effect update",
                self.ledger.attach_side_effects(&order.order_number, effects.clone()),
            )
            .await;
            match attached {
                Ok(()) => order.side_effects = effects,
                Err(e) => ctx.warn(format!("Side effects not recorded on order: {e}")),
            }
        }

        let receipt = Receipt::for_order(&order, &self.store.store_name, request.customer.as_ref());
        let sent = bounded(
            self.timeouts.notification(),
            "Receipt delivery",
            self.notifier.send_receipt(&receipt),
        )
        .await;
        if let Err(e) = sent {
            ctx.warn(format!("Receipt not delivered: {e}"));
        }

        ctx.advance(CheckoutState::Complete);
        CheckoutOutcome::Complete {
            order,
            receipt,
            warnings: ctx.warnings.clone(),
        }
    }

    /// Replays every pending offline record. Requires connectivity.
    #[instrument(skip_all)]
    pub async fn sync_offline(&self) -> Result<SyncReport> {
        if !self.connectivity.is_online().await {
            return Err(PosError::TransientError(
                "No connectivity; offline transactions stay queued".to_string(),
            ));
        }

        let mut report = SyncReport::default();
        for tx in self.vault.list_pending().await? {
            match self.replay(&tx).await {
                Ok(ReplayStatus::Replayed(order)) => report.synced.push(order.order_number),
                Ok(ReplayStatus::AlreadySynced) => report.skipped += 1,
                Err(e) => {
                    error!(offline_id = %tx.id, error = %e, "Offline transaction rejected");
                    report.failed.push((tx.id.clone(), ErrorDetail::from(&e)));
                }
            }
        }
        info!(
            synced = report.synced.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            "Offline sync finished"
        );
        Ok(report)
    }

    /// Turns one verified offline record into an order, at most once.
    #[instrument(skip_all, fields(offline_id = %tx.id))]
    pub async fn replay(&self, tx: &OfflineTransaction) -> Result<ReplayStatus> {
        let stored = self
            .vault
            .get(&tx.id)
            .await?
            .ok_or_else(|| PosError::NotFound(format!("offline transaction {}", tx.id)))?;
        self.vault.verify(tx).await?;
        if stored.synced {
            debug!("Offline transaction already synced");
            return Ok(ReplayStatus::AlreadySynced);
        }

        let verification = match stored.payment_method {
            OfflinePaymentMethod::Cash => PaymentVerification::Verified,
            OfflinePaymentMethod::PendingVerification { .. } => PaymentVerification::PendingVerification,
        };
        let payment_lines = stored
            .payment_lines
            .iter()
            .map(|line| {
                let mut line = line.clone();
                if line.method.requires_authorization() {
                    line.status = ProcessingStatus::Pending;
                } else if !line.is_completed() {
                    let settled = settle_locally(&line);
                    line.apply(&settled);
                }
                line
            })
            .collect();

        let order = Order {
            order_number: stored.order_number.clone(),
            transaction_id: stored.id.clone(),
            items: stored.cart.clone(),
            totals: stored.totals,
            payment_lines,
            approval_id: stored.approval_id.clone(),
            customer_id: stored.customer_id.clone(),
            store_id: stored.store_id.clone(),
            operator_id: stored.operator_id.clone(),
            status: OrderStatus::Completed,
            source: OrderSource::OfflineReplay,
            payment_verification: verification,
            side_effects: SideEffects::default(),
            created_at: stored.timestamp,
        };
        let order = bounded(self.timeouts.ledger(), "Ledger write", self.ledger.create_order(order)).await?;
        self.vault.mark_synced(&stored.id).await?;

        if order.payment_verification == PaymentVerification::PendingVerification {
            warn!(order_number = %order.order_number, "Replayed order has payments awaiting verification");
        }
        Ok(ReplayStatus::Replayed(order))
    }
}

fn validate_request(request: &CheckoutRequest) -> Result<()> {
    if request.transaction_id.trim().is_empty() {
        return Err(PosError::validation("transaction_id", "Transaction id is required"));
    }
    request.cart.validate()?;
    if request.cart.requires_shipping()
        && !request
            .customer
            .as_ref()
            .is_some_and(Customer::has_complete_address)
    {
        return Err(PosError::validation(
            "customer.address",
            "Items that ship need a customer with a complete address",
        ));
    }
    Ok(())
}

fn order_number_taken(order: &Order) -> PosError {
    PosError::validation(
        "order_number",
        format!(
            "Order number {} already belongs to transaction {}",
            order.order_number, order.transaction_id
        ),
    )
}

fn failed(ctx: &mut CheckoutContext, detail: ErrorDetail, lines: Vec<PaymentLine>) -> CheckoutOutcome {
    ctx.advance(CheckoutState::Failed);
    CheckoutOutcome::Failed {
        detail,
        lines,
        attempts: ctx.attempts,
    }
}

async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PosError::TransientError(format!("{what} timed out after {limit:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cart::LineItem;
    use crate::domain::gateway::{Gateway, GatewayTier};
    use crate::domain::money::Amount;
    use crate::domain::payment::CardBrand;
    use crate::error::ErrorKind;
    use crate::infrastructure::in_memory::{
        InMemoryCustomerDirectory, InMemoryOfflineStore, InMemoryOrderLedger,
    };
    use crate::infrastructure::simulated::{
        ConnectivityFlag, LogNotifier, SimulatedOutcome, SimulatedProcessor, StaticAuthenticator,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Ledger whose first `failures` writes report an outage.
    struct FlakyLedger {
        inner: InMemoryOrderLedger,
        failures: AtomicU32,
    }

    #[async_trait]
    impl OrderLedger for FlakyLedger {
        async fn create_order(&self, order: Order) -> Result<Order> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PosError::TransientError("ledger unavailable".into()));
            }
            self.inner.create_order(order).await
        }

        async fn get_order(&self, order_number: &OrderNumber) -> Result<Option<Order>> {
            self.inner.get_order(order_number).await
        }

        async fn attach_side_effects(&self, order_number: &OrderNumber, effects: SideEffects) -> Result<()> {
            self.inner.attach_side_effects(order_number, effects).await
        }

        async fn all_orders(&self) -> Result<Vec<Order>> {
            self.inner.all_orders().await
        }
    }

    /// Ledger whose lookups miss, as when another till writes the same number
    /// between our lookup and our write.
    struct RacingLedger {
        inner: InMemoryOrderLedger,
    }

    #[async_trait]
    impl OrderLedger for RacingLedger {
        async fn create_order(&self, order: Order) -> Result<Order> {
            self.inner.create_order(order).await
        }

        async fn get_order(&self, _order_number: &OrderNumber) -> Result<Option<Order>> {
            Ok(None)
        }

        async fn attach_side_effects(&self, order_number: &OrderNumber, effects: SideEffects) -> Result<()> {
            self.inner.attach_side_effects(order_number, effects).await
        }

        async fn all_orders(&self) -> Result<Vec<Order>> {
            self.inner.all_orders().await
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.retry.backoff_ms = 1;
        config.timeouts.processor_ms = 50;
        config
    }

    fn orchestrator(
        primary: Arc<SimulatedProcessor>,
        backup: Arc<SimulatedProcessor>,
        ledger: OrderLedgerBox,
        config: &EngineConfig,
    ) -> TransactionOrchestrator {
        let mut registry = GatewayRegistry::new(&config.health, config.timeouts.processor());
        registry.register(Gateway::new("primary", "Primary", GatewayTier::Primary, 1, 2), primary);
        registry.register(Gateway::new("backup", "Backup", GatewayTier::Backup, 2, 1), backup);
        TransactionOrchestrator::new(
            config,
            Arc::new(registry),
            Collaborators {
                ledger,
                offline_store: Box::new(InMemoryOfflineStore::new()),
                customers: Arc::new(InMemoryCustomerDirectory::new()),
                notifier: Arc::new(LogNotifier::new()),
                connectivity: Arc::new(ConnectivityFlag::new(true)),
                authenticator: Arc::new(StaticAuthenticator::new()),
            },
        )
    }

    fn backup() -> Arc<SimulatedProcessor> {
        Arc::new(SimulatedProcessor::approving("backup"))
    }

    fn request(total: rust_decimal::Decimal) -> CheckoutRequest {
        let cart = Cart::new(vec![LineItem {
            id: "sku-1".into(),
            name: "Headphones".into(),
            unit_price: Money::new(total),
            quantity: 1,
            category: "audio".into(),
            requires_shipping: false,
        }]);
        let line = PaymentLine::card(Amount::new(total).unwrap(), CardBrand::Visa, "4242");
        CheckoutRequest::new("tx-1", cart, vec![line], "emp-1")
    }

    #[tokio::test]
    async fn test_state_trail_for_completed_checkout() {
        let processor = Arc::new(SimulatedProcessor::approving("primary"));
        let orchestrator = orchestrator(processor, backup(), Box::new(InMemoryOrderLedger::new()), &config());

        let (outcome, ctx) = orchestrator.run(request(dec!(50)), CancelSignal::never()).await;
        assert!(matches!(outcome, CheckoutOutcome::Complete { .. }));
        assert_eq!(
            ctx.trail,
            vec![
                CheckoutState::Idle,
                CheckoutState::ApprovalCheck,
                CheckoutState::ConnectivityCheck,
                CheckoutState::Paying,
                CheckoutState::LedgerWrite,
                CheckoutState::SideEffects,
                CheckoutState::Complete,
            ]
        );
        assert_eq!(ctx.attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_without_double_charge() {
        let processor = Arc::new(SimulatedProcessor::scripted(
            "primary",
            vec![SimulatedOutcome::Unavailable("connection reset".into())],
        ));
        let orchestrator = orchestrator(processor.clone(), backup(), Box::new(InMemoryOrderLedger::new()), &config());

        let (outcome, ctx) = orchestrator.run(request(dec!(50)), CancelSignal::never()).await;
        let CheckoutOutcome::Complete { order, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(ctx.attempts, 2);
        assert_eq!(processor.call_count(), 1);
        assert_eq!(order.payment_lines[0].gateway_id.as_deref(), Some("backup"));
    }

    #[tokio::test]
    async fn test_retries_capped_by_gateway_budget() {
        let slow = || {
            Arc::new(SimulatedProcessor::scripted(
                "slow",
                (0..10).map(|_| SimulatedOutcome::Delay(Duration::from_millis(200))),
            ))
        };
        let (primary, backup) = (slow(), slow());
        let mut config = config();
        config.retry.max_attempts = 10;
        let orchestrator = orchestrator(
            primary.clone(),
            backup.clone(),
            Box::new(InMemoryOrderLedger::new()),
            &config,
        );

        let outcome = orchestrator.checkout(request(dec!(50))).await;
        let CheckoutOutcome::Failed { detail, attempts, lines } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        // Primary allows 2 retries, so 3 attempts: primary, backup, then nothing online.
        assert_eq!(attempts, 3);
        assert_eq!(primary.call_count(), 1);
        assert_eq!(backup.call_count(), 1);
        assert_eq!(detail.kind, ErrorKind::Transient);
        assert!(detail.retryable);
        assert_eq!(lines[0].status, ProcessingStatus::Failed);
    }

    #[tokio::test]
    async fn test_decline_is_not_retried() {
        let processor = Arc::new(SimulatedProcessor::scripted(
            "primary",
            vec![SimulatedOutcome::Decline("insufficient funds".into())],
        ));
        let orchestrator = orchestrator(processor.clone(), backup(), Box::new(InMemoryOrderLedger::new()), &config());

        let outcome = orchestrator.checkout(request(dec!(50))).await;
        let CheckoutOutcome::Failed { detail, attempts, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(attempts, 1);
        assert_eq!(detail.kind, ErrorKind::Authorization);
        assert_eq!(detail.payment_line, Some(0));
        assert_eq!(processor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_ledger_outage_retried_without_charging_again() {
        let processor = Arc::new(SimulatedProcessor::approving("primary"));
        let ledger = InMemoryOrderLedger::new();
        let flaky = FlakyLedger {
            inner: ledger.clone(),
            failures: AtomicU32::new(1),
        };
        let orchestrator = orchestrator(processor.clone(), backup(), Box::new(flaky), &config());

        let (outcome, ctx) = orchestrator.run(request(dec!(50)), CancelSignal::never()).await;
        assert!(matches!(outcome, CheckoutOutcome::Complete { .. }));
        assert_eq!(ctx.attempts, 2);
        assert_eq!(processor.call_count(), 1);
        assert_eq!(ledger.all_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_payment() {
        let processor = Arc::new(SimulatedProcessor::approving("primary"));
        let ledger = InMemoryOrderLedger::new();
        let orchestrator = orchestrator(processor.clone(), backup(), Box::new(ledger.clone()), &config());

        let (handle, signal) = cancellation();
        handle.cancel();
        let (outcome, ctx) = orchestrator.run(request(dec!(50)), signal).await;

        let CheckoutOutcome::Failed { detail, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(detail.kind, ErrorKind::Cancelled);
        assert_eq!(ctx.state, CheckoutState::Failed);
        assert_eq!(processor.call_count(), 0);
        assert!(ledger.all_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_stops_retries() {
        let processor = Arc::new(SimulatedProcessor::scripted(
            "primary",
            vec![SimulatedOutcome::Unavailable("connection reset".into())],
        ));
        let mut config = config();
        config.retry.backoff_ms = 5_000;
        let orchestrator = Arc::new(orchestrator(
            processor.clone(),
            backup(),
            Box::new(InMemoryOrderLedger::new()),
            &config,
        ));

        let (handle, signal) = cancellation();
        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(request(dec!(50)), signal).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let (outcome, _) = running.await.unwrap();
        let CheckoutOutcome::Failed { detail, attempts, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(detail.kind, ErrorKind::Cancelled);
        assert_eq!(attempts, 1);
        assert_eq!(processor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_shipping_items_need_customer_address() {
        let processor = Arc::new(SimulatedProcessor::approving("primary"));
        let orchestrator = orchestrator(processor, backup(), Box::new(InMemoryOrderLedger::new()), &config());

        let mut request = request(dec!(50));
        request.cart = Cart::new(vec![LineItem {
            requires_shipping: true,
            ..request.cart.items()[0].clone()
        }]);

        let outcome = orchestrator.checkout(request).await;
        let CheckoutOutcome::Failed { detail, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(detail.field.as_deref(), Some("customer.address"));
        assert!(!detail.retryable);
    }

    #[tokio::test]
    async fn test_cancel_after_ledger_write_started_is_ignored() {
        let processor = Arc::new(SimulatedProcessor::approving("primary"));
        let ledger = InMemoryOrderLedger::new();
        let flaky = FlakyLedger {
            inner: ledger.clone(),
            failures: AtomicU32::new(1),
        };
        let mut config = config();
        config.retry.backoff_ms = 300;
        let orchestrator = Arc::new(orchestrator(processor.clone(), backup(), Box::new(flaky), &config));

        let (handle, signal) = cancellation();
        let running = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(request(dec!(50)), signal).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        let (outcome, ctx) = running.await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Complete { .. }), "got {outcome:?}");
        assert_eq!(ctx.attempts, 2);
        assert_eq!(processor.call_count(), 1);
        assert_eq!(ledger.all_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_order_number_claimed_during_payment_fails_checkout() {
        let processor = Arc::new(SimulatedProcessor::approving("primary"));
        let ledger = InMemoryOrderLedger::new();
        let orchestrator = orchestrator(
            processor.clone(),
            backup(),
            Box::new(RacingLedger { inner: ledger.clone() }),
            &config(),
        );

        let number = OrderNumber::from("ORD-20261019120000-0007");
        let mut first = request(dec!(50)).with_order_number(number.clone());
        first.transaction_id = "tx-a".into();
        let mut second = request(dec!(90)).with_order_number(number.clone());
        second.transaction_id = "tx-b".into();
        second.payment_lines = vec![PaymentLine::card(Amount::new(dec!(90)).unwrap(), CardBrand::Visa, "4242")];
        second.cart = Cart::new(vec![LineItem {
            unit_price: Money::new(dec!(90)),
            ..second.cart.items()[0].clone()
        }]);

        assert!(matches!(orchestrator.checkout(first).await, CheckoutOutcome::Complete { .. }));
        let CheckoutOutcome::Failed { detail, lines, attempts } = orchestrator.checkout(second).await else {
            panic!("expected failure");
        };

        assert_eq!(detail.kind, ErrorKind::Validation);
        assert_eq!(detail.field.as_deref(), Some("order_number"));
        assert!(!detail.retryable);
        assert_eq!(attempts, 1);
        // The card was charged; the line says so for reconciliation.
        assert_eq!(lines[0].status, ProcessingStatus::Completed);
        assert_eq!(processor.call_count(), 2);

        let stored = ledger.get_order(&number).await.unwrap().unwrap();
        assert_eq!(stored.transaction_id, "tx-a");
        assert_eq!(ledger.all_orders().await.unwrap().len(), 1);
    }
}
