#![allow(dead_code)]

use pos_engine::application::orchestrator::{Collaborators, TransactionOrchestrator};
use pos_engine::application::registry::GatewayRegistry;
use pos_engine::config::EngineConfig;
use pos_engine::domain::approval::Role;
use pos_engine::domain::cart::{Cart, LineItem};
use pos_engine::domain::gateway::{Gateway, GatewayTier};
use pos_engine::domain::money::{Amount, Money};
use pos_engine::domain::payment::{CardBrand, PaymentLine};
use pos_engine::infrastructure::in_memory::{
    InMemoryCustomerDirectory, InMemoryOfflineStore, InMemoryOrderLedger,
};
use pos_engine::infrastructure::simulated::{
    ConnectivityFlag, LogNotifier, SimulatedProcessor, StaticAuthenticator,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

/// An orchestrator wired to in-memory collaborators the test can inspect.
pub struct Harness {
    pub orchestrator: TransactionOrchestrator,
    pub primary: Arc<SimulatedProcessor>,
    pub secondary: Arc<SimulatedProcessor>,
    pub ledger: InMemoryOrderLedger,
    pub offline: InMemoryOfflineStore,
    pub customers: InMemoryCustomerDirectory,
    pub notifier: Arc<LogNotifier>,
    pub connectivity: Arc<ConnectivityFlag>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        let primary = Arc::new(SimulatedProcessor::approving("primary"));
        let secondary = Arc::new(SimulatedProcessor::approving("secondary"));

        let mut registry = GatewayRegistry::new(&config.health, config.timeouts.processor());
        registry.register(
            Gateway::new("primary", "Primary", GatewayTier::Primary, 1, 2),
            primary.clone(),
        );
        registry.register(
            Gateway::new("secondary", "Secondary", GatewayTier::Secondary, 2, 2),
            secondary.clone(),
        );

        let ledger = InMemoryOrderLedger::new();
        let offline = InMemoryOfflineStore::new();
        let customers = InMemoryCustomerDirectory::new();
        let notifier = Arc::new(LogNotifier::new());
        let connectivity = Arc::new(ConnectivityFlag::new(true));
        let authenticator = StaticAuthenticator::new()
            .with_employee("mgr-1", "1234", Role::Manager)
            .with_employee("cashier-1", "0000", Role::Cashier);

        let orchestrator = TransactionOrchestrator::new(
            &config,
            Arc::new(registry),
            Collaborators {
                ledger: Box::new(ledger.clone()),
                offline_store: Box::new(offline.clone()),
                customers: Arc::new(customers.clone()),
                notifier: notifier.clone(),
                connectivity: connectivity.clone(),
                authenticator: Arc::new(authenticator),
            },
        );

        Self {
            orchestrator,
            primary,
            secondary,
            ledger,
            offline,
            customers,
            notifier,
            connectivity,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(test_config())
    }
}

/// Defaults with fast retries and a $20 approval threshold.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.backoff_ms = 1;
    config.timeouts.processor_ms = 100;
    config.approval.minimum_sale = Money::new(dec!(20.00));
    config
}

pub fn cart(prices: &[Decimal]) -> Cart {
    Cart::new(
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| LineItem {
                id: format!("sku-{}", i + 1),
                name: format!("Item {}", i + 1),
                unit_price: Money::new(*price),
                quantity: 1,
                category: "general".into(),
                requires_shipping: false,
            })
            .collect(),
    )
}

pub fn card(amount: Decimal) -> PaymentLine {
    PaymentLine::card(Amount::new(amount).unwrap(), CardBrand::Visa, "4242")
}

pub fn cash(amount: Decimal) -> PaymentLine {
    PaymentLine::cash(Amount::new(amount).unwrap())
}
