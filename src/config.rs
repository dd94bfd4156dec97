//! Engine configuration.
//!
//! Values come from built-in defaults, then an optional file, then `POS__`
//! prefixed environment variables (e.g. `POS__RETRY__MAX_ATTEMPTS=5`).

use crate::domain::approval::Role;
use crate::domain::gateway::GatewayTier;
use crate::domain::money::Money;
use crate::error::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub approval: ApprovalConfig,
    pub payments: PaymentConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub timeouts: TimeoutConfig,
    pub loyalty: LoyaltyConfig,
    pub gateways: GatewayList,
    /// Staff who can re-authenticate to approve a sale.
    pub employees: Vec<EmployeeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub store_id: String,
    pub store_name: String,
    pub tax_rate: Decimal,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_id: "store-001".to_string(),
            store_name: "Main Street Store".to_string(),
            tax_rate: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Sales strictly below this amount need a manager's sign-off.
    pub minimum_sale: Money,
    pub privileged_roles: Vec<Role>,
    /// Pending requests expire after this many seconds; never when unset.
    pub request_ttl_secs: Option<u64>,
    /// Resolved, denied and expired requests are dropped this long after resolution.
    pub retention_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            minimum_sale: Money::ZERO,
            privileged_roles: vec![Role::Manager, Role::Owner],
            request_ttl_secs: None,
            retention_secs: 86_400,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaymentConfig {
    pub allow_partial: bool,
    /// Shortfall accepted as paid when partial approval is allowed.
    pub partial_tolerance: Decimal,
    pub cash_min: Money,
    pub cash_max: Money,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            allow_partial: false,
            partial_tolerance: dec!(0.05),
            cash_min: Money::new(dec!(0.01)),
            cash_max: Money::new(dec!(10000)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u64,
    /// Consecutive successes that bring an errored gateway back online.
    pub recovery_successes: u32,
    pub latency_window: usize,
    /// Cap on the probe backoff for a failing gateway, in intervals.
    pub max_backoff_intervals: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            recovery_successes: 3,
            latency_window: 10,
            max_backoff_intervals: 8,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub processor_ms: u64,
    pub ledger_ms: u64,
    pub notification_ms: u64,
    pub loyalty_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            processor_ms: 10_000,
            ledger_ms: 5_000,
            notification_ms: 5_000,
            loyalty_ms: 3_000,
        }
    }
}

impl TimeoutConfig {
    pub fn processor(&self) -> Duration {
        Duration::from_millis(self.processor_ms)
    }

    pub fn ledger(&self) -> Duration {
        Duration::from_millis(self.ledger_ms)
    }

    pub fn notification(&self) -> Duration {
        Duration::from_millis(self.notification_ms)
    }

    pub fn loyalty(&self) -> Duration {
        Duration::from_millis(self.loyalty_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoyaltyConfig {
    /// Points per whole currency unit of the grand total.
    pub points_per_unit: Decimal,
    /// Share of the grand total credited to the operator; zero disables it.
    pub commission_rate: Decimal,
}

impl Default for LoyaltyConfig {
    fn default() -> Self {
        Self {
            points_per_unit: Decimal::ONE,
            commission_rate: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub id: String,
    pub name: String,
    pub tier: GatewayTier,
    pub priority: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmployeeConfig {
    pub id: String,
    pub pin: String,
    pub role: Role,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(transparent)]
pub struct GatewayList(pub Vec<GatewayConfig>);

impl Default for GatewayList {
    fn default() -> Self {
        Self(vec![
            GatewayConfig {
                id: "primary".to_string(),
                name: "Primary Processor".to_string(),
                tier: GatewayTier::Primary,
                priority: 1,
                max_retries: 2,
            },
            GatewayConfig {
                id: "secondary".to_string(),
                name: "Secondary Processor".to_string(),
                tier: GatewayTier::Secondary,
                priority: 2,
                max_retries: 2,
            },
            GatewayConfig {
                id: "backup".to_string(),
                name: "Backup Processor".to_string(),
                tier: GatewayTier::Backup,
                priority: 3,
                max_retries: 1,
            },
        ])
    }
}

impl EngineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("POS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
