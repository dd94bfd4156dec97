use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayTier {
    Primary,
    Secondary,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Online,
    Offline,
    Error,
    Testing,
}

/// A payment processor endpoint as the registry sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gateway {
    pub id: String,
    pub name: String,
    pub tier: GatewayTier,
    /// Lower is preferred.
    pub priority: u32,
    pub status: GatewayStatus,
    /// Most recent latencies, oldest first.
    pub latency_samples: VecDeque<Duration>,
    pub consecutive_errors: u32,
    pub consecutive_successes: u32,
    pub max_retries: u32,
}

impl Gateway {
    pub fn new(id: &str, name: &str, tier: GatewayTier, priority: u32, max_retries: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            tier,
            priority,
            status: GatewayStatus::Online,
            latency_samples: VecDeque::new(),
            consecutive_errors: 0,
            consecutive_successes: 0,
            max_retries,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == GatewayStatus::Online
    }

    /// Mean of the rolling sample; `Duration::MAX` when nothing was observed yet.
    pub fn average_latency(&self) -> Duration {
        if self.latency_samples.is_empty() {
            return Duration::MAX;
        }
        let total: Duration = self.latency_samples.iter().sum();
        total / self.latency_samples.len() as u32
    }

    pub fn record_latency(&mut self, latency: Duration, window: usize) {
        self.latency_samples.push_back(latency);
        while self.latency_samples.len() > window.max(1) {
            self.latency_samples.pop_front();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthResult {
    pub gateway_id: String,
    pub healthy: bool,
    pub latency: Duration,
    pub status: GatewayStatus,
    pub message: Option<String>,
}

/// Published whenever the active gateway changes.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    ActiveChanged {
        previous: Option<String>,
        current: Option<String>,
    },
}
