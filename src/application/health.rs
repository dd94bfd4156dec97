use super::registry::GatewayRegistry;
use crate::config::HealthConfig;
use crate::domain::gateway::GatewayStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-gateway probe schedule, counted in monitor ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Backoff {
    skip: u32,
    wait: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { skip: 0, wait: 1 }
    }
}

/// Periodic health checker feeding the registry.
///
/// Every tick probes each gateway that is not administratively offline. A
/// gateway whose probe fails is probed again after 1, 2, 4... ticks, capped
/// at `max_backoff_intervals`.
pub struct HealthMonitor {
    registry: Arc<GatewayRegistry>,
    interval: Duration,
    max_backoff: u32,
    schedule: HashMap<String, Backoff>,
}

impl HealthMonitor {
    pub fn new(registry: Arc<GatewayRegistry>, config: &HealthConfig) -> Self {
        Self {
            registry,
            interval: config.interval(),
            max_backoff: config.max_backoff_intervals.max(1),
            schedule: HashMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one round of probes. Returns the ids actually probed.
    pub async fn tick(&mut self) -> Vec<String> {
        let view = self.registry.snapshot().await;
        let mut probed = Vec::new();

        for gateway in view.gateways.iter().filter(|g| g.status != GatewayStatus::Offline) {
            let backoff = self.schedule.entry(gateway.id.clone()).or_default();
            if backoff.skip > 0 {
                backoff.skip -= 1;
                debug!(gateway = %gateway.id, remaining = backoff.skip, "Health probe backed off");
                continue;
            }

            probed.push(gateway.id.clone());
            match self.registry.test_connection(&gateway.id).await {
                Ok(result) if result.healthy => {
                    *backoff = Backoff::default();
                }
                Ok(_) => {
                    backoff.skip = backoff.wait;
                    backoff.wait = (backoff.wait * 2).min(self.max_backoff);
                }
                Err(e) => {
                    warn!(gateway = %gateway.id, error = %e, "Health probe could not run");
                }
            }
        }
        probed
    }

    /// Spawns the monitor on the runtime; it stops when the handle shuts it down.
    pub fn spawn(mut self) -> HealthMonitorHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval = ?self.interval, "Gateway health monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Gateway health monitor stopped");
        });
        HealthMonitorHandle { shutdown, task }
    }
}

pub struct HealthMonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Health monitor task ended abnormally");
        }
    }
}
