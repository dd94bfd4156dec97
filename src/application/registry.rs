use crate::config::{EngineConfig, HealthConfig};
use crate::domain::gateway::{Gateway, GatewayEvent, GatewayStatus, HealthResult};
use crate::domain::ports::PaymentProcessorRef;
use crate::error::{PosError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

/// Immutable snapshot of every gateway plus the one currently active.
#[derive(Debug, Clone, Default)]
pub struct RegistryView {
    pub gateways: Vec<Gateway>,
    pub active: Option<String>,
}

impl RegistryView {
    fn elect(&self) -> Option<String> {
        self.gateways
            .iter()
            .filter(|g| g.is_online())
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.average_latency().cmp(&b.average_latency()))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|g| g.id.clone())
    }

    pub fn gateway(&self, id: &str) -> Option<&Gateway> {
        self.gateways.iter().find(|g| g.id == id)
    }

    fn gateway_mut(&mut self, id: &str) -> Option<&mut Gateway> {
        self.gateways.iter_mut().find(|g| g.id == id)
    }
}

/// Tracks payment gateways and elects the active one.
///
/// The registry is passive: it never retries anything itself. Readers get an
/// `Arc` snapshot that is swapped in whole by a single writer at a time, so a
/// half-applied health update is never observable.
pub struct GatewayRegistry {
    view: RwLock<Arc<RegistryView>>,
    writer: Mutex<()>,
    processors: HashMap<String, PaymentProcessorRef>,
    events: broadcast::Sender<GatewayEvent>,
    recovery_successes: u32,
    latency_window: usize,
    probe_timeout: Duration,
}

impl GatewayRegistry {
    pub fn new(health: &HealthConfig, probe_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            view: RwLock::new(Arc::new(RegistryView::default())),
            writer: Mutex::new(()),
            processors: HashMap::new(),
            events,
            recovery_successes: health.recovery_successes.max(1),
            latency_window: health.latency_window,
            probe_timeout,
        }
    }

    /// Builds a registry from configuration, wiring each gateway to a processor.
    pub fn from_config<F>(config: &EngineConfig, mut processor_for: F) -> Self
    where
        F: FnMut(&str) -> PaymentProcessorRef,
    {
        let mut registry = Self::new(&config.health, config.timeouts.processor());
        for gw in &config.gateways.0 {
            let gateway = Gateway::new(&gw.id, &gw.name, gw.tier, gw.priority, gw.max_retries);
            let processor = processor_for(&gw.id);
            registry.register(gateway, processor);
        }
        registry
    }

    /// Adds a gateway. Only used while wiring, before the registry is shared.
    pub fn register(&mut self, gateway: Gateway, processor: PaymentProcessorRef) {
        let view = Arc::make_mut(self.view.get_mut());
        self.processors.insert(gateway.id.clone(), processor);
        view.gateways.retain(|g| g.id != gateway.id);
        view.gateways.push(gateway);
        view.active = view.elect();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Arc<RegistryView> {
        self.view.read().await.clone()
    }

    /// The lowest-priority online gateway, or `None` when nothing is online.
    pub async fn select_active(&self) -> Option<Gateway> {
        let view = self.snapshot().await;
        view.active
            .as_deref()
            .and_then(|id| view.gateway(id))
            .cloned()
    }

    pub fn processor(&self, gateway_id: &str) -> Option<PaymentProcessorRef> {
        self.processors.get(gateway_id).cloned()
    }

    pub fn gateway_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Absorbs the outcome of a real payment attempt.
    pub async fn report_outcome(&self, gateway_id: &str, success: bool, latency: Duration) {
        let recovery = self.recovery_successes;
        let window = self.latency_window;
        self.update(gateway_id, |gateway| {
            gateway.record_latency(latency, window);
            if success {
                gateway.consecutive_errors = 0;
                gateway.consecutive_successes += 1;
                if gateway.status == GatewayStatus::Error && gateway.consecutive_successes >= recovery {
                    gateway.status = GatewayStatus::Online;
                }
            } else {
                gateway.consecutive_successes = 0;
                gateway.consecutive_errors += 1;
                if gateway.status == GatewayStatus::Online {
                    gateway.status = GatewayStatus::Error;
                }
            }
        })
        .await;
    }

    /// Administrative status change, the only way in or out of `Offline`.
    pub async fn set_status(&self, gateway_id: &str, status: GatewayStatus) -> Result<()> {
        let found = self
            .update(gateway_id, |gateway| {
                gateway.status = status;
                gateway.consecutive_errors = 0;
                gateway.consecutive_successes = 0;
            })
            .await;
        if found {
            info!(gateway = gateway_id, ?status, "Gateway status set");
            Ok(())
        } else {
            Err(PosError::NotFound(format!("gateway {gateway_id}")))
        }
    }

    /// Probes one gateway and applies the result to its health.
    ///
    /// Offline gateways are probed but stay offline.
    pub async fn test_connection(&self, gateway_id: &str) -> Result<HealthResult> {
        let processor = self
            .processor(gateway_id)
            .ok_or_else(|| PosError::NotFound(format!("gateway {gateway_id}")))?;

        let previous = self
            .snapshot()
            .await
            .gateway(gateway_id)
            .map(|g| g.status)
            .ok_or_else(|| PosError::NotFound(format!("gateway {gateway_id}")))?;

        if previous != GatewayStatus::Offline {
            self.update(gateway_id, |gateway| {
                if gateway.status != GatewayStatus::Online {
                    gateway.status = GatewayStatus::Testing;
                }
            })
            .await;
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, processor.health_check()).await;
        let latency = started.elapsed();
        let (healthy, message) = match outcome {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("health check timed out after {:?}", self.probe_timeout))),
        };

        let window = self.latency_window;
        self.update(gateway_id, |gateway| {
            if gateway.status == GatewayStatus::Offline {
                return;
            }
            if healthy {
                gateway.record_latency(latency, window);
                gateway.status = GatewayStatus::Online;
                gateway.consecutive_errors = 0;
            } else {
                gateway.status = GatewayStatus::Error;
                gateway.consecutive_successes = 0;
                gateway.consecutive_errors += 1;
            }
        })
        .await;

        let status = self
            .snapshot()
            .await
            .gateway(gateway_id)
            .map(|g| g.status)
            .unwrap_or(previous);

        if healthy {
            debug!(gateway = gateway_id, ?latency, "Health check passed");
        } else {
            warn!(gateway = gateway_id, error = ?message, "Health check failed");
        }

        Ok(HealthResult {
            gateway_id: gateway_id.to_string(),
            healthy,
            latency,
            status,
            message,
        })
    }

    /// Copy-on-write update of one gateway, re-electing the active gateway.
    /// Returns false when the gateway is unknown.
    async fn update<F>(&self, gateway_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Gateway),
    {
        let _writer = self.writer.lock().await;
        let current = self.snapshot().await;

        let mut next = (*current).clone();
        let Some(gateway) = next.gateway_mut(gateway_id) else {
            return false;
        };
        mutate(gateway);
        next.active = next.elect();

        let changed = next.active != current.active;
        let event = GatewayEvent::ActiveChanged {
            previous: current.active.clone(),
            current: next.active.clone(),
        };
        *self.view.write().await = Arc::new(next);

        if changed {
            info!(?event, "Active gateway changed");
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        true
    }
}
