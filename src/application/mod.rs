//! Application layer: the checkout state machine and the services it drives.
//!
//! `TransactionOrchestrator` is the entry point. It owns an approval gate, an
//! offline vault and a split payment coordinator, and shares the gateway
//! registry with the background health monitor.

pub mod approval;
pub mod executor;
pub mod health;
pub mod orchestrator;
pub mod registry;
pub mod split;
pub mod vault;
