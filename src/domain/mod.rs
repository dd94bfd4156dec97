//! Domain types and the ports the engine talks to its collaborators through.

pub mod approval;
pub mod cart;
pub mod gateway;
pub mod money;
pub mod offline;
pub mod order;
pub mod payment;
pub mod ports;
