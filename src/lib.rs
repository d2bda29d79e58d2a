//! Teamboard - Real-time project update hub
//!
//! Authenticated WebSocket connections grouped into per-project rooms,
//! fed by store commit notifications and application events.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
