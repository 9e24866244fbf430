//! Served HTTP surfaces
//!
//! Two axum apps: the trade submission API (order state machine behind
//! `POST /trade/` plus shallow and deep health probes) and the simulated
//! confirms service used for chaos testing.

pub mod confirms_api;
pub mod order_api;

pub use confirms_api::{confirms_router, ConfirmsApiServer};
pub use order_api::{order_router, OrderApiServer, OrderApiState};
