//! # relayhub_core
//!
//! Core domain logic for RelayHub: the token authority that binds a
//! voice-assistant platform to an end user, the per-user device-state store,
//! and the fulfillment and report-state handlers built on top of them.

pub mod appliances;
pub mod auth;
pub mod config;
pub mod fulfillment;
pub mod homegraph;
pub mod migrate;
pub mod models;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
