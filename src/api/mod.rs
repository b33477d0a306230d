//! Backend REST contract
//!
//! Wire models, the `BackendApi` trait with its reqwest implementation, and
//! the gateway that routes every call through endpoint discovery and
//! throttling.

mod client;
mod gateway;
pub mod models;
pub mod routes;

pub use client::{classify_failure, BackendApi, HttpBackendApi};
pub use gateway::BackendGateway;
pub use models::*;

#[cfg(test)]
pub use client::MockBackendApi;
