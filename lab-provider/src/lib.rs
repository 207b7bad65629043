//! Control-plane access for the workshop lab tool.
//!
//! Everything the orchestrator does to the platform goes through the
//! [`ResourceClient`] trait. [`RestClient`] talks to a real workspace;
//! `MockWorkspace` (feature `test-helpers`) keeps the whole control plane in
//! memory.

pub mod auth;
pub mod client;
pub mod error;
pub mod models;
pub mod rest;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

use std::sync::Arc;

pub use auth::Credentials;
pub use client::ResourceClient;
pub use error::{ClientError, ClientResult};
pub use rest::RestClient;

/// Resolve credentials for `profile` and build a shared REST client.
pub fn connect(profile: Option<&str>) -> ClientResult<Arc<dyn ResourceClient>> {
    let credentials = Credentials::resolve(profile)?;
    let client = RestClient::new(&credentials)?;
    Ok(Arc::new(client))
}
