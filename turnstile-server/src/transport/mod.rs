//! Transport layer implementations for the admission server
//!
//! Transports accept client requests and forward them to the shared
//! [`AdmissionService`]. All transports implement the [`Transport`] trait.
//!
//! # Available Transports
//!
//! - [`http`]: REST API with JSON

pub mod http;

#[cfg(test)]
mod http_test;

use crate::admission::AdmissionService;
use anyhow::Result;
use async_trait::async_trait;

/// Common interface for all transport implementations
///
/// Each transport is responsible for:
/// - Accepting client connections
/// - Turning protocol-specific requests into admission checks
/// - Sending decisions back to clients
#[async_trait]
pub trait Transport {
    /// Start the transport server
    ///
    /// The method runs indefinitely until an error occurs or the server shuts down.
    async fn start(self, service: AdmissionService) -> Result<()>;
}
