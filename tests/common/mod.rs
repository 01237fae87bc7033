//! Shared helpers for the wiremock backed integration tests.
//!
//! The blocking reqwest client must be built and dropped off the async
//! runtime, so the client helpers take the server uri and are called inside
//! [`blocking`].

#![allow(dead_code)]

use seedapi::{SeedBaseClient, SeedClient, SeedClientBuilder, SeedReadWriteClient};
use std::time::Duration;

pub const ORG_ID: u64 = 1;

/// `user@example.org:key`
pub const BASIC_AUTH: &str = "Basic dXNlckBleGFtcGxlLm9yZzprZXk=";

pub fn builder(uri: &str) -> SeedClientBuilder {
    SeedBaseClient::builder(ORG_ID)
        .base_url(uri)
        .use_ssl(false)
        .username("user@example.org")
        .api_key("key")
}

pub fn read_write(uri: &str) -> SeedReadWriteClient {
    builder(uri).read_write().unwrap()
}

/// High-level client with a fast poll interval.
pub fn seed_client(uri: &str) -> SeedClient {
    SeedClient::from_client(read_write(uri))
        .with_poll_interval(Duration::from_millis(10))
        .with_retry_max(20)
}

/// Runs blocking client code off the async test runtime.
pub async fn blocking<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap()
}
