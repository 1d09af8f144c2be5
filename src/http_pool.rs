//! Shared, connection-pooled HTTP client used by every provider.
//!
//! One process-wide [`reqwest::Client`] keeps TLS sessions and DNS lookups
//! warm across providers.

use std::time::Duration;

use lazy_static::lazy_static;

lazy_static! {
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the lazily initialized shared client; cheap to clone (an `Arc`
/// internally) if a caller needs an owned copy.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}
