//! Shared HTTP client construction.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client builder with the tokenator User-Agent and explicit connect/request timeouts.
pub fn builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .use_rustls_tls()
        .user_agent(user_agent())
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
}

pub fn new_client(timeout: Duration) -> Client {
    builder(timeout)
        .build()
        .expect("failed to build HTTP client")
}

/// Format: `tokenator/{version}`
pub fn user_agent() -> String {
    format!("tokenator/{}", env!("CARGO_PKG_VERSION"))
}
