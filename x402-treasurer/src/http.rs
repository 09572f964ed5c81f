use reqwest::Client;
use std::time::Duration;

/// Request timeout used when the caller does not pick one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Build an HTTP client for paid requests and status reporting.
///
/// `Client::clone()` is just an `Arc` increment, so one client built here
/// can back both the transport and the reporter.
pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(timeout)
        .build()
}

/// Same as [`build_client`], routing all requests through `proxy_url`
pub fn build_proxy_client(proxy_url: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .proxy(reqwest::Proxy::all(proxy_url)?)
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(90))
        .timeout(timeout)
        .build()
}
