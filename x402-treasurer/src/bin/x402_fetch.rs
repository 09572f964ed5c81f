//! Fetch a URL, paying for it through x402 when the server asks.
//!
//! Usage: `x402_fetch <url>` (or `X402_FETCH_URL`). Configuration comes from
//! the TOML file named by `X402_CONFIG`, otherwise from `X402_*` variables.
//! Ctrl-C cancels the request; an unsigned reservation is released.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use x402_treasurer::{PaymentTransport, TreasurerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("X402_FETCH_URL").ok())
        .ok_or("usage: x402_fetch <url>")?;

    let config = match std::env::var("X402_CONFIG") {
        Ok(path) => {
            log::info!("Loading configuration from {}", path);
            TreasurerConfig::from_file(&path)?
        }
        Err(_) => TreasurerConfig::from_env()?,
    };

    let client = config.http_client()?;
    let treasurer = Arc::new(config.build_treasurer(&client)?);
    let transport = PaymentTransport::from_client(client.clone(), treasurer);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling request");
            on_ctrl_c.cancel();
        }
    });

    let request = client.get(url.as_str()).build()?;
    let response = transport.send_with_cancellation(request, &cancel).await?;

    let status = response.status();
    log::info!("{} -> {}", url, status);
    let body = response.text().await?;
    println!("{}", body);

    if !status.is_success() {
        return Err(format!("server answered {}", status).into());
    }
    Ok(())
}
