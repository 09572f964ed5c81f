//! Payment-authorizing HTTP transport
//!
//! Wraps an HTTP sender. Non-402 responses pass through untouched; a 402 is
//! parsed, one requirement is chosen and authorized by the treasurer, and the
//! request is retried exactly once with the `X-PAYMENT` header.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderValue;
use reqwest::{Client, Request, Response, StatusCode};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use x402_types::{
    PAYMENT_HEADER, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, PaymentRequired,
    SettlementResponse, X402_VERSION,
};

use super::requirement::PaymentRequirement;
use crate::error::{PaymentError, SigningError};
use crate::treasurer::{PaymentStatus, Treasurer};
use crate::wallet::Authorization;

/// Underlying request executor
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Response, reqwest::Error>;
}

/// `HttpSend` over a plain `reqwest::Client`
#[derive(Clone, Default)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSend for ReqwestSender {
    async fn execute(&self, request: Request) -> Result<Response, reqwest::Error> {
        self.client.execute(request).await
    }
}

/// How to choose among requirements the treasurer supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequirementSelector {
    /// First supported requirement in the server's order
    #[default]
    FirstSupported,
    /// Lowest amount; ties go to the server's order
    Cheapest,
}

impl RequirementSelector {
    pub fn select<'a>(
        &self,
        requirements: &'a [PaymentRequirement],
        treasurer: &dyn Treasurer,
    ) -> Option<&'a PaymentRequirement> {
        let mut supported = requirements.iter().filter(|r| treasurer.supports(r));
        match self {
            RequirementSelector::FirstSupported => supported.next(),
            RequirementSelector::Cheapest => supported.min_by_key(|r| r.amount),
        }
    }
}

pub struct PaymentTransport {
    sender: Arc<dyn HttpSend>,
    treasurer: Arc<dyn Treasurer>,
    selector: RequirementSelector,
}

impl PaymentTransport {
    pub fn new(sender: Arc<dyn HttpSend>, treasurer: Arc<dyn Treasurer>) -> Self {
        log::info!(
            "[X402] Payment transport ready (networks: {})",
            describe_networks(treasurer.as_ref())
        );
        Self {
            sender,
            treasurer,
            selector: RequirementSelector::default(),
        }
    }

    pub fn from_client(client: Client, treasurer: Arc<dyn Treasurer>) -> Self {
        Self::new(Arc::new(ReqwestSender::new(client)), treasurer)
    }

    pub fn with_selector(mut self, selector: RequirementSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn treasurer(&self) -> &Arc<dyn Treasurer> {
        &self.treasurer
    }

    /// Send `request`, paying for it once if the server answers 402
    pub async fn send(&self, request: Request) -> Result<Response, PaymentError> {
        self.send_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Like [`send`](Self::send), aborting with `PaymentError::Cancelled` when
    /// `cancel` fires. A reservation made before the signature completes is
    /// released; once the paid retry is on the wire the spend stays committed.
    pub async fn send_with_cancellation(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, PaymentError> {
        let method = request.method().clone();
        let url = request.url().clone();
        // Taken before the first send consumes the request
        let replay = request.try_clone();

        log::debug!("[X402] {} {}", method, url);
        let response = until_cancelled(cancel, self.sender.execute(request)).await??;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        log::info!("[X402] Received 402 Payment Required for {} {}", method, url);
        let challenge = until_cancelled(cancel, read_challenge(response)).await??;
        let requirements = parse_requirements(&challenge)?;

        if !requirements
            .iter()
            .any(|r| self.treasurer.serves_network(&r.network))
        {
            let mut networks: Vec<&str> =
                requirements.iter().map(|r| r.network.as_str()).collect();
            networks.sort_unstable();
            networks.dedup();
            log::warn!(
                "[X402] No treasurer for any offered network of {} ({})",
                url,
                networks.join(", ")
            );
            return Err(PaymentError::NoTreasurerForNetwork(networks.join(", ")));
        }

        let requirement = self
            .selector
            .select(&requirements, self.treasurer.as_ref())
            .ok_or_else(|| {
                let offered: Vec<String> = requirements.iter().map(|r| r.label()).collect();
                log::warn!(
                    "[X402] No supported requirement for {} (offered: {})",
                    url,
                    offered.join(", ")
                );
                PaymentError::UnsupportedRequirement { offered }
            })?;

        let mut retry = replay.ok_or(PaymentError::UnreplayableRequest)?;

        log::info!("[X402] Authorizing {}", requirement);
        let authorization =
            until_cancelled(cancel, self.treasurer.authorize(requirement)).await??;

        let header = authorization
            .header_value()
            .and_then(|value| {
                HeaderValue::from_str(&value).map_err(|e| SigningError::Signer(e.to_string()))
            })
            .inspect_err(|e| {
                log::error!("[X402] Could not encode payment {}: {}", authorization.id, e)
            })?;
        retry.headers_mut().insert(PAYMENT_HEADER, header);

        log::info!(
            "[X402] Retrying {} with payment {} from {:?}",
            url,
            authorization.id,
            authorization.payer
        );

        let outcome = match until_cancelled(cancel, self.sender.execute(retry)).await {
            Ok(outcome) => outcome,
            Err(cancelled) => {
                self.report(&authorization, PaymentStatus::Failed { error: cancelled.to_string() })
                    .await;
                return Err(cancelled);
            }
        };

        match outcome {
            Ok(response) => {
                let status = response.status();
                log_settlement(&response);
                if status == StatusCode::PAYMENT_REQUIRED {
                    log::warn!(
                        "[X402] Server still requires payment after paid retry of {}",
                        url
                    );
                }
                let payment_status = if status.is_success() {
                    PaymentStatus::Accepted { status: status.as_u16() }
                } else {
                    PaymentStatus::Rejected { status: status.as_u16() }
                };
                self.report(&authorization, payment_status).await;
                Ok(response)
            }
            Err(e) => {
                log::error!("[X402] Paid retry of {} failed: {}", url, e);
                self.report(&authorization, PaymentStatus::Failed { error: e.to_string() })
                    .await;
                Err(e.into())
            }
        }
    }

    async fn report(&self, authorization: &Authorization, status: PaymentStatus) {
        self.treasurer.on_payment_status(authorization, &status).await;
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, PaymentError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            log::info!("[X402] Request cancelled");
            Err(PaymentError::Cancelled)
        }
        output = future => Ok(output),
    }
}

/// JSON body first, then the base64 `PAYMENT-REQUIRED` header
async fn read_challenge(response: Response) -> Result<PaymentRequired, PaymentError> {
    let header = response
        .headers()
        .get(PAYMENT_REQUIRED_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?;

    let from_body = PaymentRequired::from_json(&body);
    let body_error = match from_body {
        Ok(challenge) if !challenge.accepts.is_empty() => return Ok(challenge),
        Ok(_) => "no payment requirements offered".to_string(),
        Err(e) => e,
    };

    match header {
        Some(encoded) => {
            log::debug!("[X402] Falling back to {} header", PAYMENT_REQUIRED_HEADER);
            let challenge = PaymentRequired::from_base64(&encoded)
                .map_err(|e| PaymentError::MalformedChallenge(format!("header: {}", e)))?;
            if challenge.accepts.is_empty() {
                return Err(PaymentError::MalformedChallenge(
                    "no payment requirements offered".to_string(),
                ));
            }
            Ok(challenge)
        }
        None => Err(PaymentError::MalformedChallenge(body_error)),
    }
}

/// Validate every offered requirement, skipping malformed entries
fn parse_requirements(
    challenge: &PaymentRequired,
) -> Result<Vec<PaymentRequirement>, PaymentError> {
    if challenge.x402_version != X402_VERSION {
        log::warn!(
            "[X402] Challenge uses x402Version {}, expected {}",
            challenge.x402_version,
            X402_VERSION
        );
    }
    if let Some(error) = &challenge.error {
        log::info!("[X402] Server says: {}", error);
    }

    let now = Utc::now();
    let mut problems = Vec::new();
    let requirements: Vec<PaymentRequirement> = challenge
        .accepts
        .iter()
        .enumerate()
        .filter_map(|(i, wire)| match PaymentRequirement::from_wire(wire, now) {
            Ok(requirement) => Some(requirement),
            Err(e) => {
                log::warn!("[X402] Skipping malformed requirement #{}: {}", i, e);
                problems.push(format!("#{}: {}", i, e));
                None
            }
        })
        .collect();

    if requirements.is_empty() {
        return Err(PaymentError::MalformedChallenge(problems.join("; ")));
    }
    Ok(requirements)
}

fn log_settlement(response: &Response) {
    let Some(encoded) = response
        .headers()
        .get(PAYMENT_RESPONSE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };

    match SettlementResponse::from_base64(encoded) {
        Ok(settlement) if settlement.success => log::info!(
            "[X402] Settled on {}: tx {}",
            settlement.network.as_deref().unwrap_or("?"),
            settlement.transaction.as_deref().unwrap_or("?")
        ),
        Ok(settlement) => log::warn!(
            "[X402] Settlement failed: {}",
            settlement.error_reason.as_deref().unwrap_or("unknown reason")
        ),
        Err(e) => log::debug!("[X402] Unreadable {} header: {}", PAYMENT_RESPONSE_HEADER, e),
    }
}

fn describe_networks(treasurer: &dyn Treasurer) -> String {
    let networks = treasurer.networks();
    if networks.is_empty() {
        "any".to_string()
    } else {
        networks.join(", ")
    }
}
