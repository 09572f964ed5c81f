//! Payment status reporting to the policy backend at `apiUrl`

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::error::ConfigError;
use crate::treasurer::PaymentStatus;
use crate::wallet::Authorization;

const STATUS_PATH: &str = "api/v1/payments/status";

/// Event posted once per completed paid retry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusEvent {
    pub payment_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub amount: String,
    pub pay_to: String,
    pub payer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub sequence: u64,
    pub reported_at: DateTime<Utc>,
}

impl PaymentStatusEvent {
    pub fn new(authorization: &Authorization, status: &PaymentStatus) -> Self {
        let (http_status, error) = match status {
            PaymentStatus::Accepted { status } | PaymentStatus::Rejected { status } => {
                (Some(*status), None)
            }
            PaymentStatus::Failed { error } => (None, Some(error.clone())),
        };
        let requirement = &authorization.requirement;

        Self {
            payment_id: authorization.id.clone(),
            status: status.to_string(),
            http_status,
            error,
            scheme: requirement.scheme.clone(),
            network: requirement.network.clone(),
            asset: format!("{:?}", requirement.asset),
            amount: requirement.amount.to_string(),
            pay_to: format!("{:?}", requirement.pay_to),
            payer: format!("{:?}", authorization.payer),
            resource: requirement.resource.clone(),
            sequence: authorization.sequence,
            reported_at: Utc::now(),
        }
    }
}

/// Posts payment outcomes to the backend. Failures are logged and swallowed;
/// reporting never changes what the caller of `send` sees.
#[derive(Clone)]
pub struct StatusReporter {
    client: Client,
    endpoint: Url,
}

impl StatusReporter {
    pub fn new(api_url: &str, client: Client) -> Result<Self, ConfigError> {
        let invalid = |e: url::ParseError| ConfigError::Invalid {
            field: "apiUrl",
            message: e.to_string(),
        };
        let mut base = Url::parse(api_url).map_err(invalid)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(STATUS_PATH).map_err(invalid)?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn report(&self, authorization: &Authorization, status: &PaymentStatus) {
        let event = PaymentStatusEvent::new(authorization, status);
        let result = self
            .client
            .post(self.endpoint.clone())
            .timeout(std::time::Duration::from_secs(10))
            .json(&event)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                log::debug!("[X402] Reported payment {} as {}", event.payment_id, event.status)
            }
            Ok(response) => log::warn!(
                "[X402] Status backend answered {} for payment {}",
                response.status(),
                event.payment_id
            ),
            Err(e) => log::warn!(
                "[X402] Failed to report payment {}: {}",
                event.payment_id,
                e
            ),
        }
    }
}
