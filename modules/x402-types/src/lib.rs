//! Shared wire types for the x402 payment protocol.
//!
//! These mirror the JSON documents exchanged between a paying client and a
//! resource server: the 402 challenge, the signed payment payload sent back in
//! the `X-PAYMENT` header, and the settlement receipt returned in
//! `X-PAYMENT-RESPONSE`.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

/// Protocol version written into payment payloads
pub const X402_VERSION: u8 = 1;

/// Header carrying the signed payment on the retried request
pub const PAYMENT_HEADER: &str = "X-PAYMENT";

/// Header carrying base64 payment requirements (protocol version 2 servers)
pub const PAYMENT_REQUIRED_HEADER: &str = "PAYMENT-REQUIRED";

/// Header carrying the settlement receipt on the paid response
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// Scheme identifier for exact-amount EIP-3009 transfers
pub const SCHEME_EXACT: &str = "exact";

// =====================================================
// Challenge
// =====================================================

/// Body of a 402 Payment Required response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    #[serde(default = "default_version")]
    pub x402_version: u8,
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_version() -> u8 {
    X402_VERSION
}

/// One accepted way to pay, exactly as the server sent it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    #[serde(alias = "amount")]
    pub max_amount_required: String,
    #[serde(alias = "payToAddress")]
    pub pay_to: String,
    pub asset: String,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub max_timeout_seconds: u64,
    #[serde(default)]
    pub extra: Option<TokenDomain>,
}

/// EIP-712 domain hints for the payment token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenDomain {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl PaymentRequired {
    /// Parse a challenge from a JSON response body
    pub fn from_json(body: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(body).map_err(|e| format!("Failed to parse payment required: {}", e))
    }

    /// Decode payment requirements from base64 PAYMENT-REQUIRED header
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("Failed to decode payment required header: {}", e))?;
        Self::from_json(&decoded)
    }
}

// =====================================================
// Payment payload
// =====================================================

/// Payment payload sent to server with X-PAYMENT header
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: ExactEvmPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: String,
    pub authorization: Eip3009Authorization,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip3009Authorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: String,
}

impl PaymentPayload {
    /// Encode payment payload to base64 for X-PAYMENT header
    pub fn to_base64(&self) -> Result<String, String> {
        let json = serde_json::to_string(self)
            .map_err(|e| format!("Failed to serialize payment payload: {}", e))?;
        Ok(BASE64.encode(json))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("Failed to decode payment header: {}", e))?;
        serde_json::from_slice(&decoded)
            .map_err(|e| format!("Failed to parse payment payload: {}", e))
    }
}

// =====================================================
// Settlement
// =====================================================

/// Settlement receipt returned by the server after a paid request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResponse {
    pub success: bool,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

impl SettlementResponse {
    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("Failed to decode payment response header: {}", e))?;
        serde_json::from_slice(&decoded)
            .map_err(|e| format!("Failed to parse payment response: {}", e))
    }
}
