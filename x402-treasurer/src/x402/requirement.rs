//! Validated payment requirement parsed from a 402 challenge

use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, U256};
use std::fmt;
use std::str::FromStr;

use x402_types::{PaymentRequirements, SCHEME_EXACT};

/// One accepted way to pay for a resource.
///
/// Built once from the wire form and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: String,
    pub asset: Address,
    /// Amount in the token's smallest unit
    pub amount: U256,
    pub pay_to: Address,
    pub resource: Option<String>,
    pub description: Option<String>,
    pub max_timeout_seconds: u64,
    pub expires_at: Option<DateTime<Utc>>,
    /// EIP-712 domain name/version of the token, when the server provided them
    pub token_name: Option<String>,
    pub token_version: Option<String>,
}

impl PaymentRequirement {
    /// Exact-scheme requirement without resource metadata
    pub fn exact(network: &str, asset: Address, pay_to: Address, amount: U256) -> Self {
        Self {
            scheme: SCHEME_EXACT.to_string(),
            network: network.to_string(),
            asset,
            amount,
            pay_to,
            resource: None,
            description: None,
            max_timeout_seconds: 0,
            expires_at: None,
            token_name: None,
            token_version: None,
        }
    }

    /// Validate the wire form. `now` anchors the expiry derived from
    /// `maxTimeoutSeconds`.
    pub fn from_wire(wire: &PaymentRequirements, now: DateTime<Utc>) -> Result<Self, String> {
        if wire.scheme.trim().is_empty() {
            return Err("empty scheme".to_string());
        }
        if wire.network.trim().is_empty() {
            return Err("empty network".to_string());
        }

        let amount = parse_amount(&wire.max_amount_required)?;
        let pay_to = parse_address(&wire.pay_to).map_err(|e| format!("payTo: {}", e))?;
        let asset = parse_address(&wire.asset).map_err(|e| format!("asset: {}", e))?;

        let expires_at = match wire.max_timeout_seconds {
            0 => None,
            secs => Some(expiry_after(now, secs).ok_or_else(|| {
                format!("maxTimeoutSeconds {} out of range", secs)
            })?),
        };

        let extra = wire.extra.clone().unwrap_or_default();

        Ok(Self {
            scheme: wire.scheme.trim().to_lowercase(),
            network: wire.network.trim().to_lowercase(),
            asset,
            amount,
            pay_to,
            resource: wire.resource.clone(),
            description: wire.description.clone(),
            max_timeout_seconds: wire.max_timeout_seconds,
            expires_at,
            token_name: extra.name,
            token_version: extra.version,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Short `scheme/network` label used in logs and errors
    pub fn label(&self) -> String {
        format!("{}/{}", self.scheme, self.network)
    }
}

impl fmt::Display for PaymentRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} of {:?} to {:?}",
            self.label(),
            self.amount,
            self.asset,
            self.pay_to
        )
    }
}

/// `now + secs`, or `None` when the offset or the resulting date overflows
fn expiry_after(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let offset = Duration::try_seconds(i64::try_from(secs).ok()?)?;
    now.checked_add_signed(offset)
}

/// Parse an amount in decimal, or hex with a `0x` prefix.
///
/// `U256::from_str` treats every string as hex, so decimal must be tried
/// explicitly.
pub fn parse_amount(value: &str) -> Result<U256, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty amount".to_string());
    }
    if let Some(hex_digits) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return U256::from_str_radix(hex_digits, 16)
            .map_err(|e| format!("invalid hex amount {}: {}", value, e));
    }
    U256::from_dec_str(value).map_err(|e| format!("invalid amount {}: {}", value, e))
}

pub fn parse_address(value: &str) -> Result<Address, String> {
    Address::from_str(value.trim()).map_err(|e| format!("invalid address {}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use x402_types::TokenDomain;

    const USDC_BASE_SEPOLIA: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    fn wire(amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: "Base-Sepolia".to_string(),
            max_amount_required: amount.to_string(),
            pay_to: PAY_TO.to_string(),
            asset: USDC_BASE_SEPOLIA.to_string(),
            resource: Some("https://api.example.com/premium".to_string()),
            description: None,
            mime_type: None,
            max_timeout_seconds: 60,
            extra: Some(TokenDomain {
                name: Some("USDC".to_string()),
                version: Some("2".to_string()),
            }),
        }
    }

    #[test]
    fn test_from_wire() {
        let now = Utc::now();
        let req = PaymentRequirement::from_wire(&wire("331157"), now).unwrap();
        assert_eq!(req.amount, U256::from(331157u64));
        assert_eq!(req.network, "base-sepolia");
        assert_eq!(req.pay_to, parse_address(PAY_TO).unwrap());
        assert_eq!(req.expires_at, Some(now + Duration::seconds(60)));
        assert_eq!(req.token_name.as_deref(), Some("USDC"));
        assert_eq!(req.label(), "exact/base-sepolia");
    }

    #[test]
    fn test_decimal_is_not_read_as_hex() {
        assert_eq!(parse_amount("331157").unwrap(), U256::from(331157u64));
        assert_eq!(parse_amount("0x50d95").unwrap(), U256::from(331157u64));
        assert_eq!(parse_amount("0X50D95").unwrap(), U256::from(331157u64));
    }

    #[test]
    fn test_bad_amount_and_address() {
        let now = Utc::now();
        assert!(PaymentRequirement::from_wire(&wire("-5"), now).is_err());
        assert!(PaymentRequirement::from_wire(&wire(""), now).is_err());

        let mut bad_payee = wire("10");
        bad_payee.pay_to = "0xinvalid".to_string();
        let err = PaymentRequirement::from_wire(&bad_payee, now).unwrap_err();
        assert!(err.starts_with("payTo"));
    }

    #[test]
    fn test_no_timeout_means_no_expiry() {
        let mut w = wire("10");
        w.max_timeout_seconds = 0;
        let req = PaymentRequirement::from_wire(&w, Utc::now()).unwrap();
        assert!(req.expires_at.is_none());
        assert!(!req.is_expired(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_huge_timeout_is_malformed() {
        let now = Utc::now();
        for secs in [u64::MAX, i64::MAX as u64, 10_000_000_000_000] {
            let mut w = wire("10");
            w.max_timeout_seconds = secs;
            let err = PaymentRequirement::from_wire(&w, now).unwrap_err();
            assert!(err.contains("maxTimeoutSeconds"));
        }

        // A year is fine
        let mut w = wire("10");
        w.max_timeout_seconds = 31_536_000;
        assert!(PaymentRequirement::from_wire(&w, now).is_ok());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let req = PaymentRequirement::from_wire(&wire("10"), now).unwrap();
        assert!(!req.is_expired(now));
        assert!(req.is_expired(now + Duration::seconds(61)));
    }
}
