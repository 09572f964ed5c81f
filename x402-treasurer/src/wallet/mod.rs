//! Wallet Abstraction
//!
//! A wallet turns a `PaymentRequirement` into a signed `Authorization`.
//! Two signing identities are supported:
//!
//! - **Direct**: the paying account's own key signs the EIP-3009 transfer
//! - **Smart account**: a session key signs on behalf of a smart account,
//!   and the signature is routed through an on-chain validator
//!
//! Both sign the same EIP-712 digest; they differ in who `from` is and in how
//! the signature bytes are packed.

mod direct;
mod eip3009;
mod session_key;

pub use direct::DirectKeyWallet;
pub use eip3009::{TokenDomain, TransferWithAuthorization, derive_nonce};
pub use session_key::SessionKeyWallet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};
use std::sync::atomic::{AtomicU64, Ordering};

use x402_types::{
    Eip3009Authorization, ExactEvmPayload, PaymentPayload, SCHEME_EXACT, X402_VERSION,
};

use crate::config::WalletConfig;
use crate::error::SigningError;
use crate::x402::{PaymentRequirement, networks};

/// Seconds subtracted from `validAfter` to tolerate clock skew at the verifier
const VALID_AFTER_SKEW_SECS: i64 = 60;

/// Shortest validity window handed out, even when the server asks for less
const MIN_VALIDITY_SECS: i64 = 60;

/// Who signs, and on whose behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletIdentity {
    /// Key-controlled account signing for itself
    Direct { address: Address },
    /// Session key acting for a smart account via a validator
    SmartAccount {
        smart_account: Address,
        session_key: Address,
        validator: Address,
        chain_id: u64,
    },
}

impl WalletIdentity {
    /// The account funds are drawn from
    pub fn payer(&self) -> Address {
        match self {
            WalletIdentity::Direct { address } => *address,
            WalletIdentity::SmartAccount { smart_account, .. } => *smart_account,
        }
    }
}

/// How the signature in an `Authorization` should be verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationProof {
    /// Plain 65-byte ECDSA signature by the payer
    Direct,
    /// `validator ‖ signature`, checked by the smart account through ERC-1271
    SessionKey {
        smart_account: Address,
        validator: Address,
        session_key: Address,
    },
}

/// Signed proof of payment for one requirement.
///
/// Created per request and dropped once the paid retry completes.
#[derive(Debug, Clone)]
pub struct Authorization {
    /// Correlation id for logs and status reports
    pub id: String,
    pub requirement: PaymentRequirement,
    pub payer: Address,
    /// Strictly increasing per signing identity
    pub sequence: u64,
    /// EIP-3009 nonce derived from the identity and `sequence`
    pub nonce: H256,
    pub valid_after: u64,
    pub valid_before: u64,
    pub signature: Vec<u8>,
    pub proof: AuthorizationProof,
}

impl Authorization {
    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.signature))
    }

    /// Wire payload for the `X-PAYMENT` header
    pub fn to_payload(&self) -> PaymentPayload {
        PaymentPayload {
            x402_version: X402_VERSION,
            scheme: self.requirement.scheme.clone(),
            network: self.requirement.network.clone(),
            payload: ExactEvmPayload {
                signature: self.signature_hex(),
                authorization: Eip3009Authorization {
                    from: format!("{:?}", self.payer),
                    to: format!("{:?}", self.requirement.pay_to),
                    value: self.requirement.amount.to_string(),
                    valid_after: self.valid_after.to_string(),
                    valid_before: self.valid_before.to_string(),
                    nonce: format!("{:?}", self.nonce),
                },
            },
        }
    }

    /// Base64 header value carrying the signed payload
    pub fn header_value(&self) -> Result<String, SigningError> {
        self.to_payload().to_base64().map_err(SigningError::Signer)
    }
}

/// Trait for wallets - abstracts key custody from the payment flow
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Sign an authorization for `requirement`
    async fn sign(&self, requirement: &PaymentRequirement) -> Result<Authorization, SigningError>;

    fn identity(&self) -> WalletIdentity;

    /// Whether this identity can pay on `network`
    fn supports_network(&self, network: &str) -> bool;

    /// Get the mode name for logging
    fn mode_name(&self) -> &'static str;
}

/// Strictly increasing sequence scoped to one signing identity.
///
/// Seeded from wall-clock microseconds so a restarted process does not
/// hand out values it already used.
#[derive(Debug)]
pub struct NonceSequence(AtomicU64);

impl NonceSequence {
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_micros().max(0) as u64;
        Self(AtomicU64::new(seed))
    }

    pub fn starting_at(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for NonceSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the wallet described by `config`
pub fn create_wallet(config: &WalletConfig) -> Result<Box<dyn Wallet>, SigningError> {
    let wallet: Box<dyn Wallet> = match config {
        WalletConfig::Direct { private_key } => {
            Box::new(DirectKeyWallet::from_private_key(private_key)?)
        }
        WalletConfig::SmartAccount {
            smart_account_address,
            session_key_private_key,
            chain_id,
            validator_address,
        } => Box::new(SessionKeyWallet::new(
            smart_account_address,
            session_key_private_key,
            *chain_id,
            validator_address,
        )?),
    };

    log::info!(
        "[Wallet] Initialized {} wallet for payer {:?}",
        wallet.mode_name(),
        wallet.identity().payer()
    );
    Ok(wallet)
}

/// Parse a hex private key, with or without 0x prefix
pub(crate) fn parse_private_key(private_key: &str) -> Result<LocalWallet, SigningError> {
    let key_hex = private_key.trim();
    let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

    let key_bytes = hex::decode(key_hex)
        .map_err(|e| SigningError::InvalidKey(format!("invalid private key hex: {}", e)))?;
    if key_bytes.len() != 32 {
        return Err(SigningError::InvalidKey(format!(
            "expected 32 key bytes, got {}",
            key_bytes.len()
        )));
    }

    let signing_key = SigningKey::from_bytes(key_bytes.as_slice().into())
        .map_err(|e| SigningError::InvalidKey(format!("invalid private key: {}", e)))?;

    Ok(LocalWallet::from(signing_key))
}

/// Unsigned transfer plus the domain it must be signed under
pub(crate) struct PreparedTransfer {
    pub message: TransferWithAuthorization,
    pub domain: TokenDomain,
    pub valid_after: u64,
    pub valid_before: u64,
}

impl PreparedTransfer {
    pub fn digest(&self) -> H256 {
        self.message.signing_digest(&self.domain)
    }
}

/// Shared front half of signing: scheme and expiry checks, validity window,
/// nonce and EIP-712 domain.
pub(crate) fn prepare_transfer(
    requirement: &PaymentRequirement,
    from: Address,
    chain_id: u64,
    sequence: u64,
    now: DateTime<Utc>,
) -> Result<PreparedTransfer, SigningError> {
    if requirement.scheme != SCHEME_EXACT {
        return Err(SigningError::UnsupportedScheme(requirement.scheme.clone()));
    }
    if requirement.is_expired(now) {
        return Err(SigningError::Expired);
    }

    let now_secs = now.timestamp();
    let valid_after = (now_secs - VALID_AFTER_SKEW_SECS).max(0) as u64;
    let timeout =
        (requirement.max_timeout_seconds.min(i64::MAX as u64) as i64).max(MIN_VALIDITY_SECS);
    let mut valid_before = now_secs.saturating_add(timeout);
    if let Some(expires_at) = requirement.expires_at {
        valid_before = valid_before.min(expires_at.timestamp());
    }
    let valid_before = valid_before.max(0) as u64;

    let domain = TokenDomain {
        name: requirement
            .token_name
            .clone()
            .unwrap_or_else(|| eip3009::DEFAULT_TOKEN_NAME.to_string()),
        version: requirement
            .token_version
            .clone()
            .unwrap_or_else(|| eip3009::DEFAULT_TOKEN_VERSION.to_string()),
        chain_id,
        verifying_contract: requirement.asset,
    };

    let message = TransferWithAuthorization {
        from,
        to: requirement.pay_to,
        value: requirement.amount,
        valid_after: U256::from(valid_after),
        valid_before: U256::from(valid_before),
        nonce: derive_nonce(from, sequence),
    };

    Ok(PreparedTransfer {
        message,
        domain,
        valid_after,
        valid_before,
    })
}

/// Chain id for `network`, or `UnsupportedNetwork`
pub(crate) fn resolve_chain_id(network: &str) -> Result<u64, SigningError> {
    networks::chain_id(network).ok_or_else(|| SigningError::UnsupportedNetwork(network.to_string()))
}
