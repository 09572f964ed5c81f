//! Direct-key wallet
//!
//! The paying account's own private key signs the transfer.

use async_trait::async_trait;
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};

use super::{
    Authorization, AuthorizationProof, NonceSequence, Wallet, WalletIdentity, parse_private_key,
    prepare_transfer, resolve_chain_id,
};
use crate::error::SigningError;
use crate::x402::PaymentRequirement;

pub struct DirectKeyWallet {
    wallet: LocalWallet,
    sequence: NonceSequence,
}

impl DirectKeyWallet {
    /// Create from a private key string (hex, with or without 0x prefix)
    pub fn from_private_key(private_key: &str) -> Result<Self, SigningError> {
        Ok(Self {
            wallet: parse_private_key(private_key)?,
            sequence: NonceSequence::new(),
        })
    }

    pub fn with_sequence(mut self, sequence: NonceSequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn address(&self) -> String {
        format!("{:?}", self.wallet.address()).to_lowercase()
    }
}

#[async_trait]
impl Wallet for DirectKeyWallet {
    async fn sign(&self, requirement: &PaymentRequirement) -> Result<Authorization, SigningError> {
        let chain_id = resolve_chain_id(&requirement.network)?;
        let from = self.wallet.address();
        let sequence = self.sequence.next();

        let prepared = prepare_transfer(requirement, from, chain_id, sequence, Utc::now())?;
        let signature = self
            .wallet
            .sign_hash(prepared.digest())
            .map_err(|e| SigningError::Signer(format!("Failed to sign: {}", e)))?;

        log::debug!(
            "[Wallet] Signed {} as {:?} (sequence {})",
            requirement.label(),
            from,
            sequence
        );

        Ok(Authorization {
            id: uuid::Uuid::new_v4().to_string(),
            requirement: requirement.clone(),
            payer: from,
            sequence,
            nonce: prepared.message.nonce,
            valid_after: prepared.valid_after,
            valid_before: prepared.valid_before,
            signature: signature.to_vec(),
            proof: AuthorizationProof::Direct,
        })
    }

    fn identity(&self) -> WalletIdentity {
        WalletIdentity::Direct {
            address: self.wallet.address(),
        }
    }

    fn supports_network(&self, network: &str) -> bool {
        resolve_chain_id(network).is_ok()
    }

    fn mode_name(&self) -> &'static str {
        "direct"
    }
}
