//! Smart-account wallet driven by a session key
//!
//! The account's primary key never leaves its custodian. A session key,
//! registered with a validator module on the smart account, signs the
//! EIP-3009 transfer with `from` set to the smart account. The signature is
//! prefixed with the validator address so the account's ERC-1271
//! `isValidSignature` can route verification to that validator.

use async_trait::async_trait;
use chrono::Utc;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;

use super::{
    Authorization, AuthorizationProof, NonceSequence, Wallet, WalletIdentity, parse_private_key,
    prepare_transfer,
};
use crate::error::SigningError;
use crate::x402::{PaymentRequirement, networks};

pub struct SessionKeyWallet {
    smart_account: Address,
    validator: Address,
    chain_id: u64,
    session_key: LocalWallet,
    sequence: NonceSequence,
}

impl SessionKeyWallet {
    pub fn new(
        smart_account_address: &str,
        session_key_private_key: &str,
        chain_id: u64,
        validator_address: &str,
    ) -> Result<Self, SigningError> {
        let smart_account = smart_account_address.trim().parse::<Address>().map_err(|e| {
            SigningError::InvalidKey(format!("invalid smart account address: {}", e))
        })?;
        let validator = validator_address
            .trim()
            .parse::<Address>()
            .map_err(|e| SigningError::InvalidKey(format!("invalid validator address: {}", e)))?;
        let session_key = parse_private_key(session_key_private_key)?.with_chain_id(chain_id);

        log::info!(
            "[Wallet] Session key {:?} signs for smart account {:?} on {}",
            session_key.address(),
            smart_account,
            networks::network_name(chain_id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("eip155:{}", chain_id))
        );

        Ok(Self {
            smart_account,
            validator,
            chain_id,
            session_key,
            sequence: NonceSequence::new(),
        })
    }

    pub fn with_sequence(mut self, sequence: NonceSequence) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn smart_account(&self) -> Address {
        self.smart_account
    }

    pub fn session_key_address(&self) -> Address {
        self.session_key.address()
    }

    /// `validator ‖ r ‖ s ‖ v`
    fn pack_signature(&self, signature: &[u8]) -> Vec<u8> {
        let mut packed = Vec::with_capacity(20 + signature.len());
        packed.extend_from_slice(self.validator.as_bytes());
        packed.extend_from_slice(signature);
        packed
    }
}

#[async_trait]
impl Wallet for SessionKeyWallet {
    async fn sign(&self, requirement: &PaymentRequirement) -> Result<Authorization, SigningError> {
        if !self.supports_network(&requirement.network) {
            return Err(SigningError::UnsupportedNetwork(requirement.network.clone()));
        }

        let sequence = self.sequence.next();
        let prepared =
            prepare_transfer(requirement, self.smart_account, self.chain_id, sequence, Utc::now())?;

        let signature = self
            .session_key
            .sign_hash(prepared.digest())
            .map_err(|e| SigningError::Signer(format!("Session key failed to sign: {}", e)))?;

        log::debug!(
            "[Wallet] Session key {:?} signed {} for smart account {:?} (sequence {})",
            self.session_key.address(),
            requirement.label(),
            self.smart_account,
            sequence
        );

        Ok(Authorization {
            id: uuid::Uuid::new_v4().to_string(),
            requirement: requirement.clone(),
            payer: self.smart_account,
            sequence,
            nonce: prepared.message.nonce,
            valid_after: prepared.valid_after,
            valid_before: prepared.valid_before,
            signature: self.pack_signature(&signature.to_vec()),
            proof: AuthorizationProof::SessionKey {
                smart_account: self.smart_account,
                validator: self.validator,
                session_key: self.session_key.address(),
            },
        })
    }

    fn identity(&self) -> WalletIdentity {
        WalletIdentity::SmartAccount {
            smart_account: self.smart_account,
            session_key: self.session_key.address(),
            validator: self.validator,
            chain_id: self.chain_id,
        }
    }

    fn supports_network(&self, network: &str) -> bool {
        networks::chain_id(network) == Some(self.chain_id)
    }

    fn mode_name(&self) -> &'static str {
        "smart-account"
    }
}
