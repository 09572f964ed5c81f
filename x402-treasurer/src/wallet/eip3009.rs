//! EIP-712 hashing of EIP-3009 `TransferWithAuthorization` messages

use ethers::abi::{self, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;

/// Token domain defaults used when the server does not send `extra`
pub const DEFAULT_TOKEN_NAME: &str = "USD Coin";
pub const DEFAULT_TOKEN_VERSION: &str = "2";

const DOMAIN_TYPE: &[u8] =
    b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

const TRANSFER_TYPE: &[u8] = b"TransferWithAuthorization(address from,address to,uint256 value,\
uint256 validAfter,uint256 validBefore,bytes32 nonce)";

/// EIP-712 domain of the payment token
#[derive(Debug, Clone)]
pub struct TokenDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl TokenDomain {
    pub fn separator(&self) -> H256 {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ]);
        H256::from(keccak256(encoded))
    }
}

/// TransferWithAuthorization message for EIP-3009
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferWithAuthorization {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: H256,
}

impl TransferWithAuthorization {
    pub fn struct_hash(&self) -> H256 {
        let encoded = abi::encode(&[
            Token::FixedBytes(keccak256(TRANSFER_TYPE).to_vec()),
            Token::Address(self.from),
            Token::Address(self.to),
            Token::Uint(self.value),
            Token::Uint(self.valid_after),
            Token::Uint(self.valid_before),
            Token::FixedBytes(self.nonce.as_bytes().to_vec()),
        ]);
        H256::from(keccak256(encoded))
    }

    /// keccak256("\x19\x01" ++ domainSeparator ++ structHash)
    pub fn signing_digest(&self, domain: &TokenDomain) -> H256 {
        let mut to_sign = Vec::with_capacity(66);
        to_sign.extend_from_slice(&[0x19, 0x01]);
        to_sign.extend_from_slice(domain.separator().as_bytes());
        to_sign.extend_from_slice(self.struct_hash().as_bytes());
        H256::from(keccak256(&to_sign))
    }
}

/// Replay-protection nonce bound to the signing identity and its sequence
pub fn derive_nonce(identity: Address, sequence: u64) -> H256 {
    let mut seed = Vec::with_capacity(28);
    seed.extend_from_slice(identity.as_bytes());
    seed.extend_from_slice(&sequence.to_be_bytes());
    H256::from(keccak256(seed))
}
