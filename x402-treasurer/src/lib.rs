//! Payment-authorizing HTTP transport for x402.
//!
//! A [`PaymentTransport`] sends requests through an underlying HTTP client.
//! When a server answers `402 Payment Required`, a [`Treasurer`] decides
//! whether the payment fits its spend policy and has its [`Wallet`] sign an
//! EIP-3009 authorization, and the request is retried once with the signed
//! payment attached.

pub mod config;
pub mod error;
pub mod http;
pub mod registry;
pub mod reporter;
pub mod treasurer;
pub mod wallet;
pub mod x402;

pub use config::{TreasurerConfig, WalletConfig};
pub use error::{ConfigError, PaymentError, SigningError, TreasurerError};
pub use registry::TreasurerRegistry;
pub use treasurer::{PaymentStatus, PolicyKind, PolicyTreasurer, SpendPolicy, Treasurer};
pub use wallet::{Authorization, DirectKeyWallet, SessionKeyWallet, Wallet};
pub use x402::{HttpSend, PaymentRequirement, PaymentTransport, ReqwestSender, RequirementSelector};
