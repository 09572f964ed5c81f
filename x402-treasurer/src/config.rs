//! Treasurer configuration
//!
//! Loadable from a TOML file or from environment variables. Field names
//! follow the camelCase options of the payment SDK configuration surface
//! (`apiUrl`, `walletConfig`, `networks`, limits).

use chrono::Duration;
use ethers::types::{Address, U256};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;
use crate::http;
use crate::reporter::StatusReporter;
use crate::treasurer::{DEFAULT_WINDOW_SECS, PolicyKind, PolicyTreasurer, SpendPolicy};
use crate::wallet::create_wallet;
use crate::x402::requirement::{parse_address, parse_amount};

/// Environment variable names read by [`TreasurerConfig::from_env`]
pub mod env_vars {
    pub const API_URL: &str = "X402_API_URL";
    pub const WALLET_TYPE: &str = "X402_WALLET_TYPE";
    pub const PRIVATE_KEY: &str = "X402_PRIVATE_KEY";
    pub const SMART_ACCOUNT_ADDRESS: &str = "X402_SMART_ACCOUNT_ADDRESS";
    pub const SESSION_KEY_PRIVATE_KEY: &str = "X402_SESSION_KEY_PRIVATE_KEY";
    pub const CHAIN_ID: &str = "X402_CHAIN_ID";
    pub const VALIDATOR_ADDRESS: &str = "X402_VALIDATOR_ADDRESS";
    pub const NETWORKS: &str = "X402_NETWORKS";
    pub const POLICY: &str = "X402_POLICY";
    pub const PER_TRANSACTION_MAX: &str = "X402_PER_TRANSACTION_MAX";
    pub const WINDOW_MAX: &str = "X402_WINDOW_MAX";
    pub const WINDOW_DURATION_SECS: &str = "X402_WINDOW_DURATION_SECS";
    pub const PROXY_URL: &str = "X402_PROXY_URL";
    pub const TIMEOUT_SECS: &str = "X402_TIMEOUT_SECS";
}

/// Signing identity configuration
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WalletConfig {
    #[serde(rename_all = "camelCase")]
    Direct { private_key: String },
    #[serde(rename_all = "camelCase")]
    SmartAccount {
        smart_account_address: String,
        session_key_private_key: String,
        chain_id: u64,
        validator_address: String,
    },
}

// Keys stay out of logs
impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletConfig::Direct { .. } => f
                .debug_struct("Direct")
                .field("private_key", &"<redacted>")
                .finish(),
            WalletConfig::SmartAccount {
                smart_account_address,
                chain_id,
                validator_address,
                ..
            } => f
                .debug_struct("SmartAccount")
                .field("smart_account_address", smart_account_address)
                .field("session_key_private_key", &"<redacted>")
                .field("chain_id", chain_id)
                .field("validator_address", validator_address)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendLimits {
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub per_transaction_max: Option<U256>,
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub window_max: Option<U256>,
    /// Window length in seconds
    #[serde(default = "default_window_duration")]
    pub window_duration: u64,
}

impl Default for SpendLimits {
    fn default() -> Self {
        Self {
            per_transaction_max: None,
            window_max: None,
            window_duration: DEFAULT_WINDOW_SECS,
        }
    }
}

fn default_window_duration() -> u64 {
    DEFAULT_WINDOW_SECS
}

/// Amounts may be written as strings (any size) or plain integers
fn deserialize_amount<'de, D>(deserializer: D) -> Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Number(u64),
        Text(String),
    }

    match Option::<RawAmount>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawAmount::Number(n)) => Ok(Some(U256::from(n))),
        Some(RawAmount::Text(s)) => parse_amount(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreasurerConfig {
    /// Policy/telemetry backend; enables status reporting when set
    #[serde(default)]
    pub api_url: Option<String>,
    pub wallet_config: WalletConfig,
    /// Networks this treasurer pays on; empty means any the wallet supports
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub limits: SpendLimits,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default)]
    pub allowed_payees: Vec<String>,
    #[serde(default)]
    pub allowed_assets: Vec<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TreasurerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Read configuration from the process environment (see [`env_vars`])
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| var(name).ok_or(ConfigError::MissingVar(name));
        let amount = |name: &'static str| {
            var(name)
                .map(|v| {
                    parse_amount(&v).map_err(|message| ConfigError::Invalid {
                        field: name,
                        message,
                    })
                })
                .transpose()
        };
        let number = |name: &'static str| {
            var(name)
                .map(|v| {
                    v.parse::<u64>().map_err(|e| ConfigError::Invalid {
                        field: name,
                        message: e.to_string(),
                    })
                })
                .transpose()
        };
        let list = |name: &'static str| {
            var(name)
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        let wallet_type = var(env_vars::WALLET_TYPE).unwrap_or_else(|| {
            if var(env_vars::SMART_ACCOUNT_ADDRESS).is_some() {
                "smart-account".to_string()
            } else {
                "direct".to_string()
            }
        });

        let wallet_config = match wallet_type.to_lowercase().as_str() {
            "direct" => WalletConfig::Direct {
                private_key: required(env_vars::PRIVATE_KEY)?,
            },
            "smart-account" | "smart_account" => WalletConfig::SmartAccount {
                smart_account_address: required(env_vars::SMART_ACCOUNT_ADDRESS)?,
                session_key_private_key: required(env_vars::SESSION_KEY_PRIVATE_KEY)?,
                chain_id: number(env_vars::CHAIN_ID)?
                    .ok_or(ConfigError::MissingVar(env_vars::CHAIN_ID))?,
                validator_address: required(env_vars::VALIDATOR_ADDRESS)?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    field: env_vars::WALLET_TYPE,
                    message: format!(
                        "unknown wallet type '{}'. Use 'direct' or 'smart-account'.",
                        other
                    ),
                });
            }
        };

        let policy = match var(env_vars::POLICY).map(|p| p.to_lowercase()).as_deref() {
            None | Some("windowed-limit") | Some("windowed") => PolicyKind::WindowedLimit,
            Some("naive") => PolicyKind::Naive,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    field: env_vars::POLICY,
                    message: format!("unknown policy '{}'", other),
                });
            }
        };

        let config = Self {
            api_url: var(env_vars::API_URL),
            wallet_config,
            networks: list(env_vars::NETWORKS),
            limits: SpendLimits {
                per_transaction_max: amount(env_vars::PER_TRANSACTION_MAX)?,
                window_max: amount(env_vars::WINDOW_MAX)?,
                window_duration: number(env_vars::WINDOW_DURATION_SECS)?
                    .unwrap_or(DEFAULT_WINDOW_SECS),
            },
            policy,
            allowed_payees: Vec::new(),
            allowed_assets: Vec::new(),
            proxy_url: var(env_vars::PROXY_URL),
            timeout_secs: number(env_vars::TIMEOUT_SECS)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.window_duration == 0 {
            return Err(ConfigError::Invalid {
                field: "windowDuration",
                message: "must be greater than zero".to_string(),
            });
        }
        self.window_duration()?;
        Ok(())
    }

    fn window_duration(&self) -> Result<Duration, ConfigError> {
        i64::try_from(self.limits.window_duration)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| ConfigError::Invalid {
                field: "windowDuration",
                message: format!("{} seconds is out of range", self.limits.window_duration),
            })
    }

    pub fn spend_policy(&self) -> Result<SpendPolicy, ConfigError> {
        let addresses = |field: &'static str, values: &[String]| {
            values
                .iter()
                .map(|v| {
                    parse_address(v).map_err(|message| ConfigError::Invalid { field, message })
                })
                .collect::<Result<Vec<Address>, _>>()
        };

        Ok(SpendPolicy {
            kind: self.policy,
            per_transaction_max: self.limits.per_transaction_max,
            window_max: self.limits.window_max,
            window_duration: self.window_duration()?,
            ..SpendPolicy::default()
        }
        .with_networks(self.networks.iter().cloned())
        .with_payees(addresses("allowedPayees", &self.allowed_payees)?)
        .with_assets(addresses("allowedAssets", &self.allowed_assets)?))
    }

    pub fn http_client(&self) -> Result<Client, ConfigError> {
        let timeout = self
            .timeout_secs
            .map(std::time::Duration::from_secs)
            .unwrap_or(http::DEFAULT_TIMEOUT);
        let client = match &self.proxy_url {
            Some(proxy) => http::build_proxy_client(proxy, timeout),
            None => http::build_client(timeout),
        };
        client.map_err(|e| ConfigError::Invalid {
            field: "proxyUrl",
            message: e.to_string(),
        })
    }

    /// Construct the wallet and a policy treasurer that owns it
    pub fn build_treasurer(&self, client: &Client) -> Result<PolicyTreasurer, ConfigError> {
        let wallet = create_wallet(&self.wallet_config)?;
        let mut treasurer = PolicyTreasurer::new(wallet, self.spend_policy()?);
        if let Some(api_url) = &self.api_url {
            let reporter = StatusReporter::new(api_url, client.clone())?;
            log::info!("[Treasurer] Reporting payment status to {}", reporter.endpoint());
            treasurer = treasurer.with_reporter(reporter);
        }
        Ok(treasurer)
    }
}
