//! Spend policy evaluation

use chrono::{DateTime, Duration, Utc};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::Display;

use super::ledger::{LIFETIME_BUCKET, LedgerKey};
use super::{Rejection, RejectionReason};
use crate::x402::{PaymentRequirement, networks};

/// Default rolling window: one day
pub const DEFAULT_WINDOW_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PolicyKind {
    /// Allow-lists, per-transaction cap and one lifetime cap
    Naive,
    /// Allow-lists, per-transaction cap and a cap per rolling window
    #[default]
    WindowedLimit,
}

/// Limits and allow-lists applied to every authorization.
///
/// Read-only while an authorization is being evaluated; the treasurer swaps
/// whole policies between requests.
#[derive(Debug, Clone)]
pub struct SpendPolicy {
    pub kind: PolicyKind,
    pub per_transaction_max: Option<U256>,
    /// Cap per window (windowed) or over the treasurer's lifetime (naive)
    pub window_max: Option<U256>,
    pub window_duration: Duration,
    /// Empty means any network the wallet supports
    pub allowed_networks: HashSet<String>,
    /// Empty means any payee
    pub allowed_payees: HashSet<Address>,
    /// Empty means any asset
    pub allowed_assets: HashSet<Address>,
}

impl Default for SpendPolicy {
    fn default() -> Self {
        Self {
            kind: PolicyKind::default(),
            per_transaction_max: None,
            window_max: None,
            window_duration: Duration::seconds(DEFAULT_WINDOW_SECS as i64),
            allowed_networks: HashSet::new(),
            allowed_payees: HashSet::new(),
            allowed_assets: HashSet::new(),
        }
    }
}

impl SpendPolicy {
    pub fn naive() -> Self {
        Self {
            kind: PolicyKind::Naive,
            ..Self::default()
        }
    }

    pub fn windowed(window_max: U256, window_duration: Duration) -> Self {
        Self {
            kind: PolicyKind::WindowedLimit,
            window_max: Some(window_max),
            window_duration,
            ..Self::default()
        }
    }

    pub fn with_per_transaction_max(mut self, max: U256) -> Self {
        self.per_transaction_max = Some(max);
        self
    }

    pub fn with_window_max(mut self, max: U256) -> Self {
        self.window_max = Some(max);
        self
    }

    pub fn with_networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_networks = networks.into_iter().map(|n| n.into().to_lowercase()).collect();
        self
    }

    pub fn with_payees(mut self, payees: impl IntoIterator<Item = Address>) -> Self {
        self.allowed_payees = payees.into_iter().collect();
        self
    }

    pub fn with_assets(mut self, assets: impl IntoIterator<Item = Address>) -> Self {
        self.allowed_assets = assets.into_iter().collect();
        self
    }

    pub fn allows_network(&self, network: &str) -> bool {
        self.allowed_networks.is_empty()
            || self
                .allowed_networks
                .iter()
                .any(|allowed| networks::same_network(allowed, network))
    }

    /// Network, asset and payee allow-lists, in that order
    pub fn check_allow_lists(&self, requirement: &PaymentRequirement) -> Result<(), Rejection> {
        if !self.allows_network(&requirement.network) {
            return Err(Rejection::new(
                RejectionReason::NetworkNotAllowed,
                requirement.network.clone(),
            ));
        }
        if !self.allowed_assets.is_empty() && !self.allowed_assets.contains(&requirement.asset) {
            return Err(Rejection::new(
                RejectionReason::AssetNotAllowed,
                format!("{:?}", requirement.asset),
            ));
        }
        if !self.allowed_payees.is_empty() && !self.allowed_payees.contains(&requirement.pay_to) {
            return Err(Rejection::new(
                RejectionReason::PayeeNotAllowed,
                format!("{:?}", requirement.pay_to),
            ));
        }
        Ok(())
    }

    pub fn check_per_transaction(&self, requirement: &PaymentRequirement) -> Result<(), Rejection> {
        match self.per_transaction_max {
            Some(max) if requirement.amount > max => Err(Rejection::new(
                RejectionReason::ExceedsPerTransactionMax,
                format!("{} > {}", requirement.amount, max),
            )),
            _ => Ok(()),
        }
    }

    /// Window index containing `now`, or the lifetime bucket for naive policies
    pub fn bucket(&self, now: DateTime<Utc>) -> i64 {
        match self.kind {
            PolicyKind::Naive => LIFETIME_BUCKET,
            PolicyKind::WindowedLimit => {
                let window = self.window_duration.num_seconds().max(1);
                now.timestamp().div_euclid(window)
            }
        }
    }

    pub fn ledger_key(&self, requirement: &PaymentRequirement, now: DateTime<Utc>) -> LedgerKey {
        let network = networks::chain_id(&requirement.network)
            .map(|id| format!("eip155:{}", id))
            .unwrap_or_else(|| requirement.network.clone());
        LedgerKey::new(&network, requirement.asset, self.bucket(now))
    }
}
