//! Treasurer - decides whether and how to pay
//!
//! A treasurer evaluates each payment requirement against its spend policy,
//! reserves the amount in its ledger, and asks its wallet for a signature.
//! The transport only ever talks to the `Treasurer` trait, so a single policy
//! treasurer and a multi-network registry are interchangeable.

mod clock;
mod ledger;
mod policy;
mod policy_treasurer;

pub use clock::{Clock, SystemClock};
pub use ledger::{LIFETIME_BUCKET, LedgerKey, SpendLedger};
pub use policy::{DEFAULT_WINDOW_SECS, PolicyKind, SpendPolicy};
pub use policy_treasurer::PolicyTreasurer;

#[cfg(test)]
pub(crate) use clock::ManualClock;

use async_trait::async_trait;
use std::fmt;
use strum::{AsRefStr, Display};

use crate::error::TreasurerError;
use crate::wallet::Authorization;
use crate::x402::PaymentRequirement;

/// Why a treasurer refused to pay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RejectionReason {
    MalformedRequirement,
    UnsupportedScheme,
    RequirementExpired,
    NetworkNotAllowed,
    AssetNotAllowed,
    PayeeNotAllowed,
    ExceedsPerTransactionMax,
    ExceedsWindowMax,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    pub fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{} ({})", self.reason, self.detail)
        }
    }
}

/// Outcome of the paid retry, reported back to the treasurer
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PaymentStatus {
    /// Server served the resource
    Accepted { status: u16 },
    /// Server answered, but not with success (a second 402 included)
    Rejected { status: u16 },
    /// Retry never produced a response; the spend stays committed
    Failed { error: String },
}

#[async_trait]
pub trait Treasurer: Send + Sync {
    /// Whether this treasurer can pay `requirement` at all (scheme and network)
    fn supports(&self, requirement: &PaymentRequirement) -> bool;

    /// Apply policy, reserve the spend and sign
    async fn authorize(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<Authorization, TreasurerError>;

    /// Network identifiers this treasurer serves; empty means any its wallet supports
    fn networks(&self) -> Vec<String>;

    /// Whether any treasurer behind this one is responsible for `network`.
    /// A single treasurer is; a registry only for registered networks.
    fn serves_network(&self, _network: &str) -> bool {
        true
    }

    /// Called once the paid retry has completed
    async fn on_payment_status(&self, authorization: &Authorization, status: &PaymentStatus) {
        log_payment_status(authorization, status);
    }
}

pub(crate) fn log_payment_status(authorization: &Authorization, status: &PaymentStatus) {
    match status {
        PaymentStatus::Accepted { status } => log::info!(
            "[Treasurer] Payment {} accepted ({}): {}",
            authorization.id,
            status,
            authorization.requirement
        ),
        PaymentStatus::Rejected { status } => log::warn!(
            "[Treasurer] Payment {} not accepted by server ({}): {}",
            authorization.id,
            status,
            authorization.requirement
        ),
        PaymentStatus::Failed { error } => log::warn!(
            "[Treasurer] Committed but unconfirmed spend {}: {} ({})",
            authorization.id,
            authorization.requirement,
            error
        ),
    }
}
