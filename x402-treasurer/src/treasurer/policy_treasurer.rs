//! Treasurer backed by a local spend policy and ledger

use async_trait::async_trait;
use ethers::types::U256;
use parking_lot::RwLock;
use std::sync::Arc;

use x402_types::SCHEME_EXACT;

use super::clock::{Clock, SystemClock};
use super::ledger::{LedgerKey, SpendLedger};
use super::policy::{PolicyKind, SpendPolicy};
use super::{PaymentStatus, Rejection, RejectionReason, Treasurer, log_payment_status};
use crate::error::{SigningError, TreasurerError};
use crate::reporter::StatusReporter;
use crate::wallet::{Authorization, Wallet};
use crate::x402::PaymentRequirement;

/// Amount held in the ledger while the wallet signs.
///
/// Dropped without `commit` (signing failed or the future was cancelled),
/// the amount is handed back.
struct Reservation<'a> {
    ledger: &'a SpendLedger,
    key: LedgerKey,
    amount: U256,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.ledger.release(&self.key, self.amount);
        }
    }
}

pub struct PolicyTreasurer {
    wallet: Box<dyn Wallet>,
    policy: RwLock<Arc<SpendPolicy>>,
    ledger: SpendLedger,
    clock: Arc<dyn Clock>,
    reporter: Option<StatusReporter>,
}

impl PolicyTreasurer {
    pub fn new(wallet: Box<dyn Wallet>, policy: SpendPolicy) -> Self {
        log::info!(
            "[Treasurer] {} policy for {} wallet {:?}",
            policy.kind,
            wallet.mode_name(),
            wallet.identity().payer()
        );
        Self {
            wallet,
            policy: RwLock::new(Arc::new(policy)),
            ledger: SpendLedger::new(),
            clock: Arc::new(SystemClock),
            reporter: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: StatusReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Current policy snapshot
    pub fn policy(&self) -> Arc<SpendPolicy> {
        self.policy.read().clone()
    }

    /// Replace the policy. Authorizations already in flight keep the
    /// snapshot they started with.
    pub fn set_policy(&self, policy: SpendPolicy) {
        log::info!("[Treasurer] Policy updated ({})", policy.kind);
        *self.policy.write() = Arc::new(policy);
    }

    pub fn ledger(&self) -> &SpendLedger {
        &self.ledger
    }

    pub fn wallet(&self) -> &dyn Wallet {
        self.wallet.as_ref()
    }

    /// Amount already committed in the bucket `requirement` would land in now
    pub fn spent_for(&self, requirement: &PaymentRequirement) -> U256 {
        let key = self.policy().ledger_key(requirement, self.clock.now());
        self.ledger.spent(&key)
    }

    /// Checks that need neither the ledger nor the wallet, in evaluation order
    fn evaluate(
        &self,
        policy: &SpendPolicy,
        requirement: &PaymentRequirement,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), TreasurerError> {
        if requirement.scheme != SCHEME_EXACT {
            return Err(TreasurerError::Declined(Rejection::new(
                RejectionReason::UnsupportedScheme,
                requirement.scheme.clone(),
            )));
        }
        if requirement.amount.is_zero() {
            return Err(TreasurerError::Declined(Rejection::new(
                RejectionReason::MalformedRequirement,
                "zero amount",
            )));
        }
        if requirement.is_expired(now) {
            return Err(TreasurerError::Declined(Rejection::new(
                RejectionReason::RequirementExpired,
                requirement.label(),
            )));
        }
        if !self.wallet.supports_network(&requirement.network) {
            return Err(SigningError::UnsupportedNetwork(requirement.network.clone()).into());
        }

        policy.check_allow_lists(requirement).map_err(TreasurerError::Declined)?;
        policy.check_per_transaction(requirement).map_err(TreasurerError::Declined)?;
        Ok(())
    }

    fn reserve(
        &self,
        policy: &SpendPolicy,
        requirement: &PaymentRequirement,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Reservation<'_>, TreasurerError> {
        let key = policy.ledger_key(requirement, now);
        if policy.kind == PolicyKind::WindowedLimit {
            self.ledger.prune_before(key.bucket);
        }

        match self
            .ledger
            .try_reserve(key.clone(), requirement.amount, policy.window_max)
        {
            Ok(total) => {
                log::debug!(
                    "[Treasurer] Reserved {} on {} (bucket total {})",
                    requirement.amount,
                    key.network,
                    total
                );
                Ok(Reservation {
                    ledger: &self.ledger,
                    key,
                    amount: requirement.amount,
                    committed: false,
                })
            }
            Err(current) => Err(TreasurerError::Declined(Rejection::new(
                RejectionReason::ExceedsWindowMax,
                format!(
                    "{} + {} > {}",
                    current,
                    requirement.amount,
                    policy.window_max.unwrap_or_default()
                ),
            ))),
        }
    }
}

#[async_trait]
impl Treasurer for PolicyTreasurer {
    fn supports(&self, requirement: &PaymentRequirement) -> bool {
        requirement.scheme == SCHEME_EXACT
            && self.policy().allows_network(&requirement.network)
            && self.wallet.supports_network(&requirement.network)
    }

    async fn authorize(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<Authorization, TreasurerError> {
        let policy = self.policy();
        let now = self.clock.now();

        if let Err(e) = self.evaluate(&policy, requirement, now) {
            log::info!("[Treasurer] Declined {}: {}", requirement, e);
            return Err(e);
        }

        let reservation = match self.reserve(&policy, requirement, now) {
            Ok(reservation) => reservation,
            Err(e) => {
                log::info!("[Treasurer] Declined {}: {}", requirement, e);
                return Err(e);
            }
        };

        let authorization = match self.wallet.sign(requirement).await {
            Ok(authorization) => authorization,
            Err(e) => {
                log::warn!("[Treasurer] Signing failed for {}: {}", requirement, e);
                return Err(e.into());
            }
        };
        reservation.commit();

        log::info!(
            "[Treasurer] Authorized {} as {:?} (payment {})",
            requirement,
            authorization.payer,
            authorization.id
        );
        Ok(authorization)
    }

    fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.policy().allowed_networks.iter().cloned().collect();
        networks.sort();
        networks
    }

    async fn on_payment_status(&self, authorization: &Authorization, status: &PaymentStatus) {
        log_payment_status(authorization, status);
        if let Some(reporter) = &self.reporter {
            reporter.report(authorization, status).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treasurer::ManualClock;
    use crate::wallet::test_keys::KEY_0;
    use crate::wallet::{DirectKeyWallet, WalletIdentity};
    use chrono::{Duration, Utc};
    use ethers::types::Address;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn amt(v: u64) -> U256 {
        U256::from(v)
    }

    fn requirement(network: &str, amount: u64) -> PaymentRequirement {
        PaymentRequirement::exact(
            network,
            Address::from_low_u64_be(0xa5),
            Address::from_low_u64_be(0xb0b),
            amt(amount),
        )
    }

    fn treasurer(policy: SpendPolicy) -> PolicyTreasurer {
        PolicyTreasurer::new(Box::new(DirectKeyWallet::from_private_key(KEY_0).unwrap()), policy)
    }

    /// Wallet that counts calls and can be told to fail
    struct CountingWallet {
        calls: Arc<AtomicUsize>,
        fail: bool,
        inner: DirectKeyWallet,
    }

    #[async_trait]
    impl Wallet for CountingWallet {
        async fn sign(
            &self,
            requirement: &PaymentRequirement,
        ) -> Result<Authorization, SigningError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SigningError::Signer("key store unavailable".to_string()));
            }
            self.inner.sign(requirement).await
        }
        fn identity(&self) -> WalletIdentity {
            self.inner.identity()
        }
        fn supports_network(&self, network: &str) -> bool {
            self.inner.supports_network(network)
        }
        fn mode_name(&self) -> &'static str {
            "counting"
        }
    }

    fn counting(fail: bool) -> (Box<dyn Wallet>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let wallet = CountingWallet {
            calls: calls.clone(),
            fail,
            inner: DirectKeyWallet::from_private_key(KEY_0).unwrap(),
        };
        (Box::new(wallet), calls)
    }

    fn declined_reason(result: Result<Authorization, TreasurerError>) -> RejectionReason {
        match result {
            Err(TreasurerError::Declined(rejection)) => rejection.reason,
            other => panic!("expected decline, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_per_transaction_max_declines_and_leaves_ledger() {
        let treasurer = treasurer(SpendPolicy::default().with_per_transaction_max(amt(100)));
        let req = requirement("base", 150);

        assert_eq!(
            declined_reason(treasurer.authorize(&req).await),
            RejectionReason::ExceedsPerTransactionMax
        );
        assert_eq!(treasurer.spent_for(&req), U256::zero());
        assert!(treasurer.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_window_max_second_payment_declined() {
        let treasurer = treasurer(SpendPolicy::windowed(amt(100), Duration::hours(1)));
        let req = requirement("base", 60);

        treasurer.authorize(&req).await.unwrap();
        assert_eq!(treasurer.spent_for(&req), amt(60));

        assert_eq!(
            declined_reason(treasurer.authorize(&req).await),
            RejectionReason::ExceedsWindowMax
        );
        assert_eq!(treasurer.spent_for(&req), amt(60));
    }

    #[tokio::test]
    async fn test_new_window_resets_allowance() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let treasurer = treasurer(SpendPolicy::windowed(amt(100), Duration::minutes(10)))
            .with_clock(clock.clone());
        let req = requirement("base", 80);

        treasurer.authorize(&req).await.unwrap();
        assert!(treasurer.authorize(&req).await.is_err());

        clock.advance(Duration::minutes(10));
        treasurer.authorize(&req).await.unwrap();
        assert_eq!(treasurer.spent_for(&req), amt(80));
        assert_eq!(treasurer.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_naive_global_cap_spans_time() {
        let clock = Arc::new(ManualClock::at(Utc::now()));
        let treasurer =
            treasurer(SpendPolicy::naive().with_window_max(amt(100))).with_clock(clock.clone());
        let req = requirement("base", 60);

        treasurer.authorize(&req).await.unwrap();
        clock.advance(Duration::days(30));
        assert_eq!(
            declined_reason(treasurer.authorize(&req).await),
            RejectionReason::ExceedsWindowMax
        );
    }

    #[tokio::test]
    async fn test_evaluation_order() {
        // Disallowed network and over both caps: the allow-list wins
        let policy = SpendPolicy::windowed(amt(10), Duration::hours(1))
            .with_per_transaction_max(amt(10))
            .with_networks(["base"]);
        let treasurer = treasurer(policy);
        assert_eq!(
            declined_reason(treasurer.authorize(&requirement("polygon", 500)).await),
            RejectionReason::NetworkNotAllowed
        );
        // Allowed network, over both caps: per-transaction wins
        assert_eq!(
            declined_reason(treasurer.authorize(&requirement("base", 500)).await),
            RejectionReason::ExceedsPerTransactionMax
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unsupported_scheme() {
        let treasurer = treasurer(SpendPolicy::default());
        assert_eq!(
            declined_reason(treasurer.authorize(&requirement("base", 0)).await),
            RejectionReason::MalformedRequirement
        );

        let mut upto = requirement("base", 5);
        upto.scheme = "upto".to_string();
        assert!(!treasurer.supports(&upto));
        assert_eq!(
            declined_reason(treasurer.authorize(&upto).await),
            RejectionReason::UnsupportedScheme
        );

        let mut expired = requirement("base", 5);
        expired.expires_at = Some(Utc::now() - Duration::seconds(5));
        assert_eq!(
            declined_reason(treasurer.authorize(&expired).await),
            RejectionReason::RequirementExpired
        );
    }

    #[tokio::test]
    async fn test_signing_failure_releases_reservation() {
        let (wallet, calls) = counting(true);
        let treasurer =
            PolicyTreasurer::new(wallet, SpendPolicy::windowed(amt(100), Duration::hours(1)));
        let req = requirement("base", 60);

        assert!(matches!(
            treasurer.authorize(&req).await,
            Err(TreasurerError::Signing(SigningError::Signer(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(treasurer.spent_for(&req), U256::zero());
    }

    #[tokio::test]
    async fn test_rejection_never_reaches_wallet() {
        let (wallet, calls) = counting(false);
        let treasurer =
            PolicyTreasurer::new(wallet, SpendPolicy::default().with_per_transaction_max(amt(1)));
        assert!(treasurer.authorize(&requirement("base", 2)).await.is_err());
        assert!(treasurer.authorize(&requirement("solana", 1)).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_network_is_signing_error() {
        let treasurer = treasurer(SpendPolicy::default());
        assert!(!treasurer.supports(&requirement("solana", 1)));
        assert!(matches!(
            treasurer.authorize(&requirement("solana", 1)).await,
            Err(TreasurerError::Signing(SigningError::UnsupportedNetwork(_)))
        ));
    }

    #[tokio::test]
    async fn test_set_policy_between_requests() {
        let treasurer = treasurer(SpendPolicy::default().with_per_transaction_max(amt(10)));
        let req = requirement("base", 50);
        assert!(treasurer.authorize(&req).await.is_err());

        treasurer.set_policy(SpendPolicy::default().with_per_transaction_max(amt(100)));
        assert!(treasurer.authorize(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_networks_and_supports() {
        let treasurer = treasurer(SpendPolicy::default().with_networks(["polygon", "base"]));
        assert_eq!(treasurer.networks(), vec!["base".to_string(), "polygon".to_string()]);
        assert!(treasurer.supports(&requirement("base", 1)));
        assert!(!treasurer.supports(&requirement("base-sepolia", 1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_authorizations_respect_window_max() {
        let treasurer = Arc::new(treasurer(SpendPolicy::windowed(amt(1_000), Duration::hours(1))));
        let req = requirement("base", 7);

        let handles: Vec<_> = (0..400)
            .map(|_| {
                let treasurer = treasurer.clone();
                let req = req.clone();
                tokio::spawn(async move { treasurer.authorize(&req).await.is_ok() })
            })
            .collect();

        let mut granted = 0u64;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 142);
        assert_eq!(treasurer.spent_for(&req), amt(granted * 7));
        assert!(treasurer.spent_for(&req) <= amt(1_000));
    }
}
