//! Treasurer registry
//!
//! Lets one transport pay on several networks, each with its own treasurer
//! and policy. The registry is itself a `Treasurer`, so the transport does
//! not know whether it talks to one treasurer or many.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::TreasurerError;
use crate::treasurer::{PaymentStatus, Treasurer};
use crate::wallet::Authorization;
use crate::x402::{PaymentRequirement, networks};

struct Registration {
    networks: HashSet<String>,
    treasurer: Arc<dyn Treasurer>,
}

impl Registration {
    fn serves(&self, network: &str) -> bool {
        self.networks
            .iter()
            .any(|registered| networks::same_network(registered, network))
    }
}

#[derive(Default)]
pub struct TreasurerRegistry {
    registrations: RwLock<Vec<Registration>>,
}

impl TreasurerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requirements on `networks` to `treasurer`. Earlier registrations
    /// win when two claim the same network.
    pub fn register<I, S>(&self, treasurer: Arc<dyn Treasurer>, networks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let networks: HashSet<String> = networks
            .into_iter()
            .map(|n| n.into().to_lowercase())
            .collect();
        log::info!(
            "[Treasurer] Registered treasurer for networks: {}",
            sorted(&networks).join(", ")
        );
        self.registrations.write().push(Registration {
            networks,
            treasurer,
        });
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<I, S>(self, treasurer: Arc<dyn Treasurer>, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(treasurer, networks);
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }

    /// Treasurer serving `network`, if any
    pub fn treasurer_for(&self, network: &str) -> Option<Arc<dyn Treasurer>> {
        self.registrations
            .read()
            .iter()
            .find(|r| r.serves(network))
            .map(|r| r.treasurer.clone())
    }
}

fn sorted(networks: &HashSet<String>) -> Vec<String> {
    let mut list: Vec<String> = networks.iter().cloned().collect();
    list.sort();
    list
}

#[async_trait]
impl Treasurer for TreasurerRegistry {
    fn supports(&self, requirement: &PaymentRequirement) -> bool {
        self.treasurer_for(&requirement.network)
            .is_some_and(|treasurer| treasurer.supports(requirement))
    }

    async fn authorize(
        &self,
        requirement: &PaymentRequirement,
    ) -> Result<Authorization, TreasurerError> {
        let treasurer = self
            .treasurer_for(&requirement.network)
            .ok_or_else(|| TreasurerError::NoTreasurerForNetwork(requirement.network.clone()))?;
        treasurer.authorize(requirement).await
    }

    fn serves_network(&self, network: &str) -> bool {
        self.treasurer_for(network).is_some()
    }

    fn networks(&self) -> Vec<String> {
        let all: HashSet<String> = self
            .registrations
            .read()
            .iter()
            .flat_map(|r| r.networks.iter().cloned())
            .collect();
        sorted(&all)
    }

    async fn on_payment_status(&self, authorization: &Authorization, status: &PaymentStatus) {
        match self.treasurer_for(&authorization.requirement.network) {
            Some(treasurer) => treasurer.on_payment_status(authorization, status).await,
            None => crate::treasurer::log_payment_status(authorization, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treasurer::{PolicyTreasurer, SpendPolicy};
    use crate::wallet::test_keys::{KEY_0, KEY_1};
    use crate::wallet::{DirectKeyWallet, SessionKeyWallet};
    use chrono::Duration;
    use ethers::types::{Address, U256};

    fn requirement(network: &str, amount: u64) -> PaymentRequirement {
        PaymentRequirement::exact(
            network,
            Address::from_low_u64_be(0xa5),
            Address::from_low_u64_be(0xb0b),
            U256::from(amount),
        )
    }

    fn registry() -> (TreasurerRegistry, Arc<PolicyTreasurer>, Arc<PolicyTreasurer>) {
        let base = Arc::new(PolicyTreasurer::new(
            Box::new(DirectKeyWallet::from_private_key(KEY_0).unwrap()),
            SpendPolicy::windowed(U256::from(100u64), Duration::hours(1)),
        ));
        let sepolia = Arc::new(PolicyTreasurer::new(
            Box::new(
                SessionKeyWallet::new(
                    "0x1111111111111111111111111111111111111111",
                    KEY_1,
                    84532,
                    "0x2222222222222222222222222222222222222222",
                )
                .unwrap(),
            ),
            SpendPolicy::windowed(U256::from(1_000u64), Duration::hours(1)),
        ));
        let registry = TreasurerRegistry::new()
            .with(base.clone(), ["base", "polygon"])
            .with(sepolia.clone(), ["base-sepolia"]);
        (registry, base, sepolia)
    }

    #[tokio::test]
    async fn test_dispatch_by_network() {
        let (registry, base, sepolia) = registry();
        assert_eq!(registry.len(), 2);

        let auth = registry.authorize(&requirement("base-sepolia", 500)).await.unwrap();
        assert_eq!(
            auth.payer,
            "0x1111111111111111111111111111111111111111".parse::<Address>().unwrap()
        );
        assert_eq!(sepolia.spent_for(&requirement("base-sepolia", 1)), U256::from(500u64));
        assert_eq!(base.spent_for(&requirement("base", 1)), U256::zero());

        registry.authorize(&requirement("eip155:8453", 40)).await.unwrap();
        assert_eq!(base.spent_for(&requirement("base", 1)), U256::from(40u64));
    }

    #[tokio::test]
    async fn test_independent_policies() {
        let (registry, _, _) = registry();
        // Over the base cap, well under the sepolia one
        assert!(registry.authorize(&requirement("base", 150)).await.is_err());
        assert!(registry.authorize(&requirement("base-sepolia", 150)).await.is_ok());
    }

    #[tokio::test]
    async fn test_no_treasurer_for_network() {
        let (registry, _, _) = registry();
        assert!(!registry.supports(&requirement("ethereum", 1)));
        assert!(!registry.serves_network("ethereum"));
        assert!(registry.serves_network("eip155:84532"));
        assert!(matches!(
            registry.authorize(&requirement("ethereum", 1)).await,
            Err(TreasurerError::NoTreasurerForNetwork(network)) if network == "ethereum"
        ));
    }

    #[test]
    fn test_supports_defers_to_treasurer() {
        let (registry, _, _) = registry();
        assert!(registry.supports(&requirement("base", 1)));
        // Registered for polygon, and the direct wallet can sign there
        assert!(registry.supports(&requirement("polygon", 1)));

        let mut upto = requirement("base", 1);
        upto.scheme = "upto".to_string();
        assert!(!registry.supports(&upto));
    }

    #[test]
    fn test_first_registration_wins() {
        let (registry, base, _) = registry();
        let late = Arc::new(PolicyTreasurer::new(
            Box::new(DirectKeyWallet::from_private_key(KEY_1).unwrap()),
            SpendPolicy::default(),
        ));
        registry.register(late, ["base"]);

        let chosen = registry.treasurer_for("base").unwrap();
        assert_eq!(
            Arc::as_ptr(&chosen) as *const (),
            Arc::as_ptr(&base) as *const ()
        );
        assert_eq!(
            registry.networks(),
            vec!["base".to_string(), "base-sepolia".to_string(), "polygon".to_string()]
        );
    }
}
