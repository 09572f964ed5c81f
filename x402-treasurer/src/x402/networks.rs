//! Network identifier to EVM chain id mapping

/// Base mainnet chain ID
pub const BASE_CHAIN_ID: u64 = 8453;

/// Base Sepolia chain ID
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

const KNOWN_NETWORKS: &[(&str, u64)] = &[
    ("base", BASE_CHAIN_ID),
    ("base-sepolia", BASE_SEPOLIA_CHAIN_ID),
    ("polygon", 137),
    ("polygon-amoy", 80002),
    ("ethereum", 1),
    ("sepolia", 11_155_111),
];

/// Resolve a network identifier (`base`, `eip155:8453`, ...) to its chain id
pub fn chain_id(network: &str) -> Option<u64> {
    let network = network.trim().to_lowercase();
    if let Some(id) = network.strip_prefix("eip155:") {
        return id.parse().ok();
    }
    KNOWN_NETWORKS
        .iter()
        .find(|(name, _)| *name == network)
        .map(|(_, id)| *id)
}

/// Canonical short name for a chain id, if it has one
pub fn network_name(chain_id: u64) -> Option<&'static str> {
    KNOWN_NETWORKS
        .iter()
        .find(|(_, id)| *id == chain_id)
        .map(|(name, _)| *name)
}

/// True when both identifiers name the same chain
pub fn same_network(a: &str, b: &str) -> bool {
    match (chain_id(a), chain_id(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.eq_ignore_ascii_case(b),
    }
}
