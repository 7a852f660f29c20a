use alloy::primitives::{address, Address};

/// x402 protocol version spoken by this crate.
pub const X402_VERSION: u32 = 1;

/// The only payment scheme accepted: an exact-amount USDC authorization.
pub const SCHEME_NAME: &str = "exact";

/// Base mainnet network identifier.
pub const BASE_NETWORK: &str = "base";

/// Base Sepolia testnet network identifier.
pub const BASE_SEPOLIA_NETWORK: &str = "base-sepolia";

/// USDC on Base mainnet.
pub const BASE_USDC: Address = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC on Base Sepolia.
pub const BASE_SEPOLIA_USDC: Address = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");

/// USDC has 6 decimal places on both networks.
pub const TOKEN_DECIMALS: u32 = 6;

/// Public testnet facilitator.
pub const TESTNET_FACILITATOR_URL: &str = "https://x402.org/facilitator";

/// Hosted mainnet facilitator.
pub const MAINNET_FACILITATOR_URL: &str = "https://api.cdp.coinbase.com/platform/v2/x402";

/// Runtime network configuration. Resolved once from the configured network
/// name and passed to whatever needs to build or check payment requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub network: String,
    pub scheme_name: String,
    pub asset: Address,
    pub token_decimals: u32,
    pub facilitator_url: String,
    pub explorer_base: String,
}

impl ChainConfig {
    /// Look up a known network by name.
    pub fn for_network(network: &str) -> Option<Self> {
        match network {
            BASE_NETWORK => Some(Self {
                network: BASE_NETWORK.to_string(),
                scheme_name: SCHEME_NAME.to_string(),
                asset: BASE_USDC,
                token_decimals: TOKEN_DECIMALS,
                facilitator_url: MAINNET_FACILITATOR_URL.to_string(),
                explorer_base: "https://basescan.org".to_string(),
            }),
            BASE_SEPOLIA_NETWORK => Some(Self {
                network: BASE_SEPOLIA_NETWORK.to_string(),
                scheme_name: SCHEME_NAME.to_string(),
                asset: BASE_SEPOLIA_USDC,
                token_decimals: TOKEN_DECIMALS,
                facilitator_url: TESTNET_FACILITATOR_URL.to_string(),
                explorer_base: "https://sepolia.basescan.org".to_string(),
            }),
            _ => None,
        }
    }

    /// Explorer link for a settlement transaction.
    pub fn transaction_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_base, tx_hash)
    }
}

impl Default for ChainConfig {
    /// Defaults to Base Sepolia.
    fn default() -> Self {
        Self {
            network: BASE_SEPOLIA_NETWORK.to_string(),
            scheme_name: SCHEME_NAME.to_string(),
            asset: BASE_SEPOLIA_USDC,
            token_decimals: TOKEN_DECIMALS,
            facilitator_url: TESTNET_FACILITATOR_URL.to_string(),
            explorer_base: "https://sepolia.basescan.org".to_string(),
        }
    }
}
