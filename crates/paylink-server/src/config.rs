use std::time::Duration;

use alloy::primitives::Address;
use paylink::{ChainConfig, ExactSchemeServer, SchemeServer};
use url::Url;

const DEFAULT_NETWORK: &str = paylink::BASE_SEPOLIA_NETWORK;
const DEFAULT_PORT: u16 = 4030;
const DEFAULT_DB_PATH: &str = "./paylink.db";
const DEFAULT_RATE_LIMIT_RPM: u32 = 120;
const DEFAULT_FACILITATOR_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PRICE_CONTENT: &str = "$0.10";
const DEFAULT_PRICE_DOWNLOAD: &str = "$0.50";
const DEFAULT_PRICE_PROFILE_PAYMENT: &str = "$1.00";

/// A price as shown to callers plus its value in token units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub display: String,
    pub units: String,
}

impl Price {
    pub fn parse(display: &str, chain: &ChainConfig) -> Result<Self, ConfigError> {
        let scheme = ExactSchemeServer::with_chain_config(chain.clone());
        let (units, _) = scheme
            .parse_price(display)
            .map_err(|e| ConfigError::InvalidPrice(format!("{display}: {e}")))?;
        if units == "0" {
            return Err(ConfigError::InvalidPrice(format!(
                "{display}: price must be greater than zero"
            )));
        }
        Ok(Self {
            display: display.trim().to_string(),
            units,
        })
    }
}

/// Static price per protected path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTable {
    pub content: Price,
    pub download: Price,
    pub profile_payment: Price,
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Address every settlement must pay
    pub receiving_address: Address,
    /// Network, asset and explorer for settlements
    pub chain: ChainConfig,
    /// Facilitator base URL
    pub facilitator_url: String,
    /// Optional HMAC secret for facilitator requests
    pub facilitator_secret: Option<Vec<u8>>,
    /// Verification timeout; expiry counts as "not settled"
    pub facilitator_timeout: Duration,
    pub prices: PriceTable,
    /// HMAC key for access-grant tokens
    pub grant_secret: Vec<u8>,
    /// Webhook signing key; set only when the grant secret was configured,
    /// never for the per-process fallback
    pub webhook_secret: Option<Vec<u8>>,
    pub db_path: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub rate_limit_rpm: u32,
    pub webhook_urls: Vec<String>,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("receiving_address", &self.receiving_address)
            .field("chain", &self.chain)
            .field("facilitator_url", &self.facilitator_url)
            .field(
                "facilitator_secret",
                &self.facilitator_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("facilitator_timeout", &self.facilitator_timeout)
            .field("prices", &self.prices)
            .field("grant_secret", &"[REDACTED]")
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("webhook_urls", &self.webhook_urls)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let receiving_address_str =
            get("RECEIVING_ADDRESS").ok_or(ConfigError::MissingRequired("RECEIVING_ADDRESS"))?;
        let receiving_address: Address = receiving_address_str
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(receiving_address_str.clone()))?;
        if receiving_address == Address::ZERO {
            return Err(ConfigError::InvalidAddress(receiving_address_str));
        }

        let network = get("NETWORK").unwrap_or_else(|| DEFAULT_NETWORK.to_string());
        let chain = ChainConfig::for_network(&network)
            .ok_or_else(|| ConfigError::UnsupportedNetwork(network.clone()))?;

        let facilitator_url = get("FACILITATOR_URL").unwrap_or_else(|| chain.facilitator_url.clone());
        Url::parse(&facilitator_url)
            .map_err(|_| ConfigError::InvalidUrl(facilitator_url.clone()))?;

        let facilitator_secret = get("FACILITATOR_SHARED_SECRET").map(String::into_bytes);

        let facilitator_timeout = Duration::from_secs(
            parse_or("FACILITATOR_TIMEOUT_SECS", get("FACILITATOR_TIMEOUT_SECS"), DEFAULT_FACILITATOR_TIMEOUT_SECS)?,
        );

        let prices = PriceTable {
            content: Price::parse(
                &get("PRICE_CONTENT").unwrap_or_else(|| DEFAULT_PRICE_CONTENT.to_string()),
                &chain,
            )?,
            download: Price::parse(
                &get("PRICE_DOWNLOAD").unwrap_or_else(|| DEFAULT_PRICE_DOWNLOAD.to_string()),
                &chain,
            )?,
            profile_payment: Price::parse(
                &get("PRICE_PROFILE_PAYMENT")
                    .unwrap_or_else(|| DEFAULT_PRICE_PROFILE_PAYMENT.to_string()),
                &chain,
            )?,
        };

        let (grant_secret, webhook_secret) = match get("GRANT_SIGNING_SECRET") {
            Some(secret) => {
                if secret.len() < 32 {
                    tracing::warn!(
                        "GRANT_SIGNING_SECRET is short ({} bytes, minimum 32); \
                         use `openssl rand -hex 32` to generate one",
                        secret.len()
                    );
                }
                let secret = secret.into_bytes();
                (secret.clone(), Some(secret))
            }
            None => {
                tracing::warn!(
                    "GRANT_SIGNING_SECRET not set; using a random per-process key, \
                     issued grants will not survive a restart"
                );
                let mut key = vec![0u8; 32];
                rand::fill(&mut key[..]);
                (key, None)
            }
        };

        let db_path = get("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;
        let rate_limit_rpm = parse_or("RATE_LIMIT_RPM", get("RATE_LIMIT_RPM"), DEFAULT_RATE_LIMIT_RPM)?;

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|s| split_list(&s))
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let webhook_urls = get("WEBHOOK_URLS").map(|s| split_list(&s)).unwrap_or_default();
        for url in &webhook_urls {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        let metrics_token = get("METRICS_TOKEN");
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            receiving_address,
            chain,
            facilitator_url,
            facilitator_secret,
            facilitator_timeout,
            prices,
            grant_secret,
            webhook_secret,
            db_path,
            port,
            allowed_origins,
            rate_limit_rpm,
            webhook_urls,
            metrics_token,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidNumber(key, v)),
        None => Ok(default),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid value for {0}: {1}")]
    InvalidNumber(&'static str, String),
}
