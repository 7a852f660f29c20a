use std::sync::Arc;

use paylink::{Facilitator, HttpFacilitator};

use crate::config::ServerConfig;
use crate::db::Database;
use crate::error::ServerError;
use crate::gate::PaymentGate;
use crate::grant::AccessGrantIssuer;
use crate::ledger::SettlementLedger;
use crate::policy::ResourcePolicyEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Database,
    pub gate: Arc<PaymentGate>,
    pub policy: ResourcePolicyEngine,
    pub grants: Arc<AccessGrantIssuer>,
    pub ledger: SettlementLedger,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// State backed by the HTTP facilitator named in the config.
    pub fn new(config: ServerConfig, db: Database) -> Result<Self, ServerError> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ServerError::Internal(format!("failed to create HTTP client: {e}")))?;
        let facilitator = HttpFacilitator::new(
            http_client.clone(),
            config.facilitator_url.clone(),
            config.facilitator_secret.clone(),
            config.facilitator_timeout,
        );
        Ok(Self::with_facilitator(
            config,
            db,
            Arc::new(facilitator),
            http_client,
        ))
    }

    /// State with an explicit settlement verifier.
    pub fn with_facilitator(
        config: ServerConfig,
        db: Database,
        facilitator: Arc<dyn Facilitator>,
        http_client: reqwest::Client,
    ) -> Self {
        let gate = PaymentGate::new(
            config.receiving_address,
            config.chain.clone(),
            config.prices.clone(),
            facilitator,
            config.facilitator_timeout,
        );
        let ledger = SettlementLedger::new(db.clone(), config.chain.token_decimals);
        let grants = AccessGrantIssuer::new(config.grant_secret.clone());

        Self {
            policy: ResourcePolicyEngine::new(db.clone()),
            gate: Arc::new(gate),
            grants: Arc::new(grants),
            ledger,
            db,
            config: Arc::new(config),
            http_client,
        }
    }

    pub fn token_decimals(&self) -> u32 {
        self.config.chain.token_decimals
    }
}
