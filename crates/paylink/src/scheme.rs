//! Trait seams between the resource server and the rest of the protocol.
//!
//! - [`SchemeServer`] - server-side: turns human prices into token units
//! - [`Facilitator`] - the external verifier that confirms a payment settled
//!
//! See [`crate::price::ExactSchemeServer`] and
//! [`crate::facilitator_client::HttpFacilitator`] for the implementations.

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::error::PaylinkError;
use crate::payment::{PaymentPayload, PaymentRequirements};
use crate::response::SettleResponse;

/// Server-side scheme: parses prices into on-chain amounts.
pub trait SchemeServer: Send + Sync {
    /// Parse a human-readable price string (e.g. `"$0.50"`) into a token
    /// amount (decimal integer string) and the asset it is denominated in.
    fn parse_price(&self, price: &str) -> Result<(String, Address), PaylinkError>;
}

/// Settlement oracle.
///
/// Implementations verify that `payload` satisfies `requirements` and settle
/// it. An `Err` and an `Ok` with `success == false` both mean "not settled";
/// callers must never treat either as paid.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn verify_and_settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, PaylinkError>;
}
