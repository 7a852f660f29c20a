//! x402 pay-per-request protocol pieces used by paylink.
//!
//! A resource server answers an unpaid request with HTTP 402 and a list of
//! [`PaymentRequirements`]. The client retries with a signed
//! [`PaymentPayload`] in the `X-PAYMENT` header, and the server asks a
//! [`Facilitator`] to verify and settle it before serving anything.
//!
//! # Modules
//!
//! - [`payment`] / [`response`] - wire types
//! - [`price`] - integer price parsing and formatting
//! - [`auth`] - domain-separated HMAC signing, constant-time compare
//! - [`facilitator_client`] - HTTP [`Facilitator`] implementation

pub mod auth;
pub mod constants;
pub mod error;
pub mod facilitator_client;
pub mod payment;
pub mod price;
pub mod response;
pub mod scheme;

pub use constants::*;
pub use error::PaylinkError;
pub use facilitator_client::HttpFacilitator;
pub use payment::*;
pub use price::{parse_amount_units, units_to_usd_cents, ExactSchemeServer};
pub use response::*;
pub use scheme::{Facilitator, SchemeServer};
