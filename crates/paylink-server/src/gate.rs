//! Payment gate for protected routes.
//!
//! A request without proof gets a 402 challenge naming the route's price and
//! network. A request with proof is checked locally (version, scheme,
//! network, recipient, amount, validity window) and then handed to the
//! facilitator under a hard timeout. Anything short of a confirmed
//! settlement with a transaction hash answers with the same challenge.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{HttpRequest, HttpResponse};
use alloy::primitives::Address;
use paylink::{
    ChainConfig, Facilitator, PaymentPayload, PaymentRequiredBody, PaymentRequirements,
    SettleResponse, X402_VERSION,
};

use crate::config::{Price, PriceTable};

pub const PAYMENT_HEADER: &str = "X-PAYMENT";
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";
pub const PAYMENT_RESPONSE_HEADER: &str = "X-PAYMENT-RESPONSE";

/// How long a signed authorization may take to settle.
const MAX_TIMEOUT_SECONDS: u64 = 60;

/// Paths that cost money, each with its own price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedRoute {
    Content,
    Download,
    ProfilePayment,
}

impl ProtectedRoute {
    pub fn path(&self) -> &'static str {
        match self {
            ProtectedRoute::Content => "/paywall/content",
            ProtectedRoute::Download => "/paywall/download",
            ProtectedRoute::ProfilePayment => "/payment/send",
        }
    }

    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            ProtectedRoute::Content => "content",
            ProtectedRoute::Download => "download",
            ProtectedRoute::ProfilePayment => "profile_payment",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ProtectedRoute::Content => "Access paywall protected content",
            ProtectedRoute::Download => "Download paywall protected file",
            ProtectedRoute::ProfilePayment => "Send payment to a payment profile",
        }
    }
}

/// A payment the facilitator confirmed as settled.
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub route: ProtectedRoute,
    /// Lowercase hex
    pub payer: String,
    /// Lowercase hex
    pub payee: String,
    /// Display price that was charged, e.g. `$0.50`
    pub amount: String,
    /// Token units that were required
    pub units: String,
    pub network: String,
    /// Settlement transaction hash
    pub transaction: String,
    pub settle: SettleResponse,
}

impl VerifiedPayment {
    /// Value for `X-PAYMENT-RESPONSE`.
    pub fn response_header(&self) -> (&'static str, String) {
        (PAYMENT_RESPONSE_HEADER, self.settle.to_header())
    }
}

/// Why a proof was turned away. Used for the challenge's `error` field and
/// as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Missing,
    Malformed,
    UnsupportedVersion,
    WrongScheme,
    WrongNetwork,
    WrongRecipient,
    InsufficientAmount,
    NotYetValid,
    AuthorizationExpired,
    FacilitatorError,
    FacilitatorTimeout,
    NotSettled,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Missing => "payment_required",
            Rejection::Malformed => "malformed_payment",
            Rejection::UnsupportedVersion => "unsupported_version",
            Rejection::WrongScheme => "wrong_scheme",
            Rejection::WrongNetwork => "wrong_network",
            Rejection::WrongRecipient => "wrong_recipient",
            Rejection::InsufficientAmount => "insufficient_amount",
            Rejection::NotYetValid => "authorization_not_yet_valid",
            Rejection::AuthorizationExpired => "authorization_expired",
            Rejection::FacilitatorError => "verification_failed",
            Rejection::FacilitatorTimeout => "verification_timeout",
            Rejection::NotSettled => "not_settled",
        }
    }
}

pub struct PaymentGate {
    receiving_address: Address,
    chain: ChainConfig,
    prices: PriceTable,
    facilitator: Arc<dyn Facilitator>,
    timeout: Duration,
}

impl PaymentGate {
    pub fn new(
        receiving_address: Address,
        chain: ChainConfig,
        prices: PriceTable,
        facilitator: Arc<dyn Facilitator>,
        timeout: Duration,
    ) -> Self {
        Self {
            receiving_address,
            chain,
            prices,
            facilitator,
            timeout,
        }
    }

    pub fn price(&self, route: ProtectedRoute) -> &Price {
        match route {
            ProtectedRoute::Content => &self.prices.content,
            ProtectedRoute::Download => &self.prices.download,
            ProtectedRoute::ProfilePayment => &self.prices.profile_payment,
        }
    }

    pub fn requirements(&self, route: ProtectedRoute) -> PaymentRequirements {
        let price = self.price(route);
        PaymentRequirements {
            scheme: self.chain.scheme_name.clone(),
            network: self.chain.network.clone(),
            price: price.display.clone(),
            max_amount_required: price.units.clone(),
            asset: self.chain.asset,
            pay_to: self.receiving_address,
            resource: route.path().to_string(),
            description: Some(route.description().to_string()),
            mime_type: Some("application/json".to_string()),
            max_timeout_seconds: MAX_TIMEOUT_SECONDS,
        }
    }

    /// The 402 response for `route`.
    pub fn challenge(&self, route: ProtectedRoute, rejection: Rejection) -> HttpResponse {
        crate::metrics::CHALLENGES_ISSUED
            .with_label_values(&[route.label()])
            .inc();
        if rejection != Rejection::Missing {
            crate::metrics::PAYMENTS_REJECTED
                .with_label_values(&[rejection.as_str()])
                .inc();
        }
        HttpResponse::PaymentRequired().json(PaymentRequiredBody {
            x402_version: X402_VERSION,
            error: rejection.as_str().to_string(),
            accepts: vec![self.requirements(route)],
        })
    }

    /// Run the challenge/verify exchange for one request. `Ok` only when the
    /// facilitator confirmed settlement; every other outcome is the challenge.
    pub async fn admit(
        &self,
        req: &HttpRequest,
        route: ProtectedRoute,
    ) -> Result<VerifiedPayment, HttpResponse> {
        let requirements = self.requirements(route);

        let payload = match extract_payment(req) {
            None => return Err(self.challenge(route, Rejection::Missing)),
            Some(Err(())) => return Err(self.challenge(route, Rejection::Malformed)),
            Some(Ok(payload)) => payload,
        };

        let now = chrono::Utc::now().timestamp().max(0) as u64;
        if let Err(rejection) = self.precheck(&payload, &requirements, now) {
            tracing::info!(
                route = route.label(),
                payer = %format!("{:#x}", payload.payer()),
                reason = rejection.as_str(),
                "payment proof rejected before settlement"
            );
            return Err(self.challenge(route, rejection));
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            self.facilitator.verify_and_settle(&payload, &requirements),
        )
        .await;
        crate::metrics::FACILITATOR_LATENCY.observe(started.elapsed().as_secs_f64());

        let settle = match outcome {
            Err(_) => {
                tracing::warn!(route = route.label(), "facilitator timed out; treating as not settled");
                return Err(self.challenge(route, Rejection::FacilitatorTimeout));
            }
            Ok(Err(paylink::PaylinkError::Timeout)) => {
                tracing::warn!(route = route.label(), "facilitator timed out; treating as not settled");
                return Err(self.challenge(route, Rejection::FacilitatorTimeout));
            }
            Ok(Err(e)) => {
                tracing::warn!(route = route.label(), error = %e, "payment verification failed");
                return Err(self.challenge(route, Rejection::FacilitatorError));
            }
            Ok(Ok(settle)) => settle,
        };

        let transaction = match self.confirmed_transaction(&settle, payload.payer()) {
            Some(tx) => tx,
            None => {
                tracing::warn!(
                    route = route.label(),
                    reason = settle.error_reason.as_deref().unwrap_or("unknown"),
                    "payment not settled"
                );
                return Err(self.challenge(route, Rejection::NotSettled));
            }
        };

        let price = self.price(route);
        let units: u64 = price.units.parse().unwrap_or(0);
        crate::metrics::PAYMENTS_SETTLED
            .with_label_values(&[route.label()])
            .inc();
        crate::metrics::REVENUE_UNITS
            .with_label_values(&[route.label()])
            .inc_by(units);

        let payer = format!("{:#x}", payload.payer());
        tracing::info!(
            route = route.label(),
            payer = %payer,
            amount = %price.display,
            transaction = %transaction,
            "payment settled"
        );

        Ok(VerifiedPayment {
            route,
            payer,
            payee: format!("{:#x}", self.receiving_address),
            amount: price.display.clone(),
            units: price.units.clone(),
            network: self.chain.network.clone(),
            transaction,
            settle,
        })
    }

    /// Local checks that need no network round trip.
    fn precheck(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        now_secs: u64,
    ) -> Result<(), Rejection> {
        if payload.x402_version != X402_VERSION {
            return Err(Rejection::UnsupportedVersion);
        }
        if payload.scheme != requirements.scheme {
            return Err(Rejection::WrongScheme);
        }
        if payload.network != requirements.network {
            return Err(Rejection::WrongNetwork);
        }

        let auth = &payload.payload.authorization;
        if auth.to != self.receiving_address {
            return Err(Rejection::WrongRecipient);
        }

        let offered: u128 = auth.value.parse().map_err(|_| Rejection::Malformed)?;
        let required: u128 = requirements
            .max_amount_required
            .parse()
            .map_err(|_| Rejection::Malformed)?;
        if offered < required {
            return Err(Rejection::InsufficientAmount);
        }

        if auth.valid_after > now_secs {
            return Err(Rejection::NotYetValid);
        }
        if auth.valid_before <= now_secs {
            return Err(Rejection::AuthorizationExpired);
        }
        Ok(())
    }

    /// The transaction hash of a settlement that counts, or `None`.
    fn confirmed_transaction(&self, settle: &SettleResponse, payer: Address) -> Option<String> {
        if !settle.success || settle.network != self.chain.network {
            return None;
        }
        if settle.payer.is_some_and(|p| p != payer) {
            return None;
        }
        settle
            .transaction
            .as_ref()
            .filter(|tx| !tx.trim().is_empty())
            .cloned()
    }
}

/// `None` when no proof header is present; `Some(Err)` when one is present
/// but cannot be decoded.
fn extract_payment(req: &HttpRequest) -> Option<Result<PaymentPayload, ()>> {
    let header = req
        .headers()
        .get(PAYMENT_HEADER)
        .or_else(|| req.headers().get(PAYMENT_SIGNATURE_HEADER))?;
    Some(
        header
            .to_str()
            .map_err(|_| ())
            .and_then(|value| PaymentPayload::from_header(value).map_err(|_| ())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, http::StatusCode, test::TestRequest};
    use alloy::primitives::FixedBytes;
    use async_trait::async_trait;
    use paylink::{ExactPayload, PaylinkError, TransferAuthorization};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RECEIVER: Address = Address::repeat_byte(0x11);
    const PAYER: Address = Address::repeat_byte(0x22);

    #[derive(Clone, Copy)]
    enum Outcome {
        Settle,
        Reject,
        Error,
        NoHash,
        Hang,
    }

    struct FakeFacilitator {
        outcome: Outcome,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Facilitator for FakeFacilitator {
        async fn verify_and_settle(
            &self,
            payload: &PaymentPayload,
            requirements: &PaymentRequirements,
        ) -> Result<SettleResponse, PaylinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::Settle => Ok(SettleResponse {
                    success: true,
                    error_reason: None,
                    payer: Some(payload.payer()),
                    transaction: Some("0xfeed".to_string()),
                    network: requirements.network.clone(),
                }),
                Outcome::Reject => Ok(SettleResponse::rejected(
                    &requirements.network,
                    "invalid_signature",
                )),
                Outcome::Error => Err(PaylinkError::Facilitator("boom".to_string())),
                Outcome::NoHash => Ok(SettleResponse {
                    success: true,
                    error_reason: None,
                    payer: None,
                    transaction: None,
                    network: requirements.network.clone(),
                }),
                Outcome::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Err(PaylinkError::Timeout)
                }
            }
        }
    }

    fn gate(outcome: Outcome) -> (PaymentGate, Arc<FakeFacilitator>) {
        let chain = ChainConfig::default();
        let prices = PriceTable {
            content: Price::parse("$0.10", &chain).unwrap(),
            download: Price::parse("$0.50", &chain).unwrap(),
            profile_payment: Price::parse("$1.00", &chain).unwrap(),
        };
        let fake = Arc::new(FakeFacilitator {
            outcome,
            calls: AtomicUsize::new(0),
        });
        let gate = PaymentGate::new(
            RECEIVER,
            chain,
            prices,
            fake.clone(),
            Duration::from_millis(100),
        );
        (gate, fake)
    }

    fn proof(value: &str) -> PaymentPayload {
        let now = chrono::Utc::now().timestamp() as u64;
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".to_string(),
            network: "base-sepolia".to_string(),
            payload: ExactPayload {
                signature: "0xsig".to_string(),
                authorization: TransferAuthorization {
                    from: PAYER,
                    to: RECEIVER,
                    value: value.to_string(),
                    valid_after: now - 60,
                    valid_before: now + 600,
                    nonce: FixedBytes::repeat_byte(7),
                },
            },
        }
    }

    fn request(payload: Option<&PaymentPayload>) -> HttpRequest {
        let mut req = TestRequest::get().uri("/paywall/download?fileId=x");
        if let Some(p) = payload {
            req = req.insert_header((PAYMENT_HEADER, p.to_header().unwrap()));
        }
        req.to_http_request()
    }

    async fn challenge_error(resp: HttpResponse) -> (StatusCode, serde_json::Value) {
        let status = resp.status();
        let body = to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[actix_rt::test]
    async fn missing_proof_gets_priced_challenge() {
        let (gate, fake) = gate(Outcome::Settle);
        let resp = gate
            .admit(&request(None), ProtectedRoute::Download)
            .await
            .unwrap_err();
        let (status, body) = challenge_error(resp).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["x402Version"], 1);
        assert_eq!(body["error"], "payment_required");
        assert_eq!(body["accepts"][0]["price"], "$0.50");
        assert_eq!(body["accepts"][0]["maxAmountRequired"], "500000");
        assert_eq!(body["accepts"][0]["network"], "base-sepolia");
        assert_eq!(body["accepts"][0]["resource"], "/paywall/download");
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_rt::test]
    async fn settled_proof_is_admitted() {
        let (gate, _) = gate(Outcome::Settle);
        let p = proof("500000");
        let verified = gate
            .admit(&request(Some(&p)), ProtectedRoute::Download)
            .await
            .unwrap();
        assert_eq!(verified.transaction, "0xfeed");
        assert_eq!(verified.amount, "$0.50");
        assert_eq!(verified.payer, format!("{PAYER:#x}"));
        assert_eq!(verified.response_header().0, PAYMENT_RESPONSE_HEADER);
    }

    #[actix_rt::test]
    async fn payment_signature_header_is_accepted() {
        let (gate, _) = gate(Outcome::Settle);
        let p = proof("100000");
        let req = TestRequest::get()
            .insert_header((PAYMENT_SIGNATURE_HEADER, p.to_header().unwrap()))
            .to_http_request();
        assert!(gate.admit(&req, ProtectedRoute::Content).await.is_ok());
    }

    #[actix_rt::test]
    async fn local_checks_fail_closed_without_calling_facilitator() {
        let (gate, fake) = gate(Outcome::Settle);

        let mut cases: Vec<(PaymentPayload, &str)> = Vec::new();
        cases.push((proof("499999"), "insufficient_amount"));
        let mut p = proof("500000");
        p.network = "base".to_string();
        cases.push((p, "wrong_network"));
        let mut p = proof("500000");
        p.payload.authorization.to = Address::repeat_byte(0x99);
        cases.push((p, "wrong_recipient"));
        let mut p = proof("500000");
        p.payload.authorization.valid_before = 1;
        cases.push((p, "authorization_expired"));
        let mut p = proof("500000");
        p.payload.authorization.valid_after = u64::MAX;
        cases.push((p, "authorization_not_yet_valid"));
        let mut p = proof("500000");
        p.x402_version = 2;
        cases.push((p, "unsupported_version"));
        let mut p = proof("500000");
        p.scheme = "upto".to_string();
        cases.push((p, "wrong_scheme"));

        for (payload, expected) in cases {
            let resp = gate
                .admit(&request(Some(&payload)), ProtectedRoute::Download)
                .await
                .unwrap_err();
            let (status, body) = challenge_error(resp).await;
            assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
            assert_eq!(body["error"], expected);
        }
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_rt::test]
    async fn garbage_header_is_malformed() {
        let (gate, _) = gate(Outcome::Settle);
        let req = TestRequest::get()
            .insert_header((PAYMENT_HEADER, "%%%not-base64"))
            .to_http_request();
        let resp = gate.admit(&req, ProtectedRoute::Content).await.unwrap_err();
        let (_, body) = challenge_error(resp).await;
        assert_eq!(body["error"], "malformed_payment");
    }

    #[actix_rt::test]
    async fn uncertain_verification_is_not_settled() {
        for (outcome, expected) in [
            (Outcome::Reject, "not_settled"),
            (Outcome::Error, "verification_failed"),
            (Outcome::NoHash, "not_settled"),
            (Outcome::Hang, "verification_timeout"),
        ] {
            let (gate, fake) = gate(outcome);
            let p = proof("500000");
            let resp = gate
                .admit(&request(Some(&p)), ProtectedRoute::Download)
                .await
                .unwrap_err();
            let (status, body) = challenge_error(resp).await;
            assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
            assert_eq!(body["error"], expected);
            assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        }
    }
}
