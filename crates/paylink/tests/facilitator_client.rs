//! Exercises `HttpFacilitator` against a minimal in-process HTTP server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, FixedBytes};
use paylink::auth::{verify, FACILITATOR_DOMAIN};
use paylink::{
    ExactPayload, Facilitator, HttpFacilitator, PaylinkError, PaymentPayload, PaymentRequirements,
    TransferAuthorization,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Clone)]
struct Reply {
    status: u16,
    body: &'static str,
    delay: Duration,
}

#[derive(Default)]
struct Seen {
    paths: Vec<String>,
    auth: Vec<Option<String>>,
    bodies: Vec<Vec<u8>>,
}

/// Serve `verify` and `settle` replies; record what the client sent.
async fn spawn_server(verify: Reply, settle: Reply) -> (String, Arc<Mutex<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Seen::default()));
    let seen_srv = seen.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let seen = seen_srv.clone();
            let verify = verify.clone();
            let settle = settle.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = sock.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let auth = head.lines().find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("x-facilitator-auth")
                        .then(|| v.trim().to_string())
                });
                {
                    let mut s = seen.lock().unwrap();
                    s.paths.push(path.clone());
                    s.auth.push(auth);
                    s.bodies.push(buf[header_end..].to_vec());
                }

                let reply = if path.ends_with("/verify") { verify } else { settle };
                tokio::time::sleep(reply.delay).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.status,
                    reply.body.len(),
                    reply.body
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/facilitator"), seen)
}

fn ok(body: &'static str) -> Reply {
    Reply {
        status: 200,
        body,
        delay: Duration::ZERO,
    }
}

fn payload() -> PaymentPayload {
    PaymentPayload {
        x402_version: 1,
        scheme: "exact".to_string(),
        network: "base-sepolia".to_string(),
        payload: ExactPayload {
            signature: "0xsig".to_string(),
            authorization: TransferAuthorization {
                from: Address::repeat_byte(0x11),
                to: Address::repeat_byte(0x22),
                value: "500000".to_string(),
                valid_after: 0,
                valid_before: u64::MAX,
                nonce: FixedBytes::ZERO,
            },
        },
    }
}

fn requirements() -> PaymentRequirements {
    PaymentRequirements {
        scheme: "exact".to_string(),
        network: "base-sepolia".to_string(),
        price: "$0.50".to_string(),
        max_amount_required: "500000".to_string(),
        asset: paylink::BASE_SEPOLIA_USDC,
        pay_to: Address::repeat_byte(0x22),
        resource: "/paywall/download".to_string(),
        description: None,
        mime_type: None,
        max_timeout_seconds: 60,
    }
}

fn client(url: &str, secret: Option<&[u8]>, timeout: Duration) -> HttpFacilitator {
    HttpFacilitator::new(
        reqwest::Client::new(),
        url,
        secret.map(|s| s.to_vec()),
        timeout,
    )
}

#[tokio::test]
async fn settles_after_successful_verify() {
    let (url, seen) = spawn_server(
        ok(r#"{"isValid":true,"payer":"0x1111111111111111111111111111111111111111"}"#),
        ok(r#"{"success":true,"transaction":"0xabc","network":"base-sepolia"}"#),
    )
    .await;

    let settle = client(&url, Some(b"shared"), Duration::from_secs(5))
        .verify_and_settle(&payload(), &requirements())
        .await
        .unwrap();

    assert!(settle.success);
    assert_eq!(settle.transaction.as_deref(), Some("0xabc"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.paths, vec!["/facilitator/verify", "/facilitator/settle"]);
    for (auth, body) in seen.auth.iter().zip(&seen.bodies) {
        let sig = auth.as_deref().expect("hmac header sent");
        assert!(verify(b"shared", FACILITATOR_DOMAIN, body, sig));
    }
}

#[tokio::test]
async fn invalid_payment_is_not_settled_and_skips_settle() {
    let (url, seen) = spawn_server(
        ok(r#"{"isValid":false,"invalidReason":"insufficient_funds"}"#),
        ok(r#"{"success":true,"transaction":"0xabc","network":"base-sepolia"}"#),
    )
    .await;

    let settle = client(&url, None, Duration::from_secs(5))
        .verify_and_settle(&payload(), &requirements())
        .await
        .unwrap();

    assert!(!settle.success);
    assert_eq!(settle.error_reason.as_deref(), Some("insufficient_funds"));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.paths, vec!["/facilitator/verify"]);
    assert_eq!(seen.auth, vec![None]);
}

#[tokio::test]
async fn success_without_transaction_is_an_error() {
    let (url, _) = spawn_server(
        ok(r#"{"isValid":true}"#),
        ok(r#"{"success":true,"network":"base-sepolia"}"#),
    )
    .await;

    let result = client(&url, None, Duration::from_secs(5))
        .verify_and_settle(&payload(), &requirements())
        .await;
    assert!(matches!(result, Err(PaylinkError::Facilitator(_))));
}

#[tokio::test]
async fn server_error_is_an_error() {
    let (url, _) = spawn_server(
        Reply {
            status: 500,
            body: r#"{"error":"boom"}"#,
            delay: Duration::ZERO,
        },
        ok("{}"),
    )
    .await;

    let result = client(&url, None, Duration::from_secs(5))
        .verify_and_settle(&payload(), &requirements())
        .await;
    assert!(matches!(result, Err(PaylinkError::Facilitator(_))));
}

#[tokio::test]
async fn slow_facilitator_times_out() {
    let (url, _) = spawn_server(
        Reply {
            status: 200,
            body: r#"{"isValid":true}"#,
            delay: Duration::from_secs(3),
        },
        ok("{}"),
    )
    .await;

    let result = client(&url, None, Duration::from_millis(200))
        .verify_and_settle(&payload(), &requirements())
        .await;
    assert!(matches!(result, Err(PaylinkError::Timeout)));
}
