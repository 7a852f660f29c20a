//! Keyed signatures and secret comparison.
//!
//! HMAC-SHA256 is used for three things: authenticating requests to a
//! facilitator, signing access-grant tokens, and signing webhook bodies.
//! Each use passes its own `domain` label so a signature minted for one
//! purpose never verifies for another.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Domain label for facilitator request bodies.
pub const FACILITATOR_DOMAIN: &str = "paylink/facilitator";
/// Domain label for access-grant tokens.
pub const GRANT_DOMAIN: &str = "paylink/grant";
/// Domain label for webhook bodies.
pub const WEBHOOK_DOMAIN: &str = "paylink/webhook";

fn keyed(secret: &[u8], domain: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(domain.as_bytes());
    mac.update(&[0]);
    mac
}

/// HMAC-SHA256 over `body` under `domain`, hex-encoded.
pub fn sign(secret: &[u8], domain: &str, body: &[u8]) -> String {
    let mut mac = keyed(secret, domain);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature produced by [`sign`]. Constant time; malformed hex
/// is compared against zeros rather than returning early.
pub fn verify(secret: &[u8], domain: &str, body: &[u8], signature: &str) -> bool {
    let mut mac = keyed(secret, domain);
    mac.update(body);
    let expected = hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time comparison of two secrets of possibly different lengths.
/// Both sides are hashed first so timing reveals neither content nor length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}
