use std::net::{Ipv4Addr, Ipv6Addr};

use alloy::primitives::Address;
use url::Url;

use crate::error::ServerError;

pub const SLUG_MIN_LEN: usize = 3;
pub const SLUG_MAX_LEN: usize = 64;
pub const HANDLE_MIN_LEN: usize = 3;
pub const HANDLE_MAX_LEN: usize = 32;

/// Check if an IPv4 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_broadcast()
        || ip.is_unspecified()
        || ip.octets()[0] == 100 && (ip.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGNAT)
}

/// Check if an IPv6 address is private, loopback, or otherwise non-routable.
pub fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || (segments[0] & 0xFE00) == 0xFC00 // fc00::/7
        || (segments[0] & 0xFFC0) == 0xFE80 // fe80::/10
        || ip.to_ipv4_mapped().is_some_and(|v4| is_private_ipv4(&v4))
}

/// Payment-profile slug: 3-64 of `[A-Za-z0-9-]`, no leading or trailing
/// hyphen. Returned lowercased so lookalike slugs collide.
pub fn validate_slug(slug: &str) -> Result<String, ServerError> {
    let slug = slug.trim();
    if slug.len() < SLUG_MIN_LEN || slug.len() > SLUG_MAX_LEN {
        return Err(ServerError::validation(format!(
            "Slug must be {SLUG_MIN_LEN}-{SLUG_MAX_LEN} characters"
        )));
    }
    if !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ServerError::validation(
            "Slug may only contain letters, digits and hyphens",
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(ServerError::validation(
            "Slug cannot start or end with a hyphen",
        ));
    }
    Ok(slug.to_ascii_lowercase())
}

/// Account handle: 3-32 of `[A-Za-z0-9_]`, lowercased.
pub fn validate_handle(handle: &str) -> Result<String, ServerError> {
    let handle = handle.trim();
    if handle.len() < HANDLE_MIN_LEN || handle.len() > HANDLE_MAX_LEN {
        return Err(ServerError::validation(format!(
            "Handle must be {HANDLE_MIN_LEN}-{HANDLE_MAX_LEN} characters"
        )));
    }
    if !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ServerError::validation(
            "Handle may only contain letters, digits and underscores",
        ));
    }
    Ok(handle.to_ascii_lowercase())
}

/// Parse a wallet address and return it as lowercase `0x` hex.
pub fn parse_wallet(wallet: &str) -> Result<String, ServerError> {
    let address: Address = wallet
        .trim()
        .parse()
        .map_err(|_| ServerError::validation("Invalid wallet address"))?;
    if address == Address::ZERO {
        return Err(ServerError::validation("Invalid wallet address"));
    }
    Ok(format!("{address:#x}"))
}

/// Validate a URL handed out to paying callers: http(s) (https when
/// `require_https`), with a host that is not private, loopback or local.
pub fn validate_public_url(url: &str, require_https: bool) -> Result<(), ServerError> {
    let parsed = Url::parse(url).map_err(|_| ServerError::validation("Invalid URL format"))?;

    match parsed.scheme() {
        "https" => {}
        "http" if !require_https => {}
        _ if require_https => return Err(ServerError::validation("URL must use HTTPS")),
        _ => return Err(ServerError::validation("URL must use HTTP or HTTPS")),
    }

    match parsed.host() {
        Some(url::Host::Ipv4(ip)) if is_private_ipv4(&ip) => Err(ServerError::validation(
            "URL cannot point to a private or loopback address",
        )),
        Some(url::Host::Ipv6(ip)) if is_private_ipv6(&ip) => Err(ServerError::validation(
            "URL cannot point to a private or loopback address",
        )),
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            if domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
            {
                Err(ServerError::validation(
                    "URL cannot point to localhost or a local domain",
                ))
            } else {
                Ok(())
            }
        }
        Some(_) => Ok(()),
        None => Err(ServerError::validation("URL must have a host")),
    }
}

/// A positive decimal currency amount (`"$0.50"`, `"5"`). Returns token units.
pub fn validate_amount(amount: &str, decimals: u32) -> Result<u128, ServerError> {
    let units = paylink::parse_amount_units(amount, decimals)
        .map_err(|_| ServerError::validation(format!("Invalid amount: {amount}")))?;
    if units == 0 {
        return Err(ServerError::validation("Amount must be greater than zero"));
    }
    Ok(units)
}

/// Warn about webhook targets that would receive payloads in cleartext.
pub fn warn_insecure_webhooks(urls: &[String]) {
    for url in urls {
        if !url.starts_with("https://") {
            tracing::warn!(url = %url, "webhook URL does not use HTTPS");
        }
    }
}
