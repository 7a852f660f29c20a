use alloy::primitives::Address;

use crate::{ChainConfig, PaylinkError, SchemeServer};

/// Server-side scheme for exact USDC payments.
pub struct ExactSchemeServer {
    config: ChainConfig,
}

impl ExactSchemeServer {
    pub fn new() -> Self {
        Self {
            config: ChainConfig::default(),
        }
    }

    pub fn with_chain_config(config: ChainConfig) -> Self {
        Self { config }
    }
}

impl Default for ExactSchemeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemeServer for ExactSchemeServer {
    fn parse_price(&self, price: &str) -> Result<(String, Address), PaylinkError> {
        let units = parse_amount_units(price, self.config.token_decimals)?;
        Ok((units.to_string(), self.config.asset))
    }
}

/// Parse a decimal currency amount (`"$0.50"`, `"0.5"`, `"12"`) into token units.
///
/// A single leading `$` is optional. Digits beyond `decimals` fractional places
/// are truncated. Integer arithmetic only.
pub fn parse_amount_units(amount: &str, decimals: u32) -> Result<u128, PaylinkError> {
    let trimmed = amount.trim();
    let numeric = trimmed.strip_prefix('$').unwrap_or(trimmed).trim();

    if numeric.is_empty() {
        return Err(PaylinkError::InvalidPrice(format!(
            "'{amount}': no numeric content"
        )));
    }

    let (integer_part, fractional_part) = match numeric.split_once('.') {
        Some((i, f)) => (i, f),
        None => (numeric, ""),
    };

    if integer_part.is_empty() && fractional_part.is_empty() {
        return Err(PaylinkError::InvalidPrice(format!(
            "'{amount}': no numeric content"
        )));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(integer_part) || !all_digits(fractional_part) {
        return Err(PaylinkError::InvalidPrice(format!(
            "'{amount}': expected digits with an optional decimal point"
        )));
    }

    let overflow = || PaylinkError::InvalidPrice(format!("'{amount}': overflow"));
    let multiplier = 10u128.pow(decimals);

    let integer: u128 = if integer_part.is_empty() {
        0
    } else {
        integer_part.parse().map_err(|_| overflow())?
    };

    let digits = decimals as usize;
    let frac = if fractional_part.len() > digits {
        &fractional_part[..digits]
    } else {
        fractional_part
    };
    let fractional: u128 = if frac.is_empty() {
        0
    } else {
        let parsed: u128 = frac.parse().map_err(|_| overflow())?;
        parsed * 10u128.pow((digits - frac.len()) as u32)
    };

    integer
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(fractional))
        .ok_or_else(overflow)
}

/// Render token units as dollars and cents, rounding half up: `1605000` → `$1.61`.
pub fn units_to_usd_cents(units: u128, decimals: u32) -> String {
    let per_cent = 10u128.pow(decimals.saturating_sub(2));
    let cents = units.saturating_add(per_cent / 2) / per_cent;
    format!("${}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BASE_SEPOLIA_USDC;

    #[test]
    fn parse_dollar_price() {
        let server = ExactSchemeServer::new();
        let (amount, asset) = server.parse_price("$0.50").unwrap();
        assert_eq!(amount, "500000");
        assert_eq!(asset, BASE_SEPOLIA_USDC);
    }

    #[test]
    fn parse_with_and_without_symbol() {
        assert_eq!(parse_amount_units("$0.10", 6).unwrap(), 100_000);
        assert_eq!(parse_amount_units("0.10", 6).unwrap(), 100_000);
        assert_eq!(parse_amount_units(" $ 1 ", 6).unwrap(), 1_000_000);
        assert_eq!(parse_amount_units(".5", 6).unwrap(), 500_000);
        assert_eq!(parse_amount_units("3.", 6).unwrap(), 3_000_000);
    }

    #[test]
    fn parse_truncates_beyond_decimals() {
        assert_eq!(parse_amount_units("0.0000019", 6).unwrap(), 1);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_amount_units("$", 6).is_err());
        assert!(parse_amount_units(".", 6).is_err());
        assert!(parse_amount_units("1.2.3", 6).is_err());
        assert!(parse_amount_units("-1", 6).is_err());
        assert!(parse_amount_units("1e6", 6).is_err());
        assert!(parse_amount_units("USD 1", 6).is_err());
    }

    #[test]
    fn parse_overflow_fails() {
        assert!(parse_amount_units("$999999999999999999999999999999999999", 6).is_err());
    }

    #[test]
    fn format_units() {
        assert_eq!(units_to_usd_cents(0, 6), "$0.00");
        assert_eq!(units_to_usd_cents(1_600_000, 6), "$1.60");
        assert_eq!(units_to_usd_cents(1_605_000, 6), "$1.61");
        assert_eq!(units_to_usd_cents(1_604_999, 6), "$1.60");
    }

    #[test]
    fn cents_of_saturated_total_do_not_overflow() {
        assert_eq!(
            units_to_usd_cents(u128::MAX, 6),
            "$340282366920938463463374607431768.21"
        );
    }
}
