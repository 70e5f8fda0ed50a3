//! Price and availability normalization shared by every tier

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// schema.org style availability tokens that count as purchasable.
/// Matched as case-insensitive substrings of the raw value.
pub const IN_STOCK_TOKENS: [&str; 6] = [
    "instock",
    "in_stock",
    "instoreonly",
    "limitedavailability",
    "onlineonly",
    "presale",
];

static NUMBER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(-\s*)?(\d[\d.,]*)").ok());

/// Whether an availability string denotes an in-stock state
pub fn is_in_stock(availability: &str) -> bool {
    let lower = availability.to_lowercase();
    IN_STOCK_TOKENS.iter().any(|token| lower.contains(token))
}

/// Availability from a JSON value: booleans verbatim, strings via the token
/// vocabulary, anything else unavailable
pub fn value_to_availability(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => is_in_stock(s),
        Value::Null => false,
        other => is_in_stock(&other.to_string()),
    }
}

/// Parse locale-formatted price text into a decimal.
///
/// Currency symbols and surrounding words are ignored. When both `,` and `.`
/// appear the right-most one is the decimal separator. A single `,` followed
/// by exactly two digits is a decimal comma, any other `,` groups thousands.
/// Negative and unparseable values yield `None`.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let captures = NUMBER.as_ref()?.captures(text)?;
    if captures.get(1).is_some() {
        return None;
    }

    let raw = captures
        .get(2)?
        .as_str()
        .trim_end_matches(|c| c == ',' || c == '.');
    let normalized = normalize_separators(raw);

    let price = Decimal::from_str(&normalized).ok()?;
    (!price.is_sign_negative()).then_some(price)
}

fn normalize_separators(raw: &str) -> String {
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if comma > dot => raw.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => raw.replace(',', ""),
        (None, Some(comma)) => {
            let decimals = raw.len() - comma - 1;
            if raw.matches(',').count() == 1 && decimals == 2 {
                raw.replace(',', ".")
            } else {
                raw.replace(',', "")
            }
        }
        (Some(_), None) if raw.matches('.').count() > 1 => raw.replace('.', ""),
        _ => raw.to_string(),
    }
}

/// Price from a JSON value: numbers as written, strings via [`parse_price`]
pub fn value_to_price(value: &Value) -> Option<Decimal> {
    let price = match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => parse_price(s),
        _ => None,
    }?;
    (!price.is_sign_negative()).then_some(price)
}

/// Non-empty string value
pub fn value_to_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
