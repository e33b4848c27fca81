//! Contact-based capability check for buyer actions.
//!
//! Buyers have no session. A buyer proves they own an order by presenting
//! the email or the phone stored on the order's client; both sides are
//! normalized and compared for exact equality.

use crate::types::Client;
use serde::Deserialize;

/// Ecuadorian country calling code
const COUNTRY_CODE: &str = "593";

/// Digits of a national number after the leading zero
const SUBSCRIBER_DIGITS: usize = 9;

/// Contact details a buyer presents for an order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ContactClaim {
    /// Claimed email
    #[serde(default)]
    pub email: Option<String>,
    /// Claimed phone
    #[serde(default)]
    pub phone: Option<String>,
}

impl ContactClaim {
    /// Claim by email.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone: None,
        }
    }

    /// Claim by phone.
    #[must_use]
    pub fn phone(phone: impl Into<String>) -> Self {
        Self {
            email: None,
            phone: Some(phone.into()),
        }
    }

    /// Whether neither identifier carries any text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let blank = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());
        blank(&self.email) && blank(&self.phone)
    }
}

/// Trim and lowercase an email. Blank input yields `None`.
#[must_use]
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    (!email.is_empty()).then_some(email)
}

/// Normalize a phone to national format: `0` followed by nine digits.
///
/// Accepts `+593`/`593` prefixes and ignores spaces, dashes, dots and
/// parentheses. Anything that does not reduce to a national number yields
/// `None`.
#[must_use]
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let international = trimmed.starts_with('+');
    let digits: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '+'))
        .collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let national = match digits.strip_prefix(COUNTRY_CODE) {
        Some(rest) if international || rest.len() == SUBSCRIBER_DIGITS => rest,
        _ if international => return None,
        _ => digits.as_str(),
    };

    match national.len() {
        n if n == SUBSCRIBER_DIGITS + 1 && national.starts_with('0') => Some(national.to_string()),
        n if n == SUBSCRIBER_DIGITS && !national.starts_with('0') => Some(format!("0{national}")),
        _ => None,
    }
}

/// Whether the claim identifies the client.
///
/// A side matches only when both the claimed and the stored value normalize
/// and are equal; a missing or unparseable value never matches.
#[must_use]
pub fn matches_contact(claim: &ContactClaim, client: &Client) -> bool {
    let same = |claimed: Option<&str>, stored: Option<&str>, normalize: fn(&str) -> Option<String>| {
        match (claimed.and_then(normalize), stored.and_then(normalize)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    };

    same(claim.email.as_deref(), client.email.as_deref(), normalize_email)
        || same(claim.phone.as_deref(), client.phone.as_deref(), normalize_phone)
}
