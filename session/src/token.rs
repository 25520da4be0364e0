//! Bearer-token inspection.
//!
//! DESIGN
//! ======
//! Tokens are JWT-shaped (`header.payload.signature`). Only the payload is
//! read here; signature verification belongs to the backend. Decoding never
//! fails loudly: anything that does not yield a claims object with a numeric
//! `exp` is [`Decoded::Malformed`], and every caller treats that exactly like
//! an expired token.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Tokens expiring within this window are due for a proactive refresh.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 300;

/// Read-only view of a token payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenClaims {
    /// Expiry, seconds since the Unix epoch.
    #[serde(deserialize_with = "epoch_secs")]
    pub exp: i64,
    /// Subject (user id), when present.
    #[serde(default)]
    pub sub: Option<String>,
    /// Remaining claims, opaque to this crate.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Issuers may emit fractional timestamps; truncate toward the past.
#[allow(clippy::cast_possible_truncation)]
fn epoch_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
        .ok_or_else(|| serde::de::Error::custom("exp out of range"))
}

/// Outcome of [`decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Claims(TokenClaims),
    Malformed,
}

impl Decoded {
    #[must_use]
    pub fn claims(self) -> Option<TokenClaims> {
        match self {
            Self::Claims(claims) => Some(claims),
            Self::Malformed => None,
        }
    }
}

/// Current time in epoch seconds.
#[must_use]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Decode the payload segment of `token`.
#[must_use]
pub fn decode(token: &str) -> Decoded {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Decoded::Malformed;
    };

    let payload = payload.trim_end_matches('=');
    let Ok(bytes) = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
    else {
        return Decoded::Malformed;
    };

    match serde_json::from_slice::<TokenClaims>(&bytes) {
        Ok(claims) => Decoded::Claims(claims),
        Err(_) => Decoded::Malformed,
    }
}

/// `true` when the token decodes and has not yet expired.
#[must_use]
pub fn is_valid(token: &str) -> bool {
    is_valid_at(token, now_secs())
}

#[must_use]
pub fn is_valid_at(token: &str, now: i64) -> bool {
    match decode(token) {
        Decoded::Claims(claims) => claims.exp > now,
        Decoded::Malformed => false,
    }
}

/// `true` when the token is malformed or expires in under `threshold_secs`.
#[must_use]
pub fn needs_refresh(token: &str, threshold_secs: i64) -> bool {
    needs_refresh_at(token, threshold_secs, now_secs())
}

#[must_use]
pub fn needs_refresh_at(token: &str, threshold_secs: i64, now: i64) -> bool {
    match decode(token) {
        Decoded::Claims(claims) => claims.exp.saturating_sub(now) < threshold_secs,
        Decoded::Malformed => true,
    }
}

#[cfg(test)]
#[path = "token_test.rs"]
mod tests;
