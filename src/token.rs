use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::models::User;

/// Payload of a MiniBiz access token.
///
/// Only `sub` and `exp` are guaranteed; the backend variants differ on the
/// rest, so every other claim is optional.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
}

impl Claims {
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.exp).ok()
    }

    /// `exp` is in seconds; the comparison is done in milliseconds.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        let expires_at_ms = i128::from(self.exp) * 1000;
        let now_ms = now.unix_timestamp_nanos() / 1_000_000;
        expires_at_ms <= now_ms
    }

    pub fn expires_in(&self, now: OffsetDateTime) -> Duration {
        Duration::seconds(self.exp).saturating_sub(Duration::seconds(now.unix_timestamp()))
    }

    /// The user this token was issued to.
    pub fn user(&self) -> User {
        let email = self
            .email
            .clone()
            .or_else(|| self.sub.contains('@').then(|| self.sub.clone()))
            .unwrap_or_default();

        User {
            id: self.sub.parse().ok(),
            name: self.name.clone().unwrap_or_default(),
            email,
            role: self.role.clone(),
        }
    }
}

/// Decodes the payload segment of a JWT without verifying its signature.
///
/// The header is never inspected. Returns `None` for anything that is not a
/// well-formed token: wrong number of segments, invalid base64url, invalid
/// JSON, missing `sub`/`exp`, an `exp` outside the representable date range,
/// or an `exp` that is not after `iat`. Callers must treat `None` as expired.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (segments.next(), segments.next(), segments.next(), segments.next())
    else {
        return None;
    };

    // Some encoders keep the base64 padding.
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;

    claims.expires_at()?;
    if let Some(iat) = claims.iat {
        if claims.exp <= iat {
            return None;
        }
    }

    Some(claims)
}

pub fn is_expired_at(token: &str, now: OffsetDateTime) -> bool {
    decode_claims(token).is_none_or(|claims| claims.is_expired_at(now))
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, OffsetDateTime::now_utc())
}

/// Remaining lifetime of the token, or `None` when it cannot be decoded.
pub fn expires_in(token: &str, now: OffsetDateTime) -> Option<Duration> {
    decode_claims(token).map(|claims| claims.expires_in(now))
}
