//! Signed session-token codec.
//!
//! Tokens are self-contained claim sets `{sub, user_id, exp, type}` signed
//! with a process-wide symmetric key. There is no server-side token state:
//! verification is signature + expiry only. All verification failures
//! collapse into a single [`InvalidToken`] so callers cannot distinguish a
//! forged token from an expired one.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::state::AuthConfig;

/// Distinguishes the short-lived credential from the one that renews it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject email. Guests have none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub user_id: i64,
    /// Expiry as whole seconds since the Unix epoch.
    pub exp: i64,
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

/// Collapsed verification failure: malformed, forged, or expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidToken;

impl fmt::Display for InvalidToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid or expired token")
    }
}

impl std::error::Error for InvalidToken {}

pub struct TokenCodec {
    header: Header,
    validation: Validation,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.token_key().expose_secret().as_bytes();
        let mut validation = Validation::new(config.algorithm());
        // Zero leeway: a token with TTL 0 must stop verifying one second
        // after issuance.
        validation.leeway = 0;
        Self {
            header: Header::new(config.algorithm()),
            validation,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Issue a signed token for `user_id`, expiring `ttl_seconds` from now.
    ///
    /// # Errors
    /// Returns [`InvalidToken`] only if encoding fails, which indicates a
    /// broken signing configuration rather than bad input.
    pub fn issue(
        &self,
        subject: Option<&str>,
        user_id: i64,
        kind: TokenKind,
        ttl_seconds: i64,
    ) -> Result<String, InvalidToken> {
        let claims = Claims {
            sub: subject.map(str::to_string),
            user_id,
            exp: epoch_seconds().saturating_add(ttl_seconds),
            kind,
        };
        jsonwebtoken::encode(&self.header, &claims, &self.encoding_key).map_err(|_| InvalidToken)
    }

    /// Verify a token and return its claims.
    ///
    /// # Errors
    /// Returns [`InvalidToken`] for any failure: bad encoding, wrong
    /// signature, or elapsed expiry.
    pub fn verify(&self, token: &str) -> Result<Claims, InvalidToken> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| InvalidToken)
    }
}

/// Current wall-clock time truncated to whole seconds.
pub(crate) fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(0))
}
