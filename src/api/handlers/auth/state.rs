//! Auth configuration and shared state.
//!
//! Everything the session layer needs (signing key, algorithm, TTLs, cookie
//! policy) is carried in an explicitly constructed [`AuthConfig`] injected at
//! startup. Nothing reads the environment after boot.

use anyhow::{anyhow, Result};
use jsonwebtoken::Algorithm;
use secrecy::SecretString;

use super::tokens::TokenCodec;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    token_key: SecretString,
    algorithm: Algorithm,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, token_key: SecretString) -> Self {
        Self {
            frontend_base_url,
            token_key,
            algorithm: Algorithm::HS256,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    /// Select the HMAC signing algorithm by name.
    ///
    /// # Errors
    /// Returns an error for unknown names and for non-symmetric algorithms,
    /// since the signing key is a shared secret.
    pub fn with_algorithm(mut self, name: &str) -> Result<Self> {
        let algorithm = match name.trim().to_uppercase().as_str() {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => return Err(anyhow!("unsupported token algorithm: {other}")),
        };
        self.algorithm = algorithm;
        Ok(self)
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn token_key(&self) -> &SecretString {
        &self.token_key
    }

    pub(crate) fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    pub(crate) fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    /// Cookies are only marked `Secure` when the frontend is served over
    /// HTTPS, so local development over plain HTTP keeps working.
    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    codec: TokenCodec,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let codec = TokenCodec::new(&config);
        Self { config, codec }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://events.example.com".to_string(),
            SecretString::from("test-signing-key"),
        )
    }

    #[test]
    fn defaults_and_overrides() {
        let config = config();
        assert_eq!(config.access_ttl_seconds(), DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(config.refresh_ttl_seconds(), DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(config.algorithm(), Algorithm::HS256);
        assert!(config.session_cookie_secure());

        let config = config
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(120);
        assert_eq!(config.access_ttl_seconds(), 60);
        assert_eq!(config.refresh_ttl_seconds(), 120);
    }

    #[test]
    fn algorithm_by_name() {
        let cfg = config().with_algorithm("hs512").expect("hs512 is valid");
        assert_eq!(cfg.algorithm(), Algorithm::HS512);

        assert!(config().with_algorithm("RS256").is_err());
        assert!(config().with_algorithm("none").is_err());
    }

    #[test]
    fn insecure_frontend_disables_secure_cookies() {
        let config = AuthConfig::new(
            "http://localhost:5173".to_string(),
            SecretString::from("k"),
        );
        assert!(!config.session_cookie_secure());
    }
}
