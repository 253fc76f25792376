//! Device credentials
//!
//! The broker authenticates a session with a short-lived bearer token carried in
//! the MQTT password field. This module defines the token value the session
//! tracks and the provider seam that mints it.

pub mod jwt;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub use jwt::JwtTokenProvider;

/// Supported token signing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAlgorithm {
    Rs256,
    Es256,
}

impl AuthAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthAlgorithm::Rs256 => "RS256",
            AuthAlgorithm::Es256 => "ES256",
        }
    }
}

impl FromStr for AuthAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(AuthAlgorithm::Rs256),
            "ES256" => Ok(AuthAlgorithm::Es256),
            other => Err(AuthError::InvalidAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for AuthAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A minted bearer token and the moment it was issued.
///
/// Replaced wholesale on refresh, never edited in place.
#[derive(Clone)]
pub struct Credential {
    token: String,
    issued_at: Instant,
}

impl Credential {
    pub fn new(token: impl Into<String>, issued_at: Instant) -> Self {
        Self {
            token: token.into(),
            issued_at,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Time elapsed since the token was minted
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.issued_at)
    }

    /// True once the token has lived for its full validity window
    pub fn needs_refresh(&self, token_exp_minutes: u64) -> bool {
        self.age().as_secs() >= token_exp_minutes.saturating_mul(60)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"***")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

/// Credential minting errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid algorithm {0}. Should be one of 'RS256' or 'ES256'.")]
    InvalidAlgorithm(String),
    #[error("Failed to read private key {path}: {source}")]
    KeyRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid {algorithm} private key: {message}")]
    InvalidKey {
        algorithm: AuthAlgorithm,
        message: String,
    },
    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// Mints bearer tokens for the session identity
pub trait TokenProvider: Send + Sync {
    /// Produce a fresh credential, stamped with the current instant
    fn mint(&self) -> Result<Credential, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("RS256".parse::<AuthAlgorithm>().unwrap(), AuthAlgorithm::Rs256);
        assert_eq!("ES256".parse::<AuthAlgorithm>().unwrap(), AuthAlgorithm::Es256);
        assert!("rs256".parse::<AuthAlgorithm>().is_err());
        assert!("HS256".parse::<AuthAlgorithm>().is_err());
        assert!("".parse::<AuthAlgorithm>().is_err());
    }

    #[test]
    fn test_algorithm_display_round_trips() {
        for alg in [AuthAlgorithm::Rs256, AuthAlgorithm::Es256] {
            assert_eq!(alg.to_string().parse::<AuthAlgorithm>().unwrap(), alg);
        }
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let credential = Credential::new("eyJhbGciOi.secret.sig", Instant::now());
        let debug = format!("{credential:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("***"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_refresh_boundary() {
        let credential = Credential::new("token", Instant::now());

        tokio::time::advance(Duration::from_secs(1199)).await;
        assert!(!credential.needs_refresh(20));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(credential.needs_refresh(20), "stale at exactly 1200s");

        tokio::time::advance(Duration::from_secs(600)).await;
        assert!(credential.needs_refresh(20));
    }
}
