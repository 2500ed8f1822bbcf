//! Bearer-credential extraction and validation.

use hyper::header::{AUTHORIZATION, HeaderMap};
use std::sync::Arc;
use thiserror::Error;

const BEARER_PREFIX: &str = "Bearer ";
const KEY_PREFIX: &str = "sk_";
const MIN_KEY_LENGTH: usize = 32;

/// Why a request failed authorization. Every variant maps to a 401; the
/// distinction only feeds the warning log.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("Authorization header is not valid UTF-8")]
    InvalidHeader,

    #[error("Authorization header is not a Bearer credential")]
    NotBearer,

    #[error("empty bearer credential")]
    EmptyCredential,

    #[error("API key rejected")]
    InvalidKey,
}

/// Credential predicate.
///
/// Implementations must be pure and cheap; this runs on the request path
/// before any body bytes are accepted. A credential-store lookup belongs
/// behind this trait, not in the session.
pub trait ApiKeyValidator: Send + Sync {
    fn is_valid(&self, candidate: &str) -> bool;
}

/// Structural placeholder validator: accepts keys that are at least 32
/// characters and start with `sk_`. Stands in until a real credential
/// store is wired up.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralKeyValidator;

impl ApiKeyValidator for StructuralKeyValidator {
    fn is_valid(&self, candidate: &str) -> bool {
        candidate.len() >= MIN_KEY_LENGTH && candidate.starts_with(KEY_PREFIX)
    }
}

/// Extracts the bearer credential from request headers and checks it
/// against the configured validator.
pub struct RequestAuthorizer {
    validator: Arc<dyn ApiKeyValidator>,
}

impl RequestAuthorizer {
    pub fn new(validator: Arc<dyn ApiKeyValidator>) -> Self {
        Self { validator }
    }

    /// Returns the credential on success. The `Bearer ` prefix match is
    /// case-sensitive with exactly one trailing space.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let value = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidHeader)?;

        let candidate = value.strip_prefix(BEARER_PREFIX).ok_or(AuthError::NotBearer)?;
        if candidate.is_empty() {
            return Err(AuthError::EmptyCredential);
        }
        if !self.validator.is_valid(candidate) {
            return Err(AuthError::InvalidKey);
        }

        Ok(candidate.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn authorizer() -> RequestAuthorizer {
        RequestAuthorizer::new(Arc::new(StructuralKeyValidator))
    }

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn validator_accepts_32_char_sk_key() {
        let key = format!("sk_{}", "a".repeat(29));
        assert_eq!(key.len(), 32);
        assert!(StructuralKeyValidator.is_valid(&key));
    }

    #[test]
    fn validator_rejects_short_key() {
        assert!(!StructuralKeyValidator.is_valid("sk_short"));
    }

    #[test]
    fn validator_rejects_wrong_prefix() {
        let key = format!("xx_{}", "a".repeat(40));
        assert!(!StructuralKeyValidator.is_valid(&key));
    }

    #[test]
    fn validator_rejects_31_chars() {
        let key = format!("sk_{}", "a".repeat(28));
        assert_eq!(key.len(), 31);
        assert!(!StructuralKeyValidator.is_valid(&key));
    }

    #[test]
    fn authorize_returns_credential() {
        let key = format!("sk_{}", "b".repeat(40));
        let headers = headers_with_auth(&format!("Bearer {key}"));
        assert_eq!(authorizer().authorize(&headers), Ok(key));
    }

    #[test]
    fn authorize_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert_eq!(
            authorizer().authorize(&headers),
            Err(AuthError::MissingHeader)
        );
    }

    #[test]
    fn authorize_rejects_lowercase_bearer() {
        let key = format!("sk_{}", "b".repeat(40));
        let headers = headers_with_auth(&format!("bearer {key}"));
        assert_eq!(authorizer().authorize(&headers), Err(AuthError::NotBearer));
    }

    #[test]
    fn authorize_rejects_missing_scheme() {
        let key = format!("sk_{}", "b".repeat(40));
        let headers = headers_with_auth(&key);
        assert_eq!(authorizer().authorize(&headers), Err(AuthError::NotBearer));
    }

    #[test]
    fn authorize_rejects_empty_credential() {
        let headers = headers_with_auth("Bearer ");
        assert_eq!(
            authorizer().authorize(&headers),
            Err(AuthError::EmptyCredential)
        );
    }

    #[test]
    fn authorize_rejects_invalid_key() {
        let headers = headers_with_auth("Bearer sk_short");
        assert_eq!(authorizer().authorize(&headers), Err(AuthError::InvalidKey));
    }
}
