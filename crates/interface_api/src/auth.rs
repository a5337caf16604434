//! Shared-secret authentication for scheduler calls
//!
//! The scheduler presents `Authorization: Bearer <cron_secret>`. The secret is
//! compared in constant time.

use subtle::ConstantTimeEq;

/// Marker placed in response extensions once the caller has authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronCaller;

/// Extracts the token from a `Bearer` authorization header value
pub fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Compares the presented token with the configured secret
///
/// An empty configured secret never matches, so an unconfigured deployment
/// rejects every call.
pub fn verify_cron_secret(presented: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer s3cret"), Some("s3cret"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
    }

    #[test]
    fn test_secret_comparison() {
        assert!(verify_cron_secret("s3cret", "s3cret"));
        assert!(!verify_cron_secret("s3cret!", "s3cret"));
        assert!(!verify_cron_secret("wrong", "s3cret"));
    }

    #[test]
    fn test_empty_secret_never_matches() {
        assert!(!verify_cron_secret("", ""));
        assert!(!verify_cron_secret("anything", ""));
    }
}
