pub mod health;
pub use self::health::health;

pub mod auth;
pub use self::auth::{challenge, login, logout, register, validate};

pub mod recovery;
pub use self::recovery::{recovery_password, recovery_system};

pub mod user;
pub use self::user::{details, system_check};

// common functions for the handlers
use crate::catalog;
use crate::error::Fault;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use regex::Regex;

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

pub fn valid_password(password: &str) -> bool {
    (8..=128).contains(&password.chars().count())
}

pub fn valid_uid(uid: &str) -> bool {
    uuid::Uuid::parse_str(uid).is_ok()
}

pub fn valid_code(code: &str) -> bool {
    Regex::new(r"^[0-9]{8}$").is_ok_and(|re| re.is_match(code))
}

pub fn valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=64).contains(&len)
}

/// Pull the bearer token out of the Authorization header.
///
/// # Errors
///
/// `Unauthorized` when the header is missing or not a bearer scheme.
pub fn bearer(headers: &HeaderMap) -> Result<&str, Fault> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(Fault::Unauthorized(catalog::BAD_AUTHORIZATION))
}

/// Best-effort client address for audit entries.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map_or_else(|| "unknown".to_string(), |ip| ip.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn email_shapes() {
        assert!(valid_email("ada@example.com"));
        assert!(!valid_email("ada@example"));
        assert!(!valid_email("not an email"));
    }

    #[test]
    fn code_must_be_eight_digits() {
        assert!(valid_code("01234567"));
        assert!(!valid_code("0123456"));
        assert!(!valid_code("0123456a"));
    }

    #[test]
    fn bearer_requires_the_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer(&headers).unwrap(), "abc");
    }

    #[test]
    fn client_ip_takes_the_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), "203.0.113.7");
    }
}
