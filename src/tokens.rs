//! Four-kind token service.
//!
//! Online, offline, challenge, and system tokens are HS256 JWTs signed with
//! four independent secrets; a token of one kind never verifies under
//! another kind's key. Expiry is evaluated against the injected [`Clock`]
//! rather than the library's own wall clock, so `Expired` is deterministic
//! under test and always distinct from `Invalid`: expired is a routine
//! lifecycle event, invalid is a trust violation.

use crate::clock::Clock;
use crate::model::{AccountDetails, DeviceFingerprint};
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Short-lived session/capability proof, re-issued on almost every
    /// authenticated call.
    Online,
    /// Long-lived client-side cache credential.
    Offline,
    /// One-time-code carrier, single use.
    Challenge,
    /// Carries a signed blob between client and server without server-side
    /// storage.
    System,
}

impl TokenKind {
    #[must_use]
    pub fn ttl(self) -> Duration {
        match self {
            TokenKind::Online => Duration::seconds(60),
            TokenKind::Offline => Duration::days(5),
            TokenKind::Challenge => Duration::seconds(240),
            TokenKind::System => Duration::seconds(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// Routine lifecycle event: the token was genuine but its time is up.
    #[error("token expired")]
    Expired,
    /// Trust violation: bad signature, malformed, or wrong key scope.
    #[error("token invalid")]
    Invalid,
    #[error("token could not be issued")]
    Issue(#[source] jsonwebtoken::errors::Error),
}

/// The four statically provisioned signing secrets, one per kind.
#[derive(Clone)]
pub struct TokenSecrets {
    pub online: SecretString,
    pub offline: SecretString,
    pub challenge: SecretString,
    pub system: SecretString,
}

impl TokenSecrets {
    #[must_use]
    pub fn new(
        online: SecretString,
        offline: SecretString,
        challenge: SecretString,
        system: SecretString,
    ) -> Self {
        Self {
            online,
            offline,
            challenge,
            system,
        }
    }
}

struct KeyScope {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyScope {
    fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }
}

#[derive(Serialize)]
struct SealedRef<'a, T: Serialize> {
    exp: i64,
    iat: i64,
    #[serde(flatten)]
    claims: &'a T,
}

#[derive(Deserialize)]
struct Sealed<T> {
    exp: i64,
    #[allow(dead_code)]
    iat: i64,
    #[serde(flatten)]
    claims: T,
}

pub struct TokenService {
    online: KeyScope,
    offline: KeyScope,
    challenge: KeyScope,
    system: KeyScope,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    #[must_use]
    pub fn new(secrets: &TokenSecrets, clock: Arc<dyn Clock>) -> Self {
        Self {
            online: KeyScope::new(&secrets.online),
            offline: KeyScope::new(&secrets.offline),
            challenge: KeyScope::new(&secrets.challenge),
            system: KeyScope::new(&secrets.system),
            clock,
        }
    }

    fn scope(&self, kind: TokenKind) -> &KeyScope {
        match kind {
            TokenKind::Online => &self.online,
            TokenKind::Offline => &self.offline,
            TokenKind::Challenge => &self.challenge,
            TokenKind::System => &self.system,
        }
    }

    /// Seal `claims` into a token of `kind` with that kind's TTL.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Issue`] if encoding fails.
    pub fn issue<T: Serialize>(&self, kind: TokenKind, claims: &T) -> Result<String, TokenError> {
        let now = self.clock.now().timestamp();
        let sealed = SealedRef {
            exp: now + kind.ttl().num_seconds(),
            iat: now,
            claims,
        };
        encode(&Header::default(), &sealed, &self.scope(kind).encoding).map_err(TokenError::Issue)
    }

    /// Verify a token under `kind`'s key scope and unseal its claims.
    ///
    /// # Errors
    ///
    /// [`TokenError::Expired`] when the token is genuine but past its `exp`
    /// (checked against the injected clock); [`TokenError::Invalid`] for
    /// anything else.
    pub fn verify<T: DeserializeOwned>(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;

        let sealed = decode::<Sealed<T>>(token, &self.scope(kind).decoding, &validation)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?
            .claims;

        if sealed.exp <= self.clock.now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(sealed.claims)
    }
}

/// Claims of an Online token. `isAuth` separates full sessions from the
/// non-authenticated recovery capability issued by a validated challenge,
/// which additionally carries the recovery reason in `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineClaims {
    pub uid: String,
    pub email: String,
    #[serde(rename = "isAuth")]
    pub is_auth: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

/// Stable profile snapshot carried by the Offline token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub fname: String,
    pub lname: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineClaims {
    pub uid: String,
    pub email: String,
    pub profile: ProfileSnapshot,
}

/// The challenge exists only as this sealed payload; it is never persisted
/// standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeClaims {
    pub challenge: String,
    pub reason: String,
    pub uid: String,
    pub email: String,
}

/// System token carrying a device fingerprint plus its own signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemClaims {
    pub system: DeviceFingerprint,
    pub signature: String,
}

/// System token carrying the account-detail bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailClaims {
    pub details: AccountDetails,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};

    fn service() -> (TokenService, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let secrets = TokenSecrets::new(
            SecretString::from("online-secret"),
            SecretString::from("offline-secret"),
            SecretString::from("challenge-secret"),
            SecretString::from("system-secret"),
        );
        (TokenService::new(&secrets, clock.clone()), clock)
    }

    fn online_claims() -> OnlineClaims {
        OnlineClaims {
            uid: "uid-1".to_string(),
            email: "a@example.com".to_string(),
            is_auth: true,
            reason: None,
        }
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let (service, _) = service();
        let token = service.issue(TokenKind::Online, &online_claims()).unwrap();
        let claims: OnlineClaims = service.verify(TokenKind::Online, &token).unwrap();
        assert_eq!(claims, online_claims());
    }

    #[test]
    fn kinds_are_not_cross_compatible() {
        let (service, _) = service();
        let token = service.issue(TokenKind::Online, &online_claims()).unwrap();
        let err = service
            .verify::<OnlineClaims>(TokenKind::Challenge, &token)
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[test]
    fn expiry_follows_the_injected_clock() {
        let (service, clock) = service();
        let token = service.issue(TokenKind::Online, &online_claims()).unwrap();

        clock.advance(Duration::seconds(59));
        assert!(service
            .verify::<OnlineClaims>(TokenKind::Online, &token)
            .is_ok());

        clock.advance(Duration::seconds(2));
        let err = service
            .verify::<OnlineClaims>(TokenKind::Online, &token)
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired));
    }

    #[test]
    fn garbage_is_invalid_not_expired() {
        let (service, _) = service();
        let err = service
            .verify::<OnlineClaims>(TokenKind::Online, "not.a.token")
            .unwrap_err();
        assert!(matches!(err, TokenError::Invalid));
    }

    #[test]
    fn challenge_ttl_outlives_online_ttl() {
        let (service, clock) = service();
        let challenge = service
            .issue(
                TokenKind::Challenge,
                &ChallengeClaims {
                    challenge: "12345678".to_string(),
                    reason: "FGPASS".to_string(),
                    uid: "uid-1".to_string(),
                    email: "a@example.com".to_string(),
                },
            )
            .unwrap();
        let online = service.issue(TokenKind::Online, &online_claims()).unwrap();

        clock.advance(Duration::seconds(120));
        assert!(matches!(
            service.verify::<OnlineClaims>(TokenKind::Online, &online),
            Err(TokenError::Expired)
        ));
        assert!(service
            .verify::<ChallengeClaims>(TokenKind::Challenge, &challenge)
            .is_ok());
    }

    #[test]
    fn online_reason_claim_round_trips_as_type() {
        let (service, _) = service();
        let claims = OnlineClaims {
            uid: "uid-1".to_string(),
            email: "a@example.com".to_string(),
            is_auth: false,
            reason: Some("FGPASS".to_string()),
        };
        let token = service.issue(TokenKind::Online, &claims).unwrap();
        let back: OnlineClaims = service.verify(TokenKind::Online, &token).unwrap();
        assert_eq!(back.reason.as_deref(), Some("FGPASS"));
        assert!(!back.is_auth);
    }
}
