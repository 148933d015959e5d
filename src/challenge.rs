//! One-time-code challenge engine.
//!
//! Per-account state machine: `NoChallenge -> Pending -> {Consumed |
//! Expired}`. The challenge itself only exists as the payload sealed inside
//! a Challenge token stored in `auth.challengeToken`; consuming it clears
//! the slot. The engine mutates the record in place and leaves signing,
//! persistence, and mail delivery to the orchestrator.

use crate::catalog;
use crate::clock::Clock;
use crate::error::Fault;
use crate::model::{none, stamp, UserRecord, NONE};
use crate::tokens::{ChallengeClaims, OnlineClaims, TokenError, TokenKind, TokenService};
use anyhow::anyhow;
use rand::{rngs::OsRng, Rng};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Why the account is being challenged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeReason {
    /// Forgotten password (`FGPASS`).
    ForgotPassword,
    /// Device/system reset (`RSTSYS`).
    ResetSystem,
}

impl ChallengeReason {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FGPASS" => Some(Self::ForgotPassword),
            "RSTSYS" => Some(Self::ResetSystem),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ForgotPassword => "FGPASS",
            Self::ResetSystem => "RSTSYS",
        }
    }

    /// Human wording used in the verification mail.
    #[must_use]
    pub fn mail_text(self) -> &'static str {
        match self {
            Self::ForgotPassword => "account password reset",
            Self::ResetSystem => "account system reset",
        }
    }
}

/// A freshly issued challenge: the code goes out by mail, the sealed token
/// is already staged on the record.
#[derive(Debug)]
pub struct IssuedChallenge {
    pub code: String,
}

pub struct ChallengeEngine {
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
}

impl ChallengeEngine {
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, clock: Arc<dyn Clock>) -> Self {
        Self { tokens, clock }
    }

    /// Generate a code, seal it, and stage the token on the record.
    ///
    /// Preconditions checked here: account not banned, no live
    /// authenticated online session (a logged-in user has no business
    /// requesting a recovery challenge), and no live pending challenge
    /// (prevents challenge flooding). Tamper and quota checks belong to the
    /// orchestrator, which runs them before any engine work.
    ///
    /// # Errors
    ///
    /// `Forbidden` for banned accounts, `Conflict` when a session or a
    /// pending challenge blocks issuance.
    pub fn issue(
        &self,
        record: &mut UserRecord,
        reason: ChallengeReason,
    ) -> Result<IssuedChallenge, Fault> {
        if record.info.is_banned {
            return Err(Fault::Forbidden(catalog::BANNED_ACCOUNT));
        }

        if record.auth.online_token != NONE {
            match self
                .tokens
                .verify::<OnlineClaims>(TokenKind::Online, &record.auth.online_token)
            {
                Ok(claims) if claims.is_auth => {
                    return Err(Fault::Conflict(catalog::SESSION_ACTIVE));
                }
                // Stale or recovery-scoped tokens do not block a challenge.
                _ => {}
            }
        }

        if record.auth.challenge_token != NONE
            && self
                .tokens
                .verify::<ChallengeClaims>(TokenKind::Challenge, &record.auth.challenge_token)
                .is_ok()
        {
            return Err(Fault::Conflict(catalog::CHALLENGE_PENDING));
        }

        let code = generate_code();
        let claims = ChallengeClaims {
            challenge: code.clone(),
            reason: reason.as_str().to_string(),
            uid: record.uid.clone(),
            email: record.email.clone(),
        };
        let token = self
            .tokens
            .issue(TokenKind::Challenge, &claims)
            .map_err(|err| Fault::Internal(anyhow!(err)))?;

        record.auth.challenge_token = token;
        self.touch(record);

        Ok(IssuedChallenge { code })
    }

    /// Undo a staged challenge after a failed delivery so no
    /// issued-but-undelivered challenge remains valid.
    pub fn rollback(&self, record: &mut UserRecord) {
        record.auth.challenge_token = none();
        self.touch(record);
    }

    /// Validate a submitted code against the pending challenge; on success
    /// the challenge is consumed and a non-authenticated Online token
    /// scoped to the recovery reason is staged and returned.
    ///
    /// # Errors
    ///
    /// `NotFound` when nothing is pending, `Conflict` when the pending
    /// challenge expired (a routine lifecycle event), `Unauthorized` for a
    /// forged token or any uid/email/reason/code mismatch.
    pub fn validate(
        &self,
        record: &mut UserRecord,
        reason: ChallengeReason,
        uid: &str,
        email: &str,
        code: &str,
    ) -> Result<String, Fault> {
        if record.info.is_banned {
            return Err(Fault::Forbidden(catalog::BANNED_ACCOUNT));
        }

        if record.auth.challenge_token == NONE {
            return Err(Fault::NotFound(catalog::NO_CHALLENGE));
        }

        let claims = self
            .tokens
            .verify::<ChallengeClaims>(TokenKind::Challenge, &record.auth.challenge_token)
            .map_err(|err| match err {
                TokenError::Expired => Fault::Conflict(catalog::CHALLENGE_EXPIRED),
                _ => Fault::Unauthorized(catalog::BAD_CHALLENGE),
            })?;

        if claims.uid != uid || claims.email != email || claims.reason != reason.as_str() {
            return Err(Fault::Unauthorized(catalog::BAD_CREDENTIALS));
        }
        if claims.challenge.as_bytes().ct_eq(code.as_bytes()).into() {
            // matched
        } else {
            return Err(Fault::Unauthorized(catalog::BAD_CREDENTIALS));
        }

        let online = OnlineClaims {
            uid: record.uid.clone(),
            email: record.email.clone(),
            is_auth: false,
            reason: Some(reason.as_str().to_string()),
        };
        let token = self
            .tokens
            .issue(TokenKind::Online, &online)
            .map_err(|err| Fault::Internal(anyhow!(err)))?;

        // One-time use: consume before anything else can observe it.
        record.auth.challenge_token = none();
        record.auth.online_token = token.clone();
        self.touch(record);

        Ok(token)
    }

    fn touch(&self, record: &mut UserRecord) {
        let at = stamp(self.clock.now());
        record.auth.updated_at = at.clone();
        record.updated_at = at;
    }
}

/// 8-digit numeric one-time code.
fn generate_code() -> String {
    let mut rng = OsRng;
    (0..8)
        .map(|_| char::from_digit(rng.gen_range(0..10), 10).unwrap_or('0'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::tokens::TokenSecrets;
    use chrono::{Duration, TimeZone, Utc};
    use secrecy::SecretString;

    fn engine() -> (ChallengeEngine, Arc<TokenService>, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let secrets = TokenSecrets::new(
            SecretString::from("online"),
            SecretString::from("offline"),
            SecretString::from("challenge"),
            SecretString::from("system"),
        );
        let tokens = Arc::new(TokenService::new(&secrets, clock.clone()));
        (
            ChallengeEngine::new(tokens.clone(), clock.clone()),
            tokens,
            clock,
        )
    }

    fn record(clock: &FixedClock) -> UserRecord {
        UserRecord::new(
            "uid-1".to_string(),
            "ada@example.com".to_string(),
            "Ada".to_string(),
            "Lovelace".to_string(),
            "England".to_string(),
            "secret".to_string(),
            "hash".to_string(),
            "203.0.113.7".to_string(),
            clock.now(),
        )
    }

    #[test]
    fn issue_stages_a_pending_challenge() {
        let (engine, tokens, clock) = engine();
        let mut record = record(&clock);

        let issued = engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap();
        assert_eq!(issued.code.len(), 8);
        assert!(issued.code.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(record.auth.challenge_token, NONE);

        let claims: ChallengeClaims = tokens
            .verify(TokenKind::Challenge, &record.auth.challenge_token)
            .unwrap();
        assert_eq!(claims.challenge, issued.code);
        assert_eq!(claims.reason, "FGPASS");
    }

    #[test]
    fn pending_challenge_blocks_reissue_until_expiry() {
        let (engine, _, clock) = engine();
        let mut record = record(&clock);

        engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap();
        let err = engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap_err();
        assert!(matches!(err, Fault::Conflict(catalog::CHALLENGE_PENDING)));

        // After the 240s TTL the slot is reusable.
        clock.advance(Duration::seconds(241));
        assert!(engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .is_ok());
    }

    #[test]
    fn live_authenticated_session_blocks_issue() {
        let (engine, tokens, clock) = engine();
        let mut record = record(&clock);
        record.auth.online_token = tokens
            .issue(
                TokenKind::Online,
                &OnlineClaims {
                    uid: record.uid.clone(),
                    email: record.email.clone(),
                    is_auth: true,
                    reason: None,
                },
            )
            .unwrap();

        let err = engine
            .issue(&mut record, ChallengeReason::ResetSystem)
            .unwrap_err();
        assert!(matches!(err, Fault::Conflict(catalog::SESSION_ACTIVE)));

        // Once the session token expires, a challenge may be issued again.
        clock.advance(Duration::seconds(61));
        assert!(engine
            .issue(&mut record, ChallengeReason::ResetSystem)
            .is_ok());
    }

    #[test]
    fn banned_account_cannot_be_challenged() {
        let (engine, _, clock) = engine();
        let mut record = record(&clock);
        record.info.is_banned = true;

        let err = engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap_err();
        assert!(matches!(err, Fault::Forbidden(_)));
    }

    #[test]
    fn wrong_code_leaves_the_challenge_pending() {
        let (engine, _, clock) = engine();
        let mut record = record(&clock);
        let issued = engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap();

        let wrong = if issued.code == "00000000" {
            "00000001"
        } else {
            "00000000"
        };
        let err = engine
            .validate(
                &mut record,
                ChallengeReason::ForgotPassword,
                "uid-1",
                "ada@example.com",
                wrong,
            )
            .unwrap_err();
        assert!(matches!(err, Fault::Unauthorized(catalog::BAD_CREDENTIALS)));
        assert_ne!(record.auth.challenge_token, NONE);
    }

    #[test]
    fn validate_consumes_exactly_once() {
        let (engine, tokens, clock) = engine();
        let mut record = record(&clock);
        let issued = engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap();

        let token = engine
            .validate(
                &mut record,
                ChallengeReason::ForgotPassword,
                "uid-1",
                "ada@example.com",
                &issued.code,
            )
            .unwrap();
        assert_eq!(record.auth.challenge_token, NONE);

        let claims: OnlineClaims = tokens.verify(TokenKind::Online, &token).unwrap();
        assert!(!claims.is_auth);
        assert_eq!(claims.reason.as_deref(), Some("FGPASS"));

        // Second attempt with the very same code: nothing pending anymore.
        let err = engine
            .validate(
                &mut record,
                ChallengeReason::ForgotPassword,
                "uid-1",
                "ada@example.com",
                &issued.code,
            )
            .unwrap_err();
        assert!(matches!(err, Fault::NotFound(_)));
    }

    #[test]
    fn expired_challenge_is_not_a_bad_challenge() {
        let (engine, _, clock) = engine();
        let mut record = record(&clock);
        let issued = engine
            .issue(&mut record, ChallengeReason::ResetSystem)
            .unwrap();

        clock.advance(Duration::seconds(241));
        let err = engine
            .validate(
                &mut record,
                ChallengeReason::ResetSystem,
                "uid-1",
                "ada@example.com",
                &issued.code,
            )
            .unwrap_err();
        assert!(matches!(err, Fault::Conflict(catalog::CHALLENGE_EXPIRED)));

        // A forged token is the security case and reads differently.
        record.auth.challenge_token = "forged.token.value".to_string();
        let err = engine
            .validate(
                &mut record,
                ChallengeReason::ResetSystem,
                "uid-1",
                "ada@example.com",
                &issued.code,
            )
            .unwrap_err();
        assert!(matches!(err, Fault::Unauthorized(catalog::BAD_CHALLENGE)));
    }

    #[test]
    fn reason_mismatch_is_a_credential_failure() {
        let (engine, _, clock) = engine();
        let mut record = record(&clock);
        let issued = engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap();

        let err = engine
            .validate(
                &mut record,
                ChallengeReason::ResetSystem,
                "uid-1",
                "ada@example.com",
                &issued.code,
            )
            .unwrap_err();
        assert!(matches!(err, Fault::Unauthorized(catalog::BAD_CREDENTIALS)));
    }

    #[test]
    fn rollback_clears_the_staged_token() {
        let (engine, _, clock) = engine();
        let mut record = record(&clock);
        engine
            .issue(&mut record, ChallengeReason::ForgotPassword)
            .unwrap();

        engine.rollback(&mut record);
        assert_eq!(record.auth.challenge_token, NONE);
    }
}
