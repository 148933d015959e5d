//! Session orchestrator: the only writer of user records.
//!
//! Every workflow follows the same shape. Load and integrity-check the
//! record, charge the per-action daily quota, run the domain logic, re-sign
//! and persist with a compare-and-swap on the previous signature. A charged
//! attempt is persisted even when the attempt itself fails afterwards;
//! tampered or missing records are never written back.

use crate::canonical::{is_tampered, sign_record};
use crate::catalog;
use crate::challenge::{ChallengeEngine, ChallengeReason};
use crate::clock::Clock;
use crate::device::{BindOutcome, DeviceBindingEngine};
use crate::error::Fault;
use crate::mail::{
    account_created_body, challenge_body, MailMessage, MailSender, ACCOUNT_SUBJECT,
    CHALLENGE_SUBJECT,
};
use crate::model::{none, stamp, AccountDetails, AuditEntry, DeviceFingerprint, UserRecord};
use crate::password::{hash_password, verify_password};
use crate::ratelimit::{check_and_increment, RateAction};
use crate::store::{Store, ELIGIBLES, USERS};
use crate::tokens::{
    DetailClaims, OfflineClaims, OnlineClaims, ProfileSnapshot, SystemClaims, TokenError,
    TokenKind, TokenService,
};
use anyhow::anyhow;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Registration request as submitted by the client.
#[derive(Debug, Clone)]
pub struct Registration {
    pub secret: String,
    pub email: String,
    pub fname: String,
    pub lname: String,
    pub country: String,
    pub password: String,
    pub ip: String,
}

#[derive(Debug)]
pub struct RegisteredAccount {
    pub uid: String,
}

/// Token pair handed out on a successful login.
#[derive(Debug)]
pub struct SessionTokens {
    pub online_token: String,
    pub offline_token: String,
}

/// Who a bearer token must prove to be.
enum Scope {
    /// A fully authenticated session (`isAuth` true).
    Authenticated,
    /// A recovery session minted by challenge validation, scoped to one
    /// recovery reason (`isAuth` false).
    Recovery(ChallengeReason),
}

pub struct Sessions {
    store: Arc<dyn Store>,
    mailer: Arc<dyn MailSender>,
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
    challenges: ChallengeEngine,
    devices: DeviceBindingEngine,
}

impl Sessions {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        mailer: Arc<dyn MailSender>,
        tokens: Arc<TokenService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            challenges: ChallengeEngine::new(tokens.clone(), clock.clone()),
            devices: DeviceBindingEngine::new(tokens.clone(), clock.clone()),
            store,
            mailer,
            tokens,
            clock,
        }
    }

    /// Create an account for a pre-provisioned eligible email.
    ///
    /// The eligibility entry is keyed by the secret registration code, so
    /// the submitted code must be the key under which the email was found.
    /// The record is persisted before the confirmation mail goes out; a
    /// delivery failure removes it again so a registration is only ever
    /// observable together with its mail.
    ///
    /// # Errors
    ///
    /// `NotFound` when not eligible, `Conflict` on email or uid collision,
    /// `Unavailable` when the confirmation mail could not be delivered.
    #[instrument(skip_all, fields(email = %registration.email))]
    pub async fn register(&self, registration: Registration) -> Result<RegisteredAccount, Fault> {
        let now = self.clock.now();

        let eligible = self
            .store
            .get_by_unique_field(ELIGIBLES, "email", &registration.email)
            .await
            .map_err(Fault::Internal)?;
        let Some((code, _)) = eligible else {
            return Err(Fault::NotFound(catalog::NOT_ELIGIBLE));
        };
        if !bool::from(code.as_bytes().ct_eq(registration.secret.as_bytes())) {
            return Err(Fault::NotFound(catalog::NOT_ELIGIBLE));
        }

        if self
            .store
            .get_by_unique_field(USERS, "email", &registration.email)
            .await
            .map_err(Fault::Internal)?
            .is_some()
        {
            return Err(Fault::Conflict(catalog::EMAIL_ALREADY_EXISTS));
        }

        let uid = Uuid::new_v4().to_string();
        if self
            .store
            .get_by_key(USERS, &uid)
            .await
            .map_err(Fault::Internal)?
            .is_some()
        {
            return Err(Fault::Conflict(catalog::UID_ALREADY_EXISTS));
        }

        let hash = hash_password(&registration.password).map_err(Fault::Internal)?;
        let mut record = UserRecord::new(
            uid.clone(),
            registration.email.clone(),
            registration.fname,
            registration.lname,
            registration.country,
            account_secret(),
            hash,
            registration.ip.clone(),
            now,
        );
        let mut prior = None;
        self.save(&mut record, &mut prior).await?;

        let message = MailMessage {
            to: registration.email.clone(),
            subject: ACCOUNT_SUBJECT.to_string(),
            body: account_created_body(&uid, &registration.email),
        };
        if let Err(err) = self.mailer.send(&message).await {
            warn!(uid = %uid, "account mail delivery failed: {err:#}");
            self.store
                .remove(USERS, &uid)
                .await
                .map_err(Fault::Internal)?;
            return Err(Fault::Unavailable(catalog::MAIL_FAILED));
        }

        self.store
            .remove(ELIGIBLES, &code)
            .await
            .map_err(Fault::Internal)?;
        self.audit(&uid, "register", Some(&registration.ip)).await;

        Ok(RegisteredAccount { uid })
    }

    /// Authenticate with uid, email, and password; hands out an Online and
    /// an Offline token and stamps the login metadata.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown email or a uid that does not belong to it,
    /// `Forbidden` on tamper or ban, `RateLimited` past the daily quota,
    /// `Unauthorized` on a wrong password.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn login(
        &self,
        uid: &str,
        email: &str,
        password: &str,
        ip: &str,
    ) -> Result<SessionTokens, Fault> {
        let found = self
            .store
            .get_by_unique_field(USERS, "email", email)
            .await
            .map_err(Fault::Internal)?;
        let Some((_, document)) = found else {
            return Err(Fault::NotFound(catalog::ACCOUNT_NOT_FOUND));
        };
        let mut record = decode_record(document)?;
        if record.uid != uid {
            return Err(Fault::NotFound(catalog::ACCOUNT_NOT_FOUND));
        }
        if is_tampered(&record) {
            return Err(Fault::Forbidden(catalog::TAMPERED_RECORD));
        }
        let mut prior = Some(record.signature.clone());

        self.charge(&mut record, &mut prior, RateAction::Login)
            .await?;

        match verify_password(password, &record.info.password) {
            Ok(true) => {}
            Ok(false) => {
                let fault = Fault::Unauthorized(catalog::BAD_CREDENTIALS);
                return Err(self.reject(&mut record, &mut prior, fault).await);
            }
            Err(err) => {
                return Err(self.reject(&mut record, &mut prior, Fault::Internal(err)).await);
            }
        }
        if record.info.is_banned {
            let fault = Fault::Forbidden(catalog::BANNED_ACCOUNT);
            return Err(self.reject(&mut record, &mut prior, fault).await);
        }

        let online = self.seal(
            TokenKind::Online,
            &OnlineClaims {
                uid: record.uid.clone(),
                email: record.email.clone(),
                is_auth: true,
                reason: None,
            },
        )?;
        let offline = self.seal(
            TokenKind::Offline,
            &OfflineClaims {
                uid: record.uid.clone(),
                email: record.email.clone(),
                profile: ProfileSnapshot {
                    fname: record.info.fname.clone(),
                    lname: record.info.lname.clone(),
                    country: record.info.country.clone(),
                },
            },
        )?;

        record.auth.online_token = online.clone();
        record.auth.offline_token = offline.clone();
        record.auth.ip_address = ip.to_string();
        let at = stamp(self.clock.now());
        record.auth.last_login_at = at.clone();
        record.auth.updated_at = at.clone();
        record.updated_at = at;

        self.save(&mut record, &mut prior).await?;
        self.audit(&record.uid, "login", Some(ip)).await;

        Ok(SessionTokens {
            online_token: online,
            offline_token: offline,
        })
    }

    /// Issue a one-time code for the given recovery reason and mail it to
    /// the account's address.
    ///
    /// # Errors
    ///
    /// `Conflict` on an unknown reason, a live session, or a pending
    /// challenge; `Unavailable` when the code mail could not be delivered
    /// (the staged challenge is rolled back first).
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn request_challenge(
        &self,
        uid: &str,
        email: &str,
        reason: &str,
        ip: &str,
    ) -> Result<(), Fault> {
        let Some(reason) = ChallengeReason::parse(reason) else {
            return Err(Fault::Conflict(catalog::BAD_CHALLENGE_TYPE));
        };

        let (mut record, mut prior) = self.load(uid).await?;
        if record.email != email {
            return Err(Fault::Unauthorized(catalog::BAD_CREDENTIALS));
        }

        self.charge(&mut record, &mut prior, RateAction::Challenge)
            .await?;

        let issued = match self.challenges.issue(&mut record, reason) {
            Ok(issued) => issued,
            Err(fault) => return Err(self.reject(&mut record, &mut prior, fault).await),
        };
        self.save(&mut record, &mut prior).await?;

        let message = MailMessage {
            to: record.email.clone(),
            subject: CHALLENGE_SUBJECT.to_string(),
            body: challenge_body(&issued.code, reason.mail_text()),
        };
        if let Err(err) = self.mailer.send(&message).await {
            warn!(uid = %uid, "challenge mail delivery failed: {err:#}");
            // An undeliverable code must not stay redeemable.
            self.challenges.rollback(&mut record);
            self.save(&mut record, &mut prior).await?;
            return Err(Fault::Unavailable(catalog::MAIL_FAILED));
        }

        self.audit(&record.uid, "challenge", Some(ip)).await;
        Ok(())
    }

    /// Redeem a mailed code; returns the recovery Online token scoped to
    /// the challenge reason.
    ///
    /// # Errors
    ///
    /// `Conflict` on an unknown reason or an expired challenge,
    /// `Unauthorized` on a forged token or mismatched code, `NotFound` when
    /// nothing is pending.
    #[instrument(skip_all, fields(uid = %uid))]
    pub async fn validate_challenge(
        &self,
        uid: &str,
        email: &str,
        reason: &str,
        code: &str,
        ip: &str,
    ) -> Result<String, Fault> {
        let Some(reason) = ChallengeReason::parse(reason) else {
            return Err(Fault::Conflict(catalog::BAD_CHALLENGE_TYPE));
        };

        let (mut record, mut prior) = self.load(uid).await?;
        if record.email != email {
            return Err(Fault::Unauthorized(catalog::BAD_CREDENTIALS));
        }

        self.charge(&mut record, &mut prior, RateAction::Validate)
            .await?;

        let token = match self
            .challenges
            .validate(&mut record, reason, uid, email, code)
        {
            Ok(token) => token,
            Err(fault) => return Err(self.reject(&mut record, &mut prior, fault).await),
        };

        self.save(&mut record, &mut prior).await?;
        self.audit(&record.uid, "validate", Some(ip)).await;
        Ok(token)
    }

    /// Replace the account password. Requires a FGPASS recovery principal;
    /// consumes the recovery session.
    ///
    /// # Errors
    ///
    /// Guard faults from [`Scope::Recovery`], `Conflict` when the new
    /// password equals the current one.
    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        bearer: &str,
        new_password: &str,
        ip: &str,
    ) -> Result<(), Fault> {
        let (mut record, mut prior) = self
            .principal(bearer, Scope::Recovery(ChallengeReason::ForgotPassword))
            .await?;

        self.charge(&mut record, &mut prior, RateAction::Password)
            .await?;

        match verify_password(new_password, &record.info.password) {
            Ok(true) => {
                let fault = Fault::Conflict(catalog::SAME_PASSWORD);
                return Err(self.reject(&mut record, &mut prior, fault).await);
            }
            Ok(false) => {}
            Err(err) => {
                return Err(self.reject(&mut record, &mut prior, Fault::Internal(err)).await);
            }
        }

        record.info.password = match hash_password(new_password) {
            Ok(hash) => hash,
            Err(err) => {
                return Err(self.reject(&mut record, &mut prior, Fault::Internal(err)).await);
            }
        };
        let at = stamp(self.clock.now());
        record.info.updated_at = at.clone();
        record.auth.online_token = none();
        record.auth.updated_at = at.clone();
        record.updated_at = at;

        self.save(&mut record, &mut prior).await?;
        self.audit(&record.uid, "password-reset", Some(ip)).await;
        Ok(())
    }

    /// Rebind the account to a new device during recovery. Requires a
    /// RSTSYS recovery principal and a System token sealing the new
    /// fingerprint. The recovery credential is left to age out on its own.
    ///
    /// # Errors
    ///
    /// Guard faults from [`Scope::Recovery`], `Conflict` on an expired
    /// System token or a fingerprint identical to the bound one,
    /// `Unauthorized` on a forged System token.
    #[instrument(skip_all)]
    pub async fn reset_system(
        &self,
        bearer: &str,
        system_token: &str,
        ip: &str,
    ) -> Result<(), Fault> {
        let (mut record, mut prior) = self
            .principal(bearer, Scope::Recovery(ChallengeReason::ResetSystem))
            .await?;

        self.charge(&mut record, &mut prior, RateAction::SysReset)
            .await?;

        let sealed = match self
            .tokens
            .verify::<SystemClaims>(TokenKind::System, system_token)
        {
            Ok(sealed) => sealed,
            Err(TokenError::Expired) => {
                let fault = Fault::Conflict(catalog::SYSTEM_TOKEN_EXPIRED);
                return Err(self.reject(&mut record, &mut prior, fault).await);
            }
            Err(_) => {
                let fault = Fault::Unauthorized(catalog::BAD_AUTHORIZATION);
                return Err(self.reject(&mut record, &mut prior, fault).await);
            }
        };
        if sealed.signature != sealed.system.signature {
            let fault = Fault::Forbidden(catalog::TAMPERED_SYSTEM);
            return Err(self.reject(&mut record, &mut prior, fault).await);
        }

        if let Err(fault) = self.devices.reset(&mut record, sealed.system) {
            return Err(self.reject(&mut record, &mut prior, fault).await);
        }

        self.save(&mut record, &mut prior).await?;
        self.audit(&record.uid, "system-reset", Some(ip)).await;
        Ok(())
    }

    /// Match a submitted fingerprint against the bound device: first bind,
    /// confirmation, or rotation. A rotation ends the current session, so
    /// the caller's bearer token is dead once this returns
    /// [`BindOutcome::Rotated`].
    ///
    /// # Errors
    ///
    /// Guard faults from [`Scope::Authenticated`], `Forbidden` on a forged
    /// fingerprint.
    #[instrument(skip_all)]
    pub async fn check_system(
        &self,
        bearer: &str,
        submitted: DeviceFingerprint,
        ip: &str,
    ) -> Result<BindOutcome, Fault> {
        let (mut record, mut prior) = self.principal(bearer, Scope::Authenticated).await?;

        self.charge(&mut record, &mut prior, RateAction::SysCheck)
            .await?;

        let outcome = match self.devices.check_or_bind(&mut record, submitted) {
            Ok(outcome) => outcome,
            Err(fault) => return Err(self.reject(&mut record, &mut prior, fault).await),
        };
        self.save(&mut record, &mut prior).await?;

        let event = match &outcome {
            BindOutcome::FirstBind => "device-bind",
            BindOutcome::Matched { .. } => "device-check",
            BindOutcome::Rotated => "device-rotated",
        };
        self.audit(&record.uid, event, Some(ip)).await;
        Ok(outcome)
    }

    /// Seal the account-detail bundle into a System token. The bundle
    /// never carries the password hash or the account secret.
    ///
    /// # Errors
    ///
    /// Guard faults from [`Scope::Authenticated`], `RateLimited` past the
    /// daily quota.
    #[instrument(skip_all)]
    pub async fn account_details(&self, bearer: &str) -> Result<String, Fault> {
        let (mut record, mut prior) = self.principal(bearer, Scope::Authenticated).await?;

        self.charge(&mut record, &mut prior, RateAction::Details)
            .await?;

        let details = AccountDetails {
            uid: record.uid.clone(),
            email: record.email.clone(),
            fname: record.info.fname.clone(),
            lname: record.info.lname.clone(),
            country: record.info.country.clone(),
            created_at: record.created_at.clone(),
        };
        let token = match self.seal(TokenKind::System, &DetailClaims { details }) {
            Ok(token) => token,
            Err(fault) => return Err(self.reject(&mut record, &mut prior, fault).await),
        };

        self.save(&mut record, &mut prior).await?;
        Ok(token)
    }

    /// End the session: clears the online and offline tokens.
    ///
    /// # Errors
    ///
    /// Guard faults from [`Scope::Authenticated`].
    #[instrument(skip_all)]
    pub async fn logout(&self, bearer: &str, ip: &str) -> Result<(), Fault> {
        let (mut record, mut prior) = self.principal(bearer, Scope::Authenticated).await?;

        record.auth.online_token = none();
        record.auth.offline_token = none();
        let at = stamp(self.clock.now());
        record.auth.updated_at = at.clone();
        record.updated_at = at;

        self.save(&mut record, &mut prior).await?;
        self.audit(&record.uid, "logout", Some(ip)).await;
        Ok(())
    }

    /// Resolve a bearer Online token into the record it belongs to.
    ///
    /// The token must be live, carry the expected scope, and be the very
    /// token stored on the record; the stored-token comparison makes each
    /// account a single-session account, so issuing a new token anywhere
    /// (login, rotation, recovery) cuts off the previous bearer.
    async fn principal(
        &self,
        bearer: &str,
        scope: Scope,
    ) -> Result<(UserRecord, Option<String>), Fault> {
        let claims = self
            .tokens
            .verify::<OnlineClaims>(TokenKind::Online, bearer)
            .map_err(|err| match err {
                TokenError::Expired => Fault::Unauthorized(catalog::SESSION_EXPIRED),
                _ => Fault::Unauthorized(catalog::BAD_AUTHORIZATION),
            })?;

        match scope {
            Scope::Authenticated => {
                if !claims.is_auth {
                    return Err(Fault::Forbidden(catalog::INSUFFICIENT_PRIVILEGES));
                }
            }
            Scope::Recovery(reason) => {
                if claims.is_auth || claims.reason.as_deref() != Some(reason.as_str()) {
                    return Err(Fault::Forbidden(catalog::INSUFFICIENT_PRIVILEGES));
                }
            }
        }

        let (record, prior) = self.load(&claims.uid).await?;
        if record.info.is_banned {
            return Err(Fault::Forbidden(catalog::BANNED_ACCOUNT));
        }
        if !bool::from(
            bearer
                .as_bytes()
                .ct_eq(record.auth.online_token.as_bytes()),
        ) {
            return Err(Fault::Unauthorized(catalog::ACCESS_DENIED));
        }

        Ok((record, prior))
    }

    /// Load a record by uid and refuse tampered ones before anything can
    /// act on them.
    async fn load(&self, uid: &str) -> Result<(UserRecord, Option<String>), Fault> {
        let Some(document) = self
            .store
            .get_by_key(USERS, uid)
            .await
            .map_err(Fault::Internal)?
        else {
            return Err(Fault::NotFound(catalog::ACCOUNT_NOT_FOUND));
        };
        let record = decode_record(document)?;
        if is_tampered(&record) {
            return Err(Fault::Forbidden(catalog::TAMPERED_RECORD));
        }
        let prior = Some(record.signature.clone());
        Ok((record, prior))
    }

    /// Re-sign and persist. With a prior signature the write is a
    /// compare-and-swap; a lost race surfaces as `Conflict` and is never
    /// silently retried.
    async fn save(
        &self,
        record: &mut UserRecord,
        prior: &mut Option<String>,
    ) -> Result<(), Fault> {
        sign_record(record).map_err(Fault::Internal)?;
        let document = serde_json::to_value(&record)
            .map_err(|err| Fault::Internal(anyhow!("serialize record: {err}")))?;

        match prior.as_deref() {
            Some(expected) => {
                let stored = self
                    .store
                    .upsert_checked(USERS, &record.uid, &document, expected)
                    .await
                    .map_err(Fault::Internal)?;
                if !stored {
                    return Err(Fault::Conflict(catalog::CONCURRENT_UPDATE));
                }
            }
            None => {
                self.store
                    .upsert(USERS, &record.uid, &document)
                    .await
                    .map_err(Fault::Internal)?;
            }
        }

        *prior = Some(record.signature.clone());
        Ok(())
    }

    /// Charge the daily quota for an attempt. A denied attempt is still a
    /// counter mutation and is persisted on the spot.
    async fn charge(
        &self,
        record: &mut UserRecord,
        prior: &mut Option<String>,
        action: RateAction,
    ) -> Result<(), Fault> {
        let (allowed, counters) =
            check_and_increment(record.count.clone(), action, self.clock.now());
        record.count = counters;
        if allowed {
            return Ok(());
        }
        self.save(record, prior).await?;
        Err(Fault::RateLimited(catalog::TOO_MANY_REQUESTS))
    }

    /// Persist the record (charged counters included) and hand the fault
    /// back. A save failure trumps the original fault.
    async fn reject(
        &self,
        record: &mut UserRecord,
        prior: &mut Option<String>,
        fault: Fault,
    ) -> Fault {
        match self.save(record, prior).await {
            Ok(()) => fault,
            Err(save_fault) => save_fault,
        }
    }

    fn seal<T: Serialize>(&self, kind: TokenKind, claims: &T) -> Result<String, Fault> {
        self.tokens
            .issue(kind, claims)
            .map_err(|err| Fault::Internal(anyhow!(err)))
    }

    /// Append an audit entry. Best effort; the workflow already succeeded.
    async fn audit(&self, uid: &str, event: &str, ip: Option<&str>) {
        let entry = AuditEntry {
            event: event.to_string(),
            at: stamp(self.clock.now()),
            ip: ip.map(ToString::to_string),
        };
        let Ok(value) = serde_json::to_value(&entry) else {
            return;
        };
        if let Err(err) = self.store.push(USERS, uid, &value).await {
            warn!(uid = %uid, event = %event, "audit push failed: {err:#}");
        }
    }
}

fn decode_record(document: serde_json::Value) -> Result<UserRecord, Fault> {
    serde_json::from_value(document)
        .map_err(|err| Fault::Internal(anyhow!("malformed stored record: {err}")))
}

/// Random per-account secret: SHA-256 hex over 32 random bytes.
fn account_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(Sha256::digest(bytes))
}
