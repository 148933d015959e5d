//! Device fingerprint binding and rotation.
//!
//! Each account carries at most two fingerprints: `system.current` (the
//! device the account is bound to) and `system.history` (the one it
//! replaced). Rotation always shifts current into history, so the chain
//! never grows past depth two and history is always the prior current.

use crate::canonical::{fingerprint_digest, fingerprint_tampered};
use crate::catalog;
use crate::clock::Clock;
use crate::error::Fault;
use crate::model::{stamp, DeviceFingerprint, DeviceSlot, UserRecord};
use crate::tokens::{SystemClaims, TokenKind, TokenService};
use anyhow::anyhow;
use std::sync::Arc;

/// Result of matching a submitted fingerprint against the bound one.
#[derive(Debug)]
pub enum BindOutcome {
    /// No device was bound yet; the submitted one is now current.
    FirstBind,
    /// Submitted fingerprint matches the bound device. The token proves
    /// the match to callers that need it later (account detail lookups).
    Matched { system_token: String },
    /// Submitted fingerprint differs: the old device moved to history, the
    /// new one is current, and the online session was invalidated.
    Rotated,
}

pub struct DeviceBindingEngine {
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
}

impl DeviceBindingEngine {
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, clock: Arc<dyn Clock>) -> Self {
        Self { tokens, clock }
    }

    /// Compare the submitted fingerprint with the bound one and bind,
    /// confirm, or rotate accordingly. A rotation clears the online token
    /// so a session started on the old device cannot survive onto the new
    /// one.
    ///
    /// # Errors
    ///
    /// `Forbidden` when the submitted or stored fingerprint fails its own
    /// signature check.
    pub fn check_or_bind(
        &self,
        record: &mut UserRecord,
        submitted: DeviceFingerprint,
    ) -> Result<BindOutcome, Fault> {
        let submitted = self.admit(submitted)?;

        let Some(current) = record.system.current.as_bound() else {
            record.system.current = DeviceSlot::Bound(submitted);
            self.touch(record);
            return Ok(BindOutcome::FirstBind);
        };

        if fingerprint_tampered(current) {
            return Err(Fault::Forbidden(catalog::TAMPERED_SYSTEM));
        }

        if current.signature == submitted.signature {
            let claims = SystemClaims {
                signature: current.signature.clone(),
                system: current.clone(),
            };
            let system_token = self
                .tokens
                .issue(TokenKind::System, &claims)
                .map_err(|err| Fault::Internal(anyhow!(err)))?;
            return Ok(BindOutcome::Matched { system_token });
        }

        record.system.history = record.system.current.clone();
        record.system.current = DeviceSlot::Bound(submitted);
        record.auth.online_token = crate::model::none();
        self.touch(record);

        Ok(BindOutcome::Rotated)
    }

    /// Forced rotation during account recovery. Unlike `check_or_bind`
    /// this refuses a fingerprint identical to the bound one, since a
    /// recovery to the same device is a no-op that should be reported.
    ///
    /// # Errors
    ///
    /// `Forbidden` on fingerprint tamper, `Conflict` when the submitted
    /// device is the one already bound.
    pub fn reset(
        &self,
        record: &mut UserRecord,
        submitted: DeviceFingerprint,
    ) -> Result<(), Fault> {
        let submitted = self.admit(submitted)?;

        if let Some(current) = record.system.current.as_bound() {
            if fingerprint_tampered(current) {
                return Err(Fault::Forbidden(catalog::TAMPERED_SYSTEM));
            }
            if current.signature == submitted.signature {
                return Err(Fault::Conflict(catalog::SAME_SYSTEM));
            }
        }

        record.system.history = record.system.current.clone();
        record.system.current = DeviceSlot::Bound(submitted);
        self.touch(record);

        Ok(())
    }

    /// Integrity-check a client-submitted fingerprint and stamp its bind
    /// time. The signature covers only the hardware attributes, so the
    /// server-side stamp does not invalidate it.
    fn admit(&self, mut submitted: DeviceFingerprint) -> Result<DeviceFingerprint, Fault> {
        if fingerprint_tampered(&submitted) {
            return Err(Fault::Forbidden(catalog::TAMPERED_SYSTEM));
        }
        submitted.created_at = stamp(self.clock.now());
        Ok(submitted)
    }

    fn touch(&self, record: &mut UserRecord) {
        let at = stamp(self.clock.now());
        record.system.updated_at = at.clone();
        record.updated_at = at;
    }
}

/// Build a signed fingerprint from raw hardware attributes. Production
/// clients sign on their side; the server and the tests use this to produce
/// fingerprints that pass admission.
///
/// # Errors
///
/// Returns an error if the attributes cannot be represented as JSON.
pub fn signed_fingerprint(
    bios: &str,
    board: &str,
    cpu: &str,
    disk: &str,
    os: &str,
) -> anyhow::Result<DeviceFingerprint> {
    let mut fingerprint = DeviceFingerprint {
        bios: bios.to_string(),
        board: board.to_string(),
        cpu: cpu.to_string(),
        disk: disk.to_string(),
        os: os.to_string(),
        created_at: crate::model::none(),
        signature: crate::model::none(),
    };
    fingerprint.signature = fingerprint_digest(&fingerprint)?;
    Ok(fingerprint)
}
