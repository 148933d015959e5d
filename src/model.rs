//! Wire-shape document types.
//!
//! These structs mirror the persisted JSON exactly (camelCase keys, `"N/A"`
//! sentinels) because the record signature is computed over that shape: a
//! field renamed here is a signature broken everywhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel for "no value" slots (tokens, timestamps, fingerprints).
pub const NONE: &str = "N/A";

#[must_use]
pub fn none() -> String {
    NONE.to_string()
}

/// `YYYYMMDDTHHmmss` timestamp used across all documents.
#[must_use]
pub fn stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%S").to_string()
}

/// `YYYYMMDD` calendar-day stamp used by the usage counters.
#[must_use]
pub fn day_stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d").to_string()
}

/// One account. The `signature` field is the SHA-256 of the canonical form
/// of everything else; see [`crate::canonical`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    pub email: String,
    pub info: Profile,
    pub auth: AuthState,
    pub system: SystemState,
    pub count: UsageCounters,
    #[serde(default = "none")]
    pub signature: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub fname: String,
    pub lname: String,
    pub country: String,
    /// Per-account random secret (SHA-256 hex of 32 random bytes).
    pub secret: String,
    /// Argon2 password hash.
    pub password: String,
    pub is_banned: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub app_installed: bool,
    pub online_token: String,
    pub offline_token: String,
    pub challenge_token: String,
    pub ip_address: String,
    pub last_login_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Device binding chain: the current fingerprint plus the one it replaced.
/// The invariant "history is always the prior current" is maintained by
/// [`crate::device::DeviceBindingEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub current: DeviceSlot,
    pub history: DeviceSlot,
    pub created_at: String,
    pub updated_at: String,
}

/// Signed snapshot of client hardware attributes. `signature` is the SHA-256
/// of the canonical form excluding `createdAt` and `signature` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    pub bios: String,
    pub board: String,
    pub cpu: String,
    pub disk: String,
    pub os: String,
    #[serde(default = "none")]
    pub created_at: String,
    #[serde(default = "none")]
    pub signature: String,
}

/// Either a bound [`DeviceFingerprint`] or the `"N/A"` sentinel, exactly as
/// stored on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DeviceSlot {
    #[default]
    Empty,
    Bound(DeviceFingerprint),
}

impl DeviceSlot {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, DeviceSlot::Empty)
    }

    #[must_use]
    pub fn as_bound(&self) -> Option<&DeviceFingerprint> {
        match self {
            DeviceSlot::Empty => None,
            DeviceSlot::Bound(fingerprint) => Some(fingerprint),
        }
    }
}

impl Serialize for DeviceSlot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DeviceSlot::Empty => serializer.serialize_str(NONE),
            DeviceSlot::Bound(fingerprint) => fingerprint.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DeviceSlot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(_) => Ok(DeviceSlot::Empty),
            other => DeviceFingerprint::deserialize(other)
                .map(DeviceSlot::Bound)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Per-action daily usage counters, valid only for the calendar day in
/// `countOf`; see [`crate::ratelimit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    pub login: i64,
    pub challenge: i64,
    pub validate: i64,
    pub password: i64,
    pub sys_reset: i64,
    pub sys_check: i64,
    pub details: i64,
    pub library: i64,
    pub count_of: String,
    pub updated_at: String,
}

impl UsageCounters {
    /// Fresh counters for today.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            login: 0,
            challenge: 0,
            validate: 0,
            password: 0,
            sys_reset: 0,
            sys_check: 0,
            details: 0,
            library: 0,
            count_of: day_stamp(now),
            updated_at: stamp(now),
        }
    }
}

/// Pre-provisioned allow-list entry in the `eligibles` collection, keyed by
/// the secret registration code handed to the buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub email: String,
    pub created_at: String,
}

/// Append-only audit history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub event: String,
    pub at: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ip: Option<String>,
}

/// Account-detail bundle sealed into a System token for the client; never
/// carries the password hash or the account secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    pub uid: String,
    pub email: String,
    pub fname: String,
    pub lname: String,
    pub country: String,
    pub created_at: String,
}

impl UserRecord {
    /// Build a freshly registered record. Tokens, login metadata, and the
    /// device chain all start at the sentinel; the caller signs and persists.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: String,
        email: String,
        fname: String,
        lname: String,
        country: String,
        secret: String,
        password_hash: String,
        ip: String,
        now: DateTime<Utc>,
    ) -> Self {
        let at = stamp(now);
        Self {
            uid,
            email,
            info: Profile {
                fname,
                lname,
                country,
                secret,
                password: password_hash,
                is_banned: false,
                created_at: at.clone(),
                updated_at: at.clone(),
            },
            auth: AuthState {
                app_installed: true,
                online_token: none(),
                offline_token: none(),
                challenge_token: none(),
                ip_address: ip,
                last_login_at: none(),
                created_at: at.clone(),
                updated_at: at.clone(),
            },
            system: SystemState {
                current: DeviceSlot::Empty,
                history: DeviceSlot::Empty,
                created_at: at.clone(),
                updated_at: at.clone(),
            },
            count: UsageCounters::new(now),
            signature: none(),
            created_at: at.clone(),
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_fingerprint() -> DeviceFingerprint {
        DeviceFingerprint {
            bios: "AMI 2.17".to_string(),
            board: "B550M".to_string(),
            cpu: "3700X".to_string(),
            disk: "WD-1234".to_string(),
            os: "win11".to_string(),
            created_at: "20240501T120000".to_string(),
            signature: "abc".to_string(),
        }
    }

    #[test]
    fn stamps_use_compact_format() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();
        assert_eq!(stamp(now), "20240501T090807");
        assert_eq!(day_stamp(now), "20240501");
    }

    #[test]
    fn device_slot_round_trips_sentinel() {
        let json = serde_json::to_value(DeviceSlot::Empty).unwrap();
        assert_eq!(json, serde_json::Value::String(NONE.to_string()));

        let back: DeviceSlot = serde_json::from_value(json).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn device_slot_round_trips_fingerprint() {
        let slot = DeviceSlot::Bound(sample_fingerprint());
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(json["cpu"], "3700X");

        let back: DeviceSlot = serde_json::from_value(json).unwrap();
        assert_eq!(back, slot);
    }

    #[test]
    fn new_record_starts_unbound_and_unbanned() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = UserRecord::new(
            "uid-1".to_string(),
            "a@example.com".to_string(),
            "Ada".to_string(),
            "Lovelace".to_string(),
            "England".to_string(),
            "secret".to_string(),
            "hash".to_string(),
            "127.0.0.1".to_string(),
            now,
        );

        assert!(!record.info.is_banned);
        assert_eq!(record.auth.online_token, NONE);
        assert_eq!(record.auth.offline_token, NONE);
        assert_eq!(record.auth.challenge_token, NONE);
        assert!(record.system.current.is_empty());
        assert_eq!(record.count.count_of, "20240501");
    }

    #[test]
    fn record_json_uses_camel_case_keys() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let record = UserRecord::new(
            "uid-1".to_string(),
            "a@example.com".to_string(),
            "Ada".to_string(),
            "Lovelace".to_string(),
            "England".to_string(),
            "secret".to_string(),
            "hash".to_string(),
            "127.0.0.1".to_string(),
            now,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["info"]["isBanned"].is_boolean());
        assert!(value["auth"]["onlineToken"].is_string());
        assert!(value["count"]["sysReset"].is_i64());
        assert!(value["createdAt"].is_string());
    }
}
