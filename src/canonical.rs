//! Canonicalizer and signature codec.
//!
//! Two semantically identical documents must hash identically regardless of
//! field insertion order, so hashing input is always the canonical form:
//! compact JSON with object keys emitted in sorted order at every nesting
//! level. A record signature is the lowercase SHA-256 hex of the canonical
//! form with the `signature` field removed; a fingerprint signature
//! additionally excludes `createdAt`.
//!
//! All functions here are pure. Verification mismatches are reported as a
//! boolean, never an error: `true` from [`is_tampered`] is a
//! forbidden-access condition for the caller, not a soft warning.

use crate::model::{DeviceFingerprint, UserRecord};
use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};

const SIGNATURE_KEY: &str = "signature";
const CREATED_AT_KEY: &str = "createdAt";

/// Serialize a JSON value to its canonical form: compact, with object keys
/// sorted recursively.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Scalar encoding is delegated to serde_json so string
                // escaping stays spec-exact.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase SHA-256 hex of the canonical form of `value`.
#[must_use]
pub fn digest(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the signature a record should carry: the digest of its canonical
/// form with any prior `signature` removed.
///
/// # Errors
///
/// Returns an error if the record cannot be represented as JSON.
pub fn record_digest(record: &UserRecord) -> Result<String> {
    let mut value = serde_json::to_value(record).context("serialize record for signing")?;
    if let Some(map) = value.as_object_mut() {
        map.remove(SIGNATURE_KEY);
    }
    Ok(digest(&value))
}

/// Recompute and store the record's signature in place.
///
/// # Errors
///
/// Returns an error if the record cannot be represented as JSON.
pub fn sign_record(record: &mut UserRecord) -> Result<()> {
    record.signature = record_digest(record)?;
    Ok(())
}

/// `true` means the stored signature disagrees with the recomputed one and
/// the record must not be read, updated, or trusted for any decision beyond
/// reporting the tamper.
#[must_use]
pub fn is_tampered(record: &UserRecord) -> bool {
    match record_digest(record) {
        Ok(expected) => record.signature != expected,
        // A record that cannot be re-serialized cannot be verified either.
        Err(_) => true,
    }
}

///// Compute a fingerprint's own signature: digest of the canonical form
/// excluding `createdAt` and `signature`.
///
/// # Errors
///
/// Returns an error if the fingerprint cannot be represented as JSON.
pub fn fingerprint_digest(fingerprint: &DeviceFingerprint) -> Result<String> {
    let mut value =
        serde_json::to_value(fingerprint).context("serialize fingerprint for signing")?;
    if let Some(map) = value.as_object_mut() {
        map.remove(SIGNATURE_KEY);
        map.remove(CREATED_AT_KEY);
    }
    Ok(digest(&value))
}

/// `true` means the fingerprint's stored signature does not match its
/// attributes.
#[must_use]
pub fn fingerprint_tampered(fingerprint: &DeviceFingerprint) -> bool {
    match fingerprint_digest(fingerprint) {
        Ok(expected) => fingerprint.signature != expected,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceSlot, UserRecord};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample_record() -> UserRecord {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        UserRecord::new(
            "8f14e45f-ceea-4672-9b3a-654b5cf0bb1d".to_string(),
            "ada@example.com".to_string(),
            "Ada".to_string(),
            "Lovelace".to_string(),
            "England".to_string(),
            "sekrit".to_string(),
            "argon2-hash".to_string(),
            "203.0.113.7".to_string(),
            now,
        )
    }

    fn sample_fingerprint() -> DeviceFingerprint {
        DeviceFingerprint {
            bios: "AMI 2.17".to_string(),
            board: "B550M".to_string(),
            cpu: "3700X".to_string(),
            disk: "WD-1234".to_string(),
            os: "win11".to_string(),
            created_at: crate::model::none(),
            signature: crate::model::none(),
        }
    }

    #[test]
    fn canonical_json_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let b = json!({"a": {"y": [1, 2], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"y":[1,2],"z":true},"b":1}"#);
    }

    #[test]
    fn digest_is_stable_and_hex() {
        let value = json!({"k": "v"});
        let first = digest(&value);
        assert_eq!(first.len(), 64);
        assert_eq!(first, digest(&value));
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let mut record = sample_record();
        sign_record(&mut record).unwrap();
        assert!(!is_tampered(&record));
    }

    #[test]
    fn any_field_mutation_flips_verification() {
        let mut record = sample_record();
        sign_record(&mut record).unwrap();

        let mut banned = record.clone();
        banned.info.is_banned = true;
        assert!(is_tampered(&banned));

        let mut retoken = record.clone();
        retoken.auth.online_token = "forged".to_string();
        assert!(is_tampered(&retoken));

        // Single-character change in a leaf string.
        let mut renamed = record.clone();
        renamed.info.fname = "Adb".to_string();
        assert!(is_tampered(&renamed));

        // Signature itself altered.
        record.signature = format!("{}0", &record.signature[..63]);
        assert!(is_tampered(&record));
    }

    #[test]
    fn prior_signature_does_not_feed_the_hash() {
        let mut record = sample_record();
        sign_record(&mut record).unwrap();
        let first = record.signature.clone();

        // Re-signing an already signed record must be idempotent.
        sign_record(&mut record).unwrap();
        assert_eq!(record.signature, first);
    }

    #[test]
    fn fingerprint_digest_ignores_created_at_and_signature() {
        let mut fingerprint = sample_fingerprint();
        let unsigned = fingerprint_digest(&fingerprint).unwrap();

        fingerprint.created_at = "20240501T120000".to_string();
        fingerprint.signature = unsigned.clone();
        assert_eq!(fingerprint_digest(&fingerprint).unwrap(), unsigned);
        assert!(!fingerprint_tampered(&fingerprint));

        fingerprint.cpu = "5800X".to_string();
        assert!(fingerprint_tampered(&fingerprint));
    }

    #[test]
    fn record_digest_covers_the_device_chain() {
        let mut record = sample_record();
        sign_record(&mut record).unwrap();

        let mut fingerprint = sample_fingerprint();
        fingerprint.signature = fingerprint_digest(&fingerprint).unwrap();
        record.system.current = DeviceSlot::Bound(fingerprint);
        assert!(is_tampered(&record));

        sign_record(&mut record).unwrap();
        assert!(!is_tampered(&record));
    }
}
