//! Metadata-as-attributes encoding for S3 objects
//!
//! A metadata record is stored as S3 user metadata: a string-keyed map
//! of decimal numbers. Times are milliseconds since the Unix epoch and
//! `mode` carries the full `st_mode` (type and permission bits).

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::connector::Metadata;
use crate::error::AdapterError;

pub const MODE_KEY: &str = "mode";
pub const SIZE_KEY: &str = "size";
pub const ATIME_KEY: &str = "atime";
pub const MTIME_KEY: &str = "mtime";
pub const CTIME_KEY: &str = "ctime";
pub const BIRTHTIME_KEY: &str = "birthtime";
pub const UID_KEY: &str = "uid";
pub const GID_KEY: &str = "gid";

const KNOWN_KEYS: [&str; 8] = [
    MODE_KEY,
    SIZE_KEY,
    ATIME_KEY,
    MTIME_KEY,
    CTIME_KEY,
    BIRTHTIME_KEY,
    UID_KEY,
    GID_KEY,
];

fn to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

/// Serialize a metadata record into user-metadata attributes
pub fn encode(meta: &Metadata) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    attrs.insert(MODE_KEY.to_string(), meta.st_mode().to_string());
    attrs.insert(SIZE_KEY.to_string(), meta.size.to_string());
    attrs.insert(ATIME_KEY.to_string(), to_millis(meta.atime).to_string());
    attrs.insert(MTIME_KEY.to_string(), to_millis(meta.mtime).to_string());
    attrs.insert(CTIME_KEY.to_string(), to_millis(meta.ctime).to_string());
    attrs.insert(BIRTHTIME_KEY.to_string(), to_millis(meta.birthtime).to_string());
    attrs.insert(UID_KEY.to_string(), meta.uid.to_string());
    attrs.insert(GID_KEY.to_string(), meta.gid.to_string());
    attrs
}

/// Attributes for a server-side copy, which sets LastModified to `now`
///
/// The copy keeps every field but the modification and change times, so
/// the record still passes `verify` against the new object.
pub fn restamp(meta: &Metadata, now: SystemTime) -> HashMap<String, String> {
    let mut meta = meta.clone();
    meta.mtime = now;
    meta.ctime = now;
    encode(&meta)
}

fn field(attrs: &HashMap<String, String>, key: &str) -> Result<Option<u64>, AdapterError> {
    match attrs.get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            AdapterError::bad_message(format!("Attribute {} is not a number: {:?}", key, raw))
        }),
    }
}

fn required(attrs: &HashMap<String, String>, key: &str) -> Result<u64, AdapterError> {
    field(attrs, key)?
        .ok_or_else(|| AdapterError::bad_message(format!("Attribute {} is missing", key)))
}

/// Parse attributes back into a metadata record
///
/// Returns `Ok(None)` when the object carries none of the known keys,
/// i.e. it was written by some other client.
pub fn decode(attrs: &HashMap<String, String>) -> Result<Option<Metadata>, AdapterError> {
    if !KNOWN_KEYS.iter().any(|k| attrs.contains_key(*k)) {
        return Ok(None);
    }

    let st_mode = u32::try_from(required(attrs, MODE_KEY)?)
        .map_err(|_| AdapterError::bad_message("Attribute mode out of range"))?;
    let (file_type, mode) = Metadata::split_st_mode(st_mode);
    let size = required(attrs, SIZE_KEY)?;
    let mtime = from_millis(required(attrs, MTIME_KEY)?);
    let time_or_mtime = |key: &str| -> Result<SystemTime, AdapterError> {
        Ok(field(attrs, key)?.map(from_millis).unwrap_or(mtime))
    };
    let id = |key: &str| -> Result<u32, AdapterError> {
        let value = field(attrs, key)?.unwrap_or(0);
        u32::try_from(value)
            .map_err(|_| AdapterError::bad_message(format!("Attribute {} out of range", key)))
    };

    Ok(Some(Metadata {
        file_type,
        mode,
        size,
        atime: time_or_mtime(ATIME_KEY)?,
        mtime,
        ctime: time_or_mtime(CTIME_KEY)?,
        birthtime: time_or_mtime(BIRTHTIME_KEY)?,
        uid: id(UID_KEY)?,
        gid: id(GID_KEY)?,
    }))
}

/// Check a decoded record against what the object actually is
///
/// A size that disagrees with the transferred length, or an mtime further
/// than `tolerance` from the object's own modification time, means the
/// attributes no longer describe the object.
pub fn verify(
    meta: &Metadata,
    actual_len: u64,
    last_modified: Option<SystemTime>,
    tolerance: Duration,
) -> Result<(), AdapterError> {
    if meta.is_file() && meta.size != actual_len {
        return Err(AdapterError::bad_message(format!(
            "Declared size {} does not match object length {}",
            meta.size, actual_len
        )));
    }

    if let Some(actual) = last_modified {
        let drift = match actual.duration_since(meta.mtime) {
            Ok(d) => d,
            Err(e) => e.duration(),
        };
        if drift > tolerance {
            return Err(AdapterError::bad_message(format!(
                "Declared mtime differs from object modification time by {:?}",
                drift
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FileType;
    use crate::error::ErrorCode;

    fn sample() -> Metadata {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let mut meta = Metadata::file(42, t).with_mode(0o640);
        meta.uid = 1000;
        meta.gid = 100;
        meta
    }

    #[test]
    fn test_encode_decode() {
        let meta = sample();
        let attrs = encode(&meta);
        assert_eq!(attrs.get(SIZE_KEY).unwrap(), "42");
        assert_eq!(attrs.get(MTIME_KEY).unwrap(), "1700000000123");
        assert_eq!(decode(&attrs).unwrap(), Some(meta));
    }

    #[test]
    fn test_directory_type_survives() {
        let meta = Metadata::directory(UNIX_EPOCH).with_mode(0o700);
        let decoded = decode(&encode(&meta)).unwrap().unwrap();
        assert_eq!(decoded.file_type, FileType::Directory);
        assert_eq!(decoded.mode, 0o700);
    }

    #[test]
    fn test_foreign_object_has_no_record() {
        let mut attrs = HashMap::new();
        attrs.insert("content-owner".to_string(), "someone".to_string());
        assert_eq!(decode(&attrs).unwrap(), None);
    }

    #[test]
    fn test_non_numeric_field_is_bad_message() {
        let mut attrs = encode(&sample());
        attrs.insert(SIZE_KEY.to_string(), "forty-two".to_string());
        assert_eq!(decode(&attrs).unwrap_err().code, ErrorCode::BadMessage);
    }

    #[test]
    fn test_partial_record_defaults_times_to_mtime() {
        let mut attrs = HashMap::new();
        attrs.insert(MODE_KEY.to_string(), (libc::S_IFREG as u32 | 0o600).to_string());
        attrs.insert(SIZE_KEY.to_string(), "3".to_string());
        attrs.insert(MTIME_KEY.to_string(), "5000".to_string());
        let meta = decode(&attrs).unwrap().unwrap();
        assert_eq!(meta.atime, UNIX_EPOCH + Duration::from_secs(5));
        assert_eq!(meta.uid, 0);
    }

    #[test]
    fn test_restamp_follows_copy_time() {
        let meta = sample();
        let copied_at = meta.mtime + Duration::from_secs(60);

        // Attributes carried over unchanged no longer match the copy
        let stale = decode(&encode(&meta)).unwrap().unwrap();
        let err = verify(&stale, 42, Some(copied_at), Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadMessage);

        let fresh = decode(&restamp(&meta, copied_at)).unwrap().unwrap();
        assert!(verify(&fresh, 42, Some(copied_at), Duration::from_secs(5)).is_ok());
        assert_eq!(fresh.mtime, copied_at);
        assert_eq!(fresh.ctime, copied_at);
        assert_eq!(fresh.birthtime, meta.birthtime);
        assert_eq!(fresh.mode, 0o640);
        assert_eq!(fresh.uid, 1000);
    }

    #[test]
    fn test_verify_size_mismatch() {
        let meta = sample();
        let err = verify(&meta, 41, None, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadMessage);
        assert!(verify(&meta, 42, None, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_verify_mtime_mismatch() {
        let meta = sample();
        let close = meta.mtime + Duration::from_secs(2);
        let far = meta.mtime + Duration::from_secs(3600);
        assert!(verify(&meta, 42, Some(close), Duration::from_secs(5)).is_ok());
        let err = verify(&meta, 42, Some(far), Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadMessage);
        // Drift in the other direction counts too
        let early = meta.mtime - Duration::from_secs(3600);
        assert!(verify(&meta, 42, Some(early), Duration::from_secs(5)).is_err());
    }
}
