//! Contact record model and its reserved attributes.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Result, VaultError};

/// A contact record: a JSON object keyed by attribute name.
pub type Record = Map<String, Value>;

/// Canonical sensitive attributes, in encryption order.
pub const SENSITIVE_FIELDS: [&str; 10] = [
    "phone",
    "email",
    "line",
    "twitter",
    "instagram",
    "facebook",
    "sns",
    "residence",
    "notes",
    "features",
];

/// Caller-assigned record identifier.
pub const ID_FIELD: &str = "id";
/// Marker: `true` when sensitive fields hold ciphertext.
pub const ENCRYPTED_MARKER: &str = "_encrypted";
/// Marker: the literal field list used when the record was encrypted.
pub const ENCRYPTED_FIELDS_MARKER: &str = "_encryptedFields";
/// RFC 3339 timestamp stamped on every save.
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// RFC 3339 timestamp stamped on records rewritten by key rotation.
pub const LAST_KEY_ROTATION_FIELD: &str = "_lastKeyRotation";

const BIRTHDAY_FIELD: &str = "birthday";
const AGE_FIELD: &str = "age";

/// Read the record's `id`.
pub fn record_id(record: &Record) -> Result<&str> {
    record
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(VaultError::MissingRecordId)
}

/// Whether the record carries the encryption marker.
pub fn is_encrypted(record: &Record) -> bool {
    matches!(record.get(ENCRYPTED_MARKER), Some(Value::Bool(true)))
}

/// The field list a marked record was encrypted with.
///
/// `Ok(None)` when the record is unmarked. A marked record whose list is
/// missing or not an array of strings is malformed.
pub fn encrypted_field_list(record: &Record) -> Result<Option<Vec<String>>> {
    if !is_encrypted(record) {
        return Ok(None);
    }
    match record.get(ENCRYPTED_FIELDS_MARKER) {
        // Older writers stamped the marker without a list
        None | Some(Value::Null) => Ok(Some(Vec::new())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    VaultError::DecodeFailure(format!(
                        "{ENCRYPTED_FIELDS_MARKER} contains a non-string entry"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => Err(VaultError::DecodeFailure(format!(
            "{ENCRYPTED_FIELDS_MARKER} must be an array, got {other}"
        ))),
    }
}

/// Remove both encryption markers.
pub fn strip_markers(record: &mut Record) {
    record.remove(ENCRYPTED_MARKER);
    record.remove(ENCRYPTED_FIELDS_MARKER);
}

/// Parse the record's `updatedAt` stamp.
pub fn updated_at(record: &Record) -> Option<DateTime<Utc>> {
    record
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Stamp an RFC 3339 timestamp into `field`.
pub fn stamp(record: &mut Record, field: &str, at: DateTime<Utc>) {
    record.insert(field.to_string(), Value::String(at.to_rfc3339()));
}

/// Sort records newest-first by `updatedAt`; unstamped records go last.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| updated_at(b).cmp(&updated_at(a)));
}

fn birthday_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4})[年/](\d{1,2})[月/](\d{1,2})").expect("birthday pattern is valid")
    })
}

/// Compute an age in whole years from a `YYYY/MM/DD` or `YYYY年MM月DD日` birthday.
pub fn age_from_birthday(birthday: &str, today: NaiveDate) -> Option<i32> {
    let caps = birthday_pattern().captures(birthday)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    // Reject impossible dates like 2020/13/40
    NaiveDate::from_ymd_opt(year, month, day)?;

    let mut age = today.year() - year;
    if (today.month(), today.day()) < (month, day) {
        age -= 1;
    }
    (age >= 0).then_some(age)
}

/// Fill `age` from `birthday` when the birthday parses; otherwise leave the record as is.
pub fn fill_age(record: &mut Record, today: NaiveDate) {
    let Some(age) = record
        .get(BIRTHDAY_FIELD)
        .and_then(Value::as_str)
        .and_then(|b| age_from_birthday(b, today))
    else {
        return;
    };
    record.insert(AGE_FIELD.to_string(), Value::String(age.to_string()));
}
