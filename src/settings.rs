//! Durable per-identity settings: rotation schedule, skip tracking, rotation
//! history, migration flag and reminder bookkeeping.
//!
//! Values live in the durable [`KeyValueStore`] as strings. A value that no
//! longer parses is treated as absent and logged.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::KeyValueStore;

pub const DEFAULT_KEY_PREFIX: &str = "cooper";

pub const DEFAULT_ROTATION_INTERVAL_DAYS: u32 = 90;
pub const MIN_ROTATION_INTERVAL_DAYS: u32 = 30;
pub const MAX_ROTATION_INTERVAL_DAYS: u32 = 365;

/// Consecutive declined rotations before the prompt becomes forced.
pub const FORCE_AFTER_SKIPS: u32 = 3;

/// Rotation history entries kept per identity.
pub const MAX_HISTORY_ENTRIES: usize = 10;

// ============================================================================
// StorageKeys
// ============================================================================

/// Names of every persisted entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    prefix: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl StorageKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn salt(&self, identity: &str) -> String {
        format!("salt_{identity}")
    }

    pub fn pending_salt(&self, identity: &str) -> String {
        format!("pending_salt_{identity}")
    }

    pub fn session_key(&self, identity: &str) -> String {
        format!("session_key_{identity}")
    }

    /// Salt of the signed-out device collection.
    pub fn device_salt(&self) -> String {
        "device_salt".to_string()
    }

    pub fn device_session_key(&self) -> String {
        "device_session_key".to_string()
    }

    pub fn migrated(&self, identity: &str) -> String {
        format!("encryption_migrated_{identity}")
    }

    pub fn last_rotation(&self, identity: &str) -> String {
        format!("{}_last_key_rotation_{identity}", self.prefix)
    }

    pub fn skip_count(&self, identity: &str) -> String {
        format!("{}_key_rotation_check_skipped_{identity}", self.prefix)
    }

    pub fn force_flag(&self, identity: &str) -> String {
        format!("{}_key_rotation_check_force_{identity}", self.prefix)
    }

    pub fn history(&self, identity: &str) -> String {
        format!("{}_key_rotation_history_{identity}", self.prefix)
    }

    /// Global, shared by every identity on this device.
    pub fn rotation_interval(&self) -> String {
        format!("{}_rotation_interval", self.prefix)
    }

    pub fn notification(&self, identity: &str) -> String {
        format!("{}_rotation_notification_{identity}", self.prefix)
    }
}

// ============================================================================
// Rotation history
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationMethod {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationHistoryEntry {
    pub date: DateTime<Utc>,
    pub user_id: String,
    pub method: RotationMethod,
}

/// Point-in-time view of an identity's rotation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSettings {
    pub interval_days: u32,
    pub last_rotation: Option<DateTime<Utc>>,
    pub skip_count: u32,
    pub forced: bool,
    pub history: Vec<RotationHistoryEntry>,
}

// ============================================================================
// SettingsStore
// ============================================================================

#[derive(Clone)]
pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    keys: StorageKeys,
}

impl SettingsStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
        Self { kv, keys }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    fn read_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(None);
        };
        match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!(key, "ignoring unparseable setting");
                Ok(None)
            }
        }
    }

    // -- interval --------------------------------------------------------

    pub fn interval_days(&self) -> Result<u32> {
        let stored: Option<u32> = self.read_parsed(&self.keys.rotation_interval())?;
        Ok(stored
            .filter(|d| is_valid_interval(*d))
            .unwrap_or(DEFAULT_ROTATION_INTERVAL_DAYS))
    }

    /// Persist a new interval. Out-of-range values are ignored and `false` is returned.
    pub fn set_interval_days(&self, days: u32) -> Result<bool> {
        if !is_valid_interval(days) {
            debug!(days, "rotation interval out of range, ignored");
            return Ok(false);
        }
        self.kv
            .set(&self.keys.rotation_interval(), &days.to_string())?;
        Ok(true)
    }

    // -- last rotation ---------------------------------------------------

    pub fn last_rotation(&self, identity: &str) -> Result<Option<DateTime<Utc>>> {
        let key = self.keys.last_rotation(identity);
        let Some(raw) = self.kv.get(&key)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(_) => {
                warn!(key, "ignoring unparseable rotation timestamp");
                Ok(None)
            }
        }
    }

    pub fn stamp_last_rotation(&self, identity: &str, at: DateTime<Utc>) -> Result<()> {
        self.kv
            .set(&self.keys.last_rotation(identity), &at.to_rfc3339())?;
        Ok(())
    }

    // -- skips and force flag --------------------------------------------

    pub fn skip_count(&self, identity: &str) -> Result<u32> {
        Ok(self
            .read_parsed(&self.keys.skip_count(identity))?
            .unwrap_or(0))
    }

    /// Count a declined rotation. Returns the new count; the force flag is
    /// raised once it reaches [`FORCE_AFTER_SKIPS`].
    pub fn record_skip(&self, identity: &str) -> Result<u32> {
        let count = self.skip_count(identity)?.saturating_add(1);
        self.kv
            .set(&self.keys.skip_count(identity), &count.to_string())?;
        if count >= FORCE_AFTER_SKIPS {
            self.kv.set(&self.keys.force_flag(identity), "true")?;
        }
        Ok(count)
    }

    pub fn is_forced(&self, identity: &str) -> Result<bool> {
        Ok(self.kv.get(&self.keys.force_flag(identity))?.as_deref() == Some("true"))
    }

    pub fn clear_skips(&self, identity: &str) -> Result<()> {
        self.kv.remove(&self.keys.skip_count(identity))?;
        self.kv.remove(&self.keys.force_flag(identity))?;
        Ok(())
    }

    // -- history ---------------------------------------------------------

    pub fn history(&self, identity: &str) -> Result<Vec<RotationHistoryEntry>> {
        let key = self.keys.history(identity);
        let Some(raw) = self.kv.get(&key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable rotation history");
                Ok(Vec::new())
            }
        }
    }

    /// Append an entry, dropping the oldest beyond [`MAX_HISTORY_ENTRIES`].
    pub fn push_history(
        &self,
        identity: &str,
        method: RotationMethod,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut history = self.history(identity)?;
        history.push(RotationHistoryEntry {
            date: at,
            user_id: identity.to_string(),
            method,
        });
        if history.len() > MAX_HISTORY_ENTRIES {
            let excess = history.len() - MAX_HISTORY_ENTRIES;
            history.drain(..excess);
        }
        self.kv
            .set(&self.keys.history(identity), &serde_json::to_string(&history)?)?;
        Ok(())
    }

    // -- migration -------------------------------------------------------

    pub fn is_migrated(&self, identity: &str) -> Result<bool> {
        Ok(self.kv.get(&self.keys.migrated(identity))?.as_deref() == Some("true"))
    }

    pub fn mark_migrated(&self, identity: &str) -> Result<()> {
        self.kv.set(&self.keys.migrated(identity), "true")?;
        Ok(())
    }

    // -- reminder --------------------------------------------------------

    pub fn last_notification(&self, identity: &str) -> Result<Option<NaiveDate>> {
        self.read_parsed(&self.keys.notification(identity))
    }

    pub fn set_last_notification(&self, identity: &str, day: NaiveDate) -> Result<()> {
        self.kv
            .set(&self.keys.notification(identity), &day.to_string())?;
        Ok(())
    }

    pub fn snapshot(&self, identity: &str) -> Result<RotationSettings> {
        Ok(RotationSettings {
            interval_days: self.interval_days()?,
            last_rotation: self.last_rotation(identity)?,
            skip_count: self.skip_count(identity)?,
            forced: self.is_forced(identity)?,
            history: self.history(identity)?,
        })
    }
}

fn is_valid_interval(days: u32) -> bool {
    (MIN_ROTATION_INTERVAL_DAYS..=MAX_ROTATION_INTERVAL_DAYS).contains(&days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;
    use chrono::TimeZone;

    fn store() -> (Arc<MemoryKeyValueStore>, SettingsStore) {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let settings = SettingsStore::new(kv.clone(), StorageKeys::default());
        (kv, settings)
    }

    #[test]
    fn persisted_key_names() {
        let keys = StorageKeys::default();
        assert_eq!(keys.salt("u1"), "salt_u1");
        assert_eq!(keys.last_rotation("u1"), "cooper_last_key_rotation_u1");
        assert_eq!(keys.skip_count("u1"), "cooper_key_rotation_check_skipped_u1");
        assert_eq!(keys.force_flag("u1"), "cooper_key_rotation_check_force_u1");
        assert_eq!(keys.history("u1"), "cooper_key_rotation_history_u1");
        assert_eq!(keys.rotation_interval(), "cooper_rotation_interval");
        assert_eq!(keys.migrated("u1"), "encryption_migrated_u1");
        assert_eq!(StorageKeys::new("acme").rotation_interval(), "acme_rotation_interval");
    }

    #[test]
    fn interval_bounds() {
        let (_, s) = store();
        assert_eq!(s.interval_days().unwrap(), 90);
        assert!(!s.set_interval_days(29).unwrap());
        assert!(!s.set_interval_days(366).unwrap());
        assert_eq!(s.interval_days().unwrap(), 90);
        assert!(s.set_interval_days(30).unwrap());
        assert!(s.set_interval_days(365).unwrap());
        assert_eq!(s.interval_days().unwrap(), 365);
    }

    #[test]
    fn out_of_range_stored_interval_falls_back() {
        let (kv, s) = store();
        kv.set("cooper_rotation_interval", "7").unwrap();
        assert_eq!(s.interval_days().unwrap(), 90);
        kv.set("cooper_rotation_interval", "abc").unwrap();
        assert_eq!(s.interval_days().unwrap(), 90);
    }

    #[test]
    fn third_skip_raises_force_flag() {
        let (_, s) = store();
        assert_eq!(s.record_skip("u1").unwrap(), 1);
        assert_eq!(s.record_skip("u1").unwrap(), 2);
        assert!(!s.is_forced("u1").unwrap());
        assert_eq!(s.record_skip("u1").unwrap(), 3);
        assert!(s.is_forced("u1").unwrap());

        s.clear_skips("u1").unwrap();
        assert_eq!(s.skip_count("u1").unwrap(), 0);
        assert!(!s.is_forced("u1").unwrap());
    }

    #[test]
    fn history_is_capped_oldest_first_out() {
        let (_, s) = store();
        for day in 1..=12 {
            let at = Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap();
            s.push_history("u1", RotationMethod::Automatic, at).unwrap();
        }
        let history = s.history("u1").unwrap();
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(
            history[0].date,
            Utc.with_ymd_and_hms(2025, 1, 3, 0, 0, 0).unwrap()
        );
        assert_eq!(history[9].user_id, "u1");
    }

    #[test]
    fn history_wire_format() {
        let (kv, s) = store();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        s.push_history("u1", RotationMethod::Manual, at).unwrap();
        let raw = kv.get("cooper_key_rotation_history_u1").unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed[0]["method"], "manual");
        assert_eq!(parsed[0]["userId"], "u1");
    }

    #[test]
    fn corrupt_timestamp_reads_as_absent() {
        let (kv, s) = store();
        kv.set("cooper_last_key_rotation_u1", "yesterday").unwrap();
        assert_eq!(s.last_rotation("u1").unwrap(), None);
    }

    #[test]
    fn migration_flag() {
        let (_, s) = store();
        assert!(!s.is_migrated("u1").unwrap());
        s.mark_migrated("u1").unwrap();
        assert!(s.is_migrated("u1").unwrap());
        assert!(!s.is_migrated("u2").unwrap());
    }
}
