//! Hit/miss decisions for stored entries.
//!
//! Checks run in a fixed precedence order:
//!
//! 1. no stored entry → `NoEntry`
//! 2. forced refresh → `ForcedRefresh`
//! 3. item count differs → `CountChanged`
//! 4. same checksums in a different order → `OrderChanged`
//! 5. checksum content differs → `ChecksumMismatch` (with the changed item ids)
//! 6. entry older than the configured maximum age → `Expired`
//! 7. otherwise the entry is valid

use super::entry::CacheEntry;
use super::key::CacheKey;
use crate::checksum::ChecksumRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidationReason {
    NoEntry,
    ChecksumMismatch,
    CountChanged,
    OrderChanged,
    Expired,
    ForcedRefresh,
}

impl InvalidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEntry => "NO_ENTRY",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::CountChanged => "COUNT_CHANGED",
            Self::OrderChanged => "ORDER_CHANGED",
            Self::Expired => "EXPIRED",
            Self::ForcedRefresh => "FORCED_REFRESH",
        }
    }
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating a stored entry against the current items.
///
/// Exactly one of `cached_result` and `invalidation_reason` is set.
/// `entry_id` names the stored entry that was examined, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheValidationOutcome {
    pub is_valid: bool,
    pub cached_result: Option<serde_json::Value>,
    pub entry_id: Option<String>,
    pub invalidation_reason: Option<InvalidationReason>,
    pub changed_item_ids: Vec<String>,
}

impl CacheValidationOutcome {
    fn hit(entry: &CacheEntry) -> Self {
        Self {
            is_valid: true,
            cached_result: Some(entry.result.clone()),
            entry_id: Some(entry.id.clone()),
            invalidation_reason: None,
            changed_item_ids: Vec::new(),
        }
    }

    fn miss(entry: Option<&CacheEntry>, reason: InvalidationReason) -> Self {
        Self {
            is_valid: false,
            cached_result: None,
            entry_id: entry.map(|e| e.id.clone()),
            invalidation_reason: Some(reason),
            changed_item_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheValidator {
    max_age: Option<Duration>,
}

impl CacheValidator {
    pub fn new() -> Self {
        Self { max_age: None }
    }

    /// Enables `Expired` for entries older than `max_age`.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn evaluate(
        &self,
        entry: Option<&CacheEntry>,
        key: &CacheKey,
        current: &[ChecksumRecord],
        force_refresh: bool,
        now_ms: u64,
    ) -> CacheValidationOutcome {
        let Some(entry) = entry else {
            return CacheValidationOutcome::miss(None, InvalidationReason::NoEntry);
        };
        if force_refresh {
            return CacheValidationOutcome::miss(Some(entry), InvalidationReason::ForcedRefresh);
        }
        if entry.item_count() != current.len() {
            return CacheValidationOutcome::miss(Some(entry), InvalidationReason::CountChanged);
        }

        let stored: Vec<&str> = entry.item_checksums.iter().map(|r| r.checksum.as_str()).collect();
        let fresh: Vec<&str> = current.iter().map(|r| r.checksum.as_str()).collect();

        if stored != fresh && same_multiset(&stored, &fresh) {
            return CacheValidationOutcome::miss(Some(entry), InvalidationReason::OrderChanged);
        }
        if stored != fresh || entry.combined_checksum != key.combined_checksum {
            let mut outcome =
                CacheValidationOutcome::miss(Some(entry), InvalidationReason::ChecksumMismatch);
            outcome.changed_item_ids = changed_items(&entry.item_checksums, current);
            return outcome;
        }
        if let Some(max_age) = self.max_age {
            if u128::from(entry.age_ms(now_ms)) > max_age.as_millis() {
                return CacheValidationOutcome::miss(Some(entry), InvalidationReason::Expired);
            }
        }
        CacheValidationOutcome::hit(entry)
    }
}

fn same_multiset(a: &[&str], b: &[&str]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Ids of current items that are new or whose checksum differs from the stored one.
fn changed_items(stored: &[ChecksumRecord], current: &[ChecksumRecord]) -> Vec<String> {
    let previous: HashMap<&str, &str> = stored
        .iter()
        .map(|r| (r.item_id.as_str(), r.checksum.as_str()))
        .collect();
    current
        .iter()
        .filter(|r| previous.get(r.item_id.as_str()) != Some(&r.checksum.as_str()))
        .map(|r| r.item_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKeyBuilder;
    use serde_json::json;

    fn rec(id: &str, checksum: &str) -> ChecksumRecord {
        ChecksumRecord {
            item_id: id.into(),
            checksum: checksum.into(),
            source_url: format!("mem://{}", id),
            generated_at: 0,
        }
    }

    fn stored(items: Vec<ChecksumRecord>, created_at: u64) -> (CacheEntry, CacheKeyBuilder) {
        let builder = CacheKeyBuilder::new();
        let key = builder.build("A", &items);
        (
            CacheEntry::new(&key, items, json!({"verdict": "ok"}), created_at),
            builder,
        )
    }

    fn check(
        validator: &CacheValidator,
        entry: Option<&CacheEntry>,
        current: &[ChecksumRecord],
        force: bool,
        now: u64,
    ) -> CacheValidationOutcome {
        let key = CacheKeyBuilder::new().build("A", current);
        validator.evaluate(entry, &key, current, force, now)
    }

    #[test]
    fn test_no_entry() {
        let out = check(&CacheValidator::new(), None, &[rec("img1", "x")], true, 0);
        assert!(!out.is_valid);
        assert_eq!(out.invalidation_reason, Some(InvalidationReason::NoEntry));
        assert!(out.entry_id.is_none());
    }

    #[test]
    fn test_valid_hit_returns_result() {
        let items = vec![rec("img1", "x"), rec("img2", "y")];
        let (entry, _) = stored(items.clone(), 0);
        let out = check(&CacheValidator::new(), Some(&entry), &items, false, 5);
        assert!(out.is_valid);
        assert_eq!(out.cached_result, Some(json!({"verdict": "ok"})));
        assert_eq!(out.entry_id.as_deref(), Some(entry.id.as_str()));
        assert!(out.invalidation_reason.is_none());
    }

    #[test]
    fn test_forced_refresh_beats_everything_but_no_entry() {
        let items = vec![rec("img1", "x")];
        let (entry, _) = stored(items, 0);
        let out = check(
            &CacheValidator::new(),
            Some(&entry),
            &[rec("img1", "x"), rec("img2", "y")],
            true,
            0,
        );
        assert_eq!(out.invalidation_reason, Some(InvalidationReason::ForcedRefresh));
        assert!(out.cached_result.is_none());
    }

    #[test]
    fn test_count_changed() {
        let (entry, _) = stored(vec![rec("img1", "x")], 0);
        let out = check(
            &CacheValidator::new(),
            Some(&entry),
            &[rec("img1", "x"), rec("img2", "y")],
            false,
            0,
        );
        assert_eq!(out.invalidation_reason, Some(InvalidationReason::CountChanged));
    }

    #[test]
    fn test_reorder_is_order_changed_not_mismatch() {
        let (entry, _) = stored(vec![rec("img1", "x"), rec("img2", "y")], 0);
        let out = check(
            &CacheValidator::new(),
            Some(&entry),
            &[rec("img2", "y"), rec("img1", "x")],
            false,
            0,
        );
        assert_eq!(out.invalidation_reason, Some(InvalidationReason::OrderChanged));
        assert!(out.changed_item_ids.is_empty());
    }

    #[test]
    fn test_single_item_edit_is_mismatch_with_that_id() {
        let (entry, _) = stored(vec![rec("img1", "x"), rec("img2", "y")], 0);
        let out = check(
            &CacheValidator::new(),
            Some(&entry),
            &[rec("img1", "x"), rec("img2", "y2")],
            false,
            0,
        );
        assert_eq!(out.invalidation_reason, Some(InvalidationReason::ChecksumMismatch));
        assert_eq!(out.changed_item_ids, vec!["img2".to_string()]);
    }

    #[test]
    fn test_expiry_only_when_configured() {
        let items = vec![rec("img1", "x")];
        let (entry, _) = stored(items.clone(), 0);
        let hour = 3_600_000;

        let no_ttl = check(&CacheValidator::new(), Some(&entry), &items, false, 10 * hour);
        assert!(no_ttl.is_valid);

        let ttl = CacheValidator::new().with_max_age(Some(Duration::from_secs(3600)));
        assert!(check(&ttl, Some(&entry), &items, false, hour).is_valid);
        let expired = check(&ttl, Some(&entry), &items, false, hour + 1);
        assert_eq!(expired.invalidation_reason, Some(InvalidationReason::Expired));
    }

    #[test]
    fn test_reason_serializes_as_screaming_snake() {
        let s = serde_json::to_string(&InvalidationReason::OrderChanged).unwrap();
        assert_eq!(s, "\"ORDER_CHANGED\"");
        assert_eq!(InvalidationReason::NoEntry.to_string(), "NO_ENTRY");
    }
}
