//! Checksum, key and validation behavior across the public cache API.

use ai_analysis_cache::cache::{
    CacheEntry, CacheKeyBuilder, CacheStore, CacheValidator, FileCacheStore, InvalidationReason,
    MemoryCacheStore,
};
use ai_analysis_cache::checksum::{ChecksumGenerator, ChecksumRecord, ItemRef, StaticFetcher};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn generator(items: &[(&str, &str)]) -> (ChecksumGenerator, Vec<ItemRef>, Arc<StaticFetcher>) {
    let fetcher = Arc::new(StaticFetcher::new());
    let refs = items
        .iter()
        .map(|(id, bytes)| {
            let url = format!("mem://{id}");
            fetcher.insert(url.clone(), bytes.as_bytes().to_vec());
            ItemRef::new(*id, url)
        })
        .collect();
    (ChecksumGenerator::new(fetcher.clone()), refs, fetcher)
}

#[tokio::test]
async fn identical_bytes_give_identical_keys() {
    let (gen, refs, _) = generator(&[("img1", "X"), ("img2", "Y")]);
    let a = gen.generate_all(&refs).await.unwrap();
    let b = gen.generate_all(&refs).await.unwrap();
    let keys = CacheKeyBuilder::new();
    assert_eq!(keys.build("A", &a), keys.build("A", &b));
    assert_eq!(keys.build("A", &a).item_count, 2);
}

#[tokio::test]
async fn reordering_changes_key_and_reports_order_changed() {
    let (gen, refs, _) = generator(&[("img1", "X"), ("img2", "Y")]);
    let records = gen.generate_all(&refs).await.unwrap();
    let keys = CacheKeyBuilder::new();
    let key = keys.build("A", &records);
    let entry = CacheEntry::new(&key, records.clone(), json!({"ok": true}), 0);

    let reordered: Vec<ChecksumRecord> = records.iter().rev().cloned().collect();
    let reordered_key = keys.build("A", &reordered);
    assert_ne!(key.combined_checksum, reordered_key.combined_checksum);

    let out = CacheValidator::new().evaluate(Some(&entry), &reordered_key, &reordered, false, 0);
    assert!(!out.is_valid);
    assert_eq!(out.invalidation_reason, Some(InvalidationReason::OrderChanged));
    assert!(out.cached_result.is_none());
}

#[tokio::test]
async fn changing_one_item_reports_exactly_that_item() {
    let (gen, refs, fetcher) = generator(&[("img1", "X"), ("img2", "Y"), ("img3", "Z")]);
    let before = gen.generate_all(&refs).await.unwrap();
    let keys = CacheKeyBuilder::new();
    let entry = CacheEntry::new(&keys.build("A", &before), before.clone(), json!(1), 0);

    fetcher.insert("mem://img2", "Y-edited");
    let after = gen.generate_all(&refs).await.unwrap();
    let key = keys.build("A", &after);
    assert_ne!(key.combined_checksum, entry.combined_checksum);

    let out = CacheValidator::new().evaluate(Some(&entry), &key, &after, false, 0);
    assert_eq!(out.invalidation_reason, Some(InvalidationReason::ChecksumMismatch));
    assert_eq!(out.changed_item_ids, vec!["img2".to_string()]);
}

#[tokio::test]
async fn count_change_wins_over_content_change() {
    let (gen, refs, _) = generator(&[("img1", "X"), ("img2", "Y")]);
    let records = gen.generate_all(&refs).await.unwrap();
    let keys = CacheKeyBuilder::new();
    let entry = CacheEntry::new(&keys.build("A", &records), records.clone(), json!(1), 0);

    let fewer = &records[..1];
    let out = CacheValidator::new().evaluate(Some(&entry), &keys.build("A", fewer), fewer, false, 0);
    assert_eq!(out.invalidation_reason, Some(InvalidationReason::CountChanged));
}

#[tokio::test]
async fn store_round_trip_is_a_hit() {
    let (gen, refs, _) = generator(&[("img1", "X")]);
    let records = gen.generate_all(&refs).await.unwrap();
    let key = CacheKeyBuilder::new().build("A", &records);
    let store = MemoryCacheStore::new(8);
    let stored = store
        .put(CacheEntry::new(&key, records.clone(), json!({"issues": []}), 10))
        .await
        .unwrap();

    let fetched = store.get("A").await.unwrap();
    let out = CacheValidator::new().evaluate(fetched.as_ref(), &key, &records, false, 20);
    assert!(out.is_valid);
    assert_eq!(out.cached_result, Some(json!({"issues": []})));
    assert_eq!(out.entry_id, Some(stored.id));
    assert_eq!(out.invalidation_reason, None);
}

#[tokio::test]
async fn expiry_only_applies_when_configured() {
    let (gen, refs, _) = generator(&[("img1", "X")]);
    let records = gen.generate_all(&refs).await.unwrap();
    let key = CacheKeyBuilder::new().build("A", &records);
    let entry = CacheEntry::new(&key, records.clone(), json!(1), 0);
    let a_year_later = 365 * 24 * 3_600 * 1_000;

    assert!(CacheValidator::new()
        .evaluate(Some(&entry), &key, &records, false, a_year_later)
        .is_valid);

    let out = CacheValidator::new()
        .with_max_age(Some(Duration::from_secs(3_600)))
        .evaluate(Some(&entry), &key, &records, false, a_year_later);
    assert_eq!(out.invalidation_reason, Some(InvalidationReason::Expired));
}

#[tokio::test]
async fn file_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let (gen, refs, _) = generator(&[("img1", "X"), ("img2", "Y")]);
    let records = gen.generate_all(&refs).await.unwrap();
    let key = CacheKeyBuilder::new().build("flow/checkout", &records);

    let written = FileCacheStore::new(dir.path())
        .put(CacheEntry::new(&key, records.clone(), json!({"score": 7}), 0))
        .await
        .unwrap();

    let reopened = FileCacheStore::new(dir.path());
    let entry = reopened.get("flow/checkout").await.unwrap().unwrap();
    assert_eq!(entry, written);
    assert!(reopened.get("flow/other").await.unwrap().is_none());
}
