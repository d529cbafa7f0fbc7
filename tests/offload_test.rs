//! Offload replication, presence caching, and redirect decisions.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{FakeEncoder, TestHarness};
use derivforge::config::OffloadConfig;
use derivforge::offload::{MemoryObjectStore, OffloadTier, PresenceCache, SWEEP_INTERVAL};
use derivforge::service::Delivery;
use derivforge::{DerivativeClass, ThumbnailRequest};

fn offload_harness(public_base: Option<&str>) -> TestHarness {
    let public_base = public_base.map(str::to_string);
    TestHarness::with_offload(FakeEncoder::succeeding(), move |config| {
        config.offload.prefix = "media".to_string();
        config.offload.public_base_url = public_base;
    })
}

// ---------------------------------------------------------------------------
// Presence cache
// ---------------------------------------------------------------------------

#[test]
fn test_negative_presence_suppresses_repeat_checks() {
    let store = Arc::new(MemoryObjectStore::new());
    let tier = OffloadTier::new(store.clone(), &OffloadConfig::default());

    assert!(!tier.is_present("media/proxy/missing.mp4"));
    assert!(!tier.is_present("media/proxy/missing.mp4"));
    assert_eq!(store.exists_calls(), 1);
}

#[test]
fn test_presence_entries_expire() {
    let cache = PresenceCache::new(Duration::from_millis(50));
    cache.record("k", false);
    assert_eq!(cache.get("k"), Some(false));

    thread::sleep(Duration::from_millis(80));
    assert_eq!(cache.get("k"), None);
}

#[test]
fn test_presence_is_rechecked_after_expiry() {
    let store = Arc::new(MemoryObjectStore::new());
    let presence = PresenceCache::new(Duration::from_millis(50));
    let tier = OffloadTier::with_presence(store.clone(), &OffloadConfig::default(), presence);

    assert!(!tier.is_present("media/proxy/late.mp4"));
    assert!(!tier.is_present("media/proxy/late.mp4"));
    assert_eq!(store.exists_calls(), 1);

    store.insert("media/proxy/late.mp4", b"x".to_vec());
    thread::sleep(Duration::from_millis(80));
    assert!(tier.is_present("media/proxy/late.mp4"));
    assert_eq!(store.exists_calls(), 2);
}

#[test]
fn test_presence_entries_for_one_off_keys_are_reclaimed() {
    let store = Arc::new(MemoryObjectStore::new());
    let presence = PresenceCache::new(Duration::from_millis(50));
    let tier = OffloadTier::with_presence(store, &OffloadConfig::default(), presence);

    for i in 0..1000 {
        assert!(!tier.is_present(&format!("media/thumbs/{i}.jpg")));
    }
    thread::sleep(Duration::from_millis(80));
    for i in 0..SWEEP_INTERVAL {
        tier.is_present(&format!("media/thumbs/late-{i}.jpg"));
    }

    assert!(tier.presence().len() <= SWEEP_INTERVAL);
}

#[test]
fn test_store_errors_are_not_cached() {
    let store = Arc::new(MemoryObjectStore::new());
    let tier = OffloadTier::new(store.clone(), &OffloadConfig::default());

    store.set_failing(true);
    assert!(!tier.is_present("k"));
    store.set_failing(false);
    store.insert("k", b"x".to_vec());
    assert!(tier.is_present("k"));
    assert_eq!(store.exists_calls(), 2);
}

// ---------------------------------------------------------------------------
// Replication through the service
// ---------------------------------------------------------------------------

#[test]
fn test_generated_proxy_is_uploaded() {
    let harness = offload_harness(None);
    let source = harness.source("clip.mp4");

    let delivery = harness.service.hd_proxy(&source).unwrap();
    let artifact = delivery.artifact().unwrap().clone();
    harness.drain();

    let object_key = format!("media/proxy/{}.mp4", artifact.key);
    let stored = harness.store.get(&object_key).expect("proxy uploaded");
    assert_eq!(stored.content_type, "video/mp4");
    assert_eq!(stored.cache_control, "public, max-age=86400");
}

#[test]
fn test_replicated_proxy_redirects_with_presigned_url() {
    let harness = offload_harness(None);
    let source = harness.source("clip.mp4");

    harness.service.hd_proxy(&source).unwrap();
    harness.drain();

    let delivery = harness.service.hd_proxy(&source).unwrap();
    assert_matches!(
        delivery,
        Delivery::Remote { ref url } if url.starts_with("memory://localhost/media/proxy/")
    );
    assert_eq!(harness.encoder.count(), 1);
}

#[test]
fn test_hls_redirect_requires_public_base() {
    let harness = offload_harness(None);
    let source = harness.source("clip.mp4");

    harness.service.hls(&source).unwrap();
    harness.drain();

    let delivery = harness.service.hls(&source).unwrap();
    assert_matches!(delivery, Delivery::Local { .. });
}

#[test]
fn test_hls_redirects_to_public_master() {
    let harness = offload_harness(Some("https://cdn.example.com/"));
    let source = harness.source("clip.mp4");

    let key = harness.service.target(DerivativeClass::Hls, &source).unwrap().key;
    harness.service.hls(&source).unwrap();
    harness.drain();

    let keys = harness.store.keys();
    let master = format!("media/hls/{key}/master.m3u8");
    assert!(keys.contains(&master));
    assert!(keys.contains(&format!("media/hls/{key}/v360/stream.m3u8")));
    assert!(keys.contains(&format!("media/hls/{key}/v1080/seg_0000.ts")));

    let delivery = harness.service.hls(&source).unwrap();
    assert_matches!(
        delivery,
        Delivery::Remote { ref url } if *url == format!("https://cdn.example.com/{master}")
    );
}

#[test]
fn test_thumbnail_is_uploaded_with_extension() {
    let harness = offload_harness(None);
    let source = harness.source("video.mp4");

    let thumb = harness
        .service
        .thumbnail(&ThumbnailRequest::new(source).format("webp"))
        .unwrap();
    let key = thumb.delivery.artifact().unwrap().key.clone();
    harness.drain();

    let stored = harness.store.get(&format!("media/thumbs/{key}.webp")).unwrap();
    assert_eq!(stored.content_type, "image/webp");
}

#[test]
fn test_redirects_disabled_serves_locally() {
    let harness = TestHarness::with_offload(FakeEncoder::succeeding(), |config| {
        config.offload.redirect_enabled = false;
    });
    let source = harness.source("clip.mp4");

    harness.service.hd_proxy(&source).unwrap();
    harness.drain();
    assert_eq!(harness.store.put_calls(), 1);

    let delivery = harness.service.hd_proxy(&source).unwrap();
    assert_matches!(delivery, Delivery::Local { .. });
}

#[test]
fn test_uploads_disabled_never_puts() {
    let harness = TestHarness::with_offload(FakeEncoder::succeeding(), |config| {
        config.offload.upload_enabled = false;
    });
    let source = harness.source("clip.mp4");

    harness.service.hd_proxy(&source).unwrap();
    harness.drain();
    assert_eq!(harness.store.put_calls(), 0);
}

#[test]
fn test_failing_store_does_not_fail_delivery() {
    let harness = offload_harness(None);
    harness.store.set_failing(true);
    let source = harness.source("clip.mp4");

    let delivery = harness.service.hd_proxy(&source).unwrap();
    assert_matches!(delivery, Delivery::Local { .. });
    harness.drain();
    assert!(harness.store.keys().is_empty());
}

#[test]
fn test_local_hit_retries_failed_upload() {
    let harness = offload_harness(None);
    let source = harness.source("clip.mp4");

    harness.store.set_failing(true);
    harness.service.hd_proxy(&source).unwrap();
    harness.drain();
    assert!(harness.store.keys().is_empty());

    harness.store.set_failing(false);
    let delivery = harness.service.hd_proxy(&source).unwrap();
    assert_matches!(delivery, Delivery::Local { .. });
    harness.drain();

    assert_eq!(harness.store.keys().len(), 1);
    assert_eq!(harness.encoder.count(), 1);
}
