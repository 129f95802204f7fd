//! Integration tests driving the full tier over the in-memory backend,
//! under both key layouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;

use ember_tier::{
    CacheTier, Config, CurveConfig, MemoryBackend, Scheme, SetOptions, TierEvent,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Asset {
    id: String,
    language: String,
}

fn asset(id: &str) -> Asset {
    Asset {
        id: id.to_string(),
        language: "en".to_string(),
    }
}

fn config(scheme: Scheme, cache: CurveConfig) -> Config {
    let mut config = Config::default();
    config.scheme = scheme;
    config.cache = cache;
    config
}

/// Long windows: nothing expires during the test on its own.
fn lazy_curve() -> CurveConfig {
    CurveConfig {
        base_ms: 60_000,
        limit_ms: 600_000,
        steps: 5,
        absolute_limit_ms: None,
        curve: None,
    }
}

fn new_tier(
    scheme: Scheme,
    cache: CurveConfig,
) -> (
    CacheTier<Asset>,
    UnboundedReceiver<TierEvent>,
    Arc<MemoryBackend>,
) {
    let backend = Arc::new(MemoryBackend::new());
    let (tier, events) = CacheTier::new(config(scheme, cache), backend.clone());
    (tier, events, backend)
}

async fn store(tier: &CacheTier<Asset>, ids: &[&str]) {
    let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    let values: HashMap<String, Asset> = ids.iter().map(|id| (id.clone(), asset(id))).collect();
    tier.set_many(|id| id.to_string(), &ids, &values, &SetOptions::default())
        .await
        .unwrap();
}

fn drain(events: &mut UnboundedReceiver<TierEvent>) -> Vec<TierEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

const BOTH_SCHEMES: [Scheme; 2] = [Scheme::Flat, Scheme::Container];

#[tokio::test]
async fn test_fresh_round_trip() {
    for scheme in BOTH_SCHEMES {
        let (tier, _events, _backend) = new_tier(scheme, lazy_curve());
        store(&tier, &["a"]).await;

        let got = tier.get("a").await.unwrap();
        assert_eq!(got, Some(asset("a")), "scheme {scheme:?}");
    }
}

#[tokio::test]
async fn test_miss_on_cold_cache() {
    for scheme in BOTH_SCHEMES {
        let (tier, _events, _backend) = new_tier(scheme, lazy_curve());
        assert_eq!(tier.get("nothing").await.unwrap(), None, "scheme {scheme:?}");
        assert_eq!(tier.stats().misses, 1);
    }
}

#[tokio::test]
async fn test_batch_ordering_preserves_gaps() {
    for scheme in BOTH_SCHEMES {
        let (tier, _events, _backend) = new_tier(scheme, lazy_curve());
        store(&tier, &["a"]).await;

        let ids = vec![
            Some("a".to_string()),
            None,
            Some("b".to_string()),
            Some("a".to_string()),
        ];
        let results = tier.get_many(|id| id.to_string(), &ids).await.unwrap();

        assert_eq!(results.len(), 4, "scheme {scheme:?}");
        assert_eq!(results[0], Some(asset("a")));
        assert_eq!(results[1], None); // gap stays a gap
        assert_eq!(results[2], None); // never stored
        assert_eq!(results[3], Some(asset("a")));
    }
}

#[tokio::test]
async fn test_record_key_mapping_is_honored() {
    let (tier, _events, _backend) = new_tier(Scheme::Flat, lazy_curve());

    let ids = vec!["42".to_string()];
    let values: HashMap<String, Asset> = ids.iter().map(|id| (id.clone(), asset(id))).collect();
    tier.set_many(
        |id| format!("assets.fetch:{id}"),
        &ids,
        &values,
        &SetOptions::default(),
    )
    .await
    .unwrap();

    // The mapped key is the record key; the bare id is unknown.
    assert_eq!(tier.get("assets.fetch:42").await.unwrap(), Some(asset("42")));
    assert_eq!(tier.get("42").await.unwrap(), None);
}

#[tokio::test]
async fn test_partial_write_skips_missing_values() {
    for scheme in BOTH_SCHEMES {
        let (tier, _events, _backend) = new_tier(scheme, lazy_curve());

        let ids = vec!["a".to_string(), "b".to_string()];
        let mut values = HashMap::new();
        values.insert("a".to_string(), asset("a"));
        tier.set_many(|id| id.to_string(), &ids, &values, &SetOptions::default())
            .await
            .unwrap();

        assert_eq!(tier.get("a").await.unwrap(), Some(asset("a")), "scheme {scheme:?}");
        assert_eq!(tier.get("b").await.unwrap(), None);
        assert_eq!(tier.stats().writes, 1);
    }
}

#[tokio::test]
async fn test_set_overwrites_existing_record() {
    for scheme in BOTH_SCHEMES {
        let (tier, mut events, _backend) = new_tier(scheme, lazy_curve());
        store(&tier, &["a"]).await;

        // Read twice to accumulate steps on the first generation.
        tier.get("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tier.get("a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drain(&mut events);

        let mut replacement = asset("a");
        replacement.language = "de".to_string();
        let ids = vec!["a".to_string()];
        let mut values = HashMap::new();
        values.insert("a".to_string(), replacement.clone());
        tier.set_many(|id| id.to_string(), &ids, &values, &SetOptions::default())
            .await
            .unwrap();

        assert_eq!(tier.get("a").await.unwrap(), Some(replacement), "scheme {scheme:?}");

        // The overwrite reset the step counter: this hit bumped 0 -> 1.
        let refreshed: Vec<u32> = drain(&mut events)
            .into_iter()
            .map(|event| match event {
                TierEvent::Refreshed { step, .. } => step,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(refreshed, vec![1]);
    }
}

#[tokio::test]
async fn test_each_hit_extends_the_window() {
    for scheme in BOTH_SCHEMES {
        let curve = CurveConfig {
            base_ms: 200,
            limit_ms: 10_000,
            steps: 10,
            absolute_limit_ms: None,
            curve: None,
        };
        let (tier, mut events, _backend) = new_tier(scheme, curve);
        store(&tier, &["hot"]).await;

        for _ in 0..3 {
            assert_eq!(
                tier.get("hot").await.unwrap(),
                Some(asset("hot")),
                "scheme {scheme:?}"
            );
            // Let the fire-and-forget write-back land before the next read.
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let mut steps = Vec::new();
        let mut expiries = Vec::new();
        let mut timestamps = Vec::new();
        for event in drain(&mut events) {
            match event {
                TierEvent::Refreshed {
                    key,
                    timestamp_ms,
                    step,
                    expires_at_ms,
                } => {
                    assert_eq!(key, "hot");
                    steps.push(step);
                    expiries.push(expires_at_ms);
                    timestamps.push(timestamp_ms);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(steps, vec![1, 2, 3], "scheme {scheme:?}");
        assert!(expiries.windows(2).all(|pair| pair[0] < pair[1]));
        // Creation time never moves; only the window around it widens.
        assert!(timestamps.windows(2).all(|pair| pair[0] == pair[1]));
    }
}

#[tokio::test]
async fn test_lapsed_record_is_physically_removed() {
    for scheme in BOTH_SCHEMES {
        // The ceiling lapses records long before the curve or the
        // container's outer TTL would.
        let curve = CurveConfig {
            base_ms: 500,
            limit_ms: 1_000,
            steps: 5,
            absolute_limit_ms: Some(40),
            curve: None,
        };
        let (tier, _events, _backend) = new_tier(scheme, curve);
        store(&tier, &["a"]).await;

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(tier.get("a").await.unwrap(), None, "scheme {scheme:?}");
        assert_eq!(tier.size().await.unwrap(), 0, "scheme {scheme:?}");

        if scheme == Scheme::Container {
            // The container path cannot rely on engine expiry for single
            // fields; the policy itself must have evicted.
            assert_eq!(tier.stats().evictions, 1);
        }
    }
}

#[tokio::test]
async fn test_step_budget_exhaustion_forces_miss() {
    for scheme in BOTH_SCHEMES {
        let curve = CurveConfig {
            base_ms: 60_000,
            limit_ms: 600_000,
            steps: 2,
            absolute_limit_ms: None,
            curve: None,
        };
        let (tier, _events, _backend) = new_tier(scheme, curve);
        store(&tier, &["a"]).await;

        // First read: step 0 -> 1, still inside the budget.
        assert_eq!(tier.get("a").await.unwrap(), Some(asset("a")), "scheme {scheme:?}");
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Second read finds step 1; the budget of 2 is spent.
        assert_eq!(tier.get("a").await.unwrap(), None);
        assert_eq!(tier.get("a").await.unwrap(), None); // physically gone

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 1);
    }
}

#[tokio::test]
async fn test_flush_all_scoped_to_namespace() {
    for scheme in BOTH_SCHEMES {
        let backend = Arc::new(MemoryBackend::new());

        let mut config_a = config(scheme, lazy_curve());
        config_a.namespace = Some("alpha".to_string());
        let (tier_a, _rx_a) = CacheTier::<Asset>::new(config_a, backend.clone());

        let mut config_b = config(scheme, lazy_curve());
        config_b.namespace = Some("beta".to_string());
        let (tier_b, _rx_b) = CacheTier::<Asset>::new(config_b, backend.clone());

        store(&tier_a, &["a", "b"]).await;
        store(&tier_b, &["a"]).await;

        assert!(tier_a.clear("*").await.unwrap(), "scheme {scheme:?}");

        assert_eq!(tier_a.get("a").await.unwrap(), None);
        assert_eq!(tier_a.get("b").await.unwrap(), None);
        // The sibling namespace on the same backend is untouched.
        assert_eq!(tier_b.get("a").await.unwrap(), Some(asset("a")));
    }
}

#[tokio::test]
async fn test_clear_single_key() {
    for scheme in BOTH_SCHEMES {
        let (tier, _events, _backend) = new_tier(scheme, lazy_curve());
        store(&tier, &["a", "b"]).await;

        assert!(tier.clear("a").await.unwrap(), "scheme {scheme:?}");
        assert_eq!(tier.get("a").await.unwrap(), None);
        assert_eq!(tier.get("b").await.unwrap(), Some(asset("b")));

        // Already gone: nothing left to remove.
        assert!(!tier.clear("a").await.unwrap());
    }
}

#[tokio::test]
async fn test_size_reports_stored_entries() {
    for scheme in BOTH_SCHEMES {
        let (tier, _events, _backend) = new_tier(scheme, lazy_curve());
        assert_eq!(tier.size().await.unwrap(), 0, "scheme {scheme:?}");

        store(&tier, &["a", "b", "c"]).await;
        assert_eq!(tier.size().await.unwrap(), 3);

        tier.clear("*").await.unwrap();
        assert_eq!(tier.size().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn test_compressed_records_round_trip() {
    let mut config = config(Scheme::Flat, lazy_curve());
    config.compression.threshold_bytes = Some(64);
    let backend = Arc::new(MemoryBackend::new());
    let (tier, _events) = CacheTier::<String>::new(config, backend);

    let big = "lorem ipsum ".repeat(400);
    let ids = vec!["doc".to_string()];
    let mut values = HashMap::new();
    values.insert("doc".to_string(), big.clone());
    tier.set_many(|id| id.to_string(), &ids, &values, &SetOptions::default())
        .await
        .unwrap();

    assert_eq!(tier.get("doc").await.unwrap(), Some(big));
}

#[tokio::test]
async fn test_gap_only_batch_never_touches_backend() {
    let (tier, mut events, backend) = new_tier(Scheme::Flat, lazy_curve());
    backend.break_connection();

    let ids = vec![None, None];
    let results = tier.get_many(|id| id.to_string(), &ids).await.unwrap();

    assert_eq!(results, vec![None, None]);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_set_with_initial_step() {
    // Written at the penultimate step, a record has exactly one hit left.
    let (tier, _events, _backend) = new_tier(Scheme::Flat, lazy_curve());
    let ids = vec!["a".to_string()];
    let values: HashMap<String, Asset> = ids.iter().map(|id| (id.clone(), asset(id))).collect();
    tier.set_many(|id| id.to_string(), &ids, &values, &SetOptions { step: 3 })
        .await
        .unwrap();

    assert_eq!(tier.get("a").await.unwrap(), Some(asset("a")));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(tier.get("a").await.unwrap(), None);
}
