//! Integration tests for the two-tier cache façade.
//!
//! Two façades sharing one in-memory remote backend stand in for two
//! application instances sharing one Redis.

use std::sync::Arc;
use std::time::Duration;

use mediashelf_cache::cache::{
    ConnectionState, HealthStatus, InvalidationMessage, InvalidationTarget, LocalCache,
    MemoryBackend,
};
use mediashelf_cache::{
    CacheConfig, CacheFacade, GetOptions, RedisConfig, RemoteCache, SetOptions,
};

fn redis_config() -> RedisConfig {
    RedisConfig {
        enabled: true,
        key_prefix: "tt:".into(),
        max_reconnect_attempts: 20,
        reconnect_base_delay_ms: 10,
        reconnect_max_delay_ms: 20,
        ..RedisConfig::default()
    }
}

async fn instance(backend: &Arc<MemoryBackend>) -> CacheFacade {
    let remote = RemoteCache::new(backend.clone(), &redis_config());
    assert!(remote.connect().await);
    CacheFacade::new(
        Arc::new(LocalCache::new(1000)),
        remote,
        &CacheConfig::default(),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn wait_for(facade: &CacheFacade, state: ConnectionState) -> bool {
    for _ in 0..100 {
        if facade.remote().state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_l2_hit_is_backfilled_into_l1() {
    let backend = Arc::new(MemoryBackend::new());
    let writer = instance(&backend).await;
    let reader = instance(&backend).await;

    writer.set("series:s1", &"Akira", 300, SetOptions::default());
    settle().await;

    assert_eq!(
        reader.get::<String>("series:s1", GetOptions::default()).await,
        Some("Akira".to_string())
    );
    assert_eq!(reader.get_stats().l2.hits, 1);

    let ttl = backend.ttl("tt:series:s1").expect("written with a ttl");
    assert!(ttl > Duration::from_secs(60));

    // The second read is served by L1 without a round trip.
    backend.reset_command_count();
    assert_eq!(
        reader.get::<String>("series:s1", GetOptions::default()).await,
        Some("Akira".to_string())
    );
    assert_eq!(backend.command_count(), 0);
    assert_eq!(reader.get_stats().l1.hits, 1);
}

#[tokio::test]
async fn test_backfill_can_be_disabled() {
    let backend = Arc::new(MemoryBackend::new());
    let writer = instance(&backend).await;
    let reader = instance(&backend).await;

    writer.set("k", &1u32, 300, SetOptions::default());
    settle().await;

    let options = GetOptions {
        backfill_l1: false,
        ..GetOptions::default()
    };
    assert_eq!(reader.get::<u32>("k", options).await, Some(1));
    assert!(!reader.local().exists("k"));
}

#[tokio::test]
async fn test_write_policies() {
    let backend = Arc::new(MemoryBackend::new());
    let facade = instance(&backend).await;

    facade.set("local", &1u32, 60, SetOptions::l1_only());
    facade.set("remote", &2u32, 60, SetOptions::l2_only());
    settle().await;

    assert!(facade.local().exists("local"));
    assert!(!backend.keys().contains(&"tt:local".to_string()));

    assert!(!facade.local().exists("remote"));
    assert!(backend.keys().contains(&"tt:remote".to_string()));
    assert_eq!(
        facade.get::<u32>("remote", GetOptions::local_only()).await,
        None
    );
    assert_eq!(
        facade.get::<u32>("remote", GetOptions::remote_only()).await,
        Some(2)
    );
}

#[tokio::test]
async fn test_delete_reaches_both_layers_and_broadcasts() {
    let backend = Arc::new(MemoryBackend::new());
    let facade = instance(&backend).await;

    facade.set("series:s1", &"Akira", 300, SetOptions::default());
    settle().await;

    assert!(facade.delete("series:s1").await);
    assert!(!facade.exists("series:s1").await);
    assert!(!facade.delete("series:s1").await);
    settle().await;

    let published = backend.published();
    let (channel, payload) = published.first().expect("invalidation published");
    assert_eq!(channel, "tt:cache:invalidate");
    let message = InvalidationMessage::decode(payload).unwrap();
    assert_eq!(message.origin, facade.instance_id());
    assert_eq!(message.target, InvalidationTarget::Key("series:s1".into()));
}

#[tokio::test]
async fn test_pattern_invalidation_counts_both_layers() {
    let backend = Arc::new(MemoryBackend::new());
    let facade = instance(&backend).await;

    for id in ["a", "b", "c"] {
        facade.set(&format!("count:series:{id}"), &1u64, 60, SetOptions::default());
    }
    facade.set("query:series:x", &1u64, 60, SetOptions::default());
    settle().await;

    // Three keys in L1 plus the same three in L2.
    assert_eq!(facade.invalidate_pattern("count:series:").await, 6);
    assert!(facade.exists("query:series:x").await);

    assert_eq!(facade.invalidate_all().await, 2);
    assert!(backend.keys().is_empty());
}

#[tokio::test]
async fn test_get_or_compute_caches_the_result() {
    let backend = Arc::new(MemoryBackend::new());
    let facade = instance(&backend).await;

    let first: Result<u32, std::io::Error> = facade
        .get_or_compute("answer", || async { Ok(42) }, 60, GetOptions::default())
        .await;
    assert_eq!(first.unwrap(), 42);

    let second: Result<u32, std::io::Error> = facade
        .get_or_compute("answer", || async { Ok(0) }, 60, GetOptions::default())
        .await;
    assert_eq!(second.unwrap(), 42);

    let failed: Result<u32, std::io::Error> = facade
        .get_or_compute(
            "broken",
            || async { Err(std::io::Error::other("db down")) },
            60,
            GetOptions::default(),
        )
        .await;
    assert!(failed.is_err());
    assert!(!facade.exists("broken").await);
}

#[tokio::test]
async fn test_outage_degrades_to_local_and_recovers() {
    let backend = Arc::new(MemoryBackend::new());
    let facade = instance(&backend).await;
    facade.set("before", &1u32, 300, SetOptions::default());
    settle().await;

    backend.set_online(false);

    // The first failing command flips availability.
    assert_eq!(
        facade.get::<u32>("only-in-l2", GetOptions::default()).await,
        None
    );
    assert!(!facade.is_remote_available());
    assert_eq!(facade.get_health().status, HealthStatus::Degraded);

    // Everything keeps working against L1.
    facade.set("during", &2u32, 300, SetOptions::default());
    assert_eq!(facade.get::<u32>("during", GetOptions::default()).await, Some(2));
    assert_eq!(facade.get::<u32>("before", GetOptions::default()).await, Some(1));
    assert_eq!(facade.z_card("series:index:all:name:asc").await, 0);
    assert!(facade.z_range("series:index:all:name:asc", 0, -1).await.is_empty());
    assert!(facade.remote_memory_info().await.is_none());

    backend.set_online(true);
    assert!(wait_for(&facade, ConnectionState::Connected).await);
    assert_eq!(facade.get_health().status, HealthStatus::Healthy);
    assert_eq!(
        facade.get::<u32>("before", GetOptions::remote_only()).await,
        Some(1)
    );
}

#[tokio::test]
async fn test_stats_are_idempotent_and_resettable() {
    let backend = Arc::new(MemoryBackend::new());
    let facade = instance(&backend).await;

    facade.set("k", &1u32, 60, SetOptions::default());
    facade.get::<u32>("k", GetOptions::default()).await;
    facade.get::<u32>("missing", GetOptions::default()).await;

    let first = facade.get_stats();
    let second = facade.get_stats();
    assert_eq!(first.total_hits, second.total_hits);
    assert_eq!(first.total_misses, second.total_misses);
    assert_eq!((first.total_hits, first.total_misses), (1, 1));
    assert!((first.hit_rate - 0.5).abs() < f64::EPSILON);

    facade.reset_stats();
    let reset = facade.get_stats();
    assert_eq!((reset.total_hits, reset.total_misses), (0, 0));
    assert_eq!(reset.l1.hits, 0);
    assert_eq!(reset.l2.misses, 0);
    assert_eq!(reset.hit_rate, 0.0);
}
