//! End-to-end tests for sharding a table and splitting its shards

use shardctl::error::Error;
use shardctl::registry::parse_attr_pairs;
use shardctl::{FileStore, MemoryStore, ShardCatalog, ShardId, ShardState, MODULO};
use std::sync::Arc;

async fn catalog_with_servers(servers: &[&str]) -> ShardCatalog {
    let catalog = ShardCatalog::new(Arc::new(MemoryStore::new()));
    for (index, server) in servers.iter().enumerate() {
        let attrs = parse_attr_pairs(&[format!("host=10.0.0.{}", index + 1), "port=5432".to_string()])
            .expect("valid attrs");
        catalog
            .add_server(server, &attrs)
            .await
            .expect("Failed to add server");
    }
    catalog
}

#[tokio::test]
async fn test_enable_sharding_then_split() {
    let catalog = catalog_with_servers(&["srvA", "srvB"]).await;
    catalog
        .set_database("shopA", "srvA", None)
        .await
        .expect("Failed to set database");

    assert!(!catalog.is_sharding_enabled("shopA", "orders").await.unwrap());
    assert!(catalog.enable_sharding("shopA", "orders").await.unwrap());
    assert_eq!(
        catalog.get_shard_map("shopA", "orders").await.unwrap(),
        vec![0, MODULO]
    );

    let route = catalog.route_key("shopA", "orders", 42).await.unwrap();
    assert_eq!(route.shard, ShardId::new(0, MODULO));
    assert_eq!(route.read.master, "srvA");
    assert_eq!(route.write.master, "srvA");

    let before_split = catalog
        .list_shard_routes("shopA", "orders")
        .await
        .unwrap()
        .remove(0);

    let outcome = catalog
        .split_shard("shopA", "orders", 0, MODULO, "srvB", None)
        .await
        .expect("Failed to split shard");
    assert_eq!(outcome.pivot, 32768);
    assert_eq!(outcome.lower, ShardId::new(0, 32768));
    assert_eq!(outcome.upper, ShardId::new(32768, MODULO));
    assert_eq!(
        catalog.get_shard_map("shopA", "orders").await.unwrap(),
        vec![0, 32768, MODULO]
    );

    // Lower child carries the old shard's endpoints unchanged
    let low = catalog.route_key("shopA", "orders", 100).await.unwrap();
    assert_eq!(low.shard, ShardId::new(0, 32768));
    assert_eq!(low.read, before_split.read);
    assert_eq!(low.write, before_split.write);

    // Upper child writes to the new server, reads from the old one
    let high = catalog.route_key("shopA", "orders", 40000).await.unwrap();
    assert_eq!(high.shard, ShardId::new(32768, MODULO));
    assert_eq!(high.write.master, "srvB");
    assert_eq!(high.read.master, "srvA");

    let negative = catalog.route_key("shopA", "orders", -5).await.unwrap();
    assert_eq!(negative.shard, ShardId::new(0, 32768));

    assert_eq!(
        catalog.shard_state("shopA", "orders", 0, 32768).await.unwrap(),
        ShardState::Stable
    );
    assert_eq!(
        catalog
            .shard_state("shopA", "orders", 32768, MODULO)
            .await
            .unwrap(),
        ShardState::Transitioning
    );
    assert!(!catalog
        .is_shard_ready_for_reshard("shopA", "orders", 32768, MODULO)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_enable_sharding_is_idempotent() {
    let catalog = catalog_with_servers(&["srvA", "srvB"]).await;
    catalog.set_database("shopA", "srvA", None).await.unwrap();
    catalog.enable_sharding("shopA", "orders").await.unwrap();
    catalog
        .split_shard("shopA", "orders", 0, MODULO, "srvB", None)
        .await
        .unwrap();

    assert!(!catalog.enable_sharding("shopA", "orders").await.unwrap());
    assert_eq!(
        catalog.get_shard_map("shopA", "orders").await.unwrap(),
        vec![0, 32768, MODULO]
    );
}

#[tokio::test]
async fn test_routing_is_deterministic() {
    let catalog = catalog_with_servers(&["srvA", "srvB"]).await;
    catalog.set_database("shopA", "srvA", None).await.unwrap();
    catalog.enable_sharding("shopA", "orders").await.unwrap();
    catalog
        .split_shard("shopA", "orders", 0, MODULO, "srvB", None)
        .await
        .unwrap();

    for key in [0_i64, 1, 32767, 32768, 65535, 65536, 131_072 + 40_000, -40_000, i64::MIN] {
        let first = catalog.route_key("shopA", "orders", key).await.unwrap();
        let second = catalog.route_key("shopA", "orders", key).await.unwrap();
        assert_eq!(first, second, "key {} routed differently", key);
    }

    // Keys congruent mod 65536 share a shard
    let a = catalog.route_key("shopA", "orders", 40_000).await.unwrap();
    let b = catalog
        .route_key("shopA", "orders", 40_000 + MODULO as i64)
        .await
        .unwrap();
    assert_eq!(a.shard, b.shard);
}

#[tokio::test]
async fn test_migration_completes_transition() {
    let catalog = catalog_with_servers(&["srvA", "srvB", "srvC"]).await;
    catalog.set_database("shopA", "srvA", None).await.unwrap();
    catalog.enable_sharding("shopA", "orders").await.unwrap();
    catalog
        .split_shard("shopA", "orders", 0, MODULO, "srvB", None)
        .await
        .unwrap();

    // Further splits are allowed while a sibling is still transitioning
    let outcome = catalog
        .split_shard("shopA", "orders", 0, 32768, "srvC", Some(&["srvA".to_string()][..]))
        .await
        .unwrap();
    assert_eq!(outcome.boundaries, vec![0, 16384, 32768, MODULO]);

    let route = catalog.route_key("shopA", "orders", 20_000).await.unwrap();
    assert_eq!(route.write.master, "srvC");
    assert!(route.write.replicas.contains("srvA"));
    assert_eq!(route.read.master, "srvA");
}

#[tokio::test]
async fn test_split_failures() {
    let catalog = catalog_with_servers(&["srvA", "srvB"]).await;
    catalog.set_database("shopA", "srvA", None).await.unwrap();

    let disabled = catalog.route_key("shopA", "orders", 1).await;
    assert!(matches!(disabled, Err(Error::ShardingDisabled(_))));

    catalog.enable_sharding("shopA", "orders").await.unwrap();

    let missing = catalog
        .split_shard("shopA", "orders", 0, 1000, "srvB", None)
        .await;
    assert!(matches!(missing, Err(Error::ShardNotFound(_))));

    let unknown = catalog
        .split_shard("shopA", "orders", 0, MODULO, "srvZ", None)
        .await;
    assert!(matches!(unknown, Err(Error::UnknownServer(_))));

    // Failed splits leave the map untouched
    assert_eq!(
        catalog.get_shard_map("shopA", "orders").await.unwrap(),
        vec![0, MODULO]
    );
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let path = std::env::temp_dir()
        .join(format!("shardctl_catalog_test_{}", std::process::id()))
        .join("meta.json");
    let _ = std::fs::remove_file(&path);

    {
        let catalog = ShardCatalog::new(Arc::new(FileStore::open(&path).expect("open store")));
        catalog
            .add_server("srvA", &parse_attr_pairs(&["host=a"]).unwrap())
            .await
            .unwrap();
        catalog
            .add_server("srvB", &parse_attr_pairs(&["host=b"]).unwrap())
            .await
            .unwrap();
        catalog.set_database("shopA", "srvA", None).await.unwrap();
        catalog.enable_sharding("shopA", "orders").await.unwrap();
        catalog
            .split_shard("shopA", "orders", 0, MODULO, "srvB", None)
            .await
            .unwrap();
    }

    let reopened = ShardCatalog::new(Arc::new(FileStore::open(&path).expect("reopen store")));
    assert_eq!(
        reopened.get_shard_map("shopA", "orders").await.unwrap(),
        vec![0, 32768, MODULO]
    );
    let route = reopened.route_key("shopA", "orders", 40000).await.unwrap();
    assert_eq!(route.write.master, "srvB");
    assert_eq!(route.read.master, "srvA");

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_splits_through_separate_file_handles_serialise() {
    let path = std::env::temp_dir()
        .join(format!("shardctl_catalog_race_{}", std::process::id()))
        .join("meta.json");
    let _ = std::fs::remove_file(&path);

    let setup = ShardCatalog::new(Arc::new(FileStore::open(&path).expect("open store")));
    for server in ["srvA", "srvB", "srvC"] {
        setup
            .add_server(server, &parse_attr_pairs(&["dc=eu"]).unwrap())
            .await
            .unwrap();
    }
    setup.set_database("shopA", "srvA", None).await.unwrap();
    setup.enable_sharding("shopA", "orders").await.unwrap();

    // Two independent handles, as two CLI invocations would have.
    let first = ShardCatalog::new(Arc::new(FileStore::open(&path).expect("open store")));
    let second = ShardCatalog::new(Arc::new(FileStore::open(&path).expect("open store")));
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.split_shard("shopA", "orders", 0, MODULO, "srvB", None).await }),
        tokio::spawn(async move { second.split_shard("shopA", "orders", 0, MODULO, "srvC", None).await }),
    );
    let results = [a.expect("split task"), b.expect("split task")];

    let winner = results
        .iter()
        .find_map(|r| r.as_ref().ok())
        .expect("one split succeeds");
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(Error::ShardNotFound(_))))
        .count();
    assert_eq!(losers, 1);

    let route = setup.route_key("shopA", "orders", 40000).await.unwrap();
    assert_eq!(route.shard, winner.upper);
    let winning_master = if results[0].is_ok() { "srvB" } else { "srvC" };
    assert_eq!(route.write.master, winning_master);
    assert_eq!(
        setup.get_shard_map("shopA", "orders").await.unwrap(),
        vec![0, 32768, MODULO]
    );

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}
