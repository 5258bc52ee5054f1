//! End-to-end tests for the property façade over the memory backend.
//!
//! Covers round trips, null handling, listing, reverse lookup by key/value,
//! removal and cascade, and diagnostic rendering.

use pretty_assertions::assert_eq;
use prov_props::{Error, MemoryBackend, PropertyStore, RelationIdentity};

fn rel(o: u64, d: u64, v: i64) -> RelationIdentity {
    RelationIdentity::from_raw(o, d, v)
}

async fn store() -> PropertyStore<MemoryBackend> {
    PropertyStore::open_memory().await.unwrap()
}

// ============================================================================
// 1. Round trip
// ============================================================================

#[tokio::test]
async fn test_set_then_get_round_trip() {
    let store = store().await;
    let r = rel(1, 2, 0);

    store.set_property(&r, "env", Some("prod")).await.unwrap();
    store.set_property(&r, "empty", Some("")).await.unwrap();
    store.set_property(&r, "unset", None).await.unwrap();

    assert_eq!(store.get_property(&r, "env").await.unwrap(), Some(Some("prod".to_string())));
    assert_eq!(store.get_property(&r, "empty").await.unwrap(), Some(Some(String::new())));
    assert_eq!(store.get_property(&r, "unset").await.unwrap(), Some(None));
    assert_eq!(store.get_property(&r, "never").await.unwrap(), None);
}

#[tokio::test]
async fn test_second_set_is_upsert() {
    let store = store().await;
    let r = rel(1, 2, 0);

    store.set_property(&r, "env", Some("dev")).await.unwrap();
    store.set_property(&r, "env", Some("prod")).await.unwrap();

    assert_eq!(store.list_properties(&r).await.unwrap().len(), 1);
    assert_eq!(store.get_property(&r, "env").await.unwrap(), Some(Some("prod".to_string())));
}

#[tokio::test]
async fn test_versions_are_distinct_relations() {
    let store = store().await;
    let v0 = rel(1, 2, 0);
    let v1 = v0.at_version(1);

    store.set_property(&v0, "env", Some("dev")).await.unwrap();
    assert_eq!(store.get_property(&v1, "env").await.unwrap(), None);
}

// ============================================================================
// 2. Listing
// ============================================================================

#[tokio::test]
async fn test_list_returns_every_distinct_key() {
    let store = store().await;
    let r = rel(5, 6, 2);
    let n = 25;

    for i in 0..n {
        store.set_property(&r, &format!("k{i}"), Some(i.to_string().as_str())).await.unwrap();
    }

    let entries = store.list_properties(&r).await.unwrap();
    assert_eq!(entries.len(), n);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.key(), format!("k{i}"));
        assert_eq!(entry.relation(), &r);
        let got = store.get_property(&r, entry.key()).await.unwrap();
        assert_eq!(got, Some(entry.value().map(str::to_owned)));
    }

    // Restartable: a second call yields the same sequence.
    assert_eq!(store.list_properties(&r).await.unwrap(), entries);
}

#[tokio::test]
async fn test_get_properties_all_or_one() {
    let store = store().await;
    let r = rel(1, 2, 0);
    store.set_property(&r, "a", Some("1")).await.unwrap();
    store.set_property(&r, "b", None).await.unwrap();

    assert_eq!(store.get_properties(&r, None).await.unwrap().len(), 2);

    let only_b = store.get_properties(&r, Some("b")).await.unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].render(false), "b = null");

    assert!(store.get_properties(&r, Some("zzz")).await.unwrap().is_empty());
}

// ============================================================================
// 3. Reverse lookup
// ============================================================================

#[tokio::test]
async fn test_find_relations_by_property_matches_get() {
    let store = store().await;
    let rels: Vec<RelationIdentity> = (1..=6).map(|i| rel(i, i + 100, 0)).collect();

    for (i, r) in rels.iter().enumerate() {
        let env = if i % 2 == 0 { "prod" } else { "dev" };
        store.set_property(r, "env", Some(env)).await.unwrap();
    }
    // Flip one away from prod and one into it.
    store.set_property(&rels[0], "env", Some("dev")).await.unwrap();
    store.set_property(&rels[1], "env", Some("prod")).await.unwrap();

    let found = store.find_relations_by_property("env", Some("prod")).await.unwrap();

    let mut expected = Vec::new();
    for r in &rels {
        if store.get_property(r, "env").await.unwrap() == Some(Some("prod".to_string())) {
            expected.push(*r);
        }
    }
    assert_eq!(found, expected);
    assert_eq!(found, vec![rels[1], rels[2], rels[4]]);
}

#[tokio::test]
async fn test_find_by_null_value() {
    let store = store().await;
    let (a, b) = (rel(1, 2, 0), rel(3, 4, 0));
    store.set_property(&a, "reviewed", None).await.unwrap();
    store.set_property(&b, "reviewed", Some("")).await.unwrap();

    assert_eq!(store.find_relations_by_property("reviewed", None).await.unwrap(), vec![a]);
    assert_eq!(store.find_relations_by_property("reviewed", Some("")).await.unwrap(), vec![b]);
}

#[tokio::test]
async fn test_find_entries_by_key() {
    let store = store().await;
    store.set_property(&rel(1, 2, 0), "env", Some("prod")).await.unwrap();
    store.set_property(&rel(3, 4, 0), "env", None).await.unwrap();
    store.set_property(&rel(3, 4, 0), "owner", Some("ops")).await.unwrap();

    let entries = store.find_entries_by_key("env").await.unwrap();
    let rendered: Vec<String> = entries.iter().map(|e| e.render(true)).collect();
    assert_eq!(rendered, vec!["1->2@0-env = prod", "3->4@0-env = null"]);
}

// ============================================================================
// 4. Removal
// ============================================================================

#[tokio::test]
async fn test_remove_never_set_key_is_noop() {
    let store = store().await;
    let r = rel(1, 2, 0);
    store.set_property(&r, "a", Some("1")).await.unwrap();
    let before = store.stats().await.unwrap();

    assert!(!store.remove_property(&r, "b").await.unwrap());
    assert!(!store.remove_property(&rel(9, 9, 9), "a").await.unwrap());

    assert_eq!(store.stats().await.unwrap(), before);
    assert_eq!(store.list_properties(&r).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_remove_property() {
    let store = store().await;
    let r = rel(1, 2, 0);
    store.set_property(&r, "env", Some("prod")).await.unwrap();

    assert!(store.remove_property(&r, "env").await.unwrap());
    assert_eq!(store.get_property(&r, "env").await.unwrap(), None);
    assert!(store.find_relations_by_property("env", Some("prod")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_relation_cascades() {
    let store = store().await;
    let (a, b) = (rel(1, 2, 0), rel(1, 3, 0));
    store.set_property(&a, "env", Some("prod")).await.unwrap();
    store.set_property(&a, "owner", None).await.unwrap();
    store.set_property(&b, "env", Some("prod")).await.unwrap();

    assert_eq!(store.remove_relation(&a).await.unwrap(), 2);
    assert!(store.list_properties(&a).await.unwrap().is_empty());
    assert_eq!(store.find_relations_by_property("env", Some("prod")).await.unwrap(), vec![b]);

    let stats = store.stats().await.unwrap();
    assert_eq!((stats.properties, stats.relations, stats.keys), (1, 1, 1));
}

// ============================================================================
// 5. Validation and errors
// ============================================================================

#[tokio::test]
async fn test_malformed_identity_is_rejected_everywhere() {
    let store = store().await;
    let bad = rel(0, 2, 0);

    assert!(matches!(store.set_property(&bad, "k", Some("v")).await, Err(Error::MalformedIdentity(_))));
    assert!(matches!(store.get_property(&bad, "k").await, Err(Error::MalformedIdentity(_))));
    assert!(matches!(store.list_properties(&bad).await, Err(Error::MalformedIdentity(_))));
    assert!(matches!(store.remove_property(&bad, "k").await, Err(Error::MalformedIdentity(_))));
    assert!(matches!(store.remove_relation(&rel(1, 2, -3)).await, Err(Error::MalformedIdentity(_))));
    assert_eq!(store.stats().await.unwrap().properties, 0);
}

#[tokio::test]
async fn test_shutdown_surfaces_store_unavailable() {
    let store = store().await;
    store.shutdown().await.unwrap();

    let err = store.set_property(&rel(1, 2, 0), "k", None).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_retryable());
}

// ============================================================================
// 6. Rendering
// ============================================================================

#[tokio::test]
async fn test_render_null_with_and_without_relation() {
    let store = store().await;
    let r = rel(7, 8, 1);
    store.set_property(&r, "env", None).await.unwrap();

    let entry = &store.list_properties(&r).await.unwrap()[0];
    assert_eq!(entry.render(true), format!("{r}-env = null"));
    assert_eq!(entry.render(true), "7->8@1-env = null");
    assert_eq!(entry.render(false), "env = null");
    assert_eq!(entry.to_string(), "7->8@1-env = null");
}

#[tokio::test]
async fn test_entries_compare_by_value_across_reads() {
    let store = store().await;
    let r = rel(1, 2, 0);
    store.set_property(&r, "k", None).await.unwrap();

    let first = store.list_properties(&r).await.unwrap();
    let second = store.get_properties(&RelationIdentity::from_raw(1, 2, 0), Some("k")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].stable_hash(), second[0].stable_hash());
}

// ============================================================================
// 7. Properties over generated inputs
// ============================================================================

mod generated {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().build().unwrap()
    }

    proptest! {
        #[test]
        fn prop_set_then_get_returns_value(
            origin in 1u64..1000,
            destination in 1u64..1000,
            version in 0i64..50,
            key in "[a-z][a-z0-9_]{0,12}",
            value in proptest::option::of(".{0,24}"),
        ) {
            let got = runtime().block_on(async {
                let store = PropertyStore::open_memory().await.unwrap();
                let r = rel(origin, destination, version);
                store.set_property(&r, &key, value.as_deref()).await.unwrap();
                store.get_property(&r, &key).await.unwrap()
            });
            prop_assert_eq!(got, Some(value));
        }

        #[test]
        fn prop_find_matches_get(
            tags in proptest::collection::vec((1u64..6, proptest::option::of("[ab]")), 1..30),
        ) {
            runtime().block_on(async {
                let store = PropertyStore::open_memory().await.unwrap();
                for (o, v) in &tags {
                    store.set_property(&rel(*o, 1, 0), "tag", v.as_deref()).await.unwrap();
                }
                let found = store.find_relations_by_property("tag", Some("a")).await.unwrap();
                for o in 1u64..6 {
                    let r = rel(o, 1, 0);
                    let is_a = store.get_property(&r, "tag").await.unwrap() == Some(Some("a".to_string()));
                    assert_eq!(found.contains(&r), is_a);
                }
            });
        }
    }
}
