#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::config::types::{MapStoreConfig, StoreEngine};
    use crate::persistence::domain::{
        Attribute, DomainClient, DomainStore, DomainStoreOptions, MemoryDomainClient,
    };
    use crate::persistence::table::{MemoryTableClient, TableStore, TableStoreOptions};
    use crate::persistence::{
        AccessLevel, DelegatingStoreFactory, MapStore, MapStoreFactory, MemoryConnector,
        StoreError, StoreProperties,
    };

    fn table_store(client: &Arc<MemoryTableClient>) -> TableStore {
        TableStore::new(client.clone(), TableStoreOptions::default())
    }

    async fn initialized_table(name: &str) -> (Arc<MemoryTableClient>, TableStore) {
        let client = MemoryTableClient::new();
        client.create_table(name, "key");
        let store = table_store(&client);
        store
            .initialize(name, &StoreProperties::new())
            .await
            .unwrap();
        (client, store)
    }

    fn memory_factory(
        auto_create: bool,
    ) -> (Arc<MemoryTableClient>, Arc<MemoryDomainClient>, Arc<DelegatingStoreFactory>) {
        let tables = MemoryTableClient::new();
        let domains = MemoryDomainClient::new();
        let connector = MemoryConnector::new(tables.clone(), domains.clone(), auto_create);
        (tables, domains, DelegatingStoreFactory::new(Arc::new(connector)))
    }

    #[tokio::test]
    async fn test_users_scenario() {
        let (_, store) = initialized_table("users").await;
        assert_eq!(store.access_level(), AccessLevel::ReadWrite);
        assert_eq!(store.resource_name(), "users");

        store.store("u1", r#"{"name":"a"}"#).await.unwrap();
        assert_eq!(
            store.load("u1").await.unwrap().as_deref(),
            Some(r#"{"name":"a"}"#)
        );

        store.delete("u1").await.unwrap();
        assert_eq!(store.load("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_absent_key() {
        let (_, store) = initialized_table("users").await;
        assert_eq!(store.load("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let (client, store) = initialized_table("users").await;
        store.store("u1", "v1").await.unwrap();
        store.store("u1", "v2").await.unwrap();
        assert_eq!(store.load("u1").await.unwrap().as_deref(), Some("v2"));
        assert_eq!(client.item_count("users"), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_, store) = initialized_table("users").await;
        store.delete("ghost").await.unwrap();
        store.delete("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_missing_table() {
        let client = MemoryTableClient::new();
        let store = table_store(&client);

        let err = store
            .initialize("missing", &StoreProperties::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("missing"));
        assert_eq!(store.access_level(), AccessLevel::ReadOnly);

        // Mutations after a failed initialize are dropped, not errors.
        store.store("k", "v").await.unwrap();
        assert_eq!(client.item_count("missing"), 0);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_rejected() {
        let (_, store) = initialized_table("users").await;
        let err = store
            .initialize("users", &StoreProperties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyInitialized { .. }));
        assert_eq!(store.access_level(), AccessLevel::ReadWrite);
    }

    #[tokio::test]
    async fn test_read_only_store_leaves_backing_unchanged() {
        let client = MemoryTableClient::new();
        client.create_table("users", "key");
        let writer = table_store(&client);
        writer
            .initialize("users", &StoreProperties::new())
            .await
            .unwrap();
        writer.store("u1", "original").await.unwrap();

        let reader = table_store(&client);
        reader
            .initialize("users", &StoreProperties::new().with("access", "ro"))
            .await
            .unwrap();
        assert_eq!(reader.access_level(), AccessLevel::ReadOnly);

        reader.store("u1", "changed").await.unwrap();
        reader.delete("u1").await.unwrap();
        reader
            .store_all(&HashMap::from([("u2".to_string(), "x".to_string())]))
            .await
            .unwrap();

        assert_eq!(reader.load("u1").await.unwrap().as_deref(), Some("original"));
        assert_eq!(client.item_count("users"), 1);
    }

    #[tokio::test]
    async fn test_invalid_access_property() {
        let client = MemoryTableClient::new();
        client.create_table("users", "key");
        let store = table_store(&client);
        let err = store
            .initialize("users", &StoreProperties::new().with("access", "sometimes"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidProperty { .. }));
    }

    #[tokio::test]
    async fn test_key_attribute_mismatch() {
        let client = MemoryTableClient::new();
        client.create_table("users", "id");
        let store = table_store(&client);
        let err = store
            .initialize("users", &StoreProperties::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());

        let custom = TableStore::new(
            client.clone(),
            TableStoreOptions::from_properties(&StoreProperties::new().with("key_attribute", "id")),
        );
        custom
            .initialize("users", &StoreProperties::new())
            .await
            .unwrap();
        custom.store("u1", "v").await.unwrap();
        assert_eq!(custom.load("u1").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_load_all_omits_absent_keys() {
        let (_, store) = initialized_table("users").await;
        store.store("a", "1").await.unwrap();
        store.store("c", "3").await.unwrap();

        let keys: Vec<String> = ["a", "b", "c", "a"].iter().map(|k| k.to_string()).collect();
        let loaded = store.load_all(&keys).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"], "1");
        assert_eq!(loaded["c"], "3");
        assert!(!loaded.contains_key("b"));
    }

    #[tokio::test]
    async fn test_load_all_chunks_large_requests() {
        let (client, store) = initialized_table("users").await;
        let entries: HashMap<String, String> = (0..250)
            .map(|i| (format!("k{i}"), format!("v{i}")))
            .collect();
        store.store_all(&entries).await.unwrap();

        let before = client.request_count();
        let keys: Vec<String> = entries.keys().cloned().collect();
        let loaded = store.load_all(&keys).await.unwrap();
        assert_eq!(loaded, entries);
        assert_eq!(client.request_count() - before, 3);
    }

    #[tokio::test]
    async fn test_load_all_keys_unsupported_for_tables() {
        let (_, store) = initialized_table("users").await;
        store.store("a", "1").await.unwrap();
        assert_eq!(store.load_all_keys().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_all_partial_failure() {
        let (client, store) = initialized_table("users").await;
        client.fail_writes_for("k07");

        let entries: HashMap<String, String> = (0..30)
            .map(|i| (format!("k{i:02}"), format!("v{i}")))
            .collect();
        let err = store.store_all(&entries).await.unwrap_err();

        // Entries are written in key order: k00..k24 form the first batch.
        let failed = err.failed_keys();
        assert!(failed.contains(&"k07"));
        assert_eq!(failed.len(), 25);
        assert!(matches!(err, StoreError::Batch { op: "storeAll", .. }));

        for i in 25..30 {
            assert!(store.load(&format!("k{i:02}")).await.unwrap().is_some());
        }
        assert_eq!(client.item_count("users"), 5);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let (client, store) = initialized_table("users").await;
        for i in 0..40 {
            store.store(&format!("k{i}"), "v").await.unwrap();
        }
        let keys: Vec<String> = (0..40).map(|i| format!("k{i}")).chain(["ghost".to_string()]).collect();
        store.delete_all(&keys).await.unwrap();
        assert_eq!(client.item_count("users"), 0);
    }

    #[tokio::test]
    async fn test_teardown_revokes_writes() {
        let (client, store) = initialized_table("users").await;
        store.teardown().await;
        assert_eq!(store.access_level(), AccessLevel::ReadOnly);
        assert_eq!(client.shutdown_count(), 1);

        store.store("late", "v").await.unwrap();
        assert_eq!(client.item_count("users"), 0);
    }

    #[tokio::test]
    async fn test_teardown_before_initialize() {
        let client = MemoryTableClient::new();
        let store = table_store(&client);
        store.teardown().await;
        assert_eq!(store.resource_name(), "<unbound>");
    }

    #[tokio::test]
    async fn test_namespaced_map_binds_to_short_name() {
        let (client, store) = {
            let client = MemoryTableClient::new();
            client.create_table("orders", "key");
            let store = table_store(&client);
            store
                .initialize("shop:orders", &StoreProperties::new())
                .await
                .unwrap();
            (client, store)
        };
        assert_eq!(store.resource_name(), "orders");
        store.store("o1", "v").await.unwrap();
        assert_eq!(client.item_count("orders"), 1);
    }

    async fn initialized_domain(
        name: &str,
        properties: StoreProperties,
    ) -> (Arc<MemoryDomainClient>, DomainStore) {
        let client = MemoryDomainClient::new();
        client.create_domain(name);
        let store = DomainStore::new(
            client.clone(),
            DomainStoreOptions::from_properties(&properties),
        );
        store.initialize(name, &properties).await.unwrap();
        (client, store)
    }

    #[tokio::test]
    async fn test_domain_round_trip() {
        let (_, store) = initialized_domain("users", StoreProperties::new()).await;
        store.store("u1", r#"{"name":"a"}"#).await.unwrap();
        assert_eq!(
            store.load("u1").await.unwrap().as_deref(),
            Some(r#"{"name":"a"}"#)
        );
        store.delete("u1").await.unwrap();
        store.delete("u1").await.unwrap();
        assert_eq!(store.load("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_domain_indexes_documents() {
        let properties = StoreProperties::new().with("index_attributes", "true");
        let (client, store) = initialized_domain("users", properties).await;
        store
            .store("u1", r#"{"name":"a","tags":["x","y"],"address":{"zip":"35001"}}"#)
            .await
            .unwrap();

        let attributes = client.get_attributes("users", "u1").await.unwrap();
        let names: Vec<&str> = attributes.iter().map(|a| a.name.as_str()).collect();
        assert!(names.contains(&"value"));
        assert!(names.contains(&"name"));
        assert!(names.contains(&"tags.[1]"));
        assert!(names.contains(&"address.zip"));
    }

    #[tokio::test]
    async fn test_domain_rebuilds_document_without_value_attribute() {
        let (client, store) = initialized_domain("users", StoreProperties::new()).await;
        client.insert_raw(
            "users",
            "legacy",
            vec![
                Attribute::new("name", "b"),
                Attribute::new("address.city", "LPA"),
            ],
        );

        let raw = store.load("legacy").await.unwrap().unwrap();
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(document["name"], "b");
        assert_eq!(document["address"]["city"], "LPA");
    }

    #[tokio::test]
    async fn test_domain_load_all_keys_pages() {
        let (_, store) = initialized_domain("users", StoreProperties::new()).await;
        let entries: HashMap<String, String> = (0..230)
            .map(|i| (format!("u{i}"), "{}".to_string()))
            .collect();
        store.store_all(&entries).await.unwrap();

        let keys = store.load_all_keys().await.unwrap().unwrap();
        assert_eq!(keys.len(), 230);
        assert!(keys.contains("u229"));
    }

    #[tokio::test]
    async fn test_domain_missing_on_initialize() {
        let client = MemoryDomainClient::new();
        let store = DomainStore::new(client, DomainStoreOptions::default());
        let err = store
            .initialize("nowhere", &StoreProperties::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ResourceNotFound { .. }));
        assert_eq!(store.access_level(), AccessLevel::ReadOnly);
    }

    #[tokio::test]
    async fn test_factory_returns_single_adapter_under_concurrency() {
        let (tables, _, factory) = memory_factory(false);
        tables.create_table("orders", "key");
        let config = MapStoreConfig::new(StoreEngine::Table);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let factory = factory.clone();
                let config = config.clone();
                tokio::spawn(async move { factory.new_map_store("orders", &config).await })
            })
            .collect();

        let mut stores = Vec::new();
        for handle in handles {
            stores.push(handle.await.unwrap().unwrap());
        }
        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
        assert_eq!(factory.constructed_count(), 1);
        assert_eq!(factory.store_count(), 1);
        assert_eq!(stores[0].access_level(), AccessLevel::ReadWrite);
    }

    #[tokio::test]
    async fn test_factory_selects_engine() {
        let (_, domains, factory) = memory_factory(true);
        let store = factory
            .new_map_store("catalog:products", &MapStoreConfig::new(StoreEngine::Domain))
            .await
            .unwrap();
        store.store("p1", "{}").await.unwrap();
        assert_eq!(domains.item_count("products"), 1);

        // Same resource name, same adapter.
        let again = factory
            .new_map_store("products", &MapStoreConfig::new(StoreEngine::Domain))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&store, &again));
    }

    #[tokio::test]
    async fn test_factory_failure_publishes_nothing() {
        let (tables, _, factory) = memory_factory(false);
        let config = MapStoreConfig::new(StoreEngine::Table);

        let Err(err) = factory.new_map_store("orders", &config).await else {
            panic!("missing table must fail");
        };
        assert!(err.is_configuration());
        assert_eq!(factory.store_count(), 0);

        tables.create_table("orders", "key");
        let store = factory.new_map_store("orders", &config).await.unwrap();
        assert_eq!(store.access_level(), AccessLevel::ReadWrite);
        assert_eq!(factory.constructed_count(), 2);
    }

    #[tokio::test]
    async fn test_http_connector_requires_credentials() {
        let factory = DelegatingStoreFactory::new(Arc::new(crate::persistence::HttpConnector));
        let config = MapStoreConfig::new(StoreEngine::Table)
            .with_properties(StoreProperties::new().with("endpoint", "http://127.0.0.1:1"));

        let Err(err) = factory.new_map_store("users", &config).await else {
            panic!("missing credentials must fail");
        };
        match err {
            StoreError::MissingProperty { map, property } => {
                assert_eq!(map, "users");
                assert_eq!(property, "access_key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_factory_shutdown_tears_down_once() {
        let (tables, _, factory) = memory_factory(true);
        let config = MapStoreConfig::new(StoreEngine::Table);
        let users = factory.new_map_store("users", &config).await.unwrap();
        factory.new_map_store("orders", &config).await.unwrap();

        factory.shutdown().await;
        factory.shutdown().await;
        assert_eq!(tables.shutdown_count(), 2);
        assert_eq!(users.access_level(), AccessLevel::ReadOnly);
    }

    #[tokio::test]
    async fn test_factory_refuses_new_maps_after_shutdown() {
        let (tables, _, factory) = memory_factory(true);
        let config = MapStoreConfig::new(StoreEngine::Table);
        factory.new_map_store("users", &config).await.unwrap();
        factory.shutdown().await;

        let Err(err) = factory.new_map_store("orders", &config).await else {
            panic!("a closed factory must not hand out adapters");
        };
        assert!(matches!(err, StoreError::FactoryClosed { ref map } if map == "orders"));
        assert!(!err.is_configuration());
        assert_eq!(factory.constructed_count(), 1);
        assert_eq!(tables.shutdown_count(), 1);
    }

    #[test]
    fn test_secret_is_masked() {
        let properties = StoreProperties::new()
            .with("access_key", "AKIA")
            .with("secret_key", "hunter2");
        let rendered = format!("{properties:?}");
        assert!(rendered.contains("<secret>"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_access_level_parsing() {
        assert_eq!("ro".parse::<AccessLevel>().unwrap(), AccessLevel::ReadOnly);
        assert_eq!("read-write".parse::<AccessLevel>().unwrap(), AccessLevel::ReadWrite);
        assert!("rx".parse::<AccessLevel>().is_err());
    }
}
