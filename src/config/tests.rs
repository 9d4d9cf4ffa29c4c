#[cfg(test)]
mod tests {
    use crate::config::{ConfigLoader, InitialLoad, LogFormat, MapConfig, StoreEngine};
    use crate::config::types::{ClusterConfig, MapStoreConfig};
    use std::io::Write;

    const SAMPLE: &str = r#"
name = "node-a"
bind = "127.0.0.1:5100"
seeds = ["127.0.0.1:5000"]
join_timeout_ms = 2500

[logging]
level = "debug"
format = "json"

[maps.users.store]
engine = "dynamo"
properties = { endpoint = "http://localhost:8000", access_key = "ak", secret_key = "sk", access = "ro" }

[maps."catalog:products".store]
engine = "simpledb"
write_delay_seconds = 5
write_batch_size = 50
initial_load = "eager"

[maps.default.store]
engine = "table"
enabled = false
"#;

    #[test]
    fn test_defaults() {
        let config = ClusterConfig::default();
        assert_eq!(config.bind.port(), 5000);
        assert_eq!(config.http_addr().port(), 6000);
        assert!(config.seeds.is_empty());
        assert!(config.maps.is_empty());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_toml() {
        let config = ConfigLoader::from_toml(SAMPLE).unwrap();
        assert_eq!(config.name, "node-a");
        assert_eq!(config.seeds.len(), 1);
        assert_eq!(config.join_timeout().as_millis(), 2500);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);

        let users = config.maps["users"].store.as_ref().unwrap();
        assert!(users.enabled);
        assert_eq!(users.engine, StoreEngine::Table);
        assert!(!users.is_write_behind());
        assert_eq!(users.properties.get("access"), Some("ro"));
        assert!(!users.factory.is_bound());

        let products = config.maps["catalog:products"].store.as_ref().unwrap();
        assert_eq!(products.engine, StoreEngine::Domain);
        assert_eq!(products.write_delay().as_secs(), 5);
        assert_eq!(products.write_batch_size, 50);
        assert_eq!(products.initial_load, InitialLoad::Eager);
    }

    #[test]
    fn test_map_config_falls_back_to_default() {
        let config = ConfigLoader::from_toml(SAMPLE).unwrap();
        let unknown = config.map_config("sessions").unwrap();
        assert!(unknown.store.is_some());
        assert!(unknown.active_store().is_none());

        let users = config.map_config("users").unwrap();
        assert!(users.active_store().is_some());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let source = r#"
[maps.users.store]
engine = "table"
write_batch_size = 0
"#;
        let err = ConfigLoader::from_toml(source).unwrap_err();
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let source = r#"
[logging]
level = "verbose"
"#;
        assert!(ConfigLoader::from_toml(source).is_err());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let source = r#"
[maps.users.store]
engine = "cassandra"
"#;
        assert!(ConfigLoader::from_toml(source).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(config.bind.port(), 5100);
        assert_eq!(config.http_addr().port(), 6100);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(ConfigLoader::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_ephemeral_ports() {
        let config = ClusterConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            ..ClusterConfig::default()
        };
        assert_eq!(config.http_addr().port(), 0);
    }

    #[test]
    fn test_builder_helpers() {
        let config = ClusterConfig::default().with_map(
            "orders",
            MapConfig::with_store(MapStoreConfig::new(StoreEngine::Table).with_write_delay(3)),
        );
        let store = config.map_config("orders").unwrap().active_store().unwrap();
        assert!(store.is_write_behind());
        assert_eq!(store.write_batch_size, 100);
    }
}
