//! Tests for config loading

use std::path::Path;

use recrawl::config::Config;
use recrawl::coordinator::CoordinatorConfig;
use serial_test::serial;

const ENV_VARS: &[&str] = &[
    "RECRAWL_REDIS_URL",
    "REDIS_URL",
    "RECRAWL_REDIS_CACHE_URL",
    "RECRAWL_WORKERS",
    "RECRAWL_MAX_QUEUE_LEN",
    "RECRAWL_ITEMS_KEY",
    "RECRAWL_VERIFY_SCRAPED_KEY",
    "RECRAWL_POSTGRES_URL",
    "DATABASE_URL",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

#[test]
fn test_shipped_config_matches_defaults() {
    let config = Config::from_file(Path::new("config.toml")).expect("config.toml should load");
    config.validate().unwrap();

    let defaults = Config::default();
    assert_eq!(config.redis.url, defaults.redis.url);
    assert_eq!(config.keys.items, defaults.keys.items);
    assert_eq!(config.keys.sitemap_format, defaults.keys.sitemap_format);
    assert_eq!(config.keys.verify_scraped, defaults.keys.verify_scraped);
    assert_eq!(config.coordinator.max_queue_len, defaults.coordinator.max_queue_len);
    assert_eq!(config.cache_redis_url(), config.redis.url);
}

#[test]
fn test_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("RECRAWL_REDIS_URL", "redis://queue:6379/2");
    std::env::set_var("RECRAWL_REDIS_CACHE_URL", "redis://cache:6379");
    std::env::set_var("RECRAWL_WORKERS", "3");
    std::env::set_var("RECRAWL_ITEMS_KEY", "custom:items");
    std::env::set_var("RECRAWL_VERIFY_SCRAPED_KEY", "custom:verified");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.redis.url, "redis://queue:6379/2");
    assert_eq!(config.cache_redis_url(), "redis://cache:6379");
    assert_eq!(config.keys.verify_scraped, "custom:verified");

    let coordinator = CoordinatorConfig::for_items(&config).unwrap();
    assert_eq!(coordinator.queue_key, "custom:items");
    assert_eq!(coordinator.workers, 3);
}

#[test]
#[serial]
fn test_from_env_fallbacks_and_bad_numbers() {
    clear_env();
    std::env::set_var("REDIS_URL", "redis://fallback:6379");
    std::env::set_var("DATABASE_URL", "postgresql://db/recrawl");
    std::env::set_var("RECRAWL_MAX_QUEUE_LEN", "not a number");

    let config = Config::from_env().unwrap();
    clear_env();

    assert_eq!(config.redis.url, "redis://fallback:6379");
    assert_eq!(config.database.postgres_url, "postgresql://db/recrawl");
    assert_eq!(config.coordinator.max_queue_len, 2000);
}
