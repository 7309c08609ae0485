mod support;

use std::io::Write;
use std::sync::Arc;

use pinning_engine::catalog::StaticCatalog;
use pinning_engine::config::{ConfigError, PinningConfig};
use pinning_engine::db::repositories::LocalRepository;
use pinning_engine::db::RepositoryType;
use pinning_engine::feed::MemoryViewFeed;
use pinning_engine::services::{PinningService, TaskStatus};
use support::{at, grid, raw_view, with_scoped_env, FES_TABLE};

const CONFIG: &str = r#"
[repository]
type = "local"

[feed]
base_url = "http://feed.internal:8081/api"
timeout_secs = 20

[pinning]
minutes = 3
batch_size = 50
mapping_file = "layers.csv"

[schedule]
incremental_interval_secs = 60

[[catalog.layers]]
workspace = "meteo"
name = "fes_rdt"
table = "public.msg_fes_rdt"
temporal_attribute = "testtime"

[server]
port = 9090
"#;

fn write_config(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("pinning.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

#[test]
fn test_config_file_loads_every_section() {
    let dir = tempfile::tempdir().unwrap();
    let config = PinningConfig::from_file(write_config(&dir, CONFIG)).unwrap();

    assert_eq!(config.repository_type().unwrap(), RepositoryType::Local);
    assert_eq!(config.feed.base_url, "http://feed.internal:8081/api");
    assert_eq!(config.feed.search_path, "/preferences/search/findViews");
    assert_eq!(config.pinning.minutes, 3);
    assert_eq!(config.pinning.batch_size, 50);
    assert_eq!(config.schedule.incremental_interval_secs, Some(60));
    assert_eq!(config.schedule.reset_interval_secs, None);
    assert_eq!(config.catalog.layers.len(), 1);
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn test_zero_window_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[pinning]\nminutes = 0\n");

    match PinningConfig::from_file(path) {
        Err(ConfigError::Invalid { key, .. }) => assert_eq!(key, "pinning.minutes"),
        other => panic!("expected invalid config, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_unparseable_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[pinning\nminutes = 1\n");

    match PinningConfig::from_file(&path) {
        Err(ConfigError::Parse { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected parse error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PinningConfig::from_file(write_config(&dir, CONFIG)).unwrap();

    with_scoped_env(
        &[
            ("PINNING_FEED_URL", Some("http://localhost:1234")),
            ("PINNING_MINUTES", Some("5")),
            ("PORT", Some("7000")),
            ("HOST", None),
            ("DATABASE_URL", None),
            ("REPOSITORY_TYPE", None),
        ],
        || config.apply_env_overrides().unwrap(),
    );

    assert_eq!(config.feed.base_url, "http://localhost:1234");
    assert_eq!(config.pinning.minutes, 5);
    assert_eq!(config.server.port, 7000);
    assert_eq!(config.repository_type().unwrap(), RepositoryType::Local);
}

#[test]
fn test_bad_environment_value_is_rejected() {
    let mut config = PinningConfig::default();

    let result = with_scoped_env(
        &[
            ("PINNING_MINUTES", Some("soon")),
            ("PINNING_FEED_URL", None),
            ("PORT", None),
            ("HOST", None),
            ("DATABASE_URL", None),
            ("REPOSITORY_TYPE", None),
        ],
        || config.apply_env_overrides(),
    );

    assert!(matches!(result, Err(ConfigError::Invalid { key, .. }) if key == "PINNING_MINUTES"));
}

#[tokio::test]
async fn test_service_reads_mapping_file_and_catalog_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = dir.path().join("layers.csv");
    std::fs::write(
        &mapping,
        "# layer_id,workspace,layer_name\nfes,meteo,fes_rdt\n\nbroken,line\n",
    )
    .unwrap();

    let mut config = PinningConfig::from_file(write_config(&dir, CONFIG)).unwrap();
    config.pinning.mapping_file = mapping;
    config.pinning.lock_key = 99;

    let repo = LocalRepository::new();
    repo.create_table(FES_TABLE, "testtime", grid(at(14, 0, 0), at(16, 0, 0), 10));
    let feed = MemoryViewFeed::new();
    feed.upsert(raw_view(1, &["fes"], at(15, 0, 0), at(18, 0, 0)));

    let service = PinningService::new(
        Arc::new(repo.clone()),
        Arc::new(feed),
        Arc::new(StaticCatalog::from_entries(&config.catalog.layers)),
        config.pinning.clone(),
    )
    .unwrap();
    assert_eq!(service.registry().len(), 1);

    let task_id = service.reset().await.unwrap();
    let state = support::wait_for(&service, &task_id).await;

    assert_eq!(state.status, TaskStatus::Completed);
    assert_eq!(repo.pin_at(FES_TABLE, at(14, 58, 30)), Some(1));
    assert_eq!(repo.pin_at(FES_TABLE, at(15, 1, 30)), Some(1));
    assert_eq!(repo.pin_at(FES_TABLE, at(15, 1, 40)), Some(0));
}

#[tokio::test]
async fn test_missing_mapping_file_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = PinningConfig::default();
    config.pinning.mapping_file = dir.path().join("absent.csv");

    let result = PinningService::new(
        Arc::new(LocalRepository::new()),
        Arc::new(MemoryViewFeed::new()),
        Arc::new(StaticCatalog::new()),
        config.pinning,
    );

    assert!(result.is_err());
}
