use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use geostage::config::{Config, ENV_PREFIX};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config: Config = figment.extract().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.step, 0.02);
}

#[test]
fn test_config_load_from_env() {
    std::env::set_var("GEOSTAGE_STEP", "0.05");
    std::env::set_var("GEOSTAGE_DOWNLOAD_CHUNK_SIZE", "65536");

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Env::prefixed(ENV_PREFIX));
    let config: Config = figment.extract().unwrap();

    assert_eq!(config.step, 0.05);
    assert_eq!(config.download_chunk_size, 65_536);

    // Clean up
    std::env::remove_var("GEOSTAGE_STEP");
    std::env::remove_var("GEOSTAGE_DOWNLOAD_CHUNK_SIZE");
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");

    let toml_content = r#"
hash_store = "data/hashes.json"
assume_changed_on_missing = true
step = 0.05
progress = false
"#;
    fs::write(&config_path, toml_content).unwrap();

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&config_path));
    let config: Config = figment.extract().unwrap();

    assert_eq!(config.hash_store, Some(PathBuf::from("data/hashes.json")));
    assert!(config.assume_changed_on_missing);
    assert!(!config.changed_without_store);
    assert_eq!(config.step, 0.05);
    assert!(!config.progress);
    assert_eq!(config.download_chunk_size, 32_000);
}

#[test]
fn test_config_load_explicit_file() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("geostage.toml");
    fs::write(&config_path, "changed_without_store = true\n").unwrap();

    let config = Config::load(Some(&config_path)).unwrap();
    assert!(config.changed_without_store);
    assert!(config.change_policy().changed_without_store);
}

#[test]
fn test_config_invalid_value() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "step = \"fine\"\n").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(err.to_string().contains("Invalid configuration"));
}

#[test]
fn test_config_rendered_toml_loads_back() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let config = Config {
        hash_store: Some(PathBuf::from("hashes.json")),
        step: 0.1,
        ..Config::default()
    };
    fs::write(&config_path, config.to_toml().unwrap()).unwrap();

    let figment =
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(&config_path));
    let loaded: Config = figment.extract().unwrap();
    assert_eq!(loaded, config);
}
