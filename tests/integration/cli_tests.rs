use clap::Parser;
use geostage::cli::Cli;
use geostage::error::ExitCode;
use geostage::run_app;
use geostage::spatial::VectorLayer;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn path(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

/// Config file pinning everything the commands read, so a user config
/// or `GEOSTAGE_*` variables cannot leak in.
fn config_file(dir: &Path) -> String {
    let config = dir.join("geostage.toml");
    fs::write(&config, "progress = false\n").unwrap();
    path(&config)
}

fn run(args: &[&str]) -> anyhow::Result<ExitCode> {
    let cli = Cli::try_parse_from(args).unwrap();
    run_app(cli)
}

#[test]
fn test_ensure_command_copies_tree() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());
    let source = dir.path().join("template");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("readme.txt"), "hello").unwrap();
    let dest = dir.path().join("copy").join("readme.txt");

    let code = run(&[
        "geostage",
        "-q",
        "--config",
        &config,
        "ensure",
        "--source",
        &path(&source),
        "--dest",
        &path(&dest),
        "--arg",
        &format!("directory={}", path(&dir.path().join("copy"))),
    ])
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(fs::read_to_string(&dest).unwrap(), "hello");
}

#[test]
fn test_ensure_failure_maps_to_exit_code() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());

    let err = run(&[
        "geostage",
        "-q",
        "--config",
        &config,
        "ensure",
        "-s",
        &path(&dir.path().join("missing")),
        "-d",
        &path(&dir.path().join("out.txt")),
    ])
    .unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    assert!(format!("{err:#}").contains("copy-tree"));
}

#[test]
fn test_chunks_command_writes_map() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());
    let map = dir.path().join("map.geojson");

    let code = run(&[
        "geostage",
        "-q",
        "--config",
        &config,
        "chunks",
        &fixture("triangle.geojson"),
        "--step",
        "0.006",
        "--map",
        &path(&map),
    ])
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(VectorLayer::open(&map).unwrap().len(), 3);
}

#[test]
fn test_chunks_command_bad_step_is_invalid_input() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());

    let err = run(&[
        "geostage",
        "-q",
        "--config",
        &config,
        "chunks",
        &fixture("triangle.geojson"),
        "--step",
        "0",
    ])
    .unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::InvalidInput);
}

#[test]
fn test_copy_layer_command_with_where() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());
    let output = dir.path().join("long.geojson");

    let code = run(&[
        "geostage",
        "-q",
        "--config",
        &config,
        "copy-layer",
        &fixture("flowlines.geojson"),
        &path(&output),
        "--where",
        "LengthKM>=3",
    ])
    .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(VectorLayer::open(&output).unwrap().len(), 2);
}

#[test]
fn test_zip_shp_command_rejects_other_extensions() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());
    let file = dir.path().join("rivers.geojson");
    fs::write(&file, "{}").unwrap();

    let err = run(&["geostage", "-q", "--config", &config, "zip-shp", &path(&file)])
        .unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::InvalidInput);
}

#[test]
fn test_hash_command_missing_file() {
    let dir = tempdir().unwrap();
    let config = config_file(dir.path());

    let err = run(&[
        "geostage",
        "-q",
        "--config",
        &config,
        "hash",
        &path(&dir.path().join("nope.csv")),
    ])
    .unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::InvalidInput);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = run(&[
        "geostage",
        "-q",
        "--config",
        &path(&dir.path().join("absent.toml")),
        "config",
    ])
    .unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}
