use geostage::bootstrap::{
    check_source_changes, ensure_asset, ensure_assets, hash_file, Asset, ChangePolicy,
    CreateArgs, CreationRoutine, HashStore, Manifest, MaterializeError, Outcome, RoutineError,
    RoutineKind, RoutineRegistry,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// A routine copying the source file to the destination, counting its runs.
fn counting_copy(calls: Arc<AtomicUsize>) -> Arc<dyn CreationRoutine> {
    Arc::new(
        move |source: &str, destination: &Path, _args: &CreateArgs| -> Result<(), RoutineError> {
            calls.fetch_add(1, Ordering::SeqCst);
            fs::copy(source, destination)
                .map(|_| ())
                .map_err(|e| RoutineError::io(destination, e))
        },
    )
}

#[test]
fn test_ensure_is_idempotent_for_unchanged_source() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("gauges.csv");
    let dest = dir.path().join("out").join("gauges.csv");
    fs::write(&source, "id,flow\n1,2.5\n").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let asset = Asset::new(
        source.to_string_lossy(),
        &dest,
        counting_copy(calls.clone()),
    )
    .with_directory(dir.path().join("out"));
    let store = dir.path().join("hashes.json");
    let policy = ChangePolicy::default().with_hash_store(&store);
    let key = source.to_string_lossy().into_owned();
    let recorded = || {
        HashStore::open(&store)
            .unwrap()
            .get(&key)
            .map(str::to_string)
    };

    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Created);
    let digest = recorded();
    assert_eq!(digest, Some(hash_file(&source).unwrap()));

    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Fresh);
    assert_eq!(recorded(), digest);
    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Fresh);
    assert_eq!(recorded(), digest);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read_to_string(&dest).unwrap(), "id,flow\n1,2.5\n");
}

#[test]
fn test_first_creation_records_digest_for_strict_policy() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("gauges.csv");
    let dest = dir.path().join("copy.csv");
    fs::write(&source, "a\n").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let asset = Asset::new(source.to_string_lossy(), &dest, counting_copy(calls.clone()));
    let policy = ChangePolicy::default()
        .with_hash_store(dir.path().join("hashes.json"))
        .with_assume_changed_on_missing(true);

    // The missing destination still gets its source recorded, so the
    // follow-up call does not count the source as unseen.
    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Created);
    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_ensure_recreates_after_source_change() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("gauges.csv");
    let dest = dir.path().join("copy.csv");
    fs::write(&source, "a\n").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let asset = Asset::new(source.to_string_lossy(), &dest, counting_copy(calls.clone()));
    let policy = ChangePolicy::default().with_hash_store(dir.path().join("hashes.json"));

    ensure_asset(&asset, &policy).unwrap();
    fs::write(&source, "a\nb\n").unwrap();
    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Created);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(fs::read_to_string(&dest).unwrap(), "a\nb\n");
}

#[test]
fn test_missing_destination_is_recreated_and_digest_refreshed() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("hashes.json");
    let source = dir.path().join("gauges.csv");
    let dest = dir.path().join("copy.csv");
    fs::write(&source, "a\n").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let asset = Asset::new(source.to_string_lossy(), &dest, counting_copy(calls.clone()));
    let policy = ChangePolicy::default().with_hash_store(&store);

    ensure_asset(&asset, &policy).unwrap();
    fs::remove_file(&dest).unwrap();
    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Created);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let recorded = HashStore::open(&store).unwrap();
    assert_eq!(
        recorded.get(&source.to_string_lossy()),
        Some(hash_file(&source).unwrap().as_str())
    );
}

#[test]
fn test_modification_time_does_not_count_as_change() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("gauges.csv");
    let dest = dir.path().join("copy.csv");
    fs::write(&source, "a\n").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let asset = Asset::new(source.to_string_lossy(), &dest, counting_copy(calls.clone()));
    let policy = ChangePolicy::default().with_hash_store(dir.path().join("hashes.json"));

    ensure_asset(&asset, &policy).unwrap();
    filetime::set_file_mtime(&source, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();
    assert_eq!(ensure_asset(&asset, &policy).unwrap(), Outcome::Fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_noop_routine_raises_creation_error() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("never.csv");
    let noop: Arc<dyn CreationRoutine> =
        Arc::new(|_: &str, _: &Path, _: &CreateArgs| -> Result<(), RoutineError> { Ok(()) });
    let asset = Asset::new("https://example.com/never.csv", &dest, noop);

    let err = ensure_asset(&asset, &ChangePolicy::default()).unwrap_err();
    assert!(err.is_creation_error());
    assert!(err.to_string().contains("never.csv"));
    assert!(err.to_string().contains("MISSING"));
}

#[test]
fn test_routine_failure_names_destination() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("tree");
    let registry = RoutineRegistry::default();
    let asset = Asset::new(
        dir.path().join("no-such-dir").to_string_lossy(),
        &dest,
        registry.resolve(RoutineKind::CopyTree),
    );

    let err = ensure_asset(&asset, &ChangePolicy::default()).unwrap_err();
    match &err {
        MaterializeError::Routine {
            destination,
            routine,
            ..
        } => {
            assert_eq!(destination, &dest);
            assert_eq!(routine, "copy-tree");
        }
        other => panic!("Expected routine error, got {other:?}"),
    }
}

#[test]
fn test_copy_tree_into_directory_argument() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("template");
    fs::create_dir_all(source.join("styles")).unwrap();
    fs::write(source.join("project.qgs"), "<qgis/>").unwrap();
    fs::write(source.join("styles").join("rivers.qml"), "<style/>").unwrap();

    let target = dir.path().join("workspace");
    let registry = RoutineRegistry::default();
    let asset = Asset::new(
        source.to_string_lossy(),
        target.join("project.qgs"),
        registry.resolve(RoutineKind::CopyTree),
    )
    .with_arg("directory", target.to_string_lossy());

    assert_eq!(
        ensure_asset(&asset, &ChangePolicy::default()).unwrap(),
        Outcome::Created
    );
    assert_eq!(
        fs::read_to_string(target.join("styles").join("rivers.qml")).unwrap(),
        "<style/>"
    );
    // Directories are never tracked, so the copy stays fresh.
    assert_eq!(
        ensure_asset(&asset, &ChangePolicy::default()).unwrap(),
        Outcome::Fresh
    );
}

#[test]
fn test_batch_stops_at_first_failure() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.csv");
    fs::write(&source, "a").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let noop: Arc<dyn CreationRoutine> =
        Arc::new(|_: &str, _: &Path, _: &CreateArgs| -> Result<(), RoutineError> { Ok(()) });
    let assets = vec![
        Asset::new(source.to_string_lossy(), dir.path().join("1.csv"), counting_copy(calls.clone())),
        Asset::new(source.to_string_lossy(), dir.path().join("2.csv"), noop),
        Asset::new(source.to_string_lossy(), dir.path().join("3.csv"), counting_copy(calls.clone())),
    ];

    let err = ensure_assets(&assets, &ChangePolicy::default()).unwrap_err();
    assert!(err.is_creation_error());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(dir.path().join("1.csv").is_file());
    assert!(!dir.path().join("3.csv").exists());
}

#[test]
fn test_manifest_batch_with_unzip() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("bundle.zip");
    {
        use std::io::Write;
        let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        writer
            .start_file("rivers.geojson", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(br#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        writer.finish().unwrap();
    }

    let manifest = Manifest::parse(&format!(
        r#"
hash_store = "{store}"

[[asset]]
source = "{archive}"
destination = "{dest}"
routine = "unzip"
"#,
        store = dir.path().join("hashes.json").display(),
        archive = archive.display(),
        dest = dir.path().join("rivers.geojson").display(),
    ))
    .unwrap();

    let registry = RoutineRegistry::default();
    let policy = manifest.policy(&ChangePolicy::default());
    let report = ensure_assets(&manifest.assets(&registry), &policy).unwrap();
    assert_eq!(report.created, 1);
    assert!(dir.path().join("rivers.geojson").is_file());

    let report = ensure_assets(&manifest.assets(&registry), &policy).unwrap();
    assert_eq!(report.fresh, 1);
}

#[test]
fn test_change_checks_follow_policy() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("a.csv");
    fs::write(&source, "0,0,0,0").unwrap();
    let sources = [source.to_string_lossy().to_string()];

    assert!(!check_source_changes(&sources, &ChangePolicy::default()).unwrap());
    assert!(check_source_changes(
        &sources,
        &ChangePolicy::default().with_changed_without_store(true)
    )
    .unwrap());

    let tracked = ChangePolicy::default()
        .with_hash_store(dir.path().join("hashes.json"))
        .with_assume_changed_on_missing(true);
    assert!(check_source_changes(&sources, &tracked).unwrap());
    assert!(!check_source_changes(&sources, &tracked).unwrap());

    let urls = ["https://example.com/a.csv"];
    assert!(!check_source_changes(&urls, &tracked).unwrap());

    let store = HashStore::open(&dir.path().join("hashes.json")).unwrap();
    assert_eq!(store.len(), 1);
    assert_eq!(
        store.get(&sources[0]),
        Some("886364986cd9a5c816240f0512f36bee")
    );
}
