use geostage::chunks::{
    download_parts, raster_download, ImageSource, PartsOptions, PipelineError, RasterMerger,
    RegionCell,
};
use geostage::progress::ProgressCallback;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Writes a zip holding one GeoTIFF named after the cell.
#[derive(Default)]
struct ZipSource {
    calls: AtomicUsize,
}

impl ImageSource for ZipSource {
    fn fetch_region(&self, cell: &RegionCell, archive: &Path) -> Result<bool, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut writer = zip::ZipWriter::new(fs::File::create(archive).unwrap());
        writer
            .start_file("download.tif", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(cell.filename().as_bytes()).unwrap();
        writer.finish().unwrap();
        Ok(true)
    }
}

#[derive(Default)]
struct CopyMerger {
    nodata: Mutex<Option<f64>>,
}

impl RasterMerger for CopyMerger {
    fn merge(&self, files: &[PathBuf], destination: &Path, nodata: f64) -> Result<(), PipelineError> {
        *self.nodata.lock().unwrap() = Some(nodata);
        let mut merged = String::new();
        for file in files {
            merged.push_str(&fs::read_to_string(file).unwrap());
            merged.push('\n');
        }
        fs::write(destination, merged).unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProgress {
    phases: Mutex<Vec<(String, usize)>>,
    updates: AtomicUsize,
}

impl ProgressCallback for RecordingProgress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        self.phases.lock().unwrap().push((phase.to_string(), total));
    }

    fn on_progress(&self, _current: usize, _label: &str) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn on_phase_end(&self, _phase: &str) {}
}

#[test]
fn test_raster_download_merges_every_tile() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("dem.tif");
    let source = ZipSource::default();
    let merger = CopyMerger::default();
    let options = PartsOptions::new(dir.path().join("tiles"))
        .with_step(0.006)
        .with_nodata(-9999.0);

    raster_download(&fixture("triangle.geojson"), &output, &source, &merger, &options).unwrap();

    assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(*merger.nodata.lock().unwrap(), Some(-9999.0));
    let merged = fs::read_to_string(&output).unwrap();
    assert_eq!(merged.lines().count(), 3);
    assert!(merged.lines().all(|l| l.starts_with("EE_w122.")));
}

#[test]
fn test_clean_downloads_again() {
    let dir = tempdir().unwrap();
    let source = ZipSource::default();
    let options = PartsOptions::new(dir.path()).with_step(0.006);

    download_parts(&fixture("triangle.geojson"), &source, &options).unwrap();
    download_parts(&fixture("triangle.geojson"), &source, &options).unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 3);

    let options = options.with_clean(true);
    download_parts(&fixture("triangle.geojson"), &source, &options).unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 6);
}

#[test]
fn test_shutdown_stops_before_first_cell() {
    let dir = tempdir().unwrap();
    let source = ZipSource::default();
    let flag = Arc::new(AtomicBool::new(true));
    let options = PartsOptions::new(dir.path())
        .with_step(0.006)
        .with_shutdown_flag(flag);

    let err = download_parts(&fixture("triangle.geojson"), &source, &options).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Interrupted {
            completed: 0,
            total: 3
        }
    ));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_progress_reports_chunks_phase() {
    let dir = tempdir().unwrap();
    let progress = Arc::new(RecordingProgress::default());
    let options = PartsOptions::new(dir.path())
        .with_step(0.006)
        .with_progress_callback(progress.clone());

    download_parts(&fixture("triangle.geojson"), &ZipSource::default(), &options).unwrap();
    assert_eq!(
        *progress.phases.lock().unwrap(),
        vec![("chunks".to_string(), 3)]
    );
    assert_eq!(progress.updates.load(Ordering::SeqCst), 3);
}
