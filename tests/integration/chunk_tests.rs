use geo::Intersects;
use geostage::chunks::{get_chunks, ChunkError, RASTERFILE_PROPERTY};
use geostage::spatial::{feature_from_geometry, Crs, LayerError, VectorLayer};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_triangle_fine_grid_keeps_three_cells() {
    let cells = get_chunks(&fixture("triangle.geojson"), 0.006, None).unwrap();
    assert_eq!(cells.len(), 3);

    let names: Vec<String> = cells.iter().map(|c| c.filename()).collect();
    assert!(names.iter().all(|n| n.starts_with("EE_w122.") && n.ends_with(".tif")));
    // No southern hemisphere cells, so no 's' prefix.
    assert!(names.iter().all(|n| !n.contains("_s")));
}

#[test]
fn test_triangle_coarse_grid_is_one_cell() {
    let cells = get_chunks(&fixture("triangle.geojson"), 0.02, None).unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].anchor().x, -122.01);
    assert_eq!(cells[0].anchor().y, 38.0);
}

#[test]
fn test_chunk_map_lists_surviving_cells() {
    let dir = tempdir().unwrap();
    let map = dir.path().join("maps").join("chunks.geojson");
    let cells = get_chunks(&fixture("triangle.geojson"), 0.006, Some(&map)).unwrap();

    let layer = VectorLayer::open(&map).unwrap();
    assert_eq!(layer.crs, Crs::Wgs84);
    assert_eq!(layer.len(), cells.len());
    for (feature, cell) in layer.features.iter().zip(&cells) {
        let name = feature
            .property(RASTERFILE_PROPERTY)
            .and_then(|v| v.as_str())
            .unwrap();
        assert_eq!(name, cell.filename());
    }
}

#[test]
fn test_cells_intersect_boundary() {
    let boundary = VectorLayer::open(&fixture("triangle.geojson"))
        .unwrap()
        .first_geometry()
        .unwrap()
        .unwrap();
    for cell in get_chunks(&fixture("triangle.geojson"), 0.003, None).unwrap() {
        assert!(cell.polygon().intersects(&boundary));
    }
}

#[test]
fn test_boundary_in_web_mercator() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("boundary_3857.geojson");
    let square = geo::Rect::new(
        Crs::WebMercator.from_wgs84(geo::Coord { x: 10.0, y: 20.0 }),
        Crs::WebMercator.from_wgs84(geo::Coord { x: 10.5, y: 20.5 }),
    );
    let mut layer = VectorLayer::new(Crs::WebMercator);
    layer.push(feature_from_geometry(
        &geo::Geometry::Polygon(square.to_polygon()),
        std::iter::empty(),
    ));
    layer.write(&path).unwrap();

    let cells = get_chunks(&path, 0.25, None).unwrap();
    assert!(!cells.is_empty());
    for cell in &cells {
        let anchor = cell.anchor();
        assert!(anchor.x > 9.9 && anchor.x < 10.6, "{anchor:?}");
        assert!(anchor.y > 19.9 && anchor.y < 20.6, "{anchor:?}");
    }
}

#[test]
fn test_invalid_step() {
    let err = get_chunks(&fixture("triangle.geojson"), 0.0, None).unwrap_err();
    assert!(matches!(err, ChunkError::InvalidStep(_)));
}

#[test]
fn test_empty_boundary() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.geojson");
    fs::write(&path, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();

    let map = dir.path().join("map.geojson");
    let cells = get_chunks(&path, 0.02, Some(&map)).unwrap();
    assert!(cells.is_empty());
    assert!(VectorLayer::open(&map).unwrap().is_empty());
}

#[test]
fn test_missing_boundary() {
    let dir = tempdir().unwrap();
    let err = get_chunks(&dir.path().join("nope.geojson"), 0.02, None).unwrap_err();
    assert!(matches!(err, ChunkError::Layer(LayerError::Io { .. })));
}
