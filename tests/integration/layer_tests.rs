use geostage::layers::{
    copy_layer, create_remap, create_variable, id_filter, merge_layers, record_filter, CompareOp,
    CopyOptions, ShapeFilter, VariableOptions,
};
use geostage::spatial::{Crs, LayerError, VectorLayer};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn comids(path: &std::path::Path) -> Vec<i64> {
    VectorLayer::open(path)
        .unwrap()
        .features
        .iter()
        .filter_map(|f| f.property("comid").and_then(|v| v.as_i64()))
        .collect()
}

#[test]
fn test_copy_with_remap_and_record_filter() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("rivers.geojson");
    let options = CopyOptions::default()
        .with_remap(create_remap(["comid", "ftype", "lengthkm"]))
        .with_filter(record_filter("ftype", json!("StreamRiver"), CompareOp::Eq));

    let report = copy_layer(&fixture("flowlines.geojson"), &output, &options).unwrap();
    assert_eq!(report.read, 4);
    assert_eq!(report.written, 2);
    assert_eq!(comids(&output), vec![101, 103]);

    let layer = VectorLayer::open(&output).unwrap();
    let properties = layer.features[0].properties.as_ref().unwrap();
    assert_eq!(properties.len(), 3);
    assert!(properties.contains_key("lengthkm"));
    assert!(!properties.contains_key("gnis_name"));
}

#[test]
fn test_copy_within_boundary() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("inside.geojson");
    let filter = ShapeFilter::from_layer(&fixture("triangle.geojson")).unwrap();
    let options = CopyOptions::default()
        .with_remap(create_remap(["comid", "available"]))
        .with_filter(filter);

    let report = copy_layer(&fixture("flowlines.geojson"), &output, &options).unwrap();
    assert_eq!(report.written, 2);
    // 101 crosses the triangle, 104 is flagged available.
    assert_eq!(comids(&output), vec![101, 104]);
}

#[test]
fn test_limit_stops_early() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("first.geojson");
    let options = CopyOptions::default()
        .with_remap(create_remap(["comid"]))
        .with_limit(Some(2));

    let report = copy_layer(&fixture("flowlines.geojson"), &output, &options).unwrap();
    assert_eq!(report.read, 2);
    assert_eq!(comids(&output), vec![101, 102]);
}

#[test]
fn test_merge_layers_appends() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("merged.geojson");
    let ids: HashSet<i64> = [102, 104].into_iter().collect();
    let options = CopyOptions::default()
        .with_remap(create_remap(["comid"]))
        .with_filter(id_filter("comid", ids));

    let inputs = [fixture("flowlines.geojson"), fixture("flowlines.geojson")];
    let report = merge_layers(&inputs, &output, options).unwrap();
    assert_eq!(report.read, 8);
    assert_eq!(report.written, 4);
    assert_eq!(comids(&output), vec![102, 104, 102, 104]);
}

#[test]
fn test_append_requires_same_crs() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("mercator.geojson");
    VectorLayer::new(Crs::WebMercator).write(&output).unwrap();

    let options = CopyOptions::default().with_append(true);
    let err = copy_layer(&fixture("flowlines.geojson"), &output, &options).unwrap_err();
    assert!(matches!(
        err,
        LayerError::CrsMismatch {
            expected: Crs::WebMercator,
            found: Crs::Wgs84,
            ..
        }
    ));
}

#[test]
fn test_select_fields_keeps_original_names() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("names.geojson");
    let options = CopyOptions::default().with_fields(["GNIS_NAME"]);

    copy_layer(&fixture("flowlines.geojson"), &output, &options).unwrap();
    let layer = VectorLayer::open(&output).unwrap();
    assert_eq!(layer.len(), 4);
    for feature in &layer.features {
        let properties = feature.properties.as_ref().unwrap();
        assert_eq!(properties.keys().collect::<Vec<_>>(), vec!["GNIS_NAME"]);
    }
}

#[test]
fn test_create_variable_feeds_shape_filter() {
    let dir = tempdir().unwrap();
    let flagged = dir.path().join("flagged.geojson");
    let options = VariableOptions::default()
        .with_index("COMID")
        .with_default(Some(json!(0)));

    let count = create_variable(&fixture("flowlines.geojson"), &flagged, [103], &options).unwrap();
    assert_eq!(count, 1);

    let output = dir.path().join("inside.geojson");
    let copy = CopyOptions::default()
        .with_remap(create_remap(["comid", "available"]))
        .with_filter(ShapeFilter::from_layer(&fixture("triangle.geojson")).unwrap());
    copy_layer(&flagged, &output, &copy).unwrap();
    // 101 crosses the triangle, 103 is flagged, 104 lost its flag to the default.
    assert_eq!(comids(&output), vec![101, 103]);
}

#[test]
fn test_create_variable_without_default() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("marked.geojson");
    let options = VariableOptions::default()
        .with_variable("selected")
        .with_value(json!("yes"))
        .with_index("COMID");

    // The second 101 has no feature left to flag; 999 matches nothing.
    let count =
        create_variable(&fixture("flowlines.geojson"), &output, [101, 101, 999], &options)
            .unwrap();
    assert_eq!(count, 1);

    let layer = VectorLayer::open(&output).unwrap();
    assert_eq!(layer.len(), 4);
    let selected: Vec<_> = layer
        .features
        .iter()
        .map(|f| f.property("selected").cloned())
        .collect();
    assert_eq!(selected, vec![Some(json!("yes")), None, None, None]);
    assert_eq!(layer.features[3].property("available"), Some(&json!(true)));
}

#[test]
fn test_create_variable_default_index_is_lowercase_comid() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("none.geojson");

    // The fixture spells the id COMID, so the default index finds nothing.
    let count = create_variable(
        &fixture("flowlines.geojson"),
        &output,
        [101],
        &VariableOptions::default(),
    )
    .unwrap();
    assert_eq!(count, 0);
}
