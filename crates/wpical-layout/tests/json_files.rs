use std::collections::BTreeMap;

use approx::assert_relative_eq;
use nalgebra::Vector3;
use wpical_layout::{combine, AprilTag, AprilTagFieldLayout, Fieldmap, LayoutError, Pose3d};

fn field() -> AprilTagFieldLayout {
    let tags = (1..=4).map(|id| {
        let x = id as f64 * 2.0;
        AprilTag::new(
            id,
            Pose3d::new(Vector3::new(x, 1.0, 1.3), Vector3::new(0.0, 0.0, 0.3 * id as f64)),
        )
    });
    AprilTagFieldLayout::new(tags, 16.54, 8.21).unwrap()
}

#[test]
fn layout_survives_a_trip_through_disk() -> Result<(), LayoutError> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("field_calibration.json");

    let layout = field();
    layout.write_json_file(&path)?;
    let loaded = AprilTagFieldLayout::from_json_file(&path)?;

    assert_eq!(loaded.tag_ids(), layout.tag_ids());
    assert_relative_eq!(loaded.field_length(), 16.54);
    for id in loaded.tag_ids() {
        assert_relative_eq!(
            loaded.get_tag_pose(id).unwrap(),
            layout.get_tag_pose(id).unwrap(),
            epsilon = 1e-12
        );
    }
    Ok(())
}

#[test]
fn combined_layout_and_fieldmap_are_written() -> Result<(), LayoutError> {
    let dir = tempfile::tempdir()?;
    let ideal = field();
    let mut shifted = field();
    shifted.set_origin(Pose3d::translation(0.0, -0.5, 0.0));

    let requests: BTreeMap<i32, Option<&AprilTagFieldLayout>> =
        [(1, Some(&shifted)), (3, None)].into_iter().collect();
    let combined = combine(&ideal, &requests);
    combined.write_json_file(dir.path().join("combined_calibration.json"))?;
    Fieldmap::from_layout(&combined, 0.1651).write_file(dir.path().join("combined_calibration.fmap"))?;

    let back = AprilTagFieldLayout::from_json_file(dir.path().join("combined_calibration.json"))?;
    assert_eq!(back.tag_ids(), vec![1, 3]);
    assert_relative_eq!(back.get_tag_pose(1).unwrap().translation.y, 1.5, epsilon = 1e-12);

    let raw = std::fs::read_to_string(dir.path().join("combined_calibration.fmap"))?;
    let map: Fieldmap = serde_json::from_str(&raw)?;
    assert_eq!(map.fiducials.len(), 2);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let err = AprilTagFieldLayout::from_json_file("/nonexistent/wpical/layout.json");
    assert!(matches!(err, Err(LayoutError::Io(_))));
}
