use std::collections::BTreeMap;
use std::path::PathBuf;

use wpical::camera::METERS_PER_INCH;
use wpical::layout::{AprilTagFieldLayout, Fieldmap};

use crate::{CombineArgs, CompareArgs};

/// Parse a `--tag` value: `7` takes the ideal pose, `7=red.json` takes the
/// pose from that layout.
fn parse_tag_request(value: &str) -> Result<(i32, Option<PathBuf>), String> {
    let (id, path) = match value.split_once('=') {
        Some((id, path)) if !path.is_empty() => (id, Some(PathBuf::from(path))),
        Some(_) => return Err(format!("missing layout path in `{value}`")),
        None => (value, None),
    };
    let id = id
        .trim()
        .parse()
        .map_err(|e| format!("invalid tag id in `{value}`: {e}"))?;
    Ok((id, path))
}

pub fn combine(args: CombineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ideal = AprilTagFieldLayout::from_json_file(&args.ideal)?;

    // each source file is read once, however many tags it supplies
    let mut sources: BTreeMap<PathBuf, AprilTagFieldLayout> = BTreeMap::new();
    let mut picks = Vec::with_capacity(args.tag.len());
    for value in &args.tag {
        let (id, path) = parse_tag_request(value)?;
        if let Some(path) = &path {
            if !sources.contains_key(path) {
                sources.insert(path.clone(), AprilTagFieldLayout::from_json_file(path)?);
            }
        }
        picks.push((id, path));
    }

    let requests: BTreeMap<i32, Option<&AprilTagFieldLayout>> = picks
        .iter()
        .map(|(id, path)| (*id, path.as_ref().and_then(|p| sources.get(p))))
        .collect();
    let combined = wpical::layout::combine(&ideal, &requests);

    std::fs::create_dir_all(&args.output)?;
    let json = args.output.join("combined_calibration.json");
    let fmap = args.output.join("combined_calibration.fmap");
    combined.write_json_file(&json)?;
    Fieldmap::from_layout(&combined, args.tag_size * METERS_PER_INCH).write_file(&fmap)?;
    println!("combined {} tags", combined.len());
    println!("wrote {} and {}", json.display(), fmap.display());
    Ok(())
}

pub fn compare(args: CompareArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ideal = AprilTagFieldLayout::from_json_file(&args.ideal)?;
    let calibrated = AprilTagFieldLayout::from_json_file(&args.calibrated)?;
    let report = wpical::layout::compare(&ideal, &calibrated, args.focused, args.reference)?;

    let d = report.translation_difference;
    let r = report.reference_offset;
    println!("tag {} (ideal - calibrated)", report.focused_tag);
    println!("  x {:+.4} m  y {:+.4} m  z {:+.4} m", d.x, d.y, d.z);
    println!(
        "  yaw {:+.3} deg  pitch {:+.3} deg  roll {:+.3} deg",
        report.yaw_difference_deg, report.pitch_difference_deg, report.roll_difference_deg
    );
    println!("tag {} relative to tag {}", report.reference_tag, report.focused_tag);
    println!("  x {:+.4} m  y {:+.4} m  z {:+.4} m", r.x, r.y, r.z);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wpical::layout::{AprilTag, Pose3d};

    fn write_layout(dir: &std::path::Path, name: &str, tags: &[(i32, f64)]) -> PathBuf {
        let layout = AprilTagFieldLayout::new(
            tags.iter()
                .map(|&(id, x)| AprilTag::new(id, Pose3d::translation(x, 1.0, 0.5))),
            16.54,
            8.21,
        )
        .unwrap();
        let path = dir.join(name);
        layout.write_json_file(&path).unwrap();
        path
    }

    #[test]
    fn test_parse_tag_request() {
        assert_eq!(parse_tag_request("7"), Ok((7, None)));
        assert_eq!(
            parse_tag_request("12=red/field_calibration.json"),
            Ok((12, Some(PathBuf::from("red/field_calibration.json"))))
        );
        assert!(parse_tag_request("seven").is_err());
        assert!(parse_tag_request("7=").is_err());
    }

    #[test]
    fn test_combine_writes_layout_and_fieldmap() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let ideal = write_layout(dir.path(), "ideal.json", &[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let red = write_layout(dir.path(), "red.json", &[(1, 1.5), (2, 2.5)]);
        let output = dir.path().join("out");

        combine(CombineArgs {
            ideal,
            tag: vec![format!("2={}", red.display()), "3".to_string()],
            tag_size: 6.5,
            output: output.clone(),
        })?;

        let combined =
            AprilTagFieldLayout::from_json_file(output.join("combined_calibration.json"))?;
        assert_eq!(combined.tag_ids(), vec![2, 3]);
        approx::assert_relative_eq!(combined.get_tag_pose(2).unwrap().translation.x, 2.5);
        approx::assert_relative_eq!(combined.get_tag_pose(3).unwrap().translation.x, 3.0);
        assert!(output.join("combined_calibration.fmap").is_file());
        Ok(())
    }

    #[test]
    fn test_compare_rejects_tag_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let ideal = write_layout(dir.path(), "ideal.json", &[(1, 1.0), (2, 2.0)]);
        let calibrated = write_layout(dir.path(), "calibrated.json", &[(1, 1.1)]);
        let result = compare(CompareArgs {
            ideal,
            calibrated,
            focused: 1,
            reference: 2,
        });
        assert!(result.is_err());
    }
}
