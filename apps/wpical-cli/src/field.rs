use std::sync::Arc;
use std::time::Duration;

use wpical::camera::{CameraModel, METERS_PER_INCH};
use wpical::field::{FieldCalibrationConfig, FieldCalibrator, TagDetector};
use wpical::layout::{AprilTagFieldLayout, Fieldmap};

use crate::FieldArgs;

#[cfg(feature = "apriltag")]
fn tag_detector() -> Result<Arc<dyn TagDetector>, Box<dyn std::error::Error>> {
    Ok(Arc::new(wpical::field::AprilTagDetector::new()?))
}

#[cfg(not(feature = "apriltag"))]
fn tag_detector() -> Result<Arc<dyn TagDetector>, Box<dyn std::error::Error>> {
    Err("AprilTag detection needs the `apriltag` feature".into())
}

pub fn run(args: FieldArgs) -> Result<(), Box<dyn std::error::Error>> {
    let camera_model = CameraModel::from_json_file(&args.camera)?;
    let ideal = AprilTagFieldLayout::from_json_file(&args.ideal)?;
    let config = FieldCalibrationConfig {
        tag_size_m: args.tag_size * METERS_PER_INCH,
        frame_stride: args.stride,
        ..FieldCalibrationConfig::default()
    };
    let tag_size_m = config.tag_size_m;

    let mut calibrator = FieldCalibrator::new(config, tag_detector()?);

    ctrlc::set_handler({
        let cancel_token = calibrator.cancel_token();
        move || {
            println!("Received Ctrl-C signal. Stopping calibration !!");
            cancel_token.cancel();
        }
    })?;

    calibrator.calibrate(
        &args.input_dir,
        &camera_model,
        &ideal,
        args.pinned,
        args.show_debug,
    );
    while !calibrator.is_finished() {
        std::thread::sleep(Duration::from_millis(200));
    }

    if let Some(failure) = calibrator.failure() {
        return Err(failure.into());
    }
    let layout = calibrator
        .field_layout()
        .ok_or("calibration finished without a layout")?;
    for warning in calibrator.warnings() {
        println!("warning: {warning:?}");
    }

    std::fs::create_dir_all(&args.output)?;
    let json = args.output.join("field_calibration.json");
    let fmap = args.output.join("field_calibration.fmap");
    layout.write_json_file(&json)?;
    Fieldmap::from_layout(&layout, tag_size_m).write_file(&fmap)?;
    println!("calibrated {} tags", layout.len());
    println!("wrote {} and {}", json.display(), fmap.display());
    Ok(())
}
