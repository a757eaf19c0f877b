use std::sync::Arc;
use std::time::Duration;

use wpical::camera::{BoardDetector, CameraCalibrationConfig, CameraCalibrator};

use crate::CameraArgs;

#[cfg(feature = "opencv")]
fn board_detector(
    config: &CameraCalibrationConfig,
) -> Result<Arc<dyn BoardDetector>, Box<dyn std::error::Error>> {
    let detector = wpical::camera::OpenCvCharucoDetector::new(config.board()?)?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "opencv"))]
fn board_detector(
    _config: &CameraCalibrationConfig,
) -> Result<Arc<dyn BoardDetector>, Box<dyn std::error::Error>> {
    Err("ChArUco detection needs the `opencv` feature".into())
}

pub fn run(args: CameraArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = CameraCalibrationConfig::from_inches(
        args.workers,
        args.square_width,
        args.marker_width,
        args.board_width,
        args.board_height,
    );
    let detector = board_detector(&config)?;
    let output = args.output.unwrap_or_else(|| {
        args.video
            .parent()
            .map(|dir| dir.join("cameracalibration.json"))
            .unwrap_or_else(|| "cameracalibration.json".into())
    });

    let calibrator = CameraCalibrator::new(&args.video, config, detector);

    ctrlc::set_handler({
        let cancel_token = calibrator.cancel_token();
        move || {
            println!("Received Ctrl-C signal. Stopping calibration !!");
            cancel_token.cancel();
        }
    })?;

    let mut last_reported = usize::MAX;
    while !calibrator.is_finished() {
        let processed = calibrator.frames_processed();
        if processed != last_reported {
            log::info!("processed {processed}/{} frames", calibrator.total_frames());
            last_reported = processed;
        }
        std::thread::sleep(Duration::from_millis(500));
    }

    if let Some(failure) = calibrator.failure() {
        return Err(failure.into());
    }
    let model = calibrator
        .camera_model()
        .ok_or("calibration finished without a camera model")?;

    model.write_json_file(&output)?;
    println!(
        "fx {:.3} fy {:.3} cx {:.3} cy {:.3}, reprojection error {:.4} px",
        model.fx(),
        model.fy(),
        model.cx(),
        model.cy(),
        model.avg_reprojection_error
    );
    println!("wrote {}", output.display());
    Ok(())
}
