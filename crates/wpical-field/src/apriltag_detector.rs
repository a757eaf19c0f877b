//! tag36h11 detection through the `apriltag` bindings.

use apriltag::{Detector, DetectorBuilder, Family, Image};
use wpical_io::GrayFrame;

use crate::detection::{TagDetection, TagDetector};

/// Bit errors corrected when decoding a tag.
const BITS_CORRECTED: usize = 1;

/// tag36h11 detector with single-bit error correction.
///
/// The underlying C detector is not `Send`, so one is built for every
/// [`TagDetector::detect`] call on the calling thread.
pub struct AprilTagDetector {
    bits_corrected: usize,
}

impl AprilTagDetector {
    /// Fails if the C detector cannot be created.
    pub fn new() -> Result<Self, apriltag::Error> {
        build_detector(BITS_CORRECTED)?;
        Ok(Self {
            bits_corrected: BITS_CORRECTED,
        })
    }
}

fn build_detector(bits_corrected: usize) -> Result<Detector, apriltag::Error> {
    DetectorBuilder::new()
        .add_family_bits(Family::tag_36h11(), bits_corrected)
        .build()
}

fn to_apriltag_image(frame: &GrayFrame) -> Result<Image, apriltag::Error> {
    let mut image = Image::zeros_with_stride(frame.width, frame.height, frame.width)?;
    for (y, row) in frame.data.chunks_exact(frame.width).enumerate() {
        for (x, &value) in row.iter().enumerate() {
            image[(x, y)] = value;
        }
    }
    Ok(image)
}

impl TagDetector for AprilTagDetector {
    fn detect(&self, frame: &GrayFrame) -> Vec<TagDetection> {
        if frame.width == 0 || frame.height == 0 {
            return Vec::new();
        }
        let image = match to_apriltag_image(frame) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("frame {}: cannot convert for detection: {err}", frame.index);
                return Vec::new();
            }
        };
        let mut detector = match build_detector(self.bits_corrected) {
            Ok(detector) => detector,
            Err(err) => {
                log::warn!("frame {}: cannot build tag detector: {err}", frame.index);
                return Vec::new();
            }
        };
        detector
            .detect(&image)
            .into_iter()
            .map(|det| TagDetection {
                id: det.id() as i32,
                corners: det.corners(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// tag36h11 id 0, data bits row-major from the top-left cell, 1 = white.
    const TAG36H11_ID0: u64 = 0xd5d628584;

    const CELL_PX: usize = 20;
    const OFFSET_PX: usize = 100;
    const IMAGE_PX: usize = 400;

    /// Tag id 0 drawn axis aligned: white quiet zone, black border, 6x6 data.
    fn render_id0() -> GrayFrame {
        let mut data = vec![255u8; IMAGE_PX * IMAGE_PX];
        for row in 0..10 {
            for col in 0..10 {
                let white = match (row, col) {
                    (0 | 9, _) | (_, 0 | 9) => true,
                    (1 | 8, _) | (_, 1 | 8) => false,
                    (r, c) => (TAG36H11_ID0 >> (35 - ((r - 2) * 6 + (c - 2)))) & 1 == 1,
                };
                if white {
                    continue;
                }
                for y in 0..CELL_PX {
                    let start = (OFFSET_PX + row * CELL_PX + y) * IMAGE_PX + OFFSET_PX + col * CELL_PX;
                    data[start..start + CELL_PX].fill(0);
                }
            }
        }
        GrayFrame::new(0, IMAGE_PX, IMAGE_PX, data).expect("frame size matches data")
    }

    #[test]
    fn test_detects_rendered_tag() {
        let detector = AprilTagDetector::new().expect("detector");
        let detections = detector.detect(&render_id0());
        assert_eq!(detections.len(), 1, "{detections:?}");
        assert_eq!(detections[0].id, 0);

        // black border spans cells 1..=8
        let (lo, hi) = (
            (OFFSET_PX + CELL_PX) as f64,
            (OFFSET_PX + 9 * CELL_PX) as f64,
        );
        for [u, v] in detections[0].corners {
            assert!((u - lo).abs() < 2.0 || (u - hi).abs() < 2.0, "u = {u}");
            assert!((v - lo).abs() < 2.0 || (v - hi).abs() < 2.0, "v = {v}");
        }
    }

    #[test]
    fn test_blank_frame_has_no_tags() {
        let detector = AprilTagDetector::new().expect("detector");
        let frame = GrayFrame::new(0, 64, 48, vec![128; 64 * 48]).expect("frame");
        assert!(detector.detect(&frame).is_empty());
    }
}
