//! Pinhole camera with the 8-coefficient rational polynomial distortion model.
use nalgebra::{Matrix3, Point3};
use thiserror::Error;

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Fixed-point undistortion diverged.
    #[error("Failed to undistort point: {0}")]
    UndistortFailed(String),
}

/// Result type for camera operations.
pub type CameraResult<T> = Result<T, CameraError>;

/// Focal lengths and principal point, in pixels. No skew.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length along x.
    pub fx: f64,
    /// Focal length along y.
    pub fy: f64,
    /// Principal point x.
    pub cx: f64,
    /// Principal point y.
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// `K = [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Pixel to normalized image coordinates, ignoring distortion.
    pub fn normalize(&self, u: f64, v: f64) -> (f64, f64) {
        ((u - self.cx) / self.fx, (v - self.cy) / self.fy)
    }

    /// Normalized image coordinates to pixel.
    pub fn denormalize(&self, x: f64, y: f64) -> (f64, f64) {
        (self.fx * x + self.cx, self.fy * y + self.cy)
    }
}

/// Rational polynomial lens distortion with OpenCV coefficient semantics:
///
/// `x_d = x * (1 + k1 r² + k2 r⁴ + k3 r⁶) / (1 + k4 r² + k5 r⁴ + k6 r⁶) + tangential(p1, p2)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[allow(missing_docs)]
pub struct PolynomialDistortion {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
    pub p1: f64,
    pub p2: f64,
}

impl PolynomialDistortion {
    /// No distortion.
    pub fn none() -> Self {
        Self::default()
    }

    /// From the OpenCV ordering `k1, k2, p1, p2, k3, k4, k5, k6`.
    pub fn from_opencv(c: &[f64; 8]) -> Self {
        let [k1, k2, p1, p2, k3, k4, k5, k6] = *c;
        Self {
            k1,
            k2,
            k3,
            k4,
            k5,
            k6,
            p1,
            p2,
        }
    }

    /// To the OpenCV ordering `k1, k2, p1, p2, k3, k4, k5, k6`.
    pub fn to_opencv(&self) -> [f64; 8] {
        [self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6]
    }

    /// Any coefficient non-zero.
    pub fn has_distortion(&self) -> bool {
        self.to_opencv().iter().any(|c| *c != 0.0)
    }

    fn radial(&self, r2: f64) -> f64 {
        let num = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let den = 1.0 + r2 * (self.k4 + r2 * (self.k5 + r2 * self.k6));
        num / den
    }

    fn tangential(&self, x: f64, y: f64) -> (f64, f64) {
        let r2 = x * x + y * y;
        (
            2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// Distort a normalized image point.
    pub fn distort(&self, x: f64, y: f64) -> (f64, f64) {
        let kr = self.radial(x * x + y * y);
        let (dx, dy) = self.tangential(x, y);
        (x * kr + dx, y * kr + dy)
    }

    /// Invert [`Self::distort`] by fixed-point iteration.
    pub fn undistort(&self, x_d: f64, y_d: f64) -> CameraResult<(f64, f64)> {
        const MAX_ITERATIONS: usize = 20;
        const EPSILON: f64 = 1e-12;

        let (mut x, mut y) = (x_d, y_d);
        for _ in 0..MAX_ITERATIONS {
            let inv = 1.0 / self.radial(x * x + y * y);
            if !inv.is_finite() {
                return Err(CameraError::UndistortFailed(format!(
                    "radial term diverged at ({x_d}, {y_d})"
                )));
            }
            let (dx, dy) = self.tangential(x, y);
            let next = ((x_d - dx) * inv, (y_d - dy) * inv);
            let done = (next.0 - x).abs() < EPSILON && (next.1 - y).abs() < EPSILON;
            (x, y) = next;
            if done {
                break;
            }
        }
        Ok((x, y))
    }
}

/// Intrinsics plus optional lens distortion.
#[derive(Debug, Clone, PartialEq)]
pub struct PinholeCamera {
    /// Camera intrinsics.
    pub intrinsics: CameraIntrinsics,
    /// Lens distortion, `None` for an ideal pinhole.
    pub distortion: Option<PolynomialDistortion>,
}

impl PinholeCamera {
    /// Ideal pinhole camera.
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: None,
        }
    }

    /// Camera with lens distortion.
    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: PolynomialDistortion) -> Self {
        Self {
            intrinsics,
            distortion: Some(distortion),
        }
    }

    /// Project a point given in the camera frame to pixels.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, point: &Point3<f64>) -> Option<[f64; 2]> {
        if point.z <= 1e-9 {
            return None;
        }
        let (x, y) = (point.x / point.z, point.y / point.z);
        let (x, y) = self.distortion.map_or((x, y), |d| d.distort(x, y));
        let (u, v) = self.intrinsics.denormalize(x, y);
        Some([u, v])
    }

    /// Pixel to undistorted normalized image coordinates.
    pub fn normalize_point(&self, u: f64, v: f64) -> CameraResult<[f64; 2]> {
        let (x, y) = self.intrinsics.normalize(u, v);
        let (x, y) = match &self.distortion {
            Some(d) => d.undistort(x, y)?,
            None => (x, y),
        };
        Ok([x, y])
    }
}

impl Default for PinholeCamera {
    fn default() -> Self {
        Self::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0))
    }
}
