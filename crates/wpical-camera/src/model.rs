use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use wpical_pnp::{CameraIntrinsics, PinholeCamera, PolynomialDistortion};

/// Errors raised while reading or writing a [`CameraModel`].
#[derive(Debug, Error)]
pub enum CameraModelError {
    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A required key is absent.
    #[error("camera model is missing `{0}`")]
    MissingField(&'static str),

    /// A key holds a value of the wrong shape.
    #[error("camera model field `{field}` is malformed: {reason}")]
    Malformed {
        /// Offending key.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Value of `avg_reprojection_error` for a model that was never solved.
pub const UNSET_REPROJECTION_ERROR: f64 = -1.0;

/// Pinhole intrinsics with 8 OpenCV distortion coefficients.
///
/// A model is either fully populated (`avg_reprojection_error >= 0`) or unset
/// (`avg_reprojection_error == -1`).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    /// `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub intrinsic_matrix: [[f64; 3]; 3],
    /// `k1, k2, p1, p2, k3, k4, k5, k6`.
    pub distortion_coefficients: [f64; 8],
    /// RMS reprojection error in pixels, `-1` when unset.
    pub avg_reprojection_error: f64,
}

#[derive(Serialize)]
struct CameraModelJson<'a> {
    avg_reprojection_error: f64,
    camera_matrix: Vec<f64>,
    distortion_coefficients: &'a [f64],
}

impl Default for CameraModel {
    fn default() -> Self {
        Self::unset()
    }
}

impl CameraModel {
    pub fn new(
        intrinsic_matrix: [[f64; 3]; 3],
        distortion_coefficients: [f64; 8],
        avg_reprojection_error: f64,
    ) -> Self {
        Self {
            intrinsic_matrix,
            distortion_coefficients,
            avg_reprojection_error,
        }
    }

    /// The "no calibration" model: zero matrix, zero distortion, error `-1`.
    pub fn unset() -> Self {
        Self {
            intrinsic_matrix: [[0.0; 3]; 3],
            distortion_coefficients: [0.0; 8],
            avg_reprojection_error: UNSET_REPROJECTION_ERROR,
        }
    }

    pub fn is_set(&self) -> bool {
        self.avg_reprojection_error >= 0.0
    }

    pub fn fx(&self) -> f64 {
        self.intrinsic_matrix[0][0]
    }

    pub fn fy(&self) -> f64 {
        self.intrinsic_matrix[1][1]
    }

    pub fn cx(&self) -> f64 {
        self.intrinsic_matrix[0][2]
    }

    pub fn cy(&self) -> f64 {
        self.intrinsic_matrix[1][2]
    }

    /// The projection model for this calibration.
    pub fn to_pinhole(&self) -> PinholeCamera {
        PinholeCamera::with_distortion(
            CameraIntrinsics::new(self.fx(), self.fy(), self.cx(), self.cy()),
            PolynomialDistortion::from_opencv(&self.distortion_coefficients),
        )
    }

    /// Parse a camera model.
    ///
    /// Accepts the WPILib layout (`camera_matrix` as a nested 3x3 array, a flat
    /// array of 9 or `{"data": [...]}`) and the CalibDB layout, recognized by
    /// its top level `"camera"` key. Distortion is zero padded or truncated to
    /// 8 coefficients.
    pub fn from_json_str(s: &str) -> Result<Self, CameraModelError> {
        let root: Value = serde_json::from_str(s)?;

        let matrix = root
            .get("camera_matrix")
            .ok_or(CameraModelError::MissingField("camera_matrix"))?;
        let distortion = root
            .get("distortion_coefficients")
            .ok_or(CameraModelError::MissingField("distortion_coefficients"))?;
        let error = root
            .get("avg_reprojection_error")
            .ok_or(CameraModelError::MissingField("avg_reprojection_error"))?
            .as_f64()
            .ok_or_else(|| CameraModelError::Malformed {
                field: "avg_reprojection_error",
                reason: "not a number".to_string(),
            })?;

        let (matrix, distortion) = if root.get("camera").is_some() {
            (
                matrix
                    .get("data")
                    .ok_or(CameraModelError::MissingField("camera_matrix.data"))?,
                distortion
                    .get("data")
                    .ok_or(CameraModelError::MissingField("distortion_coefficients.data"))?,
            )
        } else {
            (matrix, distortion)
        };

        Ok(Self {
            intrinsic_matrix: parse_matrix(matrix)?,
            distortion_coefficients: parse_distortion(distortion)?,
            avg_reprojection_error: error,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CameraModelError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Serialize in the WPILib layout with a flat row-major `camera_matrix`.
    pub fn to_json_string(&self) -> Result<String, CameraModelError> {
        let json = CameraModelJson {
            avg_reprojection_error: self.avg_reprojection_error,
            camera_matrix: self.intrinsic_matrix.iter().flatten().copied().collect(),
            distortion_coefficients: &self.distortion_coefficients,
        };
        Ok(wpical_layout::to_json_pretty(&json)?)
    }

    pub fn write_json_file(&self, path: impl AsRef<Path>) -> Result<(), CameraModelError> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

fn numbers(value: &Value, field: &'static str) -> Result<Vec<f64>, CameraModelError> {
    let array = value.as_array().ok_or_else(|| CameraModelError::Malformed {
        field,
        reason: "expected an array".to_string(),
    })?;
    array
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| CameraModelError::Malformed {
                field,
                reason: format!("`{v}` is not a number"),
            })
        })
        .collect()
}

fn parse_matrix(value: &Value) -> Result<[[f64; 3]; 3], CameraModelError> {
    const FIELD: &str = "camera_matrix";

    let value = match value.get("data") {
        Some(data) => data,
        None => value,
    };
    let rows = value.as_array().ok_or_else(|| CameraModelError::Malformed {
        field: FIELD,
        reason: "expected an array".to_string(),
    })?;

    let flat = if rows.first().is_some_and(Value::is_array) {
        let mut flat = Vec::with_capacity(9);
        for row in rows {
            let row = numbers(row, FIELD)?;
            if row.len() != 3 {
                return Err(CameraModelError::Malformed {
                    field: FIELD,
                    reason: format!("row has {} entries, expected 3", row.len()),
                });
            }
            flat.extend(row);
        }
        flat
    } else {
        numbers(value, FIELD)?
    };

    if flat.len() != 9 {
        return Err(CameraModelError::Malformed {
            field: FIELD,
            reason: format!("{} entries, expected 9", flat.len()),
        });
    }
    let mut k = [[0.0; 3]; 3];
    for (i, v) in flat.into_iter().enumerate() {
        k[i / 3][i % 3] = v;
    }
    Ok(k)
}

fn parse_distortion(value: &Value) -> Result<[f64; 8], CameraModelError> {
    let value = match value.get("data") {
        Some(data) => data,
        None => value,
    };
    let coeffs = numbers(value, "distortion_coefficients")?;
    if coeffs.len() > 8 {
        log::debug!("truncating {} distortion coefficients to 8", coeffs.len());
    }
    let mut out = [0.0; 8];
    for (o, c) in out.iter_mut().zip(coeffs) {
        *o = c;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> CameraModel {
        CameraModel::new(
            [[1000.0, 0.0, 960.0], [0.0, 1001.0, 540.0], [0.0, 0.0, 1.0]],
            [-0.1, 0.02, 1e-4, -2e-4, 0.001, 0.0, 0.0, 0.0],
            0.31,
        )
    }

    #[test]
    fn test_unset_sentinel() {
        let model = CameraModel::unset();
        assert!(!model.is_set());
        assert_eq!(model.avg_reprojection_error, -1.0);
        assert!(sample().is_set());
    }

    #[test]
    fn test_json_round_trip() -> Result<(), CameraModelError> {
        let model = sample();
        let parsed = CameraModel::from_json_str(&model.to_json_string()?)?;
        assert_eq!(parsed, model);
        Ok(())
    }

    #[test]
    fn test_nested_matrix_and_short_distortion() -> Result<(), CameraModelError> {
        let json = r#"{
            "camera_matrix": [[600.0, 0.0, 320.0], [0.0, 610.0, 240.0], [0.0, 0.0, 1.0]],
            "distortion_coefficients": [0.1, -0.2, 0.0, 0.0, 0.05],
            "avg_reprojection_error": 0.4
        }"#;
        let model = CameraModel::from_json_str(json)?;
        assert_relative_eq!(model.fy(), 610.0);
        assert_relative_eq!(model.cy(), 240.0);
        assert_eq!(
            model.distortion_coefficients,
            [0.1, -0.2, 0.0, 0.0, 0.05, 0.0, 0.0, 0.0]
        );
        Ok(())
    }

    #[test]
    fn test_data_wrapped_matrix_and_long_distortion() -> Result<(), CameraModelError> {
        let json = r#"{
            "camera_matrix": {"rows": 3, "cols": 3, "data": [1, 0, 2, 0, 3, 4, 0, 0, 1]},
            "distortion_coefficients": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14],
            "avg_reprojection_error": 0
        }"#;
        let model = CameraModel::from_json_str(json)?;
        assert_relative_eq!(model.fx(), 1.0);
        assert_relative_eq!(model.cx(), 2.0);
        assert_eq!(
            model.distortion_coefficients,
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
        );
        Ok(())
    }

    #[test]
    fn test_calibdb_variant() -> Result<(), CameraModelError> {
        let json = r#"{
            "camera": "Microsoft LifeCam HD-3000",
            "camera_matrix": {"rows": 3, "cols": 3, "dt": "d",
                "data": [699.3, 0.0, 650.3, 0.0, 698.4, 360.1, 0.0, 0.0, 1.0]},
            "distortion_coefficients": {"rows": 1, "cols": 5, "dt": "d",
                "data": [0.1, -0.2, 0.001, 0.002, 0.05]},
            "avg_reprojection_error": 0.25
        }"#;
        let model = CameraModel::from_json_str(json)?;
        assert_relative_eq!(model.fx(), 699.3);
        assert_relative_eq!(model.cy(), 360.1);
        assert_relative_eq!(model.distortion_coefficients[4], 0.05);
        assert_relative_eq!(model.avg_reprojection_error, 0.25);
        Ok(())
    }

    #[test]
    fn test_missing_and_malformed_fields() {
        assert!(matches!(
            CameraModel::from_json_str(r#"{"camera_matrix": [1,0,0,0,1,0,0,0,1]}"#),
            Err(CameraModelError::MissingField(_))
        ));
        let bad = r#"{"camera_matrix": [1, 2], "distortion_coefficients": [],
                      "avg_reprojection_error": 1}"#;
        assert!(matches!(
            CameraModel::from_json_str(bad),
            Err(CameraModelError::Malformed { field: "camera_matrix", .. })
        ));
    }
}
