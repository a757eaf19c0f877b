//! Plane-induced homographies and the focal length seed derived from them.

use nalgebra::{DMatrix, Matrix3};

use crate::pnp::PnPError;

/// Hartley normalization: translate to zero mean and scale so the average
/// distance to the origin is `sqrt(2)`.
fn normalize_points(points: &[[f64; 2]]) -> Option<(Vec<[f64; 2]>, Matrix3<f64>)> {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    let (mx, my) = (sx / n, sy / n);
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0);
    let normalized = points
        .iter()
        .map(|p| [s * (p[0] - mx), s * (p[1] - my)])
        .collect();
    Some((normalized, t))
}

/// Estimate `H` such that `dst ~ H src` with the normalized Direct Linear Transform.
///
/// The result is scaled so that `H[2,2] == 1` when possible.
pub fn dlt_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, PnPError> {
    let n = src.len();
    if n != dst.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: n,
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let (src_n, t_src) =
        normalize_points(src).ok_or(PnPError::Degenerate("source points coincide"))?;
    let (dst_n, t_dst) =
        normalize_points(dst).ok_or(PnPError::Degenerate("destination points coincide"))?;

    // at least 9 rows so the SVD exposes the null vector
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);
    for (i, (p, q)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y) = (p[0], p[1]);
        let (u, v) = (q[0], q[1]);
        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("homography null space".to_string()))?;

    // nalgebra does not sort singular values, pick the smallest explicitly
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(bi, bv), (i, &v)| {
            if v < bv {
                (i, v)
            } else {
                (bi, bv)
            }
        });
    let h = v_t.row(min_idx);

    let h_n = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| PnPError::SvdFailed("normalization is singular".to_string()))?;
    let mut h_mat = t_dst_inv * h_n * t_src;

    let scale = h_mat[(2, 2)];
    if scale.abs() > f64::EPSILON {
        h_mat /= scale;
    }
    Ok(h_mat)
}

/// Closed-form focal length from board homographies with a known principal point.
///
/// With the principal point moved to the origin, square pixels and no skew,
/// the image of the absolute conic reduces to `diag(B, B, 1)` with `B = 1/f^2`.
/// Each homography contributes two linear constraints `a * B + c = 0` (Zhang's
/// orthogonality and equal-norm conditions); `B` is their least-squares
/// solution. Returns `None` when the constraints do not give a positive `B`.
pub fn focal_from_homographies(homographies: &[Matrix3<f64>], cx: f64, cy: f64) -> Option<f64> {
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    let mut sum_ac = 0.0;
    let mut sum_aa = 0.0;
    for h in homographies {
        let hs = shift * h;
        let (h1, h2) = (hs.column(0), hs.column(1));

        let a1 = h1[0] * h2[0] + h1[1] * h2[1];
        let c1 = h1[2] * h2[2];
        let a2 = h1[0] * h1[0] + h1[1] * h1[1] - h2[0] * h2[0] - h2[1] * h2[1];
        let c2 = h1[2] * h1[2] - h2[2] * h2[2];

        // scale invariance: normalize each constraint pair by the homography magnitude
        let norm = hs.norm_squared();
        if norm <= f64::EPSILON {
            continue;
        }
        let (a1, c1, a2, c2) = (a1 / norm, c1 / norm, a2 / norm, c2 / norm);

        sum_ac += a1 * c1 + a2 * c2;
        sum_aa += a1 * a1 + a2 * a2;
    }

    if sum_aa <= f64::EPSILON {
        return None;
    }
    let b = -sum_ac / sum_aa;
    if b > 0.0 && b.is_finite() {
        Some((1.0 / b).sqrt())
    } else {
        None
    }
}
