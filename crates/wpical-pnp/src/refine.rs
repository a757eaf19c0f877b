//! Levenberg–Marquardt pose refinement against pixel reprojection error.

use nalgebra::{Matrix6, Point3, Rotation3, Vector3, Vector6};

use crate::camera::PinholeCamera;
use crate::pnp::PnPError;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on squared reprojection error decrease.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iters: 30,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Outcome of [`refine_pose_lm`].
#[derive(Debug, Clone, Copy)]
pub struct RefineOutcome {
    /// Per-point RMS reprojection error in pixels.
    pub rmse: f64,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the error decrease fell under [`LMParams::eps`].
    pub converged: bool,
}

/// Refine a pose (rvec, t) with Levenberg–Marquardt to minimize pixel reprojection error.
///
/// Points are projected through `camera` including its lens distortion.
/// The refined `rvec` and `t` are written in place.
pub fn refine_pose_lm(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    camera: &PinholeCamera,
    rvec: &mut [f64; 3],
    t: &mut [f64; 3],
    params: &LMParams,
) -> Result<RefineOutcome, PnPError> {
    if points_world.len() != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: points_world.len(),
            right_name: "image points",
            right_len: points_image.len(),
        });
    }

    let n = points_world.len();
    if n < 3 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 3,
            actual: n,
        });
    }

    let project_all = |x: &Vector6<f64>, out: &mut [f64]| -> Option<f64> {
        let rotation = Rotation3::new(Vector3::new(x[0], x[1], x[2]));
        let translation = Vector3::new(x[3], x[4], x[5]);
        let mut sum_sq = 0.0;
        for (i, (pw, uv)) in points_world.iter().zip(points_image.iter()).enumerate() {
            let pc = rotation * Point3::new(pw[0], pw[1], pw[2]) + translation;
            let [u, v] = camera.project(&pc)?;
            let du = u - uv[0];
            let dv = v - uv[1];
            out[2 * i] = du;
            out[2 * i + 1] = dv;
            sum_sq += du * du + dv * dv;
        }
        Some(sum_sq)
    };

    let mut x = Vector6::new(rvec[0], rvec[1], rvec[2], t[0], t[1], t[2]);
    let mut residuals = vec![0.0; 2 * n];
    let mut residuals_p = vec![0.0; 2 * n];
    let mut residuals_m = vec![0.0; 2 * n];

    let mut err_sq_base = project_all(&x, &mut residuals)
        .ok_or(PnPError::InvalidPose("initial pose places points behind the camera"))?;

    let mut lambda = params.lambda_init;
    let mut iters = 0usize;
    let mut converged = false;
    let mut j = vec![[0.0f64; 6]; 2 * n];

    while iters < params.max_iters {
        iters += 1;

        const H_ROT: f64 = 1e-6;
        let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        let h_trans = 1e-6 * t_scale;

        let mut jacobian_ok = true;
        for k_idx in 0..6 {
            let h = if k_idx < 3 { H_ROT } else { h_trans };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k_idx] += h;
            x_minus[k_idx] -= h;
            if project_all(&x_plus, &mut residuals_p).is_none()
                || project_all(&x_minus, &mut residuals_m).is_none()
            {
                jacobian_ok = false;
                break;
            }
            for (row, (rp, rm)) in j.iter_mut().zip(residuals_p.iter().zip(&residuals_m)) {
                row[k_idx] = (rp - rm) / (2.0 * h);
            }
        }
        if !jacobian_ok {
            break;
        }

        // (J^T J + lambda I) delta = -J^T r
        let mut a = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();
        for (row, r_val) in j.iter().zip(residuals.iter()) {
            let jr = Vector6::from_row_slice(row);
            b += jr * *r_val;
            a += jr * jr.transpose();
        }
        for d in 0..6 {
            a[(d, d)] += lambda;
        }

        let Some(delta) = a.lu().solve(&(-b)) else {
            lambda *= params.lambda_mul;
            continue;
        };

        let x_new = x + delta;
        match project_all(&x_new, &mut residuals_p) {
            Some(err_sq_new) if err_sq_new < err_sq_base => {
                x = x_new;
                residuals.copy_from_slice(&residuals_p);
                let decrease = err_sq_base - err_sq_new;
                err_sq_base = err_sq_new;
                if decrease < params.eps {
                    converged = true;
                    break;
                }
                lambda = (lambda / params.lambda_mul).max(1e-12);
            }
            _ => {
                lambda *= params.lambda_mul;
                if lambda > 1e12 {
                    converged = true;
                    break;
                }
            }
        }
    }

    rvec.copy_from_slice(&[x[0], x[1], x[2]]);
    t.copy_from_slice(&[x[3], x[4], x[5]]);

    Ok(RefineOutcome {
        rmse: (err_sq_base / n as f64).sqrt(),
        iterations: iters,
        converged,
    })
}
