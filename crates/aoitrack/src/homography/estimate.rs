//! Planar homography estimation via DLT with Hartley normalization.
//!
//! Provides:
//! - Direct Linear Transform (DLT) from ≥4 point correspondences.
//! - RANSAC wrapper for outlier-robust fitting.
//! - Guarded projection, batch mapping and inversion.

use nalgebra::{DMatrix, Matrix3, Vector3};

use super::polygon::has_collinear_triple;

/// Homogeneous coordinates with `|w|` at or below this are treated as points
/// at infinity.
const W_EPS: f64 = 1e-12;

/// Relative determinant below which a homography is treated as singular.
const SINGULAR_EPS: f64 = 1e-12;

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HomographyError {
    TooFewPoints { needed: usize, got: usize },
    LengthMismatch { src: usize, dst: usize },
    /// Three of the four correspondences are collinear.
    DegenerateConfiguration,
    /// A mapped point landed at (or near) infinity.
    DegenerateProjection { index: usize },
    /// The matrix has no usable inverse.
    Singular,
    NumericalFailure(String),
    InsufficientInliers { needed: usize, found: usize },
}

impl std::fmt::Display for HomographyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::LengthMismatch { src, dst } => {
                write!(f, "src has {} points but dst has {}", src, dst)
            }
            Self::DegenerateConfiguration => {
                write!(f, "degenerate correspondences: three points are collinear")
            }
            Self::DegenerateProjection { index } => {
                write!(f, "point {} projects to infinity", index)
            }
            Self::Singular => write!(f, "homography is singular"),
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
        }
    }
}

impl std::error::Error for HomographyError {}

// ── Projection ───────────────────────────────────────────────────────────

/// Project a 2D point through a 3×3 homography: H * [x, y, 1]^T → [u, v].
///
/// Returns `None` when the homogeneous coordinate vanishes or the result is
/// not finite.
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = h * Vector3::new(x, y, 1.0);
    if !p[2].is_finite() || p[2].abs() <= W_EPS {
        return None;
    }
    let out = [p[0] / p[2], p[1] / p[2]];
    (out[0].is_finite() && out[1].is_finite()).then_some(out)
}

/// Map a batch of points, failing on the first point at infinity.
pub fn map_points(h: &Matrix3<f64>, points: &[[f64; 2]]) -> Result<Vec<[f64; 2]>, HomographyError> {
    points
        .iter()
        .enumerate()
        .map(|(index, p)| {
            project(h, p[0], p[1]).ok_or(HomographyError::DegenerateProjection { index })
        })
        .collect()
}

/// Invert a homography, rejecting near-singular matrices.
pub fn invert(h: &Matrix3<f64>) -> Result<Matrix3<f64>, HomographyError> {
    let det = h.determinant();
    let scale = h.norm();
    if !det.is_finite() || scale <= 0.0 || det.abs() <= SINGULAR_EPS * scale.powi(3) {
        return Err(HomographyError::Singular);
    }
    h.try_inverse().ok_or(HomographyError::Singular)
}

/// Reprojection error: ||project(H, src) - dst||, infinite when the point
/// cannot be projected.
pub fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
    match project(h, src[0], src[1]) {
        Some(p) => {
            let dx = p[0] - dst[0];
            let dy = p[1] - dst[1];
            (dx * dx + dy * dy).sqrt()
        }
        None => f64::INFINITY,
    }
}

// ── Hartley normalization ────────────────────────────────────────────────

/// Compute a normalizing transform: translate centroid to origin, scale so
/// mean distance from origin is sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();

    (t, normalized)
}

// ── DLT ──────────────────────────────────────────────────────────────────

/// Estimate homography from ≥4 point correspondences using DLT.
///
/// Returns the 3×3 homography H such that dst ≈ project(H, src), scaled so
/// that `H[2][2] == 1` when possible.
pub fn estimate_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    // 2n × 9 system A h = 0
    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of the smallest eigenvalue of A^T A.
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);

    let mut min_idx = 0;
    let mut min_val = eig.eigenvalues[0].abs();
    for i in 1..9 {
        let v = eig.eigenvalues[i].abs();
        if v < min_val {
            min_val = v;
            min_idx = i;
        }
    }
    let h_norm = Matrix3::from_fn(|r, c| eig.eigenvectors[(r * 3 + c, min_idx)]);

    // H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("T_dst not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    if h.iter().any(|v| !v.is_finite()) {
        return Err(HomographyError::NumericalFailure(
            "non-finite homography entries".into(),
        ));
    }

    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        Ok(h)
    } else {
        Ok(h / scale)
    }
}

/// Homography between two ordered point sets.
///
/// Four-point inputs must be non-degenerate on both sides (no three
/// collinear points); larger inputs are solved in the least-squares sense.
pub fn compute_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Matrix3<f64>, HomographyError> {
    if src.len() == 4
        && dst.len() == 4
        && (has_collinear_triple(src) || has_collinear_triple(dst))
    {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let h = estimate_homography_dlt(src, dst)?;
    invert(&h)?;
    Ok(h)
}

// ── RANSAC ───────────────────────────────────────────────────────────────

/// RANSAC configuration for homography fitting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RansacHomographyConfig {
    /// Maximum number of RANSAC iterations.
    pub max_iters: usize,
    /// Inlier threshold (reprojection error in destination units).
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model.
    pub min_inliers: usize,
    /// Random seed.
    pub seed: u64,
}

impl Default for RansacHomographyConfig {
    fn default() -> Self {
        Self {
            max_iters: 500,
            inlier_threshold: 3.0,
            min_inliers: 4,
            seed: 0,
        }
    }
}

/// Result of RANSAC homography fitting.
#[derive(Debug, Clone)]
pub struct RansacHomographyResult {
    /// The fitted homography.
    pub h: Matrix3<f64>,
    /// Boolean mask: true for inliers.
    pub inlier_mask: Vec<bool>,
    /// Number of inliers.
    pub n_inliers: usize,
    /// Reprojection error of every correspondence under `h`.
    pub errors: Vec<f64>,
}

/// Fit homography with RANSAC.
pub fn fit_homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacHomographyConfig,
) -> Result<RansacHomographyResult, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let n = src.len();
    if n < 4 {
        return Err(HomographyError::TooFewPoints { needed: 4, got: n });
    }

    use rand::prelude::*;
    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);

    let mut best_inliers = 0usize;
    let mut best_mask: Vec<bool> = vec![false; n];
    let mut best_h: Option<Matrix3<f64>> = None;

    for _ in 0..config.max_iters {
        let picked = rand::seq::index::sample(&mut rng, n, 4);
        let s4: Vec<[f64; 2]> = picked.iter().map(|i| src[i]).collect();
        let d4: Vec<[f64; 2]> = picked.iter().map(|i| dst[i]).collect();

        let h = match compute_homography(&s4, &d4) {
            Ok(h) => h,
            Err(_) => continue,
        };

        let mask: Vec<bool> = (0..n)
            .map(|i| reprojection_error(&h, &src[i], &dst[i]) < config.inlier_threshold)
            .collect();
        let count = mask.iter().filter(|&&m| m).count();

        if count > best_inliers {
            best_inliers = count;
            best_mask = mask;
            best_h = Some(h);

            // Early exit if >90% inliers
            if count * 10 > n * 9 {
                break;
            }
        }
    }

    let Some(best_h) = best_h else {
        return Err(HomographyError::InsufficientInliers {
            needed: config.min_inliers,
            found: 0,
        });
    };
    if best_inliers < config.min_inliers {
        return Err(HomographyError::InsufficientInliers {
            needed: config.min_inliers,
            found: best_inliers,
        });
    }

    // Refit using all inliers
    let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
    let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
    let h_refit = estimate_homography_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);

    let errors: Vec<f64> = (0..n)
        .map(|i| reprojection_error(&h_refit, &src[i], &dst[i]))
        .collect();
    let inlier_mask: Vec<bool> = errors.iter().map(|&e| e < config.inlier_threshold).collect();
    let n_inliers = inlier_mask.iter().filter(|&&m| m).count();

    Ok(RansacHomographyResult {
        h: h_refit,
        inlier_mask,
        n_inliers,
        errors,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::perspective_homography;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    const SQUARE: [[f64; 2]; 4] = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];

    #[test]
    fn dlt_exact_4points_round_trips() {
        let h_true = perspective_homography();
        let dst = map_points(&h_true, &SQUARE).unwrap();

        let h = compute_homography(&SQUARE, &dst).unwrap();
        let mapped = map_points(&h, &SQUARE).unwrap();
        for (m, d) in mapped.iter().zip(&dst) {
            assert_relative_eq!(m[0], d[0], epsilon = 1e-6);
            assert_relative_eq!(m[1], d[1], epsilon = 1e-6);
        }

        let back = map_points(&invert(&h).unwrap(), &dst).unwrap();
        for (b, s) in back.iter().zip(&SQUARE) {
            assert_relative_eq!(b[0], s[0], epsilon = 1e-6);
            assert_relative_eq!(b[1], s[1], epsilon = 1e-6);
        }
    }

    #[test]
    fn identity_correspondences_give_identity() {
        let h = compute_homography(&SQUARE, &SQUARE).unwrap();
        assert_relative_eq!(h, Matrix3::identity(), epsilon = 1e-9);
    }

    #[test]
    fn dlt_overdetermined() {
        let h_true = perspective_homography();
        let mut src = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                src.push([i as f64 * 20.0, j as f64 * 20.0]);
            }
        }
        let dst = map_points(&h_true, &src).unwrap();
        let h = estimate_homography_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert!(reprojection_error(&h, s, d) < 1e-6);
        }
    }

    #[test]
    fn collinear_quad_is_rejected() {
        let src = [[0.0, 0.0], [50.0, 0.0], [100.0, 0.0], [0.0, 100.0]];
        assert_eq!(
            compute_homography(&src, &SQUARE).unwrap_err(),
            HomographyError::DegenerateConfiguration
        );
        assert_eq!(
            compute_homography(&SQUARE, &src).unwrap_err(),
            HomographyError::DegenerateConfiguration
        );
    }

    #[test]
    fn map_points_reports_points_at_infinity() {
        // Third row sends x = 1 to w = 0.
        let h = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -1.0, 0.0, 1.0);
        let err = map_points(&h, &[[0.0, 0.0], [1.0, 5.0]]).unwrap_err();
        assert_eq!(err, HomographyError::DegenerateProjection { index: 1 });
        assert!(project(&h, 1.0, 0.0).is_none());
    }

    #[test]
    fn singular_matrix_cannot_be_inverted() {
        let h = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0);
        assert_eq!(invert(&h).unwrap_err(), HomographyError::Singular);
    }

    #[test]
    fn ransac_with_outliers() {
        let h_true = perspective_homography();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let mut src = Vec::new();
        let mut dst = Vec::new();
        for i in 0..20 {
            let s = [(i % 5) as f64 * 30.0, (i / 5) as f64 * 30.0];
            let d = project(&h_true, s[0], s[1]).unwrap();
            src.push(s);
            dst.push([
                d[0] + rng.gen_range(-0.5..0.5),
                d[1] + rng.gen_range(-0.5..0.5),
            ]);
        }
        for _ in 0..8 {
            src.push([rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)]);
            dst.push([rng.gen_range(0.0..1280.0), rng.gen_range(0.0..960.0)]);
        }

        let config = RansacHomographyConfig {
            max_iters: 2000,
            inlier_threshold: 3.0,
            min_inliers: 6,
            seed: 99,
        };
        let result = fit_homography_ransac(&src, &dst, &config).unwrap();
        assert!(result.n_inliers >= 18, "only {} inliers", result.n_inliers);
        for i in 0..20 {
            let err = reprojection_error(&result.h, &src[i], &dst[i]);
            assert!(err < 5.0, "inlier {} has error {}", i, err);
        }
    }

    #[test]
    fn too_few_points() {
        let pts = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        assert_eq!(
            estimate_homography_dlt(&pts, &pts).unwrap_err(),
            HomographyError::TooFewPoints { needed: 4, got: 3 }
        );
    }
}
