//! Full-covariance Gaussian mixture fitted by expectation-maximisation.

use nalgebra::{Matrix2, Vector2};
use rand::prelude::*;

use super::{ClusterError, ClusterFit, ClusteringStrategy};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GaussianMixtureConfig {
    pub n_components: usize,
    pub max_iter: usize,
    /// Convergence threshold on the mean log-likelihood gain.
    pub tol: f64,
    /// Added to covariance diagonals to keep them positive definite.
    pub reg_covar: f64,
    /// Seed for the k-means++ initialisation.
    pub seed: u64,
}

impl Default for GaussianMixtureConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GaussianMixture {
    config: GaussianMixtureConfig,
}

impl GaussianMixture {
    pub fn new(n_components: usize) -> Self {
        Self::with_config(GaussianMixtureConfig {
            n_components,
            ..GaussianMixtureConfig::default()
        })
    }

    pub fn with_config(config: GaussianMixtureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GaussianMixtureConfig {
        &self.config
    }
}

struct Component {
    weight: f64,
    mean: Vector2<f64>,
    cov: Matrix2<f64>,
}

impl Component {
    fn log_pdf(&self, x: &Vector2<f64>) -> f64 {
        let det = self.cov.determinant();
        let Some(inv) = self.cov.try_inverse() else {
            return f64::NEG_INFINITY;
        };
        if det <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let d = x - self.mean;
        let maha = (d.transpose() * inv * d)[(0, 0)];
        -0.5 * maha - LN_2PI - 0.5 * det.ln()
    }
}

fn to_vec(p: &[f64; 2]) -> Vector2<f64> {
    Vector2::new(p[0], p[1])
}

/// k-means++ seeding followed by a few Lloyd iterations.
fn kmeans_init(points: &[Vector2<f64>], k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = points.len();
    let mut centers: Vec<Vector2<f64>> = vec![points[rng.gen_range(0..n)]];
    while centers.len() < k {
        let d2: Vec<f64> = points
            .iter()
            .map(|p| {
                centers
                    .iter()
                    .map(|c| (p - c).norm_squared())
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = d2.iter().sum();
        let next = if total > 0.0 {
            let mut r = rng.gen_range(0.0..total);
            let mut idx = n - 1;
            for (i, &d) in d2.iter().enumerate() {
                if r < d {
                    idx = i;
                    break;
                }
                r -= d;
            }
            idx
        } else {
            rng.gen_range(0..n)
        };
        centers.push(points[next]);
    }

    let mut assign = vec![0usize; n];
    for _ in 0..10 {
        for (a, p) in assign.iter_mut().zip(points) {
            *a = nearest(&centers, p);
        }
        for (j, c) in centers.iter_mut().enumerate() {
            let members: Vec<&Vector2<f64>> = points
                .iter()
                .zip(&assign)
                .filter(|&(_, &a)| a == j)
                .map(|(p, _)| p)
                .collect();
            if !members.is_empty() {
                *c = members.iter().copied().sum::<Vector2<f64>>() / members.len() as f64;
            }
        }
    }
    assign
}

fn nearest(centers: &[Vector2<f64>], p: &Vector2<f64>) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (j, c) in centers.iter().enumerate() {
        let d = (p - c).norm_squared();
        if d < best_d {
            best_d = d;
            best = j;
        }
    }
    best
}

/// M-step from a responsibility matrix (`n x k`, row-major).
fn m_step(points: &[Vector2<f64>], resp: &[f64], k: usize, reg: f64) -> Vec<Component> {
    let n = points.len();
    (0..k)
        .map(|j| {
            let nk: f64 = (0..n).map(|i| resp[i * k + j]).sum::<f64>() + 10.0 * f64::EPSILON;
            let mean = (0..n)
                .map(|i| points[i] * resp[i * k + j])
                .sum::<Vector2<f64>>()
                / nk;
            let mut cov = Matrix2::zeros();
            for i in 0..n {
                let d = points[i] - mean;
                cov += d * d.transpose() * resp[i * k + j];
            }
            cov /= nk;
            cov += Matrix2::identity() * reg;
            Component {
                weight: nk / n as f64,
                mean,
                cov,
            }
        })
        .collect()
}

/// E-step: fills `resp` and returns the mean log-likelihood.
fn e_step(points: &[Vector2<f64>], comps: &[Component], resp: &mut [f64]) -> f64 {
    let k = comps.len();
    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        let row = &mut resp[i * k..(i + 1) * k];
        for (r, c) in row.iter_mut().zip(comps) {
            *r = c.weight.ln() + c.log_pdf(p);
        }
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            row.iter_mut().for_each(|r| *r = 1.0 / k as f64);
            continue;
        }
        let lse = max + row.iter().map(|r| (r - max).exp()).sum::<f64>().ln();
        row.iter_mut().for_each(|r| *r = (*r - lse).exp());
        total += lse;
    }
    total / points.len() as f64
}

impl ClusteringStrategy for GaussianMixture {
    fn cluster(&mut self, points: &[[f64; 2]]) -> Result<ClusterFit, ClusterError> {
        let k = self.config.n_components;
        if k == 0 {
            return Err(ClusterError::InvalidConfig(
                "n_components must be >= 1".to_string(),
            ));
        }
        if !self.config.reg_covar.is_finite() || self.config.reg_covar < 0.0 {
            return Err(ClusterError::InvalidConfig(
                "reg_covar must be finite and >= 0".to_string(),
            ));
        }
        if points.len() < k {
            return Err(ClusterError::TooFewPoints {
                needed: k,
                got: points.len(),
            });
        }

        let pts: Vec<Vector2<f64>> = points.iter().map(to_vec).collect();
        let n = pts.len();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut resp = vec![0.0; n * k];
        for (i, &a) in kmeans_init(&pts, k, &mut rng).iter().enumerate() {
            resp[i * k + a] = 1.0;
        }
        let mut comps = m_step(&pts, &resp, k, self.config.reg_covar);

        let mut prev = f64::NEG_INFINITY;
        let mut converged = false;
        let mut iters = 0;
        for it in 0..self.config.max_iter {
            iters = it + 1;
            let ll = e_step(&pts, &comps, &mut resp);
            comps = m_step(&pts, &resp, k, self.config.reg_covar);
            if (ll - prev).abs() < self.config.tol {
                converged = true;
                break;
            }
            prev = ll;
        }
        if !converged {
            tracing::warn!(
                "gaussian mixture did not converge in {} iterations",
                self.config.max_iter
            );
        }
        tracing::debug!("gaussian mixture: {} components, {} iterations", k, iters);

        e_step(&pts, &comps, &mut resp);
        let labels = (0..n)
            .map(|i| {
                let row = &resp[i * k..(i + 1) * k];
                let mut best = 0;
                for j in 1..k {
                    if row[j] > row[best] {
                        best = j;
                    }
                }
                Some(best)
            })
            .collect();

        Ok(ClusterFit {
            labels,
            means: comps.iter().map(|c| [c.mean.x, c.mean.y]).collect(),
            covariances: comps
                .iter()
                .map(|c| [[c.cov[(0, 0)], c.cov[(0, 1)]], [c.cov[(1, 0)], c.cov[(1, 1)]]])
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::gaussian_blob;
    use approx::assert_abs_diff_eq;

    #[test]
    fn separates_two_blobs() {
        let mut pts = gaussian_blob(1, 200, [200.0, 300.0], 15.0);
        pts.extend(gaussian_blob(2, 200, [900.0, 500.0], 25.0));
        let fit = GaussianMixture::new(2).cluster(&pts).unwrap();

        assert_eq!(fit.means.len(), 2);
        let left = if fit.means[0][0] < fit.means[1][0] { 0 } else { 1 };
        assert_abs_diff_eq!(fit.means[left][0], 200.0, epsilon = 5.0);
        assert_abs_diff_eq!(fit.means[1 - left][1], 500.0, epsilon = 8.0);
        assert!(fit.labels[..200].iter().all(|&l| l == Some(left)));
        assert!(fit.labels[200..].iter().all(|&l| l == Some(1 - left)));
        // Isotropic blobs: variance close to sigma^2 on both axes.
        let c = fit.covariances[left];
        assert!(c[0][0] > 100.0 && c[0][0] < 400.0, "var {}", c[0][0]);
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let mut pts = gaussian_blob(3, 80, [0.0, 0.0], 5.0);
        pts.extend(gaussian_blob(4, 80, [60.0, 0.0], 5.0));
        let a = GaussianMixture::new(2).cluster(&pts).unwrap();
        let b = GaussianMixture::new(2).cluster(&pts).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.means, b.means);
    }

    #[test]
    fn rejects_bad_configs() {
        let pts = [[0.0, 0.0], [1.0, 1.0]];
        assert!(matches!(
            GaussianMixture::new(0).cluster(&pts),
            Err(ClusterError::InvalidConfig(_))
        ));
        assert_eq!(
            GaussianMixture::new(3).cluster(&pts).unwrap_err(),
            ClusterError::TooFewPoints { needed: 3, got: 2 }
        );
    }
}
