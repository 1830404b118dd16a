use std::collections::VecDeque;

use super::{ClusterError, ClusterFit, ClusteringStrategy};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DbscanConfig {
    /// Neighbourhood radius (inclusive), in gaze units.
    pub eps: f64,
    /// Neighbours (counting the point itself) that make a core point.
    pub min_samples: usize,
}

impl Default for DbscanConfig {
    fn default() -> Self {
        Self {
            eps: 50.0,
            min_samples: 5,
        }
    }
}

/// Density-based clustering; points not reachable from a core point are
/// noise and stay unlabelled. Cluster statistics use core points only.
#[derive(Debug, Clone, Default)]
pub struct Dbscan {
    config: DbscanConfig,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Self {
        Self {
            config: DbscanConfig { eps, min_samples },
        }
    }

    pub fn with_config(config: DbscanConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DbscanConfig {
        &self.config
    }

    fn neighbours(&self, points: &[[f64; 2]], i: usize) -> Vec<usize> {
        let eps2 = self.config.eps * self.config.eps;
        let p = points[i];
        (0..points.len())
            .filter(|&j| {
                let dx = points[j][0] - p[0];
                let dy = points[j][1] - p[1];
                dx * dx + dy * dy <= eps2
            })
            .collect()
    }
}

fn mean_and_covariance(xy: &[[f64; 2]]) -> ([f64; 2], [[f64; 2]; 2]) {
    let n = xy.len() as f64;
    let mx = xy.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = xy.iter().map(|p| p[1]).sum::<f64>() / n;
    if xy.len() < 2 {
        return ([mx, my], [[0.0, 0.0], [0.0, 0.0]]);
    }
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for p in xy {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let d = n - 1.0;
    ([mx, my], [[sxx / d, sxy / d], [sxy / d, syy / d]])
}

impl ClusteringStrategy for Dbscan {
    fn cluster(&mut self, points: &[[f64; 2]]) -> Result<ClusterFit, ClusterError> {
        if !self.config.eps.is_finite() || self.config.eps <= 0.0 {
            return Err(ClusterError::InvalidConfig(
                "eps must be finite and > 0".to_string(),
            ));
        }
        if self.config.min_samples == 0 {
            return Err(ClusterError::InvalidConfig(
                "min_samples must be >= 1".to_string(),
            ));
        }

        let n = points.len();
        let neighbourhoods: Vec<Vec<usize>> = (0..n).map(|i| self.neighbours(points, i)).collect();
        let core: Vec<bool> = neighbourhoods
            .iter()
            .map(|nb| nb.len() >= self.config.min_samples)
            .collect();

        let mut labels: Vec<Option<usize>> = vec![None; n];
        let mut n_clusters = 0;
        for seed in 0..n {
            if !core[seed] || labels[seed].is_some() {
                continue;
            }
            let cluster = n_clusters;
            n_clusters += 1;
            labels[seed] = Some(cluster);
            let mut queue = VecDeque::from([seed]);
            while let Some(i) = queue.pop_front() {
                if !core[i] {
                    continue;
                }
                for &j in &neighbourhoods[i] {
                    if labels[j].is_none() {
                        labels[j] = Some(cluster);
                        queue.push_back(j);
                    }
                }
            }
        }

        let mut means = Vec::with_capacity(n_clusters);
        let mut covariances = Vec::with_capacity(n_clusters);
        for c in 0..n_clusters {
            let xy: Vec<[f64; 2]> = (0..n)
                .filter(|&i| core[i] && labels[i] == Some(c))
                .map(|i| points[i])
                .collect();
            let (m, cov) = mean_and_covariance(&xy);
            means.push(m);
            covariances.push(cov);
        }

        let noise = labels.iter().filter(|l| l.is_none()).count();
        tracing::debug!("dbscan: {} clusters, {} noise points", n_clusters, noise);

        Ok(ClusterFit {
            labels,
            means,
            covariances,
        })
    }
}
