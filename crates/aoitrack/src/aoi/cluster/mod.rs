//! AOIs fitted to a batch of fixation points.
//!
//! A [`ClusteringStrategy`] groups fixation positions; [`ClusterAoiModel`]
//! orders and labels the groups, annotates the fixations of each group in
//! the event store, and exposes each group's centroid and covariance
//! ellipse. A fitted model also acts as an [`AoiDetector`] whose items live
//! directly in gaze space.

mod dbscan;
mod gmm;

pub use dbscan::{Dbscan, DbscanConfig};
pub use gmm::{GaussianMixture, GaussianMixtureConfig};

use image::GrayImage;
use nalgebra::{Matrix2, SymmetricEigen};

use crate::events::{EventFilter, GazeEvents};
use crate::homography::has_collinear_triple;

use super::{AoiDetection, AoiDetector, AoiItem, TemplateInfo, DEFAULT_AOI_SCORE};

/// Default cluster labels, assigned positionally and cycled with a numeric
/// suffix past the end of the list.
pub const COLORS_LIST: [&str; 7] = ["red", "orange", "yellow", "green", "cyan", "blue", "magenta"];

const CLUSTER_SNAPSHOT: &str = "gaze_clusters.png";

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterError {
    InvalidConfig(String),
    TooFewPoints { needed: usize, got: usize },
    /// Explicit label list does not match the number of clusters found.
    LabelCountMismatch { labels: usize, clusters: usize },
    /// The strategy found no cluster at all.
    NoClusters,
}

impl std::fmt::Display for ClusterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid clustering config: {}", msg),
            Self::TooFewPoints { needed, got } => {
                write!(f, "need at least {} points to cluster, got {}", needed, got)
            }
            Self::LabelCountMismatch { labels, clusters } => write!(
                f,
                "{} labels supplied for {} clusters",
                labels, clusters
            ),
            Self::NoClusters => write!(f, "no clusters found"),
        }
    }
}

impl std::error::Error for ClusterError {}

// ── Strategy ─────────────────────────────────────────────────────────────

/// Raw clustering output, in the strategy's own cluster order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClusterFit {
    /// Cluster index per input point; `None` marks noise.
    pub labels: Vec<Option<usize>>,
    pub means: Vec<[f64; 2]>,
    pub covariances: Vec<[[f64; 2]; 2]>,
}

/// Pluggable 2D clustering algorithm.
pub trait ClusteringStrategy {
    fn cluster(&mut self, points: &[[f64; 2]]) -> Result<ClusterFit, ClusterError>;
}

impl<S: ClusteringStrategy + ?Sized> ClusteringStrategy for &mut S {
    fn cluster(&mut self, points: &[[f64; 2]]) -> Result<ClusterFit, ClusterError> {
        (**self).cluster(points)
    }
}

impl<S: ClusteringStrategy + ?Sized> ClusteringStrategy for Box<S> {
    fn cluster(&mut self, points: &[[f64; 2]]) -> Result<ClusterFit, ClusterError> {
        (**self).cluster(points)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSortKey {
    CentroidX,
    CentroidY,
}

/// Label of the cluster at `position` when no explicit labels are given.
pub fn default_label(position: usize) -> String {
    let name = COLORS_LIST[position % COLORS_LIST.len()];
    match position / COLORS_LIST.len() {
        0 => name.to_string(),
        round => format!("{}_{}", name, round + 1),
    }
}

// ── Ellipse ──────────────────────────────────────────────────────────────

/// Covariance ellipse of a cluster.
///
/// `width` lies along the direction given by `angle_deg` (eigenvector of the
/// smaller eigenvalue), `height` perpendicular to it. Both are full axis
/// lengths `2·√2·√λ`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Ellipse {
    pub width: f64,
    pub height: f64,
    /// In `[0, 180)`, measured from the +x axis towards +y.
    pub angle_deg: f64,
}

impl Ellipse {
    pub fn from_covariance(cov: &[[f64; 2]; 2]) -> Option<Self> {
        let m = Matrix2::new(cov[0][0], cov[0][1], cov[1][0], cov[1][1]);
        if m.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let eig = SymmetricEigen::new(m);
        let (small, large) = if eig.eigenvalues[0] <= eig.eigenvalues[1] {
            (0, 1)
        } else {
            (1, 0)
        };
        let axis = |lambda: f64| 2.0 * std::f64::consts::SQRT_2 * lambda.max(0.0).sqrt();
        let u = eig.eigenvectors.column(small);
        let mut angle = u[1].atan2(u[0]).to_degrees().rem_euclid(180.0);
        if angle >= 180.0 {
            angle = 0.0;
        }
        Some(Self {
            width: axis(eig.eigenvalues[small]),
            height: axis(eig.eigenvalues[large]),
            angle_deg: angle,
        })
    }

    /// Oriented bounding rectangle around `center`, ordered TL, TR, BR, BL
    /// for an unrotated ellipse in y-down coordinates.
    pub fn corners(&self, center: [f64; 2]) -> [[f64; 2]; 4] {
        let (s, c) = self.angle_deg.to_radians().sin_cos();
        let u = [c * self.width / 2.0, s * self.width / 2.0];
        let v = [-s * self.height / 2.0, c * self.height / 2.0];
        let at = |a: f64, b: f64| [center[0] + a * u[0] + b * v[0], center[1] + a * u[1] + b * v[1]];
        [at(-1.0, -1.0), at(1.0, -1.0), at(1.0, 1.0), at(-1.0, 1.0)]
    }
}

// ── Model ────────────────────────────────────────────────────────────────

/// One labelled cluster after [`ClusterAoiModel::fit`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FittedCluster {
    pub label: String,
    pub centroid: [f64; 2],
    pub covariance: [[f64; 2]; 2],
    /// Fixations assigned to this cluster.
    pub n_points: usize,
}

impl FittedCluster {
    pub fn ellipse(&self) -> Option<Ellipse> {
        Ellipse::from_covariance(&self.covariance)
    }
}

pub struct ClusterAoiModel<S> {
    strategy: S,
    labels: Option<Vec<String>>,
    sort_key: Option<ClusterSortKey>,
    template_size: [u32; 2],
    clusters: Vec<FittedCluster>,
}

impl<S: ClusteringStrategy> ClusterAoiModel<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            labels: None,
            sort_key: None,
            template_size: crate::board_layout::DEFAULT_TEMPLATE_SIZE,
            clusters: Vec::new(),
        }
    }

    /// Explicit labels, assigned to clusters positionally after sorting.
    pub fn with_labels<I, L>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn sorted_by(mut self, key: ClusterSortKey) -> Self {
        self.sort_key = Some(key);
        self
    }

    /// Size of the gaze-space canvas reported with detector items.
    pub fn with_template_size(mut self, size: [u32; 2]) -> Self {
        self.template_size = size;
        self
    }

    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Cluster the fixations selected by `ts_filter` and annotate each
    /// clustered fixation with its label and distance to the centroid.
    ///
    /// Noise points are left unannotated. A previous fit is replaced.
    pub fn fit(
        &mut self,
        events: &mut GazeEvents,
        ts_filter: Option<&EventFilter>,
    ) -> Result<&[FittedCluster], ClusterError> {
        let points = events.fixation_points(ts_filter);
        if points.is_empty() {
            return Err(ClusterError::TooFewPoints { needed: 1, got: 0 });
        }
        let xy: Vec<[f64; 2]> = points.iter().map(|(_, p)| *p).collect();
        let fit = self.strategy.cluster(&xy)?;
        let k = fit.means.len();
        if k == 0 {
            tracing::warn!("clustering {} fixations produced no cluster", xy.len());
            return Err(ClusterError::NoClusters);
        }

        let mut order: Vec<usize> = (0..k).collect();
        match self.sort_key {
            Some(ClusterSortKey::CentroidX) => {
                order.sort_by(|&a, &b| fit.means[a][0].total_cmp(&fit.means[b][0]))
            }
            Some(ClusterSortKey::CentroidY) => {
                order.sort_by(|&a, &b| fit.means[a][1].total_cmp(&fit.means[b][1]))
            }
            None => {}
        }

        let names: Vec<String> = match &self.labels {
            Some(labels) if labels.len() != k => {
                return Err(ClusterError::LabelCountMismatch {
                    labels: labels.len(),
                    clusters: k,
                })
            }
            Some(labels) => labels.clone(),
            None => (0..k).map(default_label).collect(),
        };

        let mut position = vec![0usize; k];
        for (pos, &c) in order.iter().enumerate() {
            position[c] = pos;
        }

        let mut clusters: Vec<FittedCluster> = order
            .iter()
            .zip(names)
            .map(|(&c, label)| FittedCluster {
                label,
                centroid: fit.means[c],
                covariance: fit.covariances[c],
                n_points: 0,
            })
            .collect();

        for ((ts, p), assigned) in points.iter().zip(&fit.labels) {
            let Some(c) = *assigned else {
                continue;
            };
            let cluster = &mut clusters[position[c]];
            let d = distance(*p, cluster.centroid);
            events.set_aoi(*ts, &cluster.label, d);
            cluster.n_points += 1;
        }

        for c in clusters.iter().filter(|c| c.n_points == 0) {
            tracing::warn!("cluster '{}' has no assigned fixations", c.label);
        }
        tracing::info!("fitted {} clusters to {} fixations", k, xy.len());

        self.clusters = clusters;
        Ok(&self.clusters)
    }

    pub fn clusters(&self) -> &[FittedCluster] {
        &self.clusters
    }

    pub fn cluster(&self, label: &str) -> Option<&FittedCluster> {
        self.clusters.iter().find(|c| c.label == label)
    }

    pub fn centroid(&self, label: &str) -> Option<[f64; 2]> {
        self.cluster(label).map(|c| c.centroid)
    }

    pub fn ellipse(&self, label: &str) -> Option<Ellipse> {
        self.cluster(label).and_then(FittedCluster::ellipse)
    }

    /// Distance from `point` to the centroid of `label`.
    pub fn score(&self, label: &str, point: [f64; 2]) -> Option<f64> {
        self.centroid(label).map(|c| distance(point, c))
    }
}

fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}

impl<S: ClusteringStrategy> AoiDetector for ClusterAoiModel<S> {
    /// Cluster regions do not depend on the frame content. The item score
    /// is a placeholder; the tracker scores cluster hits by their distance
    /// to the centroid carried in [`AoiDetection::Cluster`].
    fn detected_items(&mut self, _frame: &GrayImage) -> Vec<AoiItem> {
        let mut items = Vec::with_capacity(self.clusters.len());
        for c in &self.clusters {
            let Some(ellipse) = c.ellipse() else {
                tracing::debug!("cluster '{}': covariance has no ellipse", c.label);
                continue;
            };
            let quad = ellipse.corners(c.centroid);
            if has_collinear_triple(&quad) {
                tracing::debug!("cluster '{}': degenerate ellipse", c.label);
                continue;
            }
            items.push(AoiItem {
                aoi_id: c.label.clone(),
                detected_points: quad,
                reference_points: quad,
                template: TemplateInfo {
                    name: CLUSTER_SNAPSHOT.to_string(),
                    size: self.template_size,
                },
                score: DEFAULT_AOI_SCORE,
                detection: AoiDetection::Cluster {
                    centroid: c.centroid,
                    covariance: c.covariance,
                },
            });
        }
        items
    }
}
