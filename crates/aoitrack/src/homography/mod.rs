//! Homography estimation, projection, and polygon containment.

mod estimate;
mod polygon;

pub use estimate::{
    compute_homography, estimate_homography_dlt, fit_homography_ransac, invert, map_points,
    project, reprojection_error, HomographyError, RansacHomographyConfig, RansacHomographyResult,
};
pub use polygon::{
    diameter, has_collinear_triple, point_in_polygon, point_segment_distance, polygon_area,
    polygon_centroid, signed_area,
};

/// Convert a nalgebra matrix to a row-major array.
pub fn matrix3_to_array(m: &nalgebra::Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// Build a nalgebra matrix from a row-major array.
pub fn array_to_matrix3(a: &[[f64; 3]; 3]) -> nalgebra::Matrix3<f64> {
    nalgebra::Matrix3::new(
        a[0][0], a[0][1], a[0][2], a[1][0], a[1][1], a[1][2], a[2][0], a[2][1], a[2][2],
    )
}
