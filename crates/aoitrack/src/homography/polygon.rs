//! Polygon predicates used for AOI containment.
//!
//! Polygons are ordered vertex lists (closed implicitly). Vertices are never
//! reordered here; callers keep a consistent winding.

/// Relative cross-product magnitude under which three points count as
/// collinear.
const COLLINEAR_EPS: f64 = 1e-9;

/// Euclidean distance from `p` to the segment `a`–`b`.
pub fn point_segment_distance(p: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    let abx = b[0] - a[0];
    let aby = b[1] - a[1];
    let len2 = abx * abx + aby * aby;
    let t = if len2 > 0.0 {
        (((p[0] - a[0]) * abx + (p[1] - a[1]) * aby) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let cx = a[0] + t * abx;
    let cy = a[1] + t * aby;
    ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt()
}

fn ray_cast(polygon: &[[f64; 2]], p: [f64; 2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i][0], polygon[i][1]);
        let (xj, yj) = (polygon[j][0], polygon[j][1]);
        if (yi > p[1]) != (yj > p[1]) && p[0] < (xj - xi) * (p[1] - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Even-odd containment test, inclusive of points within `tolerance` of any
/// edge.
///
/// Non-finite points and polygons with fewer than three vertices never
/// contain anything.
pub fn point_in_polygon(polygon: &[[f64; 2]], p: [f64; 2], tolerance: f64) -> bool {
    if polygon.len() < 3 || !p[0].is_finite() || !p[1].is_finite() {
        return false;
    }
    if polygon.iter().any(|v| !v[0].is_finite() || !v[1].is_finite()) {
        return false;
    }
    if ray_cast(polygon, p) {
        return true;
    }
    if tolerance <= 0.0 {
        return false;
    }
    let n = polygon.len();
    (0..n).any(|i| point_segment_distance(p, polygon[i], polygon[(i + 1) % n]) <= tolerance)
}

/// Signed shoelace area; positive for counter-clockwise winding in a y-up
/// frame (clockwise on screen).
pub fn signed_area(polygon: &[[f64; 2]]) -> f64 {
    let n = polygon.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        acc += a[0] * b[1] - b[0] * a[1];
    }
    0.5 * acc
}

pub fn polygon_area(polygon: &[[f64; 2]]) -> f64 {
    signed_area(polygon).abs()
}

/// Area centroid, falling back to the vertex mean for zero-area polygons.
pub fn polygon_centroid(polygon: &[[f64; 2]]) -> Option<[f64; 2]> {
    let n = polygon.len();
    if n == 0 {
        return None;
    }
    let a = signed_area(polygon);
    if a.abs() <= f64::EPSILON {
        let sx: f64 = polygon.iter().map(|p| p[0]).sum();
        let sy: f64 = polygon.iter().map(|p| p[1]).sum();
        return Some([sx / n as f64, sy / n as f64]);
    }
    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..n {
        let p = polygon[i];
        let q = polygon[(i + 1) % n];
        let cross = p[0] * q[1] - q[0] * p[1];
        cx += (p[0] + q[0]) * cross;
        cy += (p[1] + q[1]) * cross;
    }
    Some([cx / (6.0 * a), cy / (6.0 * a)])
}

/// Length of the longest vertex-to-vertex distance.
pub fn diameter(points: &[[f64; 2]]) -> f64 {
    let mut best = 0.0f64;
    for (i, a) in points.iter().enumerate() {
        for b in &points[i + 1..] {
            best = best.max(((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt());
        }
    }
    best
}

/// True when any three of `points` are collinear (or coincident), relative
/// to the set's extent.
pub fn has_collinear_triple(points: &[[f64; 2]]) -> bool {
    let extent = diameter(points);
    if !extent.is_finite() || extent <= 0.0 {
        return true;
    }
    let tol = COLLINEAR_EPS * extent * extent;
    let n = points.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let (a, b, c) = (points[i], points[j], points[k]);
                let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                if cross.abs() <= tol {
                    return true;
                }
            }
        }
    }
    false
}
