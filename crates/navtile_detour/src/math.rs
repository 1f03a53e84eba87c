//! 2D and 3D geometry used by the tile store and the queries. All 2D helpers work on the xz-plane.

use glam::Vec3;

/// Squared distance under which two points are considered equal.
const EQUAL_THRESHOLD_SQR: f32 = (1.0 / 16384.0) * (1.0 / 16384.0);

#[inline]
pub(crate) fn nearly_equal(a: Vec3, b: Vec3) -> bool {
    a.distance_squared(b) < EQUAL_THRESHOLD_SQR
}

/// Signed area of the triangle `abc` on the xz-plane, times two.
#[inline]
pub(crate) fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

#[inline]
pub(crate) fn perp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

#[inline]
pub(crate) fn dist_2d_sqr(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz
}

/// Squared distance from `point` to the segment `pq` on the xz-plane and the parameter of the closest point.
pub(crate) fn dist_point_segment_sqr_2d(point: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = point.x - p.x;
    let dz = point.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = p.x + t * pqx - point.x;
    let dz = p.z + t * pqz - point.z;
    (dx * dx + dz * dz, t)
}

/// Even-odd test on the xz-plane.
pub(crate) fn point_in_polygon(point: Vec3, vertices: &[Vec3]) -> bool {
    let mut inside = false;
    let mut j = vertices.len().wrapping_sub(1);
    for (i, vi) in vertices.iter().enumerate() {
        let vj = vertices[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Like [`point_in_polygon`], but also reports the squared distance and segment parameter for every edge.
/// Edge `j` runs from vertex `j` to vertex `j + 1`.
pub(crate) fn dist_point_poly_edges_sqr(
    point: Vec3,
    vertices: &[Vec3],
    distances: &mut [f32],
    params: &mut [f32],
) -> bool {
    let n = vertices.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (d, t) = dist_point_segment_sqr_2d(point, vertices[j], vertices[i]);
        distances[j] = d;
        params[j] = t;
        j = i;
    }
    point_in_polygon(point, vertices)
}

/// Height of the triangle `abc` under `point` if `point` lies within it on the xz-plane.
pub(crate) fn closest_height_point_triangle(point: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = point - a;

    // Degenerate when seen from above.
    let denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    let mut denom = denom;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// The part of `p0..p1` inside the convex polygon on the xz-plane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentPolyIntersection {
    pub(crate) tmin: f32,
    pub(crate) tmax: f32,
    /// The edge the segment enters through, `None` if it starts inside.
    pub(crate) enter_edge: Option<usize>,
    /// The edge the segment leaves through, `None` if it ends inside.
    pub(crate) leave_edge: Option<usize>,
}

pub(crate) fn intersect_segment_poly_2d(
    p0: Vec3,
    p1: Vec3,
    vertices: &[Vec3],
) -> Option<SegmentPolyIntersection> {
    const EPS: f32 = 1e-6;
    let mut hit = SegmentPolyIntersection {
        tmin: 0.0,
        tmax: 1.0,
        enter_edge: None,
        leave_edge: None,
    };
    let dir = p1 - p0;
    let n = vertices.len();
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let edge = vertices[i] - vertices[j];
        let diff = p0 - vertices[j];
        let num = perp_2d(edge, diff);
        let den = perp_2d(dir, edge);
        if den.abs() < EPS {
            // Parallel to the edge.
            if num < 0.0 {
                return None;
            }
            j = i;
            continue;
        }
        let t = num / den;
        if den < 0.0 {
            if t > hit.tmin {
                hit.tmin = t;
                hit.enter_edge = Some(j);
                if hit.tmin > hit.tmax {
                    return None;
                }
            }
        } else if t < hit.tmax {
            hit.tmax = t;
            hit.leave_edge = Some(j);
            if hit.tmax < hit.tmin {
                return None;
            }
        }
        j = i;
    }
    Some(hit)
}

/// Twice the area of a convex polygon on the xz-plane, independent of winding.
pub(crate) fn poly_area_2d(vertices: &[Vec3]) -> f32 {
    let mut area = 0.0;
    for i in 2..vertices.len() {
        area += tri_area_2d(vertices[0], vertices[i - 1], vertices[i]);
    }
    area.abs()
}

/// Maps two uniform samples in `[0, 1)` to a point inside a convex polygon, uniformly by area.
pub(crate) fn random_point_in_convex_poly(vertices: &[Vec3], s: f32, t: f32) -> Vec3 {
    let n = vertices.len();
    let mut areas = [0.0_f32; crate::tile_data::MAX_VERTICES_PER_POLYGON];
    let mut area_sum = 0.0;
    for i in 2..n {
        areas[i] = tri_area_2d(vertices[0], vertices[i - 1], vertices[i])
            .abs()
            .max(0.001);
        area_sum += areas[i];
    }

    let threshold = s * area_sum;
    let mut accumulated = 0.0;
    let mut u = 1.0;
    let mut triangle = n - 1;
    for i in 2..n {
        let area = areas[i];
        if threshold >= accumulated && threshold < accumulated + area {
            u = (threshold - accumulated) / area;
            triangle = i;
            break;
        }
        accumulated += area;
    }

    let v = t.sqrt();
    let a = 1.0 - v;
    let b = (1.0 - u) * v;
    let c = u * v;
    vertices[0] * a + vertices[triangle - 1] * b + vertices[triangle] * c
}

/// The tile-neighbour direction opposite to `side`.
#[inline]
pub(crate) fn opposite_side(side: u8) -> u8 {
    (side + 4) & 0x7
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square() -> [Vec3; 4] {
        [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ]
    }

    #[test]
    fn point_in_square() {
        assert!(point_in_polygon(Vec3::new(0.5, 3.0, 0.5), &square()));
        assert!(!point_in_polygon(Vec3::new(1.5, 0.0, 0.5), &square()));
    }

    #[test]
    fn segment_distance_clamps_to_the_ends() {
        let (d, t) =
            dist_point_segment_sqr_2d(Vec3::new(2.0, 0.0, 0.0), Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(d, 1.0);
        assert_relative_eq!(t, 1.0);
    }

    #[test]
    fn height_inside_sloped_triangle() {
        let h = closest_height_point_triangle(
            Vec3::new(0.25, 10.0, 0.25),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 0.0),
        );
        assert_relative_eq!(h.unwrap(), 0.25);
        assert!(
            closest_height_point_triangle(
                Vec3::new(2.0, 0.0, 2.0),
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(1.0, 1.0, 0.0),
            )
            .is_none()
        );
    }

    #[test]
    fn random_points_stay_inside() {
        let square = square();
        for (s, t) in [(0.0, 0.0), (0.3, 0.7), (0.99, 0.99), (0.5, 0.01)] {
            let point = random_point_in_convex_poly(&square, s, t);
            assert!((-1e-4..=1.0001).contains(&point.x));
            assert!((-1e-4..=1.0001).contains(&point.z));
        }
    }

    #[test]
    fn area_ignores_winding() {
        let mut square = square();
        assert_relative_eq!(poly_area_2d(&square), 2.0);
        square.reverse();
        assert_relative_eq!(poly_area_2d(&square), 2.0);
    }
}
