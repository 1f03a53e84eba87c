use std::collections::VecDeque;

use glam::{Vec3A, Vec3Swizzles as _};
use thiserror::Error;

use crate::{
    CompactHeightfield, PolygonMesh, RegionId,
    math::{dir_offset_x, dir_offset_z, distance_squared_point_segment, distance_squared_point_segment_2d},
};

/// Per-polygon triangulations that follow the voxelized surface more closely than the polygons do.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailNavmesh {
    /// The sub-mesh data, one per polygon of the polygon mesh.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles. The first three entries are vertex indices relative to
    /// [`SubMesh::first_vertex_index`], the last one holds the edge flags.
    pub triangles: Vec<[u8; 4]>,
}

/// The detail triangulation of a single polygon.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex in [`DetailNavmesh::vertices`]
    pub first_vertex_index: u32,
    /// Number of vertices in the sub-mesh
    pub vertex_count: u32,
    /// Index of the first triangle in [`DetailNavmesh::triangles`]
    pub first_triangle_index: u32,
    /// Number of triangles in the sub-mesh
    pub triangle_count: u32,
}

/// Set on a detail triangle edge that lies on the boundary of its polygon.
pub const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

/// Errors that can occur while building a [`DetailNavmesh`].
#[derive(Error, Debug)]
pub enum DetailNavmeshError {
    /// A detail sub-mesh needs more vertices than the detail format can index.
    #[error("Polygon {polygon} produced {vertices} detail vertices, which is more than 255")]
    TooManyVertices {
        /// Index of the polygon in the polygon mesh
        polygon: usize,
        /// Number of vertices produced
        vertices: usize,
    },
}

const UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
// Enough for the Delaunay triangulation of MAX_VERTS points.
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

impl DetailNavmesh {
    /// Triangulates every polygon of `mesh`, sampling heights from `heightfield`.
    ///
    /// `sample_distance` is the spacing of height samples in world units, zero disables sampling.
    /// `sample_max_error` is the maximum distance the detail surface may deviate from the heightfield.
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailNavmeshError> {
        let mut detail = DetailNavmesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(detail);
        }

        let cs = mesh.cell_size;
        let ch = mesh.cell_height;
        let origin = mesh.aabb.min;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as i32);

        // Cell bounds of every polygon, also sizing the shared height patch.
        let bounds: Vec<Bounds> = (0..mesh.polygon_count())
            .map(|i| {
                let polygon = &mesh.polygon(i)[..mesh.polygon_vertex_count(i)];
                let mut bounds = Bounds {
                    x_min: heightfield.width as i32,
                    x_max: 0,
                    z_min: heightfield.height as i32,
                    z_max: 0,
                };
                for v in polygon.iter().map(|j| mesh.vertices[*j as usize]) {
                    bounds.x_min = bounds.x_min.min(v.x as i32);
                    bounds.x_max = bounds.x_max.max(v.x as i32);
                    bounds.z_min = bounds.z_min.min(v.z as i32);
                    bounds.z_max = bounds.z_max.max(v.z as i32);
                }
                bounds.x_min = 0.max(bounds.x_min - 1);
                bounds.x_max = (heightfield.width as i32).min(bounds.x_max + 1);
                bounds.z_min = 0.max(bounds.z_min - 1);
                bounds.z_max = (heightfield.height as i32).min(bounds.z_max + 1);
                bounds
            })
            .collect();

        let mut patch = HeightPatch::default();
        let mut builder = PolyDetailBuilder::default();

        for i in 0..mesh.polygon_count() {
            let polygon = &mesh.polygon(i)[..mesh.polygon_vertex_count(i)];

            let poly: Vec<Vec3A> = polygon
                .iter()
                .map(|j| {
                    let v = mesh.vertices[*j as usize];
                    Vec3A::new(v.x as f32 * cs, v.y as f32 * ch, v.z as f32 * cs)
                })
                .collect();

            let bounds = &bounds[i];
            patch.x_min = bounds.x_min;
            patch.z_min = bounds.z_min;
            patch.width = (bounds.x_max - bounds.x_min).max(0);
            patch.height = (bounds.z_max - bounds.z_min).max(0);
            patch.data.clear();
            patch
                .data
                .resize((patch.width * patch.height) as usize, UNSET_HEIGHT);
            patch.fill(heightfield, mesh, polygon, mesh.regions[i]);

            // Build detail mesh.
            builder.build(
                &poly,
                sample_distance,
                sample_max_error,
                height_search_radius,
                heightfield,
                &patch,
            );

            if builder.vertices.len() > u8::MAX as usize {
                return Err(DetailNavmeshError::TooManyVertices {
                    polygon: i,
                    vertices: builder.vertices.len(),
                });
            }

            // Store detail submesh.
            detail.meshes.push(SubMesh {
                first_vertex_index: detail.vertices.len() as u32,
                vertex_count: builder.vertices.len() as u32,
                first_triangle_index: detail.triangles.len() as u32,
                triangle_count: builder.triangles.len() as u32,
            });

            // Back to world space.
            detail
                .vertices
                .extend(builder.vertices.iter().map(|v| *v + origin));
            detail.triangles.extend(
                builder
                    .triangles
                    .iter()
                    .map(|t| [t[0] as u8, t[1] as u8, t[2] as u8, t[3] as u8]),
            );
        }

        Ok(detail)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bounds {
    x_min: i32,
    x_max: i32,
    z_min: i32,
    z_max: i32,
}

/// Heights of the compact heightfield under a single polygon, in cell units.
#[derive(Debug, Clone, Default)]
struct HeightPatch {
    data: Vec<u16>,
    x_min: i32,
    z_min: i32,
    width: i32,
    height: i32,
}

impl HeightPatch {
    #[inline]
    fn index(&self, x: i32, z: i32) -> usize {
        (x + z * self.width) as usize
    }

    fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && z >= 0 && x < self.width && z < self.height
    }

    /// Reads the heights of the spans under the polygon.
    ///
    /// Reads to the compact heightfield are offset by border size
    /// since the border size offset is already removed from the polymesh vertices.
    fn fill(&mut self, chf: &CompactHeightfield, mesh: &PolygonMesh, polygon: &[u16], region: RegionId) {
        let bs = mesh.border_size as i32;
        let mut queue = VecDeque::new();
        let mut empty = true;

        // Polygons merged across regions may overlap other polygons, so their heights are grown from the center instead.
        if region != RegionId::NONE {

            for hz in 0..self.height {
                let z = self.z_min + hz + bs;
                for hx in 0..self.width {
                    let x = self.x_min + hx + bs;
                    let Some(cell) = chf.try_cell_at(x as u16, z as u16) else {
                        continue;
                    };
                    let Some(i) = cell.index_range().find(|i| chf.spans[*i].region == region) else {
                        continue;
                    };
                    let index = self.index(hx, hz);
                    self.data[index] = chf.spans[i].y;
                    empty = false;

                    // Region borders seed the fill.
                    let border = (0..4).any(|dir| {
                        chf.neighbor(x as u16, z as u16, i, dir)
                            .is_some_and(|(_, _, a_index)| chf.spans[a_index].region != region)
                    });
                    if border {
                        queue.push_back((x, z, i));
                    }
                }
            }
        }


        if empty {
            self.seed_with_poly_center(chf, mesh, polygon, &mut queue);
        }

        // Breadth first so the fill stays on this polygon's surface.
        while let Some((cx, cz, ci)) = queue.pop_front() {
            for dir in 0..4 {
                let Some((ax, az, ai)) = chf.neighbor(cx as u16, cz as u16, ci, dir) else {
                    continue;
                };
                let hx = ax as i32 - self.x_min - bs;
                let hz = az as i32 - self.z_min - bs;
                if !self.contains(hx, hz) {
                    continue;
                }
                let index = self.index(hx, hz);
                if self.data[index] != UNSET_HEIGHT {
                    continue;
                }
                self.data[index] = chf.spans[ai].y;
                queue.push_back((ax as i32, az as i32, ai));
            }
        }
    }

    fn seed_with_poly_center(
        &mut self,
        chf: &CompactHeightfield,
        mesh: &PolygonMesh,
        polygon: &[u16],
        queue: &mut VecDeque<(i32, i32, usize)>,
    ) {
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];
        let bs = mesh.border_size as i32;

        let mut start = None;
        let mut d_min = UNSET_HEIGHT as i32;
        'search: for v in polygon.iter().map(|j| mesh.vertices[*j as usize]) {
            for (dx, dz) in OFFSET {
                let ax = v.x as i32 + dx;
                let ay = v.y as i32;
                let az = v.z as i32 + dz;
                if !self.contains(ax - self.x_min, az - self.z_min) {
                    continue;
                }
                let Some(cell) = chf.try_cell_at((ax + bs) as u16, (az + bs) as u16) else {
                    continue;
                };
                for i in cell.index_range() {
                    let d = (ay - chf.spans[i].y as i32).abs();
                    if d < d_min {
                        start = Some((ax, az, i));
                        d_min = d;
                    }
                    if d_min <= 0 {
                        break 'search;
                    }
                }
            }
        }
        let Some(start) = start else {
            tracing::warn!("Found no span near the polygon to seed the height patch from.");
            return;
        };

        // Find center of the polygon
        let (sum_x, sum_z) = polygon
            .iter()
            .map(|j| mesh.vertices[*j as usize])
            .fold((0, 0), |(x, z), v| (x + v.x as i32, z + v.z as i32));
        let pcx = sum_x / polygon.len() as i32;
        let pcz = sum_z / polygon.len() as i32;

        // Use a stack for DFS. The patch data marks visited cells.
        let mut stack = vec![start];
        self.data.fill(0);
        let mut dirs = [0_u8, 1, 2, 3];
        let mut current = start;

        // Backtracking walk: simplified contours can leave dead ends even in convex polygons.
        loop {
            let Some((cx, cz, ci)) = stack.pop() else {
                tracing::warn!("Walk towards polygon center failed to reach center");
                break;
            };
            current = (cx, cz, ci);
            if cx == pcx && cz == pcz {
                break;
            }


            let direct_dir = if cx == pcx {
                if pcz > cz { 1 } else { 3 }
            } else if pcx > cx {
                2
            } else {
                0
            };

            // Popped first.
            dirs.swap(direct_dir, 3);
            for dir in dirs {
                let Some((_, _, ni)) = chf.neighbor((cx + bs) as u16, (cz + bs) as u16, ci, dir) else {
                    continue;
                };
                let nx = cx + dir_offset_x(dir) as i32;
                let nz = cz + dir_offset_z(dir) as i32;
                let (hx, hz) = (nx - self.x_min, nz - self.z_min);
                if !self.contains(hx, hz) {
                    continue;
                }
                let index = self.index(hx, hz);
                if self.data[index] != 0 {
                    continue;
                }
                self.data[index] = 1;
                stack.push((nx, nz, ni));
            }
            dirs.swap(direct_dir, 3);
        }

        let (cx, cz, ci) = current;
        // Seeds are given in coordinates with borders
        queue.clear();
        queue.push_back((cx + bs, cz + bs, ci));
        self.data.fill(UNSET_HEIGHT);
        let index = self.index(cx - self.x_min, cz - self.z_min);
        self.data[index] = chf.spans[ci].y;
    }

    /// Looks up the height under `position`, searching the neighborhood in growing rings when the
    /// cell itself has no data.
    fn height_at(&self, position: Vec3A, inverse_cell_size: f32, cell_height: f32, radius: i32) -> Option<u16> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let ix = ((position.x * inverse_cell_size + 0.01).floor() as i32 - self.x_min)
            .clamp(0, self.width - 1);
        let iz = ((position.z * inverse_cell_size + 0.01).floor() as i32 - self.z_min)
            .clamp(0, self.height - 1);
        let mut h = self.data[self.index(ix, iz)];
        if h != UNSET_HEIGHT {
            return Some(h);
        }

        // Spiral outwards until a cell with a height turns up.
        let (mut x, mut z, mut dx, mut dz) = (1, 0, 1, 0);
        let max_size = radius * 2 + 1;
        let max_iter = max_size * max_size - 1;
        let mut next_ring_iter_start = 8;
        let mut next_ring_iters = 16;
        let mut d_min = f32::MAX;
        for i in 0..max_iter {
            let nx = ix + x;
            let nz = iz + z;
            if self.contains(nx, nz) {
                let nh = self.data[self.index(nx, nz)];
                if nh != UNSET_HEIGHT {
                    let d = (nh as f32 * cell_height - position.y).abs();
                    if d < d_min {
                        h = nh;
                        d_min = d;
                    }
                }
            }

            // We want to find the best height as close to the center cell as possible.
            // Each ring around the center holds 8 more cells than the previous one.
            // If we are about to enter the next ring and have found a height, we abort the search.
            if i + 1 == next_ring_iter_start {
                if h != UNSET_HEIGHT {
                    break;
                }
                next_ring_iter_start += next_ring_iters;
                next_ring_iters += 8;
            }

            if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
                (dx, dz) = (-dz, dx);
            }
            x += dx;
            z += dz;
        }
        (h != UNSET_HEIGHT).then_some(h)
    }
}

/// Scratch buffers for triangulating a single polygon.
#[derive(Debug, Default)]
struct PolyDetailBuilder {
    vertices: Vec<Vec3A>,
    /// Vertex indices and edge flags.
    triangles: Vec<[usize; 4]>,
    hull: Vec<usize>,
    edges: Vec<Edge>,
    samples: Vec<Sample>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    x: i32,
    y: Option<u16>,
    z: i32,
    added: bool,
}

impl PolyDetailBuilder {
    fn build(
        &mut self,
        poly: &[Vec3A],
        sample_distance: f32,
        sample_max_error: f32,
        height_search_radius: i32,
        chf: &CompactHeightfield,
        patch: &HeightPatch,
    ) {
        self.vertices.clear();
        self.vertices.extend_from_slice(poly);
        self.triangles.clear();
        self.hull.clear();
        self.edges.clear();

        let cs = chf.cell_size;
        let ch = chf.cell_height;
        let ics = 1.0 / cs;
        let nin = poly.len();

        let min_extent = poly_min_extent(poly);

        // Edges first, so neighboring polygons get identical edge vertices.
        if sample_distance > 0.0 {
            let mut edge = [Vec3A::ZERO; MAX_VERTS_PER_EDGE + 1];
            let mut j = nin - 1;
            for i in 0..nin {
                let mut vj = poly[j];
                let mut vi = poly[i];
                let mut swapped = false;

                if (vj.x - vi.x).abs() < 1.0e-6 {
                    if vj.z > vi.z {
                        std::mem::swap(&mut vj, &mut vi);
                        swapped = true;
                    }
                } else if vj.x > vi.x {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }

                let delta = vi - vj;
                let d = delta.xz().length();
                let mut nn = 1 + (d / sample_distance).floor() as usize;
                if nn >= MAX_VERTS_PER_EDGE {
                    nn = MAX_VERTS_PER_EDGE - 1;
                }
                if self.vertices.len() + nn >= MAX_VERTS {
                    nn = (MAX_VERTS - 1).saturating_sub(self.vertices.len()).max(1);
                }
                for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                    let u = k as f32 / nn as f32;
                    *pos = vj + delta * u;
                    if let Some(h) = patch.height_at(*pos, ics, ch, height_search_radius) {
                        pos.y = h as f32 * ch;
                    }
                }

                // Simplify samples.
                let mut idx = vec![0, nn];
                let mut k = 0;
                while k < idx.len() - 1 {
                    let a = idx[k];
                    let b = idx[k + 1];
                    let va = edge[a];
                    let vb = edge[b];
                    let mut max_d = 0.0;
                    let mut max_i = None;
                    for (m, pos) in edge.iter().enumerate().take(b).skip(a + 1) {
                        let dev = distance_squared_point_segment(*pos, va, vb);
                        if dev > max_d {
                            max_d = dev;
                            max_i = Some(m);
                        }
                    }

                    match max_i {
                        Some(max_i) if max_d > sample_max_error * sample_max_error => {
                            idx.insert(k + 1, max_i);
                        }
                        _ => k += 1,
                    }
                }

                self.hull.push(j);
                // Add new vertices.
                let inner = &idx[1..idx.len() - 1];
                if swapped {
                    for k in inner.iter().rev() {
                        self.hull.push(self.vertices.len());
                        self.vertices.push(edge[*k]);
                    }
                } else {
                    for k in inner {
                        self.hull.push(self.vertices.len());
                        self.vertices.push(edge[*k]);
                    }
                }
                j = i;
            }
        } else {
            self.hull.extend(0..nin);
        }

        // Slivers get no interior samples.
        if min_extent < sample_distance * 2.0 {
            self.triangulate_hull(nin);
            self.set_triangle_flags();
            return;
        }


        self.triangulate_hull(nin);

        if self.triangles.is_empty() {
            tracing::warn!(
                "Could not triangulate polygon ({} verts).",
                self.vertices.len()
            );
            return;
        }

        if sample_distance > 0.0 {
            let (min, max) = poly
                .iter()
                .fold((poly[0], poly[0]), |(min, max), v| (min.min(*v), max.max(*v)));
            let x0 = (min.x / sample_distance).floor() as i32;
            let x1 = (max.x / sample_distance).ceil() as i32;
            let z0 = (min.z / sample_distance).floor() as i32;
            let z1 = (max.z / sample_distance).ceil() as i32;
            self.samples.clear();
            for z in z0..z1 {
                for x in x0..x1 {
                    let pt = Vec3A::new(
                        x as f32 * sample_distance,
                        (max.y + min.y) * 0.5,
                        z as f32 * sample_distance,
                    );
                    if distance_to_poly(poly, pt) > -sample_distance / 2.0 {
                        continue;
                    }
                    self.samples.push(Sample {
                        x,
                        y: patch.height_at(pt, ics, ch, height_search_radius),
                        z,
                        added: false,
                    });
                }
            }

            // Greedily insert the worst sample until the surface is close enough.
            for _ in 0..self.samples.len() {
                if self.vertices.len() >= MAX_VERTS {
                    break;
                }

                let mut best = None;
                let mut best_d = 0.0;
                for (i, sample) in self.samples.iter().enumerate() {
                    if sample.added {
                        continue;
                    }
                    let Some(y) = sample.y else {
                        continue;
                    };
                    // Jitter breaks the symmetry of the grid.
                    let pt = Vec3A::new(
                        sample.x as f32 * sample_distance + jitter_x(i) * cs * 0.1,
                        y as f32 * ch,
                        sample.z as f32 * sample_distance + jitter_z(i) * cs * 0.1,
                    );
                    // Skip samples that did not hit the mesh.
                    let Some(d) = self.distance_to_triangles(pt) else {
                        continue;
                    };
                    if d > best_d {
                        best_d = d;
                        best = Some((i, pt));
                    }
                }
                let Some((best_i, best_pt)) = best else {
                    break;
                };
                if best_d <= sample_max_error {
                    break;
                }
                // Mark sample as added.
                self.samples[best_i].added = true;
                // Add the new sample point.
                self.vertices.push(best_pt);

                // Create new triangulation.
                // TODO: Incremental add instead of full rebuild.
                self.delaunay_hull();
            }
        }

        if self.triangles.len() > MAX_TRIS {
            tracing::error!(
                "Shrinking triangle count from {} to max {MAX_TRIS}.",
                self.triangles.len()
            );
            self.triangles.truncate(MAX_TRIS);
        }
        self.set_triangle_flags();
    }

    fn triangulate_hull(&mut self, nin: usize) {
        let hull = &self.hull;
        let n = hull.len();
        if n < 3 {
            return;
        }
        let vertex = |i: usize| self.vertices[hull[i]].xz();
        let next = |i: usize| (i + 1) % n;
        let prev = |i: usize| (i + n - 1) % n;

        let mut start = 0;
        let mut left = 1;
        let mut right = n - 1;

        // Shortest ear first.
        let mut d_min = f32::MAX;
        for i in 0..n {
            if hull[i] >= nin {
                // Edge samples are collinear with their neighbors.
                continue;
            }
            let pi = prev(i);
            let ni = next(i);
            let (pv, cv, nv) = (vertex(pi), vertex(i), vertex(ni));
            let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
            if d < d_min {
                start = i;
                left = ni;
                right = pi;
                d_min = d;
            }
        }

        // Add first triangle
        self.triangles
            .push([hull[start], hull[left], hull[right], 0]);

        // Zip up from both sides, taking the shorter triangle each step.
        while next(left) != right {
            let n_left = next(left);
            let n_right = prev(right);

            let cv_left = vertex(left);
            let nv_left = vertex(n_left);
            let cv_right = vertex(right);
            let nv_right = vertex(n_right);
            let d_left = cv_left.distance(nv_left) + nv_left.distance(cv_right);
            let d_right = cv_right.distance(nv_right) + cv_left.distance(nv_right);

            if d_left < d_right {
                self.triangles.push([hull[left], hull[n_left], hull[right], 0]);
                left = n_left;
            } else {
                self.triangles.push([hull[left], hull[n_right], hull[right], 0]);
                right = n_right;
            }
        }
    }

    /// Triangulates all vertices with a Delaunay triangulation constrained to the hull.
    fn delaunay_hull(&mut self) {
        self.edges.clear();
        self.triangles.clear();
        let max_edges = self.vertices.len() * 10;
        let mut face_count = 0;

        let n = self.hull.len();
        let mut j = n - 1;
        for i in 0..n {
            add_edge(&mut self.edges, max_edges, self.hull[j], self.hull[i], Face::Hull, Face::Undefined);
            j = i;
        }

        let mut current_edge = 0;
        while current_edge < self.edges.len() {
            if self.edges[current_edge].left == Face::Undefined {
                self.complete_facet(max_edges, &mut face_count, current_edge);
            }
            if self.edges[current_edge].right == Face::Undefined {
                self.complete_facet(max_edges, &mut face_count, current_edge);
            }
            current_edge += 1;
        }

        // Create tris
        let mut triangles = vec![[None::<usize>; 3]; face_count];
        for edge in &self.edges {
            if let Face::Triangle(face) = edge.right {
                // Left face
                let t = &mut triangles[face];
                if t[0].is_none() {
                    t[0] = Some(edge.s);
                    t[1] = Some(edge.t);
                } else if t[0] == Some(edge.t) {
                    t[2] = Some(edge.s);
                } else if t[1] == Some(edge.s) {
                    t[2] = Some(edge.t);
                }
            }
            if let Face::Triangle(face) = edge.left {
                // Right
                let t = &mut triangles[face];
                if t[0].is_none() {
                    t[0] = Some(edge.t);
                    t[1] = Some(edge.s);
                } else if t[0] == Some(edge.s) {
                    t[2] = Some(edge.t);
                } else if t[1] == Some(edge.t) {
                    t[2] = Some(edge.s);
                }
            }
        }

        for (i, t) in triangles.into_iter().enumerate() {
            match t {
                [Some(a), Some(b), Some(c)] => self.triangles.push([a, b, c, 0]),
                _ => tracing::warn!("Removing dangling face {i} {t:?}."),
            }
        }
    }

    fn complete_facet(&mut self, max_edges: usize, face_count: &mut usize, e: usize) {
        const EPS: f32 = 1e-5;
        let pts = &self.vertices;

        // Cache s and t.
        let edge = self.edges[e];
        let (s, t) = if edge.left == Face::Undefined {
            (edge.s, edge.t)
        } else if edge.right == Face::Undefined {
            (edge.t, edge.s)
        } else {
            // Edge already completed.
            return;
        };

        // Find best point on left of edge.
        let mut pt = None;
        let mut c = Vec3A::ZERO;
        let mut r = -1.0;
        for u in 0..pts.len() {
            if u == s || u == t {
                continue;
            }
            if cross_2d(pts[s], pts[t], pts[u]) <= EPS {
                continue;
            }
            if r < 0.0 {
                // The circle is not updated yet, do it now.
                pt = Some(u);
                (c, r) = circum_circle(pts[s], pts[t], pts[u]);
                continue;
            }
            let d = c.xz().distance(pts[u].xz());
            const TOLERANCE: f32 = 0.001;
            if d > r * (1.0 + TOLERANCE) {
                // Outside current circumcircle, skip.
                continue;
            } else if d < r * (1.0 - TOLERANCE) {
                // Inside safe circumcircle, update circle.
                pt = Some(u);
                (c, r) = circum_circle(pts[s], pts[t], pts[u]);
            } else {
                // Inside epsilon circum circle, do extra tests to make sure the edge is valid.
                // s-u and t-u cannot overlap with s-pt nor t-pt if they exists.
                if overlap_edges(pts, &self.edges, s, u) || overlap_edges(pts, &self.edges, t, u) {
                    continue;
                }
                // Edge is valid.
                pt = Some(u);
                (c, r) = circum_circle(pts[s], pts[t], pts[u]);
            }
        }

        // Add new triangle or update edge info if s-t is on hull.
        let Some(pt) = pt else {
            self.edges[e].update_left_face(s, t, Face::Hull);
            return;
        };
        let face = Face::Triangle(*face_count);
        // Update face information of edge being completed.
        self.edges[e].update_left_face(s, t, face);

        // Add new edge or update face info of old edge.
        match find_edge(&self.edges, pt, s) {
            Some(e) => self.edges[e].update_left_face(pt, s, face),
            None => add_edge(&mut self.edges, max_edges, pt, s, face, Face::Undefined),
        }
        // Add new edge or update face info of old edge.
        match find_edge(&self.edges, t, pt) {
            Some(e) => self.edges[e].update_left_face(t, pt, face),
            None => add_edge(&mut self.edges, max_edges, t, pt, face, Face::Undefined),
        }
        *face_count += 1;
    }

    /// Flags the triangle edges lying on the polygon outline.
    fn set_triangle_flags(&mut self) {
        let hull = &self.hull;
        for t in &mut self.triangles {
            let mut flags = 0;
            if on_hull(t[0], t[1], hull) {
                flags |= (DETAIL_EDGE_BOUNDARY as usize) << 0;
            }
            if on_hull(t[1], t[2], hull) {
                flags |= (DETAIL_EDGE_BOUNDARY as usize) << 2;
            }
            if on_hull(t[2], t[0], hull) {
                flags |= (DETAIL_EDGE_BOUNDARY as usize) << 4;
            }
            t[3] = flags;
        }
    }

    fn distance_to_triangles(&self, p: Vec3A) -> Option<f32> {
        self.triangles
            .iter()
            .filter_map(|t| {
                distance_to_triangle(p, self.vertices[t[0]], self.vertices[t[1]], self.vertices[t[2]])
            })
            .min_by(f32::total_cmp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Face {
    Undefined,
    Hull,
    Triangle(usize),
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    s: usize,
    t: usize,
    left: Face,
    right: Face,
}

impl Edge {
    fn update_left_face(&mut self, s: usize, t: usize, face: Face) {
        if self.s == s && self.t == t && self.left == Face::Undefined {
            self.left = face;
        } else if self.t == s && self.s == t && self.right == Face::Undefined {
            self.right = face;
        }
    }
}

fn find_edge(edges: &[Edge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|e| (e.s == s && e.t == t) || (e.s == t && e.t == s))
}

fn add_edge(edges: &mut Vec<Edge>, max_edges: usize, s: usize, t: usize, left: Face, right: Face) {
    if edges.len() >= max_edges {
        tracing::error!("Too many edges ({}/{max_edges}).", edges.len());
        return;
    }
    // Add edge if not already in the triangulation.
    if find_edge(edges, s, t).is_none() {
        edges.push(Edge { s, t, left, right });
    }
}

fn overlap_edges(pts: &[Vec3A], edges: &[Edge], s1: usize, t1: usize) -> bool {
    edges.iter().any(|e| {
        // Same or connected edges do not overlap.
        if e.s == s1 || e.s == t1 || e.t == s1 || e.t == t1 {
            return false;
        }
        overlap_segment_segment_2d(pts[e.s], pts[e.t], pts[s1], pts[t1])
    })
}

fn overlap_segment_segment_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = cross_2d(a, b, d);
    let a2 = cross_2d(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = cross_2d(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

#[inline]
fn cross_2d(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

/// Circumcircle of the triangle on the xz-plane as center and radius.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec3A, f32) {
    const EPS: f32 = 1e-6;
    // Calculate the circle relative to p1, to avoid some precision issues.
    let v1 = Vec3A::ZERO;
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = cross_2d(v1, v2, v3);
    if cp.abs() <= EPS {
        return (p1, 0.0);
    }
    let v1_sq = v1.xz().length_squared();
    let v2_sq = v2.xz().length_squared();
    let v3_sq = v3.xz().length_squared();
    let c = Vec3A::new(
        (v1_sq * (v2.z - v3.z) + v2_sq * (v3.z - v1.z) + v3_sq * (v1.z - v2.z)) / (2.0 * cp),
        0.0,
        (v1_sq * (v3.x - v2.x) + v2_sq * (v1.x - v3.x) + v3_sq * (v2.x - v1.x)) / (2.0 * cp),
    );
    let r = c.xz().distance(v1.xz());
    (c + p1, r)
}

/// Vertical distance from `p` to the triangle, or `None` if `p` is outside of it on the xz-plane.
fn distance_to_triangle(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.xz().dot(v0.xz());
    let dot01 = v0.xz().dot(v1.xz());
    let dot02 = v0.xz().dot(v2.xz());
    let dot11 = v1.xz().dot(v1.xz());
    let dot12 = v1.xz().dot(v2.xz());

    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn jitter_x(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0x8da6b343) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

fn jitter_z(i: usize) -> f32 {
    ((i as u32).wrapping_mul(0xd8163841) & 0xffff) as f32 / 65535.0 * 2.0 - 1.0
}

/// Squared distance to the polygon boundary on the xz-plane, negative inside the polygon.
fn distance_to_poly(vertices: &[Vec3A], p: Vec3A) -> f32 {
    let mut d_min = f32::MAX;
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if ((vi.z > p.z) != (vj.z > p.z))
            && (p.x < (vj.x - vi.x) * (p.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        d_min = d_min.min(distance_squared_point_segment_2d(p, vj, vi));
        j = i;
    }
    if inside { -d_min } else { d_min }
}

/// Minimum extent of the polygon, the smallest of its widths measured from each edge.
fn poly_min_extent(vertices: &[Vec3A]) -> f32 {
    let n = vertices.len();
    let mut min_dist = f32::MAX;
    for i in 0..n {
        let ni = (i + 1) % n;
        let p1 = vertices[i];
        let p2 = vertices[ni];
        let max_edge_dist = (0..n)
            .filter(|j| *j != i && *j != ni)
            .map(|j| distance_squared_point_segment_2d(vertices[j], p1, p2))
            .fold(0.0_f32, f32::max);
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist.sqrt()
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    let n = hull.len();
    // Interior samples are stored after the hull.
    if a >= n || b >= n {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        if a == hull[j] && b == hull[i] {
            return true;
        }
        j = i;
    }
    false
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::{UVec3, Vec3A};

    use crate::{Aabb3d, AreaType, BuildContoursFlags, Heightfield, TriMesh};

    use super::*;

    fn flat_polygon_mesh(size: f32, y: f32) -> (PolygonMesh, CompactHeightfield) {
        let mut heightfield = Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(size, 4.0, size)),
            0.5,
            0.25,
        )
        .unwrap();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, y, 0.0),
                Vec3A::new(0.0, y, size),
                Vec3A::new(size, y, size),
                Vec3A::new(size, y, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        let mut compact = heightfield.into_compact(4, 2).unwrap();
        compact.build_regions_monotone(0, 1, 20).unwrap();
        let contours = compact.build_contours(1.3, 24, BuildContoursFlags::default());
        let mesh = contours.into_polygon_mesh(6).unwrap();
        (mesh, compact)
    }

    #[test]
    fn flat_floor_detail_is_at_floor_height() {
        let (mesh, compact) = flat_polygon_mesh(8.0, 1.0);
        let detail = DetailNavmesh::new(&mesh, &compact, 3.0, 1.0).unwrap();
        assert_eq!(detail.meshes.len(), mesh.polygon_count());
        assert!(!detail.triangles.is_empty());
        // Span tops round up by at most one voxel.
        for v in &detail.vertices {
            assert!(v.y >= 1.0 - 1e-4, "{v}");
            assert_relative_eq!(v.y, 1.0, epsilon = 0.25 + 1e-4);
        }
        for v in &mesh.vertices {
            let y = mesh.aabb.min.y + v.y as f32 * mesh.cell_height;
            assert!(detail.vertices.iter().any(|d| (d.y - y).abs() < 1e-4));
        }
        for sub_mesh in &detail.meshes {
            assert!(sub_mesh.vertex_count >= 3);
            assert!(sub_mesh.triangle_count >= 1);
            let triangles = &detail.triangles[sub_mesh.first_triangle_index as usize..]
                [..sub_mesh.triangle_count as usize];
            for t in triangles {
                assert!((t[0] as u32) < sub_mesh.vertex_count);
                assert!((t[1] as u32) < sub_mesh.vertex_count);
                assert!((t[2] as u32) < sub_mesh.vertex_count);
            }
        }
    }

    #[test]
    fn without_sampling_polygons_are_fanned() {
        let (mesh, compact) = flat_polygon_mesh(8.0, 1.0);
        let detail = DetailNavmesh::new(&mesh, &compact, 0.0, 1.0).unwrap();
        for (i, sub_mesh) in detail.meshes.iter().enumerate() {
            let n = mesh.polygon_vertex_count(i) as u32;
            assert_eq!(sub_mesh.vertex_count, n);
            assert_eq!(sub_mesh.triangle_count, n - 2);
        }
    }

    #[test]
    fn empty_mesh_gives_empty_detail() {
        let (_, compact) = flat_polygon_mesh(4.0, 1.0);
        let detail = DetailNavmesh::new(&PolygonMesh::default(), &compact, 6.0, 1.0).unwrap();
        assert!(detail.meshes.is_empty());
        assert!(detail.vertices.is_empty());
    }

    #[test]
    fn delaunay_triangulates_square_with_center_point() {
        let mut builder = PolyDetailBuilder {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 4.0),
                Vec3A::new(4.0, 0.0, 4.0),
                Vec3A::new(4.0, 0.0, 0.0),
                Vec3A::new(2.1, 0.0, 1.9),
            ],
            hull: vec![0, 1, 2, 3],
            ..Default::default()
        };
        builder.delaunay_hull();
        assert_eq!(builder.triangles.len(), 4);
        assert!(builder.triangles.iter().all(|t| t[..3].contains(&4)));
    }

    #[test]
    fn hull_edges_are_flagged() {
        let mut builder = PolyDetailBuilder {
            vertices: vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 4.0),
                Vec3A::new(4.0, 0.0, 4.0),
            ],
            hull: vec![0, 1, 2],
            ..Default::default()
        };
        builder.triangulate_hull(3);
        builder.set_triangle_flags();
        assert_eq!(builder.triangles.len(), 1);
        // Every edge of a lone triangle lies on the hull.
        assert_eq!(builder.triangles[0][3], 0b01_01_01);
    }
}
