use std::collections::HashMap;

use glam::{U16Vec3, UVec4};
use thiserror::Error;

use crate::{
    Aabb3d, AreaType, RegionId,
    contours::{ContourSet, RegionVertexId},
    math::{intersect, intersect_prop, left, left_on},
};

/// Convex polygons over a field, in voxel coordinates, ready to become a navigation tile.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolygonMesh {
    /// The mesh vertices in cell coordinates.
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data. [Length: [`Self::polygon_count`] * 2 * [`Self::vertices_per_polygon`]]
    ///
    /// Each polygon takes `2 * vertices_per_polygon` entries: first its vertex indices,
    /// then for each edge the index of the neighboring polygon.
    /// Unused entries are [`PolygonMesh::NO_INDEX`]. A neighbor entry with
    /// [`PolygonMesh::PORTAL_FLAG`] set is an edge on the tile border, with the side in the low bits.
    pub polygons: Vec<u16>,
    /// Region of each polygon.
    pub regions: Vec<RegionId>,
    /// Ability flags of each polygon, filled in by the caller.
    pub flags: Vec<u16>,
    /// Area of each polygon.
    pub areas: Vec<AreaType>,
    /// Vertex slots per polygon.
    pub vertices_per_polygon: usize,
    /// World bounds without the border.
    pub aabb: Aabb3d,
    /// Column edge length.
    pub cell_size: f32,
    /// Voxel height.
    pub cell_height: f32,
    /// Border cells that were cut off.
    pub border_size: u16,
    /// Contour simplification error the polygons were built with.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// Marks an unused vertex or neighbor entry.
    pub const NO_INDEX: u16 = 0xffff;
    /// Set on neighbor entries that lie on the tile border.
    pub const PORTAL_FLAG: u16 = 0x8000;

    /// The number of polygons in the mesh.
    pub fn polygon_count(&self) -> usize {
        self.regions.len()
    }

    /// The vertex indices of polygon `index`, terminated by [`PolygonMesh::NO_INDEX`] if it has
    /// fewer than [`PolygonMesh::vertices_per_polygon`] vertices.
    pub fn polygon(&self, index: usize) -> &[u16] {
        let start = index * 2 * self.vertices_per_polygon;
        &self.polygons[start..start + self.vertices_per_polygon]
    }

    /// The neighbor entries of polygon `index`, one per edge.
    pub fn neighbors(&self, index: usize) -> &[u16] {
        let start = (index * 2 + 1) * self.vertices_per_polygon;
        &self.polygons[start..start + self.vertices_per_polygon]
    }

    /// The number of vertices actually used by polygon `index`.
    pub fn polygon_vertex_count(&self, index: usize) -> usize {
        count_polygon_vertices(self.polygon(index))
    }

    fn polygon_mut(&mut self, index: usize) -> &mut [u16] {
        let start = index * 2 * self.vertices_per_polygon;
        &mut self.polygons[start..start + 2 * self.vertices_per_polygon]
    }

    fn push_polygon(&mut self, vertices: &[u16], region: RegionId, area: AreaType) {
        let nvp = self.vertices_per_polygon;
        self.polygons.extend_from_slice(&vertices[..nvp]);
        self.polygons
            .extend(std::iter::repeat_n(Self::NO_INDEX, nvp));
        self.regions.push(region);
        self.areas.push(area);
    }

    /// Replaces polygon `index` with the last polygon.
    fn swap_remove_polygon(&mut self, index: usize) {
        let stride = 2 * self.vertices_per_polygon;
        let last = self.polygon_count() - 1;
        if index != last {
            self.polygons
                .copy_within(last * stride..(last + 1) * stride, index * stride);
        }
        self.polygons.truncate(last * stride);
        self.regions.swap_remove(index);
        self.areas.swap_remove(index);
    }
}

/// Errors that can occur while building a [`PolygonMesh`].
#[derive(Error, Debug)]
pub enum PolygonMeshError {
    /// The contours produce more vertices than a polygon mesh can index.
    #[error("Too many vertices: {0}")]
    TooManyVertices(usize),
    /// The contours produce more polygons than a polygon mesh can index.
    #[error("Too many polygons: {0}")]
    TooManyPolygons(usize),
    /// `vertices_per_polygon` must be at least 3.
    #[error("Invalid number of vertices per polygon: {0}")]
    InvalidVerticesPerPolygon(usize),
}

impl ContourSet {
    /// Turns the contours into convex polygons.
    ///
    /// Each contour is triangulated and the triangles are greedily merged into convex
    /// polygons with at most `max_vertices_per_polygon` vertices.
    /// Vertices flagged as tile border vertices are removed where possible.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolygonMeshError> {
        let nvp = max_vertices_per_polygon;
        if nvp < 3 {
            return Err(PolygonMeshError::InvalidVerticesPerPolygon(nvp));
        }
        let mut mesh = PolygonMesh {
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
            vertices_per_polygon: nvp,
            ..Default::default()
        };

        let contours = || self.contours.iter().filter(|c| c.vertices.len() >= 3);
        let max_vertices: usize = contours().map(|c| c.vertices.len()).sum();
        if max_vertices >= 0xfffe {
            return Err(PolygonMeshError::TooManyVertices(max_vertices));
        }

        let mut remove_flags = vec![false; max_vertices];
        let mut vertex_lookup: HashMap<(u16, u16), Vec<u16>> = HashMap::new();
        let mut polygons = Vec::new();

        for (contour_index, contour) in contours().enumerate() {
            // Triangulate contour
            let (triangles, ok) = triangulate(&contour.vertices);
            if !ok {
                // Bad triangulation, should not happen.
                tracing::warn!("Bad triangulation of contour {contour_index}.");
            }

            // Add and merge vertices.
            let indices: Vec<u16> = contour
                .vertices
                .iter()
                .map(|v| {
                    let index = add_vertex(&mut mesh.vertices, &mut vertex_lookup, v);
                    if RegionVertexId::from_bits_retain(v.w).contains(RegionVertexId::BORDER_VERTEX) {
                        // This vertex should be removed.
                        remove_flags[index as usize] = true;
                    }
                    index
                })
                .collect();

            // Build initial polygons.
            polygons.clear();
            for t in &triangles {
                if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                    let mut polygon = vec![PolygonMesh::NO_INDEX; nvp];
                    polygon[0] = indices[t[0]];
                    polygon[1] = indices[t[1]];
                    polygon[2] = indices[t[2]];
                    polygons.push(polygon);
                }
            }
            if polygons.is_empty() {
                continue;
            }

            // Merge polygons.
            if nvp > 3 {
                merge_polygons(&mut polygons, &mesh.vertices, |_, _| {});
            }

            // Store polygons.
            for polygon in &polygons {
                mesh.push_polygon(polygon, contour.region, contour.area);
            }
        }

        // Remove edge vertices.
        let mut i = 0;
        while i < mesh.vertices.len() {
            if remove_flags[i] && mesh.can_remove_vertex(i as u16) {
                mesh.remove_vertex(i as u16);
                // Fixup vertex flags
                remove_flags.remove(i);
                continue;
            }
            i += 1;
        }

        // Calculate adjacency.
        mesh.build_adjacency();

        // Find portal edges
        if mesh.border_size > 0 {
            mesh.mark_portal_edges(self.width, self.height);
        }

        // Just allocate the mesh flags array. The user is responsible to fill it.
        mesh.flags = vec![0; mesh.polygon_count()];

        if mesh.vertices.len() > 0xffff {
            return Err(PolygonMeshError::TooManyVertices(mesh.vertices.len()));
        }
        if mesh.polygon_count() > 0xffff {
            return Err(PolygonMeshError::TooManyPolygons(mesh.polygon_count()));
        }
        Ok(mesh)
    }
}

impl PolygonMesh {
    fn can_remove_vertex(&self, remove: u16) -> bool {
        // Count number of polygons to remove.
        let mut touched_vertex_count = 0;
        let mut remaining_edge_count = 0;
        for i in 0..self.polygon_count() {
            let polygon = &self.polygon(i)[..self.polygon_vertex_count(i)];
            let removed = polygon.iter().filter(|v| **v == remove).count();
            if removed > 0 {
                touched_vertex_count += removed;
                remaining_edge_count += polygon.len() - (removed + 1);
            }
        }

        // There would be too few edges remaining to create a polygon.
        // This can happen for example when a tip of a triangle is marked
        // as deletion, but there are no other polys that share the vertex.
        // In this case, the vertex should not be removed.
        if remaining_edge_count <= 2 {
            return false;
        }

        // Find edges which share the removed vertex.
        // (other vertex, share count)
        let mut edges: Vec<(u16, u32)> = Vec::with_capacity(touched_vertex_count * 2);
        for i in 0..self.polygon_count() {
            let polygon = &self.polygon(i)[..self.polygon_vertex_count(i)];
            // Collect edges which touches the removed vertex.
            let mut k = polygon.len() - 1;
            for j in 0..polygon.len() {
                if polygon[j] == remove || polygon[k] == remove {
                    // Arrange edge so that a=rem.
                    let other = if polygon[k] == remove {
                        polygon[j]
                    } else {
                        polygon[k]
                    };
                    match edges.iter_mut().find(|(b, _)| *b == other) {
                        // Exists, increment vertex share count.
                        Some((_, count)) => *count += 1,
                        None => edges.push((other, 1)),
                    }
                }
                k = j;
            }
        }

        // There should be no more than 2 open edges.
        // This catches the case that two non-adjacent polygons
        // share the removed vertex. In that case, do not remove the vertex.
        let open_edge_count = edges.iter().filter(|(_, count)| *count < 2).count();
        open_edge_count <= 2
    }

    fn remove_vertex(&mut self, remove: u16) {
        let nvp = self.vertices_per_polygon;

        // (from, to, region, area)
        let mut edges: Vec<(u16, u16, RegionId, AreaType)> = Vec::new();
        let mut i = 0;
        while i < self.polygon_count() {
            let vertex_count = self.polygon_vertex_count(i);
            let polygon = &self.polygon(i)[..vertex_count];
            if !polygon.contains(&remove) {
                i += 1;
                continue;
            }
            // Collect edges which does not touch the removed vertex.
            let mut k = vertex_count - 1;
            for j in 0..vertex_count {
                if polygon[j] != remove && polygon[k] != remove {
                    edges.push((polygon[k], polygon[j], self.regions[i], self.areas[i]));
                }
                k = j;
            }
            // Remove the polygon.
            self.swap_remove_polygon(i);
        }

        // Remove vertex.
        self.vertices.remove(remove as usize);

        // Adjust indices to match the removed vertex layout.
        for i in 0..self.polygon_count() {
            let vertex_count = self.polygon_vertex_count(i);
            for v in &mut self.polygon_mut(i)[..vertex_count] {
                if *v > remove {
                    *v -= 1;
                }
            }
        }
        for (a, b, _, _) in &mut edges {
            if *a > remove {
                *a -= 1;
            }
            if *b > remove {
                *b -= 1;
            }
        }
        if edges.is_empty() {
            return;
        }

        // Start with one vertex, keep appending connected
        // segments to the start and end of the hole.
        let mut hole = std::collections::VecDeque::from([edges[0].0]);
        let mut hole_regions = std::collections::VecDeque::from([edges[0].2]);
        let mut hole_areas = std::collections::VecDeque::from([edges[0].3]);
        while !edges.is_empty() {
            let mut matched = false;
            let mut i = 0;
            while i < edges.len() {
                let (a, b, region, area) = edges[i];
                let added = if hole.front() == Some(&b) {
                    // The segment matches the beginning of the hole boundary.
                    hole.push_front(a);
                    hole_regions.push_front(region);
                    hole_areas.push_front(area);
                    true
                } else if hole.back() == Some(&a) {
                    // The segment matches the end of the hole boundary.
                    hole.push_back(b);
                    hole_regions.push_back(region);
                    hole_areas.push_back(area);
                    true
                } else {
                    false
                };
                if added {
                    // The edge segment was added, remove it.
                    edges.swap_remove(i);
                    matched = true;
                } else {
                    i += 1;
                }
            }
            if !matched {
                break;
            }
        }

        // Generate temp vertex array for triangulation.
        let hole_vertices: Vec<UVec4> = hole
            .iter()
            .map(|index| {
                let v = self.vertices[*index as usize];
                UVec4::new(v.x as u32, v.y as u32, v.z as u32, 0)
            })
            .collect();

        // Triangulate the hole.
        let (triangles, ok) = triangulate(&hole_vertices);
        if !ok {
            tracing::warn!("Removing vertex {remove}: triangulation returned bad results.");
        }

        // Build initial polygons.
        let mut polygons = Vec::with_capacity(triangles.len());
        let mut regions = Vec::with_capacity(triangles.len());
        let mut areas = Vec::with_capacity(triangles.len());
        for t in &triangles {
            if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                let mut polygon = vec![PolygonMesh::NO_INDEX; nvp];
                polygon[0] = hole[t[0]];
                polygon[1] = hole[t[1]];
                polygon[2] = hole[t[2]];
                polygons.push(polygon);
                // If this polygon covers multiple region types then mark it as such
                if hole_regions[t[0]] != hole_regions[t[1]] || hole_regions[t[1]] != hole_regions[t[2]] {
                    regions.push(RegionId::NONE);
                } else {
                    regions.push(hole_regions[t[0]]);
                }
                areas.push(hole_areas[t[0]]);
            }
        }
        if polygons.is_empty() {
            return;
        }

        // Merge polygons.
        if nvp > 3 {
            merge_polygons(&mut polygons, &self.vertices, |kept, removed| {
                if regions[kept] != regions[removed] {
                    regions[kept] = RegionId::NONE;
                }
                regions.swap_remove(removed);
                areas.swap_remove(removed);
            });
        }

        // Store polygons.
        for ((polygon, region), area) in polygons.iter().zip(regions).zip(areas) {
            self.push_polygon(polygon, region, area);
        }
    }

    fn build_adjacency(&mut self) {
        let nvp = self.vertices_per_polygon;
        // Edges keyed by their (smaller, larger) vertex pair: (polygon, edge) of each side.
        let mut edges: HashMap<(u16, u16), Vec<(usize, usize)>> = HashMap::new();
        for i in 0..self.polygon_count() {
            let polygon = self.polygon(i);
            let vertex_count = count_polygon_vertices(polygon);
            for j in 0..vertex_count {
                let v0 = polygon[j];
                let v1 = polygon[(j + 1) % vertex_count];
                edges.entry((v0.min(v1), v0.max(v1))).or_default().push((i, j));
            }
        }
        for sides in edges.values() {
            // Only edges shared by exactly two polygons are connections.
            if let [(p0, e0), (p1, e1)] = sides[..] {
                if p0 != p1 {
                    self.polygon_mut(p0)[nvp + e0] = p1 as u16;
                    self.polygon_mut(p1)[nvp + e1] = p0 as u16;
                }
            }
        }
    }

    fn mark_portal_edges(&mut self, width: u16, height: u16) {
        let nvp = self.vertices_per_polygon;
        for i in 0..self.polygon_count() {
            let vertex_count = self.polygon_vertex_count(i);
            for j in 0..vertex_count {
                // Skip connected edges.
                if self.neighbors(i)[j] != Self::NO_INDEX {
                    continue;
                }
                let polygon = self.polygon(i);
                let va = self.vertices[polygon[j] as usize];
                let vb = self.vertices[polygon[(j + 1) % vertex_count] as usize];
                let side = if va.x == 0 && vb.x == 0 {
                    Some(0)
                } else if va.z == height && vb.z == height {
                    Some(1)
                } else if va.x == width && vb.x == width {
                    Some(2)
                } else if va.z == 0 && vb.z == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    self.polygon_mut(i)[nvp + j] = Self::PORTAL_FLAG | side;
                }
            }
        }
    }
}

fn count_polygon_vertices(polygon: &[u16]) -> usize {
    polygon
        .iter()
        .position(|v| *v == PolygonMesh::NO_INDEX)
        .unwrap_or(polygon.len())
}

fn add_vertex(
    vertices: &mut Vec<U16Vec3>,
    lookup: &mut HashMap<(u16, u16), Vec<u16>>,
    vertex: &UVec4,
) -> u16 {
    let x = vertex.x as u16;
    let y = vertex.y as u16;
    let z = vertex.z as u16;
    let candidates = lookup.entry((x, z)).or_default();
    if let Some(index) = candidates
        .iter()
        .find(|i| vertices[**i as usize].y.abs_diff(y) <= 2)
    {
        return *index;
    }
    // Could not find, create new.
    let index = vertices.len() as u16;
    vertices.push(U16Vec3::new(x, y, z));
    candidates.push(index);
    index
}

/// Greedily merges pairs of polygons sharing an edge, longest shared edge first, while
/// the result stays convex and within the vertex limit.
///
/// `on_merge(kept, removed)` is called before `removed` is swap-removed from `polygons`.
fn merge_polygons(
    polygons: &mut Vec<Vec<u16>>,
    vertices: &[U16Vec3],
    mut on_merge: impl FnMut(usize, usize),
) {
    loop {
        // Find best polygons to merge.
        let mut best_merge_value = 0;
        let mut best = None;
        for j in 0..polygons.len().saturating_sub(1) {
            for k in j + 1..polygons.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polygons[j], &polygons[k], vertices) {
                    if value > best_merge_value {
                        best_merge_value = value;
                        best = Some((j, k, ea, eb));
                    }
                }
            }
        }
        let Some((pa, pb, ea, eb)) = best else {
            break;
        };
        // Found best, merge.
        polygons[pa] = merge_polygon_vertices(&polygons[pa], &polygons[pb], ea, eb);
        on_merge(pa, pb);
        polygons.swap_remove(pb);
    }
}

fn xz(v: U16Vec3) -> [i32; 2] {
    [v.x as i32, v.z as i32]
}

/// Returns the squared length of the shared edge and the edge indices in `pa` and `pb`
/// if the polygons can be merged into a convex polygon.
fn poly_merge_value(pa: &[u16], pb: &[u16], vertices: &[U16Vec3]) -> Option<(i32, usize, usize)> {
    let na = count_polygon_vertices(pa);
    let nb = count_polygon_vertices(pb);

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > pa.len() {
        return None;
    }

    // Check if the polygons share an edge.
    let mut shared = None;
    'outer: for i in 0..na {
        let (va0, va1) = (pa[i], pa[(i + 1) % na]);
        let (va0, va1) = (va0.min(va1), va0.max(va1));
        for j in 0..nb {
            let (vb0, vb1) = (pb[j], pb[(j + 1) % nb]);
            if va0 == vb0.min(vb1) && va1 == vb0.max(vb1) {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    // No common edge, cannot merge.
    let (ea, eb) = shared?;

    let vertex = |index: u16| xz(vertices[index as usize]);
    // Check to see if the merged polygon would be convex.
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !left(vertex(va), vertex(vb), vertex(vc)) {
        return None;
    }
    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !left(vertex(va), vertex(vb), vertex(vc)) {
        return None;
    }

    let [ax, az] = vertex(pa[ea]);
    let [bx, bz] = vertex(pa[(ea + 1) % na]);
    let dx = ax - bx;
    let dz = az - bz;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_polygon_vertices(pa: &[u16], pb: &[u16], ea: usize, eb: usize) -> Vec<u16> {
    let na = count_polygon_vertices(pa);
    let nb = count_polygon_vertices(pb);
    let mut merged = Vec::with_capacity(pa.len());
    // Add pa
    merged.extend((0..na - 1).map(|i| pa[(ea + 1 + i) % na]));
    // Add pb
    merged.extend((0..nb - 1).map(|i| pb[(eb + 1 + i) % nb]));
    merged.resize(pa.len(), PolygonMesh::NO_INDEX);
    merged
}

/// Ear-clips the polygon into triangles of vertex indices.
///
/// Returns `false` alongside the partial result if the polygon could not be fully triangulated,
/// which can happen if the contour simplification was too aggressive.
fn triangulate(vertices: &[UVec4]) -> (Vec<[usize; 3]>, bool) {
    if vertices.len() < 3 {
        return (Vec::new(), false);
    }
    let point = |index: usize| [vertices[index].x as i32, vertices[index].z as i32];
    // (vertex index, can be removed)
    let mut indices: Vec<(usize, bool)> = (0..vertices.len()).map(|i| (i, false)).collect();
    let mut triangles = Vec::with_capacity(vertices.len().saturating_sub(2));

    let n = indices.len();
    for i in 0..n {
        let i1 = (i + 1) % n;
        let i2 = (i1 + 1) % n;
        if diagonal(i, i2, &indices, &point, false) {
            indices[i1].1 = true;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let shortest = |loose: bool, indices: &[(usize, bool)]| {
            let mut min_len = None;
            let mut min_i = None;
            for i in 0..n {
                let i1 = (i + 1) % n;
                let i2 = (i1 + 1) % n;
                let usable = if loose {
                    diagonal(i, i2, indices, &point, true)
                } else {
                    indices[i1].1
                };
                if usable {
                    let [p0x, p0z] = point(indices[i].0);
                    let [p2x, p2z] = point(indices[i2].0);
                    let dx = p2x - p0x;
                    let dz = p2z - p0z;
                    let len = dx * dx + dz * dz;
                    if min_len.is_none_or(|min| len < min) {
                        min_len = Some(len);
                        min_i = Some(i);
                    }
                }
            }
            min_i
        };

        // We might get here because the contour has overlapping segments.
        // Try to recover by loosening up the in-cone test a bit so that a diagonal can be found.
        let Some(i) = shortest(false, &indices).or_else(|| shortest(true, &indices)) else {
            // The contour is messed up. This sometimes happens
            // if the contour simplification is too aggressive.
            return (triangles, false);
        };
        let mut i1 = (i + 1) % n;
        let i2 = (i1 + 1) % n;
        triangles.push([indices[i].0, indices[i1].0, indices[i2].0]);

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        indices.remove(i1);
        let n = indices.len();
        if i1 >= n {
            i1 = 0;
        }
        let i = (i1 + n - 1) % n;
        // Update diagonal flags.
        indices[i].1 = diagonal((i + n - 1) % n, i1, &indices, &point, false);
        indices[i1].1 = diagonal(i, (i1 + 1) % n, &indices, &point, false);
    }

    // Append the remaining triangle.
    triangles.push([indices[0].0, indices[1].0, indices[2].0]);
    (triangles, true)
}

/// Returns true iff `(i, j)` is a proper internal diagonal of the polygon.
fn diagonal(
    i: usize,
    j: usize,
    indices: &[(usize, bool)],
    point: &impl Fn(usize) -> [i32; 2],
    loose: bool,
) -> bool {
    in_cone(i, j, indices, point, loose) && diagonalie(i, j, indices, point, loose)
}

/// Returns true iff the diagonal `(i, j)` is strictly internal to the polygon in the neighborhood of the `i` endpoint.
fn in_cone(
    i: usize,
    j: usize,
    indices: &[(usize, bool)],
    point: &impl Fn(usize) -> [i32; 2],
    loose: bool,
) -> bool {
    let n = indices.len();
    let pi = point(indices[i].0);
    let pj = point(indices[j].0);
    let pi1 = point(indices[(i + 1) % n].0);
    let pin1 = point(indices[(i + n - 1) % n].0);

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return if loose {
            left_on(pi, pj, pin1) && left_on(pj, pi, pi1)
        } else {
            left(pi, pj, pin1) && left(pj, pi, pi1)
        };
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// Returns true iff `(i, j)` is a proper diagonal, ignoring edges incident to its endpoints.
fn diagonalie(
    i: usize,
    j: usize,
    indices: &[(usize, bool)],
    point: &impl Fn(usize) -> [i32; 2],
    loose: bool,
) -> bool {
    let n = indices.len();
    let d0 = point(indices[i].0);
    let d1 = point(indices[j].0);

    // For each edge (k,k+1) of P
    for k in 0..n {
        let k1 = (k + 1) % n;
        // Skip edges incident to i or j
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = point(indices[k].0);
        let p1 = point(indices[k1].0);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        let intersects = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if intersects {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use crate::contours::Contour;

    use super::*;

    fn contour_set(contours: Vec<Vec<(u32, u32, u32)>>, border_size: u16) -> ContourSet {
        ContourSet {
            contours: contours
                .into_iter()
                .enumerate()
                .map(|(i, vertices)| Contour {
                    vertices: vertices
                        .into_iter()
                        .map(|(x, z, w)| UVec4::new(x, 0, z, w))
                        .collect(),
                    raw_vertices: Vec::new(),
                    region: RegionId::from(i as u16 + 1),
                    area: AreaType::DEFAULT_WALKABLE,
                })
                .collect(),
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 10,
            height: 10,
            border_size,
            max_error: 1.3,
        }
    }

    #[test]
    fn square_becomes_single_polygon() {
        let set = contour_set(vec![vec![(0, 0, 0), (0, 10, 0), (10, 10, 0), (10, 0, 0)]], 0);
        let mesh = set.into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 1);
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.polygon_vertex_count(0), 4);
        assert!(mesh.neighbors(0).iter().all(|n| *n == PolygonMesh::NO_INDEX));
        assert_eq!(mesh.flags, vec![0]);
    }

    #[test]
    fn triangles_only_with_three_vertices_per_polygon() {
        let set = contour_set(vec![vec![(0, 0, 0), (0, 10, 0), (10, 10, 0), (10, 0, 0)]], 0);
        let mesh = set.into_polygon_mesh(3).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        // The two triangles share the diagonal.
        assert!(mesh.neighbors(0).contains(&1));
        assert!(mesh.neighbors(1).contains(&0));
    }

    #[test]
    fn concave_contour_is_split_into_convex_polygons() {
        // An L shape.
        let set = contour_set(
            vec![vec![
                (0, 0, 0),
                (0, 10, 0),
                (4, 10, 0),
                (4, 4, 0),
                (10, 4, 0),
                (10, 0, 0),
            ]],
            0,
        );
        let mesh = set.into_polygon_mesh(6).unwrap();
        assert!((2..=3).contains(&mesh.polygon_count()));
        for i in 0..mesh.polygon_count() {
            let polygon = &mesh.polygon(i)[..mesh.polygon_vertex_count(i)];
            let n = polygon.len();
            for j in 0..n {
                let a = xz(mesh.vertices[polygon[j] as usize]);
                let b = xz(mesh.vertices[polygon[(j + 1) % n] as usize]);
                let c = xz(mesh.vertices[polygon[(j + 2) % n] as usize]);
                assert!(left_on(a, b, c), "polygon {i} is not convex");
            }
        }
    }

    #[test]
    fn adjacent_contours_share_vertices_and_connect() {
        let set = contour_set(
            vec![
                vec![(0, 0, 2), (0, 10, 0), (5, 10, 0), (5, 0, 0)],
                vec![(5, 0, 1), (5, 10, 0), (10, 10, 0), (10, 0, 0)],
            ],
            0,
        );
        let mesh = set.into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.polygon_count(), 2);
        assert_eq!(mesh.vertices.len(), 6);
        assert!(mesh.neighbors(0).contains(&1));
        assert!(mesh.neighbors(1).contains(&0));
    }

    #[test]
    fn tile_border_edges_become_portals() {
        let set = contour_set(vec![vec![(0, 0, 0), (0, 10, 0), (10, 10, 0), (10, 0, 0)]], 2);
        let mesh = set.into_polygon_mesh(6).unwrap();
        let neighbors = mesh.neighbors(0);
        for side in 0..4 {
            assert!(neighbors.contains(&(PolygonMesh::PORTAL_FLAG | side)));
        }
    }

    #[test]
    fn border_vertex_on_straight_edge_is_removed() {
        let border = RegionVertexId::BORDER_VERTEX.bits();
        let set = contour_set(
            vec![vec![
                (0, 0, 0),
                (0, 5, border),
                (0, 10, 0),
                (10, 10, 0),
                (10, 0, 0),
            ]],
            0,
        );
        let mesh = set.into_polygon_mesh(6).unwrap();
        assert_eq!(mesh.vertices.len(), 4);
        assert!(!mesh.vertices.contains(&U16Vec3::new(0, 0, 5)));
        assert!((1..=2).contains(&mesh.polygon_count()));
        for i in 0..mesh.polygon_count() {
            let polygon = &mesh.polygon(i)[..mesh.polygon_vertex_count(i)];
            assert!(polygon.iter().all(|v| (*v as usize) < mesh.vertices.len()));
        }
    }

    #[test]
    fn too_few_vertices_per_polygon_is_an_error() {
        let set = contour_set(vec![], 0);
        assert!(matches!(
            set.into_polygon_mesh(2),
            Err(PolygonMeshError::InvalidVerticesPerPolygon(2))
        ));
    }
}
