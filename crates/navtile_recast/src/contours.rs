use glam::UVec4;

use crate::{
    Aabb3d, AreaType, CompactHeightfield, RegionId,
    math::{distance_squared_point_segment_2d, intersect, left, left_on},
};

impl CompactHeightfield {
    /// Traces the outline of every region and simplifies it.
    ///
    /// Raw outlines follow the cell edges. Simplified outlines keep every vertex where the
    /// neighboring region changes, then add vertices until no raw vertex is farther than
    /// `max_error` away and, if `max_edge_len` is not zero, no border edge is longer than it.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let border_size = self.border_size;
        let mut contour_set = ContourSet {
            contours: Vec::with_capacity(self.max_region.bits().max(8) as usize),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width.saturating_sub(border_size * 2),
            height: self.height.saturating_sub(border_size * 2),
            border_size,
            max_error,
        };
        if border_size > 0 {
            // Contours live in tile space, without the border.
            let pad = border_size as f32 * self.cell_size;
            contour_set.aabb.min.x += pad;
            contour_set.aabb.min.z += pad;
            contour_set.aabb.max.x -= pad;
            contour_set.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // One bit per direction that leaves the region.
        for (x, z, i) in self.iter_spans() {
            let region = self.spans[i].region;
            if !region.is_walkable_region() {
                flags[i] = 0;
                continue;
            }
            let mut connected = 0;
            for dir in 0..4 {
                let neighbor_region = self
                    .neighbor(x, z, i, dir)
                    .map_or(RegionId::NONE, |(_, _, a_index)| self.spans[a_index].region);
                if neighbor_region == region {
                    connected |= 1 << dir;
                }
            }
            // Inverse, mark non connected edges.
            flags[i] = connected ^ 0xf;
        }

        let mut raw_vertices = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for z in 0..self.height {
            for x in 0..self.width {
                for i in self.cell_at(x, z).index_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if !region.is_walkable_region() {
                        continue;
                    }
                    let area = self.areas[i];

                    raw_vertices.clear();
                    simplified.clear();

                    self.walk_contour(x, z, i, &mut flags, &mut raw_vertices);
                    simplify_contour(
                        &raw_vertices,
                        &mut simplified,
                        max_error,
                        max_edge_len,
                        build_flags,
                    );
                    remove_degenerate_segments(&mut simplified);

                    // Create contour.
                    if simplified.len() >= 3 {
                        let remove_offset = |v: &UVec4| {
                            UVec4::new(
                                v.x - border_size as u32,
                                v.y,
                                v.z - border_size as u32,
                                v.w,
                            )
                        };
                        contour_set.contours.push(Contour {
                            vertices: simplified.iter().map(remove_offset).collect(),
                            raw_vertices: raw_vertices.iter().map(remove_offset).collect(),
                            region,
                            area,
                        });
                    }
                }
            }
        }

        // Merge holes if needed.
        if !contour_set.contours.is_empty() {
            contour_set.merge_holes(self.max_region);
        }

        contour_set
    }

    fn walk_contour(&self, mut x: u16, mut z: u16, mut i: usize, flags: &mut [u8], points: &mut Vec<UVec4>) {
        // Choose the first non-connected edge
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner
                let (p_y, is_border_vertex) = self.corner_height(x, z, i, dir);
                let (p_x, p_z) = match dir {
                    0 => (x, z + 1),
                    1 => (x + 1, z + 1),
                    2 => (x + 1, z),
                    _ => (x, z),
                };
                let mut r = RegionVertexId::NONE;
                if let Some((_, _, a_index)) = self.neighbor(x, z, i, dir) {
                    r = RegionVertexId::from(self.spans[a_index].region);
                    if area != self.areas[a_index] {
                        r |= RegionVertexId::AREA_BORDER;
                    }
                }
                if is_border_vertex {
                    r |= RegionVertexId::BORDER_VERTEX;
                }
                points.push(UVec4::new(p_x as u32, p_y as u32, p_z as u32, r.bits()));

                // Remove visited edges
                flags[i] &= !(1 << dir);
                // Rotate CW
                dir = (dir + 1) & 0x3;
            } else {
                let Some((n_x, n_z, n_i)) = self.neighbor(x, z, i, dir) else {
                    // Should not happen.
                    return;
                };
                x = n_x;
                z = n_z;
                i = n_i;
                // Rotate CCW
                dir = (dir + 3) & 0x3;
            }
            if start_i == i && start_dir == dir {
                break;
            }
        }
    }

    /// Returns the height of the corner of span `i` in direction `dir`, and whether the
    /// corner is a special edge vertex on a tile border that will be removed later.
    fn corner_height(&self, x: u16, z: u16, i: usize, dir: u8) -> (u16, bool) {
        let mut height = self.spans[i].y;
        let dir_p = (dir + 1) & 0x3;

        // Keys mix region and area so vertices between two areas are kept.
        let region_and_area =
            |i: usize| self.spans[i].region.bits() as u32 | ((self.areas[i].0 as u32) << 16);
        let mut regs = [0_u32; 4];
        regs[0] = region_and_area(i);

        if let Some((a_x, a_z, a_i)) = self.neighbor(x, z, i, dir) {
            height = height.max(self.spans[a_i].y);
            regs[1] = region_and_area(a_i);
            if let Some((_, _, b_i)) = self.neighbor(a_x, a_z, a_i, dir_p) {
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }
        if let Some((a_x, a_z, a_i)) = self.neighbor(x, z, i, dir_p) {
            height = height.max(self.spans[a_i].y);
            regs[3] = region_and_area(a_i);
            if let Some((_, _, b_i)) = self.neighbor(a_x, a_z, a_i, dir) {
                height = height.max(self.spans[b_i].y);
                regs[2] = region_and_area(b_i);
            }
        }

        // Corners on the tile border that only separate border regions go away later.
        let border = RegionId::BORDER_REGION.bits() as u32;
        let is_border_vertex = (0..4).any(|j| {
            let a = j;
            let b = (j + 1) & 0x3;
            let c = (j + 2) & 0x3;
            let d = (j + 3) & 0x3;

            // Two exterior cells followed by two interior cells, all inside the field.
            let two_same_exts = (regs[a] & regs[b] & border) != 0 && regs[a] == regs[b];
            let two_ints = ((regs[c] | regs[d]) & border) == 0;
            let ints_same_area = (regs[c] >> 16) == (regs[d] >> 16);
            let no_zeros = regs.iter().all(|r| *r != 0);
            two_same_exts && two_ints && ints_same_area && no_zeros
        });
        (height, is_border_vertex)
    }
}

/// Simplifies the raw contour `points` into `simplified`.
///
/// Simplified vertices carry the raw vertex index in `w` while simplifying,
/// which is replaced by the [`RegionVertexId`] of the edge at the end.
fn simplify_contour(
    points: &[UVec4],
    simplified: &mut Vec<UVec4>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) {
    let region_of = |p: &UVec4| RegionVertexId::from_bits_retain(p.w);
    let point_count = points.len();

    let has_connections = points
        .iter()
        .any(|p| region_of(p).intersects(RegionVertexId::REGION_MASK));
    if has_connections {
        // Keep every vertex where the neighbor changes.
        for (i, point) in points.iter().enumerate() {
            let next = &points[(i + 1) % point_count];
            let region = region_of(point);
            let next_region = region_of(next);
            let different_regs = (region & RegionVertexId::REGION_MASK)
                != (next_region & RegionVertexId::REGION_MASK);
            let area_borders = region.contains(RegionVertexId::AREA_BORDER)
                != next_region.contains(RegionVertexId::AREA_BORDER);
            if different_regs || area_borders {
                simplified.push(point.with_w(i as u32));
            }
        }
    }

    if simplified.is_empty() {
        // An island: start from its lower-left and upper-right corners.
        let mut lower_left = points[0].with_w(0);
        let mut upper_right = points[0].with_w(0);
        for (i, point) in points.iter().enumerate() {
            if point.x < lower_left.x || (point.x == lower_left.x && point.z < lower_left.z) {
                lower_left = point.with_w(i as u32);
            }
            if point.x > upper_right.x || (point.x == upper_right.x && point.z > upper_right.z) {
                upper_right = point.with_w(i as u32);
            }
        }
        simplified.push(lower_left);
        simplified.push(upper_right);
    }

    let as_xz = |p: &UVec4| glam::Vec3A::new(p.x as f32, 0.0, p.z as f32);

    // Refine until every raw vertex is within max_error.
    let mut i = 0;
    while i < simplified.len() {
        let next = (i + 1) % simplified.len();
        let mut a = simplified[i];
        let mut b = simplified[next];
        let a_index = a.w as usize;
        let b_index = b.w as usize;

        let mut max_deviation = 0.0;
        let mut max_index = None;

        // Walk in lexicographic order so both sides of a shared edge agree.
        let (increment, mut ci, end_index) = if b.x > a.x || (b.x == a.x && b.z > a.z) {
            (1, (a_index + 1) % point_count, b_index)
        } else {
            std::mem::swap(&mut a, &mut b);
            (point_count - 1, (b_index + point_count - 1) % point_count, a_index)
        };

        // Tessellate only outer edges or edges between areas.
        let region = region_of(&points[ci]);
        if !region.intersects(RegionVertexId::REGION_MASK)
            || region.contains(RegionVertexId::AREA_BORDER)
        {
            while ci != end_index {
                let deviation =
                    distance_squared_point_segment_2d(as_xz(&points[ci]), as_xz(&a), as_xz(&b));
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_index = Some(ci);
                }
                ci = (ci + increment) % point_count;
            }
        }

        // Split at the farthest raw vertex if it is too far off.
        match max_index {
            Some(max_index) if max_deviation > max_error * max_error => {
                simplified.insert(i + 1, points[max_index].with_w(max_index as u32));
            }
            _ => i += 1,
        }
    }

    // Cap edge length.
    let tessellate_walls = build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES);
    let tessellate_areas = build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES);
    if max_edge_len > 0 && (tessellate_walls || tessellate_areas) {
        let max_edge_len = max_edge_len as i64;
        let mut i = 0;
        while i < simplified.len() {
            let next = (i + 1) % simplified.len();
            let a = simplified[i];
            let b = simplified[next];
            let a_index = a.w as usize;
            let b_index = b.w as usize;

            let mut max_index = None;
            let ci = (a_index + 1) % point_count;

            // Tessellate only outer edges or edges between areas.
            let region = region_of(&points[ci]);
            let tessellate = (tessellate_walls
                && !region.intersects(RegionVertexId::REGION_MASK))
                || (tessellate_areas && region.contains(RegionVertexId::AREA_BORDER));

            if tessellate {
                let dx = b.x as i64 - a.x as i64;
                let dz = b.z as i64 - a.z as i64;
                if dx * dx + dz * dz > max_edge_len * max_edge_len {
                    // Pick the midpoint the same way from both sides of a shared edge.
                    let n = if b_index < a_index {
                        b_index + point_count - a_index
                    } else {
                        b_index - a_index
                    };
                    if n > 1 {
                        max_index = Some(if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (a_index + n / 2) % point_count
                        } else {
                            (a_index + (n + 1) / 2) % point_count
                        });
                    }
                }
            }


            match max_index {
                Some(max_index) => {
                    simplified.insert(i + 1, points[max_index].with_w(max_index as u32));
                }
                None => i += 1,
            }
        }
    }

    for vertex in simplified.iter_mut() {
        // Border flag of this raw vertex, neighbor of the next one.
        let next = region_of(&points[(vertex.w as usize + 1) % point_count]);
        let current = region_of(&points[vertex.w as usize]);
        let flags = (next & (RegionVertexId::REGION_MASK | RegionVertexId::AREA_BORDER))
            | (current & RegionVertexId::BORDER_VERTEX);
        vertex.w = flags.bits();
    }
}

/// Drops consecutive vertices that coincide on the xz-plane.
fn remove_degenerate_segments(simplified: &mut Vec<UVec4>) {
    let mut i = 0;
    while i < simplified.len() {
        let next = (i + 1) % simplified.len();
        if simplified[i].x == simplified[next].x && simplified[i].z == simplified[next].z {
            simplified.remove(i);
        }
        i += 1;
    }
}

fn xz(v: &UVec4) -> [i32; 2] {
    [v.x as i32, v.z as i32]
}

/// Twice the signed area of the contour on the xz-plane.
fn signed_area_2d(vertices: &[UVec4]) -> i64 {
    let mut area = 0_i64;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = &vertices[i];
        let vj = &vertices[j];
        area += vi.x as i64 * vj.z as i64 - vj.x as i64 * vi.z as i64;
        j = i;
    }
    (area + 1) / 2
}

/// Returns `true` if `point` lies in the cone spanned by vertex `i` and its neighbors.
fn in_cone(i: usize, vertices: &[UVec4], point: [i32; 2]) -> bool {
    let n = vertices.len();
    let pi = xz(&vertices[i]);
    let pi1 = xz(&vertices[(i + 1) % n]);
    let pin1 = xz(&vertices[(i + n - 1) % n]);

    // Convex corner.
    if left_on(pin1, pi, pi1) {
        return left(pi, point, pin1) && left(point, pi, pi1);
    }
    // Reflex corner.
    !(left_on(pi, point, pi1) && left_on(point, pi, pin1))
}

fn intersect_segment_contour(d0: [i32; 2], d1: [i32; 2], skip: Option<usize>, vertices: &[UVec4]) -> bool {
    let n = vertices.len();
    for k in 0..n {
        let k1 = (k + 1) % n;
        if skip == Some(k) || skip == Some(k1) {
            continue;
        }
        let p0 = xz(&vertices[k]);
        let p1 = xz(&vertices[k1]);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

/// Finds the vertex with the smallest x, then smallest z.
fn find_left_most_vertex(vertices: &[UVec4]) -> (u32, u32, usize) {
    let mut min_x = vertices[0].x;
    let mut min_z = vertices[0].z;
    let mut left_most = 0;
    for (i, v) in vertices.iter().enumerate().skip(1) {
        if v.x < min_x || (v.x == min_x && v.z < min_z) {
            min_x = v.x;
            min_z = v.z;
            left_most = i;
        }
    }
    (min_x, min_z, left_most)
}

/// Splices contour `b` into contour `a` at the diagonal between `a[ia]` and `b[ib]`.
fn merge_contours(a: &[UVec4], b: &[UVec4], ia: usize, ib: usize) -> Vec<UVec4> {
    let mut vertices = Vec::with_capacity(a.len() + b.len() + 2);
    for i in 0..=a.len() {
        vertices.push(a[(ia + i) % a.len()]);
    }
    for i in 0..=b.len() {
        vertices.push(b[(ib + i) % b.len()]);
    }
    vertices
}

impl ContourSet {
    fn merge_holes(&mut self, max_region: RegionId) {
        let windings: Vec<bool> = self
            .contours
            .iter()
            .map(|contour| signed_area_2d(&contour.vertices) >= 0)
            .collect();
        if windings.iter().all(|outline| *outline) {
            return;
        }

        // Each region has one outline and any number of holes.
        let region_count = max_region.bits() as usize + 1;
        let mut outlines: Vec<Option<usize>> = vec![None; region_count];
        let mut holes: Vec<Vec<usize>> = vec![Vec::new(); region_count];
        for (i, contour) in self.contours.iter().enumerate() {
            let region = contour.region.bits() as usize;
            if region >= region_count {
                continue;
            }
            // Outlines have positive area, holes negative.
            if windings[i] {
                if outlines[region].is_some() {
                    tracing::error!("Multiple outlines for region {region}.");
                }
                outlines[region] = Some(i);
            } else {
                holes[region].push(i);
            }
        }

        for (region, hole_indices) in holes.into_iter().enumerate() {
            if hole_indices.is_empty() {
                continue;
            }
            let Some(outline) = outlines[region] else {
                // Over-simplified outlines can self-overlap and lose their winding.
                tracing::error!(
                    "Bad outline for region {region}, contour simplification is likely too aggressive."
                );
                continue;
            };
            self.merge_region_holes(outline, hole_indices);
        }
    }

    fn merge_region_holes(&mut self, outline: usize, hole_indices: Vec<usize>) {
        let mut holes: Vec<(u32, u32, usize, usize)> = hole_indices
            .into_iter()
            .map(|hole| {
                let (min_x, min_z, left_most) = find_left_most_vertex(&self.contours[hole].vertices);
                (min_x, min_z, left_most, hole)
            })
            .collect();
        holes.sort_by_key(|(min_x, min_z, _, _)| (*min_x, *min_z));

        // Splice holes in from left to right.
        for i in 0..holes.len() {
            let (_, _, left_most, hole) = holes[i];
            let hole_vertices = self.contours[hole].vertices.clone();
            let outline_vertices = &self.contours[outline].vertices;

            let mut index = None;
            let mut best_vertex = left_most;
            for _ in 0..hole_vertices.len() {
                // Candidates must lie in the cone of an outline corner.
                let corner = xz(&hole_vertices[best_vertex]);
                let mut diagonals: Vec<(usize, i32)> = (0..outline_vertices.len())
                    .filter(|j| in_cone(*j, outline_vertices, corner))
                    .map(|j| {
                        let dx = outline_vertices[j].x as i32 - corner[0];
                        let dz = outline_vertices[j].z as i32 - corner[1];
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                // Shortest first.
                diagonals.sort_by_key(|(_, distance)| *distance);

                index = diagonals.iter().map(|(j, _)| *j).find(|j| {
                    let point = xz(&outline_vertices[*j]);
                    let intersects_outline =
                        intersect_segment_contour(point, corner, Some(*j), outline_vertices);
                    let intersects_holes = holes[i..].iter().any(|(_, _, _, other)| {
                        intersect_segment_contour(point, corner, None, &self.contours[*other].vertices)
                    });
                    !intersects_outline && !intersects_holes
                });
                if index.is_some() {
                    break;
                }
                best_vertex = (best_vertex + 1) % hole_vertices.len();
            }

            let Some(index) = index else {
                tracing::warn!(
                    "Failed to find merge points for contours {outline} and {hole} of region {}.",
                    self.contours[outline].region.bits()
                );
                continue;
            };
            let merged = merge_contours(
                &self.contours[outline].vertices,
                &hole_vertices,
                index,
                best_vertex,
            );
            self.contours[outline].vertices = merged;
            self.contours[hole].vertices.clear();
        }
        self.contours.retain(|contour| !contour.vertices.is_empty());
    }
}

/// Region outlines of one field, in voxel coordinates.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ContourSet {
    /// One contour per region outline.
    pub contours: Vec<Contour>,
    /// World bounds without the border.
    pub aabb: Aabb3d,
    /// Column edge length.
    pub cell_size: f32,
    /// Voxel height.
    pub cell_height: f32,
    /// Columns along x, without the border.
    pub width: u16,
    /// Columns along z, without the border.
    pub height: u16,
    /// Border cells that were cut off.
    pub border_size: u16,
    /// Simplification error used.
    pub max_error: f32,
}

bitflags::bitflags! {
    /// The region id and flags stored in the `w` component of a contour vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionVertexId: u32 {
        /// No neighboring region.
        const NONE = 0;

        /// Bits holding the neighbor region.
        const REGION_MASK = 0xffff;

        /// The vertex sits on the tile border and is dropped when polygons are built,
        /// so neighboring tiles end up with matching edges.
        const BORDER_VERTEX = 0x10_000;

        /// The edge separates two areas.
        const AREA_BORDER = 0x20_000;

        const _ = !0;
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.bits() as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id.bits() & RegionVertexId::REGION_MASK.bits();
        RegionId::from_bits_retain(bits as u16)
    }
}

/// A simple polygon around one region.
///
/// Vertices are `(x, y, z, flags)`, where `flags` holds a [`RegionVertexId`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    /// Simplified outline.
    pub vertices: Vec<UVec4>,
    /// Outline along the cell edges.
    pub raw_vertices: Vec<UVec4>,
    /// Region inside the outline.
    pub region: RegionId,
    /// Area of the region.
    pub area: AreaType,
}

bitflags::bitflags! {
    /// Options of [`CompactHeightfield::build_contours`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct BuildContoursFlags: u8 {
        /// Apply the edge length limit to walls.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Apply the edge length limit to area borders.
        const TESSELLATE_AREA_EDGES = 2;

        /// Walls only.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{Heightfield, TriMesh};

    use super::*;

    fn compact_regions(width: f32, depth: f32) -> CompactHeightfield {
        let mut heightfield = Heightfield::new(
            Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(width, 4.0, depth)),
            1.0,
            1.0,
        )
        .unwrap();
        let trimesh = TriMesh {
            vertices: vec![
                Vec3A::new(0.0, 1.0, 0.0),
                Vec3A::new(0.0, 1.0, depth),
                Vec3A::new(width, 1.0, depth),
                Vec3A::new(width, 1.0, 0.0),
            ],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(0, 2, 3)],
            area_types: vec![AreaType::DEFAULT_WALKABLE; 2],
        };
        heightfield.rasterize_triangles(&trimesh, 1).unwrap();
        let mut compact = heightfield.into_compact(2, 1).unwrap();
        compact.build_regions_monotone(0, 1, 20).unwrap();
        compact
    }

    #[test]
    fn rectangle_contour_is_its_four_corners() {
        let compact = compact_regions(6.0, 4.0);
        let contours = compact.build_contours(1.3, 0, BuildContoursFlags::default());
        assert_eq!(contours.contours.len(), 1);
        let contour = &contours.contours[0];
        assert_eq!(contour.region, RegionId::from(1));
        assert_eq!(contour.vertices.len(), 4);
        let mut corners: Vec<(u32, u32)> = contour.vertices.iter().map(|v| (v.x, v.z)).collect();
        corners.sort();
        assert_eq!(corners, vec![(0, 0), (0, 4), (6, 0), (6, 4)]);
        assert!(contour.raw_vertices.len() >= contour.vertices.len());
        // Outlines wind so that their signed area is positive.
        assert!(signed_area_2d(&contour.vertices) > 0);
    }

    #[test]
    fn long_edges_get_split() {
        let compact = compact_regions(12.0, 2.0);
        let contours = compact.build_contours(1.3, 4, BuildContoursFlags::default());
        assert_eq!(contours.contours.len(), 1);
        let vertices = &contours.contours[0].vertices;
        assert!(vertices.len() > 4);
        for (i, a) in vertices.iter().enumerate() {
            let b = vertices[(i + 1) % vertices.len()];
            let dx = a.x as i32 - b.x as i32;
            let dz = a.z as i32 - b.z as i32;
            assert!(dx * dx + dz * dz <= 16, "edge {a} -> {b} is too long");
        }
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut vertices = vec![
            UVec4::new(0, 0, 0, 0),
            UVec4::new(0, 3, 0, 0),
            UVec4::new(4, 0, 0, 0),
            UVec4::new(4, 0, 4, 0),
        ];
        remove_degenerate_segments(&mut vertices);
        assert_eq!(vertices.len(), 3);
    }

    #[test]
    fn hole_is_merged_into_outline() {
        let outline = vec![
            UVec4::new(0, 0, 0, 0),
            UVec4::new(0, 0, 10, 0),
            UVec4::new(10, 0, 10, 0),
            UVec4::new(10, 0, 0, 0),
        ];
        let hole = vec![
            UVec4::new(4, 0, 4, 0),
            UVec4::new(6, 0, 4, 0),
            UVec4::new(6, 0, 6, 0),
            UVec4::new(4, 0, 6, 0),
        ];
        assert!(signed_area_2d(&outline) > 0);
        assert!(signed_area_2d(&hole) < 0);
        let mut set = ContourSet {
            contours: vec![
                Contour {
                    vertices: outline,
                    region: RegionId::from(1),
                    ..Default::default()
                },
                Contour {
                    vertices: hole,
                    region: RegionId::from(1),
                    ..Default::default()
                },
            ],
            aabb: Aabb3d::default(),
            cell_size: 1.0,
            cell_height: 1.0,
            width: 10,
            height: 10,
            border_size: 0,
            max_error: 1.3,
        };
        set.merge_holes(RegionId::from(1));
        assert_eq!(set.contours.len(), 1);
        assert_eq!(set.contours[0].vertices.len(), 10);
    }
}
