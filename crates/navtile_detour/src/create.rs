//! Converts the output of the voxel pipeline into [`TileData`].

use glam::Vec3;
use navtile_recast::{DETAIL_EDGE_BOUNDARY, DetailNavmesh, PolygonMesh};
use thiserror::Error;

use crate::tile_data::{
    EXT_LINK, INTERNAL_SIDE, MAX_VERTICES_PER_POLYGON, OFF_MESH_BIDIRECTIONAL, OffMeshConnection,
    Poly, PolyDetail, PolyType, TileData, TileHeader,
};

/// An off-mesh connection to bake into a tile, in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnectionParams {
    /// Where the connection starts.
    pub start: Vec3,
    /// Where the connection ends.
    pub end: Vec3,
    /// How far from the mesh the end points may be.
    pub radius: f32,
    /// Whether agents may also travel from end to start.
    pub bidirectional: bool,
    /// Area id of the connection polygon.
    pub area: u8,
    /// Flags of the connection polygon.
    pub flags: u16,
    /// A user value carried along.
    pub user_id: u32,
}

/// Everything [`create_tile_data`] needs.
#[derive(Debug, Clone, Copy)]
pub struct NavMeshCreateParams<'a> {
    /// The polygons of the tile.
    pub polygon_mesh: &'a PolygonMesh,
    /// The height detail. Without it every polygon is fanned into flat triangles.
    pub detail_mesh: Option<&'a DetailNavmesh>,
    /// Candidate off-mesh connections. Only those starting inside the tile are stored.
    pub off_mesh_connections: &'a [OffMeshConnectionParams],
    /// Agent height in world units.
    pub walkable_height: f32,
    /// Agent radius in world units.
    pub walkable_radius: f32,
    /// Agent step height in world units.
    pub walkable_climb: f32,
    /// Tile column on the x-axis.
    pub tile_x: i32,
    /// Tile column on the z-axis.
    pub tile_z: i32,
    /// Layer within the column.
    pub tile_layer: i32,
    /// A user value carried along.
    pub user_id: u32,
}

/// Errors from [`create_tile_data`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreateTileDataError {
    /// The polygon mesh allows more vertices per polygon than a tile can hold.
    #[error(
        "Polygon mesh has {0} vertices per polygon, tiles support at most {MAX_VERTICES_PER_POLYGON}"
    )]
    TooManyVerticesPerPolygon(usize),
    /// Too many vertices to address with 16 bits.
    #[error("Tile has {0} vertices, which is more than fits into 16-bit indices")]
    TooManyVertices(usize),
    /// The detail mesh belongs to another polygon mesh.
    #[error("Detail mesh has {detail} sub meshes, but the polygon mesh has {polygons} polygons")]
    DetailMeshMismatch {
        /// Sub meshes in the detail mesh.
        detail: usize,
        /// Polygons in the polygon mesh.
        polygons: usize,
    },
}

/// Builds the data of one tile. Returns `Ok(None)` if the polygon mesh is empty.
pub fn create_tile_data(
    params: &NavMeshCreateParams,
) -> Result<Option<TileData>, CreateTileDataError> {
    let mesh = params.polygon_mesh;
    let nvp = mesh.vertices_per_polygon;
    if nvp > MAX_VERTICES_PER_POLYGON {
        return Err(CreateTileDataError::TooManyVerticesPerPolygon(nvp));
    }
    let poly_count = mesh.polygon_count();
    if poly_count == 0 {
        return Ok(None);
    }
    if let Some(detail) = params.detail_mesh {
        if detail.meshes.len() != poly_count {
            return Err(CreateTileDataError::DetailMeshMismatch {
                detail: detail.meshes.len(),
                polygons: poly_count,
            });
        }
    }

    let origin = Vec3::from(mesh.aabb.min);
    let cell = Vec3::new(mesh.cell_size, mesh.cell_height, mesh.cell_size);
    let vertices: Vec<Vec3> = mesh
        .vertices
        .iter()
        .map(|v| origin + v.as_vec3() * cell)
        .collect();

    // Connections may only start within the climb height of the surface.
    let mut hmin = f32::MAX;
    let mut hmax = f32::MIN;
    for vertex in &vertices {
        hmin = hmin.min(vertex.y);
        hmax = hmax.max(vertex.y);
    }
    if let Some(detail) = params.detail_mesh {
        for vertex in &detail.vertices {
            hmin = hmin.min(vertex.y);
            hmax = hmax.max(vertex.y);
        }
    }
    hmin -= params.walkable_climb;
    hmax += params.walkable_climb;
    let mut bmin = origin;
    let mut bmax = Vec3::from(mesh.aabb.max);
    bmin.y = hmin;
    bmax.y = hmax;

    let stored_connections: Vec<(&OffMeshConnectionParams, u8)> = params
        .off_mesh_connections
        .iter()
        .filter(|connection| {
            classify_off_mesh_point(connection.start, bmin, bmax) == INTERNAL_SIDE
                && (bmin.y..=bmax.y).contains(&connection.start.y)
        })
        .map(|connection| (connection, classify_off_mesh_point(connection.end, bmin, bmax)))
        .collect();

    let total_vertices = vertices.len() + stored_connections.len() * 2;
    if total_vertices >= u16::MAX as usize {
        return Err(CreateTileDataError::TooManyVertices(total_vertices));
    }

    let mut data = TileData {
        header: TileHeader {
            x: params.tile_x,
            z: params.tile_z,
            layer: params.tile_layer,
            user_id: params.user_id,
            bmin: origin,
            bmax: Vec3::from(mesh.aabb.max),
            walkable_height: params.walkable_height,
            walkable_radius: params.walkable_radius,
            walkable_climb: params.walkable_climb,
            off_mesh_base: poly_count as u32,
        },
        vertices,
        ..Default::default()
    };

    for i in 0..poly_count {
        let source = mesh.polygon(i);
        let neighbors = mesh.neighbors(i);
        let mut poly = Poly {
            flags: mesh.flags[i],
            area: mesh.areas[i].0,
            poly_type: PolyType::Ground,
            ..Default::default()
        };
        for j in 0..nvp {
            if source[j] == PolygonMesh::NO_INDEX {
                break;
            }
            poly.vertices[j] = source[j];
            poly.neighbors[j] = convert_neighbor(neighbors[j]);
            poly.vertex_count += 1;
        }
        data.polygons.push(poly);
    }

    for (n, (connection, end_side)) in stored_connections.iter().enumerate() {
        let first_vertex = data.vertices.len() as u16;
        data.vertices.push(connection.start);
        data.vertices.push(connection.end);
        let poly_index = data.polygons.len() as u16;
        let mut poly = Poly {
            flags: connection.flags,
            area: connection.area,
            vertex_count: 2,
            poly_type: PolyType::OffMeshConnection,
            ..Default::default()
        };
        poly.vertices[0] = first_vertex;
        poly.vertices[1] = first_vertex + 1;
        data.polygons.push(poly);
        data.off_mesh_connections.push(OffMeshConnection {
            start: connection.start,
            end: connection.end,
            radius: connection.radius,
            poly: poly_index,
            flags: if connection.bidirectional {
                OFF_MESH_BIDIRECTIONAL
            } else {
                0
            },
            side: *end_side,
            user_id: connection.user_id,
        });
        debug_assert_eq!(poly_index as usize, poly_count + n);
    }

    match params.detail_mesh {
        Some(detail) => copy_detail(&mut data, detail),
        None => fan_detail(&mut data, poly_count),
    }

    Ok(Some(data))
}

/// Recast marks border edges with the portal direction 0 (-x), 1 (+z), 2 (+x), 3 (-z).
/// Tiles use the eight neighbour directions counted from +x, so those map to 4, 2, 0, 6.
fn convert_neighbor(neighbor: u16) -> u16 {
    if neighbor & PolygonMesh::PORTAL_FLAG != 0 {
        match neighbor & 0xf {
            0 => EXT_LINK | 4,
            1 => EXT_LINK | 2,
            2 => EXT_LINK,
            3 => EXT_LINK | 6,
            // Border without a neighbour tile, or no neighbour at all.
            _ => 0,
        }
    } else {
        neighbor + 1
    }
}

/// The neighbour direction of `point` relative to the tile bounds, [`INTERNAL_SIDE`] if it is inside on the xz-plane.
pub(crate) fn classify_off_mesh_point(point: Vec3, bmin: Vec3, bmax: Vec3) -> u8 {
    const XP: u8 = 1 << 0;
    const ZP: u8 = 1 << 1;
    const XM: u8 = 1 << 2;
    const ZM: u8 = 1 << 3;

    let mut outcode = 0;
    if point.x >= bmax.x {
        outcode |= XP;
    }
    if point.z >= bmax.z {
        outcode |= ZP;
    }
    if point.x < bmin.x {
        outcode |= XM;
    }
    if point.z < bmin.z {
        outcode |= ZM;
    }

    match outcode {
        XP => 0,
        o if o == XP | ZP => 1,
        ZP => 2,
        o if o == XM | ZP => 3,
        XM => 4,
        o if o == XM | ZM => 5,
        ZM => 6,
        o if o == XP | ZM => 7,
        _ => INTERNAL_SIDE,
    }
}

fn copy_detail(data: &mut TileData, detail: &DetailNavmesh) {
    for sub_mesh in &detail.meshes {
        data.detail_meshes.push(PolyDetail {
            vertex_base: data.detail_vertices.len() as u32,
            vertex_count: sub_mesh.vertex_count,
            triangle_base: data.detail_triangles.len() as u32,
            triangle_count: sub_mesh.triangle_count,
        });
        let vertices = sub_mesh.first_vertex_index as usize
            ..(sub_mesh.first_vertex_index + sub_mesh.vertex_count) as usize;
        data.detail_vertices
            .extend(detail.vertices[vertices].iter().map(|&v| Vec3::from(v)));
        let triangles = sub_mesh.first_triangle_index as usize
            ..(sub_mesh.first_triangle_index + sub_mesh.triangle_count) as usize;
        data.detail_triangles
            .extend_from_slice(&detail.triangles[triangles]);
    }
}

/// Triangulates every ground polygon as a fan around its first vertex.
fn fan_detail(data: &mut TileData, poly_count: usize) {
    for i in 0..poly_count {
        let poly = data.polygons[i];
        let n = poly.vertex_count as usize;
        data.detail_meshes.push(PolyDetail {
            vertex_base: data.detail_vertices.len() as u32,
            vertex_count: n as u32,
            triangle_base: data.detail_triangles.len() as u32,
            triangle_count: n.saturating_sub(2) as u32,
        });
        for &index in poly.vertex_indices() {
            data.detail_vertices.push(data.vertices[index as usize]);
        }
        for j in 2..n {
            let mut flags = DETAIL_EDGE_BOUNDARY << 2;
            if j == 2 {
                flags |= DETAIL_EDGE_BOUNDARY;
            }
            if j == n - 1 {
                flags |= DETAIL_EDGE_BOUNDARY << 4;
            }
            data.detail_triangles
                .push([0, (j - 1) as u8, j as u8, flags]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recast_portals_map_to_tile_sides() {
        assert_eq!(convert_neighbor(PolygonMesh::PORTAL_FLAG), EXT_LINK | 4);
        assert_eq!(convert_neighbor(PolygonMesh::PORTAL_FLAG | 1), EXT_LINK | 2);
        assert_eq!(convert_neighbor(PolygonMesh::PORTAL_FLAG | 2), EXT_LINK);
        assert_eq!(convert_neighbor(PolygonMesh::PORTAL_FLAG | 3), EXT_LINK | 6);
        assert_eq!(convert_neighbor(PolygonMesh::NO_INDEX), 0);
        assert_eq!(convert_neighbor(5), 6);
    }

    #[test]
    fn off_mesh_points_are_classified_by_neighbour() {
        let bmin = Vec3::ZERO;
        let bmax = Vec3::splat(10.0);
        assert_eq!(classify_off_mesh_point(Vec3::splat(5.0), bmin, bmax), INTERNAL_SIDE);
        assert_eq!(classify_off_mesh_point(Vec3::new(11.0, 0.0, 5.0), bmin, bmax), 0);
        assert_eq!(classify_off_mesh_point(Vec3::new(11.0, 0.0, 11.0), bmin, bmax), 1);
        assert_eq!(classify_off_mesh_point(Vec3::new(5.0, 0.0, 11.0), bmin, bmax), 2);
        assert_eq!(classify_off_mesh_point(Vec3::new(-1.0, 0.0, 5.0), bmin, bmax), 4);
        assert_eq!(classify_off_mesh_point(Vec3::new(-1.0, 0.0, -1.0), bmin, bmax), 5);
        assert_eq!(classify_off_mesh_point(Vec3::new(5.0, 0.0, -1.0), bmin, bmax), 6);
        assert_eq!(classify_off_mesh_point(Vec3::new(11.0, 0.0, -1.0), bmin, bmax), 7);
    }
}
