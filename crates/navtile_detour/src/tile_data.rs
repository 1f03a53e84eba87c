//! The contents of one navigation mesh tile and its binary form.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use thiserror::Error;

/// The maximum number of vertices a tile polygon can have.
pub const MAX_VERTICES_PER_POLYGON: usize = 6;

/// Marks a polygon neighbour entry as an edge on the tile border.
/// The low bits hold the side of the tile the edge lies on.
pub const EXT_LINK: u16 = 0x8000;

/// The side value of links that stay inside their tile.
pub const INTERNAL_SIDE: u8 = 0xff;

/// Tile blobs start with these bytes.
pub const TILE_MAGIC: [u8; 4] = *b"NAVT";

/// The version written into tile blobs.
pub const TILE_VERSION: u32 = 1;

/// What a [`Poly`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum PolyType {
    /// A polygon of the walkable surface.
    #[default]
    Ground = 0,
    /// A two-vertex polygon standing for an off-mesh connection.
    OffMeshConnection = 1,
}

/// A polygon of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Poly {
    /// Indices into [`TileData::vertices`]. Only the first [`Poly::vertex_count`] are used.
    pub vertices: [u16; MAX_VERTICES_PER_POLYGON],
    /// Per edge: `0` for a wall, `index + 1` for a polygon in the same tile,
    /// or [`EXT_LINK`] combined with a side for an edge on the tile border.
    pub neighbors: [u16; MAX_VERTICES_PER_POLYGON],
    /// User flags, matched against query filters.
    pub flags: u16,
    /// Number of vertices in use.
    pub vertex_count: u8,
    /// Area id, used to look up traversal costs.
    pub area: u8,
    /// Whether this is ground or an off-mesh connection.
    pub poly_type: PolyType,
}

impl Poly {
    /// The vertex indices in use.
    #[inline]
    pub fn vertex_indices(&self) -> &[u16] {
        &self.vertices[..self.vertex_count as usize]
    }

    /// Returns `true` if the edge starting at vertex `edge` lies on the tile border.
    #[inline]
    pub fn is_border_edge(&self, edge: usize) -> bool {
        self.neighbors[edge] & EXT_LINK != 0
    }
}

/// The height detail of one polygon. The sub mesh repeats the polygon vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyDetail {
    /// First index into [`TileData::detail_vertices`].
    pub vertex_base: u32,
    /// Number of detail vertices.
    pub vertex_count: u32,
    /// First index into [`TileData::detail_triangles`].
    pub triangle_base: u32,
    /// Number of detail triangles.
    pub triangle_count: u32,
}

/// The end point of an off-mesh connection is connected in both directions.
pub const OFF_MESH_BIDIRECTIONAL: u8 = 0x1;

/// A shortcut between two points of the navigation mesh, e.g. a jump or a ladder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnection {
    /// Where the connection starts.
    pub start: Vec3,
    /// Where the connection ends.
    pub end: Vec3,
    /// How far from the mesh the end points may be to still get connected.
    pub radius: f32,
    /// Index of the polygon that stands for this connection.
    pub poly: u16,
    /// See [`OFF_MESH_BIDIRECTIONAL`].
    pub flags: u8,
    /// The neighbour tile the end point lies in, [`INTERNAL_SIDE`] if it is in this tile.
    pub side: u8,
    /// A user value carried along.
    pub user_id: u32,
}

impl OffMeshConnection {
    /// Returns `true` if the connection can be traversed from end to start as well.
    #[inline]
    pub fn is_bidirectional(&self) -> bool {
        self.flags & OFF_MESH_BIDIRECTIONAL != 0
    }
}

/// Where a tile sits and what agent it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileHeader {
    /// Tile column on the x-axis.
    pub x: i32,
    /// Tile column on the z-axis.
    pub z: i32,
    /// Layer within the column.
    pub layer: i32,
    /// A user value carried along.
    pub user_id: u32,
    /// Minimum corner of the tile bounds.
    pub bmin: Vec3,
    /// Maximum corner of the tile bounds.
    pub bmax: Vec3,
    /// The agent height the tile was built for.
    pub walkable_height: f32,
    /// The agent radius the tile was built for.
    pub walkable_radius: f32,
    /// The step height the tile was built for.
    pub walkable_climb: f32,
    /// Index of the first off-mesh connection polygon. All polygons before it are ground.
    pub off_mesh_base: u32,
}

/// Everything a tile stores.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileData {
    /// Placement and agent parameters.
    pub header: TileHeader,
    /// Polygon vertices in world space.
    pub vertices: Vec<Vec3>,
    /// Ground polygons followed by off-mesh connection polygons.
    pub polygons: Vec<Poly>,
    /// One entry per ground polygon.
    pub detail_meshes: Vec<PolyDetail>,
    /// Detail vertices in world space.
    pub detail_vertices: Vec<Vec3>,
    /// Detail triangles as indices relative to [`PolyDetail::vertex_base`], plus edge flags in the last byte.
    pub detail_triangles: Vec<[u8; 4]>,
    /// The off-mesh connections whose start lies in this tile.
    pub off_mesh_connections: Vec<OffMeshConnection>,
}

/// Errors from [`TileData::from_bytes`].
#[derive(Error, Debug)]
pub enum TileDataError {
    /// The blob ended early.
    #[error("Tile data is truncated: {0}")]
    Truncated(#[from] std::io::Error),
    /// The blob does not start with [`TILE_MAGIC`].
    #[error("Tile data has wrong magic {0:?}")]
    WrongMagic([u8; 4]),
    /// The blob was written by another version.
    #[error("Tile data has version {found}, expected {TILE_VERSION}")]
    WrongVersion {
        /// The version in the blob.
        found: u32,
    },
    /// The blob decodes but refers to data it does not contain.
    #[error("Tile data is inconsistent: {0}")]
    Inconsistent(&'static str),
    /// Bytes follow the tile.
    #[error("Tile data has {0} trailing bytes")]
    TrailingBytes(usize),
}

impl TileData {
    /// Iterates over the world space vertices of a polygon.
    pub fn poly_vertices<'a>(&'a self, poly: &'a Poly) -> impl Iterator<Item = Vec3> + 'a {
        poly.vertex_indices()
            .iter()
            .map(|&index| self.vertices[index as usize])
    }

    /// Fills `out` with the vertices of a polygon and returns how many were written.
    pub fn copy_poly_vertices(&self, poly: &Poly, out: &mut [Vec3; MAX_VERTICES_PER_POLYGON]) -> usize {
        for (slot, vertex) in out.iter_mut().zip(self.poly_vertices(poly)) {
            *slot = vertex;
        }
        poly.vertex_count as usize
    }

    /// Serializes the tile into the little-endian tile blob format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out)
            .unwrap_or_else(|_| unreachable!("writing to a Vec cannot fail"));
        out
    }

    fn write(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.extend_from_slice(&TILE_MAGIC);
        out.write_u32::<LittleEndian>(TILE_VERSION)?;

        let header = &self.header;
        out.write_i32::<LittleEndian>(header.x)?;
        out.write_i32::<LittleEndian>(header.z)?;
        out.write_i32::<LittleEndian>(header.layer)?;
        out.write_u32::<LittleEndian>(header.user_id)?;
        write_vec3(out, header.bmin)?;
        write_vec3(out, header.bmax)?;
        out.write_f32::<LittleEndian>(header.walkable_height)?;
        out.write_f32::<LittleEndian>(header.walkable_radius)?;
        out.write_f32::<LittleEndian>(header.walkable_climb)?;
        out.write_u32::<LittleEndian>(header.off_mesh_base)?;

        out.write_u32::<LittleEndian>(self.vertices.len() as u32)?;
        out.write_u32::<LittleEndian>(self.polygons.len() as u32)?;
        out.write_u32::<LittleEndian>(self.detail_meshes.len() as u32)?;
        out.write_u32::<LittleEndian>(self.detail_vertices.len() as u32)?;
        out.write_u32::<LittleEndian>(self.detail_triangles.len() as u32)?;
        out.write_u32::<LittleEndian>(self.off_mesh_connections.len() as u32)?;

        for vertex in &self.vertices {
            write_vec3(out, *vertex)?;
        }
        for poly in &self.polygons {
            for index in poly.vertices {
                out.write_u16::<LittleEndian>(index)?;
            }
            for neighbor in poly.neighbors {
                out.write_u16::<LittleEndian>(neighbor)?;
            }
            out.write_u16::<LittleEndian>(poly.flags)?;
            out.write_u8(poly.vertex_count)?;
            out.write_u8(poly.area)?;
            out.write_u8(poly.poly_type as u8)?;
        }
        for detail in &self.detail_meshes {
            out.write_u32::<LittleEndian>(detail.vertex_base)?;
            out.write_u32::<LittleEndian>(detail.vertex_count)?;
            out.write_u32::<LittleEndian>(detail.triangle_base)?;
            out.write_u32::<LittleEndian>(detail.triangle_count)?;
        }
        for vertex in &self.detail_vertices {
            write_vec3(out, *vertex)?;
        }
        for triangle in &self.detail_triangles {
            out.extend_from_slice(triangle);
        }
        for connection in &self.off_mesh_connections {
            write_vec3(out, connection.start)?;
            write_vec3(out, connection.end)?;
            out.write_f32::<LittleEndian>(connection.radius)?;
            out.write_u16::<LittleEndian>(connection.poly)?;
            out.write_u8(connection.flags)?;
            out.write_u8(connection.side)?;
            out.write_u32::<LittleEndian>(connection.user_id)?;
        }
        Ok(())
    }

    /// Parses a tile blob written by [`TileData::to_bytes`] and checks that every index it contains is in range.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TileDataError> {
        let mut cursor = Cursor::new(bytes);
        let mut magic = [0; 4];
        cursor.read_exact(&mut magic)?;
        if magic != TILE_MAGIC {
            return Err(TileDataError::WrongMagic(magic));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != TILE_VERSION {
            return Err(TileDataError::WrongVersion { found: version });
        }

        let header = TileHeader {
            x: cursor.read_i32::<LittleEndian>()?,
            z: cursor.read_i32::<LittleEndian>()?,
            layer: cursor.read_i32::<LittleEndian>()?,
            user_id: cursor.read_u32::<LittleEndian>()?,
            bmin: read_vec3(&mut cursor)?,
            bmax: read_vec3(&mut cursor)?,
            walkable_height: cursor.read_f32::<LittleEndian>()?,
            walkable_radius: cursor.read_f32::<LittleEndian>()?,
            walkable_climb: cursor.read_f32::<LittleEndian>()?,
            off_mesh_base: cursor.read_u32::<LittleEndian>()?,
        };

        let vertex_count = cursor.read_u32::<LittleEndian>()? as usize;
        let poly_count = cursor.read_u32::<LittleEndian>()? as usize;
        let detail_mesh_count = cursor.read_u32::<LittleEndian>()? as usize;
        let detail_vertex_count = cursor.read_u32::<LittleEndian>()? as usize;
        let detail_triangle_count = cursor.read_u32::<LittleEndian>()? as usize;
        let connection_count = cursor.read_u32::<LittleEndian>()? as usize;

        // Every element takes at least one byte, so larger counts cannot be honest.
        let remaining = bytes.len().saturating_sub(cursor.position() as usize);
        let total = vertex_count
            .saturating_add(poly_count)
            .saturating_add(detail_mesh_count)
            .saturating_add(detail_vertex_count)
            .saturating_add(detail_triangle_count)
            .saturating_add(connection_count);
        if total > remaining {
            return Err(TileDataError::Truncated(std::io::ErrorKind::UnexpectedEof.into()));
        }

        let vertices = (0..vertex_count)
            .map(|_| read_vec3(&mut cursor))
            .collect::<Result<Vec<_>, _>>()?;
        let mut polygons = Vec::with_capacity(poly_count);
        for _ in 0..poly_count {
            let mut poly = Poly::default();
            for index in &mut poly.vertices {
                *index = cursor.read_u16::<LittleEndian>()?;
            }
            for neighbor in &mut poly.neighbors {
                *neighbor = cursor.read_u16::<LittleEndian>()?;
            }
            poly.flags = cursor.read_u16::<LittleEndian>()?;
            poly.vertex_count = cursor.read_u8()?;
            poly.area = cursor.read_u8()?;
            poly.poly_type = match cursor.read_u8()? {
                0 => PolyType::Ground,
                1 => PolyType::OffMeshConnection,
                _ => return Err(TileDataError::Inconsistent("unknown polygon type")),
            };
            polygons.push(poly);
        }
        let mut detail_meshes = Vec::with_capacity(detail_mesh_count);
        for _ in 0..detail_mesh_count {
            detail_meshes.push(PolyDetail {
                vertex_base: cursor.read_u32::<LittleEndian>()?,
                vertex_count: cursor.read_u32::<LittleEndian>()?,
                triangle_base: cursor.read_u32::<LittleEndian>()?,
                triangle_count: cursor.read_u32::<LittleEndian>()?,
            });
        }
        let detail_vertices = (0..detail_vertex_count)
            .map(|_| read_vec3(&mut cursor))
            .collect::<Result<Vec<_>, _>>()?;
        let mut detail_triangles = Vec::with_capacity(detail_triangle_count);
        for _ in 0..detail_triangle_count {
            let mut triangle = [0; 4];
            cursor.read_exact(&mut triangle)?;
            detail_triangles.push(triangle);
        }
        let mut off_mesh_connections = Vec::with_capacity(connection_count);
        for _ in 0..connection_count {
            off_mesh_connections.push(OffMeshConnection {
                start: read_vec3(&mut cursor)?,
                end: read_vec3(&mut cursor)?,
                radius: cursor.read_f32::<LittleEndian>()?,
                poly: cursor.read_u16::<LittleEndian>()?,
                flags: cursor.read_u8()?,
                side: cursor.read_u8()?,
                user_id: cursor.read_u32::<LittleEndian>()?,
            });
        }

        let trailing = bytes.len() - cursor.position() as usize;
        if trailing != 0 {
            return Err(TileDataError::TrailingBytes(trailing));
        }

        let data = Self {
            header,
            vertices,
            polygons,
            detail_meshes,
            detail_vertices,
            detail_triangles,
            off_mesh_connections,
        };
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<(), TileDataError> {
        let poly_count = self.polygons.len();
        if self.header.off_mesh_base as usize > poly_count {
            return Err(TileDataError::Inconsistent("off-mesh base past the polygons"));
        }
        if self.detail_meshes.len() > self.header.off_mesh_base as usize {
            return Err(TileDataError::Inconsistent("more detail meshes than ground polygons"));
        }
        for poly in &self.polygons {
            if poly.vertex_count as usize > MAX_VERTICES_PER_POLYGON {
                return Err(TileDataError::Inconsistent("too many polygon vertices"));
            }
            if poly
                .vertex_indices()
                .iter()
                .any(|&index| index as usize >= self.vertices.len())
            {
                return Err(TileDataError::Inconsistent("polygon vertex out of range"));
            }
            for &neighbor in &poly.neighbors[..poly.vertex_count as usize] {
                if neighbor & EXT_LINK == 0 && neighbor as usize > poly_count {
                    return Err(TileDataError::Inconsistent("polygon neighbour out of range"));
                }
            }
        }
        for detail in &self.detail_meshes {
            let vertex_end = detail.vertex_base as usize + detail.vertex_count as usize;
            let triangle_end = detail.triangle_base as usize + detail.triangle_count as usize;
            if vertex_end > self.detail_vertices.len() || triangle_end > self.detail_triangles.len() {
                return Err(TileDataError::Inconsistent("detail mesh out of range"));
            }
            let triangles =
                &self.detail_triangles[detail.triangle_base as usize..triangle_end];
            if triangles
                .iter()
                .any(|t| t[..3].iter().any(|&i| i as u32 >= detail.vertex_count))
            {
                return Err(TileDataError::Inconsistent("detail triangle vertex out of range"));
            }
        }
        for connection in &self.off_mesh_connections {
            let poly = self
                .polygons
                .get(connection.poly as usize)
                .ok_or(TileDataError::Inconsistent("off-mesh polygon out of range"))?;
            if poly.poly_type != PolyType::OffMeshConnection || poly.vertex_count != 2 {
                return Err(TileDataError::Inconsistent("off-mesh connection without its polygon"));
            }
        }
        Ok(())
    }
}

fn write_vec3(out: &mut Vec<u8>, v: Vec3) -> std::io::Result<()> {
    out.write_f32::<LittleEndian>(v.x)?;
    out.write_f32::<LittleEndian>(v.y)?;
    out.write_f32::<LittleEndian>(v.z)
}

fn read_vec3(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec3> {
    Ok(Vec3::new(
        cursor.read_f32::<LittleEndian>()?,
        cursor.read_f32::<LittleEndian>()?,
        cursor.read_f32::<LittleEndian>()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_tile() -> TileData {
        let mut poly = Poly {
            vertex_count: 3,
            area: 63,
            flags: 1,
            ..Default::default()
        };
        poly.vertices[..3].copy_from_slice(&[0, 1, 2]);
        poly.neighbors[1] = EXT_LINK | 2;
        let mut connection_poly = Poly {
            vertex_count: 2,
            poly_type: PolyType::OffMeshConnection,
            ..Default::default()
        };
        connection_poly.vertices[..2].copy_from_slice(&[3, 4]);
        TileData {
            header: TileHeader {
                x: -1,
                z: 2,
                bmin: Vec3::new(-1.0, 0.0, 0.0),
                bmax: Vec3::new(0.0, 1.0, 1.0),
                walkable_climb: 0.9,
                off_mesh_base: 1,
                ..Default::default()
            },
            vertices: vec![
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(-0.5, 0.0, 0.5),
                Vec3::new(3.0, 0.0, 0.5),
            ],
            polygons: vec![poly, connection_poly],
            detail_meshes: vec![PolyDetail {
                vertex_base: 0,
                vertex_count: 3,
                triangle_base: 0,
                triangle_count: 1,
            }],
            detail_vertices: vec![
                Vec3::new(-1.0, 0.0, 0.0),
                Vec3::new(-1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            detail_triangles: vec![[0, 1, 2, 0]],
            off_mesh_connections: vec![OffMeshConnection {
                start: Vec3::new(-0.5, 0.0, 0.5),
                end: Vec3::new(3.0, 0.0, 0.5),
                radius: 0.5,
                poly: 1,
                flags: OFF_MESH_BIDIRECTIONAL,
                side: 0,
                user_id: 42,
            }],
        }
    }

    #[test]
    fn blob_starts_with_magic_and_version() {
        let bytes = triangle_tile().to_bytes();
        assert_eq!(&bytes[..4], b"NAVT");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn blob_decodes_to_same_tile() {
        let tile = triangle_tile();
        assert_eq!(TileData::from_bytes(&tile.to_bytes()).unwrap(), tile);
    }

    #[test]
    fn rejects_foreign_blobs() {
        let mut bytes = triangle_tile().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            TileData::from_bytes(&bytes),
            Err(TileDataError::WrongMagic(_))
        ));

        let mut bytes = triangle_tile().to_bytes();
        bytes[4] = 9;
        assert!(matches!(
            TileData::from_bytes(&bytes),
            Err(TileDataError::WrongVersion { found: 9 })
        ));
    }

    #[test]
    fn rejects_truncated_and_padded_blobs() {
        let bytes = triangle_tile().to_bytes();
        assert!(matches!(
            TileData::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TileDataError::Truncated(_))
        ));
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(
            TileData::from_bytes(&padded),
            Err(TileDataError::TrailingBytes(1))
        ));
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let mut tile = triangle_tile();
        tile.polygons[0].vertices[2] = 99;
        assert!(matches!(
            TileData::from_bytes(&tile.to_bytes()),
            Err(TileDataError::Inconsistent(_))
        ));
    }
}
