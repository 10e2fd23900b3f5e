//! Plain-text geometry files.
//!
//! A geometry asset is a pair of files. The vertex file holds one vertex per
//! line, either `x y` or `x y u v`. The index file holds whitespace-separated
//! `u32` indices forming a triangle list. Blank lines and lines starting with
//! `#` are ignored.

use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Vertex as consumed by the shape pipelines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Vertex {
    /// Model-space position in `[-1, 1]`
    pub position: [f32; 2],
    /// Texture coordinates
    pub uv: [f32; 2],
}

impl Vertex {
    #[inline]
    pub const fn new(position: [f32; 2], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }
}

/// CPU-side geometry ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl GeometryData {
    /// Build geometry from parts, validating the index list.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self> {
        if vertices.is_empty() {
            return Err(Error::InvalidData("geometry has no vertices".to_string()));
        }
        if indices.is_empty() || indices.len() % 3 != 0 {
            return Err(Error::InvalidData(format!(
                "index count {} is not a non-zero multiple of 3",
                indices.len()
            )));
        }
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(Error::InvalidData(format!(
                "index {bad} out of range for {} vertices",
                vertices.len()
            )));
        }
        Ok(Self { vertices, indices })
    }

    /// Load a vertex file and an index file.
    pub fn load(vertex_path: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<Self> {
        let vertex_path = vertex_path.as_ref();
        let index_path = index_path.as_ref();

        let vertex_src = read_text(vertex_path)?;
        let index_src = read_text(index_path)?;

        let vertices = parse_vertices(&vertex_src, &vertex_path.display().to_string())?;
        let indices = parse_indices(&index_src, &index_path.display().to_string())?;

        Self::new(vertices, indices)
    }

    /// Axis-aligned quad spanning `[-1, 1]` with counter-clockwise triangles.
    pub fn unit_quad() -> Self {
        Self {
            vertices: vec![
                Vertex::new([-1.0, -1.0], [0.0, 0.0]),
                Vertex::new([-1.0, 1.0], [0.0, 1.0]),
                Vertex::new([1.0, 1.0], [1.0, 1.0]),
                Vertex::new([1.0, -1.0], [1.0, 0.0]),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// Number of indices, as passed to an indexed draw.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Vertex data as bytes.
    #[inline]
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as bytes.
    #[inline]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        source,
    })
}

fn records(src: &str) -> impl Iterator<Item = (usize, &str)> {
    src.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parse the contents of a vertex file.
pub fn parse_vertices(src: &str, origin: &str) -> Result<Vec<Vertex>> {
    let mut vertices = Vec::new();
    let mut arity = None;

    for (line_no, line) in records(src) {
        let values = line
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<f32>()
                    .map_err(|e| Error::parse(origin, line_no, format!("`{token}`: {e}")))
            })
            .collect::<Result<Vec<f32>>>()?;

        let expected = *arity.get_or_insert(values.len());
        if expected != values.len() {
            return Err(Error::parse(
                origin,
                line_no,
                format!("expected {expected} values, found {}", values.len()),
            ));
        }

        let vertex = match values.as_slice() {
            &[x, y] => Vertex::new([x, y], [0.0, 0.0]),
            &[x, y, u, v] => Vertex::new([x, y], [u, v]),
            other => {
                return Err(Error::parse(
                    origin,
                    line_no,
                    format!("a vertex has 2 or 4 values, found {}", other.len()),
                ));
            }
        };
        vertices.push(vertex);
    }

    Ok(vertices)
}

/// Parse the contents of an index file.
pub fn parse_indices(src: &str, origin: &str) -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    for (line_no, line) in records(src) {
        for token in line.split_whitespace() {
            let index = token
                .parse::<u32>()
                .map_err(|e| Error::parse(origin, line_no, format!("`{token}`: {e}")))?;
            indices.push(index);
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn quad_fixture_loads() {
        let geometry = GeometryData::load(fixture("quad.vertex"), fixture("quad.index")).unwrap();
        assert_eq!(geometry.index_count(), 6);
        assert_eq!(geometry.vertices.len(), 4);
        assert_eq!(
            geometry.vertex_bytes().len(),
            4 * std::mem::size_of::<Vertex>()
        );
        assert_eq!(geometry.index_bytes().len(), 6 * 4);
    }

    #[test]
    fn fixture_matches_builtin_quad() {
        let geometry = GeometryData::load(fixture("quad.vertex"), fixture("quad.index")).unwrap();
        assert_eq!(geometry, GeometryData::unit_quad());
    }

    #[test]
    fn position_only_vertices() {
        let vertices = parse_vertices("0 1\n# comment\n\n2.5 -3\n", "mem").unwrap();
        assert_eq!(
            vertices,
            vec![
                Vertex::new([0.0, 1.0], [0.0, 0.0]),
                Vertex::new([2.5, -3.0], [0.0, 0.0]),
            ]
        );
    }

    #[test]
    fn mixed_arity_is_rejected() {
        let err = parse_vertices("0 0 0 0\n1 1\n", "mixed.vertex").unwrap_err();
        match err {
            Error::Parse { line, origin, .. } => {
                assert_eq!(line, 2);
                assert_eq!(origin, "mixed.vertex");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn three_values_is_rejected() {
        assert!(parse_vertices("1 2 3\n", "mem").is_err());
    }

    #[test]
    fn bad_index_token() {
        let err = parse_indices("0 1 2\n0 x 3\n", "bad.index").unwrap_err();
        assert!(err.to_string().starts_with("bad.index:2:"));
    }

    #[test]
    fn indices_out_of_range() {
        let vertices = vec![Vertex::default(); 3];
        assert!(GeometryData::new(vertices.clone(), vec![0, 1, 2]).is_ok());
        assert!(GeometryData::new(vertices.clone(), vec![0, 1, 3]).is_err());
        assert!(GeometryData::new(vertices, vec![0, 1]).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = GeometryData::load(fixture("missing.vertex"), fixture("quad.index")).unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }
}
