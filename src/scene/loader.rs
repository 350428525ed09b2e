use std::path::Path;

use gltf::mesh::util::ReadIndices;
use log::{debug, info};

use crate::error::{RenderError, RenderResult};
use crate::geometry::Mesh;

/// Loads a single-shape mesh, picking the parser from the file extension.
pub fn load_mesh(path: impl AsRef<Path>) -> RenderResult<Mesh> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mesh = match ext.as_deref() {
        Some("obj") => load_obj(path)?,
        Some("gltf") | Some("glb") => load_gltf(path)?,
        _ => {
            return Err(RenderError::scene(format!(
                "unsupported mesh format: {}",
                path.display()
            )));
        }
    };

    info!(
        "Loaded {}: {} vertices, {} triangles",
        path.display(),
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}

pub fn load_obj(path: &Path) -> RenderResult<Mesh> {
    // Position indices are used as-is, so vertices are not re-indexed.
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: false,
            triangulate: true,
            ignore_points: true,
            ignore_lines: true,
            ..Default::default()
        },
    )
    .map_err(|e| RenderError::scene(format!("failed to parse {}: {e}", path.display())))?;

    if models.len() != 1 {
        return Err(RenderError::scene(format!(
            "{} contains {} shapes, exactly 1 is supported",
            path.display(),
            models.len()
        )));
    }

    let mesh = &models[0].mesh;
    debug!(
        "OBJ shape '{}': {} floats, {} indices",
        models[0].name,
        mesh.positions.len(),
        mesh.indices.len()
    );
    Mesh::from_flat(&mesh.positions, mesh.indices.clone())
}

pub fn load_gltf(path: &Path) -> RenderResult<Mesh> {
    let (document, buffers, _images) = gltf::import(path)
        .map_err(|e| RenderError::scene(format!("failed to parse {}: {e}", path.display())))?;

    let primitives: Vec<_> = document
        .meshes()
        .flat_map(|mesh| mesh.primitives())
        .collect();
    if primitives.len() != 1 {
        return Err(RenderError::scene(format!(
            "{} contains {} primitives, exactly 1 is supported",
            path.display(),
            primitives.len()
        )));
    }

    let primitive = &primitives[0];
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        return Err(RenderError::scene(format!(
            "primitive mode {:?} is not a triangle list",
            primitive.mode()
        )));
    }

    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .map(|iter| iter.collect())
        .unwrap_or_default();

    let indices: Vec<u32> = match reader.read_indices() {
        Some(ReadIndices::U8(iter)) => iter.map(|x| x as u32).collect(),
        Some(ReadIndices::U16(iter)) => iter.map(|x| x as u32).collect(),
        Some(ReadIndices::U32(iter)) => iter.collect(),
        // Non-indexed: sequential triangle list
        None => (0..positions.len() as u32).collect(),
    };

    Mesh::new(positions, indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_obj(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_single_shape_obj() {
        let file = write_obj(
            "o quad\n\
             v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\n\
             f 1 2 3 4\n",
        );
        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        // The quad is triangulated.
        assert_eq!(mesh.triangle_count(), 2);
        assert!(mesh.indices().iter().all(|&i| i < 4));
    }

    #[test]
    fn rejects_multiple_shapes() {
        let file = write_obj(
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\n\
             o first\nf 1 2 3\n\
             o second\nf 2 4 3\n",
        );
        let err = load_mesh(file.path()).unwrap_err();
        assert!(matches!(err, RenderError::InvalidScene(_)));
    }

    #[test]
    fn rejects_shape_without_faces() {
        let file = write_obj("o empty\nv 0 0 0\nv 1 0 0\nv 0 1 0\n");
        assert!(load_mesh(file.path()).is_err());
    }

    #[test]
    fn rejects_unknown_extension() {
        let err = load_mesh("scene.ply").unwrap_err();
        assert!(matches!(err, RenderError::InvalidScene(_)));
    }
}
