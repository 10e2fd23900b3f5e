//! GPU-resident geometry and textures, addressed by integer handles.
//!
//! Vertex and index sets are uploaded once to device-local memory through a
//! staging copy. Textures are uploaded the same way, transitioned to
//! `SHADER_READ_ONLY_OPTIMAL` and given a descriptor set of the texture group.

use crate::error::{RenderError, Result};
use ash::vk;
use parking_lot::Mutex;
use sprig_core::GeometryData;
use sprig_gpu::{
    DescriptorGroupId, DescriptorRegistry, DeviceContext, Diagnostics, GpuAllocator, GpuBuffer,
    GpuImage, LayoutTransition, MemoryLocation,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Name of the built-in unit quad geometry.
pub const UNIT_QUAD: &str = "unit_quad";

/// Format textures are stored in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Handle of an uploaded vertex set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VertexSetId(pub u32);

/// Handle of an uploaded index set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct IndexSetId(pub u32);

/// Handle of an uploaded texture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TextureId(pub u32);

/// A named vertex set and the index set drawn with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryBuffer {
    pub vertices: VertexSetId,
    pub indices: IndexSetId,
}

/// Device-local vertex buffer.
pub struct VertexSet {
    pub name: String,
    pub buffer: GpuBuffer,
    pub vertex_count: u32,
}

/// Device-local `u32` index buffer.
pub struct IndexSet {
    pub name: String,
    pub buffer: GpuBuffer,
    pub index_count: u32,
    /// Largest index, checked against the vertex set at submission.
    pub max_index: u32,
}

/// Sampled texture and the descriptor set that binds it.
pub struct TextureRecord {
    pub name: String,
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub descriptor_set: vk::DescriptorSet,
    pub width: u32,
    pub height: u32,
}

/// Registry of uploaded assets. Frees its GPU objects on drop.
pub struct AssetLibrary {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    texture_group: DescriptorGroupId,
    vertex_sets: Vec<VertexSet>,
    index_sets: Vec<IndexSet>,
    textures: Vec<TextureRecord>,
    geometries: HashMap<String, GeometryBuffer>,
    texture_names: HashMap<String, TextureId>,
    diag: Diagnostics,
}

impl AssetLibrary {
    /// Create a library whose textures take sets from `texture_group`, with the
    /// unit quad already uploaded.
    pub fn new(
        device: &DeviceContext,
        texture_group: DescriptorGroupId,
        diag: &Diagnostics,
    ) -> Result<Self> {
        let mut library = Self {
            device: device.device_arc(),
            allocator: device.allocator_arc(),
            texture_group,
            vertex_sets: Vec::new(),
            index_sets: Vec::new(),
            textures: Vec::new(),
            geometries: HashMap::new(),
            texture_names: HashMap::new(),
            diag: diag.child("assets"),
        };
        library.add_geometry(device, UNIT_QUAD, &GeometryData::unit_quad())?;
        Ok(library)
    }

    /// Parse a vertex file and an index file and upload them as `name`.
    pub fn load_geometry(
        &mut self,
        device: &DeviceContext,
        name: &str,
        vertex_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
    ) -> Result<GeometryBuffer> {
        let data = GeometryData::load(vertex_path, index_path)?;
        self.add_geometry(device, name, &data)
    }

    /// Upload already parsed geometry as `name`.
    pub fn add_geometry(
        &mut self,
        device: &DeviceContext,
        name: &str,
        data: &GeometryData,
    ) -> Result<GeometryBuffer> {
        if self.geometries.contains_key(name) {
            return Err(RenderError::DuplicateAsset(name.to_string()));
        }

        let vertex_buffer = device.upload_buffer(
            data.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{name} vertices"),
        )?;
        let index_buffer = match device.upload_buffer(
            data.index_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{name} indices"),
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                let mut vertex_buffer = vertex_buffer;
                device.destroy_buffer(&mut vertex_buffer)?;
                return Err(e.into());
            }
        };

        let geometry = GeometryBuffer {
            vertices: VertexSetId(self.vertex_sets.len() as u32),
            indices: IndexSetId(self.index_sets.len() as u32),
        };
        self.vertex_sets.push(VertexSet {
            name: name.to_string(),
            buffer: vertex_buffer,
            vertex_count: data.vertices.len() as u32,
        });
        self.index_sets.push(IndexSet {
            name: name.to_string(),
            buffer: index_buffer,
            index_count: data.index_count(),
            max_index: data.indices.iter().copied().max().unwrap_or(0),
        });
        self.geometries.insert(name.to_string(), geometry);

        self.diag.in_scope(|| {
            tracing::debug!(
                geometry = name,
                vertices = data.vertices.len(),
                indices = data.indices.len(),
                "Geometry uploaded"
            );
        });
        Ok(geometry)
    }

    /// Decode an image file and upload it as `name`.
    pub fn load_texture(
        &mut self,
        device: &DeviceContext,
        descriptors: &DescriptorRegistry,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<TextureId> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|source| RenderError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, height) = image.dimensions();
        self.upload_texture(device, descriptors, name, width, height, image.as_raw())
    }

    /// Upload tightly packed RGBA8 pixels as `name`.
    pub fn upload_texture(
        &mut self,
        device: &DeviceContext,
        descriptors: &DescriptorRegistry,
        name: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureId> {
        if self.texture_names.contains_key(name) {
            return Err(RenderError::DuplicateAsset(name.to_string()));
        }
        let expected = width as usize * height as usize * 4;
        if expected == 0 || rgba.len() != expected {
            return Err(RenderError::TextureSize {
                name: name.to_string(),
                expected,
                actual: rgba.len(),
            });
        }

        let mut staging = device.create_buffer(
            rgba.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name} staging"),
        )?;
        let uploaded = staging
            .write_bytes(0, rgba)
            .map_err(RenderError::from)
            .and_then(|()| {
                self.create_texture(device, descriptors, name, &staging, width, height)
            });
        device.destroy_buffer(&mut staging)?;
        let record = uploaded?;

        let id = TextureId(self.textures.len() as u32);
        self.textures.push(record);
        self.texture_names.insert(name.to_string(), id);

        self.diag
            .in_scope(|| tracing::debug!(texture = name, width, height, "Texture uploaded"));
        Ok(id)
    }

    fn create_texture(
        &self,
        device: &DeviceContext,
        descriptors: &DescriptorRegistry,
        name: &str,
        staging: &GpuBuffer,
        width: u32,
        height: u32,
    ) -> Result<TextureRecord> {
        let mut image = device.create_image(
            width,
            height,
            TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let mut view = vk::ImageView::null();
        let result = (|| -> Result<vk::DescriptorSet> {
            device.transition_image_layout(
                image.image,
                &LayoutTransition::undefined_to_transfer_dst(),
            )?;
            device.copy_buffer_to_image(staging.buffer, image.image, width, height)?;
            device.transition_image_layout(
                image.image,
                &LayoutTransition::transfer_dst_to_shader_read(),
            )?;
            view = device.create_image_view(image.image, TEXTURE_FORMAT)?;
            Ok(descriptors.allocate_texture_set(self.texture_group, view, device.sampler())?)
        })();

        match result {
            Ok(descriptor_set) => Ok(TextureRecord {
                name: name.to_string(),
                image,
                view,
                descriptor_set,
                width,
                height,
            }),
            Err(e) => {
                // SAFETY: the one-shot uploads have completed; null views are ignored
                unsafe { device.device().destroy_image_view(view, None) };
                device.destroy_image(&mut image)?;
                Err(e)
            }
        }
    }

    /// Look up a geometry by name.
    pub fn geometry(&self, name: &str) -> Result<GeometryBuffer> {
        self.geometries
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownAsset(format!("geometry {name}")))
    }

    /// The built-in unit quad.
    pub fn unit_quad(&self) -> Result<GeometryBuffer> {
        self.geometry(UNIT_QUAD)
    }

    /// Look up a texture by name.
    pub fn texture_id(&self, name: &str) -> Result<TextureId> {
        self.texture_names
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownAsset(format!("texture {name}")))
    }

    pub fn vertex_set(&self, id: VertexSetId) -> Result<&VertexSet> {
        self.vertex_sets
            .get(id.0 as usize)
            .ok_or_else(|| RenderError::UnknownAsset(format!("vertex set #{}", id.0)))
    }

    pub fn index_set(&self, id: IndexSetId) -> Result<&IndexSet> {
        self.index_sets
            .get(id.0 as usize)
            .ok_or_else(|| RenderError::UnknownAsset(format!("index set #{}", id.0)))
    }

    pub fn texture(&self, id: TextureId) -> Result<&TextureRecord> {
        self.textures
            .get(id.0 as usize)
            .ok_or_else(|| RenderError::UnknownAsset(format!("texture #{}", id.0)))
    }

    /// Number of uploaded textures.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}

impl Drop for AssetLibrary {
    fn drop(&mut self) {
        let mut allocator = self.allocator.lock();
        let mut freed = Vec::new();

        for mut texture in self.textures.drain(..) {
            // SAFETY: the owner waited for the device to go idle
            unsafe { self.device.destroy_image_view(texture.view, None) };
            freed.push((texture.name, allocator.free_image(&mut texture.image)));
        }
        for mut set in self.index_sets.drain(..) {
            freed.push((set.name, allocator.free_buffer(&mut set.buffer)));
        }
        for mut set in self.vertex_sets.drain(..) {
            freed.push((set.name, allocator.free_buffer(&mut set.buffer)));
        }

        for (name, result) in freed {
            if let Err(e) = result {
                self.diag
                    .in_scope(|| tracing::warn!("Failed to free asset {name}: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprig_core::Vertex;
    use sprig_gpu::{BindingSpec, GpuContextBuilder};
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../sprig-core/tests/fixtures")
            .join(name)
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn fixture_geometry_and_texture_upload() {
        let device = GpuContextBuilder::new()
            .validation(false)
            .build_headless()
            .expect("headless device");
        let mut descriptors = DescriptorRegistry::new(&device, &Diagnostics::disabled());
        let group = descriptors
            .register_group(
                "texture",
                &[BindingSpec::sampled_image(1, vk::ShaderStageFlags::FRAGMENT, 4)],
            )
            .unwrap();
        descriptors.finalize().unwrap();

        let mut assets = AssetLibrary::new(&device, group, &Diagnostics::disabled()).unwrap();
        let quad = assets
            .load_geometry(&device, "quad", fixture("quad.vertex"), fixture("quad.index"))
            .unwrap();
        assert_eq!(assets.index_set(quad.indices).unwrap().index_count, 6);
        assert_eq!(
            assets.vertex_set(quad.vertices).unwrap().buffer.size,
            4 * std::mem::size_of::<Vertex>() as u64
        );
        assert!(matches!(
            assets.load_geometry(&device, "quad", fixture("quad.vertex"), fixture("quad.index")),
            Err(RenderError::DuplicateAsset(_))
        ));

        let texture = assets
            .upload_texture(&device, &descriptors, "white", 2, 2, &[255; 16])
            .unwrap();
        assert_eq!(assets.texture_id("white").unwrap(), texture);
        assert!(matches!(
            assets.upload_texture(&device, &descriptors, "short", 2, 2, &[0; 3]),
            Err(RenderError::TextureSize { expected: 16, .. })
        ));
    }
}
