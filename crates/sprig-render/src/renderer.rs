//! The renderer facade game code draws through.

use crate::assets::{AssetLibrary, GeometryBuffer, IndexSetId, TextureId, VertexSetId};
use crate::batch::{
    PipelineBinding, QuadBatch, Renderable, ShapeBatch, ShapeKey, ShapeResources,
};
use crate::error::{RenderError, Result};
use crate::frame::{FrameOrchestrator, VulkanFrameTarget};
use crate::uniforms::InstanceBlock;
use ash::vk;
use glam::Vec2;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use sprig_core::{ClipSpace, Color, WindowExtent};
use sprig_gpu::{
    BindingSpec, DescriptorRegistry, Diagnostics, GpuContext, GpuContextBuilder, PipelineRegistry,
};
use std::path::{Path, PathBuf};

/// Uniform group of the quad batch.
pub const QUAD_GROUP: &str = "quad";
/// Uniform group of the shape batch.
pub const SHAPE_GROUP: &str = "shape";
/// Sampled-image group textures allocate their sets from.
pub const TEXTURE_GROUP: &str = "texture";

/// Built-in pipelines, each with a layout of the same name.
pub const QUAD_PIPELINE: &str = "quad";
pub const SHAPE_PIPELINE: &str = "shape";
pub const SHAPE_TEXTURED_PIPELINE: &str = "shape_textured";

/// Default number of textures that can be loaded.
pub const DEFAULT_MAX_TEXTURES: u32 = 64;

/// Renderer settings.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub app_name: String,
    /// Enable Vulkan validation layers.
    pub validation: bool,
    /// Directory holding the compiled `*.spv` shaders. Defaults to the
    /// stages built by `sprig-shaders`.
    pub shader_dir: PathBuf,
    pub clear_color: Color,
    pub quad_capacity: usize,
    pub shape_capacity: usize,
    pub max_textures: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "Sprig".to_string(),
            validation: cfg!(debug_assertions),
            shader_dir: sprig_shaders::shader_dir().to_path_buf(),
            clear_color: Color::BLACK,
            quad_capacity: sprig_shaders::QUAD_CAPACITY,
            shape_capacity: sprig_shaders::SHAPE_CAPACITY,
            max_textures: DEFAULT_MAX_TEXTURES,
        }
    }
}

impl RendererConfig {
    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn with_clear_color(mut self, color: Color) -> Self {
        self.clear_color = color;
        self
    }

    /// Must match `CAPACITY` in the quad shaders. Only shaders loaded from a
    /// custom [`shader_dir`](Self::shader_dir) can use another value.
    pub fn with_quad_capacity(mut self, capacity: usize) -> Self {
        self.quad_capacity = capacity;
        self
    }

    /// Must match `CAPACITY` in the shape shaders.
    pub fn with_shape_capacity(mut self, capacity: usize) -> Self {
        self.shape_capacity = capacity;
        self
    }

    pub fn with_max_textures(mut self, max: u32) -> Self {
        self.max_textures = max;
        self
    }

    /// Reject capacities that disagree with the built-in shaders.
    ///
    /// Custom shader directories are trusted to match their own capacities.
    pub fn check_capacities(&self) -> Result<()> {
        if self.shader_dir != sprig_shaders::shader_dir() {
            return Ok(());
        }
        let checks = [
            (QUAD_PIPELINE, self.quad_capacity, sprig_shaders::QUAD_CAPACITY),
            (SHAPE_PIPELINE, self.shape_capacity, sprig_shaders::SHAPE_CAPACITY),
        ];
        for (pipeline, requested, compiled) in checks {
            if requested != compiled {
                return Err(RenderError::CapacityMismatch {
                    pipeline,
                    requested,
                    compiled,
                });
            }
        }
        Ok(())
    }

    fn shader_paths(&self, pipeline: &str) -> (PathBuf, PathBuf) {
        (
            self.shader_dir.join(format!("{pipeline}.vert.spv")),
            self.shader_dir.join(format!("{pipeline}.frag.spv")),
        )
    }
}

/// Owns the GPU context, registries, assets and batches of one window.
///
/// Fields are dropped in declaration order, so everything built on the
/// context goes before it.
pub struct Renderer {
    frame: FrameOrchestrator,
    secondaries: Vec<vk::CommandBuffer>,
    assets: AssetLibrary,
    pipelines: PipelineRegistry,
    descriptors: DescriptorRegistry,
    clear_color: Color,
    diag: Diagnostics,
    gpu: GpuContext,
}

impl Renderer {
    /// Create a renderer presenting to `window`, whose drawable area is
    /// `width`×`height` pixels.
    ///
    /// Fails when no adapter fits, a shader is missing, or a batch capacity
    /// disagrees with the built-in shaders or exceeds the device's uniform
    /// buffer range.
    pub fn new<W>(window: &W, width: u32, height: u32, config: &RendererConfig) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        config.check_capacities()?;
        let diag = Diagnostics::new("renderer");
        let gpu = GpuContextBuilder::new()
            .app_name(config.app_name.clone())
            .validation(config.validation)
            .diagnostics(diag.child("gpu"))
            .build(window, width, height)?;

        let quad_block = InstanceBlock::new(config.quad_capacity);
        let shape_block = InstanceBlock::new(config.shape_capacity);

        let mut descriptors = DescriptorRegistry::new(&gpu, &diag);
        let quad_group = descriptors.register_group(
            QUAD_GROUP,
            &[BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, quad_block.size())],
        )?;
        let shape_group = descriptors.register_group(
            SHAPE_GROUP,
            &[BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, shape_block.size())],
        )?;
        let texture_group = descriptors.register_group(
            TEXTURE_GROUP,
            &[BindingSpec::sampled_image(
                1,
                vk::ShaderStageFlags::FRAGMENT,
                config.max_textures,
            )],
        )?;
        descriptors.finalize()?;

        let mut pipelines =
            PipelineRegistry::new(gpu.device_arc(), gpu.render_pass().render_pass, &diag);
        pipelines.add_pipeline_layout(QUAD_PIPELINE, &[quad_group], &descriptors)?;
        pipelines.add_pipeline_layout(SHAPE_PIPELINE, &[shape_group], &descriptors)?;
        pipelines.add_pipeline_layout(
            SHAPE_TEXTURED_PIPELINE,
            &[shape_group, texture_group],
            &descriptors,
        )?;

        let vertex_layout = [
            (vk::Format::R32G32_SFLOAT, 0),
            (vk::Format::R32G32_SFLOAT, 8),
        ];
        pipelines.add_pipeline_template(QUAD_PIPELINE);
        pipelines
            .add_pipeline_template(SHAPE_PIPELINE)
            .with_vertex_layout(16, &vertex_layout);
        pipelines
            .add_pipeline_template(SHAPE_TEXTURED_PIPELINE)
            .with_vertex_layout(16, &vertex_layout)
            .with_alpha_blend();

        for name in [QUAD_PIPELINE, SHAPE_PIPELINE, SHAPE_TEXTURED_PIPELINE] {
            let (vert, frag) = config.shader_paths(name);
            let id = pipelines.create_pipeline(name, name, vert, frag)?;
            let sets = pipelines.layout_groups(id)?.len();
            diag.in_scope(|| tracing::debug!(pipeline = name, sets, "Pipeline created"));
        }
        let binding = |name: &str| -> Result<PipelineBinding> {
            let id = pipelines.pipeline_id(name)?;
            Ok(PipelineBinding {
                pipeline: pipelines.pipeline(id)?,
                layout: pipelines.pipeline_layout(id)?,
            })
        };
        let quad_binding = binding(QUAD_PIPELINE)?;
        let shape_binding = binding(SHAPE_PIPELINE)?;
        let textured_binding = binding(SHAPE_TEXTURED_PIPELINE)?;

        let assets = AssetLibrary::new(&gpu, texture_group, &diag)?;

        let clip = ClipSpace::new(gpu.window_extent());
        let batches = vec![
            Renderable::Quads(QuadBatch::new(
                config.quad_capacity,
                clip,
                quad_group,
                descriptors.set(quad_group)?,
                quad_binding,
            )),
            Renderable::Shapes(ShapeBatch::new(
                config.shape_capacity,
                clip,
                shape_group,
                descriptors.set(shape_group)?,
                shape_binding,
                textured_binding,
            )),
        ];
        let frame = FrameOrchestrator::new(batches);

        // SAFETY: the pool belongs to this device
        let secondaries = unsafe {
            gpu.command_pool().allocate(
                gpu.device(),
                vk::CommandBufferLevel::SECONDARY,
                frame.secondary_count() as u32,
            )?
        };

        diag.in_scope(|| {
            tracing::info!(
                width = gpu.extent().width,
                height = gpu.extent().height,
                quad_capacity = config.quad_capacity,
                shape_capacity = config.shape_capacity,
                "Renderer ready"
            );
        });

        Ok(Self {
            frame,
            secondaries,
            assets,
            pipelines,
            descriptors,
            clear_color: config.clear_color,
            diag,
            gpu,
        })
    }

    /// Queue an untextured rectangle centered on `position` with full `size`,
    /// both in window pixels.
    ///
    /// Returns `false` when the quad batch is full and the quad was dropped.
    pub fn submit_quad(&mut self, position: Vec2, size: Vec2, color: Color) -> bool {
        self.quads_mut()
            .is_some_and(|quads| quads.add(position, size, color))
    }

    /// Queue the unit quad with `texture` applied.
    pub fn submit_textured_quad(
        &mut self,
        position: Vec2,
        size: Vec2,
        texture: TextureId,
    ) -> Result<bool> {
        let GeometryBuffer { vertices, indices } = self.assets.unit_quad()?;
        self.submit_shape(vertices, indices, position, size, Color::BLACK, Some(texture))
    }

    /// Queue one instance of an uploaded geometry.
    ///
    /// Fails on unknown handles or when `indices` reaches past `vertices`.
    /// Returns `Ok(false)` when the shape batch is full and the shape was
    /// dropped.
    pub fn submit_shape(
        &mut self,
        vertices: VertexSetId,
        indices: IndexSetId,
        position: Vec2,
        size: Vec2,
        color: Color,
        texture: Option<TextureId>,
    ) -> Result<bool> {
        let resources = self.resolve_shape(vertices, indices, texture)?;
        let key = ShapeKey {
            vertices,
            indices,
            texture,
        };
        Ok(self
            .shapes_mut()
            .is_some_and(|shapes| shapes.add(key, resources, position, size, color)))
    }

    /// Draw and present everything queued since the last frame.
    pub fn draw_frame(&mut self) -> Result<()> {
        let mut target = VulkanFrameTarget::new(
            &self.gpu,
            &self.descriptors,
            &self.secondaries,
            self.clear_color,
            &self.diag,
        );
        self.frame.draw(&mut target)
    }

    /// Parse and upload a geometry file pair as `name`.
    pub fn load_geometry(
        &mut self,
        name: &str,
        vertex_path: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
    ) -> Result<GeometryBuffer> {
        self.assets
            .load_geometry(&self.gpu, name, vertex_path, index_path)
    }

    /// Decode and upload an image file as `name`.
    pub fn load_texture(&mut self, name: &str, path: impl AsRef<Path>) -> Result<TextureId> {
        self.assets
            .load_texture(&self.gpu, &self.descriptors, name, path)
    }

    /// Upload RGBA8 pixels as `name`.
    pub fn upload_texture(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureId> {
        self.assets
            .upload_texture(&self.gpu, &self.descriptors, name, width, height, rgba)
    }

    pub fn assets(&self) -> &AssetLibrary {
        &self.assets
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn descriptors(&self) -> &DescriptorRegistry {
        &self.descriptors
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Window extent the clip-space transform was built for.
    pub fn extent(&self) -> WindowExtent {
        self.gpu.window_extent()
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.frame.frame_count()
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        Ok(self.gpu.wait_idle()?)
    }

    fn resolve_shape(
        &self,
        vertices: VertexSetId,
        indices: IndexSetId,
        texture: Option<TextureId>,
    ) -> Result<ShapeResources> {
        let vertex_set = self.assets.vertex_set(vertices)?;
        let index_set = self.assets.index_set(indices)?;
        if index_set.max_index >= vertex_set.vertex_count {
            return Err(RenderError::IncompatibleGeometry {
                vertices: vertex_set.name.clone(),
                indices: index_set.name.clone(),
                max_index: index_set.max_index,
                count: vertex_set.vertex_count,
            });
        }
        let texture_set = texture
            .map(|id| self.assets.texture(id).map(|t| t.descriptor_set))
            .transpose()?;

        Ok(ShapeResources {
            vertex_buffer: vertex_set.buffer.buffer,
            index_buffer: index_set.buffer.buffer,
            index_count: index_set.index_count,
            texture_set,
        })
    }

    fn quads_mut(&mut self) -> Option<&mut QuadBatch> {
        self.frame
            .batches_mut()
            .iter_mut()
            .find_map(|batch| match batch {
                Renderable::Quads(quads) => Some(quads),
                Renderable::Shapes(_) => None,
            })
    }

    fn shapes_mut(&mut self) -> Option<&mut ShapeBatch> {
        self.frame
            .batches_mut()
            .iter_mut()
            .find_map(|batch| match batch {
                Renderable::Shapes(shapes) => Some(shapes),
                Renderable::Quads(_) => None,
            })
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            self.diag
                .in_scope(|| tracing::warn!("wait_idle before teardown failed: {e}"));
        }
        // SAFETY: the device is idle and the buffers came from this pool
        unsafe {
            self.gpu
                .command_pool()
                .free(self.gpu.device(), &self.secondaries);
        }
        self.diag.in_scope(|| {
            tracing::info!(frames = self.frame.frame_count(), "Renderer shut down");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_compiled_shaders() {
        let config = RendererConfig::default();
        assert_eq!(config.quad_capacity, sprig_shaders::QUAD_CAPACITY);
        assert_eq!(config.shape_capacity, sprig_shaders::SHAPE_CAPACITY);
        assert_eq!(config.max_textures, DEFAULT_MAX_TEXTURES);
        assert!(config.check_capacities().is_ok());
        for stage in sprig_shaders::STAGES {
            let pipeline = stage.split('.').next().unwrap();
            let (vert, frag) = config.shader_paths(pipeline);
            assert!(vert.ends_with(stage) || frag.ends_with(stage), "{stage}");
        }
    }

    #[test]
    fn capacity_change_needs_matching_shaders() {
        let config = RendererConfig::default().with_quad_capacity(16);
        match config.check_capacities() {
            Err(RenderError::CapacityMismatch {
                pipeline,
                requested,
                compiled,
            }) => {
                assert_eq!(pipeline, QUAD_PIPELINE);
                assert_eq!(requested, 16);
                assert_eq!(compiled, sprig_shaders::QUAD_CAPACITY);
            }
            other => panic!("expected a capacity mismatch, got {other:?}"),
        }
        // colors would land at 256 while the compiled shader reads 16000
        assert_ne!(
            InstanceBlock::new(16).colors_offset(),
            InstanceBlock::new(sprig_shaders::QUAD_CAPACITY).colors_offset()
        );

        let shapes =
            RendererConfig::default().with_shape_capacity(sprig_shaders::SHAPE_CAPACITY + 1);
        assert!(matches!(
            shapes.check_capacities(),
            Err(RenderError::CapacityMismatch { pipeline: SHAPE_PIPELINE, .. })
        ));
    }

    #[test]
    fn builder_overrides_capacities() {
        let config = RendererConfig::default()
            .with_shader_dir("/opt/sprig/shaders")
            .with_quad_capacity(16)
            .with_shape_capacity(32)
            .with_max_textures(4);
        assert_eq!(config.quad_capacity, 16);
        assert_eq!(config.shape_capacity, 32);
        assert_eq!(config.max_textures, 4);
        assert_eq!(InstanceBlock::new(config.shape_capacity).size(), 1024);
        assert!(config.check_capacities().is_ok());
    }

    #[test]
    fn shader_paths_follow_pipeline_names() {
        let config = RendererConfig::default().with_shader_dir("/opt/sprig/shaders");
        let (vert, frag) = config.shader_paths(SHAPE_TEXTURED_PIPELINE);
        assert_eq!(vert, Path::new("/opt/sprig/shaders/shape_textured.vert.spv"));
        assert_eq!(frag, Path::new("/opt/sprig/shaders/shape_textured.frag.spv"));
    }
}
