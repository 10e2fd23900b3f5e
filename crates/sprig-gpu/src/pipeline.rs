//! Graphics pipelines and pipeline layouts, addressed by name at build time
//! and by integer handle afterwards.

use crate::descriptors::{DescriptorGroupId, DescriptorRegistry};
use crate::diagnostics::Diagnostics;
use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Handle of a pipeline layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PipelineLayoutId(pub u32);

/// Handle of a graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PipelineId(pub u32);

/// Fixed-function state of a pipeline, editable until the pipeline is created.
#[derive(Clone, Debug)]
pub struct PipelineTemplate {
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,
    pub blend_enable: bool,
}

impl Default for PipelineTemplate {
    fn default() -> Self {
        Self {
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,
            blend_enable: false,
        }
    }
}

impl PipelineTemplate {
    /// Use one per-vertex binding of `stride` bytes with the given attributes.
    pub fn with_vertex_layout(
        &mut self,
        stride: u32,
        attributes: &[(vk::Format, u32)],
    ) -> &mut Self {
        self.vertex_bindings = vec![vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(stride)
            .input_rate(vk::VertexInputRate::VERTEX)];
        self.vertex_attributes = attributes
            .iter()
            .enumerate()
            .map(|(location, &(format, offset))| {
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(location as u32)
                    .format(format)
                    .offset(offset)
            })
            .collect();
        self
    }

    /// Enable standard alpha blending.
    pub fn with_alpha_blend(&mut self) -> &mut Self {
        self.blend_enable = true;
        self
    }
}

/// Read a SPIR-V binary. A missing or unreadable file is fatal.
pub fn load_shader(path: &Path) -> Result<Vec<u32>> {
    let shader_err = |source| GpuError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(shader_err)?;
    ash::util::read_spv(&mut file).map_err(shader_err)
}

struct LayoutRecord {
    layout: vk::PipelineLayout,
    groups: Vec<DescriptorGroupId>,
}

struct PipelineRecord {
    pipeline: vk::Pipeline,
    layout: PipelineLayoutId,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
}

/// Owner of pipeline templates, layouts and pipelines.
pub struct PipelineRegistry {
    device: Arc<ash::Device>,
    render_pass: vk::RenderPass,
    templates: HashMap<String, PipelineTemplate>,
    layouts: Vec<LayoutRecord>,
    layout_names: HashMap<String, PipelineLayoutId>,
    pipelines: Vec<PipelineRecord>,
    pipeline_names: HashMap<String, PipelineId>,
    diag: Diagnostics,
}

impl PipelineRegistry {
    /// Create an empty registry whose pipelines target subpass 0 of `render_pass`.
    pub fn new(device: Arc<ash::Device>, render_pass: vk::RenderPass, diag: &Diagnostics) -> Self {
        Self {
            device,
            render_pass,
            templates: HashMap::new(),
            layouts: Vec::new(),
            layout_names: HashMap::new(),
            pipelines: Vec::new(),
            pipeline_names: HashMap::new(),
            diag: diag.child("pipelines"),
        }
    }

    /// Add a template seeded with defaults and return it for editing.
    ///
    /// Adding a name twice resets that template.
    pub fn add_pipeline_template(&mut self, name: &str) -> &mut PipelineTemplate {
        let template = self.templates.entry(name.to_string()).or_default();
        *template = PipelineTemplate::default();
        template
    }

    /// Create a pipeline layout whose set `i` is `groups[i]`.
    pub fn add_pipeline_layout(
        &mut self,
        name: &str,
        groups: &[DescriptorGroupId],
        descriptors: &DescriptorRegistry,
    ) -> Result<PipelineLayoutId> {
        if self.layout_names.contains_key(name) {
            return Err(GpuError::InvalidState(format!(
                "Pipeline layout {name} created twice"
            )));
        }

        let set_layouts = groups
            .iter()
            .map(|&group| descriptors.layout(group))
            .collect::<Result<Vec<_>>>()?;

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        // SAFETY: set layouts are owned by the descriptor registry, which outlives
        // pipeline creation
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("{name}: {e}")))?;

        let id = PipelineLayoutId(self.layouts.len() as u32);
        self.layouts.push(LayoutRecord {
            layout,
            groups: groups.to_vec(),
        });
        self.layout_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Bake the template `name` into a pipeline using layout `layout_name` and
    /// the two shader binaries.
    pub fn create_pipeline(
        &mut self,
        name: &str,
        layout_name: &str,
        vertex_shader: impl AsRef<Path>,
        fragment_shader: impl AsRef<Path>,
    ) -> Result<PipelineId> {
        if self.pipeline_names.contains_key(name) {
            return Err(GpuError::InvalidState(format!("Pipeline {name} created twice")));
        }
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("pipeline template {name}")))?;
        let layout_id = self.layout_id(layout_name)?;
        let layout = self.layouts[layout_id.0 as usize].layout;

        let vertex_shader = vertex_shader.as_ref();
        let fragment_shader = fragment_shader.as_ref();
        let vert_code = load_shader(vertex_shader)?;
        let frag_code = load_shader(fragment_shader)?;

        // SAFETY: device and render pass are valid; SPIR-V words come from read_spv
        let pipeline = unsafe {
            bake_pipeline(
                &self.device,
                self.render_pass,
                layout,
                template,
                &vert_code,
                &frag_code,
            )
        }
        .map_err(|e| match e {
            GpuError::PipelineCreation(msg) => GpuError::PipelineCreation(format!("{name}: {msg}")),
            other => other,
        })?;

        self.diag.in_scope(|| {
            tracing::debug!(
                pipeline = name,
                layout = layout_name,
                vert = %vertex_shader.display(),
                frag = %fragment_shader.display(),
                "Pipeline created"
            );
        });

        let id = PipelineId(self.pipelines.len() as u32);
        self.pipelines.push(PipelineRecord {
            pipeline,
            layout: layout_id,
            vertex_shader: vertex_shader.to_path_buf(),
            fragment_shader: fragment_shader.to_path_buf(),
        });
        self.pipeline_names.insert(name.to_string(), id);
        self.templates.remove(name);
        Ok(id)
    }

    /// Look up a pipeline layout by name.
    pub fn layout_id(&self, name: &str) -> Result<PipelineLayoutId> {
        self.layout_names
            .get(name)
            .copied()
            .ok_or_else(|| GpuError::ResourceNotFound(format!("pipeline layout {name}")))
    }

    /// Look up a pipeline by name.
    pub fn pipeline_id(&self, name: &str) -> Result<PipelineId> {
        self.pipeline_names
            .get(name)
            .copied()
            .ok_or_else(|| GpuError::ResourceNotFound(format!("pipeline {name}")))
    }

    fn record(&self, id: PipelineId) -> Result<&PipelineRecord> {
        self.pipelines
            .get(id.0 as usize)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("pipeline #{}", id.0)))
    }

    /// Raw pipeline handle.
    pub fn pipeline(&self, id: PipelineId) -> Result<vk::Pipeline> {
        Ok(self.record(id)?.pipeline)
    }

    /// Raw layout handle the pipeline was created with.
    pub fn pipeline_layout(&self, id: PipelineId) -> Result<vk::PipelineLayout> {
        let record = self.record(id)?;
        Ok(self.layouts[record.layout.0 as usize].layout)
    }

    /// Descriptor groups bound at sets 0.. of a pipeline's layout.
    pub fn layout_groups(&self, id: PipelineId) -> Result<&[DescriptorGroupId]> {
        let record = self.record(id)?;
        Ok(&self.layouts[record.layout.0 as usize].groups)
    }

    /// Shader files a pipeline was built from.
    pub fn shader_paths(&self, id: PipelineId) -> Result<(&Path, &Path)> {
        let record = self.record(id)?;
        Ok((&record.vertex_shader, &record.fragment_shader))
    }
}

impl Drop for PipelineRegistry {
    fn drop(&mut self) {
        // SAFETY: the owner waited for the device to go idle
        unsafe {
            for record in self.pipelines.drain(..) {
                self.device.destroy_pipeline(record.pipeline, None);
            }
            for record in self.layouts.drain(..) {
                self.device.destroy_pipeline_layout(record.layout, None);
            }
        }
    }
}

/// Create shader modules, link them with `template`'s fixed-function state and
/// destroy the modules again.
///
/// # Safety
/// All handles must be valid.
unsafe fn bake_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    template: &PipelineTemplate,
    vert_code: &[u32],
    frag_code: &[u32],
) -> Result<vk::Pipeline> {
    let vert_info = vk::ShaderModuleCreateInfo::default().code(vert_code);
    // SAFETY: forwarded from the caller
    let vert_module = unsafe { device.create_shader_module(&vert_info, None) }
        .map_err(|e| GpuError::ShaderModule(format!("vertex: {e}")))?;

    let frag_info = vk::ShaderModuleCreateInfo::default().code(frag_code);
    // SAFETY: forwarded from the caller
    let frag_module = match unsafe { device.create_shader_module(&frag_info, None) } {
        Ok(module) => module,
        Err(e) => {
            // SAFETY: module is unused
            unsafe { device.destroy_shader_module(vert_module, None) };
            return Err(GpuError::ShaderModule(format!("fragment: {e}")));
        }
    };

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(c"main"),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&template.vertex_bindings)
        .vertex_attribute_descriptions(&template.vertex_attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(template.topology)
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic
    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(template.polygon_mode)
        .cull_mode(template.cull_mode)
        .front_face(template.front_face)
        .depth_bias_enable(false)
        .line_width(1.0);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(template.samples)
        .sample_shading_enable(false);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(template.blend_enable)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)];

    let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0);

    // SAFETY: forwarded from the caller
    let result = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    // SAFETY: modules are only referenced during creation
    unsafe {
        device.destroy_shader_module(vert_module, None);
        device.destroy_shader_module(frag_module, None);
    }

    let pipelines = result.map_err(|(_, e)| GpuError::PipelineCreation(e.to_string()))?;
    pipelines
        .first()
        .copied()
        .ok_or_else(|| GpuError::PipelineCreation("driver returned no pipeline".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_defaults() {
        let template = PipelineTemplate::default();
        assert_eq!(template.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(template.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(template.samples, vk::SampleCountFlags::TYPE_1);
        assert!(!template.blend_enable);
        assert!(template.vertex_bindings.is_empty());
    }

    #[test]
    fn vertex_layout_assigns_locations_in_order() {
        let mut template = PipelineTemplate::default();
        template.with_vertex_layout(
            16,
            &[
                (vk::Format::R32G32_SFLOAT, 0),
                (vk::Format::R32G32_SFLOAT, 8),
            ],
        );

        assert_eq!(template.vertex_bindings.len(), 1);
        assert_eq!(template.vertex_bindings[0].stride, 16);
        assert_eq!(template.vertex_attributes[1].location, 1);
        assert_eq!(template.vertex_attributes[1].offset, 8);
    }

    #[test]
    fn missing_shader_is_fatal() {
        let path = Path::new("does/not/exist/quad.vert.spv");
        match load_shader(path) {
            Err(GpuError::ShaderLoad { path: p, source }) => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected ShaderLoad, got {:?}", other.map(|w| w.len())),
        }
    }

    #[test]
    fn shader_words_are_read() {
        let dir = std::env::temp_dir().join("sprig-gpu-shader-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tiny.spv");
        // SPIR-V magic number followed by one word
        let words: [u32; 2] = [0x0723_0203, 0x0001_0000];
        std::fs::write(&path, bytemuck::cast_slice(&words)).unwrap();

        assert_eq!(load_shader(&path).unwrap(), words);
    }
}
