//! Descriptor groups: set layouts, pools, sets and persistent uniform buffers.
//!
//! Groups are registered by name, then [`DescriptorRegistry::finalize`] creates
//! every Vulkan object at once. After that the registry hands out integer
//! [`DescriptorGroupId`]s, and names are only used to look those up.

use crate::context::DeviceContext;
use crate::diagnostics::Diagnostics;
use crate::error::{GpuError, Result};
use crate::memory::{GpuAllocator, GpuBuffer};
use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

/// Descriptor type of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Uniform buffer backed by a persistently mapped host-visible buffer.
    UniformBuffer,
    /// Combined image sampler.
    SampledImage,
}

impl BindingKind {
    const fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One binding of a descriptor group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSpec {
    pub kind: BindingKind,
    pub binding: u32,
    pub stage: vk::ShaderStageFlags,
    /// Buffer size in bytes; ignored for sampled images.
    pub size: u64,
    /// How many sets of this group may exist at once.
    pub max_sets: u32,
}

impl BindingSpec {
    /// Uniform buffer of `size` bytes, one long-lived set.
    pub const fn uniform(binding: u32, stage: vk::ShaderStageFlags, size: u64) -> Self {
        Self {
            kind: BindingKind::UniformBuffer,
            binding,
            stage,
            size,
            max_sets: 1,
        }
    }

    /// Combined image sampler with up to `max_sets` sets allocated on demand.
    pub const fn sampled_image(binding: u32, stage: vk::ShaderStageFlags, max_sets: u32) -> Self {
        Self {
            kind: BindingKind::SampledImage,
            binding,
            stage,
            size: 0,
            max_sets,
        }
    }
}

/// Handle of a registered descriptor group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct DescriptorGroupId(pub u32);

struct DescriptorGroup {
    name: String,
    specs: Vec<BindingSpec>,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    /// The long-lived set of a uniform group.
    set: Option<vk::DescriptorSet>,
    uniform: Option<GpuBuffer>,
}

impl DescriptorGroup {
    fn max_sets(&self) -> u32 {
        self.specs.iter().map(|s| s.max_sets).max().unwrap_or(1)
    }

    fn has_only_uniforms(&self) -> bool {
        self.specs.iter().all(|s| s.kind == BindingKind::UniformBuffer)
    }
}

/// Pool sizes shared by every group: for each descriptor type, the sum of
/// declared max sets across all groups.
pub fn pool_sizes(groups: &[&[BindingSpec]]) -> Vec<vk::DescriptorPoolSize> {
    let mut uniform = 0;
    let mut sampled = 0;
    for spec in groups.iter().flat_map(|g| g.iter()) {
        match spec.kind {
            BindingKind::UniformBuffer => uniform += spec.max_sets,
            BindingKind::SampledImage => sampled += spec.max_sets,
        }
    }

    [
        (BindingKind::UniformBuffer, uniform),
        (BindingKind::SampledImage, sampled),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(kind, count)| {
        vk::DescriptorPoolSize::default()
            .ty(kind.descriptor_type())
            .descriptor_count(count)
    })
    .collect()
}

/// Check the binding shapes a group supports: a single uniform buffer, or
/// sampled images only.
pub fn validate_bindings(name: &str, specs: &[BindingSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(GpuError::InvalidState(format!(
            "Descriptor group {name} has no bindings"
        )));
    }
    let uniforms = specs
        .iter()
        .filter(|s| s.kind == BindingKind::UniformBuffer)
        .count();
    if uniforms > 1 {
        return Err(GpuError::InvalidState(format!(
            "Descriptor group {name} declares {uniforms} uniform buffers, at most one is supported"
        )));
    }
    if uniforms == 1 && specs.len() > 1 {
        return Err(GpuError::InvalidState(format!(
            "Descriptor group {name} mixes a uniform buffer with sampled images"
        )));
    }
    Ok(())
}

/// Owner of all descriptor layouts, pools, sets and uniform buffers.
pub struct DescriptorRegistry {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    max_uniform_buffer_range: u32,
    groups: Vec<DescriptorGroup>,
    names: HashMap<String, DescriptorGroupId>,
    finalized: bool,
    diag: Diagnostics,
}

impl DescriptorRegistry {
    /// Create an empty registry on `device`.
    pub fn new(device: &DeviceContext, diag: &Diagnostics) -> Self {
        Self {
            device: device.device_arc(),
            allocator: device.allocator_arc(),
            max_uniform_buffer_range: device.adapter().max_uniform_buffer_range,
            groups: Vec::new(),
            names: HashMap::new(),
            finalized: false,
            diag: diag.child("descriptors"),
        }
    }

    /// Declare a group. Must be called before [`finalize`](Self::finalize).
    ///
    /// See [`validate_bindings`] for the accepted binding shapes.
    pub fn register_group(
        &mut self,
        name: &str,
        specs: &[BindingSpec],
    ) -> Result<DescriptorGroupId> {
        if self.finalized {
            return Err(GpuError::InvalidState(format!(
                "Descriptor group {name} registered after finalize"
            )));
        }
        if self.names.contains_key(name) {
            return Err(GpuError::InvalidState(format!(
                "Descriptor group {name} registered twice"
            )));
        }
        validate_bindings(name, specs)?;

        let id = DescriptorGroupId(self.groups.len() as u32);
        self.groups.push(DescriptorGroup {
            name: name.to_string(),
            specs: specs.to_vec(),
            layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            set: None,
            uniform: None,
        });
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Create layouts, pools, uniform buffers and the long-lived sets of every
    /// registered group.
    ///
    /// A uniform binding larger than the device's `maxUniformBufferRange` is a
    /// fatal configuration error.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Err(GpuError::InvalidState(
                "Descriptor configuration finalized twice".to_string(),
            ));
        }

        for group in &self.groups {
            for spec in &group.specs {
                if spec.kind == BindingKind::UniformBuffer
                    && spec.size > u64::from(self.max_uniform_buffer_range)
                {
                    return Err(GpuError::LimitExceeded {
                        what: format!("Uniform group {}", group.name),
                        requested: spec.size,
                        limit: u64::from(self.max_uniform_buffer_range),
                    });
                }
            }
        }

        let all_specs: Vec<&[BindingSpec]> =
            self.groups.iter().map(|g| g.specs.as_slice()).collect();
        let sizes = pool_sizes(&all_specs);

        // Marked before creation so that Drop releases a partially built state
        self.finalized = true;

        for index in 0..self.groups.len() {
            self.create_group_objects(index, &sizes)?;
        }

        self.diag.in_scope(|| {
            tracing::debug!(groups = self.groups.len(), "Descriptor configuration finalized");
        });
        Ok(())
    }

    fn create_group_objects(&mut self, index: usize, sizes: &[vk::DescriptorPoolSize]) -> Result<()> {
        let device = Arc::clone(&self.device);
        let group = &mut self.groups[index];

        let bindings: Vec<_> = group
            .specs
            .iter()
            .map(|spec| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(spec.binding)
                    .descriptor_type(spec.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(spec.stage)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        // SAFETY: device is valid for the registry's lifetime
        group.layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(group.max_sets())
            .pool_sizes(sizes);
        // SAFETY: as above
        group.pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        if !group.has_only_uniforms() {
            return Ok(());
        }

        let layouts = [group.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(group.pool)
            .set_layouts(&layouts);
        // SAFETY: pool and layout were created above
        let set = unsafe { device.allocate_descriptor_sets(&alloc_info)? }[0];
        group.set = Some(set);

        for spec in &group.specs {
            let buffer = self.allocator.lock().create_buffer(
                spec.size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &group.name,
            )?;

            let buffer_info = vk::DescriptorBufferInfo::default()
                .buffer(buffer.buffer)
                .offset(0)
                .range(spec.size);
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(spec.binding)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(std::slice::from_ref(&buffer_info));
            // SAFETY: set and buffer are live
            unsafe { device.update_descriptor_sets(&[write], &[]) };

            let mapped = buffer.mapped_ptr().is_some();
            group.uniform = Some(buffer);
            if !mapped {
                return Err(GpuError::InvalidState(format!(
                    "Uniform buffer of {} is not host mapped",
                    group.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a group by name.
    pub fn group_id(&self, name: &str) -> Result<DescriptorGroupId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| GpuError::ResourceNotFound(format!("descriptor group {name}")))
    }

    fn group(&self, id: DescriptorGroupId) -> Result<&DescriptorGroup> {
        self.groups
            .get(id.0 as usize)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("descriptor group #{}", id.0)))
    }

    fn finalized_group(&self, id: DescriptorGroupId) -> Result<&DescriptorGroup> {
        if !self.finalized {
            return Err(GpuError::InvalidState(
                "Descriptor configuration not finalized".to_string(),
            ));
        }
        self.group(id)
    }

    /// Set layout of a group.
    pub fn layout(&self, id: DescriptorGroupId) -> Result<vk::DescriptorSetLayout> {
        Ok(self.finalized_group(id)?.layout)
    }

    /// The long-lived set of a uniform group.
    pub fn set(&self, id: DescriptorGroupId) -> Result<vk::DescriptorSet> {
        let group = self.finalized_group(id)?;
        group.set.ok_or_else(|| {
            GpuError::InvalidState(format!("{} has no long-lived set", group.name))
        })
    }

    fn uniform(&self, id: DescriptorGroupId) -> Result<&GpuBuffer> {
        let group = self.finalized_group(id)?;
        group.uniform.as_ref().ok_or_else(|| {
            GpuError::InvalidState(format!("{} has no uniform buffer", group.name))
        })
    }

    /// Host address of a group's persistently mapped uniform buffer.
    pub fn mapped_address(&self, id: DescriptorGroupId) -> Result<NonNull<u8>> {
        self.uniform(id)?
            .mapped_ptr()
            .and_then(NonNull::new)
            .ok_or_else(|| GpuError::InvalidState("Uniform buffer not mapped".to_string()))
    }

    /// Size in bytes of a group's uniform buffer.
    pub fn uniform_size(&self, id: DescriptorGroupId) -> Result<u64> {
        Ok(self.uniform(id)?.size)
    }

    /// Copy `bytes` into a group's uniform buffer at `offset`.
    ///
    /// The bytes must already match the shader's block layout; only the range
    /// is checked.
    pub fn update_uniform(&self, id: DescriptorGroupId, offset: u64, bytes: &[u8]) -> Result<()> {
        self.uniform(id)?.write_bytes(offset, bytes)
    }

    /// Read back `len` bytes of a group's uniform buffer.
    pub fn read_uniform(&self, id: DescriptorGroupId, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.uniform(id)?.read_bytes(offset, len)
    }

    /// Allocate a set from a sampled-image group and point it at `view`.
    ///
    /// The view must be in `SHADER_READ_ONLY_OPTIMAL` layout when the set is used.
    pub fn allocate_texture_set(
        &self,
        id: DescriptorGroupId,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<vk::DescriptorSet> {
        let group = self.finalized_group(id)?;
        let spec = group
            .specs
            .iter()
            .find(|s| s.kind == BindingKind::SampledImage)
            .ok_or_else(|| {
                GpuError::InvalidState(format!("{} has no sampled image binding", group.name))
            })?;

        let layouts = [group.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(group.pool)
            .set_layouts(&layouts);
        // SAFETY: pool and layout are live; exhaustion surfaces as an error
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? }[0];

        let image_info = vk::DescriptorImageInfo::default()
            .sampler(sampler)
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(spec.binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));
        // SAFETY: set was just allocated; view and sampler are owned by the caller
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };

        Ok(set)
    }
}

impl Drop for DescriptorRegistry {
    fn drop(&mut self) {
        let mut allocator = self.allocator.lock();
        for group in self.groups.drain(..).rev() {
            if let Some(mut buffer) = group.uniform {
                if let Err(e) = allocator.free_buffer(&mut buffer) {
                    self.diag
                        .in_scope(|| tracing::warn!("Failed to free {} uniforms: {e}", group.name));
                }
            }
            // SAFETY: the owner waited for the device to go idle; null handles are ignored
            unsafe {
                self.device.destroy_descriptor_pool(group.pool, None);
                self.device.destroy_descriptor_set_layout(group.layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::GpuContextBuilder;

    #[test]
    fn pool_sizes_sum_per_type() {
        let quad = [BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, 32_000)];
        let shape = [BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, 65_536)];
        let texture = [BindingSpec::sampled_image(
            1,
            vk::ShaderStageFlags::FRAGMENT,
            64,
        )];

        let sizes = pool_sizes(&[&quad, &shape, &texture]);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 64);
    }

    #[test]
    fn pool_sizes_skip_unused_types() {
        let quad = [BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, 256)];
        let sizes = pool_sizes(&[&quad]);
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn uniform_groups_stand_alone() {
        let uniform = BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, 256);
        let image = BindingSpec::sampled_image(1, vk::ShaderStageFlags::FRAGMENT, 8);

        assert!(validate_bindings("quad", &[uniform]).is_ok());
        assert!(validate_bindings("texture", &[image]).is_ok());

        let invalid: [&[BindingSpec]; 3] = [&[], &[uniform, uniform], &[uniform, image]];
        for specs in invalid {
            assert!(matches!(
                validate_bindings("bad", specs),
                Err(GpuError::InvalidState(_))
            ));
        }
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn uniform_round_trip() {
        let device = GpuContextBuilder::new()
            .validation(false)
            .build_headless()
            .expect("headless device");
        let mut registry = DescriptorRegistry::new(&device, &Diagnostics::disabled());
        let id = registry
            .register_group(
                "quad",
                &[BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, 256)],
            )
            .unwrap();
        registry.finalize().unwrap();
        assert_eq!(registry.group_id("quad").unwrap(), id);
        assert_eq!(registry.uniform_size(id).unwrap(), 256);

        let pattern: Vec<u8> = (0..=255).collect();
        registry.update_uniform(id, 0, &pattern).unwrap();
        assert_eq!(registry.read_uniform(id, 0, 256).unwrap(), pattern);

        // SAFETY: the buffer is 256 bytes, host-coherent and not in use by the GPU
        let mapped = unsafe {
            std::slice::from_raw_parts(registry.mapped_address(id).unwrap().as_ptr(), 256)
        };
        assert_eq!(mapped, pattern.as_slice());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn oversized_uniform_is_fatal() {
        let device = GpuContextBuilder::new()
            .validation(false)
            .build_headless()
            .expect("headless device");
        let limit = u64::from(device.adapter().max_uniform_buffer_range);
        let mut registry = DescriptorRegistry::new(&device, &Diagnostics::disabled());
        registry
            .register_group(
                "huge",
                &[BindingSpec::uniform(0, vk::ShaderStageFlags::VERTEX, limit + 16)],
            )
            .unwrap();
        assert!(matches!(
            registry.finalize(),
            Err(GpuError::LimitExceeded { .. })
        ));
    }
}
