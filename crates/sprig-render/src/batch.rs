//! Per-frame instanced draw batches.
//!
//! A batch accumulates clip-space instances between frames and records one
//! instanced draw per distinct geometry key. The shader reads instance `i`
//! from slot `gl_InstanceIndex` of the batch's uniform arrays, so instances
//! are laid out in draw order and every draw's `first_instance` is the number
//! of instances drawn before it.

use crate::assets::{IndexSetId, TextureId, VertexSetId};
use crate::recorder::DrawRecorder;
use crate::uniforms::{Instance, InstanceBlock, UniformData};
use ash::vk;
use glam::Vec2;
use sprig_core::{ClipSpace, Color};
use sprig_gpu::DescriptorGroupId;
use std::collections::BTreeMap;

/// Vertices emitted per quad instance.
const QUAD_VERTICES: u32 = 6;

/// Pipeline state a batch binds before drawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineBinding {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Axis-aligned, untextured rectangles. Corners are generated in the vertex
/// shader, so there are no vertex or index buffers.
#[derive(Debug)]
pub struct QuadBatch {
    block: InstanceBlock,
    clip: ClipSpace,
    group: DescriptorGroupId,
    uniform_set: vk::DescriptorSet,
    binding: PipelineBinding,
    instances: Vec<Instance>,
}

impl QuadBatch {
    pub fn new(
        capacity: usize,
        clip: ClipSpace,
        group: DescriptorGroupId,
        uniform_set: vk::DescriptorSet,
        binding: PipelineBinding,
    ) -> Self {
        Self {
            block: InstanceBlock::new(capacity),
            clip,
            group,
            uniform_set,
            binding,
            instances: Vec::with_capacity(capacity),
        }
    }

    /// Queue a quad centered on `position` with full `size`, both in pixels.
    ///
    /// Returns `false` and drops the quad when the batch is full.
    pub fn add(&mut self, position: Vec2, size: Vec2, color: Color) -> bool {
        if self.instances.len() >= self.block.capacity() {
            return false;
        }
        self.instances.push(Instance {
            position_size: self.clip.position_and_size(position, size),
            color: color.to_vec4(),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    fn uniform_data(&self) -> UniformData {
        let mut data = UniformData::default();
        self.instances.iter().for_each(|i| data.push(i));
        data
    }

    fn record(&self, recorder: &mut dyn DrawRecorder) {
        if self.instances.is_empty() {
            return;
        }
        recorder.bind_pipeline(self.binding.pipeline);
        recorder.bind_descriptor_sets(self.binding.layout, &[self.uniform_set]);
        recorder.draw(QUAD_VERTICES, self.instances.len() as u32, 0, 0);
    }

    fn reset(&mut self) {
        self.instances.clear();
    }
}

/// Identity of one draw call in a [`ShapeBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey {
    pub vertices: VertexSetId,
    pub indices: IndexSetId,
    pub texture: Option<TextureId>,
}

/// Buffers and texture set a shape key resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeResources {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub texture_set: Option<vk::DescriptorSet>,
}

#[derive(Debug)]
struct ShapeEntry {
    resources: ShapeResources,
    instances: Vec<Instance>,
}

/// Indexed geometry from the asset library, optionally textured.
#[derive(Debug)]
pub struct ShapeBatch {
    block: InstanceBlock,
    clip: ClipSpace,
    group: DescriptorGroupId,
    uniform_set: vk::DescriptorSet,
    plain: PipelineBinding,
    textured: PipelineBinding,
    entries: BTreeMap<ShapeKey, ShapeEntry>,
    total: usize,
}

impl ShapeBatch {
    pub fn new(
        capacity: usize,
        clip: ClipSpace,
        group: DescriptorGroupId,
        uniform_set: vk::DescriptorSet,
        plain: PipelineBinding,
        textured: PipelineBinding,
    ) -> Self {
        Self {
            block: InstanceBlock::new(capacity),
            clip,
            group,
            uniform_set,
            plain,
            textured,
            entries: BTreeMap::new(),
            total: 0,
        }
    }

    /// Queue one instance of `key`.
    ///
    /// The capacity is shared by all keys since they share one uniform block.
    /// Returns `false` and drops the instance when the batch is full.
    pub fn add(
        &mut self,
        key: ShapeKey,
        resources: ShapeResources,
        position: Vec2,
        size: Vec2,
        color: Color,
    ) -> bool {
        if self.total >= self.block.capacity() {
            return false;
        }
        let instance = Instance {
            position_size: self.clip.position_and_size(position, size),
            color: color.to_vec4(),
        };
        self.entries
            .entry(key)
            .or_insert_with(|| ShapeEntry {
                resources,
                instances: Vec::new(),
            })
            .instances
            .push(instance);
        self.total += 1;
        true
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of distinct keys queued this frame.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    fn uniform_data(&self) -> UniformData {
        let mut data = UniformData::default();
        for entry in self.entries.values() {
            entry.instances.iter().for_each(|i| data.push(i));
        }
        data
    }

    fn record(&self, recorder: &mut dyn DrawRecorder) {
        let mut first_instance = 0u32;
        for entry in self.entries.values() {
            let count = entry.instances.len() as u32;
            let resources = &entry.resources;

            match resources.texture_set {
                Some(texture_set) => {
                    recorder.bind_pipeline(self.textured.pipeline);
                    recorder.bind_descriptor_sets(
                        self.textured.layout,
                        &[self.uniform_set, texture_set],
                    );
                }
                None => {
                    recorder.bind_pipeline(self.plain.pipeline);
                    recorder.bind_descriptor_sets(self.plain.layout, &[self.uniform_set]);
                }
            }
            recorder.bind_vertex_buffer(resources.vertex_buffer);
            recorder.bind_index_buffer(resources.index_buffer);
            recorder.draw_indexed(resources.index_count, count, 0, 0, first_instance);

            first_instance += count;
        }
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}

/// The closed set of batch kinds the frame orchestrator drives.
#[derive(Debug)]
pub enum Renderable {
    Quads(QuadBatch),
    Shapes(ShapeBatch),
}

impl Renderable {
    /// Descriptor group holding this batch's uniform block.
    pub fn group(&self) -> DescriptorGroupId {
        match self {
            Self::Quads(batch) => batch.group,
            Self::Shapes(batch) => batch.group,
        }
    }

    pub fn block(&self) -> InstanceBlock {
        match self {
            Self::Quads(batch) => batch.block,
            Self::Shapes(batch) => batch.block,
        }
    }

    /// Instances queued this frame.
    pub fn len(&self) -> usize {
        match self {
            Self::Quads(batch) => batch.len(),
            Self::Shapes(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Uniform contents matching the order [`record`](Self::record) draws in.
    pub fn uniform_data(&self) -> UniformData {
        match self {
            Self::Quads(batch) => batch.uniform_data(),
            Self::Shapes(batch) => batch.uniform_data(),
        }
    }

    /// Emit this frame's draws.
    pub fn record(&self, recorder: &mut dyn DrawRecorder) {
        match self {
            Self::Quads(batch) => batch.record(recorder),
            Self::Shapes(batch) => batch.record(recorder),
        }
    }

    /// Drop everything queued. Call only after the frame has been recorded.
    pub fn reset(&mut self) {
        match self {
            Self::Quads(batch) => batch.reset(),
            Self::Shapes(batch) => batch.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::tests::{Call, CallLog};
    use approx::assert_relative_eq;
    use ash::vk::Handle;
    use glam::Vec4;
    use sprig_core::WindowExtent;

    fn clip() -> ClipSpace {
        ClipSpace::new(WindowExtent::new(1280, 768))
    }

    fn binding(raw: u64) -> PipelineBinding {
        PipelineBinding {
            pipeline: vk::Pipeline::from_raw(raw),
            layout: vk::PipelineLayout::from_raw(raw + 100),
        }
    }

    fn quads(capacity: usize) -> QuadBatch {
        QuadBatch::new(
            capacity,
            clip(),
            DescriptorGroupId(0),
            vk::DescriptorSet::from_raw(7),
            binding(1),
        )
    }

    fn shapes(capacity: usize) -> ShapeBatch {
        ShapeBatch::new(
            capacity,
            clip(),
            DescriptorGroupId(1),
            vk::DescriptorSet::from_raw(8),
            binding(2),
            binding(3),
        )
    }

    fn key(vertices: u32, indices: u32, texture: Option<u32>) -> ShapeKey {
        ShapeKey {
            vertices: VertexSetId(vertices),
            indices: IndexSetId(indices),
            texture: texture.map(TextureId),
        }
    }

    fn resources(raw: u64, textured: bool) -> ShapeResources {
        ShapeResources {
            vertex_buffer: vk::Buffer::from_raw(raw),
            index_buffer: vk::Buffer::from_raw(raw + 1),
            index_count: 6,
            texture_set: textured.then(|| vk::DescriptorSet::from_raw(raw + 2)),
        }
    }

    #[test]
    fn center_quad_on_1280x768() {
        let mut batch = quads(sprig_shaders::QUAD_CAPACITY);
        assert!(batch.add(Vec2::new(640.0, 384.0), Vec2::splat(64.0), Color::RED));

        let instance = batch.instances()[0];
        assert_relative_eq!(instance.position_size.x, 0.0);
        assert_relative_eq!(instance.position_size.y, 0.0);
        assert_relative_eq!(instance.position_size.z, 0.05);
        assert_relative_eq!(instance.position_size.w, 64.0 / 768.0);
        assert_eq!(instance.color, Vec4::new(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn reset_then_record_draws_nothing() {
        let mut quad_batch = Renderable::Quads(quads(8));
        let mut shape_batch = Renderable::Shapes(shapes(8));
        if let Renderable::Quads(batch) = &mut quad_batch {
            batch.add(Vec2::ZERO, Vec2::ONE, Color::WHITE);
        }
        if let Renderable::Shapes(batch) = &mut shape_batch {
            batch.add(key(0, 0, None), resources(10, false), Vec2::ZERO, Vec2::ONE, Color::WHITE);
        }

        for batch in [&mut quad_batch, &mut shape_batch] {
            batch.reset();
            let mut log = CallLog::default();
            batch.record(&mut log);
            assert!(log.draws().is_empty());
            assert!(batch.is_empty());
        }
    }

    #[test]
    fn quads_beyond_capacity_are_dropped() {
        let mut batch = quads(4);
        let accepted = (0..10)
            .filter(|&i| batch.add(Vec2::splat(i as f32), Vec2::ONE, Color::BLUE))
            .count();
        assert_eq!(accepted, 4);
        assert_eq!(batch.len(), 4);

        let mut log = CallLog::default();
        Renderable::Quads(batch).record(&mut log);
        assert_eq!(
            log.calls.last(),
            Some(&Call::Draw {
                vertices: 6,
                instances: 4,
                first_instance: 0
            })
        );
    }

    #[test]
    fn shape_capacity_is_shared_across_keys() {
        let mut batch = shapes(5);
        let mut add = |k: ShapeKey, raw: u64| {
            batch.add(k, resources(raw, false), Vec2::ZERO, Vec2::ONE, Color::WHITE)
        };

        let first = (0..3).filter(|_| add(key(0, 0, None), 10)).count();
        let second = (0..5).filter(|_| add(key(1, 1, None), 20)).count();
        assert_eq!((first, second), (3, 2));
        assert!(!add(key(0, 0, None), 10));
        assert_eq!(batch.len(), 5);
    }

    #[test]
    fn one_draw_per_key_with_running_offsets() {
        let mut batch = shapes(sprig_shaders::SHAPE_CAPACITY);
        let counts = [(key(0, 0, None), 3), (key(1, 1, None), 5), (key(0, 0, Some(0)), 2)];
        for (index, &(k, n)) in counts.iter().enumerate() {
            let res = resources(10 * (index as u64 + 1), k.texture.is_some());
            for _ in 0..n {
                batch.add(k, res, Vec2::ZERO, Vec2::ONE, Color::GREEN);
            }
        }
        assert_eq!(batch.key_count(), 3);

        let renderable = Renderable::Shapes(batch);
        let mut log = CallLog::default();
        renderable.record(&mut log);

        let draws = log.draws();
        assert_eq!(draws.len(), 3);

        let mut expected_offset = 0;
        for &(instances, first_instance) in &draws {
            assert_eq!(first_instance, expected_offset);
            expected_offset += instances;
        }
        assert_eq!(expected_offset, 10);

        let mut sorted: Vec<u32> = draws.iter().map(|d| d.0).collect();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![2, 3, 5]);

        // Uniform slots follow draw order
        assert_eq!(renderable.uniform_data().positions.len(), 10);
    }

    #[test]
    fn textured_keys_bind_sampler_set() {
        let mut batch = shapes(16);
        batch.add(key(0, 0, Some(3)), resources(40, true), Vec2::ZERO, Vec2::ONE, Color::BLACK);

        let mut log = CallLog::default();
        Renderable::Shapes(batch).record(&mut log);

        assert_eq!(log.calls[0], Call::Pipeline(binding(3).pipeline));
        assert_eq!(
            log.calls[1],
            Call::Sets(
                binding(3).layout,
                vec![vk::DescriptorSet::from_raw(8), vk::DescriptorSet::from_raw(42)]
            )
        );
        assert_eq!(log.calls[2], Call::VertexBuffer(vk::Buffer::from_raw(40)));
        assert_eq!(log.calls[3], Call::IndexBuffer(vk::Buffer::from_raw(41)));
    }
}
