//! Frame orchestration.
//!
//! One frame runs strictly in sequence and fully drains before the next one
//! starts:
//!
//! 1. wait for the retire gate of the previous frame
//! 2. acquire a swapchain image
//! 3. write every batch's uniforms
//! 4. record one secondary command buffer per batch
//! 5. record the primary buffer: render pass, execute secondaries
//! 6. submit, waiting for the image at color-attachment output
//! 7. present
//! 8. wait for the queue to go idle
//! 9. reset every batch
//!
//! With a single frame in flight, one uniform buffer and one set of command
//! buffers per batch are enough. Pipelining frames would need both duplicated
//! per frame in flight.
//!
//! A failure between acquire and present leaves the image-available
//! semaphore signaled with no submission waiting on it. The frame is then
//! reported as [`RenderError::FrameAbandoned`] and the orchestrator refuses
//! every later frame.

use crate::batch::Renderable;
use crate::error::{RenderError, Result};
use crate::recorder::{CommandRecorder, DrawRecorder};
use ash::vk;
use sprig_core::Color;
use sprig_gpu::command::{
    begin_command_buffer, begin_secondary_command_buffer, end_command_buffer,
    submit_command_buffers,
};
use sprig_gpu::{DescriptorGroupId, DescriptorRegistry, Diagnostics, GpuContext, GpuError};

/// GPU side of the frame protocol.
pub trait FrameTarget {
    /// Block until the previously submitted frame has retired.
    fn wait_for_retire(&mut self) -> Result<()>;

    /// Acquire the next swapchain image and return its index.
    fn acquire_image(&mut self) -> Result<u32>;

    /// Copy `bytes` into `group`'s uniform buffer at `offset`.
    fn write_uniforms(&mut self, group: DescriptorGroupId, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Record secondary buffer `slot` through `record`.
    fn record_secondary(
        &mut self,
        slot: usize,
        record: &mut dyn FnMut(&mut dyn DrawRecorder),
    ) -> Result<()>;

    /// Record the primary buffer: render pass on `image_index` running
    /// secondaries `0..secondaries`.
    fn record_primary(&mut self, image_index: u32, secondaries: usize) -> Result<()>;

    /// Submit the primary buffer.
    fn submit(&mut self) -> Result<()>;

    /// Present `image_index` once rendering has finished.
    fn present(&mut self, image_index: u32) -> Result<()>;

    /// Block until the presenting queue is idle.
    fn wait_present_idle(&mut self) -> Result<()>;
}

/// Owner of the batches; drives one frame at a time through a [`FrameTarget`].
#[derive(Debug, Default)]
pub struct FrameOrchestrator {
    batches: Vec<Renderable>,
    frames: u64,
    halted: bool,
}

impl FrameOrchestrator {
    pub fn new(batches: Vec<Renderable>) -> Self {
        Self {
            batches,
            frames: 0,
            halted: false,
        }
    }

    pub fn batches(&self) -> &[Renderable] {
        &self.batches
    }

    pub fn batches_mut(&mut self) -> &mut [Renderable] {
        &mut self.batches
    }

    /// Number of secondary command buffers a frame needs.
    pub fn secondary_count(&self) -> usize {
        self.batches.len()
    }

    /// Frames drawn so far.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Whether an abandoned frame stopped the loop.
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Run one frame. Batches are reset afterwards, also when the frame fails.
    pub fn draw(&mut self, target: &mut impl FrameTarget) -> Result<()> {
        let result = if self.halted {
            Err(GpuError::InvalidState(
                "Frame loop halted after an abandoned frame".to_string(),
            )
            .into())
        } else {
            self.run(target)
        };
        for batch in &mut self.batches {
            batch.reset();
        }
        match &result {
            Ok(()) => self.frames += 1,
            Err(e) if e.is_fatal() => self.halted = true,
            Err(_) => {}
        }
        result
    }

    fn run(&self, target: &mut impl FrameTarget) -> Result<()> {
        target.wait_for_retire()?;
        let image_index = target.acquire_image()?;

        self.render(target, image_index)
            .map_err(|source| RenderError::FrameAbandoned {
                image_index,
                source: Box::new(source),
            })?;

        target.present(image_index)?;
        target.wait_present_idle()
    }

    fn render(&self, target: &mut impl FrameTarget, image_index: u32) -> Result<()> {
        for batch in &self.batches {
            if batch.is_empty() {
                continue;
            }
            let data = batch.uniform_data();
            for (offset, bytes) in data.writes(batch.block()) {
                target.write_uniforms(batch.group(), offset, bytes)?;
            }
        }

        for (slot, batch) in self.batches.iter().enumerate() {
            target.record_secondary(slot, &mut |recorder: &mut dyn DrawRecorder| {
                batch.record(recorder);
            })?;
        }

        target.record_primary(image_index, self.batches.len())?;
        target.submit()
    }
}

/// [`FrameTarget`] over a presenting [`GpuContext`].
pub struct VulkanFrameTarget<'a> {
    gpu: &'a GpuContext,
    descriptors: &'a DescriptorRegistry,
    secondaries: &'a [vk::CommandBuffer],
    clear_color: Color,
    diag: &'a Diagnostics,
}

impl<'a> VulkanFrameTarget<'a> {
    pub fn new(
        gpu: &'a GpuContext,
        descriptors: &'a DescriptorRegistry,
        secondaries: &'a [vk::CommandBuffer],
        clear_color: Color,
        diag: &'a Diagnostics,
    ) -> Self {
        Self {
            gpu,
            descriptors,
            secondaries,
            clear_color,
            diag,
        }
    }

    fn secondary(&self, slot: usize) -> Result<vk::CommandBuffer> {
        self.secondaries.get(slot).copied().ok_or_else(|| {
            GpuError::InvalidState(format!(
                "Secondary slot {slot} out of {} allocated",
                self.secondaries.len()
            ))
            .into()
        })
    }
}

impl FrameTarget for VulkanFrameTarget<'_> {
    fn wait_for_retire(&mut self) -> Result<()> {
        // SAFETY: the fence belongs to this device
        unsafe { self.gpu.frame_sync().wait(self.gpu.device())? };
        Ok(())
    }

    fn acquire_image(&mut self) -> Result<u32> {
        let sync = self.gpu.frame_sync();
        // SAFETY: the previous frame retired, so the semaphore is unsignaled
        let (index, suboptimal) =
            unsafe { self.gpu.swapchain().acquire_next_image(sync.image_available)? };
        if suboptimal {
            self.diag
                .in_scope(|| tracing::debug!(index, "Acquired image from a suboptimal swapchain"));
        }
        Ok(index)
    }

    fn write_uniforms(&mut self, group: DescriptorGroupId, offset: u64, bytes: &[u8]) -> Result<()> {
        self.descriptors.update_uniform(group, offset, bytes)?;
        Ok(())
    }

    fn record_secondary(
        &mut self,
        slot: usize,
        record: &mut dyn FnMut(&mut dyn DrawRecorder),
    ) -> Result<()> {
        let cmd = self.secondary(slot)?;
        let device = self.gpu.device();
        let render_pass = self.gpu.render_pass();

        // SAFETY: the previous frame retired, so the buffer is not pending
        unsafe {
            begin_secondary_command_buffer(device, cmd, render_pass.render_pass, render_pass.extent)?;
            let mut recorder = CommandRecorder::new(device, cmd);
            record(&mut recorder);
            end_command_buffer(device, cmd)?;
        }
        Ok(())
    }

    fn record_primary(&mut self, image_index: u32, secondaries: usize) -> Result<()> {
        let device = self.gpu.device();
        let cmd = self.gpu.primary_command_buffer();
        let render_pass = self.gpu.render_pass();
        let framebuffer = render_pass.framebuffer(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("No framebuffer for image {image_index}"))
        })?;
        let executed = self.secondaries.get(..secondaries).ok_or_else(|| {
            GpuError::InvalidState(format!("{secondaries} secondaries requested"))
        })?;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color.to_array(),
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_pass.render_area())
            .clear_values(&clear_values);

        // SAFETY: the previous frame retired; secondaries were recorded for this pass
        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            device.cmd_begin_render_pass(
                cmd,
                &begin_info,
                vk::SubpassContents::SECONDARY_COMMAND_BUFFERS,
            );
            if !executed.is_empty() {
                device.cmd_execute_commands(cmd, executed);
            }
            device.cmd_end_render_pass(cmd);
            end_command_buffer(device, cmd)?;
        }
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let device = self.gpu.device();
        let sync = self.gpu.frame_sync();

        // SAFETY: the fence was waited on at the start of the frame
        unsafe {
            sync.reset(device)?;
            submit_command_buffers(
                device,
                self.gpu.queue(),
                &[self.gpu.primary_command_buffer()],
                &[sync.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[sync.render_finished],
                sync.in_flight,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<()> {
        let sync = self.gpu.frame_sync();
        // SAFETY: the queue was chosen for presenting to this surface
        let suboptimal = unsafe {
            self.gpu
                .swapchain()
                .present(self.gpu.queue(), image_index, &[sync.render_finished])?
        };
        if suboptimal {
            self.diag
                .in_scope(|| tracing::debug!(image_index, "Presented to a suboptimal swapchain"));
        }
        Ok(())
    }

    fn wait_present_idle(&mut self) -> Result<()> {
        // SAFETY: the queue belongs to this device
        let idle = unsafe { self.gpu.device().queue_wait_idle(self.gpu.queue()) };
        self.diag.check("queue_wait_idle", idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{PipelineBinding, QuadBatch, ShapeBatch, ShapeKey, ShapeResources};
    use crate::assets::{IndexSetId, VertexSetId};
    use crate::recorder::tests::CallLog;
    use ash::vk::Handle;
    use glam::Vec2;
    use sprig_core::{ClipSpace, WindowExtent};

    #[derive(Debug, Clone, PartialEq)]
    enum Step {
        Wait,
        Acquire,
        Uniforms(DescriptorGroupId, u64, usize),
        Secondary(usize, Vec<(u32, u32)>),
        Primary(u32, usize),
        Submit,
        Present(u32),
        Idle,
    }

    #[derive(Default)]
    struct FakeTarget {
        steps: Vec<Step>,
        fail_acquire: bool,
        fail_submit: bool,
    }

    impl FrameTarget for FakeTarget {
        fn wait_for_retire(&mut self) -> Result<()> {
            self.steps.push(Step::Wait);
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<u32> {
            self.steps.push(Step::Acquire);
            if self.fail_acquire {
                return Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).into());
            }
            Ok(2)
        }

        fn write_uniforms(
            &mut self,
            group: DescriptorGroupId,
            offset: u64,
            bytes: &[u8],
        ) -> Result<()> {
            self.steps.push(Step::Uniforms(group, offset, bytes.len()));
            Ok(())
        }

        fn record_secondary(
            &mut self,
            slot: usize,
            record: &mut dyn FnMut(&mut dyn DrawRecorder),
        ) -> Result<()> {
            let mut log = CallLog::default();
            record(&mut log);
            self.steps.push(Step::Secondary(slot, log.draws()));
            Ok(())
        }

        fn record_primary(&mut self, image_index: u32, secondaries: usize) -> Result<()> {
            self.steps.push(Step::Primary(image_index, secondaries));
            Ok(())
        }

        fn submit(&mut self) -> Result<()> {
            self.steps.push(Step::Submit);
            if self.fail_submit {
                return Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).into());
            }
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<()> {
            self.steps.push(Step::Present(image_index));
            Ok(())
        }

        fn wait_present_idle(&mut self) -> Result<()> {
            self.steps.push(Step::Idle);
            Ok(())
        }
    }

    fn orchestrator() -> FrameOrchestrator {
        let clip = ClipSpace::new(WindowExtent::new(1280, 768));
        let quads = QuadBatch::new(
            4,
            clip,
            DescriptorGroupId(0),
            vk::DescriptorSet::from_raw(1),
            PipelineBinding::default(),
        );
        let shapes = ShapeBatch::new(
            8,
            clip,
            DescriptorGroupId(1),
            vk::DescriptorSet::from_raw(2),
            PipelineBinding::default(),
            PipelineBinding::default(),
        );
        FrameOrchestrator::new(vec![Renderable::Quads(quads), Renderable::Shapes(shapes)])
    }

    fn queue_some(frame: &mut FrameOrchestrator) {
        for batch in frame.batches_mut() {
            match batch {
                Renderable::Quads(quads) => {
                    quads.add(Vec2::new(640.0, 384.0), Vec2::splat(64.0), Color::RED);
                    quads.add(Vec2::new(10.0, 10.0), Vec2::splat(4.0), Color::GREEN);
                }
                Renderable::Shapes(shapes) => {
                    let key = ShapeKey {
                        vertices: VertexSetId(0),
                        indices: IndexSetId(0),
                        texture: None,
                    };
                    shapes.add(
                        key,
                        ShapeResources::default(),
                        Vec2::ZERO,
                        Vec2::ONE,
                        Color::BLUE,
                    );
                }
            }
        }
    }

    #[test]
    fn frame_runs_in_protocol_order() {
        let mut frame = orchestrator();
        queue_some(&mut frame);

        let mut target = FakeTarget::default();
        frame.draw(&mut target).unwrap();

        assert_eq!(
            target.steps,
            vec![
                Step::Wait,
                Step::Acquire,
                Step::Uniforms(DescriptorGroupId(0), 0, 32),
                Step::Uniforms(DescriptorGroupId(0), 64, 32),
                Step::Uniforms(DescriptorGroupId(1), 0, 16),
                Step::Uniforms(DescriptorGroupId(1), 128, 16),
                Step::Secondary(0, vec![(2, 0)]),
                Step::Secondary(1, vec![(1, 0)]),
                Step::Primary(2, 2),
                Step::Submit,
                Step::Present(2),
                Step::Idle,
            ]
        );
        assert_eq!(frame.frame_count(), 1);
        assert!(frame.batches().iter().all(Renderable::is_empty));
    }

    #[test]
    fn empty_frame_still_presents() {
        let mut frame = orchestrator();
        let mut target = FakeTarget::default();
        frame.draw(&mut target).unwrap();

        assert!(!target
            .steps
            .iter()
            .any(|s| matches!(s, Step::Uniforms(..))));
        assert!(target.steps.contains(&Step::Secondary(0, vec![])));
        assert_eq!(target.steps.last(), Some(&Step::Idle));
    }

    #[test]
    fn failed_frame_resets_batches() {
        let mut frame = orchestrator();
        queue_some(&mut frame);

        let mut target = FakeTarget {
            fail_acquire: true,
            ..FakeTarget::default()
        };
        let result = frame.draw(&mut target);

        assert!(matches!(result, Err(RenderError::Gpu(GpuError::Vulkan(_)))));
        assert_eq!(target.steps, vec![Step::Wait, Step::Acquire]);
        assert!(frame.batches().iter().all(Renderable::is_empty));
        assert_eq!(frame.frame_count(), 0);
    }

    #[test]
    fn failure_after_acquire_halts_the_loop() {
        let mut frame = orchestrator();
        queue_some(&mut frame);

        let mut target = FakeTarget {
            fail_submit: true,
            ..FakeTarget::default()
        };
        let result = frame.draw(&mut target);

        match result {
            Err(RenderError::FrameAbandoned {
                image_index,
                source,
            }) => {
                assert_eq!(image_index, 2);
                assert!(matches!(*source, RenderError::Gpu(GpuError::Vulkan(_))));
            }
            other => panic!("expected an abandoned frame, got {other:?}"),
        }
        assert!(!target.steps.iter().any(|s| matches!(s, Step::Present(_))));
        assert!(frame.is_halted());
        assert!(frame.batches().iter().all(Renderable::is_empty));

        // no second acquire on the still-signaled semaphore
        let mut next = FakeTarget::default();
        assert!(frame.draw(&mut next).is_err());
        assert!(next.steps.is_empty());
        assert_eq!(frame.frame_count(), 0);
    }

    #[test]
    fn failed_acquire_is_retryable() {
        let mut frame = orchestrator();
        let mut failing = FakeTarget {
            fail_acquire: true,
            ..FakeTarget::default()
        };
        assert!(frame.draw(&mut failing).is_err());
        assert!(!frame.is_halted());

        frame.draw(&mut FakeTarget::default()).unwrap();
        assert_eq!(frame.frame_count(), 1);
    }
}
