//! The draw commands batches emit, behind a trait so batches can be recorded
//! into a Vulkan command buffer or into a test log.

use ash::vk;

/// Sink for the draw commands of one secondary command buffer.
pub trait DrawRecorder {
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Bind `sets` starting at set 0 of `layout`.
    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]);

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);

    /// Bind a `u32` index buffer.
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}

/// Records into a command buffer that is in the recording state.
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    /// Wrap `cmd`.
    ///
    /// # Safety
    /// `cmd` must be recording, inside a render pass, for as long as the
    /// recorder is used.
    pub unsafe fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }
}

impl DrawRecorder for CommandRecorder<'_> {
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        // SAFETY: guaranteed by the constructor's contract
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
        // SAFETY: as above
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            );
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        // SAFETY: as above
        unsafe { self.device.cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[0]) };
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        // SAFETY: as above
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        // SAFETY: as above
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        // SAFETY: as above
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// One recorded command.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        Pipeline(vk::Pipeline),
        Sets(vk::PipelineLayout, Vec<vk::DescriptorSet>),
        VertexBuffer(vk::Buffer),
        IndexBuffer(vk::Buffer),
        Draw {
            vertices: u32,
            instances: u32,
            first_instance: u32,
        },
        DrawIndexed {
            indices: u32,
            instances: u32,
            first_instance: u32,
        },
    }

    /// Recorder that keeps every call.
    #[derive(Default)]
    pub(crate) struct CallLog {
        pub calls: Vec<Call>,
    }

    impl CallLog {
        /// `(instance_count, first_instance)` of every draw, in order.
        pub fn draws(&self) -> Vec<(u32, u32)> {
            self.calls
                .iter()
                .filter_map(|call| match *call {
                    Call::Draw {
                        instances,
                        first_instance,
                        ..
                    }
                    | Call::DrawIndexed {
                        instances,
                        first_instance,
                        ..
                    } => Some((instances, first_instance)),
                    _ => None,
                })
                .collect()
        }
    }

    impl DrawRecorder for CallLog {
        fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.calls.push(Call::Pipeline(pipeline));
        }

        fn bind_descriptor_sets(&mut self, layout: vk::PipelineLayout, sets: &[vk::DescriptorSet]) {
            self.calls.push(Call::Sets(layout, sets.to_vec()));
        }

        fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
            self.calls.push(Call::VertexBuffer(buffer));
        }

        fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
            self.calls.push(Call::IndexBuffer(buffer));
        }

        fn draw(&mut self, vertex_count: u32, instance_count: u32, _: u32, first_instance: u32) {
            self.calls.push(Call::Draw {
                vertices: vertex_count,
                instances: instance_count,
                first_instance,
            });
        }

        fn draw_indexed(
            &mut self,
            index_count: u32,
            instance_count: u32,
            _: u32,
            _: i32,
            first_instance: u32,
        ) {
            self.calls.push(Call::DrawIndexed {
                indices: index_count,
                instances: instance_count,
                first_instance,
            });
        }
    }
}
