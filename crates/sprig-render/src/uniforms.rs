//! Byte layout of the per-instance uniform block.
//!
//! The shaders declare, for a batch capacity `N`:
//!
//! ```glsl
//! layout(set = 0, binding = 0) uniform Instances {
//!     vec4 position_size[N];
//!     vec4 color[N];
//! };
//! ```
//!
//! Under std140 every `vec4` array element has a 16-byte stride, so colors
//! start at byte `16 * N`. `N` must match the constant compiled into the
//! shader; nothing checks it at runtime.

use glam::Vec4;

const VEC4_STRIDE: u64 = 16;

/// Uniform block geometry for a given capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceBlock {
    capacity: usize,
}

impl InstanceBlock {
    pub const fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Maximum number of instances per frame.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte offset of `position_size[0]`.
    pub const fn positions_offset(&self) -> u64 {
        0
    }

    /// Byte offset of `color[0]`.
    pub const fn colors_offset(&self) -> u64 {
        VEC4_STRIDE * self.capacity as u64
    }

    /// Size of the whole block.
    pub const fn size(&self) -> u64 {
        2 * VEC4_STRIDE * self.capacity as u64
    }
}

/// Per-instance values, in clip space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instance {
    /// `(x, y, half_width, half_height)`
    pub position_size: Vec4,
    pub color: Vec4,
}

/// Uniform contents of one frame, in draw order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UniformData {
    pub positions: Vec<Vec4>,
    pub colors: Vec<Vec4>,
}

impl UniformData {
    pub fn push(&mut self, instance: &Instance) {
        self.positions.push(instance.position_size);
        self.colors.push(instance.color);
    }

    /// `(offset, bytes)` writes that place this data into `block`.
    pub fn writes(&self, block: InstanceBlock) -> [(u64, &[u8]); 2] {
        [
            (
                block.positions_offset(),
                bytemuck::cast_slice(&self.positions),
            ),
            (block.colors_offset(), bytemuck::cast_slice(&self.colors)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std140_offsets() {
        let block = InstanceBlock::new(1000);
        assert_eq!(block.colors_offset(), 16_000);
        assert_eq!(block.size(), 32_000);
    }

    #[test]
    fn writes_land_at_array_starts() {
        let block = InstanceBlock::new(4);
        let mut data = UniformData::default();
        data.push(&Instance {
            position_size: Vec4::new(0.0, 0.0, 0.5, 0.5),
            color: Vec4::new(1.0, 0.0, 0.0, 1.0),
        });

        let [(pos_offset, pos), (color_offset, color)] = data.writes(block);
        assert_eq!(pos_offset, 0);
        assert_eq!(color_offset, 64);
        assert_eq!(pos.len(), 16);
        assert_eq!(&color[..4], &1.0f32.to_ne_bytes());
    }
}
