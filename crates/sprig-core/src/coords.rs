//! Window pixel space to clip space.
//!
//! Scenes describe instances in window pixels with the origin at the top-left
//! corner. Shaders consume clip-space coordinates in `[-1, 1]`. This is the only
//! place the two are reconciled.

use crate::types::WindowExtent;
use glam::{Vec2, Vec4};

/// Pixel to clip-space transform for a fixed window extent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipSpace {
    extent: Vec2,
}

impl ClipSpace {
    /// Create a transform for the given window extent.
    ///
    /// Zero dimensions are clamped to one pixel.
    pub fn new(extent: WindowExtent) -> Self {
        Self {
            extent: Vec2::new(extent.width.max(1) as f32, extent.height.max(1) as f32),
        }
    }

    /// Window extent in pixels.
    #[inline]
    pub const fn extent(&self) -> Vec2 {
        self.extent
    }

    /// Map a pixel position to clip space: `2 * p / extent - 1`.
    #[inline]
    pub fn position(&self, position: Vec2) -> Vec2 {
        2.0 * position / self.extent - Vec2::ONE
    }

    /// Map a pixel size to clip space: `s / extent`.
    ///
    /// The result is the half-extent of the instance in clip units, which is what
    /// the vertex shaders scale their `[-1, 1]` model coordinates by.
    #[inline]
    pub fn size(&self, size: Vec2) -> Vec2 {
        size / self.extent
    }

    /// Pack a transformed position and size into the `vec4` the shaders read.
    #[inline]
    pub fn position_and_size(&self, position: Vec2, size: Vec2) -> Vec4 {
        let p = self.position(position);
        let s = self.size(size);
        Vec4::new(p.x, p.y, s.x, s.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn center_maps_to_origin() {
        let clip = ClipSpace::new(WindowExtent::new(1280, 768));
        let p = clip.position(Vec2::new(640.0, 384.0));
        assert_eq!(p, Vec2::ZERO);
    }

    #[test]
    fn size_is_divided_by_extent() {
        let clip = ClipSpace::new(WindowExtent::new(1280, 768));
        let s = clip.size(Vec2::new(64.0, 64.0));
        assert_relative_eq!(s.x, 0.05);
        assert_relative_eq!(s.y, 64.0 / 768.0);
        assert_relative_eq!(s.y, 0.083_333_33, epsilon = 1e-6);
    }

    #[test]
    fn corners_map_to_clip_bounds() {
        let clip = ClipSpace::new(WindowExtent::new(800, 600));
        assert_eq!(clip.position(Vec2::ZERO), Vec2::new(-1.0, -1.0));
        assert_eq!(clip.position(Vec2::new(800.0, 600.0)), Vec2::new(1.0, 1.0));
    }

    #[test]
    fn repeated_calls_are_identical() {
        let clip = ClipSpace::new(WindowExtent::new(1280, 768));
        let first = clip.position_and_size(Vec2::new(123.5, 77.25), Vec2::new(31.0, 9.0));
        for _ in 0..100 {
            let again = clip.position_and_size(Vec2::new(123.5, 77.25), Vec2::new(31.0, 9.0));
            assert_eq!(first.to_array(), again.to_array());
        }
    }

    #[test]
    fn zero_extent_is_clamped() {
        let clip = ClipSpace::new(WindowExtent::new(0, 0));
        assert_eq!(clip.extent(), Vec2::ONE);
        assert!(clip.size(Vec2::splat(2.0)).is_finite());
    }
}
