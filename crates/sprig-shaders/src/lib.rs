//! SPIR-V for the built-in Sprig pipelines.
//!
//! The GLSL sources under `shaders/` are compiled at build time with shaderc.
//! The uniform array capacity is baked in as the `CAPACITY` macro. The same
//! values are exported here as [`QUAD_CAPACITY`] and [`SHAPE_CAPACITY`].

use std::path::Path;

include!(concat!(env!("OUT_DIR"), "/capacity.rs"));

/// Every compiled stage, as `<pipeline>.<stage>.spv` file names.
pub const STAGES: [&str; 6] = [
    "quad.vert.spv",
    "quad.frag.spv",
    "shape.vert.spv",
    "shape.frag.spv",
    "shape_textured.vert.spv",
    "shape_textured.frag.spv",
];

/// Directory holding the compiled stages.
pub fn shader_dir() -> &'static Path {
    Path::new(env!("OUT_DIR"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn every_stage_is_spirv() {
        for stage in STAGES {
            let bytes = std::fs::read(shader_dir().join(stage)).unwrap();
            assert_eq!(bytes.len() % 4, 0, "{stage} is not word aligned");
            let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            assert_eq!(magic, SPIRV_MAGIC, "{stage} has no SPIR-V header");
        }
    }
}
