//! Build script to compile the GLSL shaders to SPIR-V.
//!
//! Every stage is written to `$OUT_DIR/<name>.spv`, which is the directory
//! `sprig_shaders::shader_dir()` points at. The capacities the stages are
//! compiled with go to `$OUT_DIR/capacity.rs` for `lib.rs` to include.

use shaderc::{Compiler, ShaderKind};
use std::env;
use std::fs;
use std::path::Path;

/// Instance capacity of the quad uniform block.
const QUAD_CAPACITY: usize = 1000;
/// Instance capacity of the shape uniform block.
const SHAPE_CAPACITY: usize = 2048;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let shader_dir = Path::new("shaders");

    println!("cargo:rerun-if-changed=shaders/");

    fs::write(
        Path::new(&out_dir).join("capacity.rs"),
        format!(
            "/// Capacity the quad shaders were compiled with.\n\
             pub const QUAD_CAPACITY: usize = {QUAD_CAPACITY};\n\
             /// Capacity the shape shaders were compiled with.\n\
             pub const SHAPE_CAPACITY: usize = {SHAPE_CAPACITY};\n"
        ),
    )
    .expect("Failed to write capacity constants");

    let compiler = Compiler::new().expect("Failed to create shader compiler");

    let stages = [
        ("quad.vert", ShaderKind::Vertex, QUAD_CAPACITY),
        ("quad.frag", ShaderKind::Fragment, QUAD_CAPACITY),
        ("shape.vert", ShaderKind::Vertex, SHAPE_CAPACITY),
        ("shape.frag", ShaderKind::Fragment, SHAPE_CAPACITY),
        ("shape_textured.vert", ShaderKind::Vertex, SHAPE_CAPACITY),
        ("shape_textured.frag", ShaderKind::Fragment, SHAPE_CAPACITY),
    ];
    for (name, kind, capacity) in stages {
        compile_shader(
            &compiler,
            shader_dir.join(name),
            Path::new(&out_dir).join(format!("{name}.spv")),
            kind,
            capacity,
        );
    }
}

fn compile_shader(
    compiler: &Compiler,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    kind: ShaderKind,
    capacity: usize,
) {
    let input_path = input.as_ref();
    let output_path = output.as_ref();

    let source = fs::read_to_string(input_path)
        .unwrap_or_else(|e| panic!("Failed to read shader {input_path:?}: {e}"));

    let file_name = input_path.file_name().unwrap().to_str().unwrap();

    let mut options = shaderc::CompileOptions::new().expect("Failed to create compile options");
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);
    options.add_macro_definition("CAPACITY", Some(&capacity.to_string()));

    let result = compiler
        .compile_into_spirv(&source, kind, file_name, "main", Some(&options))
        .unwrap_or_else(|e| panic!("Failed to compile shader {input_path:?}: {e}"));

    if result.get_num_warnings() > 0 {
        println!(
            "cargo:warning=Shader warnings in {input_path:?}: {}",
            result.get_warning_messages()
        );
    }

    fs::write(
        output_path,
        bytemuck::cast_slice::<u32, u8>(result.as_binary()),
    )
    .unwrap_or_else(|e| panic!("Failed to write shader {output_path:?}: {e}"));
}
