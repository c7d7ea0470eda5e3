// Build script to compile GLSL shaders to SPIR-V

use std::path::Path;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=shaders/shader.vert");
    println!("cargo:rerun-if-changed=shaders/shader.frag");

    // The viewer loads these at startup from the working directory
    compile_shader("shaders/shader.vert", "shaders/vert.spv");
    compile_shader("shaders/shader.frag", "shaders/frag.spv");
}

fn compile_shader(input: &str, output: &str) {
    let input_path = Path::new(input);
    let output_path = Path::new(output);

    // Check if glslc is available
    let result = Command::new("glslc")
        .arg(input_path)
        .arg("-o")
        .arg(output_path)
        .status();

    match result {
        Ok(status) if status.success() => {
            println!("Compiled {} -> {}", input, output);
        }
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), {} not rebuilt", e, output);
            println!("cargo:warning=compile manually: glslc {} -o {}", input, output);
        }
    }
}
