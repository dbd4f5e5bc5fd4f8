// SPDX-License-Identifier: CEPL-1.0
use std::error::Error;
use std::{env, fs, path::PathBuf};

// Vertex shader. Matches the pipeline's vertex layout:
//   - binding 0, location 0: R32G32B32_SFLOAT (position)
//   - binding 0, location 1: R32G32_SFLOAT (texcoord)
// Set 0 is the per-frame camera block; the model matrix is a push constant.
const WORLD_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec2 inTexcoord;

layout(set = 0, binding = 0) uniform Global {
    mat4 proj;
    mat4 view;
    mat4 reserved0;
    mat4 reserved1;
} global;

layout(push_constant) uniform Push {
    mat4 model;
} push;

layout(location = 0) out vec2 vTexcoord;

void main() {
    vTexcoord = inTexcoord;
    gl_Position = global.proj * global.view * push.model * vec4(inPos, 1.0);
}
"#;

// Fragment shader. Set 1 holds the per-object block (dynamic offset) and
// the diffuse sampler.
const WORLD_FRAG: &str = r#"
#version 450
layout(location = 0) in vec2 vTexcoord;

layout(set = 1, binding = 0) uniform Object {
    vec4 diffuse_color;
    vec4 reserved0;
    vec4 reserved1;
    vec4 reserved2;
} object;

layout(set = 1, binding = 1) uniform sampler2D diffuse;

layout(location = 0) out vec4 outColor;

void main() {
    outColor = object.diffuse_color * texture(diffuse, vTexcoord);
}
"#;

fn main() -> Result<(), Box<dyn Error>> {
    let out = PathBuf::from(env::var("OUT_DIR")?);

    let comp = shaderc::Compiler::new()
        .into_iter()
        .next()
        .ok_or("failed to initialize shaderc")?;
    let mut opts = shaderc::CompileOptions::new()
        .into_iter()
        .next()
        .ok_or("failed to create shaderc options")?;
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        (WORLD_VERT, shaderc::ShaderKind::Vertex, "world.vert"),
        (WORLD_FRAG, shaderc::ShaderKind::Fragment, "world.frag"),
    ];
    for (src, kind, name) in shaders {
        let spv = comp.compile_into_spirv(src, kind, name, "main", Some(&opts))?;
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())?;
    }

    // Inline sources live here
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
