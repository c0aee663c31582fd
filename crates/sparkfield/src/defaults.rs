use anyhow::{Context, Result};
use programfile::ProgramFile;

/// Particle fountain used when no `--program` is given.
pub const BUNDLED_PROGRAM: &str = r#"
units = 16384

[struct]
pos = "vec2"
vel = "vec2"
life = "float"

[initialize]
mode = "uniform"
min = -1.0
max = 1.0

[update]
glsl = """
float hash(vec2 p) {
    return fract(sin(dot(p, vec2(12.9898, 78.233))) * 43758.5453);
}

void main() {
    float dt = 1.0 / 60.0;
    vec2 vel = i_vel + vec2(0.0, -u_gravity) * dt;
    vec2 pos = i_pos + vel * dt;
    float life = i_life - dt * 0.35;
    if (life <= 0.0 || pos.y < -1.0) {
        float a = hash(i_pos + vec2(u_time, i_life));
        float b = hash(i_vel + vec2(i_life, u_time));
        pos = vec2(0.0, -0.9);
        vel = vec2((a - 0.5) * 0.8, 1.2 + b * 0.6);
        life = 0.5 + 0.5 * b;
    }
    o_pos = pos;
    o_vel = vel;
    o_life = life;
}
"""

[update.params]
time = "float"
gravity = "float"

[update.values]
gravity = 0.9

[render]
glsl = """
void main() {
    gl_Position = vec4(i_pos, 0.0, 1.0);
    float heat = clamp(i_life, 0.0, 1.0);
    vertexColor = vec4(1.0, 0.35 + 0.5 * heat, 0.1 * heat, 0.25 * heat);
}
"""
"#;

pub fn bundled_program() -> Result<ProgramFile> {
    ProgramFile::from_toml_str(BUNDLED_PROGRAM).context("bundled program is invalid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use programfile::InitMode;

    #[test]
    fn bundled_program_parses() {
        let program = bundled_program().unwrap();
        assert_eq!(program.field_names().collect::<Vec<_>>(), ["pos", "vel", "life"]);
        assert_eq!(program.initialize.mode, InitMode::Uniform);
        assert_eq!(program.update.values.get("gravity"), Some(&0.9));
        assert!(program.render.params.is_empty());
    }
}
