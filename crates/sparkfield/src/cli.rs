use std::path::PathBuf;

use clap::Parser;
use feedback::ShaderCompiler;

#[derive(Parser, Debug)]
#[command(
    name = "sparkfield",
    author,
    version,
    about = "Run a struct-driven GPU feedback simulation"
)]
pub struct Args {
    /// Program description (TOML). The bundled particle fountain is used when omitted.
    #[arg(long, value_name = "PATH")]
    pub program: Option<PathBuf>,

    /// Override the unit count from the program file.
    #[arg(long, value_name = "COUNT")]
    pub units: Option<u32>,

    /// Number of frames to run (headless default: 120; window default: until closed).
    #[arg(long, value_name = "COUNT")]
    pub frames: Option<u64>,

    /// Open a window instead of rendering offscreen.
    #[arg(long)]
    pub window: bool,

    /// Render target size (e.g. `800x800`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size, default_value = "800x800")]
    pub size: (u32, u32),

    /// Frame rate: caps the window, sets the simulated clock when headless (0 = uncapped).
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f32>,

    /// Write the last headless frame to this PNG file.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Fail on any shader compile or link diagnostic instead of warning.
    #[arg(long)]
    pub strict: bool,

    /// Shader compiler backend: `naga` (default) or `shaderc`.
    #[arg(
        long,
        value_name = "COMPILER",
        value_parser = parse_shader_compiler,
        default_value_t = ShaderCompiler::default()
    )]
    pub shader_compiler: ShaderCompiler,
}

pub fn parse() -> Args {
    Args::parse()
}

impl Args {
    /// FPS cap with non-positive values treated as uncapped.
    pub fn target_fps(&self) -> Option<f32> {
        self.fps.filter(|fps| *fps > 0.0)
    }
}

pub fn parse_shader_compiler(value: &str) -> Result<ShaderCompiler, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("shader compiler must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "shaderc" => {
            if cfg!(feature = "shaderc") {
                Ok(ShaderCompiler::Shaderc)
            } else {
                Err("shaderc support is not enabled in this build".to_string())
            }
        }
        "naga" | "naga-glsl" => Ok(ShaderCompiler::NagaGlsl),
        _ => Err("unknown shader compiler (expected shaderc or naga)".to_string()),
    }
}

pub fn parse_surface_size(spec: &str) -> Result<(u32, u32), String> {
    let (width, height) = spec
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WxH format, e.g. 800x800".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size specification".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size specification".to_string())?;

    if width == 0 || height == 0 {
        return Err("surface dimensions must be greater than zero".to_string());
    }

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_surface_size(" 64X32 "), Ok((64, 32)));
        assert!(parse_surface_size("0x10").is_err());
        assert!(parse_surface_size("wide").is_err());
    }

    #[test]
    fn parses_compiler_names() {
        assert_eq!(parse_shader_compiler("naga"), Ok(ShaderCompiler::NagaGlsl));
        assert_eq!(parse_shader_compiler("NAGA-GLSL"), Ok(ShaderCompiler::NagaGlsl));
        assert!(parse_shader_compiler("glslang").is_err());
        assert!(parse_shader_compiler("").is_err());
    }

    #[test]
    fn cli_flags_parse() {
        let args = Args::try_parse_from([
            "sparkfield",
            "--units",
            "256",
            "--frames",
            "10",
            "--strict",
            "--fps",
            "0",
            "--size",
            "320x200",
        ])
        .unwrap();
        assert_eq!(args.units, Some(256));
        assert_eq!(args.frames, Some(10));
        assert!(args.strict);
        assert!(!args.window);
        assert_eq!(args.size, (320, 200));
        assert_eq!(args.target_fps(), None);
    }
}
