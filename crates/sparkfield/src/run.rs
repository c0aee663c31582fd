use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use feedback::{
    ComputerDescription, DiagnosticPolicy, FeedbackComputer, FixedTimeSource, GpuContext,
    LoopDriver, OffscreenTarget, RunPolicy, StepProgram, StructLayout, TimeSample, WindowOptions,
    DEFAULT_TARGET_FORMAT,
};
use programfile::{ProgramFile, StepSpec};
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::defaults::bundled_program;
use crate::init::record_initializer;

/// Frames rendered offscreen when `--frames` is not given.
const DEFAULT_HEADLESS_FRAMES: u64 = 120;
/// Simulated clock rate for headless runs without `--fps`.
const DEFAULT_HEADLESS_FPS: f32 = 60.0;

pub fn run(args: Args) -> Result<()> {
    initialise_tracing();

    let program = load_program(&args)?;
    let description = describe(&program, &args)?;
    tracing::info!(
        units = description.units(),
        fields = program.fields.len(),
        compiler = %args.shader_compiler,
        window = args.window,
        "starting sparkfield"
    );

    if args.window {
        run_windowed(description, &args)
    } else {
        run_headless(description, &args)
    }
}

fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_program(args: &Args) -> Result<ProgramFile> {
    let mut program = match &args.program {
        Some(path) => {
            let program = ProgramFile::load(path)
                .with_context(|| format!("failed to load program {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded program file");
            program
        }
        None => {
            tracing::info!("no --program given; using the bundled particle fountain");
            bundled_program()?
        }
    };
    if let Some(units) = args.units {
        tracing::debug!(from = program.units, to = units, "overriding unit count");
        program.units = units;
    }
    Ok(program)
}

fn describe(program: &ProgramFile, args: &Args) -> Result<ComputerDescription> {
    let layout = StructLayout::new(program.fields.iter().map(|(n, t)| (n.as_str(), t.as_str())))
        .context("invalid [struct] table")?;

    let mut description = program
        .fields
        .iter()
        .fold(ComputerDescription::new(program.units), |desc, (name, ty)| {
            desc.field(name, ty)
        })
        .update_step(step_program(&program.update))
        .render_step(step_program(&program.render))
        .compiler(args.shader_compiler)
        .diagnostics(if args.strict {
            DiagnosticPolicy::Deny
        } else {
            DiagnosticPolicy::Warn
        });
    if let Some(init) = record_initializer(&layout, &program.initialize) {
        description = description.initialize(init);
    }
    Ok(description)
}

fn step_program(spec: &StepSpec) -> StepProgram {
    let step = spec
        .params
        .iter()
        .fold(StepProgram::new(spec.glsl.clone()), |step, (name, ty)| {
            step.param(name, ty)
        });
    spec.values
        .iter()
        .fold(step, |step, (name, value)| step.value(name, value))
}

fn run_windowed(description: ComputerDescription, args: &Args) -> Result<()> {
    let options = WindowOptions {
        title: "sparkfield".to_string(),
        size: args.size,
        policy: RunPolicy::Animate {
            target_fps: args.target_fps(),
        },
        max_frames: args.frames,
    };
    feedback::run_window(description, options).context("window session failed")
}

fn run_headless(description: ComputerDescription, args: &Args) -> Result<()> {
    let ctx = GpuContext::headless().context("failed to acquire a GPU adapter")?;
    tracing::info!(
        adapter = %ctx.adapter_profile.name,
        backend = ?ctx.adapter_profile.backend,
        "headless context ready"
    );

    let mut computer =
        FeedbackComputer::new(&ctx, description).context("failed to build feedback computer")?;
    if !computer.diagnostics().is_empty() {
        tracing::warn!(
            count = computer.diagnostics().len(),
            "programs built with diagnostics; pass --strict to reject them"
        );
    }

    let (width, height) = args.size;
    let target = OffscreenTarget::new(&ctx, width, height, DEFAULT_TARGET_FORMAT);
    let fps = args.target_fps().unwrap_or(DEFAULT_HEADLESS_FPS);
    let mut driver = LoopDriver::with_clock(Box::new(FixedTimeSource::new(1.0 / fps)), None);

    let frames = args.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES);
    let started = Instant::now();
    let ticked = run_frames(frames, |_| {
        driver
            .tick(&mut computer, target.view())
            .map_err(anyhow::Error::from)
    });
    let last = match ticked {
        Ok(last) => last,
        Err(err) => {
            computer.destroy();
            return Err(err);
        }
    };
    let elapsed = started.elapsed();

    tracing::info!(
        frames,
        iteration = computer.iteration(),
        simulated_seconds = last.map(|sample| sample.seconds).unwrap_or(0.0),
        wall_ms = elapsed.as_millis(),
        "headless run complete"
    );

    let exported = match &args.export {
        Some(path) => export(&ctx, &target, path),
        None => Ok(()),
    };
    computer.destroy();
    exported
}

/// Calls `tick` for each frame, stopping at the first failing frame.
fn run_frames<F>(frames: u64, mut tick: F) -> Result<Option<TimeSample>>
where
    F: FnMut(u64) -> Result<TimeSample>,
{
    let mut last = None;
    for frame in 0..frames {
        let sample = tick(frame).with_context(|| format!("frame {frame} failed"))?;
        last = Some(sample);
    }
    Ok(last)
}

fn export(ctx: &GpuContext, target: &OffscreenTarget, path: &Path) -> Result<()> {
    target
        .export_png(ctx, path)
        .with_context(|| format!("failed to export frame to {}", path.display()))?;
    tracing::info!(path = %path.display(), "exported last frame");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sparkfield"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn units_override_replaces_program_units() {
        let program = load_program(&args(&["--units", "99"])).unwrap();
        assert_eq!(program.units, 99);
        let description = describe(&program, &args(&[])).unwrap();
        assert_eq!(description.units(), 99);
    }

    #[test]
    fn load_program_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.toml");
        std::fs::write(
            &path,
            r#"
units = 5
[struct]
count = "uint"
[update]
glsl = "void main() { o_count = i_count + 1u; }"
[render]
glsl = "void main() { gl_Position = vec4(0.0, 0.0, 0.0, 1.0); vertexColor = vec4(1.0); }"
"#,
        )
        .unwrap();
        let program = load_program(&args(&["--program", path.to_str().unwrap()])).unwrap();
        assert_eq!(program.units, 5);
        assert_eq!(program.field_names().collect::<Vec<_>>(), ["count"]);
    }

    #[test]
    fn missing_program_file_is_reported_with_its_path() {
        let err = load_program(&args(&["--program", "/nonexistent/sparkfield.toml"])).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/sparkfield.toml"));
    }

    #[test]
    fn step_program_carries_params_and_values() {
        let program = bundled_program().unwrap();
        let step = step_program(&program.update);
        assert_eq!(step.glsl(), program.update.glsl);
        assert_eq!(step.params(), program.update.params.as_slice());
    }

    #[test]
    fn run_frames_stops_at_the_first_failing_frame() {
        let mut calls = Vec::new();
        let result = run_frames(5, |frame| {
            calls.push(frame);
            if frame == 2 {
                anyhow::bail!("device lost");
            }
            Ok(TimeSample::new(frame as f32 * 0.5, frame))
        });
        let err = result.unwrap_err();
        assert_eq!(calls, [0, 1, 2]);
        assert_eq!(format!("{err:#}"), "frame 2 failed: device lost");

        let last = run_frames(3, |frame| Ok(TimeSample::new(frame as f32, frame))).unwrap();
        assert_eq!(last, Some(TimeSample::new(2.0, 2)));
        assert_eq!(run_frames(0, |_| unreachable!()).unwrap(), None);
    }

    #[test]
    fn describe_rejects_unknown_types() {
        let mut program = bundled_program().unwrap();
        program.fields.push(("mass".to_string(), "double".to_string()));
        assert!(describe(&program, &args(&[])).is_err());
    }
}
