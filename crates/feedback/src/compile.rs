use std::borrow::Cow;

use tracing::{debug, warn};

use crate::error::{Diagnostic, DiagnosticKind, DiagnosticPolicy, Result};
use crate::gpu::GpuContext;
use crate::synth::Stage;
use crate::types::ShaderCompiler;

/// Collects compiler and linker output for one computer.
///
/// Under [`DiagnosticPolicy::Warn`] every report is logged and kept; under
/// [`DiagnosticPolicy::Deny`] the first report becomes the construction error.
#[derive(Debug)]
pub(crate) struct DiagnosticSink {
    policy: DiagnosticPolicy,
    collected: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new(policy: DiagnosticPolicy) -> Self {
        Self {
            policy,
            collected: Vec::new(),
        }
    }

    pub fn report(&mut self, diagnostic: Option<Diagnostic>) -> Result<()> {
        let Some(diagnostic) = diagnostic else {
            return Ok(());
        };
        match self.policy {
            DiagnosticPolicy::Deny => Err(diagnostic.into_error()),
            DiagnosticPolicy::Warn => {
                warn!(
                    kind = %diagnostic.kind,
                    label = %diagnostic.label,
                    "{}",
                    diagnostic.message
                );
                self.collected.push(diagnostic);
                Ok(())
            }
        }
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.collected
    }
}

/// Compiles one synthesized stage.
///
/// Compilation never fails outright: the module is always returned, and any
/// compiler output comes back as a diagnostic for the caller's sink.
pub(crate) fn compile_stage(
    ctx: &GpuContext,
    stage: Stage,
    label: &str,
    source: &str,
    compiler: ShaderCompiler,
) -> (wgpu::ShaderModule, Option<Diagnostic>) {
    debug!(label, %compiler, bytes = source.len(), "compiling shader stage");
    match compiler {
        #[cfg(feature = "shaderc")]
        ShaderCompiler::Shaderc => compile_with_shaderc(ctx, stage, label, source),
        #[cfg(not(feature = "shaderc"))]
        ShaderCompiler::Shaderc => {
            warn!(label, "shaderc support is not enabled in this build; using naga");
            compile_with_naga(ctx, stage, label, source)
        }
        ShaderCompiler::NagaGlsl => compile_with_naga(ctx, stage, label, source),
    }
}

fn compile_with_naga(
    ctx: &GpuContext,
    stage: Stage,
    label: &str,
    source: &str,
) -> (wgpu::ShaderModule, Option<Diagnostic>) {
    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(source.to_owned()),
                stage: stage.naga_stage(),
                defines: &[],
            },
        });
    let error = pollster::block_on(ctx.device.pop_error_scope());

    let diagnostic = error.map(|err| {
        let info = pollster::block_on(module.get_compilation_info());
        let message = if info.messages.is_empty() {
            err.to_string()
        } else {
            info.messages
                .iter()
                .map(|message| match message.location {
                    Some(location) => format!(
                        "{}:{}: {}",
                        location.line_number, location.line_position, message.message
                    ),
                    None => message.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        Diagnostic {
            kind: DiagnosticKind::ShaderCompile,
            label: label.to_string(),
            message,
        }
    });

    (module, diagnostic)
}

#[cfg(feature = "shaderc")]
fn compile_with_shaderc(
    ctx: &GpuContext,
    stage: Stage,
    label: &str,
    source: &str,
) -> (wgpu::ShaderModule, Option<Diagnostic>) {
    let kind = match stage {
        Stage::Update => shaderc::ShaderKind::Compute,
        Stage::RenderVertex => shaderc::ShaderKind::Vertex,
        Stage::RenderFragment => shaderc::ShaderKind::Fragment,
    };

    let artifact = shaderc::Compiler::new().and_then(|compiler| {
        let mut options = shaderc::CompileOptions::new()?;
        options.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        compiler.compile_into_spirv(source, kind, label, "main", Some(&options))
    });

    match artifact {
        Ok(artifact) => {
            let module = ctx
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::SpirV(Cow::Owned(artifact.as_binary().to_vec())),
                });
            let warnings = artifact.get_warning_messages();
            let diagnostic = (!warnings.trim().is_empty()).then(|| Diagnostic {
                kind: DiagnosticKind::ShaderCompile,
                label: label.to_string(),
                message: warnings,
            });
            (module, diagnostic)
        }
        Err(err) => {
            // Still hand back a module so lenient callers can continue.
            let (module, _) = compile_with_naga(ctx, stage, label, source);
            let diagnostic = Diagnostic {
                kind: DiagnosticKind::ShaderCompile,
                label: label.to_string(),
                message: err.to_string(),
            };
            (module, Some(diagnostic))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: DiagnosticKind) -> Diagnostic {
        Diagnostic {
            kind,
            label: "update kernel".into(),
            message: "0:3: 'i_pos' : undeclared identifier".into(),
        }
    }

    #[test]
    fn warn_policy_keeps_every_diagnostic() {
        let mut sink = DiagnosticSink::new(DiagnosticPolicy::Warn);
        sink.report(None).unwrap();
        sink.report(Some(sample(DiagnosticKind::ShaderCompile))).unwrap();
        sink.report(Some(sample(DiagnosticKind::ProgramLink))).unwrap();
        let collected = sink.into_diagnostics();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[1].kind, DiagnosticKind::ProgramLink);
    }

    #[test]
    fn deny_policy_fails_on_first_diagnostic() {
        let mut sink = DiagnosticSink::new(DiagnosticPolicy::Deny);
        assert!(sink.report(None).is_ok());
        let err = sink
            .report(Some(sample(DiagnosticKind::ShaderCompile)))
            .unwrap_err();
        assert!(err.to_string().contains("undeclared identifier"));
        assert!(sink.into_diagnostics().is_empty());
    }
}
