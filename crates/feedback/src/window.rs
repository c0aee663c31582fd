use std::sync::Arc;
use std::time::Instant;

use tracing::{info, trace, warn};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::computer::{ComputerDescription, FeedbackComputer};
use crate::error::FeedbackError;
use crate::gpu::{new_instance, GpuContext};
use crate::runtime::{LoopDriver, RunPolicy};

/// Frame cap applied on CPU rasterizers unless the caller chose one.
const SOFTWARE_FPS_CAP: f32 = 15.0;

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("failed to create event loop: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("failed to create window: {0}")]
    Os(#[from] winit::error::OsError),
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("surface is not supported by the selected adapter")]
    UnsupportedSurface,
    #[error(transparent)]
    Feedback(#[from] FeedbackError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowOptions {
    pub title: String,
    pub size: (u32, u32),
    pub policy: RunPolicy,
    /// Close the window after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for WindowOptions {
    fn default() -> Self {
        Self {
            title: "feedback".to_string(),
            size: (1280, 720),
            policy: RunPolicy::default(),
            max_frames: None,
        }
    }
}

/// Opens a window, builds the computer against its surface and steps it once
/// per redraw until the window closes, Escape is pressed or `max_frames` is
/// reached. The description's target format is replaced by the surface format.
pub fn run_window(
    description: ComputerDescription,
    options: WindowOptions,
) -> Result<(), WindowError> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(options.title.clone())
            .with_inner_size(PhysicalSize::new(options.size.0, options.size.1))
            .build(&event_loop)?,
    );

    let instance = new_instance();
    let surface = instance.create_surface(window.clone())?;
    let ctx = GpuContext::for_surface(instance, &surface)?;
    let capabilities = ctx
        .surface_capabilities(&surface)
        .filter(|caps| !caps.formats.is_empty())
        .ok_or(WindowError::UnsupportedSurface)?;
    let format = preferred_format(&capabilities.formats);

    let size = window.inner_size();
    let mut config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: wgpu::PresentMode::AutoVsync,
        desired_maximum_frame_latency: 2,
        alpha_mode: capabilities.alpha_modes[0],
        view_formats: Vec::new(),
    };
    surface.configure(&ctx.device, &config);

    let mut computer = Some(FeedbackComputer::new(
        &ctx,
        description.target_format(format),
    )?);

    let mut policy = options.policy.clone();
    if ctx.adapter_profile.is_software() {
        if let RunPolicy::Animate { target_fps: None } = policy {
            warn!(
                adapter = %ctx.adapter_profile.name,
                cap = SOFTWARE_FPS_CAP,
                "software rasterizer detected; capping frame rate"
            );
            policy = RunPolicy::Animate {
                target_fps: Some(SOFTWARE_FPS_CAP),
            };
        }
    }
    let mut driver = LoopDriver::new(&policy);
    info!(format = ?format, width = config.width, height = config.height, "window ready");
    window.request_redraw();

    let mut failure: Option<WindowError> = None;
    let failure_slot = &mut failure;
    let mut frames = 0u64;

    event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => elwt.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && matches!(event.logical_key, Key::Named(NamedKey::Escape))
                {
                    elwt.exit();
                }
            }
            WindowEvent::Resized(new_size) => {
                config.width = new_size.width.max(1);
                config.height = new_size.height.max(1);
                surface.configure(&ctx.device, &config);
            }
            WindowEvent::RedrawRequested => {
                let Some(computer) = computer.as_mut() else {
                    return;
                };
                let frame = match surface.get_current_texture() {
                    Ok(frame) => frame,
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        surface.configure(&ctx.device, &config);
                        return;
                    }
                    Err(wgpu::SurfaceError::Timeout) => {
                        warn!("surface timeout; retrying next frame");
                        return;
                    }
                    Err(err) => {
                        *failure_slot = Some(FeedbackError::from(err).into());
                        elwt.exit();
                        return;
                    }
                };
                let view = frame
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                if let Err(err) = driver.tick(computer, &view) {
                    *failure_slot = Some(err.into());
                    elwt.exit();
                    return;
                }
                frame.present();
                frames += 1;
                if options.max_frames.is_some_and(|max| frames >= max) {
                    elwt.exit();
                }
            }
            _ => {}
        },
        Event::AboutToWait => {
            let now = Instant::now();
            if driver.should_render(now) {
                window.request_redraw();
                elwt.set_control_flow(ControlFlow::Wait);
            } else if let Some(deadline) = driver.next_deadline() {
                trace!(
                    wait_ms = deadline.saturating_duration_since(now).as_millis(),
                    "waiting for next frame"
                );
                elwt.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
        }
        Event::LoopExiting => {
            if let Some(computer) = computer.take() {
                info!(iteration = computer.iteration(), "closing window");
                computer.destroy();
            }
        }
        _ => {}
    })?;

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// First non-sRGB format the surface offers, so additive blending stays linear.
fn preferred_format(formats: &[wgpu::TextureFormat]) -> wgpu::TextureFormat {
    formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .unwrap_or(formats[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferred_format_skips_srgb() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(preferred_format(&formats), wgpu::TextureFormat::Bgra8Unorm);
        assert_eq!(
            preferred_format(&formats[..1]),
            wgpu::TextureFormat::Bgra8UnormSrgb
        );
    }
}
