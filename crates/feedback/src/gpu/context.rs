use tracing::{debug, error};

use crate::error::{FeedbackError, Result};

/// Human-readable summary of the adapter a context runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl AdapterProfile {
    pub fn from_wgpu(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
    }
}

/// Device and queue every computer component is built against.
///
/// The context is passed explicitly into each constructor; nothing in the
/// crate holds a process-wide device, so several computers can run against
/// different contexts side by side.
#[derive(Clone)]
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_profile: AdapterProfile,
    adapter: Option<wgpu::Adapter>,
}

impl GpuContext {
    /// Opens a context without any presentation surface.
    ///
    /// Fails with [`FeedbackError::InvalidContext`] when no adapter or device
    /// can be obtained.
    pub fn headless() -> Result<Self> {
        let instance = new_instance();
        Self::with_instance(instance, None)
    }

    /// Opens a context whose adapter can present to `surface`.
    pub fn for_surface(instance: wgpu::Instance, surface: &wgpu::Surface<'_>) -> Result<Self> {
        Self::with_instance(instance, Some(surface))
    }

    /// Wraps a device the caller already owns.
    ///
    /// No uncaptured-error handler is installed; the caller keeps whatever
    /// handling it configured.
    pub fn from_parts(
        instance: wgpu::Instance,
        adapter_info: &wgpu::AdapterInfo,
        device: wgpu::Device,
        queue: wgpu::Queue,
    ) -> Self {
        Self {
            instance,
            device,
            queue,
            adapter_profile: AdapterProfile::from_wgpu(adapter_info),
            adapter: None,
        }
    }

    /// Formats and modes `surface` supports on this context's adapter.
    ///
    /// `None` for contexts built with [`GpuContext::from_parts`].
    pub fn surface_capabilities(
        &self,
        surface: &wgpu::Surface<'_>,
    ) -> Option<wgpu::SurfaceCapabilities> {
        self.adapter
            .as_ref()
            .map(|adapter| surface.get_capabilities(adapter))
    }

    fn with_instance(instance: wgpu::Instance, surface: Option<&wgpu::Surface<'_>>) -> Result<Self> {
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface,
            force_fallback_adapter: false,
        }))
        .map_err(|err| FeedbackError::InvalidContext(format!("no suitable GPU adapter: {err}")))?;

        let adapter_profile = AdapterProfile::from_wgpu(&adapter.get_info());
        debug!(
            name = %adapter_profile.name,
            backend = ?adapter_profile.backend,
            device_type = ?adapter_profile.device_type,
            is_software = adapter_profile.is_software(),
            "selected GPU adapter"
        );

        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("feedback device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits,
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| FeedbackError::InvalidContext(format!("failed to create GPU device: {err}")))?;

        // Programs that failed to compile stay usable under the lenient
        // policy; their later validation errors are logged, not fatal.
        device.on_uncaptured_error(Box::new(|err| {
            error!("uncaptured GPU error: {err}");
        }));

        Ok(Self {
            instance,
            device,
            queue,
            adapter_profile,
            adapter: Some(adapter),
        })
    }
}

pub(crate) fn new_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}
