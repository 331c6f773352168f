//! Shared GPU context for wgpu resources.

use crate::error::{FilterError, Result};
use std::sync::Arc;
use winit::window::Window;

/// Device and queue shared by the preview, gallery and presenter.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Initialize a GPU context compatible with the given window surface.
    /// If window is None, initializes for headless rendering.
    pub fn new(window: Option<&Arc<Window>>) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = match window {
            Some(window) => Some(
                instance
                    .create_surface(window.clone())
                    .map_err(|e| FilterError::RasterizerUnavailable(e.to_string()))?,
            ),
            None => None,
        };

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface.as_ref(),
            force_fallback_adapter: false,
        }))
        .map_err(|e| FilterError::RasterizerUnavailable(format!("no GPU adapter: {}", e)))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("emotefx device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| FilterError::RasterizerUnavailable(e.to_string()))?;

        Ok(Self {
            device,
            queue,
            instance,
            adapter,
        })
    }

    /// Headless context, or `None` when no adapter is available.
    pub fn headless() -> Option<Arc<Self>> {
        match Self::new(None) {
            Ok(ctx) => Some(Arc::new(ctx)),
            Err(e) => {
                tracing::warn!("GPU unavailable: {}", e);
                None
            }
        }
    }
}
