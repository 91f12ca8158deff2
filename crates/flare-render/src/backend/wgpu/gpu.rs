//! Device, queue and window swapchain of the wgpu backend.
//!
//! The surface is never configured eagerly. Resizes, minimize transitions and
//! lost surfaces only mark the swapchain stale; the next acquire reconfigures it
//! once, at the size last requested. Device errors raised outside an explicit
//! check are collected by an [`ErrorSink`] and reported by the next present.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use wgpu::SurfaceError;
use winit::window::Window;

use crate::api::DeviceMemory;
use crate::error::RendererError;

/// Startup parameters of the wgpu device and window surface.
#[derive(Debug, Clone)]
pub struct GpuInit {
    pub present_mode: wgpu::PresentMode,
    pub power_preference: wgpu::PowerPreference,
    /// Frames the presentation engine may queue ahead.
    pub frame_latency: u32,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            present_mode: wgpu::PresentMode::Fifo,
            power_preference: wgpu::PowerPreference::HighPerformance,
            frame_latency: 2,
        }
    }
}

// ── swapchain state ───────────────────────────────────────────────────────

/// When the window surface must be (re)configured.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Swapchain {
    size: [u32; 2],
    /// Set while the window is minimized or occluded.
    suspended: bool,
    /// The surface configuration no longer matches `size`, or the surface was lost.
    stale: bool,
}

impl Swapchain {
    fn new(size: [u32; 2]) -> Self {
        Self { size, suspended: false, stale: true }
    }

    fn resize(&mut self, size: [u32; 2]) {
        self.stale |= self.size != size;
        self.size = size;
    }

    fn set_suspended(&mut self, suspended: bool) {
        // the platform may drop the surface while hidden
        self.stale |= self.suspended && !suspended;
        self.suspended = suspended;
    }

    fn invalidate(&mut self) {
        self.stale = true;
    }

    fn drawable(&self) -> bool {
        !self.suspended && self.size[0] > 0 && self.size[1] > 0
    }

    /// Size to configure before acquiring, once per staleness.
    fn take_configure(&mut self) -> Option<[u32; 2]> {
        if !self.drawable() || !self.stale {
            return None;
        }
        self.stale = false;
        Some(self.size)
    }
}

/// Reaction to a failed acquire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SurfaceAction {
    Recreate,
    SkipFrame,
    Fatal,
}

fn surface_action(err: &SurfaceError) -> SurfaceAction {
    match err {
        SurfaceError::Lost | SurfaceError::Outdated => SurfaceAction::Recreate,
        SurfaceError::Timeout | SurfaceError::Other => SurfaceAction::SkipFrame,
        SurfaceError::OutOfMemory => SurfaceAction::Fatal,
    }
}

/// Prefers a linear 8-bit format so window output matches frame buffer color math.
fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    [F::Bgra8Unorm, F::Rgba8Unorm]
        .into_iter()
        .find(|f| formats.contains(f))
        .or_else(|| formats.iter().copied().find(|f| !f.is_srgb()))
        .or_else(|| formats.first().copied())
}

// ── uncaptured errors ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DeviceErrors {
    first: Option<String>,
    more: u32,
}

/// Shared with the device's uncaptured-error callback.
#[derive(Debug, Clone, Default)]
struct ErrorSink(Arc<Mutex<DeviceErrors>>);

impl ErrorSink {
    fn push(&self, message: String) {
        let mut errors = self.0.lock();
        match errors.first {
            None => errors.first = Some(message),
            Some(_) => errors.more += 1,
        }
    }

    /// First error since the last call, with a count of the ones that followed.
    fn take(&self) -> Option<RendererError> {
        let DeviceErrors { first, more } = std::mem::take(&mut *self.0.lock());
        first.map(|message| match more {
            0 => RendererError::Device(message),
            n => RendererError::Device(format!("{message} (and {n} more)")),
        })
    }
}

// ── device ────────────────────────────────────────────────────────────────

/// Swapchain texture held between the first window draw and present.
pub struct GpuFrame {
    texture: wgpu::SurfaceTexture,
    pub view: wgpu::TextureView,
}

pub struct Gpu {
    surface: wgpu::Surface<'static>,
    adapter: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    swapchain: Swapchain,
    errors: ErrorSink,
}

impl Gpu {
    /// Creates the device and the surface of `window`. The surface owns an
    /// `Arc<Window>`, so the result can move to the renderer thread.
    pub async fn new(window: Arc<Window>, init: GpuInit) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .context("failed to create the window surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no adapter can present to this window")?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("flare device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to open the device")?;

        let errors = ErrorSink::default();
        let sink = errors.clone();
        device.on_uncaptured_error(Arc::new(move |e: wgpu::Error| {
            log::error!("wgpu: {e}");
            sink.push(e.to_string());
        }));

        let caps = surface.get_capabilities(&adapter);
        let format = pick_surface_format(&caps.formats).context("surface reports no formats")?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: init.present_mode,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: Vec::new(),
            desired_maximum_frame_latency: init.frame_latency,
        };

        Ok(Self {
            surface,
            adapter: adapter.get_info(),
            device,
            queue,
            config,
            swapchain: Swapchain::new([size.width, size.height]),
            errors,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Requested window size. May be zero while minimized.
    pub fn size(&self) -> [u32; 2] {
        self.swapchain.size
    }

    /// Adapter name and graphics API.
    pub fn adapter_summary(&self) -> (String, String) {
        (self.adapter.name.clone(), format!("{:?}", self.adapter.backend))
    }

    pub fn resize(&mut self, size: [u32; 2]) {
        self.swapchain.resize(size);
    }

    pub fn set_suspended(&mut self, suspended: bool) {
        self.swapchain.set_suspended(suspended);
    }

    /// Acquires the next swapchain texture. `Ok(None)` skips the frame.
    pub fn acquire(&mut self) -> crate::error::Result<Option<GpuFrame>> {
        for _ in 0..2 {
            if let Some([width, height]) = self.swapchain.take_configure() {
                self.config.width = width;
                self.config.height = height;
                self.surface.configure(&self.device, &self.config);
                log::debug!("swapchain configured at {width}x{height}");
            }
            if !self.swapchain.drawable() {
                return Ok(None);
            }
            match self.surface.get_current_texture() {
                Ok(texture) => {
                    let view = texture.texture.create_view(&wgpu::TextureViewDescriptor::default());
                    return Ok(Some(GpuFrame { texture, view }));
                }
                Err(e) => match surface_action(&e) {
                    SurfaceAction::Recreate => {
                        log::debug!("swapchain {e}, recreating");
                        self.swapchain.invalidate();
                    }
                    SurfaceAction::SkipFrame => {
                        log::debug!("skipping frame: {e}");
                        return Ok(None);
                    }
                    SurfaceAction::Fatal => return Err(RendererError::Surface(e.to_string())),
                },
            }
        }
        Ok(None)
    }

    pub fn present(&self, frame: GpuFrame) {
        let GpuFrame { texture, view } = frame;
        drop(view);
        texture.present();
    }

    /// Device errors raised since the last call.
    pub fn take_error(&self) -> Option<RendererError> {
        self.errors.take()
    }

    /// `None` when the platform allocator keeps no statistics.
    pub fn memory(&self) -> Option<DeviceMemory> {
        self.device.generate_allocator_report().map(|report| DeviceMemory {
            allocated: report.total_allocated_bytes,
            reserved: report.total_reserved_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── swapchain ─────────────────────────────────────────────────────────

    #[test]
    fn first_acquire_configures_once() {
        let mut sc = Swapchain::new([640, 480]);
        assert_eq!(sc.take_configure(), Some([640, 480]));
        assert_eq!(sc.take_configure(), None);
    }

    #[test]
    fn resizes_collapse_into_one_configure_at_the_last_size() {
        let mut sc = Swapchain::new([640, 480]);
        sc.take_configure();
        sc.resize([800, 600]);
        sc.resize([1024, 768]);
        assert_eq!(sc.take_configure(), Some([1024, 768]));

        sc.resize([1024, 768]);
        assert_eq!(sc.take_configure(), None);
    }

    #[test]
    fn minimized_swapchain_waits_for_restore() {
        let mut sc = Swapchain::new([640, 480]);
        sc.take_configure();

        sc.set_suspended(true);
        assert!(!sc.drawable());
        sc.resize([320, 240]);
        assert_eq!(sc.take_configure(), None);

        sc.set_suspended(false);
        assert_eq!(sc.take_configure(), Some([320, 240]));
    }

    #[test]
    fn restore_without_resize_still_reconfigures() {
        let mut sc = Swapchain::new([640, 480]);
        sc.take_configure();
        sc.set_suspended(true);
        sc.set_suspended(false);
        assert_eq!(sc.take_configure(), Some([640, 480]));
    }

    #[test]
    fn zero_size_is_not_drawable() {
        let mut sc = Swapchain::new([640, 480]);
        sc.resize([0, 480]);
        assert!(!sc.drawable());
        assert_eq!(sc.take_configure(), None);
    }

    #[test]
    fn lost_surfaces_are_recreated_and_others_skip_or_fail() {
        assert_eq!(surface_action(&SurfaceError::Lost), SurfaceAction::Recreate);
        assert_eq!(surface_action(&SurfaceError::Outdated), SurfaceAction::Recreate);
        assert_eq!(surface_action(&SurfaceError::Timeout), SurfaceAction::SkipFrame);
        assert_eq!(surface_action(&SurfaceError::OutOfMemory), SurfaceAction::Fatal);
    }

    #[test]
    fn linear_formats_win_over_srgb() {
        use wgpu::TextureFormat as F;
        assert_eq!(pick_surface_format(&[F::Bgra8UnormSrgb, F::Bgra8Unorm]), Some(F::Bgra8Unorm));
        assert_eq!(pick_surface_format(&[F::Rgba8UnormSrgb, F::Rgb10a2Unorm]), Some(F::Rgb10a2Unorm));
        assert_eq!(pick_surface_format(&[F::Bgra8UnormSrgb]), Some(F::Bgra8UnormSrgb));
        assert_eq!(pick_surface_format(&[]), None);
    }

    // ── errors ────────────────────────────────────────────────────────────

    #[test]
    fn sink_reports_the_first_error_and_a_count() {
        let sink = ErrorSink::default();
        assert!(sink.take().is_none());

        sink.push("validation failed".into());
        sink.push("second".into());
        sink.push("third".into());
        match sink.take() {
            Some(RendererError::Device(message)) => assert_eq!(message, "validation failed (and 2 more)"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(sink.take().is_none());
    }

    #[test]
    fn sink_clones_share_one_buffer() {
        let sink = ErrorSink::default();
        sink.clone().push("from the callback".into());
        assert!(matches!(sink.take(), Some(RendererError::Device(m)) if m == "from the callback"));
    }
}
