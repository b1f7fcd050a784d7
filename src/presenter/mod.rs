// Frame presenter
// Per-frame render sequence: clear, run the stages, draw overlays, present

use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use crate::decoder::{ColorTransfer, Colorspace, DecodedFrame};
use crate::gpu::{ColorSpace, DeviceContext, GpuError, PresentFlags, PresentationSurface};
use crate::overlay::OverlayManager;
use crate::pipeline::{PipelineError, StagePipeline};

/// Serializes device context access between the decoder and the renderer
#[derive(Clone, Default)]
pub struct ContextLock {
    inner: Arc<Mutex<()>>,
}

impl ContextLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held until the guard is dropped, including on early returns
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Why the renderer must be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PresentFailed,
    DeviceLost,
    FrameColorChanged,
    DisplayHdrChanged,
    PreferencesChanged,
}

/// Events posted to the application's event queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererEvent {
    RenderTargetsReset(ResetReason),
}

/// What happened to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { degraded: bool },
    /// The frame was not presented and a reset event was posted
    ResetRequested(ResetReason),
}

/// Color space the swap chain needs for a frame
pub fn output_color_space(trc: ColorTransfer, vendor_hdr: bool) -> ColorSpace {
    if trc.is_pq() || vendor_hdr {
        ColorSpace::RgbFullG2084NoneP2020
    } else {
        ColorSpace::RgbFullG22NoneP709
    }
}

pub struct FramePresenter {
    surface: Arc<dyn PresentationSurface>,
    lock: ContextLock,
    events: Sender<RendererEvent>,
    flags: PresentFlags,
    last_trc: Option<ColorTransfer>,
    last_color: Option<(Colorspace, bool)>,
}

impl FramePresenter {
    pub fn new(
        surface: Arc<dyn PresentationSurface>,
        lock: ContextLock,
        events: Sender<RendererEvent>,
        allow_tearing: bool,
    ) -> Self {
        Self {
            surface,
            lock,
            events,
            flags: PresentFlags { allow_tearing },
            last_trc: None,
            last_color: None,
        }
    }

    pub fn surface(&self) -> &Arc<dyn PresentationSurface> {
        &self.surface
    }

    pub fn post_reset(&self, reason: ResetReason) {
        log::info!("Requesting renderer reset: {:?}", reason);
        if self
            .events
            .send(RendererEvent::RenderTargetsReset(reason))
            .is_err()
        {
            log::warn!("Event queue closed, dropping reset request");
        }
    }

    /// Enhanced pipelines are built for one colorspace and range
    ///
    /// Returns true when the frame differs from the last one seen. The new
    /// color is remembered so a change is reported once.
    fn frame_color_changed(&mut self, frame: &DecodedFrame) -> bool {
        let current = (frame.colorspace, frame.full_range);
        match self.last_color.replace(current) {
            Some(last) if last != current => {
                log::info!(
                    "Frame color changed from {:?} to {:?}, requesting pipeline rebuild",
                    last,
                    current
                );
                true
            }
            _ => false,
        }
    }

    pub fn render_frame(
        &mut self,
        ctx: &mut dyn DeviceContext,
        pipeline: &mut StagePipeline,
        overlays: &OverlayManager,
        frame: &DecodedFrame,
    ) -> Result<FrameOutcome, PipelineError> {
        let config = *pipeline.config();
        // The frame is still drawn with the old pipeline until the reset lands
        if config.enhancement_enabled && self.frame_color_changed(frame) {
            self.post_reset(ResetReason::FrameColorChanged);
        }

        let lock = self.lock.clone();
        let _guard = lock.lock();

        ctx.clear_and_bind_back_buffer([0.0, 0.0, 0.0, 0.0])?;

        let buffer = match pipeline.execute_frame(ctx, frame) {
            Ok(buffer) => buffer,
            Err(PipelineError::Frame(GpuError::DeviceLost(e))) => {
                log::error!("Device lost while rendering: {}", e);
                self.post_reset(ResetReason::DeviceLost);
                return Ok(FrameOutcome::ResetRequested(ResetReason::DeviceLost));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = overlays.render_overlays(ctx) {
            log::warn!("Failed to draw overlays: {}", e);
        }

        if self.last_trc != Some(frame.color_trc) {
            let color_space = output_color_space(frame.color_trc, config.vendor_hdr);
            match self.surface.set_color_space(color_space) {
                Ok(()) => self.last_trc = Some(frame.color_trc),
                Err(e) => log::warn!("Failed to set swap chain color space {:?}: {}", color_space, e),
            }
        }

        if let Err(e) = self.surface.present(self.flags) {
            log::error!("Present failed: {}", e);
            self.post_reset(ResetReason::PresentFailed);
            return Ok(FrameOutcome::ResetRequested(ResetReason::PresentFailed));
        }

        Ok(FrameOutcome::Presented {
            degraded: buffer.degraded,
        })
    }
}
