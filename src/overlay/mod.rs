// Overlay handoff
// Overlay textures published by the session thread and drawn by the render thread
//
// The update side never touches the device context; it only creates
// resources and swaps them in under the lock. The render side never waits
// for the lock: an overlay being updated is skipped for that frame.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::gpu::{DeviceContext, Dimensions, GpuDevice, GpuError, OverlayResources};

/// Overlays the session can show on top of the video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    Debug,
    StatusUpdate,
}

impl OverlayKind {
    pub const ALL: [OverlayKind; 2] = [OverlayKind::Debug, OverlayKind::StatusUpdate];

    fn index(self) -> usize {
        match self {
            OverlayKind::Debug => 0,
            OverlayKind::StatusUpdate => 1,
        }
    }
}

/// Convert a screen-space rectangle (origin bottom-left) to NDC `[x, y, w, h]`
pub fn screen_to_ndc(x: f32, y: f32, w: f32, h: f32, viewport: Dimensions) -> [f32; 4] {
    let half_w = viewport.width as f32 / 2.0;
    let half_h = viewport.height as f32 / 2.0;
    [x / half_w - 1.0, y / half_h - 1.0, w / half_w, h / half_h]
}

/// Where an overlay of `size` sits in an output of `output`
pub fn overlay_rect(kind: OverlayKind, size: Dimensions, output: Dimensions) -> [f32; 4] {
    let y = match kind {
        // Bottom left
        OverlayKind::StatusUpdate => 0.0,
        // Top left
        OverlayKind::Debug => output.height.saturating_sub(size.height) as f32,
    };
    screen_to_ndc(0.0, y, size.width as f32, size.height as f32, output)
}

type Slots = [Option<Arc<OverlayResources>>; 2];

pub struct OverlayManager {
    device: Arc<dyn GpuDevice>,
    output: Dimensions,
    enabled: [AtomicBool; 2],
    slots: Mutex<Slots>,
}

impl OverlayManager {
    pub fn new(device: Arc<dyn GpuDevice>, output: Dimensions) -> Self {
        Self {
            device,
            output,
            enabled: [AtomicBool::new(false), AtomicBool::new(false)],
            slots: Mutex::new([None, None]),
        }
    }

    /// Size overlays are placed against
    pub fn output(&self) -> Dimensions {
        self.output
    }

    pub fn is_enabled(&self, kind: OverlayKind) -> bool {
        self.enabled[kind.index()].load(Ordering::Acquire)
    }

    /// Publish new overlay content; safe to call from any thread
    ///
    /// With the overlay enabled and no new surface the current texture is
    /// kept. Disabling it releases the texture.
    pub fn update_overlay(
        &self,
        kind: OverlayKind,
        enabled: bool,
        surface: Option<&image::RgbaImage>,
    ) -> Result<(), GpuError> {
        self.enabled[kind.index()].store(enabled, Ordering::Release);

        let surface = match (enabled, surface) {
            (true, None) => return Ok(()),
            (false, _) => {
                let old = self.slots.lock()[kind.index()].take();
                drop(old);
                return Ok(());
            }
            (true, Some(surface)) => surface,
        };

        // The old resources are released outside the lock
        let old = self.slots.lock()[kind.index()].take();
        drop(old);

        let size = Dimensions::new(surface.width(), surface.height());
        let resources = self
            .device
            .create_overlay(surface, overlay_rect(kind, size, self.output))
            .inspect_err(|e| log::error!("Failed to create {:?} overlay: {}", kind, e))?;

        self.slots.lock()[kind.index()] = Some(Arc::new(resources));
        Ok(())
    }

    /// Draw every enabled overlay that is not mid-update
    pub fn render_overlays(&self, ctx: &mut dyn DeviceContext) -> Result<(), GpuError> {
        for kind in OverlayKind::ALL {
            if !self.is_enabled(kind) {
                continue;
            }
            let Some(slots) = self.slots.try_lock() else {
                continue;
            };
            // Hold a reference so the updater can release its copy while we draw
            let overlay = slots[kind.index()].clone();
            drop(slots);

            if let Some(overlay) = overlay {
                ctx.draw_overlay(&overlay)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuBackend;
    use crate::gpu::recording::{Command, RecordingBackend};

    fn image(w: u32, h: u32) -> image::RgbaImage {
        image::RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 200]))
    }

    #[test]
    fn test_ndc_conversion() {
        let ndc = screen_to_ndc(0.0, 0.0, 960.0, 540.0, Dimensions::new(1920, 1080));
        assert_eq!(ndc, [-1.0, -1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_overlay_placement() {
        let output = Dimensions::new(1920, 1080);
        let size = Dimensions::new(480, 270);
        let status = overlay_rect(OverlayKind::StatusUpdate, size, output);
        assert_eq!((status[0], status[1]), (-1.0, -1.0));
        let debug = overlay_rect(OverlayKind::Debug, size, output);
        assert_eq!(debug[1], 0.5);
        assert!((debug[1] + debug[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_and_render() {
        let backend = RecordingBackend::new();
        let mut bundle = backend.create_device(0).unwrap();
        let recorder = backend.recorder();
        let overlays = OverlayManager::new(bundle.device.clone(), Dimensions::new(1920, 1080));

        overlays
            .update_overlay(OverlayKind::Debug, true, Some(&image(64, 32)))
            .unwrap();
        overlays.render_overlays(bundle.context.as_mut()).unwrap();
        assert_eq!(recorder.count(|c| matches!(c, Command::DrawOverlay { .. })), 1);
    }

    #[test]
    fn test_enabled_without_surface_keeps_texture() {
        let backend = RecordingBackend::new();
        let mut bundle = backend.create_device(0).unwrap();
        let recorder = backend.recorder();
        let overlays = OverlayManager::new(bundle.device.clone(), Dimensions::new(1920, 1080));

        overlays
            .update_overlay(OverlayKind::StatusUpdate, true, Some(&image(64, 32)))
            .unwrap();
        overlays
            .update_overlay(OverlayKind::StatusUpdate, true, None)
            .unwrap();
        assert_eq!(recorder.count(|c| matches!(c, Command::CreateOverlay { .. })), 1);
        overlays.render_overlays(bundle.context.as_mut()).unwrap();
        assert_eq!(recorder.count(|c| matches!(c, Command::DrawOverlay { .. })), 1);
    }

    #[test]
    fn test_disable_releases_resources() {
        let backend = RecordingBackend::new();
        let mut bundle = backend.create_device(0).unwrap();
        let recorder = backend.recorder();
        let overlays = OverlayManager::new(bundle.device.clone(), Dimensions::new(1920, 1080));

        overlays
            .update_overlay(OverlayKind::Debug, true, Some(&image(16, 16)))
            .unwrap();
        assert_eq!(recorder.live_resources(), 3);
        overlays.update_overlay(OverlayKind::Debug, false, None).unwrap();
        assert_eq!(recorder.live_resources(), 0);
        overlays.render_overlays(bundle.context.as_mut()).unwrap();
        assert_eq!(recorder.count(|c| matches!(c, Command::DrawOverlay { .. })), 0);
    }

    #[test]
    fn test_render_skips_while_update_holds_lock() {
        let backend = RecordingBackend::new();
        let mut bundle = backend.create_device(0).unwrap();
        let recorder = backend.recorder();
        let overlays = OverlayManager::new(bundle.device.clone(), Dimensions::new(1920, 1080));
        overlays
            .update_overlay(OverlayKind::Debug, true, Some(&image(16, 16)))
            .unwrap();

        let held = overlays.slots.lock();
        overlays.render_overlays(bundle.context.as_mut()).unwrap();
        drop(held);
        assert_eq!(recorder.count(|c| matches!(c, Command::DrawOverlay { .. })), 0);
    }
}
