// HDR display monitor
// Background probe of the display HDR state that reports changes to the render loop
//
// The probe task only reads the display status through its own reference to
// the surface and shares plain flags with the render thread. Rebuilding the
// pipeline is left to the render loop once it sees the change message.

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::gpu::PresentationSurface;

/// Default delay between a frame arriving and the display query
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(1000);

/// Display HDR state differs from the one the pipeline was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayHdrChanged {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Probing,
}

pub struct HdrMonitor {
    runtime: tokio::runtime::Handle,
    interval: Duration,
    cancel: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    last_known: Arc<AtomicBool>,
    changes_tx: Sender<DisplayHdrChanged>,
    changes_rx: Receiver<DisplayHdrChanged>,
    /// Disconnects once the outstanding probe has finished
    done_rx: Option<Receiver<()>>,
}

impl HdrMonitor {
    pub fn new(runtime: tokio::runtime::Handle, interval: Duration, display_hdr: bool) -> Self {
        let (changes_tx, changes_rx) = bounded(1);
        Self {
            runtime,
            interval,
            cancel: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            last_known: Arc::new(AtomicBool::new(display_hdr)),
            changes_tx,
            changes_rx,
            done_rx: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.in_flight.load(Ordering::Acquire) {
            MonitorState::Probing
        } else {
            MonitorState::Idle
        }
    }

    pub fn last_known(&self) -> bool {
        self.last_known.load(Ordering::Acquire)
    }

    /// Start a probe unless one is in flight; called when a frame arrives
    pub fn on_frame(&mut self, surface: &Arc<dyn PresentationSurface>) {
        if self.cancel.load(Ordering::Acquire) {
            return;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let (done_tx, done_rx) = bounded::<()>(0);
        self.done_rx = Some(done_rx);

        let surface = surface.clone();
        let cancel = self.cancel.clone();
        let in_flight = self.in_flight.clone();
        let last_known = self.last_known.clone();
        let changes = self.changes_tx.clone();
        let interval = self.interval;

        self.runtime.spawn(async move {
            let _done = done_tx;
            probe(surface, interval, &cancel, &last_known, &changes).await;
            in_flight.store(false, Ordering::Release);
        });
    }

    /// Change reported by a finished probe, if any
    pub fn take_change(&self) -> Option<DisplayHdrChanged> {
        match self.changes_rx.try_recv() {
            Ok(change) => Some(change),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Cancel any probe and wait for it to finish
    pub fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Release);
        if let Some(done) = self.done_rx.take() {
            // Returns once the task drops its sender
            let _ = done.recv();
        }
    }
}

impl Drop for HdrMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn probe(
    surface: Arc<dyn PresentationSurface>,
    interval: Duration,
    cancel: &AtomicBool,
    last_known: &AtomicBool,
    changes: &Sender<DisplayHdrChanged>,
) {
    if cancel.load(Ordering::Acquire) {
        return;
    }
    tokio::time::sleep(interval).await;
    if cancel.load(Ordering::Acquire) {
        return;
    }

    let enabled = surface.display_hdr_enabled();
    if last_known.swap(enabled, Ordering::AcqRel) != enabled {
        log::info!(
            "Display HDR {} while streaming",
            if enabled { "enabled" } else { "disabled" }
        );
        // A pending message already asks for a rebuild
        let _ = changes.try_send(DisplayHdrChanged { enabled });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::{RecordingBackend, headless_window};
    use crate::gpu::{Dimensions, GpuBackend, SurfaceDesc, TextureFormat};
    use std::time::Instant;

    fn surface(backend: &RecordingBackend) -> Arc<dyn PresentationSurface> {
        let bundle = backend.create_device(0).unwrap();
        backend
            .create_presentation_surface(
                &bundle.device,
                headless_window(),
                &SurfaceDesc {
                    size: Dimensions::new(1280, 720),
                    format: TextureFormat::Rgba8,
                    buffer_count: 5,
                    allow_tearing: false,
                },
            )
            .unwrap()
    }

    fn wait_idle(monitor: &HdrMonitor) {
        let start = Instant::now();
        while monitor.state() == MonitorState::Probing {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_reports_change_once() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = RecordingBackend::new();
        let surface = surface(&backend);
        let mut monitor = HdrMonitor::new(runtime.handle().clone(), Duration::from_millis(5), false);

        monitor.on_frame(&surface);
        wait_idle(&monitor);
        assert_eq!(monitor.take_change(), None);

        backend.set_display_hdr(true);
        monitor.on_frame(&surface);
        wait_idle(&monitor);
        assert_eq!(monitor.take_change(), Some(DisplayHdrChanged { enabled: true }));
        assert!(monitor.last_known());

        monitor.on_frame(&surface);
        wait_idle(&monitor);
        assert_eq!(monitor.take_change(), None);
    }

    #[test]
    fn test_single_probe_in_flight() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = RecordingBackend::new();
        let recorder = backend.recorder();
        let surface = surface(&backend);
        let mut monitor = HdrMonitor::new(runtime.handle().clone(), Duration::from_millis(20), false);

        for _ in 0..10 {
            monitor.on_frame(&surface);
        }
        wait_idle(&monitor);
        assert_eq!(recorder.hdr_queries(), 1);
    }

    #[test]
    fn test_shutdown_during_sleep_skips_query() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = RecordingBackend::new();
        let recorder = backend.recorder();
        let surface = surface(&backend);
        let interval = Duration::from_millis(200);
        let mut monitor = HdrMonitor::new(runtime.handle().clone(), interval, false);

        monitor.on_frame(&surface);
        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        monitor.shutdown();
        assert!(start.elapsed() <= interval + Duration::from_millis(100));
        assert_eq!(recorder.hdr_queries(), 0);

        // No new probe after shutdown
        monitor.on_frame(&surface);
        assert_eq!(monitor.state(), MonitorState::Idle);
    }
}
