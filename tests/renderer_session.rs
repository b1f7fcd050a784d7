// Renderer sessions
// Full initialize, render and shutdown cycles against the recording backend

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::unbounded;
use raw_window_handle::RawWindowHandle;
use video_enhancer_lib::enhancer::Enhancer;
use video_enhancer_lib::gpu::Dimensions;
use video_enhancer_lib::gpu::recording::{
    Command, MemoryShaderSource, RecordingBackend, frame, headless_window,
};
use video_enhancer_lib::{
    DecoderParameters, FrameOutcome, RendererConfig, VideoFormat, VideoRenderer, WindowProvider,
};

struct Window(Dimensions);

impl WindowProvider for Window {
    fn raw_window_handle(&self) -> RawWindowHandle {
        headless_window()
    }

    fn window_size(&self) -> Dimensions {
        self.0
    }
}

fn renderer(
    backend: Arc<RecordingBackend>,
    interval_ms: u64,
    runtime: &tokio::runtime::Runtime,
) -> VideoRenderer {
    let config = RendererConfig {
        enhancement_enabled: true,
        hdr_probe_interval_ms: interval_ms,
        ..RendererConfig::default()
    };
    VideoRenderer::new(backend, config, unbounded().0, runtime.handle().clone())
        .with_shader_source(Arc::new(MemoryShaderSource::new()))
}

fn hevc() -> DecoderParameters {
    DecoderParameters {
        format: VideoFormat::HEVC,
        enable_video_enhancement: true,
        ..DecoderParameters::default()
    }
}

#[test]
fn test_gtx_session_upscales_with_nis() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let backend = Arc::new(RecordingBackend::new());
    let recorder = backend.recorder();
    let mut renderer = renderer(backend.clone(), 5, &runtime);

    renderer.initialize(&hevc(), &Window(Dimensions::new(2560, 1440)))?;
    let config = *renderer.pipeline_config().context("no pipeline")?;
    assert_eq!(config.enhancer, Enhancer::Nis);
    assert!(!config.tone_mapping);
    assert_eq!(config.output.size(), Dimensions::new(2560, 1440));

    let pool = renderer.decoder_pool().context("no decoder pool")?.clone();
    recorder.clear();
    for index in 0..3 {
        let outcome = renderer.render_frame(&frame(&pool, index))?;
        assert_eq!(outcome, FrameOutcome::Presented { degraded: false });
    }

    let commands = recorder.commands();
    assert_eq!(
        commands
            .iter()
            .filter(|c| matches!(c, Command::Dispatch { .. }))
            .count(),
        3
    );
    assert_eq!(
        commands
            .iter()
            .filter(|c| matches!(c, Command::Present(_)))
            .count(),
        3
    );
    // Each frame presents after its shader pass
    let last_dispatch = commands
        .iter()
        .rposition(|c| matches!(c, Command::Dispatch { .. }))
        .context("no dispatch")?;
    let last_present = commands
        .iter()
        .rposition(|c| matches!(c, Command::Present(_)))
        .context("no present")?;
    assert!(last_dispatch < last_present);
    Ok(())
}

#[test]
fn test_shutdown_cancels_pending_probe() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    let backend = Arc::new(RecordingBackend::new());
    let recorder = backend.recorder();
    let interval = Duration::from_millis(500);
    let mut renderer = renderer(backend.clone(), interval.as_millis() as u64, &runtime);

    renderer.initialize(&hevc(), &Window(Dimensions::new(2560, 1440)))?;
    let pool = renderer.decoder_pool().context("no decoder pool")?.clone();
    let queries = recorder.hdr_queries();
    renderer.render_frame(&frame(&pool, 0))?;

    let start = Instant::now();
    renderer.shutdown();
    assert!(start.elapsed() < interval);
    assert_eq!(recorder.hdr_queries(), queries);
    assert!(!renderer.is_initialized());
    Ok(())
}
