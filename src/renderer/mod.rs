// Video renderer
// Session setup on the decoding device and the per-frame entry point

use crossbeam_channel::Sender;
use raw_window_handle::RawWindowHandle;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{PreferenceSource, RendererConfig, SuperResolutionMode};
use crate::decoder::{self, DecodedFrame, DecoderParameters, DecoderPreparation};
use crate::enhancement::{EnhancementState, GpuVendor};
use crate::gpu::{
    AdapterInfo, DeviceBundle, DeviceContext, Dimensions, DirectoryShaderSource, FeatureLevel,
    GpuBackend, GpuDevice, GpuError, Hdr10Metadata, PresentationSurface, ShaderSource,
    SurfaceDesc, Texture, TextureDesc, TextureFormat, TextureRole,
};
use crate::hdr::HdrMonitor;
use crate::overlay::{OverlayKind, OverlayManager};
use crate::pipeline::{BuildContext, PipelineError, StagePipeline, build_stages};
use crate::presenter::{ContextLock, FrameOutcome, FramePresenter, RendererEvent, ResetReason};
use crate::prober::{self, CapabilityProber};
use crate::selector::{PipelineConfiguration, SelectionInput, letterbox, select_pipeline};

/// Flip-discard swap chain depth
pub const SWAP_CHAIN_BUFFER_COUNT: u32 = 5;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Renderer disabled by configuration")]
    Disabled,
    #[error("Failed to initialize renderer: {0:?}")]
    InitFailed(InitFailureReason),
    #[error("Adapter enumeration failed: {0}")]
    Enumeration(GpuError),
    #[error("Failed to create presentation surface: {0}")]
    Surface(GpuError),
    #[error("Failed to create decoder pool: {0}")]
    DecoderPool(GpuError),
    #[error("Failed to load conversion shaders: {0}")]
    Shaders(GpuError),
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Overlay update failed: {0}")]
    Overlay(GpuError),
    #[error("Renderer not initialized")]
    NotInitialized,
}

/// Why no device could be used, reported to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitFailureReason {
    /// Capable GPUs exist but none decodes this codec
    NoHardwareSupport,
    Unknown,
}

/// Window the session renders into
pub trait WindowProvider: Send + Sync {
    fn raw_window_handle(&self) -> RawWindowHandle;
    fn window_size(&self) -> Dimensions;
    fn display_index(&self) -> u32 {
        0
    }
    fn is_exclusive_fullscreen(&self) -> bool {
        false
    }
}

/// Capabilities advertised to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererAttributes {
    pub hdr_support: bool,
    pub force_pacing: bool,
}

struct Session {
    // Dropped first so the probe stops before the surface goes away
    hdr: HdrMonitor,
    presenter: FramePresenter,
    overlays: Arc<OverlayManager>,
    pipeline: StagePipeline,
    pool: Texture,
    context: Box<dyn DeviceContext>,
    device: Arc<dyn GpuDevice>,
    params: DecoderParameters,
    mode: SuperResolutionMode,
    display_hdr: bool,
}

pub struct VideoRenderer {
    backend: Arc<dyn GpuBackend>,
    config: RendererConfig,
    preferences: Arc<dyn PreferenceSource>,
    enhancement: Arc<EnhancementState>,
    shader_source: Arc<dyn ShaderSource>,
    runtime: tokio::runtime::Handle,
    events: Sender<RendererEvent>,
    lock: ContextLock,
    session: Option<Session>,
    init_failure: Option<InitFailureReason>,
}

impl VideoRenderer {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        config: RendererConfig,
        events: Sender<RendererEvent>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let shader_source: Arc<dyn ShaderSource> =
            Arc::new(DirectoryShaderSource::new(config.shader_dir.clone()));
        Self {
            backend,
            preferences: Arc::new(config.clone()),
            config,
            enhancement: Arc::new(EnhancementState::new()),
            shader_source,
            runtime,
            events,
            lock: ContextLock::new(),
            session: None,
            init_failure: None,
        }
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceSource>) -> Self {
        self.preferences = preferences;
        self
    }

    /// Share the process-wide enhancement state across sessions
    pub fn with_enhancement_state(mut self, state: Arc<EnhancementState>) -> Self {
        self.enhancement = state;
        self
    }

    pub fn with_shader_source(mut self, source: Arc<dyn ShaderSource>) -> Self {
        self.shader_source = source;
        self
    }

    pub fn enhancement_state(&self) -> &Arc<EnhancementState> {
        &self.enhancement
    }

    /// Lock the decoder must hold while it uses the device context
    pub fn context_lock(&self) -> ContextLock {
        self.lock.clone()
    }

    pub fn init_failure_reason(&self) -> Option<InitFailureReason> {
        self.init_failure
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn pipeline_config(&self) -> Option<&PipelineConfiguration> {
        self.session.as_ref().map(|s| s.pipeline.config())
    }

    pub fn device(&self) -> Option<&Arc<dyn GpuDevice>> {
        self.session.as_ref().map(|s| &s.device)
    }

    /// Decoder pool array the decoder writes into
    pub fn decoder_pool(&self) -> Option<&Texture> {
        self.session.as_ref().map(|s| &s.pool)
    }

    /// Handle for publishing overlays from the session thread
    pub fn overlays(&self) -> Option<Arc<OverlayManager>> {
        self.session.as_ref().map(|s| s.overlays.clone())
    }

    pub fn attributes(&self, window: &dyn WindowProvider) -> RendererAttributes {
        RendererAttributes {
            hdr_support: true,
            force_pacing: window.is_exclusive_fullscreen(),
        }
    }

    /// Alignment, pool size and surface format the decoder must use
    pub fn prepare_decoder(params: &DecoderParameters) -> DecoderPreparation {
        DecoderPreparation::for_format(params.format, params.dimensions())
    }

    /// Candidate adapters: the enhancement adapter first, then the rest in order
    fn candidate_adapters(&self, preferred: Option<u32>) -> Result<Vec<AdapterInfo>, RendererError> {
        let mut adapters = self
            .backend
            .enumerate_adapters()
            .map_err(RendererError::Enumeration)?;
        if let Some(pos) = preferred.and_then(|p| adapters.iter().position(|a| a.index == p)) {
            let chosen = adapters.remove(pos);
            adapters.insert(0, chosen);
        }
        Ok(adapters)
    }

    fn create_decoding_device(
        &self,
        params: &DecoderParameters,
        preferred: Option<u32>,
    ) -> Result<(AdapterInfo, DeviceBundle), RendererError> {
        // A codec-capable device returns early, so reaching the end means none was found
        let mut fl11_devices = 0u32;

        for adapter in self.candidate_adapters(preferred)? {
            let bundle = match self.backend.create_device(adapter.index) {
                Ok(bundle) => bundle,
                Err(e) => {
                    log::warn!("Device creation failed on {}: {}", adapter.description, e);
                    continue;
                }
            };

            let level = bundle.device.feature_level();
            if GpuVendor::from_pci_id(adapter.vendor_id) == GpuVendor::Intel
                && level <= FeatureLevel::Level11_0
                && !self.config.allow_legacy_intel
            {
                log::warn!(
                    "Skipping {} at {:?}; set D3D11VA_ENABLED=1 to use it",
                    adapter.description,
                    level
                );
                continue;
            }
            if level >= FeatureLevel::Level11_0 {
                fl11_devices += 1;
            }

            match decoder::check_decoder_support(bundle.device.as_ref(), params.format) {
                Ok(true) => {
                    log::info!(
                        "Using {} ({:?}) for {}",
                        adapter.description,
                        level,
                        params.format
                    );
                    return Ok((adapter, bundle));
                }
                Ok(false) => {}
                Err(e) => log::warn!("Decoder check failed on {}: {}", adapter.description, e),
            }
        }

        let reason = if fl11_devices > 0 && !params.format.is_yuv444() {
            InitFailureReason::NoHardwareSupport
        } else {
            InitFailureReason::Unknown
        };
        log::error!(
            "No usable GPU for {} ({} FL11 devices): {:?}",
            params.format,
            fl11_devices,
            reason
        );
        Err(RendererError::InitFailed(reason))
    }

    /// Create the device, surface and stage pipeline for a session
    pub fn initialize(
        &mut self,
        params: &DecoderParameters,
        window: &dyn WindowProvider,
    ) -> Result<(), RendererError> {
        let _span = tracing::info_span!("initialize", format = %params.format).entered();
        self.session = None;
        self.init_failure = None;

        if !self.config.renderer_enabled {
            return Err(RendererError::Disabled);
        }

        let selection = CapabilityProber::new(self.backend.as_ref(), self.config.vendor_policy)
            .probe_and_select_adapter(&self.enhancement);

        let (adapter, bundle) = self
            .create_decoding_device(params, selection.map(|s| s.adapter_index))
            .inspect_err(|e| {
                if let RendererError::InitFailed(reason) = e {
                    self.init_failure = Some(*reason);
                }
            })?;
        let DeviceBundle {
            device,
            mut context,
        } = bundle;

        let vendor = GpuVendor::from_pci_id(adapter.vendor_id);
        let enhancement_adapter = selection.filter(|s| s.adapter_index == adapter.index);
        let mut enhanced = self.preferences.video_enhancement_enabled()
            && params.enable_video_enhancement
            && enhancement_adapter.is_some()
            && self.enhancement.is_enhancement_capable();

        let bind_decoder = self
            .config
            .force_bind_decoder_textures
            .unwrap_or(vendor == GpuVendor::Intel && !enhanced);
        if bind_decoder && enhanced {
            log::info!("Video enhancement disabled: decoder textures are bound directly");
            enhanced = false;
        }
        let fence = self
            .config
            .force_fence
            .unwrap_or(vendor == GpuVendor::Intel && device.feature_level() < FeatureLevel::Level11_1);

        let handle = window.raw_window_handle();
        let display_hdr = self.backend.display_hdr_enabled(handle);
        let mode = self.preferences.super_resolution_mode();
        let input = SelectionInput {
            enhancement_enabled: enhanced,
            vendor,
            integrated: enhancement_adapter
                .map(|s| s.integrated)
                .unwrap_or_else(|| prober::is_integrated(&adapter)),
            rtx: enhancement_adapter
                .map(|s| s.rtx)
                .unwrap_or_else(|| prober::is_rtx(&adapter)),
            decoder_hdr: params.format.is_hdr(),
            yuv444: params.format.is_yuv444(),
            display_hdr,
            output: letterbox(window.window_size(), params.dimensions()),
            decoder: params.dimensions().even(),
            mode,
            edge_enhancement: device
                .video_processor_caps()
                .map(|caps| caps.edge_enhancement)
                .unwrap_or(false),
        };
        let mut config = select_pipeline(&input);

        let vsync = params.enable_vsync && self.preferences.vsync_enabled();
        let allow_tearing = !vsync && self.backend.tearing_supported();
        let surface = self
            .backend
            .create_presentation_surface(
                &device,
                handle,
                &SurfaceDesc {
                    size: window.window_size(),
                    format: if params.format.ten_bit || config.vendor_hdr {
                        TextureFormat::Rgb10A2
                    } else {
                        TextureFormat::Rgba8
                    },
                    buffer_count: SWAP_CHAIN_BUFFER_COUNT,
                    allow_tearing,
                },
            )
            .map_err(|e| {
                log::error!("Failed to create swap chain: {}", e);
                RendererError::Surface(e)
            })?;

        context
            .load_conversion_shaders(self.shader_source.as_ref())
            .map_err(|e| {
                log::error!("Failed to load conversion shaders: {}", e);
                RendererError::Shaders(e)
            })?;

        let preparation = Self::prepare_decoder(params);
        let pool = device
            .create_texture(&TextureDesc::new(
                preparation.surface_size,
                preparation.surface_format,
                TextureRole::DecoderInput,
            ))
            .map_err(RendererError::DecoderPool)?;

        let build = |config: &PipelineConfiguration| {
            build_stages(
                device.as_ref(),
                config,
                &BuildContext {
                    shader_source: self.shader_source.as_ref(),
                    frame_rate: params.frame_rate,
                    pool: &pool,
                    back_buffer: surface.back_buffer(),
                    bind_decoder,
                    fence,
                },
            )
        };
        let mut pipeline = match build(&config) {
            Ok(pipeline) => pipeline,
            Err(e) if config.enhancement_enabled => {
                log::error!("Enhanced pipeline failed, continuing without enhancement: {}", e);
                config = select_pipeline(&SelectionInput {
                    enhancement_enabled: false,
                    ..input
                });
                build(&config)?
            }
            Err(e) => return Err(e.into()),
        };

        config.log_summary();
        self.enhancement
            .enable_video_enhancement(config.enhancement_enabled);
        if config.enhancement_enabled {
            self.enhancement
                .set_stats(config.ratio(), config.upscaler_label);
        }

        let display_metadata = surface.display_hdr_metadata().map(|info| info.to_metadata());
        if let Err(e) = pipeline.set_hdr_metadata(None, display_metadata.as_ref()) {
            log::warn!("Failed to set display HDR metadata: {}", e);
        }

        let overlays = Arc::new(OverlayManager::new(device.clone(), config.output.size()));
        let hdr = HdrMonitor::new(
            self.runtime.clone(),
            Duration::from_millis(self.config.hdr_probe_interval_ms),
            display_hdr,
        );
        let presenter = FramePresenter::new(surface, self.lock.clone(), self.events.clone(), allow_tearing);

        self.session = Some(Session {
            hdr,
            presenter,
            overlays,
            pipeline,
            pool,
            context,
            device,
            params: params.clone(),
            mode,
            display_hdr,
        });
        Ok(())
    }

    /// Stream HDR metadata changed; applied to every processor
    pub fn set_hdr_mode(
        &mut self,
        enabled: bool,
        stream: Option<Hdr10Metadata>,
    ) -> Result<(), RendererError> {
        let session = self.session.as_mut().ok_or(RendererError::NotInitialized)?;
        let _guard = self.lock.lock();
        let stream = stream.filter(|_| enabled);
        let display = session
            .presenter
            .surface()
            .display_hdr_metadata()
            .map(|info| info.to_metadata());
        session
            .pipeline
            .set_hdr_metadata(stream.as_ref(), display.as_ref())?;
        Ok(())
    }

    pub fn update_overlay(
        &self,
        kind: OverlayKind,
        enabled: bool,
        surface: Option<&image::RgbaImage>,
    ) -> Result<(), RendererError> {
        let session = self.session.as_ref().ok_or(RendererError::NotInitialized)?;
        session
            .overlays
            .update_overlay(kind, enabled, surface)
            .map_err(RendererError::Overlay)
    }

    /// Post a reset if the preferences no longer match the running pipeline
    pub fn notify_preferences_changed(&self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let wanted = self.preferences.video_enhancement_enabled()
            && session.params.enable_video_enhancement;
        let changed = self.preferences.super_resolution_mode() != session.mode
            || (wanted != session.pipeline.config().enhancement_enabled
                && self.enhancement.is_enhancement_capable());
        if changed {
            session.presenter.post_reset(ResetReason::PreferencesChanged);
        }
        changed
    }

    pub fn render_frame(&mut self, frame: &DecodedFrame) -> Result<FrameOutcome, RendererError> {
        let session = self.session.as_mut().ok_or(RendererError::NotInitialized)?;

        let hdr_changed = session
            .hdr
            .take_change()
            .is_some_and(|change| change.enabled != session.display_hdr);
        if hdr_changed {
            session.presenter.post_reset(ResetReason::DisplayHdrChanged);
            return Ok(FrameOutcome::ResetRequested(ResetReason::DisplayHdrChanged));
        }
        let surface: Arc<dyn PresentationSurface> = session.presenter.surface().clone();
        session.hdr.on_frame(&surface);

        let outcome = session.presenter.render_frame(
            session.context.as_mut(),
            &mut session.pipeline,
            &session.overlays,
            frame,
        )?;
        Ok(outcome)
    }

    /// Release the session; waits for any background probe first
    pub fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.hdr.shutdown();
            log::info!("Renderer session released");
        }
    }
}

impl Drop for VideoRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{ChromaFormat, Codec, VideoFormat};
    use crate::enhancer::Enhancer;
    use crate::gpu::recording::{AdapterSpec, Command, MemoryShaderSource, RecordingBackend, frame, headless_window};
    use crossbeam_channel::{Receiver, unbounded};
    use std::time::Instant;

    struct TestWindow(Dimensions);

    impl WindowProvider for TestWindow {
        fn raw_window_handle(&self) -> RawWindowHandle {
            headless_window()
        }

        fn window_size(&self) -> Dimensions {
            self.0
        }
    }

    struct Setup {
        renderer: VideoRenderer,
        backend: Arc<RecordingBackend>,
        events: Receiver<RendererEvent>,
        // Outlives the renderer so its probe task can finish
        _runtime: tokio::runtime::Runtime,
    }

    fn setup(backend: RecordingBackend, mut config: RendererConfig) -> Setup {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let backend = Arc::new(backend);
        let (tx, rx) = unbounded();
        config.hdr_probe_interval_ms = 5;
        let renderer = VideoRenderer::new(backend.clone(), config, tx, runtime.handle().clone())
            .with_shader_source(Arc::new(MemoryShaderSource::new()));
        Setup {
            renderer,
            backend,
            events: rx,
            _runtime: runtime,
        }
    }

    fn enhanced_config() -> RendererConfig {
        RendererConfig {
            enhancement_enabled: true,
            ..RendererConfig::default()
        }
    }

    fn params(format: VideoFormat, enhance: bool) -> DecoderParameters {
        DecoderParameters {
            format,
            enable_video_enhancement: enhance,
            ..DecoderParameters::default()
        }
    }

    fn window() -> TestWindow {
        TestWindow(Dimensions::new(2560, 1440))
    }

    #[test]
    fn test_initialize_without_enhancement() {
        let mut s = setup(RecordingBackend::new(), RendererConfig::default());
        s.renderer
            .initialize(&params(VideoFormat::HEVC, false), &window())
            .unwrap();

        let config = s.renderer.pipeline_config().unwrap();
        assert!(!config.enhancement_enabled);
        let commands = s.backend.recorder().commands();
        assert!(commands.contains(&Command::CreateSurface {
            format: TextureFormat::Rgba8,
            buffer_count: 5,
            allow_tearing: false,
        }));
        assert!(commands.contains(&Command::LoadConversionShaders));
        assert_eq!(s.backend.recorder().count(|c| matches!(c, Command::CreatePoolViews { .. })), 0);
        assert!(!s.renderer.enhancement_state().is_video_enhancement_enabled());
    }

    #[test]
    fn test_initialize_enhanced_reports_stats() {
        let mut s = setup(RecordingBackend::new(), enhanced_config());
        s.renderer
            .initialize(&params(VideoFormat::HEVC, true), &window())
            .unwrap();

        let config = *s.renderer.pipeline_config().unwrap();
        assert!(config.enhancement_enabled);
        let state = s.renderer.enhancement_state();
        assert!(state.is_video_enhancement_enabled());
        let stats = state.stats();
        assert_eq!(stats.algorithm, config.upscaler_label);
        assert!((stats.ratio - 1440.0 / 1080.0).abs() < 1e-4);
    }

    #[test]
    fn test_vsync_off_allows_tearing() {
        let mut config = RendererConfig::default();
        config.vsync = false;
        let mut s = setup(RecordingBackend::new(), config);
        s.renderer
            .initialize(&params(VideoFormat::HEVC_MAIN10, false), &window())
            .unwrap();
        assert!(s.backend.recorder().commands().contains(&Command::CreateSurface {
            format: TextureFormat::Rgb10A2,
            buffer_count: 5,
            allow_tearing: true,
        }));
    }

    #[test]
    fn test_vendor_hdr_uses_ten_bit_surface() {
        let backend = RecordingBackend::with_adapters(vec![AdapterSpec::nvidia("NVIDIA GeForce RTX 4070")]);
        backend.set_display_hdr(true);
        let mut s = setup(backend, enhanced_config());
        s.renderer
            .initialize(&params(VideoFormat::HEVC, true), &window())
            .unwrap();
        assert!(s.renderer.pipeline_config().unwrap().vendor_hdr);
        assert!(s.backend.recorder().commands().contains(&Command::CreateSurface {
            format: TextureFormat::Rgb10A2,
            buffer_count: 5,
            allow_tearing: false,
        }));
    }

    #[test]
    fn test_intel_binds_decoder_textures() {
        let backend = RecordingBackend::with_adapters(vec![AdapterSpec::intel("Intel UHD 630").integrated()]);
        let mut s = setup(backend, RendererConfig::default());
        s.renderer
            .initialize(&params(VideoFormat::H264, false), &window())
            .unwrap();
        let recorder = s.backend.recorder();
        assert_eq!(recorder.count(|c| *c == Command::CreatePoolViews { count: 17 }), 1);

        let pool = s.renderer.decoder_pool().unwrap().clone();
        let f = frame(&pool, 4);
        s.renderer.render_frame(&f).unwrap();
        assert_eq!(recorder.count(|c| *c == Command::WaitForDecoder), 0);
    }

    #[test]
    fn test_forced_bind_disables_enhancement() {
        let mut config = enhanced_config();
        config.force_bind_decoder_textures = Some(true);
        let mut s = setup(RecordingBackend::new(), config);
        s.renderer
            .initialize(&params(VideoFormat::HEVC, true), &window())
            .unwrap();
        assert!(!s.renderer.pipeline_config().unwrap().enhancement_enabled);
    }

    #[test]
    fn test_legacy_intel() {
        let legacy = || {
            RecordingBackend::with_adapters(vec![
                AdapterSpec::intel("Intel HD 4000").feature_level(FeatureLevel::Level11_0),
            ])
        };

        let mut s = setup(legacy(), RendererConfig::default());
        let err = s
            .renderer
            .initialize(&params(VideoFormat::H264, false), &window())
            .unwrap_err();
        assert!(matches!(err, RendererError::InitFailed(InitFailureReason::Unknown)));

        let mut config = RendererConfig::default();
        config.allow_legacy_intel = true;
        let mut s = setup(legacy(), config);
        s.renderer
            .initialize(&params(VideoFormat::H264, false), &window())
            .unwrap();
        let pool = s.renderer.decoder_pool().unwrap().clone();
        let f = frame(&pool, 0);
        s.renderer.render_frame(&f).unwrap();
        assert_eq!(s.backend.recorder().count(|c| *c == Command::WaitForDecoder), 1);
    }

    #[test]
    fn test_falls_back_to_codec_capable_adapter() {
        let mut no_av1 = AdapterSpec::nvidia("NVIDIA GeForce RTX 3080");
        no_av1.decoder_formats.retain(|f| f.codec != Codec::Av1);
        let backend = RecordingBackend::with_adapters(vec![no_av1, AdapterSpec::intel("Intel Arc A380")]);
        let mut s = setup(backend, enhanced_config());
        s.renderer
            .initialize(&params(VideoFormat::AV1, true), &window())
            .unwrap();

        assert_eq!(s.renderer.device().unwrap().adapter().index, 1);
        // Enhancement stays with the probed adapter
        assert!(!s.renderer.pipeline_config().unwrap().enhancement_enabled);
    }

    #[test]
    fn test_failure_reasons() {
        let mut spec = AdapterSpec::amd("AMD Radeon RX 580");
        spec.decoder_formats.clear();

        let mut s = setup(RecordingBackend::with_adapters(vec![spec.clone()]), RendererConfig::default());
        assert!(s.renderer.initialize(&params(VideoFormat::AV1, false), &window()).is_err());
        assert_eq!(s.renderer.init_failure_reason(), Some(InitFailureReason::NoHardwareSupport));

        let mut s = setup(RecordingBackend::with_adapters(vec![spec.clone()]), RendererConfig::default());
        let yuv444 = VideoFormat::new(Codec::Hevc, false, ChromaFormat::Yuv444);
        assert!(s.renderer.initialize(&params(yuv444, false), &window()).is_err());
        assert_eq!(s.renderer.init_failure_reason(), Some(InitFailureReason::Unknown));

        // Without an FL11 device the codec is not the problem
        let legacy = spec.feature_level(FeatureLevel::Level10_1);
        let mut s = setup(RecordingBackend::with_adapters(vec![legacy]), RendererConfig::default());
        assert!(s.renderer.initialize(&params(VideoFormat::AV1, false), &window()).is_err());
        assert_eq!(s.renderer.init_failure_reason(), Some(InitFailureReason::Unknown));
    }

    #[test]
    fn test_nis_beyond_2x_keeps_enhancement() {
        let mut s = setup(RecordingBackend::new(), enhanced_config());
        let stream = DecoderParameters {
            width: 1280,
            height: 720,
            ..params(VideoFormat::HEVC, true)
        };
        s.renderer
            .initialize(&stream, &TestWindow(Dimensions::new(3840, 2160)))
            .unwrap();

        let config = *s.renderer.pipeline_config().unwrap();
        assert!(config.enhancement_enabled);
        assert_eq!(config.enhancer, Enhancer::NisSharpen);
        assert_eq!(config.upscaler_label, "Video Processor");
        assert!(s.renderer.enhancement_state().is_video_enhancement_enabled());

        let pool = s.renderer.decoder_pool().unwrap().clone();
        let outcome = s.renderer.render_frame(&frame(&pool, 0)).unwrap();
        assert_eq!(outcome, FrameOutcome::Presented { degraded: false });
        assert_eq!(
            s.backend
                .recorder()
                .count(|c| matches!(c, Command::Dispatch { .. })),
            1
        );
    }

    #[test]
    fn test_overlays_sized_to_letterboxed_output() {
        let mut s = setup(RecordingBackend::new(), RendererConfig::default());
        s.renderer
            .initialize(&params(VideoFormat::H264, false), &TestWindow(Dimensions::new(2560, 1600)))
            .unwrap();
        let output = s.renderer.pipeline_config().unwrap().output.size();
        assert_eq!(output, Dimensions::new(2560, 1440));
        assert_eq!(s.renderer.overlays().unwrap().output(), output);
    }

    #[test]
    fn test_disabled_by_config() {
        let mut config = RendererConfig::default();
        config.renderer_enabled = false;
        let mut s = setup(RecordingBackend::new(), config);
        assert!(matches!(
            s.renderer.initialize(&params(VideoFormat::H264, false), &window()),
            Err(RendererError::Disabled)
        ));
    }

    #[test]
    fn test_build_failure_falls_back() {
        let backend = RecordingBackend::new();
        backend.faults().shader_passes = true;
        let mut s = setup(backend, enhanced_config());
        s.renderer
            .initialize(&params(VideoFormat::HEVC, true), &window())
            .unwrap();
        assert!(!s.renderer.pipeline_config().unwrap().enhancement_enabled);
        assert!(!s.renderer.enhancement_state().is_video_enhancement_enabled());
    }

    #[test]
    fn test_render_before_initialize() {
        let mut s = setup(RecordingBackend::new(), RendererConfig::default());
        let pool = s
            .backend
            .create_decoder_pool(Dimensions::new(1920, 1088), TextureFormat::Nv12);
        let f = frame(&pool, 0);
        assert!(matches!(
            s.renderer.render_frame(&f),
            Err(RendererError::NotInitialized)
        ));
    }

    #[test]
    fn test_display_hdr_change_requests_reset() {
        let mut s = setup(RecordingBackend::new(), RendererConfig::default());
        s.renderer
            .initialize(&params(VideoFormat::HEVC, false), &window())
            .unwrap();
        let pool = s.renderer.decoder_pool().unwrap().clone();
        let f = frame(&pool, 0);

        s.backend.set_display_hdr(true);
        let start = Instant::now();
        loop {
            let outcome = s.renderer.render_frame(&f).unwrap();
            if outcome == FrameOutcome::ResetRequested(ResetReason::DisplayHdrChanged) {
                break;
            }
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(
            s.events.try_recv(),
            Ok(RendererEvent::RenderTargetsReset(ResetReason::DisplayHdrChanged))
        );
    }

    #[test]
    fn test_preferences_change_posts_reset() {
        struct Prefs(parking_lot::Mutex<SuperResolutionMode>);
        impl PreferenceSource for Prefs {
            fn super_resolution_mode(&self) -> SuperResolutionMode {
                *self.0.lock()
            }
            fn video_enhancement_enabled(&self) -> bool {
                true
            }
            fn vsync_enabled(&self) -> bool {
                true
            }
        }

        let prefs = Arc::new(Prefs(parking_lot::Mutex::new(SuperResolutionMode::Auto)));
        let mut s = setup(RecordingBackend::new(), enhanced_config());
        s.renderer = std::mem::replace(
            &mut s.renderer,
            VideoRenderer::new(
                s.backend.clone(),
                RendererConfig::default(),
                unbounded().0,
                s._runtime.handle().clone(),
            ),
        )
        .with_preferences(prefs.clone());
        s.renderer
            .initialize(&params(VideoFormat::HEVC, true), &window())
            .unwrap();
        assert!(!s.renderer.notify_preferences_changed());

        *prefs.0.lock() = SuperResolutionMode::Cas;
        assert!(s.renderer.notify_preferences_changed());
        assert_eq!(
            s.events.try_recv(),
            Ok(RendererEvent::RenderTargetsReset(ResetReason::PreferencesChanged))
        );
    }

    #[test]
    fn test_overlay_update_through_renderer() {
        let mut s = setup(RecordingBackend::new(), RendererConfig::default());
        s.renderer
            .initialize(&params(VideoFormat::H264, false), &window())
            .unwrap();
        s.renderer
            .update_overlay(OverlayKind::Debug, true, Some(&image::RgbaImage::new(100, 40)))
            .unwrap();
        let pool = s.renderer.decoder_pool().unwrap().clone();
        let f = frame(&pool, 1);
        s.renderer.render_frame(&f).unwrap();
        assert_eq!(
            s.backend
                .recorder()
                .count(|c| matches!(c, Command::DrawOverlay { .. })),
            1
        );
    }

    #[test]
    fn test_decoder_preparation() {
        let prep = VideoRenderer::prepare_decoder(&params(VideoFormat::H264, false));
        assert_eq!(prep.alignment, 16);
        assert_eq!(prep.pool_size, 17);
        assert_eq!(prep.surface_size, Dimensions::new(1920, 1088));
    }
}
