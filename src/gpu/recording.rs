// Command-recording GPU backend
// Headless backend that records every call, tracks live resources and injects failures

use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawWindowHandle, Win32WindowHandle};
use std::any::Any;
use std::collections::HashSet;
use std::num::NonZeroIsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use super::{
    AdapterInfo, ColorSpace, ConversionGeometry, ConversionShader, DeviceBundle, DeviceContext,
    Dimensions, DisplayHdrInfo, FeatureLevel, GpuBackend, GpuDevice, GpuError, GpuResource,
    Hdr10Metadata, OverlayResources, PoolViews, PresentFlags, PresentationSurface,
    ProcessorInput, ShaderPass, ShaderPassDesc, ShaderSource, ShaderStage, SurfaceDesc, Texture,
    TextureDesc, TextureFormat, TextureRole, VendorExtension, VendorScaler, VendorScalerDesc,
    VideoProcessor, VideoProcessorCaps, VideoProcessorDesc, VideoSource,
};
use crate::decoder::{
    ColorTransfer, Colorspace, DECODER_BUFFER_POOL_SIZE, DecodedFrame, VideoFormat,
};
use crate::prober::vendor::{NVIDIA_PPE_GUID, NVIDIA_TRUE_HDR_GUID};

const MIB: u64 = 1024 * 1024;

/// Where a recorded draw sampled from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSource {
    Texture(TextureRole),
    PoolSlice(u32),
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateDevice { adapter: u32 },
    CreateTexture {
        role: TextureRole,
        format: TextureFormat,
        size: Dimensions,
    },
    CreateVideoProcessor {
        label: String,
        input_color_space: ColorSpace,
        output_color_space: ColorSpace,
        edge_enhancement: Option<i32>,
    },
    CreateShaderPass { label: String, source: String },
    CreateVendorScaler,
    CreatePoolViews { count: u32 },
    CreateOverlay { tag: u64 },
    CreateSurface {
        format: TextureFormat,
        buffer_count: u32,
        allow_tearing: bool,
    },
    CopyFrame {
        pool_index: u32,
        dst: TextureRole,
        offset: (u32, u32),
    },
    CopyTexture {
        src: TextureRole,
        dst: TextureRole,
        offset: (u32, u32),
    },
    ClearBackBuffer,
    LoadConversionShaders,
    BindConversionShader(ConversionShader),
    UploadConversionConstants(Vec<u8>),
    SetConversionGeometry(ConversionGeometry),
    DrawVideo(DrawSource),
    /// Tags of the texture, vertex buffer and view drawn together
    DrawOverlay { tags: [u64; 3] },
    WaitForDecoder,
    BindFrame { label: String, pool_index: u32 },
    ApplyExtension {
        label: String,
        extension: VendorExtension,
    },
    SetAutoSuperResolution { label: String, enable: bool },
    SetHdrMetadata {
        label: String,
        stream: Option<Hdr10Metadata>,
        output: Option<Hdr10Metadata>,
    },
    Blit { label: String },
    Dispatch { label: String, groups: (u32, u32) },
    DrawPixelShader { label: String },
    VendorUpscale,
    VendorConvert,
    SetColorSpace(ColorSpace),
    Present(PresentFlags),
}

/// Failure injection switches, read on every call
#[derive(Debug, Default)]
pub struct Faults {
    pub device_creation: HashSet<u32>,
    pub texture_roles: HashSet<TextureRole>,
    pub processors: HashSet<String>,
    pub shader_passes: bool,
    pub vendor_scaler: bool,
    pub blits: HashSet<String>,
    pub shader_execute: bool,
    pub present: Option<GpuError>,
}

/// Adapter as seen by the recording backend
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    pub info: AdapterInfo,
    pub feature_level: FeatureLevel,
    pub caps: VideoProcessorCaps,
    pub decoder_formats: Vec<VideoFormat>,
    pub intel_vpe: bool,
    pub nvidia_vsr: bool,
    pub nvidia_true_hdr: bool,
    pub vendor_scaler: bool,
}

impl AdapterSpec {
    pub fn new(vendor_id: u32, description: &str) -> Self {
        Self {
            info: AdapterInfo {
                index: 0,
                description: description.to_string(),
                vendor_id,
                device_id: 0,
                dedicated_video_memory: 8192 * MIB,
                shared_system_memory: 256 * MIB,
                software: false,
                mesh_shader_tier: 0,
            },
            feature_level: FeatureLevel::Level11_1,
            caps: VideoProcessorCaps {
                edge_enhancement: true,
                auto_stream_super_resolution: false,
            },
            decoder_formats: vec![
                VideoFormat::H264,
                VideoFormat::HEVC,
                VideoFormat::HEVC_MAIN10,
                VideoFormat::AV1,
                VideoFormat::AV1_MAIN10,
            ],
            intel_vpe: false,
            nvidia_vsr: false,
            nvidia_true_hdr: false,
            vendor_scaler: false,
        }
    }

    pub fn nvidia(description: &str) -> Self {
        let mut spec = Self::new(0x10DE, description);
        spec.nvidia_vsr = true;
        spec.nvidia_true_hdr = true;
        spec
    }

    pub fn amd(description: &str) -> Self {
        let mut spec = Self::new(0x1002, description);
        spec.vendor_scaler = true;
        spec
    }

    pub fn intel(description: &str) -> Self {
        let mut spec = Self::new(0x8086, description);
        spec.intel_vpe = true;
        spec
    }

    pub fn software() -> Self {
        let mut spec = Self::new(0x1414, "Microsoft Basic Render Driver");
        spec.info.software = true;
        spec
    }

    pub fn integrated(mut self) -> Self {
        self.info.dedicated_video_memory = 128 * MIB;
        self.info.shared_system_memory = 8192 * MIB;
        self
    }

    pub fn feature_level(mut self, level: FeatureLevel) -> Self {
        self.feature_level = level;
        self
    }

    fn supports(&self, extension: &VendorExtension) -> bool {
        match extension {
            VendorExtension::IntelOutput { .. } | VendorExtension::IntelStream { .. } => {
                self.intel_vpe
            }
            VendorExtension::NvidiaStream { guid, .. } if *guid == NVIDIA_PPE_GUID => {
                self.nvidia_vsr
            }
            VendorExtension::NvidiaStream { guid, .. } if *guid == NVIDIA_TRUE_HDR_GUID => {
                self.nvidia_true_hdr
            }
            VendorExtension::NvidiaStream { .. } => false,
        }
    }
}

struct Shared {
    commands: Mutex<Vec<Command>>,
    faults: Mutex<Faults>,
    live: AtomicUsize,
    next_tag: AtomicU64,
    display_hdr: AtomicBool,
    hdr_queries: AtomicUsize,
    display_metadata: Mutex<Option<DisplayHdrInfo>>,
}

impl Shared {
    fn record(&self, command: Command) {
        self.commands.lock().push(command);
    }

    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }
}

/// Handle for inspecting what a backend recorded
#[derive(Clone)]
pub struct Recorder {
    shared: Arc<Shared>,
}

impl Recorder {
    pub fn commands(&self) -> Vec<Command> {
        self.shared.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.shared.commands.lock().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.shared.commands.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Resources created and not yet dropped
    pub fn live_resources(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Number of display HDR status queries answered
    pub fn hdr_queries(&self) -> usize {
        self.shared.hdr_queries.load(Ordering::Acquire)
    }
}

/// Backend object; counts itself live until dropped
pub struct RecordedResource {
    pub tag: u64,
    pub role: TextureRole,
    shared: Arc<Shared>,
}

impl RecordedResource {
    fn new(shared: &Arc<Shared>, role: TextureRole, tag: u64) -> Arc<Self> {
        shared.live.fetch_add(1, Ordering::AcqRel);
        Arc::new(Self {
            tag,
            role,
            shared: shared.clone(),
        })
    }
}

impl Drop for RecordedResource {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl GpuResource for RecordedResource {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn tag_of(resource: &Arc<dyn GpuResource>) -> u64 {
    resource
        .as_any()
        .downcast_ref::<RecordedResource>()
        .map(|r| r.tag)
        .unwrap_or(u64::MAX)
}

/// Recording implementation of `GpuBackend`
pub struct RecordingBackend {
    shared: Arc<Shared>,
    adapters: Vec<AdapterSpec>,
    tearing: AtomicBool,
}

impl RecordingBackend {
    /// Single discrete NVIDIA adapter without RTX features
    pub fn new() -> Self {
        Self::with_adapters(vec![AdapterSpec::nvidia("NVIDIA GeForce GTX 1080")])
    }

    pub fn with_adapters(adapters: Vec<AdapterSpec>) -> Self {
        let adapters = adapters
            .into_iter()
            .enumerate()
            .map(|(i, mut spec)| {
                spec.info.index = i as u32;
                spec
            })
            .collect();
        Self {
            shared: Arc::new(Shared {
                commands: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                live: AtomicUsize::new(0),
                next_tag: AtomicU64::new(1),
                display_hdr: AtomicBool::new(false),
                hdr_queries: AtomicUsize::new(0),
                display_metadata: Mutex::new(None),
            }),
            adapters,
            tearing: AtomicBool::new(true),
        }
    }

    pub fn recorder(&self) -> Recorder {
        Recorder {
            shared: self.shared.clone(),
        }
    }

    pub fn faults(&self) -> MutexGuard<'_, Faults> {
        self.shared.faults.lock()
    }

    pub fn set_display_hdr(&self, enabled: bool) {
        self.shared.display_hdr.store(enabled, Ordering::Release);
    }

    pub fn set_display_metadata(&self, info: Option<DisplayHdrInfo>) {
        *self.shared.display_metadata.lock() = info;
    }

    pub fn set_tearing_supported(&self, supported: bool) {
        self.tearing.store(supported, Ordering::Release);
    }

    /// Decoder pool texture array as the decoder would allocate it
    pub fn create_decoder_pool(&self, size: Dimensions, format: TextureFormat) -> Texture {
        let tag = self.shared.next_tag();
        let desc = TextureDesc::new(size, format, TextureRole::DecoderInput);
        Texture::new(desc, RecordedResource::new(&self.shared, TextureRole::DecoderInput, tag))
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for RecordingBackend {
    fn info(&self) -> &str {
        "Recording (headless)"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, GpuError> {
        Ok(self.adapters.iter().map(|a| a.info.clone()).collect())
    }

    fn create_device(&self, adapter_index: u32) -> Result<DeviceBundle, GpuError> {
        let spec = self
            .adapters
            .get(adapter_index as usize)
            .ok_or_else(|| GpuError::CreationFailed(format!("No adapter {}", adapter_index)))?;
        if self.shared.faults.lock().device_creation.contains(&adapter_index) {
            return Err(GpuError::CreationFailed(format!(
                "Device creation failed on adapter {}",
                adapter_index
            )));
        }
        self.shared.record(Command::CreateDevice {
            adapter: adapter_index,
        });

        let device = Arc::new(RecordingDevice {
            shared: self.shared.clone(),
            spec: spec.clone(),
        });
        Ok(DeviceBundle {
            device,
            context: Box::new(RecordingContext {
                shared: self.shared.clone(),
            }),
        })
    }

    fn create_presentation_surface(
        &self,
        device: &Arc<dyn GpuDevice>,
        _window: RawWindowHandle,
        desc: &SurfaceDesc,
    ) -> Result<Arc<dyn PresentationSurface>, GpuError> {
        let back_buffer = device.create_texture(
            &TextureDesc::new(desc.size, desc.format, TextureRole::BackBuffer).render_target(),
        )?;
        self.shared.record(Command::CreateSurface {
            format: desc.format,
            buffer_count: desc.buffer_count,
            allow_tearing: desc.allow_tearing,
        });
        Ok(Arc::new(RecordingSurface {
            shared: self.shared.clone(),
            back_buffer,
        }))
    }

    fn tearing_supported(&self) -> bool {
        self.tearing.load(Ordering::Acquire)
    }

    fn display_hdr_enabled(&self, _window: RawWindowHandle) -> bool {
        self.shared.hdr_queries.fetch_add(1, Ordering::AcqRel);
        self.shared.display_hdr.load(Ordering::Acquire)
    }
}

pub struct RecordingDevice {
    shared: Arc<Shared>,
    spec: AdapterSpec,
}

impl RecordingDevice {
    fn resource(&self, role: TextureRole) -> Arc<dyn GpuResource> {
        RecordedResource::new(&self.shared, role, self.shared.next_tag())
    }
}

impl GpuDevice for RecordingDevice {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.spec.info
    }

    fn feature_level(&self) -> FeatureLevel {
        self.spec.feature_level
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Texture, GpuError> {
        if self.shared.faults.lock().texture_roles.contains(&desc.role) {
            return Err(GpuError::CreationFailed(format!(
                "Injected failure creating {:?} texture",
                desc.role
            )));
        }
        if desc.render_target && !desc.format.supports_render_target() {
            return Err(GpuError::Unsupported(format!(
                "{:?} cannot be a render target",
                desc.format
            )));
        }
        self.shared.record(Command::CreateTexture {
            role: desc.role,
            format: desc.format,
            size: desc.size(),
        });
        Ok(Texture::new(*desc, self.resource(desc.role)))
    }

    fn create_texture_with_data(
        &self,
        desc: &TextureDesc,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<Texture, GpuError> {
        let expected = row_pitch as usize * desc.height as usize;
        if data.len() < expected {
            return Err(GpuError::CreationFailed(format!(
                "Initial data too small: {} < {}",
                data.len(),
                expected
            )));
        }
        self.create_texture(desc)
    }

    fn create_video_processor(
        &self,
        desc: &VideoProcessorDesc,
        input: ProcessorInput<'_>,
        output: &Texture,
    ) -> Result<Box<dyn VideoProcessor>, GpuError> {
        if self.shared.faults.lock().processors.contains(desc.label) {
            return Err(GpuError::CreationFailed(format!(
                "Injected failure creating {}",
                desc.label
            )));
        }
        if !output.format().supports_render_target() {
            return Err(GpuError::Unsupported(format!(
                "{:?} cannot be a video processor output",
                output.format()
            )));
        }
        let input_role = match input {
            ProcessorInput::DecoderFrame => None,
            ProcessorInput::Texture(texture) => Some(texture.desc().role),
        };
        self.shared.record(Command::CreateVideoProcessor {
            label: desc.label.to_string(),
            input_color_space: desc.input_color_space,
            output_color_space: desc.output_color_space,
            edge_enhancement: desc.edge_enhancement.filter(|_| self.spec.caps.edge_enhancement),
        });
        Ok(Box::new(RecordingProcessor {
            shared: self.shared.clone(),
            label: desc.label.to_string(),
            spec: self.spec.clone(),
            input_role,
            bound_frame: None,
            _handle: self.resource(TextureRole::Video),
        }))
    }

    fn create_shader_pass(
        &self,
        desc: &ShaderPassDesc,
        source: &dyn ShaderSource,
        input: &Texture,
        output: &Texture,
        lookups: &[Texture],
    ) -> Result<Box<dyn ShaderPass>, GpuError> {
        if self.shared.faults.lock().shader_passes {
            return Err(GpuError::CreationFailed(format!(
                "Injected failure creating {}",
                desc.label
            )));
        }
        source.load(desc.source_name)?;
        if !input.format().is_rgb() || !output.format().is_rgb() {
            return Err(GpuError::Unsupported(format!(
                "{} needs RGB textures, got {:?} -> {:?}",
                desc.label,
                input.format(),
                output.format()
            )));
        }
        self.shared.record(Command::CreateShaderPass {
            label: desc.label.to_string(),
            source: desc.source_name.to_string(),
        });

        let intermediate = match desc.stage {
            ShaderStage::Compute { .. } => Some(self.create_texture(
                &TextureDesc::new(
                    desc.output_size,
                    output.format(),
                    TextureRole::ShaderIntermediate,
                )
                .unordered_access(),
            )?),
            ShaderStage::Pixel => None,
        };

        Ok(Box::new(RecordingShaderPass {
            shared: self.shared.clone(),
            desc: desc.clone(),
            output_role: output.desc().role,
            _lookups: lookups.to_vec(),
            _intermediate: intermediate,
        }))
    }

    fn create_vendor_scaler(
        &self,
        _desc: &VendorScalerDesc,
    ) -> Result<Box<dyn VendorScaler>, GpuError> {
        if !self.spec.vendor_scaler || self.shared.faults.lock().vendor_scaler {
            return Err(GpuError::Unsupported(
                "The hardware does not provide a vendor scaler".to_string(),
            ));
        }
        self.shared.record(Command::CreateVendorScaler);
        Ok(Box::new(RecordingScaler {
            shared: self.shared.clone(),
        }))
    }

    fn create_pool_views(
        &self,
        _pool: &Arc<dyn GpuResource>,
        _format: TextureFormat,
        count: u32,
    ) -> Result<PoolViews, GpuError> {
        self.shared.record(Command::CreatePoolViews { count });
        Ok(PoolViews::new(
            (0..count)
                .map(|_| self.resource(TextureRole::DecoderInput))
                .collect(),
        ))
    }

    fn create_overlay(
        &self,
        image: &image::RgbaImage,
        _ndc_rect: [f32; 4],
    ) -> Result<OverlayResources, GpuError> {
        let tag = self.shared.next_tag();
        let desc = TextureDesc::new(
            Dimensions::new(image.width(), image.height()),
            TextureFormat::Bgra8,
            TextureRole::Overlay,
        );
        self.shared.record(Command::CreateOverlay { tag });
        Ok(OverlayResources {
            texture: Texture::new(
                desc,
                RecordedResource::new(&self.shared, TextureRole::Overlay, tag),
            ),
            vertex_buffer: RecordedResource::new(&self.shared, TextureRole::Overlay, tag),
            view: RecordedResource::new(&self.shared, TextureRole::Overlay, tag),
        })
    }

    fn check_decoder_support(&self, format: VideoFormat) -> Result<bool, GpuError> {
        Ok(self.spec.decoder_formats.contains(&format))
    }

    fn video_processor_caps(&self) -> Result<VideoProcessorCaps, GpuError> {
        Ok(self.spec.caps)
    }
}

pub struct RecordingContext {
    shared: Arc<Shared>,
}

impl DeviceContext for RecordingContext {
    fn copy_frame(
        &mut self,
        frame: &DecodedFrame,
        dst: &Texture,
        dst_offset: (u32, u32),
        _src_box: super::Rect,
    ) -> Result<(), GpuError> {
        if frame.pool_index >= DECODER_BUFFER_POOL_SIZE {
            return Err(GpuError::InvalidPoolIndex(frame.pool_index));
        }
        self.shared.record(Command::CopyFrame {
            pool_index: frame.pool_index,
            dst: dst.desc().role,
            offset: dst_offset,
        });
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: &Texture,
        dst: &Texture,
        dst_offset: (u32, u32),
        _src_box: super::Rect,
    ) -> Result<(), GpuError> {
        self.shared.record(Command::CopyTexture {
            src: src.desc().role,
            dst: dst.desc().role,
            offset: dst_offset,
        });
        Ok(())
    }

    fn clear_and_bind_back_buffer(&mut self, _color: [f32; 4]) -> Result<(), GpuError> {
        self.shared.record(Command::ClearBackBuffer);
        Ok(())
    }

    fn load_conversion_shaders(&mut self, source: &dyn ShaderSource) -> Result<(), GpuError> {
        source.load(super::VERTEX_SHADER)?;
        source.load(super::OVERLAY_PIXEL_SHADER)?;
        for shader in ConversionShader::ALL {
            source.load(shader.file_name())?;
        }
        self.shared.record(Command::LoadConversionShaders);
        Ok(())
    }

    fn bind_conversion_shader(&mut self, shader: ConversionShader) -> Result<(), GpuError> {
        self.shared.record(Command::BindConversionShader(shader));
        Ok(())
    }

    fn upload_conversion_constants(&mut self, constants: &[u8]) -> Result<(), GpuError> {
        self.shared
            .record(Command::UploadConversionConstants(constants.to_vec()));
        Ok(())
    }

    fn set_conversion_geometry(&mut self, geometry: &ConversionGeometry) -> Result<(), GpuError> {
        self.shared.record(Command::SetConversionGeometry(*geometry));
        Ok(())
    }

    fn draw_video(&mut self, source: VideoSource<'_>) -> Result<(), GpuError> {
        let source = match source {
            VideoSource::Texture(texture) => DrawSource::Texture(texture.desc().role),
            VideoSource::PoolSlice(views, index) => {
                views.get(index)?;
                DrawSource::PoolSlice(index)
            }
        };
        self.shared.record(Command::DrawVideo(source));
        Ok(())
    }

    fn draw_overlay(&mut self, overlay: &OverlayResources) -> Result<(), GpuError> {
        self.shared.record(Command::DrawOverlay {
            tags: [
                tag_of(overlay.texture.resource()),
                tag_of(&overlay.vertex_buffer),
                tag_of(&overlay.view),
            ],
        });
        Ok(())
    }

    fn wait_for_decoder(&mut self) -> Result<(), GpuError> {
        self.shared.record(Command::WaitForDecoder);
        Ok(())
    }
}

struct RecordingProcessor {
    shared: Arc<Shared>,
    label: String,
    spec: AdapterSpec,
    input_role: Option<TextureRole>,
    bound_frame: Option<u32>,
    _handle: Arc<dyn GpuResource>,
}

impl VideoProcessor for RecordingProcessor {
    fn label(&self) -> &str {
        &self.label
    }

    fn caps(&self) -> VideoProcessorCaps {
        self.spec.caps
    }

    fn bind_frame(&mut self, frame: &DecodedFrame) -> Result<(), GpuError> {
        if frame.pool_index >= DECODER_BUFFER_POOL_SIZE {
            return Err(GpuError::InvalidPoolIndex(frame.pool_index));
        }
        self.bound_frame = Some(frame.pool_index);
        self.shared.record(Command::BindFrame {
            label: self.label.clone(),
            pool_index: frame.pool_index,
        });
        Ok(())
    }

    fn apply_extension(&mut self, extension: &VendorExtension) -> Result<(), GpuError> {
        if !self.spec.supports(extension) {
            return Err(GpuError::Unsupported(format!(
                "{} rejected {:?}",
                self.spec.info.description, extension
            )));
        }
        self.shared.record(Command::ApplyExtension {
            label: self.label.clone(),
            extension: *extension,
        });
        Ok(())
    }

    fn set_auto_super_resolution(&mut self, enable: bool) -> Result<(), GpuError> {
        if !self.spec.caps.auto_stream_super_resolution {
            return Err(GpuError::Unsupported(
                "Auto stream super resolution not available".to_string(),
            ));
        }
        self.shared.record(Command::SetAutoSuperResolution {
            label: self.label.clone(),
            enable,
        });
        Ok(())
    }

    fn set_hdr_metadata(
        &mut self,
        stream: Option<&Hdr10Metadata>,
        output: Option<&Hdr10Metadata>,
    ) -> Result<(), GpuError> {
        self.shared.record(Command::SetHdrMetadata {
            label: self.label.clone(),
            stream: stream.copied(),
            output: output.copied(),
        });
        Ok(())
    }

    fn blit(&mut self) -> Result<(), GpuError> {
        if self.input_role.is_none() && self.bound_frame.is_none() {
            return Err(GpuError::Backend(format!("{} has no input view", self.label)));
        }
        if self.shared.faults.lock().blits.contains(&self.label) {
            return Err(GpuError::Backend(format!("Injected blit failure in {}", self.label)));
        }
        self.shared.record(Command::Blit {
            label: self.label.clone(),
        });
        Ok(())
    }
}

struct RecordingShaderPass {
    shared: Arc<Shared>,
    desc: ShaderPassDesc,
    output_role: TextureRole,
    _lookups: Vec<Texture>,
    _intermediate: Option<Texture>,
}

impl ShaderPass for RecordingShaderPass {
    fn label(&self) -> &str {
        self.desc.label
    }

    fn execute(&mut self) -> Result<(), GpuError> {
        if self.shared.faults.lock().shader_execute {
            return Err(GpuError::Backend(format!(
                "Injected dispatch failure in {}",
                self.desc.label
            )));
        }
        match self.desc.stage {
            ShaderStage::Compute { .. } => {
                self.shared.record(Command::Dispatch {
                    label: self.desc.label.to_string(),
                    groups: self.desc.dispatch_groups(),
                });
                self.shared.record(Command::CopyTexture {
                    src: TextureRole::ShaderIntermediate,
                    dst: self.output_role,
                    offset: self.desc.target_offset,
                });
            }
            ShaderStage::Pixel => self.shared.record(Command::DrawPixelShader {
                label: self.desc.label.to_string(),
            }),
        }
        Ok(())
    }
}

struct RecordingScaler {
    shared: Arc<Shared>,
}

impl VendorScaler for RecordingScaler {
    fn upscale(&mut self, _input: &Texture, _output: &Texture) -> Result<(), GpuError> {
        self.shared.record(Command::VendorUpscale);
        Ok(())
    }

    fn convert(&mut self, _input: &Texture, _output: &Texture) -> Result<(), GpuError> {
        self.shared.record(Command::VendorConvert);
        Ok(())
    }
}

struct RecordingSurface {
    shared: Arc<Shared>,
    back_buffer: Texture,
}

impl PresentationSurface for RecordingSurface {
    fn back_buffer(&self) -> &Texture {
        &self.back_buffer
    }

    fn set_color_space(&self, color_space: ColorSpace) -> Result<(), GpuError> {
        self.shared.record(Command::SetColorSpace(color_space));
        Ok(())
    }

    fn present(&self, flags: PresentFlags) -> Result<(), GpuError> {
        if let Some(e) = self.shared.faults.lock().present.clone() {
            return Err(e);
        }
        self.shared.record(Command::Present(flags));
        Ok(())
    }

    fn display_hdr_enabled(&self) -> bool {
        self.shared.hdr_queries.fetch_add(1, Ordering::AcqRel);
        self.shared.display_hdr.load(Ordering::Acquire)
    }

    fn display_hdr_metadata(&self) -> Option<DisplayHdrInfo> {
        *self.shared.display_metadata.lock()
    }
}

/// Shader source returning the resource name as its bytes
#[derive(Debug, Default)]
pub struct MemoryShaderSource {
    missing: HashSet<String>,
}

impl MemoryShaderSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without(mut self, name: &str) -> Self {
        self.missing.insert(name.to_string());
        self
    }
}

impl ShaderSource for MemoryShaderSource {
    fn load(&self, name: &str) -> Result<Vec<u8>, GpuError> {
        if self.missing.contains(name) {
            return Err(GpuError::ShaderLoad(format!("{}: not found", name)));
        }
        // Lookup tables are read as 2x64 texels of up to 16 bytes
        Ok(name.bytes().cycle().take(2 * 64 * 16).collect())
    }
}

/// Placeholder window for headless sessions
pub fn headless_window() -> RawWindowHandle {
    RawWindowHandle::Win32(Win32WindowHandle::new(NonZeroIsize::MIN))
}

/// Frame in slice `pool_index` of `pool`
pub fn frame(pool: &Texture, pool_index: u32) -> DecodedFrame {
    DecodedFrame {
        surface: pool.resource().clone(),
        pool_index,
        color_trc: ColorTransfer::Bt709,
        colorspace: Colorspace::Rec709,
        full_range: false,
    }
}
