// GPU abstraction layer
// Backend-neutral formats, color-space tags, textures and stage traits

#[cfg(target_os = "windows")]
pub mod d3d11;
pub mod recording;

use raw_window_handle::RawWindowHandle;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::decoder::{DecodedFrame, VideoFormat};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    #[error("Resource creation failed: {0}")]
    CreationFailed(String),
    #[error("Not supported: {0}")]
    Unsupported(String),
    #[error("Device lost: {0}")]
    DeviceLost(String),
    #[error("Decoder pool index out of range: {0}")]
    InvalidPoolIndex(u32),
    #[error("Failed to load shader: {0}")]
    ShaderLoad(String),
    #[error("Backend call failed: {0}")]
    Backend(String),
}

impl GpuError {
    /// Capability-absent errors are recovered silently by falling back
    pub fn is_unsupported(&self) -> bool {
        matches!(self, GpuError::Unsupported(_))
    }
}

/// Pixel formats used by decoder surfaces, intermediates and views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Nv12,
    P010,
    Ayuv,
    Y410,
    Rgba8,
    Rgb10A2,
    Bgra8,
    R8,
    R8G8,
    R16,
    R16G16,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            TextureFormat::Nv12 | TextureFormat::P010 | TextureFormat::Ayuv | TextureFormat::Y410
        )
    }

    /// Formats a compute or pixel shader can read as RGB and write through a UAV/RTV
    pub fn is_rgb(self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8 | TextureFormat::Rgb10A2 | TextureFormat::Bgra8
        )
    }

    pub fn is_ten_bit(self) -> bool {
        matches!(
            self,
            TextureFormat::P010 | TextureFormat::Y410 | TextureFormat::Rgb10A2
        )
    }

    pub fn is_yuv444(self) -> bool {
        matches!(self, TextureFormat::Ayuv | TextureFormat::Y410)
    }

    /// Y410 cannot be bound as a render target
    pub fn supports_render_target(self) -> bool {
        !matches!(self, TextureFormat::Y410)
    }

    /// Per-plane shader resource view formats used by the conversion shaders
    pub fn plane_view_formats(self) -> Vec<TextureFormat> {
        match self {
            TextureFormat::Nv12 => vec![TextureFormat::R8, TextureFormat::R8G8],
            TextureFormat::P010 => vec![TextureFormat::R16, TextureFormat::R16G16],
            TextureFormat::Ayuv => vec![TextureFormat::Rgba8],
            TextureFormat::Y410 => vec![TextureFormat::Rgb10A2],
            other => vec![other],
        }
    }

    /// Size in bytes of one texel of a packed format
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::R8 => 1,
            TextureFormat::R8G8 | TextureFormat::R16 => 2,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            _ => 4,
        }
    }
}

/// DXGI-style color space tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    YcbcrStudioG22LeftP709,
    YcbcrStudioG2084LeftP2020,
    RgbFullG22NoneP709,
    RgbFullG2084NoneP2020,
    RgbStudioG2084NoneP2020,
    RgbStudioG24NoneP2020,
    RgbStudioG22NoneP2020,
    RgbFullG22NoneP2020,
    YcbcrFullG22LeftP709,
}

impl ColorSpace {
    pub fn is_ycbcr(self) -> bool {
        matches!(
            self,
            ColorSpace::YcbcrStudioG22LeftP709
                | ColorSpace::YcbcrStudioG2084LeftP2020
                | ColorSpace::YcbcrFullG22LeftP709
        )
    }

    pub fn is_pq(self) -> bool {
        matches!(
            self,
            ColorSpace::YcbcrStudioG2084LeftP2020
                | ColorSpace::RgbFullG2084NoneP2020
                | ColorSpace::RgbStudioG2084NoneP2020
        )
    }

    /// Output color spaces that indicate the OS has HDR enabled on a display
    pub fn is_hdr_output(self) -> bool {
        matches!(
            self,
            ColorSpace::RgbFullG2084NoneP2020
                | ColorSpace::RgbStudioG2084NoneP2020
                | ColorSpace::RgbStudioG24NoneP2020
                | ColorSpace::RgbStudioG22NoneP2020
                | ColorSpace::RgbFullG22NoneP2020
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both dimensions down to even
    pub fn even(self) -> Self {
        Self::new(self.width & !1, self.height & !1)
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_size(size: Dimensions) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Usage role fixed at texture creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureRole {
    DecoderInput,
    Video,
    FirstPassOutput,
    Enhanced,
    ToneMap,
    ShaderIntermediate,
    VendorInput,
    BackBuffer,
    Overlay,
    Lookup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub role: TextureRole,
    pub render_target: bool,
    pub unordered_access: bool,
}

impl TextureDesc {
    pub fn new(size: Dimensions, format: TextureFormat, role: TextureRole) -> Self {
        Self {
            width: size.width,
            height: size.height,
            format,
            role,
            render_target: false,
            unordered_access: false,
        }
    }

    pub fn render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    pub fn unordered_access(mut self) -> Self {
        self.unordered_access = true;
        self
    }

    pub fn size(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Opaque backend object; backends downcast through `as_any`
pub trait GpuResource: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A GPU texture released when the last handle drops
#[derive(Clone)]
pub struct Texture {
    desc: TextureDesc,
    resource: Arc<dyn GpuResource>,
}

impl Texture {
    pub fn new(desc: TextureDesc, resource: Arc<dyn GpuResource>) -> Self {
        Self { desc, resource }
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn resource(&self) -> &Arc<dyn GpuResource> {
        &self.resource
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn size(&self) -> Dimensions {
        self.desc.size()
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture").field("desc", &self.desc).finish()
    }
}

/// Adapter description reported by enumeration
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub index: u32,
    pub description: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub dedicated_video_memory: u64,
    pub shared_system_memory: u64,
    pub software: bool,
    pub mesh_shader_tier: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Level10_0,
    Level10_1,
    Level11_0,
    Level11_1,
}

/// Static HDR10 metadata in the fixed-point units the compositor expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hdr10Metadata {
    pub red_primary: [u16; 2],
    pub green_primary: [u16; 2],
    pub blue_primary: [u16; 2],
    pub white_point: [u16; 2],
    pub max_mastering_luminance: u32,
    pub min_mastering_luminance: u32,
    pub max_content_light_level: u16,
    pub max_frame_average_light_level: u16,
}

/// Fill color for the area outside the destination rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Background {
    YCbCr,
    Rgb,
}

impl Background {
    pub fn color(self) -> [f32; 4] {
        match self {
            Background::YCbCr => [0.0625, 0.5, 0.5, 1.0],
            Background::Rgb => [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Vendor driver extension GUID, stored as a 128-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionGuid(pub u128);

/// A private vendor interface call on a video processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorExtension {
    /// Intel video pre-processing interface: a function id with one u32 parameter
    IntelOutput { function: u32, param: u32 },
    IntelStream { function: u32, param: u32 },
    /// NVIDIA stream interface payload of three u32 fields
    NvidiaStream {
        guid: ExtensionGuid,
        version: u32,
        method: u32,
        enable: u32,
    },
}

/// Where a compositor processing unit reads its input from
pub enum ProcessorInput<'a> {
    /// Re-bound every frame to the decoder pool slice of that frame
    DecoderFrame,
    Texture(&'a Texture),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoProcessorDesc {
    pub label: &'static str,
    pub input_size: Dimensions,
    pub output_size: Dimensions,
    pub frame_rate: u32,
    pub source_rect: Rect,
    pub dest_rect: Rect,
    pub target_rect: Rect,
    pub input_color_space: ColorSpace,
    pub output_color_space: ColorSpace,
    pub background: Background,
    pub input_format: TextureFormat,
    /// Edge enhancement strength, applied when the processor supports it
    pub edge_enhancement: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoProcessorCaps {
    pub edge_enhancement: bool,
    pub auto_stream_super_resolution: bool,
}

/// Compositor-provided video processing unit
pub trait VideoProcessor: Send {
    fn label(&self) -> &str;
    fn caps(&self) -> VideoProcessorCaps;
    /// Re-create the lightweight input view over the frame's pool slice
    fn bind_frame(&mut self, frame: &DecodedFrame) -> Result<(), GpuError>;
    fn apply_extension(&mut self, extension: &VendorExtension) -> Result<(), GpuError>;
    fn set_auto_super_resolution(&mut self, enable: bool) -> Result<(), GpuError>;
    fn set_hdr_metadata(
        &mut self,
        stream: Option<&Hdr10Metadata>,
        output: Option<&Hdr10Metadata>,
    ) -> Result<(), GpuError>;
    fn blit(&mut self) -> Result<(), GpuError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Compute { tile_width: u32, tile_height: u32 },
    Pixel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderPassDesc {
    pub label: &'static str,
    /// Resource name resolved through the `ShaderSource`
    pub source_name: &'static str,
    pub entry_point: &'static str,
    pub profile: &'static str,
    pub precompiled: bool,
    pub defines: Vec<(String, String)>,
    pub stage: ShaderStage,
    pub constants: Vec<u8>,
    /// Compute passes write an intermediate of this size, then copy it to the target
    pub output_size: Dimensions,
    pub target_offset: (u32, u32),
}

impl ShaderPassDesc {
    /// Work-group count covering the output
    pub fn dispatch_groups(&self) -> (u32, u32) {
        match self.stage {
            ShaderStage::Compute {
                tile_width,
                tile_height,
            } => (
                self.output_size.width.div_ceil(tile_width),
                self.output_size.height.div_ceil(tile_height),
            ),
            ShaderStage::Pixel => (0, 0),
        }
    }
}

pub trait ShaderPass: Send {
    fn label(&self) -> &str;
    fn execute(&mut self) -> Result<(), GpuError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorScalerDesc {
    pub input_size: Dimensions,
    pub output_size: Dimensions,
    pub frame_rate: u32,
    pub hdr: bool,
    pub sharpness: f32,
}

/// Driver-provided upscaler with its color converter
pub trait VendorScaler: Send {
    fn upscale(&mut self, input: &Texture, output: &Texture) -> Result<(), GpuError>;
    fn convert(&mut self, input: &Texture, output: &Texture) -> Result<(), GpuError>;
}

/// Loads shader source or bytecode by resource name
pub trait ShaderSource: Send + Sync {
    fn load(&self, name: &str) -> Result<Vec<u8>, GpuError>;
}

/// Shaders read from a directory on disk
pub struct DirectoryShaderSource {
    root: std::path::PathBuf,
}

impl DirectoryShaderSource {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderSource for DirectoryShaderSource {
    fn load(&self, name: &str) -> Result<Vec<u8>, GpuError> {
        let path = self.root.join(name);
        std::fs::read(&path)
            .map_err(|e| GpuError::ShaderLoad(format!("{}: {}", path.display(), e)))
    }
}

/// Conversion pixel shader variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionShader {
    GenericYuv420,
    Bt601LimitedYuv420,
    Bt2020LimitedYuv420,
    Ayuv,
    Y410,
}

impl ConversionShader {
    pub fn file_name(self) -> &'static str {
        match self {
            ConversionShader::GenericYuv420 => "d3d11_genyuv_pixel.fxc",
            ConversionShader::Bt601LimitedYuv420 => "d3d11_bt601lim_pixel.fxc",
            ConversionShader::Bt2020LimitedYuv420 => "d3d11_bt2020lim_pixel.fxc",
            ConversionShader::Ayuv => "d3d11_ayuv_pixel.fxc",
            ConversionShader::Y410 => "d3d11_y410_pixel.fxc",
        }
    }

    pub const ALL: [ConversionShader; 5] = [
        ConversionShader::GenericYuv420,
        ConversionShader::Bt601LimitedYuv420,
        ConversionShader::Bt2020LimitedYuv420,
        ConversionShader::Ayuv,
        ConversionShader::Y410,
    ];
}

pub const VERTEX_SHADER: &str = "d3d11_vertex.fxc";
pub const OVERLAY_PIXEL_SHADER: &str = "d3d11_overlay_pixel.fxc";

/// What the conversion draw samples from
pub enum VideoSource<'a> {
    Texture(&'a Texture),
    /// Pre-created views over the decoder pool
    PoolSlice(&'a PoolViews, u32),
}

/// Per-index shader resource views over the decoder pool array
pub struct PoolViews {
    views: Vec<Arc<dyn GpuResource>>,
}

impl PoolViews {
    pub fn new(views: Vec<Arc<dyn GpuResource>>) -> Self {
        Self { views }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn get(&self, index: u32) -> Result<&Arc<dyn GpuResource>, GpuError> {
        self.views
            .get(index as usize)
            .ok_or(GpuError::InvalidPoolIndex(index))
    }
}

/// Texture, vertex buffer and view published together
pub struct OverlayResources {
    pub texture: Texture,
    pub vertex_buffer: Arc<dyn GpuResource>,
    pub view: Arc<dyn GpuResource>,
}

/// Geometry for the color conversion draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionGeometry {
    pub source: Dimensions,
    pub texture: Dimensions,
    pub viewport: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentFlags {
    pub allow_tearing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDesc {
    pub size: Dimensions,
    pub format: TextureFormat,
    pub buffer_count: u32,
    pub allow_tearing: bool,
}

/// Creation-side device operations, callable from any thread
pub trait GpuDevice: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn adapter(&self) -> &AdapterInfo;
    fn feature_level(&self) -> FeatureLevel;
    fn create_texture(&self, desc: &TextureDesc) -> Result<Texture, GpuError>;
    fn create_texture_with_data(
        &self,
        desc: &TextureDesc,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<Texture, GpuError>;
    fn create_video_processor(
        &self,
        desc: &VideoProcessorDesc,
        input: ProcessorInput<'_>,
        output: &Texture,
    ) -> Result<Box<dyn VideoProcessor>, GpuError>;
    fn create_shader_pass(
        &self,
        desc: &ShaderPassDesc,
        source: &dyn ShaderSource,
        input: &Texture,
        output: &Texture,
        lookups: &[Texture],
    ) -> Result<Box<dyn ShaderPass>, GpuError>;
    fn create_vendor_scaler(
        &self,
        desc: &VendorScalerDesc,
    ) -> Result<Box<dyn VendorScaler>, GpuError>;
    fn create_pool_views(
        &self,
        pool: &Arc<dyn GpuResource>,
        format: TextureFormat,
        count: u32,
    ) -> Result<PoolViews, GpuError>;
    fn create_overlay(
        &self,
        image: &image::RgbaImage,
        ndc_rect: [f32; 4],
    ) -> Result<OverlayResources, GpuError>;
    fn check_decoder_support(&self, format: VideoFormat) -> Result<bool, GpuError>;
    fn video_processor_caps(&self) -> Result<VideoProcessorCaps, GpuError>;
}

/// Immediate-context operations, owned by the render thread
pub trait DeviceContext: Send {
    fn copy_frame(
        &mut self,
        frame: &DecodedFrame,
        dst: &Texture,
        dst_offset: (u32, u32),
        src_box: Rect,
    ) -> Result<(), GpuError>;
    fn copy_texture(
        &mut self,
        src: &Texture,
        dst: &Texture,
        dst_offset: (u32, u32),
        src_box: Rect,
    ) -> Result<(), GpuError>;
    fn clear_and_bind_back_buffer(&mut self, color: [f32; 4]) -> Result<(), GpuError>;
    fn load_conversion_shaders(&mut self, source: &dyn ShaderSource) -> Result<(), GpuError>;
    fn bind_conversion_shader(&mut self, shader: ConversionShader) -> Result<(), GpuError>;
    fn upload_conversion_constants(&mut self, constants: &[u8]) -> Result<(), GpuError>;
    fn set_conversion_geometry(&mut self, geometry: &ConversionGeometry) -> Result<(), GpuError>;
    fn draw_video(&mut self, source: VideoSource<'_>) -> Result<(), GpuError>;
    fn draw_overlay(&mut self, overlay: &OverlayResources) -> Result<(), GpuError>;
    /// Wait for the decoder's writes before sampling its textures
    fn wait_for_decoder(&mut self) -> Result<(), GpuError>;
}

/// Swap chain for the target window
pub trait PresentationSurface: Send + Sync {
    fn back_buffer(&self) -> &Texture;
    fn set_color_space(&self, color_space: ColorSpace) -> Result<(), GpuError>;
    fn present(&self, flags: PresentFlags) -> Result<(), GpuError>;
    /// HDR state of the display currently showing the window
    fn display_hdr_enabled(&self) -> bool;
    fn display_hdr_metadata(&self) -> Option<DisplayHdrInfo>;
}

/// Luminance and primaries reported by the display
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplayHdrInfo {
    pub red_primary: [f32; 2],
    pub green_primary: [f32; 2],
    pub blue_primary: [f32; 2],
    pub white_point: [f32; 2],
    pub max_luminance: f32,
    pub min_luminance: f32,
    pub max_full_frame_luminance: f32,
}

impl DisplayHdrInfo {
    /// Convert to HDR10 metadata: chromaticity x50000, minimum luminance x10000
    pub fn to_metadata(&self) -> Hdr10Metadata {
        let chroma = |v: [f32; 2]| {
            [
                (v[0] * 50000.0).round() as u16,
                (v[1] * 50000.0).round() as u16,
            ]
        };
        Hdr10Metadata {
            red_primary: chroma(self.red_primary),
            green_primary: chroma(self.green_primary),
            blue_primary: chroma(self.blue_primary),
            white_point: chroma(self.white_point),
            max_mastering_luminance: self.max_luminance as u32,
            min_mastering_luminance: (self.min_luminance * 10000.0).round() as u32,
            max_content_light_level: 0,
            max_frame_average_light_level: 0,
        }
    }
}

/// A created device with its immediate context
pub struct DeviceBundle {
    pub device: Arc<dyn GpuDevice>,
    pub context: Box<dyn DeviceContext>,
}

/// Adapter enumeration and device/surface creation service
pub trait GpuBackend: Send + Sync {
    fn info(&self) -> &str;
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, GpuError>;
    fn create_device(&self, adapter_index: u32) -> Result<DeviceBundle, GpuError>;
    fn create_presentation_surface(
        &self,
        device: &Arc<dyn GpuDevice>,
        window: RawWindowHandle,
        desc: &SurfaceDesc,
    ) -> Result<Arc<dyn PresentationSurface>, GpuError>;
    fn tearing_supported(&self) -> bool;
    /// HDR state of the display hosting the window
    fn display_hdr_enabled(&self, window: RawWindowHandle) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_views() {
        assert_eq!(
            TextureFormat::Nv12.plane_view_formats(),
            vec![TextureFormat::R8, TextureFormat::R8G8]
        );
        assert_eq!(
            TextureFormat::P010.plane_view_formats(),
            vec![TextureFormat::R16, TextureFormat::R16G16]
        );
        assert_eq!(
            TextureFormat::Y410.plane_view_formats(),
            vec![TextureFormat::Rgb10A2]
        );
    }

    #[test]
    fn test_render_target_formats() {
        assert!(!TextureFormat::Y410.supports_render_target());
        assert!(TextureFormat::Ayuv.supports_render_target());
        assert!(TextureFormat::Rgb10A2.supports_render_target());
    }

    #[test]
    fn test_hdr_output_color_spaces() {
        assert!(ColorSpace::RgbFullG2084NoneP2020.is_hdr_output());
        assert!(ColorSpace::RgbFullG22NoneP2020.is_hdr_output());
        assert!(!ColorSpace::RgbFullG22NoneP709.is_hdr_output());
        assert!(!ColorSpace::YcbcrStudioG2084LeftP2020.is_hdr_output());
    }

    #[test]
    fn test_dispatch_groups_round_up() {
        let desc = ShaderPassDesc {
            label: "test",
            source_name: "copy.hlsl",
            entry_point: "main",
            profile: "cs_5_0",
            precompiled: false,
            defines: Vec::new(),
            stage: ShaderStage::Compute {
                tile_width: 16,
                tile_height: 16,
            },
            constants: Vec::new(),
            output_size: Dimensions::new(2560, 1438),
            target_offset: (0, 0),
        };
        assert_eq!(desc.dispatch_groups(), (160, 90));
    }

    #[test]
    fn test_display_metadata_fixed_point() {
        let info = DisplayHdrInfo {
            red_primary: [0.708, 0.292],
            white_point: [0.3127, 0.329],
            max_luminance: 1000.0,
            min_luminance: 0.05,
            ..Default::default()
        };
        let meta = info.to_metadata();
        assert_eq!(meta.red_primary, [35400, 14600]);
        assert_eq!(meta.white_point[0], 15635);
        assert_eq!(meta.max_mastering_luminance, 1000);
        assert_eq!(meta.min_mastering_luminance, 500);
    }
}
