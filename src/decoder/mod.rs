// Video decoder interface
// Session parameters, decoded frame handles and decoder-preparation constants
//
// The hardware decoder itself is external. This module describes what the
// renderer consumes from it and what it hands back during preparation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::gpu::{Dimensions, GpuDevice, GpuError, GpuResource, TextureFormat};

/// Maximum reference frames plus one working surface
pub const DECODER_BUFFER_POOL_SIZE: u32 = 17;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Unsupported video format: {0}")]
    UnsupportedFormat(String),
    #[error("Decoder check failed: {0}")]
    CheckFailed(#[from] GpuError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Codec {
    H264,
    Hevc,
    Av1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaFormat {
    Yuv420,
    Yuv444,
}

/// Negotiated stream format: codec, bit depth and chroma layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub codec: Codec,
    pub ten_bit: bool,
    pub chroma: ChromaFormat,
}

impl VideoFormat {
    pub const H264: VideoFormat = VideoFormat::new(Codec::H264, false, ChromaFormat::Yuv420);
    pub const HEVC: VideoFormat = VideoFormat::new(Codec::Hevc, false, ChromaFormat::Yuv420);
    pub const HEVC_MAIN10: VideoFormat = VideoFormat::new(Codec::Hevc, true, ChromaFormat::Yuv420);
    pub const AV1: VideoFormat = VideoFormat::new(Codec::Av1, false, ChromaFormat::Yuv420);
    pub const AV1_MAIN10: VideoFormat = VideoFormat::new(Codec::Av1, true, ChromaFormat::Yuv420);

    pub const fn new(codec: Codec, ten_bit: bool, chroma: ChromaFormat) -> Self {
        Self {
            codec,
            ten_bit,
            chroma,
        }
    }

    /// 10-bit streams carry HDR content
    pub fn is_hdr(&self) -> bool {
        self.ten_bit
    }

    pub fn is_yuv444(&self) -> bool {
        self.chroma == ChromaFormat::Yuv444
    }

    /// Pixel alignment the decoder surfaces must honor
    pub fn texture_alignment(&self) -> u32 {
        match self.codec {
            Codec::H264 => 16,
            _ => 128,
        }
    }

    /// Format of the decoder output surfaces
    pub fn surface_format(&self) -> TextureFormat {
        match (self.ten_bit, self.is_yuv444()) {
            (true, true) => TextureFormat::Y410,
            (true, false) => TextureFormat::P010,
            (false, true) => TextureFormat::Ayuv,
            (false, false) => TextureFormat::Nv12,
        }
    }

    /// Decoder profile for the format, if one exists
    pub fn profile(&self) -> Option<DecoderProfile> {
        match (self.codec, self.ten_bit, self.is_yuv444()) {
            (Codec::H264, false, false) => Some(DecoderProfile::H264VldNoFgt),
            (Codec::H264, _, _) => None,
            (Codec::Hevc, false, false) => Some(DecoderProfile::HevcVldMain),
            (Codec::Hevc, true, false) => Some(DecoderProfile::HevcVldMain10),
            (Codec::Hevc, false, true) => Some(DecoderProfile::HevcVldMain444),
            (Codec::Hevc, true, true) => Some(DecoderProfile::HevcVldMain10_444),
            (Codec::Av1, _, false) => Some(DecoderProfile::Av1VldProfile0),
            (Codec::Av1, _, true) => Some(DecoderProfile::Av1VldProfile1),
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chroma = if self.is_yuv444() { "4:4:4" } else { "4:2:0" };
        let depth = if self.ten_bit { 10 } else { 8 };
        write!(f, "{:?} {}-bit {}", self.codec, depth, chroma)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum DecoderProfile {
    H264VldNoFgt,
    HevcVldMain,
    HevcVldMain10,
    HevcVldMain444,
    HevcVldMain10_444,
    Av1VldProfile0,
    Av1VldProfile1,
}

/// Immutable per-session descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderParameters {
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub frame_rate: u32,
    pub enable_vsync: bool,
    pub enable_video_enhancement: bool,
}

impl DecoderParameters {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

impl Default for DecoderParameters {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            format: VideoFormat::H264,
            frame_rate: 60,
            enable_vsync: true,
            enable_video_enhancement: false,
        }
    }
}

/// Transfer characteristic tagged on a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorTransfer {
    #[default]
    Unspecified,
    Bt709,
    Smpte2084,
    AribStdB67,
}

impl ColorTransfer {
    pub fn is_pq(self) -> bool {
        self == ColorTransfer::Smpte2084
    }
}

/// Matrix coefficients tagged on a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Colorspace {
    Rec601,
    #[default]
    Rec709,
    Rec2020,
}

/// Per-frame handle produced by the hardware decoder
#[derive(Clone)]
pub struct DecodedFrame {
    /// Decoder pool texture array
    pub surface: Arc<dyn GpuResource>,
    /// Array slice of this frame within the pool
    pub pool_index: u32,
    pub color_trc: ColorTransfer,
    pub colorspace: Colorspace,
    pub full_range: bool,
}

impl fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("pool_index", &self.pool_index)
            .field("color_trc", &self.color_trc)
            .field("colorspace", &self.colorspace)
            .field("full_range", &self.full_range)
            .finish()
    }
}

/// Settings handed to the decoder before it allocates its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderPreparation {
    pub alignment: u32,
    pub pool_size: u32,
    pub surface_format: TextureFormat,
    pub surface_size: Dimensions,
}

impl DecoderPreparation {
    pub fn for_format(format: VideoFormat, size: Dimensions) -> Self {
        let alignment = format.texture_alignment();
        Self {
            alignment,
            pool_size: DECODER_BUFFER_POOL_SIZE,
            surface_format: format.surface_format(),
            surface_size: Dimensions::new(
                size.width.next_multiple_of(alignment),
                size.height.next_multiple_of(alignment),
            ),
        }
    }
}

/// Check a device can decode the format
///
/// H.264 4:4:4 is never decoded in hardware.
pub fn check_decoder_support(
    device: &dyn GpuDevice,
    format: VideoFormat,
) -> Result<bool, DecoderError> {
    let Some(profile) = format.profile() else {
        log::warn!("No hardware decoder profile for {}", format);
        return Ok(false);
    };

    let supported = device.check_decoder_support(format)?;
    if !supported {
        log::warn!(
            "GPU doesn't support {} decoding ({:?})",
            format,
            profile
        );
    }
    Ok(supported)
}
