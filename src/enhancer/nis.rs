// NVIDIA Image Scaling configuration
// Constant buffer and block-size optimizer for NIS_Main.hlsl

use super::constants::ConstantWriter;
use crate::enhancement::GpuVendor;
use crate::gpu::Dimensions;

pub const NIS_SHARPNESS: f32 = 0.25;
pub const FILTER_SIZE: u32 = 8;
pub const PHASE_COUNT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NisHdrMode {
    None,
    Linear,
    Pq,
}

impl NisHdrMode {
    /// Value of the NIS_HDR_MODE define
    pub fn define(self) -> &'static str {
        match self {
            NisHdrMode::None => "0",
            NisHdrMode::Linear => "1",
            NisHdrMode::Pq => "2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NisArchitecture {
    NvidiaGeneric,
    NvidiaGenericFp16,
    AmdGeneric,
    IntelGeneric,
}

impl NisArchitecture {
    pub fn select(vendor: GpuVendor, half_precision: bool) -> Self {
        if half_precision {
            return NisArchitecture::NvidiaGenericFp16;
        }
        match vendor {
            GpuVendor::Amd => NisArchitecture::AmdGeneric,
            GpuVendor::Intel => NisArchitecture::IntelGeneric,
            _ => NisArchitecture::NvidiaGeneric,
        }
    }
}

/// Block and thread-group sizes tuned per architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NisOptimizer {
    pub block_width: u32,
    pub block_height: u32,
    pub thread_group_size: u32,
}

impl NisOptimizer {
    pub fn new(upscaling: bool, arch: NisArchitecture) -> Self {
        let block_height = match arch {
            NisArchitecture::NvidiaGenericFp16 => 32,
            _ if upscaling => 24,
            _ => 32,
        };
        let thread_group_size = match arch {
            NisArchitecture::NvidiaGeneric | NisArchitecture::NvidiaGenericFp16 => 128,
            NisArchitecture::AmdGeneric | NisArchitecture::IntelGeneric => 256,
        };
        Self {
            block_width: 32,
            block_height,
            thread_group_size,
        }
    }
}

/// NIS constant buffer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NisConfig {
    pub detect_ratio: f32,
    pub detect_thres: f32,
    pub min_contrast_ratio: f32,
    pub ratio_norm: f32,
    pub contrast_boost: f32,
    pub eps: f32,
    pub sharp_start_y: f32,
    pub sharp_scale_y: f32,
    pub sharp_strength_min: f32,
    pub sharp_strength_scale: f32,
    pub sharp_limit_min: f32,
    pub sharp_limit_scale: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub dst_norm_x: f32,
    pub dst_norm_y: f32,
    pub src_norm_x: f32,
    pub src_norm_y: f32,
    pub input_viewport: [u32; 4],
    pub output_viewport: [u32; 4],
}

/// The scaler covers 1x to 2x on each axis
pub fn scale_in_range(input: Dimensions, output: Dimensions) -> bool {
    let scale_x = input.width as f32 / output.width as f32;
    let scale_y = input.height as f32 / output.height as f32;
    (0.5..=1.0).contains(&scale_x) && (0.5..=1.0).contains(&scale_y)
}

impl NisConfig {
    /// Scaler configuration; `None` when the ratio is outside 1x..2x
    pub fn scaler(
        sharpness: f32,
        input: Dimensions,
        output: Dimensions,
        hdr_mode: NisHdrMode,
    ) -> Option<Self> {
        if !scale_in_range(input, output) {
            return None;
        }
        let scale_x = input.width as f32 / output.width as f32;
        let scale_y = input.height as f32 / output.height as f32;

        let sharpness = sharpness.clamp(0.0, 1.0);
        let slider = sharpness - 0.5;
        let max_scale = if slider >= 0.0 { 1.25 } else { 1.75 };
        let min_scale = if slider >= 0.0 { 1.25 } else { 1.0 };
        let limit_scale = if slider >= 0.0 { 1.25 } else { 1.0 };

        let hdr = hdr_mode != NisHdrMode::None;
        let detect_thres = (if hdr { 32.0 } else { 64.0 }) / 1024.0;
        let (min_contrast, max_contrast) = if hdr { (1.5, 5.0) } else { (2.0, 10.0) };
        let (start_y, end_y) = match hdr_mode {
            NisHdrMode::Pq => (0.35, 0.55),
            NisHdrMode::Linear => (0.3, 0.5),
            NisHdrMode::None => (0.45, 0.9),
        };

        let (strength_min, strength_max, limit_min, limit_max) = if hdr {
            (
                (0.4 + slider * min_scale * 1.1_f32).max(0.0),
                2.2 + slider * max_scale * 1.8,
                (0.10 + slider * limit_scale * 0.28_f32).max(0.06),
                0.6 + slider * limit_scale * 0.6,
            )
        } else {
            (
                (0.4 + slider * min_scale * 1.2_f32).max(0.0),
                1.6 + slider * max_scale * 1.8,
                (0.14 + slider * limit_scale * 0.32_f32).max(0.1),
                0.5 + slider * limit_scale * 0.6,
            )
        };

        Some(Self {
            detect_ratio: 2.0 * 1127.0 / 1024.0,
            detect_thres,
            min_contrast_ratio: min_contrast,
            ratio_norm: 1.0 / (max_contrast - min_contrast),
            contrast_boost: 1.0,
            eps: 1.0 / 255.0,
            sharp_start_y: start_y,
            sharp_scale_y: 1.0 / (end_y - start_y),
            sharp_strength_min: strength_min,
            sharp_strength_scale: strength_max - strength_min,
            sharp_limit_min: limit_min,
            sharp_limit_scale: limit_max - limit_min,
            scale_x,
            scale_y,
            dst_norm_x: 1.0 / output.width as f32,
            dst_norm_y: 1.0 / output.height as f32,
            src_norm_x: 1.0 / input.width as f32,
            src_norm_y: 1.0 / input.height as f32,
            input_viewport: [0, 0, input.width, input.height],
            output_viewport: [0, 0, output.width, output.height],
        })
    }

    /// Sharpen-only configuration: output equals input
    pub fn sharpen(sharpness: f32, input: Dimensions, hdr_mode: NisHdrMode) -> Self {
        // A 1:1 scale is always in range
        Self::scaler(sharpness, input, input, hdr_mode).unwrap_or_default()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ConstantWriter::new();
        w.f32(self.detect_ratio)
            .f32(self.detect_thres)
            .f32(self.min_contrast_ratio)
            .f32(self.ratio_norm)
            .f32(self.contrast_boost)
            .f32(self.eps)
            .f32(self.sharp_start_y)
            .f32(self.sharp_scale_y)
            .f32(self.sharp_strength_min)
            .f32(self.sharp_strength_scale)
            .f32(self.sharp_limit_min)
            .f32(self.sharp_limit_scale)
            .f32(self.scale_x)
            .f32(self.scale_y)
            .f32(self.dst_norm_x)
            .f32(self.dst_norm_y)
            .f32(self.src_norm_x)
            .f32(self.src_norm_y);
        for v in self.input_viewport.iter().chain(self.output_viewport.iter()) {
            w.u32(*v);
        }
        // reserved
        w.f32(0.0).f32(0.0);
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer() {
        let nv = NisOptimizer::new(true, NisArchitecture::NvidiaGeneric);
        assert_eq!((nv.block_width, nv.block_height, nv.thread_group_size), (32, 24, 128));

        let amd = NisOptimizer::new(true, NisArchitecture::AmdGeneric);
        assert_eq!(amd.thread_group_size, 256);

        let sharpen = NisOptimizer::new(false, NisArchitecture::IntelGeneric);
        assert_eq!(sharpen.block_height, 32);

        let half = NisOptimizer::new(true, NisArchitecture::NvidiaGenericFp16);
        assert_eq!(half.block_height, 32);
    }

    #[test]
    fn test_architecture_selection() {
        assert_eq!(
            NisArchitecture::select(GpuVendor::Amd, true),
            NisArchitecture::NvidiaGenericFp16
        );
        assert_eq!(
            NisArchitecture::select(GpuVendor::Intel, false),
            NisArchitecture::IntelGeneric
        );
        assert_eq!(
            NisArchitecture::select(GpuVendor::Other(1), false),
            NisArchitecture::NvidiaGeneric
        );
    }

    #[test]
    fn test_sdr_config() {
        let config = NisConfig::scaler(
            NIS_SHARPNESS,
            Dimensions::new(1920, 1080),
            Dimensions::new(2560, 1440),
            NisHdrMode::None,
        )
        .unwrap();

        assert!((config.scale_x - 0.75).abs() < 1e-6);
        assert!((config.detect_thres - 64.0 / 1024.0).abs() < 1e-6);
        assert!((config.ratio_norm - 0.125).abs() < 1e-6);
        // slider = -0.25: min = max(0, 0.4 - 0.25 * 1.0 * 1.2)
        assert!((config.sharp_strength_min - 0.1).abs() < 1e-6);
        assert_eq!(config.output_viewport, [0, 0, 2560, 1440]);
    }

    #[test]
    fn test_pq_config() {
        let config = NisConfig::scaler(
            NIS_SHARPNESS,
            Dimensions::new(1920, 1080),
            Dimensions::new(3840, 2160),
            NisHdrMode::Pq,
        )
        .unwrap();
        assert!((config.sharp_start_y - 0.35).abs() < 1e-6);
        assert!((config.sharp_scale_y - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_ratio_out_of_range() {
        let config = NisConfig::scaler(
            NIS_SHARPNESS,
            Dimensions::new(1280, 720),
            Dimensions::new(3840, 2160),
            NisHdrMode::None,
        );
        assert!(config.is_none());
    }

    #[test]
    fn test_buffer_size() {
        let config = NisConfig::sharpen(NIS_SHARPNESS, Dimensions::new(1920, 1080), NisHdrMode::None);
        assert_eq!(config.to_bytes().len(), 112);
        assert_eq!(config.scale_x, 1.0);
    }
}
