// Pipeline selector
// Chooses the enhancer, pass count, tone mapping and per-stage geometry for a session

pub mod geometry;
pub mod table;

use serde::Serialize;

use crate::config::SuperResolutionMode;
use crate::enhancement::GpuVendor;
use crate::enhancer::Enhancer;
use crate::gpu::Dimensions;

pub use geometry::{StageGeometry, StageLayout, Viewport, letterbox};
use table::{Choice, RuleInputs};

/// Edge enhancement strength used by the video processor sharpener
pub const VIDEO_PROCESSOR_EDGE_STRENGTH: i32 = 30;

/// Everything the selector reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionInput {
    pub enhancement_enabled: bool,
    pub vendor: GpuVendor,
    pub integrated: bool,
    pub rtx: bool,
    pub decoder_hdr: bool,
    pub yuv444: bool,
    pub display_hdr: bool,
    pub output: Viewport,
    pub decoder: Dimensions,
    pub mode: SuperResolutionMode,
    /// The video processor exposes an edge-enhancement filter
    pub edge_enhancement: bool,
}

/// Who sharpens the picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sharpening {
    None,
    /// The vendor scaler sharpens as part of upscaling
    VendorDriver,
    Shader(Enhancer),
    /// Edge-enhancement filter on the main processor
    VideoProcessorEdge(i32),
}

/// Coarse classification of the enhancement path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnhancerKind {
    None,
    VendorDriver,
    Shader(Enhancer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineConfiguration {
    pub enhancement_enabled: bool,
    pub vendor: GpuVendor,
    pub enhancer: Enhancer,
    pub vendor_super_resolution: bool,
    pub vendor_hdr: bool,
    pub tone_mapping: bool,
    pub two_pass: bool,
    pub sharpening: Sharpening,
    pub layout: StageLayout,
    pub upscaler_label: &'static str,
    pub sharpener_label: &'static str,
    pub output: Viewport,
    pub decoder: Dimensions,
    pub decoder_hdr: bool,
    pub yuv444: bool,
}

impl PipelineConfiguration {
    /// Number of video processor passes before any shader
    pub fn pass_count(&self) -> u32 {
        if self.two_pass { 2 } else { 1 }
    }

    pub fn kind(&self) -> EnhancerKind {
        if self.enhancer.is_using_shader() {
            EnhancerKind::Shader(self.enhancer)
        } else if self.vendor_super_resolution || self.vendor_hdr {
            EnhancerKind::VendorDriver
        } else {
            EnhancerKind::None
        }
    }

    /// Color is carried as PQ past the first stage
    pub fn is_hdr(&self) -> bool {
        self.decoder_hdr || self.vendor_hdr
    }

    /// Upscale ratio reported in statistics
    pub fn ratio(&self) -> f32 {
        if self.decoder.height == 0 {
            return 0.0;
        }
        self.output.height as f32 / self.decoder.height as f32
    }

    pub fn log_summary(&self) {
        log::info!("Enhancer Upscaling : {}", self.upscaler_label);
        log::info!("Enhancer Sharpening: {}", self.sharpener_label);
        log::debug!(
            "Enhancer passes={} vsr={} vendor_hdr={} tone={} output={}x{}+{}+{}",
            self.pass_count(),
            self.vendor_super_resolution,
            self.vendor_hdr,
            self.tone_mapping,
            self.output.width,
            self.output.height,
            self.output.left,
            self.output.top
        );
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            upscaler: self.upscaler_label.to_string(),
            sharpener: self.sharpener_label.to_string(),
            passes: self.pass_count(),
            vendor_super_resolution: self.vendor_super_resolution,
            vendor_hdr: self.vendor_hdr,
            tone_mapping: self.tone_mapping,
            ratio: self.ratio(),
        }
    }
}

/// Serializable view of a configuration for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSummary {
    pub upscaler: String,
    pub sharpener: String,
    pub passes: u32,
    pub vendor_super_resolution: bool,
    pub vendor_hdr: bool,
    pub tone_mapping: bool,
    pub ratio: f32,
}

fn sharpening_for(choice: &Choice, vendor: GpuVendor) -> Sharpening {
    if choice.enhancer.is_sharpener() {
        Sharpening::Shader(choice.enhancer)
    } else if choice.vendor_super_resolution && vendor == GpuVendor::Amd {
        Sharpening::VendorDriver
    } else if choice.vendor_super_resolution && vendor == GpuVendor::Intel {
        Sharpening::None
    } else {
        Sharpening::VideoProcessorEdge(VIDEO_PROCESSOR_EDGE_STRENGTH)
    }
}

/// Pick the pipeline for a session
///
/// Pure: identical inputs give identical configurations.
pub fn select_pipeline(input: &SelectionInput) -> PipelineConfiguration {
    let choice = if !input.enhancement_enabled {
        Choice::BYPASS
    } else {
        let auto = table::auto_choice(input.vendor, input.integrated, input.rtx, input.decoder_hdr);
        let forced = table::apply_override(
            input.mode,
            auto,
            input.vendor,
            input.decoder_hdr,
            input.edge_enhancement,
        );
        table::apply_rules(
            forced,
            &RuleInputs {
                vendor: input.vendor,
                decoder_hdr: input.decoder_hdr,
                display_hdr: input.display_hdr,
                yuv444: input.yuv444,
                auto_mode: input.mode.is_auto(),
                native_resolution: input.output.size() == input.decoder,
                decoder: input.decoder,
                output: input.output.size(),
            },
        )
    };

    let sharpening = if input.enhancement_enabled {
        sharpening_for(&choice, input.vendor)
    } else {
        Sharpening::None
    };

    let layout = geometry::stage_layout(
        &choice,
        &input.output,
        input.decoder,
        input.decoder_hdr,
        input.yuv444,
    );

    PipelineConfiguration {
        enhancement_enabled: input.enhancement_enabled,
        vendor: input.vendor,
        enhancer: choice.enhancer,
        vendor_super_resolution: choice.vendor_super_resolution,
        vendor_hdr: choice.vendor_hdr,
        tone_mapping: choice.tone_mapping,
        two_pass: choice.two_pass,
        sharpening,
        layout,
        upscaler_label: choice.upscaler_label,
        sharpener_label: choice.sharpener_label,
        output: input.output,
        decoder: input.decoder,
        decoder_hdr: input.decoder_hdr,
        yuv444: input.yuv444,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(vendor: GpuVendor) -> SelectionInput {
        SelectionInput {
            enhancement_enabled: true,
            vendor,
            integrated: false,
            rtx: false,
            decoder_hdr: false,
            yuv444: false,
            display_hdr: false,
            output: letterbox(Dimensions::new(2560, 1440), Dimensions::new(1920, 1080)),
            decoder: Dimensions::new(1920, 1080),
            mode: SuperResolutionMode::Auto,
            edge_enhancement: true,
        }
    }

    #[test]
    fn test_disabled_bypass() {
        let mut i = input(GpuVendor::Nvidia);
        i.enhancement_enabled = false;
        i.decoder_hdr = true;
        let config = select_pipeline(&i);
        assert_eq!(config.kind(), EnhancerKind::None);
        assert!(config.tone_mapping);
        assert_eq!(config.sharpening, Sharpening::None);
        assert_eq!(config.upscaler_label, "None");
    }

    #[test]
    fn test_nvidia_gtx_sdr() {
        let config = select_pipeline(&input(GpuVendor::Nvidia));
        assert_eq!(config.kind(), EnhancerKind::Shader(Enhancer::Nis));
        assert!(!config.tone_mapping);
        assert_eq!(config.pass_count(), 1);
        assert_eq!(config.sharpening, Sharpening::Shader(Enhancer::Nis));
    }

    #[test]
    fn test_nvidia_rtx_hdr_display() {
        let mut i = input(GpuVendor::Nvidia);
        i.rtx = true;
        i.display_hdr = true;
        let config = select_pipeline(&i);
        assert_eq!(config.kind(), EnhancerKind::VendorDriver);
        assert!(config.vendor_hdr);
        assert_eq!(config.pass_count(), 2);
        assert_eq!(
            config.sharpening,
            Sharpening::VideoProcessorEdge(VIDEO_PROCESSOR_EDGE_STRENGTH)
        );
    }

    #[test]
    fn test_amd_vendor_sharpening() {
        let config = select_pipeline(&input(GpuVendor::Amd));
        assert!(config.vendor_super_resolution);
        assert_eq!(config.sharpening, Sharpening::VendorDriver);
        assert_eq!(config.upscaler_label, "AMF FSR EASU");
    }

    #[test]
    fn test_intel_integrated_cas() {
        let mut i = input(GpuVendor::Intel);
        i.integrated = true;
        let config = select_pipeline(&i);
        assert_eq!(config.enhancer, Enhancer::Cas);
        assert_eq!(config.sharpener_label, "CAS");
    }

    #[test]
    fn test_native_resolution() {
        let mut i = input(GpuVendor::Amd);
        i.output = letterbox(Dimensions::new(1920, 1080), Dimensions::new(1920, 1080));
        let config = select_pipeline(&i);
        assert!(!config.vendor_super_resolution);
        assert!(!config.enhancer.is_upscaler());
        assert_eq!(config.upscaler_label, "Video Processor");
    }

    #[test]
    fn test_forced_mode_ignores_native() {
        let mut i = input(GpuVendor::Nvidia);
        i.output = letterbox(Dimensions::new(1920, 1080), Dimensions::new(1920, 1080));
        i.mode = SuperResolutionMode::Fsr1;
        let config = select_pipeline(&i);
        assert_eq!(config.enhancer, Enhancer::Fsr1);
    }

    #[test]
    fn test_ratio_and_summary() {
        let config = select_pipeline(&input(GpuVendor::Nvidia));
        assert!((config.ratio() - 1440.0 / 1080.0).abs() < 1e-6);
        let summary = config.summary();
        assert_eq!(summary.upscaler, "NIS Upscaler");
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"passes\":1"));
    }
}
