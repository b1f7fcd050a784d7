// Pipeline decision table
// Auto choice per vendor, forced-mode overrides and the cross-constraint rules

use crate::config::SuperResolutionMode;
use crate::enhancement::GpuVendor;
use crate::enhancer::Enhancer;
use crate::gpu::Dimensions;

/// Feature toggles and labels before geometry is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    pub vendor_super_resolution: bool,
    pub vendor_hdr: bool,
    pub tone_mapping: bool,
    pub two_pass: bool,
    pub enhancer: Enhancer,
    pub upscaler_label: &'static str,
    pub sharpener_label: &'static str,
}

impl Choice {
    const fn new(
        vendor_super_resolution: bool,
        vendor_hdr: bool,
        tone_mapping: bool,
        two_pass: bool,
        enhancer: Enhancer,
        upscaler_label: &'static str,
        sharpener_label: &'static str,
    ) -> Self {
        Self {
            vendor_super_resolution,
            vendor_hdr,
            tone_mapping,
            two_pass,
            enhancer,
            upscaler_label,
            sharpener_label,
        }
    }

    /// Enhancement disabled: conversion shader only
    pub const BYPASS: Choice = Choice::new(false, false, true, false, Enhancer::None, "None", "None");
}

/// Row key of the auto table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GpuClass {
    Amd,
    Intel,
    NvidiaGtx,
    NvidiaRtx,
    Other,
}

/// (class, integrated, decoder HDR) -> choice; `None` matches either value
type AutoRow = (GpuClass, Option<bool>, Option<bool>, Choice);

const NIS_HDR: Choice = Choice::new(false, false, true, false, Enhancer::Nis, "NIS Upscaler", "NIS Sharpener");
const VP_CAS: Choice = Choice::new(false, false, false, false, Enhancer::Cas, "Video Processor", "CAS");

const AUTO_TABLE: &[AutoRow] = &[
    (GpuClass::Amd, None, Some(true), NIS_HDR),
    (GpuClass::Amd, Some(true), Some(false), VP_CAS),
    (
        GpuClass::Amd,
        Some(false),
        Some(false),
        Choice::new(true, false, false, false, Enhancer::None, "AMF FSR EASU", "AMF FSR RCAS"),
    ),
    (GpuClass::Intel, None, Some(true), NIS_HDR),
    (GpuClass::Intel, Some(true), Some(false), VP_CAS),
    (
        GpuClass::Intel,
        Some(false),
        Some(false),
        Choice::new(false, false, false, false, Enhancer::None, "NIS Upscaler", "NIS Sharpener"),
    ),
    (GpuClass::NvidiaGtx, None, Some(true), NIS_HDR),
    (
        GpuClass::NvidiaGtx,
        None,
        Some(false),
        Choice::new(false, true, false, false, Enhancer::Nis, "NIS Upscaler", "NIS Sharpener"),
    ),
    (
        GpuClass::NvidiaRtx,
        None,
        Some(true),
        Choice::new(
            true,
            false,
            true,
            true,
            Enhancer::None,
            "(auto) NVIDIA RTX Video Super Resolution",
            "Video Processor",
        ),
    ),
    (
        GpuClass::NvidiaRtx,
        None,
        Some(false),
        Choice::new(
            true,
            true,
            false,
            true,
            Enhancer::None,
            "NVIDIA RTX Video Super Resolution",
            "Video Processor",
        ),
    ),
    (
        GpuClass::Other,
        None,
        None,
        Choice::new(false, false, false, false, Enhancer::None, "Video Processor", "Video Processor"),
    ),
];

fn classify(vendor: GpuVendor, rtx: bool) -> GpuClass {
    match vendor {
        GpuVendor::Amd => GpuClass::Amd,
        GpuVendor::Intel => GpuClass::Intel,
        GpuVendor::Nvidia if rtx => GpuClass::NvidiaRtx,
        GpuVendor::Nvidia => GpuClass::NvidiaGtx,
        GpuVendor::Other(_) => GpuClass::Other,
    }
}

/// Default choice for the adapter and stream
pub fn auto_choice(vendor: GpuVendor, integrated: bool, rtx: bool, decoder_hdr: bool) -> Choice {
    let class = classify(vendor, rtx);
    AUTO_TABLE
        .iter()
        .find(|(c, i, h, _)| {
            *c == class
                && i.is_none_or(|i| i == integrated)
                && h.is_none_or(|h| h == decoder_hdr)
        })
        .map(|(_, _, _, choice)| *choice)
        .unwrap_or(Choice::new(
            false,
            false,
            false,
            false,
            Enhancer::None,
            "Video Processor",
            "Video Processor",
        ))
}

/// Replace the auto choice with a forced mode
///
/// `edge_enhancement` reports whether the processor can sharpen, for the label.
pub fn apply_override(
    mode: SuperResolutionMode,
    auto: Choice,
    vendor: GpuVendor,
    decoder_hdr: bool,
    edge_enhancement: bool,
) -> Choice {
    let nvidia = vendor == GpuVendor::Nvidia;
    let keep_hdr = auto.vendor_hdr;
    match mode {
        SuperResolutionMode::Auto => auto,
        SuperResolutionMode::Driver => Choice::new(
            true,
            nvidia,
            decoder_hdr,
            nvidia,
            Enhancer::None,
            "Vendor Driver Upscaler",
            "Vendor Driver Sharpener",
        ),
        SuperResolutionMode::VideoProcessorOnly => Choice::new(
            false,
            keep_hdr,
            decoder_hdr,
            false,
            Enhancer::None,
            "Video Processor",
            if edge_enhancement { "Video Processor" } else { "None" },
        ),
        SuperResolutionMode::Fsr1 => Choice::new(
            false, keep_hdr, false, false, Enhancer::Fsr1, "FSR1 EASU", "FSR1 RCAS",
        ),
        SuperResolutionMode::Nis => Choice::new(
            false, keep_hdr, false, false, Enhancer::Nis, "NIS Upscaler", "NIS Sharpener",
        ),
        SuperResolutionMode::NisHalf => Choice::new(
            false,
            keep_hdr,
            false,
            false,
            Enhancer::NisHalf,
            "NIS Upscaler (Half-precision)",
            "NIS Sharpener (Half-precision)",
        ),
        SuperResolutionMode::NisSharpen => Choice::new(
            false,
            keep_hdr,
            false,
            nvidia,
            Enhancer::NisSharpen,
            "Video Processor",
            "NIS Sharpener",
        ),
        SuperResolutionMode::NisSharpenHalf => Choice::new(
            false,
            keep_hdr,
            false,
            nvidia,
            Enhancer::NisSharpenHalf,
            "Video Processor",
            "NIS Sharpener (Half-precision)",
        ),
        SuperResolutionMode::Rcas => Choice::new(
            false, keep_hdr, false, nvidia, Enhancer::Rcas, "Video Processor", "RCAS Sharpener",
        ),
        SuperResolutionMode::Cas => Choice::new(
            false, keep_hdr, false, nvidia, Enhancer::Cas, "Video Processor", "CAS Sharpener",
        ),
        SuperResolutionMode::Upscaler => Choice::new(
            false, keep_hdr, false, false, Enhancer::Upscaler, "BCUS", "RCAS",
        ),
        SuperResolutionMode::Copy => Choice::new(
            false, false, true, false, Enhancer::Copy, "Video Processor", "Texture Copy",
        ),
        SuperResolutionMode::TestCompute => Choice::new(
            false,
            false,
            true,
            false,
            Enhancer::TestCompute,
            "Video Processor",
            "Compute Shader (invert color)",
        ),
        SuperResolutionMode::TestPixel => Choice::new(
            false,
            false,
            true,
            false,
            Enhancer::TestPixel,
            "Video Processor",
            "Pixel Shader (invert color)",
        ),
    }
}

/// Facts the cross-constraint rules read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleInputs {
    pub vendor: GpuVendor,
    pub decoder_hdr: bool,
    pub display_hdr: bool,
    pub yuv444: bool,
    pub auto_mode: bool,
    pub native_resolution: bool,
    pub decoder: Dimensions,
    pub output: Dimensions,
}

/// Cross constraints, applied in order; later rules win
pub fn apply_rules(mut c: Choice, r: &RuleInputs) -> Choice {
    // No SDR->HDR simulation for HDR streams or SDR displays
    if r.decoder_hdr || !r.display_hdr {
        c.vendor_hdr = false;
    }

    if !c.vendor_super_resolution && !c.vendor_hdr {
        c.two_pass = false;
    }

    // Out-of-range ratios: the processor scales and the shader only sharpens
    if !c.enhancer.supports_scale(r.decoder, r.output) {
        c.enhancer = c.enhancer.sharpen_only();
        c.upscaler_label = "Video Processor";
    }

    if c.enhancer.is_upscaler() {
        c.vendor_super_resolution = false;
    }

    // SDR color is already accurate, and the conversion shader cannot follow vendor HDR
    if !r.decoder_hdr || c.vendor_hdr {
        c.tone_mapping = false;
    }

    if r.auto_mode && r.native_resolution {
        c.vendor_super_resolution = false;
        c.tone_mapping = r.decoder_hdr;
        c.two_pass = c.vendor_hdr;
        c.enhancer = Enhancer::None;
        c.upscaler_label = "Video Processor";
        c.sharpener_label = "Video Processor";
    }

    // Y410 cannot be a render target, so only the processor can enhance
    if r.yuv444 && r.decoder_hdr {
        c.vendor_super_resolution = r.vendor != GpuVendor::Amd;
        c.vendor_hdr = false;
        c.tone_mapping = false;
        c.two_pass = false;
        c.enhancer = Enhancer::None;
        c.upscaler_label = "Video Processor";
        c.sharpener_label = "Video Processor";
    }

    c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(vendor: GpuVendor) -> RuleInputs {
        RuleInputs {
            vendor,
            decoder_hdr: false,
            display_hdr: false,
            yuv444: false,
            auto_mode: true,
            native_resolution: false,
            decoder: Dimensions::new(1920, 1080),
            output: Dimensions::new(2560, 1440),
        }
    }

    #[test]
    fn test_auto_table_rows() {
        let amd = auto_choice(GpuVendor::Amd, false, false, false);
        assert!(amd.vendor_super_resolution);
        assert_eq!(amd.upscaler_label, "AMF FSR EASU");

        let amd_igpu = auto_choice(GpuVendor::Amd, true, false, false);
        assert_eq!(amd_igpu.enhancer, Enhancer::Cas);

        let intel_hdr = auto_choice(GpuVendor::Intel, true, false, true);
        assert_eq!(intel_hdr.enhancer, Enhancer::Nis);
        assert!(intel_hdr.tone_mapping);

        let gtx = auto_choice(GpuVendor::Nvidia, false, false, false);
        assert_eq!(gtx.enhancer, Enhancer::Nis);
        assert!(gtx.vendor_hdr);

        let rtx = auto_choice(GpuVendor::Nvidia, false, true, true);
        assert!(rtx.vendor_super_resolution && rtx.two_pass && rtx.tone_mapping);

        let other = auto_choice(GpuVendor::Other(0x1414), false, false, true);
        assert_eq!(other.enhancer, Enhancer::None);
        assert!(!other.vendor_super_resolution);
    }

    #[test]
    fn test_every_row_reachable() {
        for vendor in [GpuVendor::Amd, GpuVendor::Intel, GpuVendor::Nvidia] {
            for integrated in [false, true] {
                for rtx in [false, true] {
                    for hdr in [false, true] {
                        let c = auto_choice(vendor, integrated, rtx, hdr);
                        assert_ne!(c.upscaler_label, "");
                    }
                }
            }
        }
    }

    #[test]
    fn test_driver_override() {
        let auto = auto_choice(GpuVendor::Intel, false, false, false);
        let c = apply_override(SuperResolutionMode::Driver, auto, GpuVendor::Intel, false, true);
        assert!(c.vendor_super_resolution);
        assert!(!c.vendor_hdr);
        assert!(!c.two_pass);

        let c = apply_override(SuperResolutionMode::Driver, auto, GpuVendor::Nvidia, true, true);
        assert!(c.vendor_hdr && c.two_pass && c.tone_mapping);
    }

    #[test]
    fn test_override_keeps_auto_vendor_hdr() {
        let auto = auto_choice(GpuVendor::Nvidia, false, false, false);
        let c = apply_override(SuperResolutionMode::Rcas, auto, GpuVendor::Nvidia, false, true);
        assert!(c.vendor_hdr);
        assert!(c.two_pass);
        assert_eq!(c.enhancer, Enhancer::Rcas);

        let c = apply_override(SuperResolutionMode::Copy, auto, GpuVendor::Nvidia, false, true);
        assert!(!c.vendor_hdr);
        assert!(c.tone_mapping);
    }

    #[test]
    fn test_vp_only_label_follows_caps() {
        let auto = auto_choice(GpuVendor::Intel, false, false, false);
        let with = apply_override(SuperResolutionMode::VideoProcessorOnly, auto, GpuVendor::Intel, false, true);
        let without = apply_override(SuperResolutionMode::VideoProcessorOnly, auto, GpuVendor::Intel, false, false);
        assert_eq!(with.sharpener_label, "Video Processor");
        assert_eq!(without.sharpener_label, "None");
    }

    #[test]
    fn test_rules_drop_vendor_hdr_on_sdr_display() {
        let c = apply_rules(auto_choice(GpuVendor::Nvidia, false, true, false), &rules(GpuVendor::Nvidia));
        assert!(!c.vendor_hdr);
        // VSR still on, so two passes remain
        assert!(c.two_pass);
    }

    #[test]
    fn test_rules_shader_upscaler_disables_vsr() {
        let forced = apply_override(
            SuperResolutionMode::Driver,
            Choice::BYPASS,
            GpuVendor::Nvidia,
            false,
            true,
        );
        let mut c = forced;
        c.enhancer = Enhancer::Nis;
        let c = apply_rules(c, &rules(GpuVendor::Nvidia));
        assert!(!c.vendor_super_resolution);
    }

    #[test]
    fn test_rules_native_keeps_vendor_hdr_pass() {
        let mut r = rules(GpuVendor::Nvidia);
        r.display_hdr = true;
        r.native_resolution = true;
        let c = apply_rules(auto_choice(GpuVendor::Nvidia, false, true, false), &r);
        assert!(!c.vendor_super_resolution);
        assert!(c.vendor_hdr);
        assert!(c.two_pass);
        assert_eq!(c.enhancer, Enhancer::None);
    }

    #[test]
    fn test_rules_nis_beyond_2x_only_sharpens() {
        let mut r = rules(GpuVendor::Nvidia);
        r.decoder = Dimensions::new(1280, 720);
        r.output = Dimensions::new(3840, 2160);
        let c = apply_rules(auto_choice(GpuVendor::Nvidia, false, false, false), &r);
        assert_eq!(c.enhancer, Enhancer::NisSharpen);
        assert_eq!(c.upscaler_label, "Video Processor");
        assert_eq!(c.sharpener_label, "NIS Sharpener");

        // Downscaling is outside the scaler's range too
        r.decoder = Dimensions::new(3840, 2160);
        r.output = Dimensions::new(1920, 1080);
        let c = apply_rules(auto_choice(GpuVendor::Nvidia, false, false, false), &r);
        assert_eq!(c.enhancer, Enhancer::NisSharpen);
    }

    #[test]
    fn test_rules_yuv444_hdr() {
        let mut r = rules(GpuVendor::Amd);
        r.decoder_hdr = true;
        r.yuv444 = true;
        let c = apply_rules(auto_choice(GpuVendor::Amd, false, false, true), &r);
        assert!(!c.vendor_super_resolution);
        assert_eq!(c.enhancer, Enhancer::None);

        r.vendor = GpuVendor::Intel;
        let c = apply_rules(auto_choice(GpuVendor::Intel, false, false, true), &r);
        assert!(c.vendor_super_resolution);
        assert!(!c.tone_mapping);
    }
}
