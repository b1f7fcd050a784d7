// Shader enhancers
// Catalogue of compute/pixel shader algorithms and the passes each one runs
//
// Compute passes write an intermediate UAV texture that is then copied into
// the target. The back buffer cannot be bound for unordered access.

pub mod constants;
pub mod nis;

use crate::enhancement::GpuVendor;
use crate::gpu::{Dimensions, ShaderPassDesc, ShaderStage, TextureFormat};

use constants::{
    CasConstants, Fsr1EasuConstants, Fsr1RcasConstants, RcasConstants, size_constants,
    upscaler_constants,
};
use nis::{FILTER_SIZE, NIS_SHARPNESS, NisArchitecture, NisConfig, NisHdrMode, NisOptimizer, PHASE_COUNT};

/// Shader-based upscaling/sharpening algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Enhancer {
    #[default]
    None,
    Fsr1,
    Nis,
    NisHalf,
    NisSharpen,
    NisSharpenHalf,
    Rcas,
    Cas,
    Upscaler,
    Copy,
    TestCompute,
    TestPixel,
}

impl Enhancer {
    pub fn is_upscaler(self) -> bool {
        matches!(
            self,
            Enhancer::Fsr1 | Enhancer::Nis | Enhancer::NisHalf | Enhancer::Upscaler
        )
    }

    pub fn is_sharpener(self) -> bool {
        matches!(
            self,
            Enhancer::Fsr1
                | Enhancer::Nis
                | Enhancer::NisHalf
                | Enhancer::NisSharpen
                | Enhancer::NisSharpenHalf
                | Enhancer::Rcas
                | Enhancer::Cas
                | Enhancer::Upscaler
        )
    }

    /// Whether the enhancer can take `input` to `output` in one pass
    pub fn supports_scale(self, input: Dimensions, output: Dimensions) -> bool {
        match self {
            Enhancer::Nis | Enhancer::NisHalf => nis::scale_in_range(input, output),
            _ => true,
        }
    }

    /// The same sharpener with scaling left to the video processor
    pub fn sharpen_only(self) -> Enhancer {
        match self {
            Enhancer::Nis => Enhancer::NisSharpen,
            Enhancer::NisHalf => Enhancer::NisSharpenHalf,
            other => other,
        }
    }

    pub fn is_using_shader(self) -> bool {
        self != Enhancer::None
    }

    fn is_half_precision(self) -> bool {
        matches!(self, Enhancer::NisHalf | Enhancer::NisSharpenHalf)
    }

    pub fn name(self) -> &'static str {
        match self {
            Enhancer::None => "None",
            Enhancer::Fsr1 => "FSR1",
            Enhancer::Nis => "NIS",
            Enhancer::NisHalf => "NIS (half precision)",
            Enhancer::NisSharpen => "NIS Sharpen",
            Enhancer::NisSharpenHalf => "NIS Sharpen (half precision)",
            Enhancer::Rcas => "RCAS",
            Enhancer::Cas => "CAS",
            Enhancer::Upscaler => "Bicubic Upscaler",
            Enhancer::Copy => "Copy",
            Enhancer::TestCompute => "Compute Shader Test",
            Enhancer::TestPixel => "Pixel Shader Test",
        }
    }
}

/// Inputs shared by every pass of an enhancer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderContext {
    pub input: Dimensions,
    pub output: Dimensions,
    /// Position of the result within the target
    pub target_offset: (u32, u32),
    pub hdr: bool,
    pub vendor: GpuVendor,
}

impl ShaderContext {
    /// Format of intermediates written by the shaders
    pub fn intermediate_format(&self) -> TextureFormat {
        if self.hdr {
            TextureFormat::Rgb10A2
        } else {
            TextureFormat::Rgba8
        }
    }
}

/// A read-only lookup texture loaded from the shader resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    pub name: &'static str,
    pub format: TextureFormat,
    pub size: Dimensions,
    pub row_pitch: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedShaderPass {
    pub desc: ShaderPassDesc,
    pub lookups: Vec<LookupTable>,
}

/// Passes for an enhancer, in execution order
///
/// Returns `None` when the algorithm cannot handle the requested scale.
pub fn plan_shader_passes(enhancer: Enhancer, ctx: &ShaderContext) -> Option<Vec<PlannedShaderPass>> {
    let mut passes = match enhancer {
        Enhancer::None => Vec::new(),
        Enhancer::Fsr1 => vec![
            compute(
                "FSR1 EASU",
                "fsr1_easu.cso",
                "main",
                true,
                16,
                Fsr1EasuConstants::new(ctx.input, ctx.output).to_bytes(),
                ctx.output,
            ),
            compute(
                "FSR1 RCAS",
                "fsr1_rcas.cso",
                "main",
                true,
                16,
                Fsr1RcasConstants::new(Fsr1RcasConstants::SHARPNESS).to_bytes(),
                ctx.output,
            ),
        ],
        Enhancer::Nis | Enhancer::NisHalf | Enhancer::NisSharpen | Enhancer::NisSharpenHalf => {
            vec![nis_pass(enhancer, ctx)?]
        }
        Enhancer::Rcas => vec![rcas(ctx)],
        Enhancer::Cas => vec![PlannedShaderPass {
            desc: ShaderPassDesc {
                label: "CAS",
                source_name: "cas.hlsl",
                entry_point: "main",
                profile: "ps_5_0",
                precompiled: false,
                defines: Vec::new(),
                stage: ShaderStage::Pixel,
                constants: CasConstants::new(ctx.input).to_bytes(),
                output_size: ctx.output,
                target_offset: (0, 0),
            },
            lookups: Vec::new(),
        }],
        Enhancer::Upscaler => vec![
            compute(
                "Bicubic Upscaler",
                "bcus.hlsl",
                "CSMain",
                false,
                16,
                upscaler_constants(ctx.input, ctx.output),
                ctx.output,
            ),
            rcas(ctx),
        ],
        Enhancer::Copy => vec![compute(
            "Copy",
            "copy.hlsl",
            "main",
            false,
            16,
            size_constants(ctx.output),
            ctx.output,
        )],
        Enhancer::TestCompute => vec![compute(
            "Compute Shader Test",
            "debug_cs.hlsl",
            "main",
            false,
            16,
            size_constants(ctx.output),
            ctx.output,
        )],
        Enhancer::TestPixel => vec![PlannedShaderPass {
            desc: ShaderPassDesc {
                label: "Pixel Shader Test",
                source_name: "debug_ps.hlsl",
                entry_point: "main",
                profile: "ps_5_0",
                precompiled: false,
                defines: Vec::new(),
                stage: ShaderStage::Pixel,
                constants: Vec::new(),
                output_size: ctx.output,
                target_offset: (0, 0),
            },
            lookups: Vec::new(),
        }],
    };

    // Only the final pass lands in the target at the letterbox offset
    if let Some(last) = passes.last_mut() {
        last.desc.target_offset = ctx.target_offset;
    }
    Some(passes)
}

fn compute(
    label: &'static str,
    source_name: &'static str,
    entry_point: &'static str,
    precompiled: bool,
    tile: u32,
    constants: Vec<u8>,
    output: Dimensions,
) -> PlannedShaderPass {
    PlannedShaderPass {
        desc: ShaderPassDesc {
            label,
            source_name,
            entry_point,
            profile: "cs_5_0",
            precompiled,
            defines: Vec::new(),
            stage: ShaderStage::Compute {
                tile_width: tile,
                tile_height: tile,
            },
            constants,
            output_size: output,
            target_offset: (0, 0),
        },
        lookups: Vec::new(),
    }
}

fn rcas(ctx: &ShaderContext) -> PlannedShaderPass {
    compute(
        "RCAS",
        "rcas.hlsl",
        "CSMain",
        false,
        32,
        RcasConstants::new(ctx.output).to_bytes(),
        ctx.output,
    )
}

fn nis_pass(enhancer: Enhancer, ctx: &ShaderContext) -> Option<PlannedShaderPass> {
    let upscaling = enhancer.is_upscaler();
    let half = enhancer.is_half_precision();
    let hdr_mode = if ctx.hdr {
        NisHdrMode::Pq
    } else {
        NisHdrMode::None
    };

    let config = if upscaling {
        match NisConfig::scaler(NIS_SHARPNESS, ctx.input, ctx.output, hdr_mode) {
            Some(config) => config,
            None => {
                log::warn!(
                    "NIS cannot scale {} to {} (ratio above 2x)",
                    ctx.input,
                    ctx.output
                );
                return None;
            }
        }
    } else {
        NisConfig::sharpen(NIS_SHARPNESS, ctx.input, hdr_mode)
    };

    let opt = NisOptimizer::new(upscaling, NisArchitecture::select(ctx.vendor, half));
    let flag = |b: bool| if b { "1" } else { "0" }.to_string();
    let defines = vec![
        ("NIS_SCALER".to_string(), flag(upscaling)),
        ("NIS_HDR_MODE".to_string(), hdr_mode.define().to_string()),
        ("NIS_BLOCK_WIDTH".to_string(), opt.block_width.to_string()),
        ("NIS_BLOCK_HEIGHT".to_string(), opt.block_height.to_string()),
        (
            "NIS_THREAD_GROUP_SIZE".to_string(),
            opt.thread_group_size.to_string(),
        ),
        ("NIS_USE_HALF_PRECISION".to_string(), flag(half)),
    ];

    let (format, texel_bytes, suffix) = if half {
        (TextureFormat::Rgba16Float, 2, "_fp16")
    } else {
        (TextureFormat::Rgba32Float, 4, "")
    };
    let table = |name: &'static str| LookupTable {
        name,
        format,
        size: Dimensions::new(FILTER_SIZE / 4, PHASE_COUNT),
        row_pitch: FILTER_SIZE * texel_bytes,
    };
    let lookups = if !upscaling {
        Vec::new()
    } else if suffix.is_empty() {
        vec![table("nis_coef_scale.bin"), table("nis_coef_usm.bin")]
    } else {
        vec![table("nis_coef_scale_fp16.bin"), table("nis_coef_usm_fp16.bin")]
    };

    Some(PlannedShaderPass {
        desc: ShaderPassDesc {
            label: enhancer.name(),
            source_name: "NIS_Main.hlsl",
            entry_point: "main",
            profile: "cs_5_0",
            precompiled: false,
            defines,
            stage: ShaderStage::Compute {
                tile_width: opt.block_width,
                tile_height: opt.block_height,
            },
            constants: config.to_bytes(),
            output_size: ctx.output,
            target_offset: (0, 0),
        },
        lookups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(input: Dimensions, output: Dimensions) -> ShaderContext {
        ShaderContext {
            input,
            output,
            target_offset: (0, 180),
            hdr: false,
            vendor: GpuVendor::Nvidia,
        }
    }

    #[test]
    fn test_predicates() {
        assert!(Enhancer::Nis.is_upscaler());
        assert!(Enhancer::Nis.is_sharpener());
        assert!(!Enhancer::NisSharpen.is_upscaler());
        assert!(Enhancer::Cas.is_sharpener());
        assert!(!Enhancer::Copy.is_sharpener());
        assert!(Enhancer::Copy.is_using_shader());
        assert!(!Enhancer::None.is_using_shader());
    }

    #[test]
    fn test_none_has_no_passes() {
        let passes = plan_shader_passes(
            Enhancer::None,
            &ctx(Dimensions::new(1920, 1080), Dimensions::new(2560, 1440)),
        )
        .unwrap();
        assert!(passes.is_empty());
    }

    #[test]
    fn test_chained_passes_offset_only_last() {
        let c = ctx(Dimensions::new(1920, 1080), Dimensions::new(2560, 1440));
        let passes = plan_shader_passes(Enhancer::Upscaler, &c).unwrap();
        assert_eq!(passes.len(), 2);
        assert_eq!(passes[0].desc.source_name, "bcus.hlsl");
        assert_eq!(passes[0].desc.target_offset, (0, 0));
        assert_eq!(passes[1].desc.source_name, "rcas.hlsl");
        assert_eq!(passes[1].desc.target_offset, (0, 180));
        assert!(passes.iter().all(|p| p.desc.output_size == c.output));
    }

    #[test]
    fn test_nis_defines_and_tables() {
        let mut c = ctx(Dimensions::new(1920, 1080), Dimensions::new(2560, 1440));
        c.hdr = true;
        let passes = plan_shader_passes(Enhancer::NisHalf, &c).unwrap();
        let pass = &passes[0];
        assert!(pass
            .desc
            .defines
            .contains(&("NIS_HDR_MODE".to_string(), "2".to_string())));
        assert!(pass
            .desc
            .defines
            .contains(&("NIS_USE_HALF_PRECISION".to_string(), "1".to_string())));
        assert_eq!(pass.lookups.len(), 2);
        assert_eq!(pass.lookups[0].format, TextureFormat::Rgba16Float);
        assert_eq!(pass.lookups[0].size, Dimensions::new(2, 64));
        assert_eq!(pass.desc.dispatch_groups(), (80, 45));
    }

    #[test]
    fn test_nis_sharpen_has_no_tables() {
        let c = ctx(Dimensions::new(2560, 1440), Dimensions::new(2560, 1440));
        let passes = plan_shader_passes(Enhancer::NisSharpen, &c).unwrap();
        assert!(passes[0].lookups.is_empty());
    }

    #[test]
    fn test_nis_rejects_large_ratio() {
        let c = ctx(Dimensions::new(1280, 720), Dimensions::new(3840, 2160));
        assert!(plan_shader_passes(Enhancer::Nis, &c).is_none());
        assert!(plan_shader_passes(Enhancer::Fsr1, &c).is_some());
    }

    #[test]
    fn test_scale_limits() {
        let hd = Dimensions::new(1280, 720);
        let uhd = Dimensions::new(3840, 2160);
        assert!(!Enhancer::Nis.supports_scale(hd, uhd));
        assert!(!Enhancer::NisHalf.supports_scale(uhd, hd));
        assert!(Enhancer::Nis.supports_scale(hd, Dimensions::new(2560, 1440)));
        assert!(Enhancer::Fsr1.supports_scale(hd, uhd));
        assert_eq!(Enhancer::Nis.sharpen_only(), Enhancer::NisSharpen);
        assert_eq!(Enhancer::NisHalf.sharpen_only(), Enhancer::NisSharpenHalf);
        assert_eq!(Enhancer::Cas.sharpen_only(), Enhancer::Cas);
    }

    #[test]
    fn test_cas_is_pixel_shader() {
        let c = ctx(Dimensions::new(2560, 1440), Dimensions::new(2560, 1440));
        let passes = plan_shader_passes(Enhancer::Cas, &c).unwrap();
        assert_eq!(passes[0].desc.stage, ShaderStage::Pixel);
        assert_eq!(passes[0].desc.profile, "ps_5_0");
    }
}
