// Stage pipeline
// Builds the textures and stages a pipeline configuration implies and runs them per frame
//
// Planning is pure and checked for format compatibility before any GPU
// object exists. Building turns the plan into backend objects; execution
// walks the stages in order for every decoded frame.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::color::ColorConverter;
use crate::decoder::{DECODER_BUFFER_POOL_SIZE, DecodedFrame};
use crate::enhancement::GpuVendor;
use crate::enhancer::{PlannedShaderPass, ShaderContext, plan_shader_passes};
use crate::gpu::{
    ColorSpace, ConversionGeometry, DeviceContext, Dimensions, GpuDevice, GpuError, Hdr10Metadata,
    PoolViews, ProcessorInput, Rect, ShaderPass, ShaderSource, Texture, TextureDesc,
    TextureFormat, TextureRole, VendorScaler, VendorScalerDesc, VideoProcessor,
    VideoProcessorDesc, VideoSource,
};
use crate::prober::vendor;
use crate::selector::{PipelineConfiguration, Sharpening, StageGeometry, StageLayout};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to plan pipeline: {0}")]
    PlanFailed(String),
    #[error("Incompatible stage formats: {0}")]
    IncompatibleFormats(String),
    #[error("Failed to create {0}: {1}")]
    CreationFailed(String, GpuError),
    #[error("Frame failed: {0}")]
    Frame(#[from] GpuError),
}

/// Texture a stage reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Externally owned decoder pool array
    DecoderPool,
    VendorInput,
    FirstPassOutput,
    Enhanced,
    /// Output of shader pass `n` when another pass follows it
    Intermediate(u8),
    ToneMap,
    Video,
    BackBuffer,
}

impl Slot {
    fn role(self) -> TextureRole {
        match self {
            Slot::DecoderPool => TextureRole::DecoderInput,
            Slot::VendorInput => TextureRole::VendorInput,
            Slot::FirstPassOutput => TextureRole::FirstPassOutput,
            Slot::Enhanced => TextureRole::Enhanced,
            Slot::Intermediate(_) => TextureRole::ShaderIntermediate,
            Slot::ToneMap => TextureRole::ToneMap,
            Slot::Video => TextureRole::Video,
            Slot::BackBuffer => TextureRole::BackBuffer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorRole {
    /// Vendor feature pass ahead of the main processor
    FirstPass,
    Main,
    /// Converts the shader output back to video for the conversion shader
    Tone,
}

impl ProcessorRole {
    pub fn label(self) -> &'static str {
        match self {
            ProcessorRole::FirstPass => "first-pass",
            ProcessorRole::Main => "main",
            ProcessorRole::Tone => "tone",
        }
    }

    fn geometry(self, layout: &StageLayout) -> &StageGeometry {
        match self {
            ProcessorRole::FirstPass => &layout.first_pass,
            ProcessorRole::Main => &layout.main,
            ProcessorRole::Tone => &layout.tone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Copy the frame's pool slice into a texture
    FrameCopy,
    VendorUpscale,
    VendorConvert,
    TextureCopy,
    Processor(ProcessorRole),
    /// Index into the plan's shader passes
    Shader(usize),
    /// YUV->RGB draw into the back buffer viewport
    Conversion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStage {
    pub kind: StageKind,
    pub input: Slot,
    pub output: Slot,
    /// Destination offset for copies
    pub offset: (u32, u32),
}

/// What the planner needs to know beyond the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanContext {
    pub decoder_format: TextureFormat,
    /// Allocated size of the pool array, alignment included
    pub pool_size: Dimensions,
    pub back_buffer_format: TextureFormat,
    /// Sample the pool directly instead of copying the frame
    pub bind_decoder: bool,
    /// The device provides a vendor scaler for AMD super resolution
    pub vendor_scaler: bool,
}

/// Textures and stages for one configuration, in execution order
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub textures: Vec<(Slot, TextureDesc)>,
    pub stages: Vec<PlannedStage>,
    pub shader_passes: Vec<PlannedShaderPass>,
    decoder_format: TextureFormat,
    pool_size: Dimensions,
    back_buffer_format: TextureFormat,
}

impl StagePlan {
    fn new(ctx: &PlanContext) -> Self {
        Self {
            textures: Vec::new(),
            stages: Vec::new(),
            shader_passes: Vec::new(),
            decoder_format: ctx.decoder_format,
            pool_size: ctx.pool_size,
            back_buffer_format: ctx.back_buffer_format,
        }
    }

    fn add_texture(&mut self, slot: Slot, desc: TextureDesc) -> Slot {
        self.textures.push((slot, desc));
        slot
    }

    fn add_stage(&mut self, kind: StageKind, input: Slot, output: Slot) {
        self.add_stage_at(kind, input, output, (0, 0));
    }

    fn add_stage_at(&mut self, kind: StageKind, input: Slot, output: Slot, offset: (u32, u32)) {
        self.stages.push(PlannedStage {
            kind,
            input,
            output,
            offset,
        });
    }

    pub fn texture(&self, slot: Slot) -> Option<&TextureDesc> {
        self.textures
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, desc)| desc)
    }

    pub fn format_of(&self, slot: Slot) -> Option<TextureFormat> {
        match slot {
            Slot::DecoderPool => Some(self.decoder_format),
            Slot::BackBuffer => Some(self.back_buffer_format),
            other => self.texture(other).map(|desc| desc.format),
        }
    }

    /// Allocated size of the decoder pool
    pub fn pool_size(&self) -> Dimensions {
        self.pool_size
    }

    fn is_render_target(&self, slot: Slot) -> bool {
        match slot {
            Slot::BackBuffer => true,
            Slot::DecoderPool => false,
            other => self.texture(other).is_some_and(|desc| desc.render_target),
        }
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }

    /// Every stage's output must be readable by the stage that consumes it
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut written: HashSet<Slot> = HashSet::from([Slot::DecoderPool]);

        for stage in &self.stages {
            let missing = |slot| {
                PipelineError::PlanFailed(format!("{:?} uses {:?} which is not planned", stage.kind, slot))
            };
            let input = self.format_of(stage.input).ok_or_else(|| missing(stage.input))?;
            let output = self.format_of(stage.output).ok_or_else(|| missing(stage.output))?;

            if !written.contains(&stage.input) {
                return Err(PipelineError::PlanFailed(format!(
                    "{:?} reads {:?} before anything writes it",
                    stage.kind, stage.input
                )));
            }

            let compatible = match stage.kind {
                StageKind::FrameCopy | StageKind::TextureCopy => input == output,
                StageKind::VendorUpscale => input.is_yuv() && output.is_yuv(),
                StageKind::VendorConvert => input.is_yuv() && output.is_rgb(),
                StageKind::Processor(_) => {
                    output.supports_render_target() && self.is_render_target(stage.output)
                }
                StageKind::Shader(_) => input.is_rgb() && output.is_rgb(),
                StageKind::Conversion => input.is_yuv() && output.is_rgb(),
            };
            if !compatible {
                return Err(PipelineError::IncompatibleFormats(format!(
                    "{:?} cannot go from {:?} ({:?}) to {:?} ({:?})",
                    stage.kind, stage.input, input, stage.output, output
                )));
            }
            written.insert(stage.output);
        }

        for (slot, _) in &self.textures {
            if !self
                .stages
                .iter()
                .any(|s| s.input == *slot || s.output == *slot)
            {
                return Err(PipelineError::PlanFailed(format!(
                    "{:?} is created but never used",
                    slot
                )));
            }
        }
        Ok(())
    }
}

/// YUV format of video textures for the chroma layout and dynamic range
pub fn video_format(yuv444: bool, hdr: bool) -> TextureFormat {
    match (yuv444, hdr) {
        (true, true) => TextureFormat::Y410,
        (true, false) => TextureFormat::Ayuv,
        (false, true) => TextureFormat::P010,
        (false, false) => TextureFormat::Nv12,
    }
}

fn rgb_format(hdr: bool) -> TextureFormat {
    if hdr {
        TextureFormat::Rgb10A2
    } else {
        TextureFormat::Rgba8
    }
}

/// Format of the first-pass output for its output color space
pub fn first_pass_format(color_space: ColorSpace, yuv444: bool) -> TextureFormat {
    if color_space.is_ycbcr() {
        video_format(yuv444, color_space.is_pq())
    } else {
        rgb_format(color_space.is_pq())
    }
}

/// Plan the textures and stages for a configuration
pub fn plan_stages(
    config: &PipelineConfiguration,
    ctx: &PlanContext,
) -> Result<StagePlan, PipelineError> {
    let mut plan = StagePlan::new(ctx);
    let output = config.output.size();
    let decoder = config.decoder;

    if !config.enhancement_enabled {
        if ctx.bind_decoder {
            plan.add_stage(StageKind::Conversion, Slot::DecoderPool, Slot::BackBuffer);
        } else {
            let video = plan.add_texture(
                Slot::Video,
                TextureDesc::new(decoder, ctx.decoder_format, TextureRole::Video),
            );
            plan.add_stage(StageKind::FrameCopy, Slot::DecoderPool, video);
            plan.add_stage(StageKind::Conversion, video, Slot::BackBuffer);
        }
        plan.validate()?;
        return Ok(plan);
    }

    let hdr = config.is_hdr();
    let tone = config.tone_mapping;
    let video_fmt = video_format(config.yuv444, hdr);

    if ctx.vendor_scaler {
        let input = plan.add_texture(
            Slot::VendorInput,
            TextureDesc::new(decoder, ctx.decoder_format, TextureRole::VendorInput),
        );
        let video = plan.add_texture(
            Slot::Video,
            TextureDesc::new(output, video_fmt, TextureRole::Video),
        );
        plan.add_stage(StageKind::FrameCopy, Slot::DecoderPool, input);
        plan.add_stage(StageKind::VendorUpscale, input, video);
        if tone {
            plan.add_stage(StageKind::Conversion, video, Slot::BackBuffer);
        } else {
            let rgb = plan.add_texture(
                Slot::Enhanced,
                TextureDesc::new(output, rgb_format(hdr), TextureRole::Enhanced),
            );
            plan.add_stage(StageKind::VendorConvert, video, rgb);
            plan.add_stage_at(
                StageKind::TextureCopy,
                rgb,
                Slot::BackBuffer,
                config.output.offset(),
            );
        }
        plan.validate()?;
        return Ok(plan);
    }

    let shader = config.enhancer.is_using_shader();
    let mut main_input = Slot::DecoderPool;
    if config.two_pass {
        let format = first_pass_format(config.layout.first_pass.output_color_space, config.yuv444);
        main_input = plan.add_texture(
            Slot::FirstPassOutput,
            TextureDesc::new(output, format, TextureRole::FirstPassOutput).render_target(),
        );
        plan.add_stage(
            StageKind::Processor(ProcessorRole::FirstPass),
            Slot::DecoderPool,
            main_input,
        );
    }

    let enhanced_size = if config.enhancer.is_upscaler() {
        decoder
    } else {
        output
    };
    let main_output = if shader {
        plan.add_texture(
            Slot::Enhanced,
            TextureDesc::new(enhanced_size, rgb_format(hdr), TextureRole::Enhanced).render_target(),
        )
    } else if tone {
        plan.add_texture(
            Slot::Video,
            TextureDesc::new(output, video_fmt, TextureRole::Video).render_target(),
        )
    } else {
        Slot::BackBuffer
    };
    plan.add_stage(
        StageKind::Processor(ProcessorRole::Main),
        main_input,
        main_output,
    );

    if shader {
        let target = if tone {
            plan.add_texture(
                Slot::ToneMap,
                TextureDesc::new(output, rgb_format(hdr), TextureRole::ToneMap).render_target(),
            )
        } else {
            Slot::BackBuffer
        };
        let shader_ctx = ShaderContext {
            input: enhanced_size,
            output,
            // The tone texture is output-sized, so only the back buffer needs the letterbox offset
            target_offset: if tone { (0, 0) } else { config.output.offset() },
            hdr,
            vendor: config.vendor,
        };
        let passes = plan_shader_passes(config.enhancer, &shader_ctx).ok_or_else(|| {
            PipelineError::PlanFailed(format!(
                "{} cannot scale {} to {}",
                config.enhancer.name(),
                enhanced_size,
                output
            ))
        })?;

        let mut input = Slot::Enhanced;
        let last = passes.len().saturating_sub(1);
        for (i, pass) in passes.iter().enumerate() {
            let pass_output = if i == last {
                target
            } else {
                plan.add_texture(
                    Slot::Intermediate(i as u8),
                    TextureDesc::new(
                        output,
                        shader_ctx.intermediate_format(),
                        TextureRole::ShaderIntermediate,
                    )
                    .render_target(),
                )
            };
            plan.add_stage_at(StageKind::Shader(i), input, pass_output, pass.desc.target_offset);
            input = pass_output;
        }
        plan.shader_passes = passes;

        if tone {
            let video = plan.add_texture(
                Slot::Video,
                TextureDesc::new(output, video_fmt, TextureRole::Video).render_target(),
            );
            plan.add_stage(StageKind::Processor(ProcessorRole::Tone), target, video);
        }
    }

    if tone {
        plan.add_stage(StageKind::Conversion, Slot::Video, Slot::BackBuffer);
    }

    plan.validate()?;
    Ok(plan)
}

/// Inputs for building stages on a device
pub struct BuildContext<'a> {
    pub shader_source: &'a dyn ShaderSource,
    pub frame_rate: u32,
    /// Decoder pool array; only its format and size are read here
    pub pool: &'a Texture,
    pub back_buffer: &'a Texture,
    pub bind_decoder: bool,
    /// Wait for the decoder before sampling the pool
    pub fence: bool,
}

/// Final buffer of a frame and whether any stage failed producing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBuffer {
    pub slot: Slot,
    pub degraded: bool,
}

enum ConversionSource {
    Texture(Texture),
    Pool,
}

enum Stage {
    FrameCopy {
        dst: Texture,
        src_box: Rect,
    },
    TextureCopy {
        src: Texture,
        dst: Texture,
        offset: (u32, u32),
    },
    VendorUpscale {
        input: Texture,
        output: Texture,
    },
    VendorConvert {
        input: Texture,
        output: Texture,
    },
    Processor {
        /// Re-bind the frame's pool slice before each blit
        reads_frame: bool,
        processor: Box<dyn VideoProcessor>,
    },
    Shader(Box<dyn ShaderPass>),
    Conversion {
        source: ConversionSource,
        geometry: ConversionGeometry,
    },
}

impl Stage {
    fn name(&self) -> String {
        match self {
            Stage::FrameCopy { .. } => "frame copy".to_string(),
            Stage::TextureCopy { .. } => "texture copy".to_string(),
            Stage::VendorUpscale { .. } => "vendor upscaler".to_string(),
            Stage::VendorConvert { .. } => "vendor converter".to_string(),
            Stage::Processor { processor, .. } => format!("{} video processor", processor.label()),
            Stage::Shader(pass) => format!("{} shader", pass.label()),
            Stage::Conversion { .. } => "color conversion".to_string(),
        }
    }
}

/// Built stages plus every texture they own
pub struct StagePipeline {
    config: PipelineConfiguration,
    plan: StagePlan,
    textures: HashMap<Slot, Texture>,
    stages: Vec<Stage>,
    vendor_scaler: Option<Box<dyn VendorScaler>>,
    pool_views: Option<PoolViews>,
    converter: Option<ColorConverter>,
    fence: bool,
    _lookups: Vec<Texture>,
    /// Stages whose last run failed, so the warning is logged once
    failing: HashSet<usize>,
}

fn created(what: impl Into<String>) -> impl FnOnce(GpuError) -> PipelineError {
    let what = what.into();
    move |e| {
        log::error!("Failed to create {}: {}", what, e);
        PipelineError::CreationFailed(what, e)
    }
}

fn wants_vendor_scaler(config: &PipelineConfiguration) -> bool {
    config.enhancement_enabled && config.vendor_super_resolution && config.vendor == GpuVendor::Amd
}

/// Processor that carries the vendor features
fn vendor_feature_target(config: &PipelineConfiguration) -> Option<ProcessorRole> {
    if !config.enhancement_enabled || !(config.vendor_super_resolution || config.vendor_hdr) {
        None
    } else if config.two_pass {
        Some(ProcessorRole::FirstPass)
    } else {
        Some(ProcessorRole::Main)
    }
}

fn create_vendor_scaler(
    device: &dyn GpuDevice,
    config: &PipelineConfiguration,
    frame_rate: u32,
) -> Result<Option<Box<dyn VendorScaler>>, PipelineError> {
    let output = config.output.size();
    let desc = VendorScalerDesc {
        input_size: config.decoder,
        output_size: output,
        frame_rate,
        hdr: config.is_hdr(),
        // Only sharpen when the picture is actually scaled
        sharpness: if output == config.decoder { 2.0 } else { 0.5 },
    };
    match device.create_vendor_scaler(&desc) {
        Ok(scaler) => Ok(Some(scaler)),
        Err(e) if e.is_unsupported() => {
            log::info!("{} vendor scaler unavailable, using the video processor: {}", config.vendor, e);
            Ok(None)
        }
        Err(e) => Err(created("vendor scaler")(e)),
    }
}

fn enable_vendor_features(
    device: &dyn GpuDevice,
    config: &PipelineConfiguration,
    processor: &mut dyn VideoProcessor,
) {
    if config.vendor_super_resolution {
        if config.vendor == GpuVendor::Amd {
            log::info!("AMD video super resolution needs the vendor scaler; the processor scales instead");
        } else {
            match vendor::set_super_resolution(config.vendor, device, processor, true) {
                Ok(true) => log::info!(
                    "{} video super resolution enabled on the {} processor",
                    config.vendor,
                    processor.label()
                ),
                Ok(false) => log::info!("{} has no video super resolution", config.vendor),
                Err(e) => log::warn!("Video super resolution unavailable: {}", e),
            }
        }
    }

    if config.vendor_hdr {
        match vendor::set_hdr_simulation(config.vendor, processor, true) {
            Ok(true) => log::info!("{} SDR->HDR enabled on the {} processor", config.vendor, processor.label()),
            Ok(false) => {}
            Err(e) => log::warn!("SDR->HDR unavailable: {}", e),
        }
    }
}

fn lookup<'t>(textures: &'t HashMap<Slot, Texture>, slot: Slot) -> Result<&'t Texture, PipelineError> {
    textures
        .get(&slot)
        .ok_or_else(|| PipelineError::PlanFailed(format!("{:?} was not created", slot)))
}

/// Create the stages a configuration implies
///
/// Any creation failure is returned; the caller then falls back to the
/// non-enhanced path for the session.
pub fn build_stages(
    device: &dyn GpuDevice,
    config: &PipelineConfiguration,
    ctx: &BuildContext<'_>,
) -> Result<StagePipeline, PipelineError> {
    let span = tracing::info_span!(
        "build_stages",
        enhancer = config.enhancer.name(),
        passes = config.pass_count(),
        tone = config.tone_mapping
    );
    let _guard = span.enter();

    let vendor_scaler = if wants_vendor_scaler(config) {
        create_vendor_scaler(device, config, ctx.frame_rate)?
    } else {
        None
    };

    let plan = plan_stages(
        config,
        &PlanContext {
            decoder_format: ctx.pool.format(),
            pool_size: ctx.pool.size(),
            back_buffer_format: ctx.back_buffer.format(),
            bind_decoder: ctx.bind_decoder,
            vendor_scaler: vendor_scaler.is_some(),
        },
    )?;

    let mut textures = HashMap::new();
    textures.insert(Slot::DecoderPool, ctx.pool.clone());
    textures.insert(Slot::BackBuffer, ctx.back_buffer.clone());
    for (slot, desc) in &plan.textures {
        let texture = device
            .create_texture(desc)
            .map_err(created(format!("{:?} texture", slot)))?;
        textures.insert(*slot, texture);
    }

    let feature_target = vendor_feature_target(config);
    let mut lookups = Vec::new();
    let mut stages = Vec::with_capacity(plan.stages.len());
    let mut converter = None;
    let mut pool_views = None;

    for planned in &plan.stages {
        let input = lookup(&textures, planned.input)?;
        let output = lookup(&textures, planned.output)?;

        let stage = match planned.kind {
            StageKind::FrameCopy => Stage::FrameCopy {
                dst: output.clone(),
                src_box: Rect::from_size(config.decoder),
            },
            StageKind::TextureCopy => Stage::TextureCopy {
                src: input.clone(),
                dst: output.clone(),
                offset: planned.offset,
            },
            StageKind::VendorUpscale => Stage::VendorUpscale {
                input: input.clone(),
                output: output.clone(),
            },
            StageKind::VendorConvert => Stage::VendorConvert {
                input: input.clone(),
                output: output.clone(),
            },
            StageKind::Processor(role) => {
                let geometry = role.geometry(&config.layout);
                let reads_frame = planned.input == Slot::DecoderPool;
                let input_size = if reads_frame {
                    config.decoder
                } else {
                    input.size()
                };
                let desc = VideoProcessorDesc {
                    label: role.label(),
                    input_size,
                    output_size: output.size(),
                    frame_rate: ctx.frame_rate,
                    source_rect: geometry.source,
                    dest_rect: geometry.dest,
                    target_rect: geometry.target,
                    input_color_space: geometry.input_color_space,
                    output_color_space: geometry.output_color_space,
                    background: geometry.background,
                    input_format: input.format(),
                    edge_enhancement: match (role, config.sharpening) {
                        (ProcessorRole::Main, Sharpening::VideoProcessorEdge(strength)) => {
                            Some(strength)
                        }
                        _ => None,
                    },
                };
                let source = if reads_frame {
                    ProcessorInput::DecoderFrame
                } else {
                    ProcessorInput::Texture(input)
                };
                let mut processor = device
                    .create_video_processor(&desc, source, output)
                    .map_err(created(format!("{} video processor", role.label())))?;
                if feature_target == Some(role) {
                    enable_vendor_features(device, config, processor.as_mut());
                }
                Stage::Processor {
                    reads_frame,
                    processor,
                }
            }
            StageKind::Shader(index) => {
                let pass = &plan.shader_passes[index];
                let mut tables = Vec::with_capacity(pass.lookups.len());
                for table in &pass.lookups {
                    let data = ctx
                        .shader_source
                        .load(table.name)
                        .map_err(created(table.name))?;
                    let texture = device
                        .create_texture_with_data(
                            &TextureDesc::new(table.size, table.format, TextureRole::Lookup),
                            &data,
                            table.row_pitch,
                        )
                        .map_err(created(table.name))?;
                    tables.push(texture);
                }
                let shader = device
                    .create_shader_pass(&pass.desc, ctx.shader_source, input, output, &tables)
                    .map_err(created(pass.desc.label))?;
                lookups.extend(tables);
                Stage::Shader(shader)
            }
            StageKind::Conversion => {
                converter = Some(ColorConverter::new(input.format()));
                let (source, content) = if planned.input == Slot::DecoderPool {
                    let views = device
                        .create_pool_views(
                            input.resource(),
                            input.format(),
                            DECODER_BUFFER_POOL_SIZE,
                        )
                        .map_err(created("decoder pool views"))?;
                    pool_views = Some(views);
                    (ConversionSource::Pool, config.decoder)
                } else if config.enhancement_enabled {
                    (ConversionSource::Texture(input.clone()), config.output.size())
                } else {
                    (ConversionSource::Texture(input.clone()), config.decoder)
                };
                Stage::Conversion {
                    source,
                    geometry: ConversionGeometry {
                        source: content,
                        texture: input.size(),
                        viewport: config.output.rect(),
                    },
                }
            }
        };
        stages.push(stage);
    }

    log::info!(
        "Built {} stages ({} textures) for {} / {}",
        stages.len(),
        plan.textures.len(),
        config.upscaler_label,
        config.sharpener_label
    );

    Ok(StagePipeline {
        config: *config,
        plan,
        textures,
        stages,
        vendor_scaler,
        pool_views,
        converter,
        fence: ctx.bind_decoder && ctx.fence,
        _lookups: lookups,
        failing: HashSet::new(),
    })
}

impl StagePipeline {
    pub fn config(&self) -> &PipelineConfiguration {
        &self.config
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn texture(&self, slot: Slot) -> Option<&Texture> {
        self.textures.get(&slot)
    }

    pub fn uses_vendor_scaler(&self) -> bool {
        self.vendor_scaler.is_some()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Conversion shaders lose their bound constants when the context is reset
    pub fn invalidate_conversion(&mut self) {
        if let Some(converter) = self.converter.as_mut() {
            converter.invalidate();
        }
    }

    /// Apply stream and display HDR metadata to every processor
    pub fn set_hdr_metadata(
        &mut self,
        stream: Option<&Hdr10Metadata>,
        output: Option<&Hdr10Metadata>,
    ) -> Result<(), PipelineError> {
        for stage in &mut self.stages {
            if let Stage::Processor { processor, .. } = stage {
                processor.set_hdr_metadata(stream, output)?;
            }
        }
        Ok(())
    }

    /// Run every stage for the frame
    ///
    /// A failing stage is logged once and skipped; later stages read
    /// whatever their inputs last held. Only an invalid pool index or a
    /// lost device is returned as an error.
    pub fn execute_frame(
        &mut self,
        ctx: &mut dyn DeviceContext,
        frame: &DecodedFrame,
    ) -> Result<ColorBuffer, PipelineError> {
        if frame.pool_index >= DECODER_BUFFER_POOL_SIZE {
            return Err(GpuError::InvalidPoolIndex(frame.pool_index).into());
        }
        if let Some(views) = &self.pool_views {
            views.get(frame.pool_index)?;
        }

        let Self {
            stages,
            vendor_scaler,
            pool_views,
            converter,
            failing,
            fence,
            ..
        } = self;

        let mut degraded = false;
        for (index, stage) in stages.iter_mut().enumerate() {
            let result = match stage {
                Stage::FrameCopy { dst, src_box } => ctx.copy_frame(frame, dst, (0, 0), *src_box),
                Stage::TextureCopy { src, dst, offset } => {
                    let src_box = Rect::from_size(src.size());
                    ctx.copy_texture(src, dst, *offset, src_box)
                }
                Stage::VendorUpscale { input, output } => match vendor_scaler.as_mut() {
                    Some(scaler) => scaler.upscale(input, output),
                    None => Err(GpuError::Unsupported("no vendor scaler".to_string())),
                },
                Stage::VendorConvert { input, output } => match vendor_scaler.as_mut() {
                    Some(scaler) => scaler.convert(input, output),
                    None => Err(GpuError::Unsupported("no vendor scaler".to_string())),
                },
                Stage::Processor {
                    reads_frame,
                    processor,
                } => {
                    if *reads_frame {
                        processor.bind_frame(frame).and_then(|_| processor.blit())
                    } else {
                        processor.blit()
                    }
                }
                Stage::Shader(pass) => pass.execute(),
                Stage::Conversion { source, geometry } => run_conversion(
                    ctx,
                    converter.as_mut(),
                    pool_views.as_ref(),
                    *fence,
                    source,
                    geometry,
                    frame,
                ),
            };

            match result {
                Ok(()) => {
                    if failing.remove(&index) {
                        log::info!("{} recovered", stage.name());
                    }
                }
                Err(e @ GpuError::DeviceLost(_)) => {
                    log::error!("{} lost the device: {}", stage.name(), e);
                    return Err(e.into());
                }
                Err(e) => {
                    degraded = true;
                    if failing.insert(index) {
                        log::warn!("{} failed, presenting the last good output: {}", stage.name(), e);
                    }
                }
            }
        }

        Ok(ColorBuffer {
            slot: Slot::BackBuffer,
            degraded,
        })
    }
}

fn run_conversion(
    ctx: &mut dyn DeviceContext,
    converter: Option<&mut ColorConverter>,
    pool_views: Option<&PoolViews>,
    fence: bool,
    source: &ConversionSource,
    geometry: &ConversionGeometry,
    frame: &DecodedFrame,
) -> Result<(), GpuError> {
    let converter =
        converter.ok_or_else(|| GpuError::Backend("conversion stage without converter".to_string()))?;
    converter.bind_conversion(ctx, frame.colorspace, frame.full_range)?;
    ctx.set_conversion_geometry(geometry)?;
    match source {
        ConversionSource::Texture(texture) => ctx.draw_video(VideoSource::Texture(texture)),
        ConversionSource::Pool => {
            let views = pool_views
                .ok_or_else(|| GpuError::Backend("decoder pool views missing".to_string()))?;
            if fence {
                ctx.wait_for_decoder()?;
            }
            ctx.draw_video(VideoSource::PoolSlice(views, frame.pool_index))
        }
    }
}
