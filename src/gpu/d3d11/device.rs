// D3D11 device
// Texture, view, processor and shader creation on a video-capable device

use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;
use windows::{
    Win32::Graphics::Direct3D11::*, Win32::Graphics::Dxgi::Common::*, core::Interface,
};

use super::processor::D3d11VideoProcessor;
use super::shader::D3d11ShaderPass;
use super::{D3d11Resource, RenderTarget, TargetSlot, dxgi_format, guid, native_texture};
use crate::decoder::{DECODER_BUFFER_POOL_SIZE, DecoderProfile, VideoFormat};
use crate::gpu::{
    AdapterInfo, FeatureLevel, GpuDevice, GpuError, GpuResource, OverlayResources, PoolViews,
    ProcessorInput, ShaderPass, ShaderPassDesc, ShaderSource, Texture, TextureDesc,
    TextureFormat, TextureRole, VendorScaler, VendorScalerDesc, VideoProcessor,
    VideoProcessorCaps, VideoProcessorDesc,
};

fn profile_guid(profile: DecoderProfile) -> u128 {
    match profile {
        DecoderProfile::H264VldNoFgt => 0x1b81be68_a0c7_11d3_b984_00c04f2e73c5,
        DecoderProfile::HevcVldMain => 0x5b11d51b_2f4c_4452_bcc3_09f2a1160cc0,
        DecoderProfile::HevcVldMain10 => 0x107af0e0_ef1a_4d19_aba8_67a163073d13,
        DecoderProfile::HevcVldMain444 => 0x4008018f_f537_4b36_98cf_61af8a2c1a33,
        DecoderProfile::HevcVldMain10_444 => 0x0dabeffa_4458_4602_bc03_0795659d617c,
        DecoderProfile::Av1VldProfile0 => 0xb8be4ccb_cf53_46ba_8d59_d6b8a6da5d2a,
        DecoderProfile::Av1VldProfile1 => 0x6936ff0f_45b1_4163_9cc1_646ef6946108,
    }
}

/// Overlay quad vertex: position then texture coordinate
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct Vertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

/// Triangle strip covering `[left, top, right, bottom]` in NDC
pub(crate) fn quad(ndc: [f32; 4], max_u: f32, max_v: f32) -> [Vertex; 4] {
    let [left, top, right, bottom] = ndc;
    [
        Vertex { x: left, y: bottom, u: 0.0, v: max_v },
        Vertex { x: left, y: top, u: 0.0, v: 0.0 },
        Vertex { x: right, y: bottom, u: max_u, v: max_v },
        Vertex { x: right, y: top, u: max_u, v: 0.0 },
    ]
}

pub(crate) fn create_buffer(
    device: &ID3D11Device,
    bind: D3D11_BIND_FLAG,
    data: &[u8],
) -> Result<ID3D11Buffer, GpuError> {
    // Constant buffers must be a multiple of 16 bytes
    let width = (data.len() as u32).div_ceil(16) * 16;
    let mut padded = data.to_vec();
    padded.resize(width as usize, 0);
    let desc = D3D11_BUFFER_DESC {
        ByteWidth: width,
        Usage: D3D11_USAGE_IMMUTABLE,
        BindFlags: bind.0 as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
        StructureByteStride: 0,
    };
    let init = D3D11_SUBRESOURCE_DATA {
        pSysMem: padded.as_ptr() as *const c_void,
        SysMemPitch: 0,
        SysMemSlicePitch: 0,
    };
    let mut buffer: Option<ID3D11Buffer> = None;
    unsafe { device.CreateBuffer(&desc, Some(&init as *const _), Some(&mut buffer)) }
        .map_err(|e| GpuError::CreationFailed(format!("CreateBuffer failed: {}", e)))?;
    buffer.ok_or_else(|| GpuError::CreationFailed("CreateBuffer returned null".to_string()))
}

pub(crate) fn create_view(
    device: &ID3D11Device,
    texture: &ID3D11Texture2D,
    format: TextureFormat,
    array_slice: Option<u32>,
) -> Result<ID3D11ShaderResourceView, GpuError> {
    let desc = match array_slice {
        Some(slice) => D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: dxgi_format(format),
            ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2DARRAY,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DArray: D3D11_TEX2D_ARRAY_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    FirstArraySlice: slice,
                    ArraySize: 1,
                },
            },
        },
        None => D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: dxgi_format(format),
            ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                },
            },
        },
    };
    let mut view: Option<ID3D11ShaderResourceView> = None;
    unsafe { device.CreateShaderResourceView(texture, Some(&desc as *const _), Some(&mut view)) }
        .map_err(|e| {
            GpuError::CreationFailed(format!("CreateShaderResourceView {:?} failed: {}", format, e))
        })?;
    view.ok_or_else(|| GpuError::CreationFailed("CreateShaderResourceView returned null".to_string()))
}

pub struct D3d11Device {
    device: ID3D11Device,
    video_device: ID3D11VideoDevice,
    context: ID3D11DeviceContext,
    video_context: ID3D11VideoContext,
    info: AdapterInfo,
    level: FeatureLevel,
    back_buffer: TargetSlot,
}

unsafe impl Send for D3d11Device {}
unsafe impl Sync for D3d11Device {}

impl D3d11Device {
    pub(crate) fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        info: AdapterInfo,
        level: FeatureLevel,
        back_buffer: TargetSlot,
    ) -> Result<Self, GpuError> {
        let video_device: ID3D11VideoDevice = device
            .cast()
            .map_err(|e| GpuError::Unsupported(format!("ID3D11VideoDevice unavailable: {}", e)))?;
        let video_context: ID3D11VideoContext = context
            .cast()
            .map_err(|e| GpuError::Unsupported(format!("ID3D11VideoContext unavailable: {}", e)))?;
        Ok(Self {
            device,
            video_device,
            context,
            video_context,
            info,
            level,
            back_buffer,
        })
    }

    pub(crate) fn raw(&self) -> &ID3D11Device {
        &self.device
    }

    /// Slot through which the swap chain's render target reaches the context
    pub(crate) fn back_buffer_slot(&self) -> TargetSlot {
        self.back_buffer.clone()
    }

    pub(crate) fn set_back_buffer(&self, target: Option<RenderTarget>) {
        *self.back_buffer.lock() = target;
    }

    fn create_texture2d(
        &self,
        desc: &TextureDesc,
        data: Option<(&[u8], u32)>,
    ) -> Result<Texture, GpuError> {
        let decoder = desc.role == TextureRole::DecoderInput;
        let mut bind = D3D11_BIND_SHADER_RESOURCE.0;
        if decoder {
            bind |= D3D11_BIND_DECODER.0;
        }
        if desc.render_target {
            bind |= D3D11_BIND_RENDER_TARGET.0;
        }
        if desc.unordered_access {
            bind |= D3D11_BIND_UNORDERED_ACCESS.0;
        }
        let native = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: if decoder { DECODER_BUFFER_POOL_SIZE } else { 1 },
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: if data.is_some() {
                D3D11_USAGE_IMMUTABLE
            } else {
                D3D11_USAGE_DEFAULT
            },
            BindFlags: bind as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let init = data.map(|(bytes, pitch)| D3D11_SUBRESOURCE_DATA {
            pSysMem: bytes.as_ptr() as *const c_void,
            SysMemPitch: pitch,
            SysMemSlicePitch: 0,
        });

        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device.CreateTexture2D(
                &native,
                init.as_ref().map(|i| i as *const _),
                Some(&mut texture),
            )
        }
        .map_err(|e| {
            GpuError::CreationFailed(format!(
                "CreateTexture2D {:?} {}x{} {:?} failed: {}",
                desc.role, desc.width, desc.height, desc.format, e
            ))
        })?;
        let texture = texture
            .ok_or_else(|| GpuError::CreationFailed("CreateTexture2D returned null".to_string()))?;
        Ok(Texture::new(*desc, Arc::new(D3d11Resource::Texture(texture))))
    }
}

impl GpuDevice for D3d11Device {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn adapter(&self) -> &AdapterInfo {
        &self.info
    }

    fn feature_level(&self) -> FeatureLevel {
        self.level
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Texture, GpuError> {
        self.create_texture2d(desc, None)
    }

    fn create_texture_with_data(
        &self,
        desc: &TextureDesc,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<Texture, GpuError> {
        self.create_texture2d(desc, Some((data, row_pitch)))
    }

    fn create_video_processor(
        &self,
        desc: &VideoProcessorDesc,
        input: ProcessorInput<'_>,
        output: &Texture,
    ) -> Result<Box<dyn VideoProcessor>, GpuError> {
        let processor = D3d11VideoProcessor::new(
            &self.video_device,
            &self.video_context,
            desc,
            input,
            output,
        )?;
        Ok(Box::new(processor))
    }

    fn create_shader_pass(
        &self,
        desc: &ShaderPassDesc,
        source: &dyn ShaderSource,
        input: &Texture,
        output: &Texture,
        lookups: &[Texture],
    ) -> Result<Box<dyn ShaderPass>, GpuError> {
        let pass = D3d11ShaderPass::new(self, &self.context, desc, source, input, output, lookups)?;
        Ok(Box::new(pass))
    }

    fn create_vendor_scaler(
        &self,
        _desc: &VendorScalerDesc,
    ) -> Result<Box<dyn VendorScaler>, GpuError> {
        Err(GpuError::Unsupported(format!(
            "No vendor scaler runtime for {}",
            self.info.description
        )))
    }

    fn create_pool_views(
        &self,
        pool: &Arc<dyn GpuResource>,
        format: TextureFormat,
        count: u32,
    ) -> Result<PoolViews, GpuError> {
        let texture = native_texture(pool)?;
        let planes = format.plane_view_formats();
        let mut views: Vec<Arc<dyn GpuResource>> = Vec::with_capacity(count as usize);
        for slice in 0..count {
            let plane_views = planes
                .iter()
                .map(|&plane| create_view(&self.device, texture, plane, Some(slice)))
                .collect::<Result<Vec<_>, _>>()?;
            views.push(Arc::new(D3d11Resource::PlaneViews(plane_views)));
        }
        Ok(PoolViews::new(views))
    }

    fn create_overlay(
        &self,
        image: &image::RgbaImage,
        ndc_rect: [f32; 4],
    ) -> Result<OverlayResources, GpuError> {
        let desc = TextureDesc::new(
            crate::gpu::Dimensions::new(image.width(), image.height()),
            TextureFormat::Rgba8,
            TextureRole::Overlay,
        );
        let texture = self.create_texture_with_data(&desc, image.as_raw(), image.width() * 4)?;
        let view = create_view(
            &self.device,
            native_texture(texture.resource())?,
            TextureFormat::Rgba8,
            None,
        )?;

        let vertices = quad(ndc_rect, 1.0, 1.0);
        let bytes = unsafe {
            std::slice::from_raw_parts(
                vertices.as_ptr() as *const u8,
                std::mem::size_of_val(&vertices),
            )
        };
        let buffer = create_buffer(&self.device, D3D11_BIND_VERTEX_BUFFER, bytes)?;

        Ok(OverlayResources {
            texture,
            vertex_buffer: Arc::new(D3d11Resource::Buffer(buffer)),
            view: Arc::new(D3d11Resource::View(view)),
        })
    }

    fn check_decoder_support(&self, format: VideoFormat) -> Result<bool, GpuError> {
        let Some(profile) = format.profile() else {
            return Ok(false);
        };
        let profile = guid(profile_guid(profile));
        let supported = unsafe {
            self.video_device
                .CheckVideoDecoderFormat(&profile, dxgi_format(format.surface_format()))
        }
        .map_err(|e| GpuError::Backend(format!("CheckVideoDecoderFormat failed: {}", e)))?;
        Ok(supported.as_bool())
    }

    fn video_processor_caps(&self) -> Result<VideoProcessorCaps, GpuError> {
        let content = D3D11_VIDEO_PROCESSOR_CONTENT_DESC {
            InputFrameFormat: D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE,
            InputFrameRate: DXGI_RATIONAL {
                Numerator: 60,
                Denominator: 1,
            },
            InputWidth: 1920,
            InputHeight: 1080,
            OutputFrameRate: DXGI_RATIONAL {
                Numerator: 60,
                Denominator: 1,
            },
            OutputWidth: 1920,
            OutputHeight: 1080,
            Usage: D3D11_VIDEO_USAGE_PLAYBACK_NORMAL,
        };
        let caps = unsafe {
            let enumerator = self
                .video_device
                .CreateVideoProcessorEnumerator(&content)
                .map_err(|e| {
                    GpuError::Unsupported(format!("CreateVideoProcessorEnumerator failed: {}", e))
                })?;
            enumerator
                .GetVideoProcessorCaps()
                .map_err(|e| GpuError::Backend(format!("GetVideoProcessorCaps failed: {}", e)))?
        };
        Ok(VideoProcessorCaps {
            edge_enhancement: caps.FilterCaps
                & D3D11_VIDEO_PROCESSOR_FILTER_CAPS_EDGE_ENHANCEMENT.0 as u32
                != 0,
            auto_stream_super_resolution: false,
        })
    }
}
