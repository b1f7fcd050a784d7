// D3D11 video processor
// Compositor scaling and color conversion with vendor stream/output extensions

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use windows::{
    Win32::Foundation::RECT, Win32::Graphics::Direct3D11::*, Win32::Graphics::Dxgi::Common::*,
    Win32::Graphics::Dxgi::*, core::Interface,
};

use super::{dxgi_color_space, guid, native_texture, texture_of};
use crate::decoder::DecodedFrame;
use crate::gpu::{
    Background, GpuError, Hdr10Metadata, ProcessorInput, Rect, Texture, VendorExtension,
    VideoProcessor, VideoProcessorCaps, VideoProcessorDesc,
};
use crate::prober::vendor::INTEL_VPE_GUID;

#[repr(C)]
struct IntelVpeExtension {
    function: u32,
    param: *mut c_void,
}

#[repr(C)]
struct NvidiaStreamExtension {
    version: u32,
    method: u32,
    enable: u32,
}

fn rect(r: Rect) -> RECT {
    RECT {
        left: r.left,
        top: r.top,
        right: r.right,
        bottom: r.bottom,
    }
}

fn dxgi_metadata(meta: &Hdr10Metadata) -> DXGI_HDR_METADATA_HDR10 {
    DXGI_HDR_METADATA_HDR10 {
        RedPrimary: meta.red_primary,
        GreenPrimary: meta.green_primary,
        BluePrimary: meta.blue_primary,
        WhitePoint: meta.white_point,
        MaxMasteringLuminance: meta.max_mastering_luminance,
        MinMasteringLuminance: meta.min_mastering_luminance,
        MaxContentLightLevel: meta.max_content_light_level,
        MaxFrameAverageLightLevel: meta.max_frame_average_light_level,
    }
}

pub(crate) struct D3d11VideoProcessor {
    label: String,
    caps: VideoProcessorCaps,
    video_device: ID3D11VideoDevice,
    video_context: ID3D11VideoContext,
    enumerator: ID3D11VideoProcessorEnumerator,
    processor: ID3D11VideoProcessor,
    output_view: ID3D11VideoProcessorOutputView,
    input_view: Option<ID3D11VideoProcessorInputView>,
}

unsafe impl Send for D3d11VideoProcessor {}

impl D3d11VideoProcessor {
    pub(crate) fn new(
        video_device: &ID3D11VideoDevice,
        video_context: &ID3D11VideoContext,
        desc: &VideoProcessorDesc,
        input: ProcessorInput<'_>,
        output: &Texture,
    ) -> Result<Self, GpuError> {
        let rate = DXGI_RATIONAL {
            Numerator: desc.frame_rate.max(1),
            Denominator: 1,
        };
        let content = D3D11_VIDEO_PROCESSOR_CONTENT_DESC {
            InputFrameFormat: D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE,
            InputFrameRate: rate,
            InputWidth: desc.input_size.width,
            InputHeight: desc.input_size.height,
            OutputFrameRate: rate,
            OutputWidth: desc.output_size.width,
            OutputHeight: desc.output_size.height,
            Usage: D3D11_VIDEO_USAGE_OPTIMAL_QUALITY,
        };

        let (enumerator, processor, caps) = unsafe {
            let enumerator = video_device
                .CreateVideoProcessorEnumerator(&content)
                .map_err(|e| {
                    GpuError::CreationFailed(format!(
                        "{}: CreateVideoProcessorEnumerator failed: {}",
                        desc.label, e
                    ))
                })?;
            let caps = enumerator.GetVideoProcessorCaps().map_err(|e| {
                GpuError::Backend(format!("{}: GetVideoProcessorCaps failed: {}", desc.label, e))
            })?;
            let processor = video_device.CreateVideoProcessor(&enumerator, 0).map_err(|e| {
                GpuError::CreationFailed(format!(
                    "{}: CreateVideoProcessor failed: {}",
                    desc.label, e
                ))
            })?;
            (enumerator, processor, caps)
        };

        let output_desc = D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC {
            ViewDimension: D3D11_VPOV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_OUTPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPOV { MipSlice: 0 },
            },
        };
        let mut output_view: Option<ID3D11VideoProcessorOutputView> = None;
        unsafe {
            video_device.CreateVideoProcessorOutputView(
                texture_of(output)?,
                &enumerator,
                &output_desc,
                Some(&mut output_view),
            )
        }
        .map_err(|e| {
            GpuError::CreationFailed(format!("{}: CreateOutputView failed: {}", desc.label, e))
        })?;
        let output_view = output_view
            .ok_or_else(|| GpuError::CreationFailed("CreateOutputView returned null".to_string()))?;

        let edge_enhancement =
            caps.FilterCaps & D3D11_VIDEO_PROCESSOR_FILTER_CAPS_EDGE_ENHANCEMENT.0 as u32 != 0;
        let mut vp = Self {
            label: desc.label.to_string(),
            caps: VideoProcessorCaps {
                edge_enhancement,
                auto_stream_super_resolution: false,
            },
            video_device: video_device.clone(),
            video_context: video_context.clone(),
            enumerator,
            processor,
            output_view,
            input_view: None,
        };

        if let ProcessorInput::Texture(texture) = input {
            vp.input_view = Some(vp.create_input_view(texture_of(texture)?, 0)?);
        }
        vp.configure(desc)?;
        Ok(vp)
    }

    fn create_input_view(
        &self,
        texture: &ID3D11Texture2D,
        slice: u32,
    ) -> Result<ID3D11VideoProcessorInputView, GpuError> {
        let desc = D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC {
            FourCC: 0,
            ViewDimension: D3D11_VPIV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_VIDEO_PROCESSOR_INPUT_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_VPIV {
                    MipSlice: 0,
                    ArraySlice: slice,
                },
            },
        };
        let mut view: Option<ID3D11VideoProcessorInputView> = None;
        unsafe {
            self.video_device.CreateVideoProcessorInputView(
                texture,
                &self.enumerator,
                &desc,
                Some(&mut view),
            )
        }
        .map_err(|e| GpuError::Backend(format!("{}: CreateInputView failed: {}", self.label, e)))?;
        view.ok_or_else(|| GpuError::Backend("CreateInputView returned null".to_string()))
    }

    fn configure(&self, desc: &VideoProcessorDesc) -> Result<(), GpuError> {
        let ctx = &self.video_context;
        let p = &self.processor;
        unsafe {
            ctx.VideoProcessorSetStreamFrameFormat(p, 0, D3D11_VIDEO_FRAME_FORMAT_PROGRESSIVE);
            ctx.VideoProcessorSetStreamOutputRate(
                p,
                0,
                D3D11_VIDEO_PROCESSOR_OUTPUT_RATE_NORMAL,
                false,
                None,
            );
            ctx.VideoProcessorSetStreamSourceRect(p, 0, true, Some(&rect(desc.source_rect) as *const _));
            ctx.VideoProcessorSetStreamDestRect(p, 0, true, Some(&rect(desc.dest_rect) as *const _));
            ctx.VideoProcessorSetOutputTargetRect(p, true, Some(&rect(desc.target_rect) as *const _));

            let [r, g, b, a] = desc.background.color();
            let color = D3D11_VIDEO_COLOR {
                Anonymous: D3D11_VIDEO_COLOR_0 {
                    RGBA: D3D11_VIDEO_COLOR_RGBA { R: r, G: g, B: b, A: a },
                },
            };
            ctx.VideoProcessorSetOutputBackgroundColor(
                p,
                desc.background == Background::YCbCr,
                &color,
            );

            let ctx1: ID3D11VideoContext1 = ctx.cast().map_err(|e| {
                GpuError::Unsupported(format!("ID3D11VideoContext1 unavailable: {}", e))
            })?;
            ctx1.VideoProcessorSetStreamColorSpace1(p, 0, dxgi_color_space(desc.input_color_space));
            ctx1.VideoProcessorSetOutputColorSpace1(p, dxgi_color_space(desc.output_color_space));

            if let Some(level) = desc.edge_enhancement {
                if self.caps.edge_enhancement {
                    ctx.VideoProcessorSetStreamFilter(
                        p,
                        0,
                        D3D11_VIDEO_PROCESSOR_FILTER_EDGE_ENHANCEMENT,
                        true,
                        level,
                    );
                }
            }
        }
        Ok(())
    }

    fn set_stream_extension(&self, ext_guid: u128, data: &mut [u8]) -> Result<(), GpuError> {
        let ext_guid = guid(ext_guid);
        let hr = unsafe {
            self.video_context.VideoProcessorSetStreamExtension(
                &self.processor,
                0,
                &ext_guid,
                data.len() as u32,
                data.as_mut_ptr() as *const c_void,
            )
        };
        windows::core::HRESULT(hr)
            .ok()
            .map_err(|e| GpuError::Unsupported(format!("{}: stream extension: {}", self.label, e)))
    }

    fn set_output_extension(&self, ext_guid: u128, data: &mut [u8]) -> Result<(), GpuError> {
        let ext_guid = guid(ext_guid);
        let hr = unsafe {
            self.video_context.VideoProcessorSetOutputExtension(
                &self.processor,
                &ext_guid,
                data.len() as u32,
                data.as_mut_ptr() as *const c_void,
            )
        };
        windows::core::HRESULT(hr)
            .ok()
            .map_err(|e| GpuError::Unsupported(format!("{}: output extension: {}", self.label, e)))
    }
}

fn as_bytes<T>(value: &mut T) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(value as *mut T as *mut u8, std::mem::size_of::<T>()) }
}

impl VideoProcessor for D3d11VideoProcessor {
    fn label(&self) -> &str {
        &self.label
    }

    fn caps(&self) -> VideoProcessorCaps {
        self.caps
    }

    fn bind_frame(&mut self, frame: &DecodedFrame) -> Result<(), GpuError> {
        let pool = native_texture(&frame.surface)?;
        self.input_view = Some(self.create_input_view(pool, frame.pool_index)?);
        Ok(())
    }

    fn apply_extension(&mut self, extension: &VendorExtension) -> Result<(), GpuError> {
        match *extension {
            VendorExtension::IntelOutput { function, param } => {
                let mut param = param;
                let mut ext = IntelVpeExtension {
                    function,
                    param: &mut param as *mut u32 as *mut c_void,
                };
                self.set_output_extension(INTEL_VPE_GUID.0, as_bytes(&mut ext))
            }
            VendorExtension::IntelStream { function, param } => {
                let mut param = param;
                let mut ext = IntelVpeExtension {
                    function,
                    param: &mut param as *mut u32 as *mut c_void,
                };
                self.set_stream_extension(INTEL_VPE_GUID.0, as_bytes(&mut ext))
            }
            VendorExtension::NvidiaStream {
                guid,
                version,
                method,
                enable,
            } => {
                let mut ext = NvidiaStreamExtension {
                    version,
                    method,
                    enable,
                };
                self.set_stream_extension(guid.0, as_bytes(&mut ext))
            }
        }
    }

    fn set_auto_super_resolution(&mut self, _enable: bool) -> Result<(), GpuError> {
        Err(GpuError::Unsupported(format!(
            "{}: automatic stream super resolution is not exposed",
            self.label
        )))
    }

    fn set_hdr_metadata(
        &mut self,
        stream: Option<&Hdr10Metadata>,
        output: Option<&Hdr10Metadata>,
    ) -> Result<(), GpuError> {
        let ctx2: ID3D11VideoContext2 = self.video_context.cast().map_err(|e| {
            GpuError::Unsupported(format!("ID3D11VideoContext2 unavailable: {}", e))
        })?;
        let size = std::mem::size_of::<DXGI_HDR_METADATA_HDR10>() as u32;
        unsafe {
            match stream {
                Some(meta) => {
                    let meta = dxgi_metadata(meta);
                    ctx2.VideoProcessorSetStreamHDRMetaData(
                        &self.processor,
                        0,
                        DXGI_HDR_METADATA_TYPE_HDR10,
                        size,
                        Some(&meta as *const _ as *const c_void),
                    );
                }
                None => ctx2.VideoProcessorSetStreamHDRMetaData(
                    &self.processor,
                    0,
                    DXGI_HDR_METADATA_TYPE_NONE,
                    0,
                    None,
                ),
            }
            match output {
                Some(meta) => {
                    let meta = dxgi_metadata(meta);
                    ctx2.VideoProcessorSetOutputHDRMetaData(
                        &self.processor,
                        DXGI_HDR_METADATA_TYPE_HDR10,
                        size,
                        Some(&meta as *const _ as *const c_void),
                    );
                }
                None => ctx2.VideoProcessorSetOutputHDRMetaData(
                    &self.processor,
                    DXGI_HDR_METADATA_TYPE_NONE,
                    0,
                    None,
                ),
            }
        }
        Ok(())
    }

    fn blit(&mut self) -> Result<(), GpuError> {
        let input_view = self
            .input_view
            .as_ref()
            .ok_or_else(|| GpuError::Backend(format!("{}: no input bound", self.label)))?;
        unsafe {
            let stream = D3D11_VIDEO_PROCESSOR_STREAM {
                Enable: true.into(),
                OutputIndex: 0,
                InputFrameOrField: 0,
                PastFrames: 0,
                FutureFrames: 0,
                ppPastSurfaces: std::ptr::null_mut(),
                pInputSurface: std::mem::transmute_copy(input_view),
                ppFutureSurfaces: std::ptr::null_mut(),
                ppPastSurfacesRight: std::ptr::null_mut(),
                pInputSurfaceRight: ManuallyDrop::new(None),
                ppFutureSurfacesRight: std::ptr::null_mut(),
            };
            self.video_context
                .VideoProcessorBlt(&self.processor, &self.output_view, 0, &[stream])
                .map_err(|e| super::map_device_error(&format!("{}: VideoProcessorBlt", self.label), e))
        }
    }
}
