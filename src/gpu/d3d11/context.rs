// D3D11 immediate context
// Frame copies, conversion draws, overlays and decoder synchronization

use std::collections::HashMap;
use std::sync::Arc;
use windows::{
    Win32::Graphics::Direct3D::*, Win32::Graphics::Direct3D11::*,
    Win32::Graphics::Dxgi::Common::*, core::Interface, core::s,
};

use super::device::{Vertex, create_buffer, create_view, quad};
use super::{D3d11Resource, TargetSlot, map_device_error, native, native_texture, texture_of};
use crate::decoder::DecodedFrame;
use crate::gpu::{
    ConversionGeometry, ConversionShader, DeviceContext, GpuError, GpuResource,
    OVERLAY_PIXEL_SHADER, OverlayResources, Rect, ShaderSource, Texture, VERTEX_SHADER,
    VideoSource,
};

struct ConversionPipeline {
    vertex: ID3D11VertexShader,
    layout: ID3D11InputLayout,
    overlay: ID3D11PixelShader,
    pixel: HashMap<ConversionShader, ID3D11PixelShader>,
    sampler: ID3D11SamplerState,
    blend: ID3D11BlendState,
}

struct DecoderFence {
    fence: ID3D11Fence,
    context: ID3D11DeviceContext4,
    value: u64,
}

pub struct D3d11Context {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    back_buffer: TargetSlot,
    pipeline: Option<ConversionPipeline>,
    current: Option<ConversionShader>,
    constants: Option<ID3D11Buffer>,
    vertices: Option<ID3D11Buffer>,
    viewport: Option<D3D11_VIEWPORT>,
    /// Plane views of the last sampled video texture, keyed by resource address
    video_views: Option<(usize, Vec<Option<ID3D11ShaderResourceView>>)>,
    fence: Option<DecoderFence>,
}

unsafe impl Send for D3d11Context {}

fn copy_box(src: Rect) -> D3D11_BOX {
    D3D11_BOX {
        left: src.left.max(0) as u32,
        top: src.top.max(0) as u32,
        front: 0,
        right: src.right.max(0) as u32,
        bottom: src.bottom.max(0) as u32,
        back: 1,
    }
}

fn resource_key(resource: &Arc<dyn GpuResource>) -> usize {
    Arc::as_ptr(resource) as *const () as usize
}

impl D3d11Context {
    pub(crate) fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        back_buffer: TargetSlot,
    ) -> Result<Self, GpuError> {
        Ok(Self {
            device,
            context,
            back_buffer,
            pipeline: None,
            current: None,
            constants: None,
            vertices: None,
            viewport: None,
            video_views: None,
            fence: None,
        })
    }

    fn pipeline(&self) -> Result<&ConversionPipeline, GpuError> {
        self.pipeline
            .as_ref()
            .ok_or_else(|| GpuError::Backend("Conversion shaders not loaded".to_string()))
    }

    fn create_decoder_fence(&self) -> Option<DecoderFence> {
        let device: ID3D11Device5 = self.device.cast().ok()?;
        let context: ID3D11DeviceContext4 = self.context.cast().ok()?;
        let fence: ID3D11Fence = unsafe { device.CreateFence(0, D3D11_FENCE_FLAG_NONE) }.ok()?;
        Some(DecoderFence {
            fence,
            context,
            value: 0,
        })
    }

    fn plane_views(&mut self, texture: &Texture) -> Result<Vec<Option<ID3D11ShaderResourceView>>, GpuError> {
        let key = resource_key(texture.resource());
        if let Some((cached, views)) = &self.video_views {
            if *cached == key {
                return Ok(views.clone());
            }
        }
        let native = texture_of(texture)?;
        let views = texture
            .format()
            .plane_view_formats()
            .into_iter()
            .map(|format| create_view(&self.device, native, format, None).map(Some))
            .collect::<Result<Vec<_>, _>>()?;
        self.video_views = Some((key, views.clone()));
        Ok(views)
    }
}

impl DeviceContext for D3d11Context {
    fn copy_frame(
        &mut self,
        frame: &DecodedFrame,
        dst: &Texture,
        dst_offset: (u32, u32),
        src_box: Rect,
    ) -> Result<(), GpuError> {
        let src = native_texture(&frame.surface)?;
        let region = copy_box(src_box);
        unsafe {
            self.context.CopySubresourceRegion(
                texture_of(dst)?,
                0,
                dst_offset.0,
                dst_offset.1,
                0,
                src,
                frame.pool_index,
                Some(&region as *const _),
            );
        }
        Ok(())
    }

    fn copy_texture(
        &mut self,
        src: &Texture,
        dst: &Texture,
        dst_offset: (u32, u32),
        src_box: Rect,
    ) -> Result<(), GpuError> {
        let region = copy_box(src_box);
        unsafe {
            self.context.CopySubresourceRegion(
                texture_of(dst)?,
                0,
                dst_offset.0,
                dst_offset.1,
                0,
                texture_of(src)?,
                0,
                Some(&region as *const _),
            );
        }
        Ok(())
    }

    fn clear_and_bind_back_buffer(&mut self, color: [f32; 4]) -> Result<(), GpuError> {
        let slot = self.back_buffer.lock();
        let target = slot
            .as_ref()
            .ok_or_else(|| GpuError::Backend("No swap chain render target".to_string()))?;
        unsafe {
            self.context.ClearRenderTargetView(&target.view, &color);
            self.context
                .OMSetRenderTargets(Some(&[Some(target.view.clone())]), None);
        }
        Ok(())
    }

    fn load_conversion_shaders(&mut self, source: &dyn ShaderSource) -> Result<(), GpuError> {
        let vertex_code = source.load(VERTEX_SHADER)?;
        let create_pixel = |name: &str| -> Result<ID3D11PixelShader, GpuError> {
            let code = source.load(name)?;
            let mut shader: Option<ID3D11PixelShader> = None;
            unsafe { self.device.CreatePixelShader(&code, None, Some(&mut shader)) }
                .map_err(|e| GpuError::ShaderLoad(format!("{}: {}", name, e)))?;
            shader.ok_or_else(|| GpuError::ShaderLoad(format!("{}: no shader object", name)))
        };

        let mut vertex: Option<ID3D11VertexShader> = None;
        unsafe { self.device.CreateVertexShader(&vertex_code, None, Some(&mut vertex)) }
            .map_err(|e| GpuError::ShaderLoad(format!("{}: {}", VERTEX_SHADER, e)))?;

        let elements = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 8,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut layout: Option<ID3D11InputLayout> = None;
        unsafe {
            self.device
                .CreateInputLayout(&elements, &vertex_code, Some(&mut layout))
        }
        .map_err(|e| GpuError::ShaderLoad(format!("CreateInputLayout failed: {}", e)))?;

        let mut pixel = HashMap::new();
        for shader in ConversionShader::ALL {
            pixel.insert(shader, create_pixel(shader.file_name())?);
        }
        let overlay = create_pixel(OVERLAY_PIXEL_SHADER)?;

        let sampler_desc = D3D11_SAMPLER_DESC {
            Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
            AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
            AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
            MipLODBias: 0.0,
            MaxAnisotropy: 1,
            ComparisonFunc: D3D11_COMPARISON_NEVER,
            BorderColor: [0.0; 4],
            MinLOD: 0.0,
            MaxLOD: f32::MAX,
        };
        let mut sampler: Option<ID3D11SamplerState> = None;
        unsafe { self.device.CreateSamplerState(&sampler_desc, Some(&mut sampler)) }
            .map_err(|e| GpuError::CreationFailed(format!("CreateSamplerState failed: {}", e)))?;

        let mut blend_desc = D3D11_BLEND_DESC::default();
        blend_desc.RenderTarget[0] = D3D11_RENDER_TARGET_BLEND_DESC {
            BlendEnable: true.into(),
            SrcBlend: D3D11_BLEND_SRC_ALPHA,
            DestBlend: D3D11_BLEND_INV_SRC_ALPHA,
            BlendOp: D3D11_BLEND_OP_ADD,
            SrcBlendAlpha: D3D11_BLEND_ONE,
            DestBlendAlpha: D3D11_BLEND_INV_SRC_ALPHA,
            BlendOpAlpha: D3D11_BLEND_OP_ADD,
            RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };
        let mut blend: Option<ID3D11BlendState> = None;
        unsafe { self.device.CreateBlendState(&blend_desc, Some(&mut blend)) }
            .map_err(|e| GpuError::CreationFailed(format!("CreateBlendState failed: {}", e)))?;

        match (vertex, layout, sampler, blend) {
            (Some(vertex), Some(layout), Some(sampler), Some(blend)) => {
                self.pipeline = Some(ConversionPipeline {
                    vertex,
                    layout,
                    overlay,
                    pixel,
                    sampler,
                    blend,
                });
                Ok(())
            }
            _ => Err(GpuError::ShaderLoad(
                "Conversion pipeline objects missing".to_string(),
            )),
        }
    }

    fn bind_conversion_shader(&mut self, shader: ConversionShader) -> Result<(), GpuError> {
        if !self.pipeline()?.pixel.contains_key(&shader) {
            return Err(GpuError::ShaderLoad(format!("{:?} not loaded", shader)));
        }
        self.current = Some(shader);
        Ok(())
    }

    fn upload_conversion_constants(&mut self, constants: &[u8]) -> Result<(), GpuError> {
        self.constants = Some(create_buffer(
            &self.device,
            D3D11_BIND_CONSTANT_BUFFER,
            constants,
        )?);
        Ok(())
    }

    fn set_conversion_geometry(&mut self, geometry: &ConversionGeometry) -> Result<(), GpuError> {
        // Sample only the decoded area of an aligned texture
        let max_u = geometry.source.width as f32 / geometry.texture.width.max(1) as f32;
        let max_v = geometry.source.height as f32 / geometry.texture.height.max(1) as f32;
        let vertices: [Vertex; 4] = quad([-1.0, 1.0, 1.0, -1.0], max_u, max_v);
        let bytes = unsafe {
            std::slice::from_raw_parts(
                vertices.as_ptr() as *const u8,
                std::mem::size_of_val(&vertices),
            )
        };
        self.vertices = Some(create_buffer(&self.device, D3D11_BIND_VERTEX_BUFFER, bytes)?);
        self.viewport = Some(D3D11_VIEWPORT {
            TopLeftX: geometry.viewport.left as f32,
            TopLeftY: geometry.viewport.top as f32,
            Width: geometry.viewport.width() as f32,
            Height: geometry.viewport.height() as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        });
        Ok(())
    }

    fn draw_video(&mut self, source: VideoSource<'_>) -> Result<(), GpuError> {
        let views = match source {
            VideoSource::Texture(texture) => self.plane_views(texture)?,
            VideoSource::PoolSlice(pool, index) => match native(pool.get(index)?)? {
                D3d11Resource::PlaneViews(views) => views.iter().cloned().map(Some).collect(),
                _ => return Err(GpuError::Backend("Expected pool plane views".to_string())),
            },
        };
        let pipeline = self.pipeline()?;
        let shader = self
            .current
            .and_then(|s| pipeline.pixel.get(&s))
            .ok_or_else(|| GpuError::Backend("No conversion shader bound".to_string()))?;
        let viewport = self
            .viewport
            .ok_or_else(|| GpuError::Backend("Conversion geometry not set".to_string()))?;

        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        unsafe {
            let ctx = &self.context;
            ctx.RSSetViewports(Some(&[viewport]));
            ctx.IASetInputLayout(&pipeline.layout);
            ctx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP);
            ctx.IASetVertexBuffers(
                0,
                1,
                Some(&self.vertices as *const _),
                Some(&stride as *const _),
                Some(&offset as *const _),
            );
            ctx.VSSetShader(&pipeline.vertex, None);
            ctx.PSSetShader(shader, None);
            ctx.PSSetConstantBuffers(0, Some(&[self.constants.clone()]));
            ctx.PSSetSamplers(0, Some(&[Some(pipeline.sampler.clone())]));
            ctx.OMSetBlendState(None::<&ID3D11BlendState>, None, 0xffff_ffff);
            ctx.PSSetShaderResources(0, Some(&views));
            ctx.Draw(4, 0);

            let nulls: Vec<Option<ID3D11ShaderResourceView>> = vec![None; views.len()];
            ctx.PSSetShaderResources(0, Some(&nulls));
            self.device
                .GetDeviceRemovedReason()
                .map_err(|e| map_device_error("Video draw", e))
        }
    }

    fn draw_overlay(&mut self, overlay: &OverlayResources) -> Result<(), GpuError> {
        let pipeline = self.pipeline()?;
        let (width, height) = {
            let slot = self.back_buffer.lock();
            let target = slot
                .as_ref()
                .ok_or_else(|| GpuError::Backend("No swap chain render target".to_string()))?;
            (target.width, target.height)
        };
        let buffer = match native(&overlay.vertex_buffer)? {
            D3d11Resource::Buffer(buffer) => Some(buffer.clone()),
            _ => return Err(GpuError::Backend("Expected an overlay vertex buffer".to_string())),
        };
        let view = match native(&overlay.view)? {
            D3d11Resource::View(view) => Some(view.clone()),
            _ => return Err(GpuError::Backend("Expected an overlay view".to_string())),
        };

        let viewport = D3D11_VIEWPORT {
            TopLeftX: 0.0,
            TopLeftY: 0.0,
            Width: width as f32,
            Height: height as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        unsafe {
            let ctx = &self.context;
            ctx.RSSetViewports(Some(&[viewport]));
            ctx.IASetInputLayout(&pipeline.layout);
            ctx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP);
            ctx.IASetVertexBuffers(
                0,
                1,
                Some(&buffer as *const _),
                Some(&stride as *const _),
                Some(&offset as *const _),
            );
            ctx.VSSetShader(&pipeline.vertex, None);
            ctx.PSSetShader(&pipeline.overlay, None);
            ctx.PSSetSamplers(0, Some(&[Some(pipeline.sampler.clone())]));
            ctx.OMSetBlendState(&pipeline.blend, None, 0xffff_ffff);
            ctx.PSSetShaderResources(0, Some(&[view]));
            ctx.Draw(4, 0);
            ctx.PSSetShaderResources(0, Some(&[None]));
            ctx.OMSetBlendState(None::<&ID3D11BlendState>, None, 0xffff_ffff);
        }
        Ok(())
    }

    fn wait_for_decoder(&mut self) -> Result<(), GpuError> {
        if self.fence.is_none() {
            self.fence = self.create_decoder_fence();
        }
        match self.fence.as_mut() {
            Some(fence) => {
                fence.value += 1;
                unsafe {
                    fence
                        .context
                        .Signal(&fence.fence, fence.value)
                        .and_then(|_| fence.context.Wait(&fence.fence, fence.value))
                }
                .map_err(|e| map_device_error("Decoder fence", e))
            }
            None => {
                // Without fences the driver orders work submitted to one context
                unsafe { self.context.Flush() };
                Ok(())
            }
        }
    }
}
