// D3D11 shader passes
// Compute and pixel passes built from HLSL source or precompiled bytecode

use std::ffi::{CString, c_void};
use windows::{
    Win32::Graphics::Direct3D::Fxc::*, Win32::Graphics::Direct3D::*,
    Win32::Graphics::Direct3D11::*, core::PCSTR,
};

use super::device::{D3d11Device, create_buffer, create_view};
use super::{map_device_error, texture_of};
use crate::gpu::{
    GpuError, ShaderPass, ShaderPassDesc, ShaderSource, ShaderStage, Texture, TextureDesc,
    TextureRole,
};

/// Fullscreen triangle for pixel passes
const FULLSCREEN_VS: &str = r#"
void main(uint id : SV_VertexID, out float4 pos : SV_POSITION, out float2 uv : TEXCOORD0) {
    uv = float2((id << 1) & 2, id & 2);
    pos = float4(uv * float2(2, -2) + float2(-1, 1), 0, 1);
}
"#;

fn blob_bytes(blob: &ID3DBlob) -> Vec<u8> {
    unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
            .to_vec()
    }
}

pub(crate) fn compile(
    label: &str,
    source: &[u8],
    entry_point: &str,
    profile: &str,
    defines: &[(String, String)],
) -> Result<Vec<u8>, GpuError> {
    let to_c = |s: &str| {
        CString::new(s).map_err(|_| GpuError::ShaderLoad(format!("{}: nul byte in {:?}", label, s)))
    };
    let owned = defines
        .iter()
        .map(|(name, value)| Ok((to_c(name)?, to_c(value)?)))
        .collect::<Result<Vec<_>, GpuError>>()?;
    let mut macros: Vec<D3D_SHADER_MACRO> = owned
        .iter()
        .map(|(name, value)| D3D_SHADER_MACRO {
            Name: PCSTR(name.as_ptr() as *const u8),
            Definition: PCSTR(value.as_ptr() as *const u8),
        })
        .collect();
    macros.push(D3D_SHADER_MACRO::default());

    let name = to_c(label)?;
    let entry = to_c(entry_point)?;
    let target = to_c(profile)?;
    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
            PCSTR(name.as_ptr() as *const u8),
            Some(macros.as_ptr()),
            None,
            PCSTR(entry.as_ptr() as *const u8),
            PCSTR(target.as_ptr() as *const u8),
            D3DCOMPILE_OPTIMIZATION_LEVEL3,
            0,
            &mut code,
            Some(&mut errors),
        )
    };
    if let Err(e) = result {
        let log = errors
            .map(|blob| String::from_utf8_lossy(&blob_bytes(&blob)).into_owned())
            .unwrap_or_default();
        return Err(GpuError::ShaderLoad(format!("{}: {} {}", label, e, log)));
    }
    code.map(|blob| blob_bytes(&blob))
        .ok_or_else(|| GpuError::ShaderLoad(format!("{}: D3DCompile returned no code", label)))
}

fn linear_sampler(device: &ID3D11Device) -> Result<ID3D11SamplerState, GpuError> {
    let desc = D3D11_SAMPLER_DESC {
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
    unsafe { device.CreateSamplerState(&desc, Some(&mut sampler)) }
        .map_err(|e| GpuError::CreationFailed(format!("CreateSamplerState failed: {}", e)))?;
    sampler.ok_or_else(|| GpuError::CreationFailed("CreateSamplerState returned null".to_string()))
}

enum Program {
    Compute {
        shader: ID3D11ComputeShader,
        intermediate: ID3D11Texture2D,
        uav: ID3D11UnorderedAccessView,
        groups: (u32, u32),
    },
    Pixel {
        vertex: ID3D11VertexShader,
        pixel: ID3D11PixelShader,
        target: ID3D11RenderTargetView,
    },
}

pub(crate) struct D3d11ShaderPass {
    label: String,
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    program: Program,
    views: Vec<Option<ID3D11ShaderResourceView>>,
    constants: Option<ID3D11Buffer>,
    sampler: ID3D11SamplerState,
    output: ID3D11Texture2D,
    desc: ShaderPassDesc,
    _intermediate_texture: Option<Texture>,
}

unsafe impl Send for D3d11ShaderPass {}

impl D3d11ShaderPass {
    pub(crate) fn new(
        device: &D3d11Device,
        context: &ID3D11DeviceContext,
        desc: &ShaderPassDesc,
        source: &dyn ShaderSource,
        input: &Texture,
        output: &Texture,
        lookups: &[Texture],
    ) -> Result<Self, GpuError> {
        if !input.format().is_rgb() || !output.format().is_rgb() {
            return Err(GpuError::Unsupported(format!(
                "{} needs RGB textures, got {:?} -> {:?}",
                desc.label,
                input.format(),
                output.format()
            )));
        }
        let raw = device.raw();
        let code = source.load(desc.source_name)?;
        let bytecode = if desc.precompiled {
            code
        } else {
            compile(desc.label, &code, desc.entry_point, desc.profile, &desc.defines)?
        };

        let mut views = vec![Some(create_view(raw, texture_of(input)?, input.format(), None)?)];
        for lookup in lookups {
            views.push(Some(create_view(raw, texture_of(lookup)?, lookup.format(), None)?));
        }

        let constants = if desc.constants.is_empty() {
            None
        } else {
            Some(create_buffer(raw, D3D11_BIND_CONSTANT_BUFFER, &desc.constants)?)
        };

        let mut intermediate_texture = None;
        let program = match desc.stage {
            ShaderStage::Compute { .. } => {
                let mut shader: Option<ID3D11ComputeShader> = None;
                unsafe { raw.CreateComputeShader(&bytecode, None, Some(&mut shader)) }.map_err(
                    |e| GpuError::CreationFailed(format!("{}: CreateComputeShader: {}", desc.label, e)),
                )?;
                let texture = crate::gpu::GpuDevice::create_texture(
                    device,
                    &TextureDesc::new(
                        desc.output_size,
                        output.format(),
                        TextureRole::ShaderIntermediate,
                    )
                    .unordered_access(),
                )?;
                let intermediate = texture_of(&texture)?.clone();
                let mut uav: Option<ID3D11UnorderedAccessView> = None;
                unsafe { raw.CreateUnorderedAccessView(&intermediate, None, Some(&mut uav)) }
                    .map_err(|e| {
                        GpuError::CreationFailed(format!(
                            "{}: CreateUnorderedAccessView: {}",
                            desc.label, e
                        ))
                    })?;
                intermediate_texture = Some(texture);
                Program::Compute {
                    shader: shader.ok_or_else(|| {
                        GpuError::CreationFailed("CreateComputeShader returned null".to_string())
                    })?,
                    intermediate,
                    uav: uav.ok_or_else(|| {
                        GpuError::CreationFailed("CreateUnorderedAccessView returned null".to_string())
                    })?,
                    groups: desc.dispatch_groups(),
                }
            }
            ShaderStage::Pixel => {
                let vs_code = compile(
                    "fullscreen",
                    FULLSCREEN_VS.as_bytes(),
                    "main",
                    "vs_5_0",
                    &[],
                )?;
                let output_texture = texture_of(output)?;
                let mut vertex: Option<ID3D11VertexShader> = None;
                let mut pixel: Option<ID3D11PixelShader> = None;
                let mut target: Option<ID3D11RenderTargetView> = None;
                unsafe {
                    raw.CreateVertexShader(&vs_code, None, Some(&mut vertex))
                        .and_then(|_| raw.CreatePixelShader(&bytecode, None, Some(&mut pixel)))
                        .and_then(|_| {
                            raw.CreateRenderTargetView(output_texture, None, Some(&mut target))
                        })
                }
                .map_err(|e| GpuError::CreationFailed(format!("{}: {}", desc.label, e)))?;
                match (vertex, pixel, target) {
                    (Some(vertex), Some(pixel), Some(target)) => Program::Pixel {
                        vertex,
                        pixel,
                        target,
                    },
                    _ => {
                        return Err(GpuError::CreationFailed(format!(
                            "{}: pixel pass objects missing",
                            desc.label
                        )));
                    }
                }
            }
        };

        Ok(Self {
            label: desc.label.to_string(),
            device: raw.clone(),
            context: context.clone(),
            program,
            views,
            constants,
            sampler: linear_sampler(raw)?,
            output: texture_of(output)?.clone(),
            desc: desc.clone(),
            _intermediate_texture: intermediate_texture,
        })
    }
}

impl ShaderPass for D3d11ShaderPass {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self) -> Result<(), GpuError> {
        let ctx = &self.context;
        let (x, y) = self.desc.target_offset;
        unsafe {
            match &self.program {
                Program::Compute {
                    shader,
                    intermediate,
                    uav,
                    groups,
                } => {
                    ctx.CSSetShader(shader, None);
                    ctx.CSSetShaderResources(0, Some(&self.views));
                    let bound = Some(uav.clone());
                    ctx.CSSetUnorderedAccessViews(0, 1, Some(&bound as *const _), None);
                    ctx.CSSetConstantBuffers(0, Some(&[self.constants.clone()]));
                    ctx.CSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
                    ctx.Dispatch(groups.0, groups.1, 1);

                    let nulls: Vec<Option<ID3D11ShaderResourceView>> = vec![None; self.views.len()];
                    ctx.CSSetShaderResources(0, Some(&nulls));
                    let unbound: Option<ID3D11UnorderedAccessView> = None;
                    ctx.CSSetUnorderedAccessViews(0, 1, Some(&unbound as *const _), None);

                    let size = self.desc.output_size;
                    let region = D3D11_BOX {
                        left: 0,
                        top: 0,
                        front: 0,
                        right: size.width,
                        bottom: size.height,
                        back: 1,
                    };
                    ctx.CopySubresourceRegion(
                        &self.output,
                        0,
                        x,
                        y,
                        0,
                        intermediate,
                        0,
                        Some(&region as *const _),
                    );
                }
                Program::Pixel {
                    vertex,
                    pixel,
                    target,
                } => {
                    let viewport = D3D11_VIEWPORT {
                        TopLeftX: x as f32,
                        TopLeftY: y as f32,
                        Width: self.desc.output_size.width as f32,
                        Height: self.desc.output_size.height as f32,
                        MinDepth: 0.0,
                        MaxDepth: 1.0,
                    };
                    ctx.OMSetRenderTargets(Some(&[Some(target.clone())]), None);
                    ctx.RSSetViewports(Some(&[viewport]));
                    ctx.IASetInputLayout(None::<&ID3D11InputLayout>);
                    ctx.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
                    ctx.VSSetShader(vertex, None);
                    ctx.PSSetShader(pixel, None);
                    ctx.PSSetShaderResources(0, Some(&self.views));
                    ctx.PSSetConstantBuffers(0, Some(&[self.constants.clone()]));
                    ctx.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
                    ctx.Draw(3, 0);

                    let nulls: Vec<Option<ID3D11ShaderResourceView>> = vec![None; self.views.len()];
                    ctx.PSSetShaderResources(0, Some(&nulls));
                }
            }
        }
        // Removal shows up on the next call that can fail
        unsafe { self.device.GetDeviceRemovedReason() }
            .map_err(|e| map_device_error(&self.label, e))
    }
}
