// D3D11 presentation surface
// Flip-model swap chain with optional tearing and HDR color spaces

use std::sync::Arc;
use windows::{
    Win32::Foundation::HWND, Win32::Graphics::Direct3D11::*, Win32::Graphics::Dxgi::Common::*,
    Win32::Graphics::Dxgi::*, core::Interface,
};

use super::device::D3d11Device;
use super::{
    D3d11Resource, RenderTarget, TargetSlot, display_info, dxgi_color_space, dxgi_format,
    is_hdr_color_space, map_device_error,
};
use crate::gpu::{
    ColorSpace, DisplayHdrInfo, GpuError, PresentFlags, PresentationSurface, SurfaceDesc, Texture,
    TextureDesc, TextureRole,
};

pub(crate) struct D3d11Surface {
    swap_chain: IDXGISwapChain1,
    back_buffer: Texture,
    slot: TargetSlot,
}

unsafe impl Send for D3d11Surface {}
unsafe impl Sync for D3d11Surface {}

impl D3d11Surface {
    pub(crate) fn new(
        factory: &IDXGIFactory2,
        device: &D3d11Device,
        window: HWND,
        desc: &SurfaceDesc,
    ) -> Result<Self, GpuError> {
        let flags = if desc.allow_tearing {
            DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
        } else {
            0
        };
        let chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.size.width,
            Height: desc.size.height,
            Format: dxgi_format(desc.format),
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: flags,
        };

        let swap_chain = unsafe {
            factory.CreateSwapChainForHwnd(device.raw(), window, &chain_desc, None, None)
        }
        .map_err(|e| GpuError::CreationFailed(format!("CreateSwapChainForHwnd failed: {}", e)))?;

        // Fullscreen transitions are handled by the window layer
        unsafe {
            let _ = factory.MakeWindowAssociation(window, DXGI_MWA_NO_ALT_ENTER);
        }

        let buffer: ID3D11Texture2D = unsafe { swap_chain.GetBuffer(0) }
            .map_err(|e| GpuError::CreationFailed(format!("GetBuffer failed: {}", e)))?;
        let mut view: Option<ID3D11RenderTargetView> = None;
        unsafe {
            device
                .raw()
                .CreateRenderTargetView(&buffer, None, Some(&mut view))
        }
        .map_err(|e| GpuError::CreationFailed(format!("CreateRenderTargetView failed: {}", e)))?;
        let view = view.ok_or_else(|| {
            GpuError::CreationFailed("CreateRenderTargetView returned null".to_string())
        })?;

        device.set_back_buffer(Some(RenderTarget {
            view,
            width: desc.size.width,
            height: desc.size.height,
        }));
        log::info!(
            "Created {}-buffer swap chain {} {:?} (tearing: {})",
            desc.buffer_count,
            desc.size,
            desc.format,
            desc.allow_tearing
        );

        let back_buffer = Texture::new(
            TextureDesc::new(desc.size, desc.format, TextureRole::BackBuffer).render_target(),
            Arc::new(D3d11Resource::Texture(buffer)),
        );
        Ok(Self {
            swap_chain,
            back_buffer,
            slot: device.back_buffer_slot(),
        })
    }

    fn output_desc(&self) -> Option<DXGI_OUTPUT_DESC1> {
        let output = unsafe { self.swap_chain.GetContainingOutput() }.ok()?;
        let output: IDXGIOutput6 = output.cast().ok()?;
        unsafe { output.GetDesc1() }.ok()
    }
}

impl Drop for D3d11Surface {
    fn drop(&mut self) {
        // The swap chain cannot be released while its buffer is still referenced
        self.slot.lock().take();
    }
}

impl PresentationSurface for D3d11Surface {
    fn back_buffer(&self) -> &Texture {
        &self.back_buffer
    }

    fn set_color_space(&self, color_space: ColorSpace) -> Result<(), GpuError> {
        let chain: IDXGISwapChain3 = self
            .swap_chain
            .cast()
            .map_err(|e| GpuError::Unsupported(format!("IDXGISwapChain3 unavailable: {}", e)))?;
        unsafe { chain.SetColorSpace1(dxgi_color_space(color_space)) }
            .map_err(|e| GpuError::Backend(format!("SetColorSpace1 {:?} failed: {}", color_space, e)))
    }

    fn present(&self, flags: PresentFlags) -> Result<(), GpuError> {
        let (interval, present_flags) = if flags.allow_tearing {
            (0, DXGI_PRESENT_ALLOW_TEARING)
        } else {
            (1, DXGI_PRESENT(0))
        };
        unsafe { self.swap_chain.Present(interval, present_flags) }
            .ok()
            .map_err(|e| map_device_error("Present", e))
    }

    fn display_hdr_enabled(&self) -> bool {
        self.output_desc()
            .is_some_and(|desc| is_hdr_color_space(desc.ColorSpace))
    }

    fn display_hdr_metadata(&self) -> Option<DisplayHdrInfo> {
        self.output_desc()
            .filter(|desc| is_hdr_color_space(desc.ColorSpace))
            .map(|desc| display_info(&desc))
    }
}
