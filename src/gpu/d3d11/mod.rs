// Direct3D 11 backend
// DXGI adapter enumeration, video-capable device creation and flip-model swap chains

mod context;
mod device;
mod processor;
mod shader;
mod surface;

use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use std::any::Any;
use std::ffi::c_void;
use std::sync::Arc;
use windows::{
    Win32::Foundation::*,
    Win32::Graphics::Direct3D::*,
    Win32::Graphics::Direct3D11::*,
    Win32::Graphics::Direct3D12::*,
    Win32::Graphics::Dxgi::Common::*,
    Win32::Graphics::Dxgi::*,
    Win32::Graphics::Gdi::*,
    core::{GUID, Interface},
};

use super::{
    AdapterInfo, ColorSpace, DeviceBundle, DisplayHdrInfo, FeatureLevel, GpuBackend, GpuDevice,
    GpuError, GpuResource, PresentationSurface, SurfaceDesc, Texture, TextureFormat,
};
pub use context::D3d11Context;
pub use device::D3d11Device;
use surface::D3d11Surface;

/// Swap chain render target shared between the surface and the context
pub(crate) struct RenderTarget {
    pub view: ID3D11RenderTargetView,
    pub width: u32,
    pub height: u32,
}

pub(crate) type TargetSlot = Arc<Mutex<Option<RenderTarget>>>;

/// Native objects behind the backend-neutral resource handles
pub(crate) enum D3d11Resource {
    Texture(ID3D11Texture2D),
    /// One view per plane of a decoder pool slice
    PlaneViews(Vec<ID3D11ShaderResourceView>),
    View(ID3D11ShaderResourceView),
    Buffer(ID3D11Buffer),
}

// COM objects created with the multithreaded device are safe to share
unsafe impl Send for D3d11Resource {}
unsafe impl Sync for D3d11Resource {}

impl GpuResource for D3d11Resource {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn native(resource: &Arc<dyn GpuResource>) -> Result<&D3d11Resource, GpuError> {
    resource
        .as_any()
        .downcast_ref::<D3d11Resource>()
        .ok_or_else(|| GpuError::Backend("Resource was not created by the D3D11 backend".to_string()))
}

pub(crate) fn native_texture(resource: &Arc<dyn GpuResource>) -> Result<&ID3D11Texture2D, GpuError> {
    match native(resource)? {
        D3d11Resource::Texture(texture) => Ok(texture),
        _ => Err(GpuError::Backend("Expected a texture resource".to_string())),
    }
}

pub(crate) fn texture_of(texture: &Texture) -> Result<&ID3D11Texture2D, GpuError> {
    native_texture(texture.resource())
}

pub(crate) fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::Nv12 => DXGI_FORMAT_NV12,
        TextureFormat::P010 => DXGI_FORMAT_P010,
        TextureFormat::Ayuv => DXGI_FORMAT_AYUV,
        TextureFormat::Y410 => DXGI_FORMAT_Y410,
        TextureFormat::Rgba8 => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgb10A2 => DXGI_FORMAT_R10G10B10A2_UNORM,
        TextureFormat::Bgra8 => DXGI_FORMAT_B8G8R8A8_UNORM,
        TextureFormat::R8 => DXGI_FORMAT_R8_UNORM,
        TextureFormat::R8G8 => DXGI_FORMAT_R8G8_UNORM,
        TextureFormat::R16 => DXGI_FORMAT_R16_UNORM,
        TextureFormat::R16G16 => DXGI_FORMAT_R16G16_UNORM,
        TextureFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        TextureFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
    }
}

pub(crate) fn dxgi_color_space(color_space: ColorSpace) -> DXGI_COLOR_SPACE_TYPE {
    match color_space {
        ColorSpace::YcbcrStudioG22LeftP709 => DXGI_COLOR_SPACE_YCBCR_STUDIO_G22_LEFT_P709,
        ColorSpace::YcbcrStudioG2084LeftP2020 => DXGI_COLOR_SPACE_YCBCR_STUDIO_G2084_LEFT_P2020,
        ColorSpace::RgbFullG22NoneP709 => DXGI_COLOR_SPACE_RGB_FULL_G22_NONE_P709,
        ColorSpace::RgbFullG2084NoneP2020 => DXGI_COLOR_SPACE_RGB_FULL_G2084_NONE_P2020,
        ColorSpace::RgbStudioG2084NoneP2020 => DXGI_COLOR_SPACE_RGB_STUDIO_G2084_NONE_P2020,
        ColorSpace::RgbStudioG24NoneP2020 => DXGI_COLOR_SPACE_RGB_STUDIO_G24_NONE_P2020,
        ColorSpace::RgbStudioG22NoneP2020 => DXGI_COLOR_SPACE_RGB_STUDIO_G22_NONE_P2020,
        ColorSpace::RgbFullG22NoneP2020 => DXGI_COLOR_SPACE_RGB_FULL_G22_NONE_P2020,
        ColorSpace::YcbcrFullG22LeftP709 => DXGI_COLOR_SPACE_YCBCR_FULL_G22_LEFT_P709,
    }
}

/// Output color spaces the OS reports while HDR is on
pub(crate) fn is_hdr_color_space(color_space: DXGI_COLOR_SPACE_TYPE) -> bool {
    color_space == DXGI_COLOR_SPACE_RGB_FULL_G2084_NONE_P2020
        || color_space == DXGI_COLOR_SPACE_RGB_STUDIO_G2084_NONE_P2020
        || color_space == DXGI_COLOR_SPACE_RGB_STUDIO_G24_NONE_P2020
        || color_space == DXGI_COLOR_SPACE_RGB_STUDIO_G22_NONE_P2020
        || color_space == DXGI_COLOR_SPACE_RGB_FULL_G22_NONE_P2020
}

pub(crate) fn display_info(desc: &DXGI_OUTPUT_DESC1) -> DisplayHdrInfo {
    DisplayHdrInfo {
        red_primary: desc.RedPrimary,
        green_primary: desc.GreenPrimary,
        blue_primary: desc.BluePrimary,
        white_point: desc.WhitePoint,
        max_luminance: desc.MaxLuminance,
        min_luminance: desc.MinLuminance,
        max_full_frame_luminance: desc.MaxFullFrameLuminance,
    }
}

/// Device removal surfaces as `DeviceLost` so the renderer resets
pub(crate) fn map_device_error(what: &str, e: windows::core::Error) -> GpuError {
    let code = e.code();
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET {
        GpuError::DeviceLost(format!("{}: {}", what, e))
    } else {
        GpuError::Backend(format!("{}: {}", what, e))
    }
}

pub(crate) fn hwnd(window: RawWindowHandle) -> Result<HWND, GpuError> {
    match window {
        RawWindowHandle::Win32(handle) => Ok(HWND(handle.hwnd.get() as *mut c_void)),
        other => Err(GpuError::Unsupported(format!(
            "D3D11 needs a Win32 window, got {:?}",
            other
        ))),
    }
}

fn feature_level(level: D3D_FEATURE_LEVEL) -> FeatureLevel {
    if level.0 >= D3D_FEATURE_LEVEL_11_1.0 {
        FeatureLevel::Level11_1
    } else if level.0 >= D3D_FEATURE_LEVEL_11_0.0 {
        FeatureLevel::Level11_0
    } else if level.0 >= D3D_FEATURE_LEVEL_10_1.0 {
        FeatureLevel::Level10_1
    } else {
        FeatureLevel::Level10_0
    }
}

/// Mesh shader tier through a throwaway D3D12 device, 0 when unavailable
fn mesh_shader_tier(adapter: &IDXGIAdapter1) -> u32 {
    unsafe {
        let mut device: Option<ID3D12Device> = None;
        if D3D12CreateDevice(adapter, D3D_FEATURE_LEVEL_11_0, &mut device).is_err() {
            return 0;
        }
        let Some(device) = device else {
            return 0;
        };
        let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS7::default();
        if device
            .CheckFeatureSupport(
                D3D12_FEATURE_D3D12_OPTIONS7,
                &mut options as *mut _ as *mut c_void,
                std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS7>() as u32,
            )
            .is_err()
        {
            return 0;
        }
        options.MeshShaderTier.0 as u32
    }
}

fn adapter_info(index: u32, adapter: &IDXGIAdapter1) -> Result<AdapterInfo, GpuError> {
    let desc = unsafe { adapter.GetDesc1() }
        .map_err(|e| GpuError::Backend(format!("GetDesc1 failed: {}", e)))?;
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    let software = desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0;
    Ok(AdapterInfo {
        index,
        description: String::from_utf16_lossy(&desc.Description[..len]),
        vendor_id: desc.VendorId,
        device_id: desc.DeviceId,
        dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        shared_system_memory: desc.SharedSystemMemory as u64,
        software,
        mesh_shader_tier: if software { 0 } else { mesh_shader_tier(adapter) },
    })
}

pub struct D3d11Backend {
    factory: IDXGIFactory2,
}

unsafe impl Send for D3d11Backend {}
unsafe impl Sync for D3d11Backend {}

impl D3d11Backend {
    pub fn new() -> Result<Self, GpuError> {
        let factory: IDXGIFactory2 = unsafe { CreateDXGIFactory1() }
            .map_err(|e| GpuError::CreationFailed(format!("CreateDXGIFactory1 failed: {}", e)))?;
        Ok(Self { factory })
    }

    fn adapter(&self, index: u32) -> Result<IDXGIAdapter1, GpuError> {
        unsafe { self.factory.EnumAdapters1(index) }
            .map_err(|e| GpuError::Backend(format!("EnumAdapters1({}) failed: {}", index, e)))
    }

    /// Output whose desktop contains the window's monitor
    fn output_for_window(&self, window: HWND) -> Option<IDXGIOutput6> {
        let monitor = unsafe { MonitorFromWindow(window, MONITOR_DEFAULTTONEAREST) };
        let mut adapter_index = 0;
        while let Ok(adapter) = unsafe { self.factory.EnumAdapters1(adapter_index) } {
            let mut output_index = 0;
            while let Ok(output) = unsafe { adapter.EnumOutputs(output_index) } {
                if let Ok(desc) = unsafe { output.GetDesc() } {
                    if desc.Monitor == monitor {
                        return output.cast::<IDXGIOutput6>().ok();
                    }
                }
                output_index += 1;
            }
            adapter_index += 1;
        }
        None
    }
}

impl GpuBackend for D3d11Backend {
    fn info(&self) -> &str {
        "Direct3D 11"
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, GpuError> {
        let mut adapters = Vec::new();
        let mut index = 0;
        loop {
            match unsafe { self.factory.EnumAdapters1(index) } {
                Ok(adapter) => adapters.push(adapter_info(index, &adapter)?),
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(GpuError::Backend(format!(
                        "EnumAdapters1({}) failed: {}",
                        index, e
                    )));
                }
            }
            index += 1;
        }
        Ok(adapters)
    }

    fn create_device(&self, adapter_index: u32) -> Result<DeviceBundle, GpuError> {
        let adapter = self.adapter(adapter_index)?;
        let info = adapter_info(adapter_index, &adapter)?;

        let levels = [
            D3D_FEATURE_LEVEL_11_1,
            D3D_FEATURE_LEVEL_11_0,
            D3D_FEATURE_LEVEL_10_1,
            D3D_FEATURE_LEVEL_10_0,
        ];
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;
        let mut level = D3D_FEATURE_LEVEL_10_0;
        unsafe {
            D3D11CreateDevice(
                Some(&adapter),
                D3D_DRIVER_TYPE_UNKNOWN,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_VIDEO_SUPPORT,
                Some(&levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut level),
                Some(&mut context),
            )
        }
        .map_err(|e| {
            GpuError::CreationFailed(format!(
                "D3D11CreateDevice on {} failed: {}",
                info.description, e
            ))
        })?;

        let device = device
            .ok_or_else(|| GpuError::CreationFailed("D3D11CreateDevice returned no device".to_string()))?;
        let context = context
            .ok_or_else(|| GpuError::CreationFailed("D3D11CreateDevice returned no context".to_string()))?;

        // The decoder submits from its own thread
        if let Ok(multithread) = device.cast::<ID3D11Multithread>() {
            unsafe {
                let _ = multithread.SetMultithreadProtected(true);
            }
        }

        let level = feature_level(level);
        log::info!(
            "Created D3D11 device on {} at {:?}",
            info.description,
            level
        );

        let back_buffer = Arc::new(Mutex::new(None));
        let d3d_device = Arc::new(D3d11Device::new(
            device.clone(),
            context.clone(),
            info,
            level,
            back_buffer.clone(),
        )?);
        let context = D3d11Context::new(device, context, back_buffer)?;
        Ok(DeviceBundle {
            device: d3d_device,
            context: Box::new(context),
        })
    }

    fn create_presentation_surface(
        &self,
        device: &Arc<dyn GpuDevice>,
        window: RawWindowHandle,
        desc: &SurfaceDesc,
    ) -> Result<Arc<dyn PresentationSurface>, GpuError> {
        let device = device
            .as_any()
            .downcast_ref::<D3d11Device>()
            .ok_or_else(|| GpuError::Backend("Device was not created by the D3D11 backend".to_string()))?;
        let window = hwnd(window)?;
        let surface = D3d11Surface::new(&self.factory, device, window, desc)?;
        Ok(Arc::new(surface))
    }

    fn tearing_supported(&self) -> bool {
        let Ok(factory) = self.factory.cast::<IDXGIFactory5>() else {
            return false;
        };
        let mut allow = BOOL(0);
        let result = unsafe {
            factory.CheckFeatureSupport(
                DXGI_FEATURE_PRESENT_ALLOW_TEARING,
                &mut allow as *mut _ as *mut c_void,
                std::mem::size_of::<BOOL>() as u32,
            )
        };
        result.is_ok() && allow.as_bool()
    }

    fn display_hdr_enabled(&self, window: RawWindowHandle) -> bool {
        let Ok(window) = hwnd(window) else {
            return false;
        };
        match self
            .output_for_window(window)
            .and_then(|output| unsafe { output.GetDesc1() }.ok())
        {
            Some(desc) => is_hdr_color_space(desc.ColorSpace),
            None => {
                log::warn!("No DXGI output found for the window's monitor");
                false
            }
        }
    }
}

pub(crate) fn guid(value: u128) -> GUID {
    GUID::from_u128(value)
}
