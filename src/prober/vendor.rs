// Vendor feature enablers
// Driver extension calls toggling super resolution and SDR->HDR on a video processor

use crate::enhancement::GpuVendor;
use crate::gpu::{
    Dimensions, ExtensionGuid, GpuDevice, GpuError, VendorExtension, VendorScalerDesc,
    VideoProcessor,
};

pub const INTEL_VPE_GUID: ExtensionGuid = ExtensionGuid(0xedd1d4b9_8659_4cbc_a4d6_9831a2163ac3);
pub const NVIDIA_PPE_GUID: ExtensionGuid = ExtensionGuid(0xd43ce1b3_1f4b_48ac_baee_c3c25375e6f7);
pub const NVIDIA_TRUE_HDR_GUID: ExtensionGuid =
    ExtensionGuid(0xfdd62bb4_620b_4fd7_9ab3_1e59d0d544b3);

const INTEL_VPE_FN_VERSION: u32 = 0x01;
const INTEL_VPE_FN_MODE: u32 = 0x20;
const INTEL_VPE_FN_SCALING: u32 = 0x37;
const INTEL_VPE_VERSION3: u32 = 0x0003;
const INTEL_VPE_MODE_NONE: u32 = 0x0;
const INTEL_VPE_MODE_PREPROC: u32 = 0x01;
const INTEL_VPE_SCALING_DEFAULT: u32 = 0x0;
const INTEL_VPE_SCALING_SUPER_RESOLUTION: u32 = 0x2;

const NVIDIA_EXTENSION_V1: u32 = 0x1;
const NVIDIA_EXTENSION_V4: u32 = 0x4;
const NVIDIA_METHOD_SUPER_RESOLUTION: u32 = 0x2;
const NVIDIA_METHOD_TRUE_HDR: u32 = 0x3;

pub fn intel_super_resolution(
    processor: &mut dyn VideoProcessor,
    activate: bool,
) -> Result<(), GpuError> {
    processor
        .apply_extension(&VendorExtension::IntelOutput {
            function: INTEL_VPE_FN_VERSION,
            param: INTEL_VPE_VERSION3,
        })
        .map_err(|e| GpuError::Unsupported(format!("Intel VPE version failed: {}", e)))?;
    processor
        .apply_extension(&VendorExtension::IntelOutput {
            function: INTEL_VPE_FN_MODE,
            param: if activate {
                INTEL_VPE_MODE_PREPROC
            } else {
                INTEL_VPE_MODE_NONE
            },
        })
        .map_err(|e| GpuError::Unsupported(format!("Intel VPE mode failed: {}", e)))?;
    processor
        .apply_extension(&VendorExtension::IntelStream {
            function: INTEL_VPE_FN_SCALING,
            param: if activate {
                INTEL_VPE_SCALING_SUPER_RESOLUTION
            } else {
                INTEL_VPE_SCALING_DEFAULT
            },
        })
        .map_err(|e| {
            GpuError::Unsupported(format!("Intel Video Super Resolution failed: {}", e))
        })
}

pub fn nvidia_super_resolution(
    processor: &mut dyn VideoProcessor,
    activate: bool,
) -> Result<(), GpuError> {
    processor
        .apply_extension(&VendorExtension::NvidiaStream {
            guid: NVIDIA_PPE_GUID,
            version: NVIDIA_EXTENSION_V1,
            method: NVIDIA_METHOD_SUPER_RESOLUTION,
            enable: activate as u32,
        })
        .map_err(|e| {
            GpuError::Unsupported(format!("NVIDIA RTX Video Super Resolution failed: {}", e))
        })
}

pub fn nvidia_true_hdr(processor: &mut dyn VideoProcessor, activate: bool) -> Result<(), GpuError> {
    processor
        .apply_extension(&VendorExtension::NvidiaStream {
            guid: NVIDIA_TRUE_HDR_GUID,
            version: NVIDIA_EXTENSION_V4,
            method: NVIDIA_METHOD_TRUE_HDR,
            enable: activate as u32,
        })
        .map_err(|e| GpuError::Unsupported(format!("NVIDIA RTX HDR failed: {}", e)))
}

/// AMD upscaling runs in a separate driver component; probing only checks it can be created
pub fn amd_super_resolution(device: &dyn GpuDevice, size: Dimensions) -> Result<(), GpuError> {
    device
        .create_vendor_scaler(&VendorScalerDesc {
            input_size: size,
            output_size: size,
            frame_rate: 60,
            hdr: false,
            sharpness: 0.0,
        })
        .map(|_| ())
}

/// Toggle the vendor super-resolution feature; `Ok(false)` when the vendor has none
pub fn set_super_resolution(
    vendor: GpuVendor,
    device: &dyn GpuDevice,
    processor: &mut dyn VideoProcessor,
    activate: bool,
) -> Result<bool, GpuError> {
    match vendor {
        GpuVendor::Nvidia => nvidia_super_resolution(processor, activate).map(|_| true),
        GpuVendor::Intel => intel_super_resolution(processor, activate).map(|_| true),
        GpuVendor::Amd => amd_super_resolution(device, Dimensions::new(1920, 1080)).map(|_| true),
        GpuVendor::Other(_) => {
            if processor.caps().auto_stream_super_resolution {
                processor.set_auto_super_resolution(activate)?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }
}

/// Toggle SDR->HDR simulation; only NVIDIA drivers provide it
pub fn set_hdr_simulation(
    vendor: GpuVendor,
    processor: &mut dyn VideoProcessor,
    activate: bool,
) -> Result<bool, GpuError> {
    match vendor {
        GpuVendor::Nvidia => nvidia_true_hdr(processor, activate).map(|_| true),
        other => {
            log::info!("{} HDR capability is not yet supported by the GPU", other);
            Ok(false)
        }
    }
}

/// Result of a non-committing feature probe
pub fn probe_feature(result: Result<bool, GpuError>) -> bool {
    match result {
        Ok(supported) => supported,
        Err(e) => {
            log::debug!("Vendor feature unavailable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_layout() {
        assert_eq!(INTEL_VPE_GUID.0 >> 96, 0xedd1d4b9);
        assert_eq!(NVIDIA_PPE_GUID.0 & 0xffff_ffff, 0x5375e6f7);
        assert_eq!((NVIDIA_TRUE_HDR_GUID.0 >> 80) & 0xffff, 0x620b);
    }
}
