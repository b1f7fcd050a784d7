// Capability prober
// Scores every hardware adapter by its vendor enhancement features and picks the best one

pub mod vendor;

use thiserror::Error;

use crate::config::VendorPolicy;
use crate::enhancement::{AdapterSelection, EnhancementState, GpuVendor};
use crate::gpu::{
    AdapterInfo, Background, ColorSpace, Dimensions, GpuBackend, GpuDevice, GpuError,
    ProcessorInput, Rect, TextureDesc, TextureFormat, TextureRole, VideoProcessor,
    VideoProcessorDesc,
};

const MIB: u64 = 1024 * 1024;
const PROBE_SIZE: Dimensions = Dimensions::new(1920, 1080);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Adapter enumeration failed: {0}")]
    Enumeration(String),
    #[error("Adapter {0} failed: {1}")]
    Adapter(u32, GpuError),
    #[error("No adapter can run a video processor")]
    NoCapableAdapter,
}

/// Integrated GPUs carve their memory out of system RAM
pub fn is_integrated(info: &AdapterInfo) -> bool {
    info.shared_system_memory > 512 * MIB && info.dedicated_video_memory < 2024 * MIB
}

/// RTX-class NVIDIA adapter, by name or by mesh shader support
pub fn is_rtx(info: &AdapterInfo) -> bool {
    GpuVendor::from_pci_id(info.vendor_id) == GpuVendor::Nvidia
        && (info.description.to_ascii_uppercase().contains(" RTX ") || info.mesh_shader_tier >= 1)
}

/// Vendor features an adapter reported while probing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub vendor: GpuVendor,
    pub super_resolution: bool,
    pub hdr: bool,
}

/// Minimal one-pass processor used to test vendor extensions
fn probe_processor(device: &dyn GpuDevice) -> Result<Box<dyn VideoProcessor>, GpuError> {
    let output = device.create_texture(
        &TextureDesc::new(PROBE_SIZE, TextureFormat::Rgba8, TextureRole::Video).render_target(),
    )?;
    let rect = Rect::from_size(PROBE_SIZE);
    device.create_video_processor(
        &VideoProcessorDesc {
            label: "probe",
            input_size: PROBE_SIZE,
            output_size: PROBE_SIZE,
            frame_rate: 60,
            source_rect: rect,
            dest_rect: rect,
            target_rect: rect,
            input_color_space: ColorSpace::YcbcrStudioG22LeftP709,
            output_color_space: ColorSpace::RgbFullG22NoneP709,
            background: Background::Rgb,
            input_format: TextureFormat::Nv12,
            edge_enhancement: None,
        },
        ProcessorInput::DecoderFrame,
        &output,
    )
}

/// Test each vendor feature with `activate = false` so nothing stays enabled
fn test_features(
    vendor: GpuVendor,
    device: &dyn GpuDevice,
    processor: &mut dyn VideoProcessor,
) -> AdapterCapabilities {
    let super_resolution =
        vendor::probe_feature(vendor::set_super_resolution(vendor, device, processor, false));
    let hdr = vendor::probe_feature(vendor::set_hdr_simulation(vendor, processor, false));
    AdapterCapabilities {
        vendor,
        super_resolution,
        hdr,
    }
}

pub struct CapabilityProber<'a> {
    backend: &'a dyn GpuBackend,
    policy: VendorPolicy,
}

impl<'a> CapabilityProber<'a> {
    pub fn new(backend: &'a dyn GpuBackend, policy: VendorPolicy) -> Self {
        Self { backend, policy }
    }

    /// Capabilities of one adapter, or an error if it cannot run a processor
    pub fn probe_adapter(&self, info: &AdapterInfo) -> Result<AdapterCapabilities, ProbeError> {
        let bundle = self
            .backend
            .create_device(info.index)
            .map_err(|e| ProbeError::Adapter(info.index, e))?;
        let mut processor = probe_processor(bundle.device.as_ref())
            .map_err(|e| ProbeError::Adapter(info.index, e))?;
        Ok(test_features(
            GpuVendor::from_pci_id(info.vendor_id),
            bundle.device.as_ref(),
            processor.as_mut(),
        ))
    }

    pub fn score(&self, caps: &AdapterCapabilities) -> u32 {
        self.policy
            .score(caps.vendor, caps.super_resolution, caps.hdr)
    }

    /// Highest-scoring hardware adapter; the first one wins ties
    pub fn select_adapter(&self) -> Result<(AdapterInfo, AdapterCapabilities), ProbeError> {
        let adapters = self
            .backend
            .enumerate_adapters()
            .map_err(|e| ProbeError::Enumeration(e.to_string()))?;

        let mut best: Option<(u32, AdapterInfo, AdapterCapabilities)> = None;
        for info in adapters {
            if info.software {
                // WARP is known to fail
                continue;
            }
            let caps = match self.probe_adapter(&info) {
                Ok(caps) => caps,
                Err(e) => {
                    log::info!("Skipping adapter {} ({}): {}", info.index, info.description, e);
                    continue;
                }
            };
            let score = self.score(&caps);
            log::debug!(
                "Adapter {} ({}) scored {} (vsr={}, hdr={})",
                info.index,
                info.description,
                score,
                caps.super_resolution,
                caps.hdr
            );
            if best.as_ref().is_none_or(|(s, _, _)| score > *s) {
                best = Some((score, info, caps));
            }
        }

        best.map(|(_, info, caps)| (info, caps))
            .ok_or(ProbeError::NoCapableAdapter)
    }

    /// Pick the enhancement adapter once per process and record its capabilities
    ///
    /// Returns `None` when no adapter can run a video processor; the caller
    /// then renders without enhancement.
    pub fn probe_and_select_adapter(&self, state: &EnhancementState) -> Option<AdapterSelection> {
        state.selection_or_probe(|| match self.select_adapter() {
            Ok((info, caps)) => Some(self.commit(state, &info, caps)),
            Err(e) => {
                log::warn!("Video enhancement unavailable: {}", e);
                None
            }
        })
    }

    fn commit(
        &self,
        state: &EnhancementState,
        info: &AdapterInfo,
        caps: AdapterCapabilities,
    ) -> AdapterSelection {
        log::info!("GPU used for Video Enhancement: {}", info.description);

        let super_resolution = match caps.vendor {
            GpuVendor::Nvidia | GpuVendor::Amd | GpuVendor::Intel => caps.super_resolution,
            // The generic processor always scales; auto stream super resolution just does it better
            GpuVendor::Other(_) => true,
        };
        state.set_vsr_capable(super_resolution);
        state.set_hdr_capable(caps.hdr);
        // Shader enhancers run on every GPU
        state.set_force_capable(true);
        state.set_ui_visible(true);

        AdapterSelection {
            adapter_index: info.index,
            vendor: caps.vendor,
            integrated: is_integrated(info),
            rtx: is_rtx(info),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VendorScore;
    use crate::gpu::recording::{AdapterSpec, Command, RecordingBackend};

    fn info(description: &str, vendor_id: u32) -> AdapterInfo {
        AdapterSpec::new(vendor_id, description).info
    }

    #[test]
    fn test_integrated_classification() {
        assert!(is_integrated(&AdapterSpec::intel("Intel UHD 770").integrated().info));
        assert!(!is_integrated(&info("NVIDIA GeForce RTX 4080", 0x10DE)));
    }

    #[test]
    fn test_rtx_classification() {
        assert!(is_rtx(&info("NVIDIA GeForce RTX 3060", 0x10DE)));
        assert!(is_rtx(&info("nvidia geforce rtx 2070 super", 0x10DE)));
        assert!(!is_rtx(&info("NVIDIA GeForce GTX 1080", 0x10DE)));
        assert!(!is_rtx(&info("NVIDIA GeForce RTX4090", 0x10DE)));

        let mut mesh = info("NVIDIA Future GPU", 0x10DE);
        mesh.mesh_shader_tier = 1;
        assert!(is_rtx(&mesh));

        let mut other = info("Some RTX Branded Card", 0x1002);
        other.mesh_shader_tier = 1;
        assert!(!is_rtx(&other));
    }

    #[test]
    fn test_prefers_super_resolution_vendor() {
        let backend = RecordingBackend::with_adapters(vec![
            AdapterSpec::intel("Intel Iris Xe").integrated(),
            AdapterSpec::nvidia("NVIDIA GeForce RTX 3070"),
        ]);
        let state = EnhancementState::new();
        let prober = CapabilityProber::new(&backend, VendorPolicy::default());

        let selection = prober.probe_and_select_adapter(&state).unwrap();
        assert_eq!(selection.adapter_index, 1);
        assert_eq!(selection.vendor, GpuVendor::Nvidia);
        assert!(selection.rtx);
        assert!(!selection.integrated);
        assert!(state.is_vsr_capable());
        assert!(state.is_hdr_capable());
        assert!(state.is_ui_visible());
        assert!(state.is_enhancement_capable());
    }

    #[test]
    fn test_probe_does_not_activate_features() {
        let backend = RecordingBackend::with_adapters(vec![AdapterSpec::nvidia("NVIDIA GeForce RTX 3070")]);
        let prober = CapabilityProber::new(&backend, VendorPolicy::default());
        prober.probe_and_select_adapter(&EnhancementState::new());

        for command in backend.recorder().commands() {
            if let Command::ApplyExtension {
                extension: crate::gpu::VendorExtension::NvidiaStream { enable, .. },
                ..
            } = command
            {
                assert_eq!(enable, 0);
            }
        }
    }

    #[test]
    fn test_policy_is_configurable() {
        let backend = RecordingBackend::with_adapters(vec![
            AdapterSpec::nvidia("NVIDIA GeForce RTX 3070"),
            AdapterSpec::intel("Intel Arc A770"),
        ]);
        let mut policy = VendorPolicy::default();
        policy.intel = VendorScore {
            super_resolution: 900,
            hdr: 90,
        };
        let prober = CapabilityProber::new(&backend, policy);
        let (info, caps) = prober.select_adapter().unwrap();
        assert_eq!(info.index, 1);
        assert!(caps.super_resolution);
        assert!(!caps.hdr);
    }

    #[test]
    fn test_skips_software_and_broken_adapters() {
        let backend = RecordingBackend::with_adapters(vec![
            AdapterSpec::software(),
            AdapterSpec::nvidia("NVIDIA GeForce GTX 1660"),
            AdapterSpec::amd("AMD Radeon RX 6800"),
        ]);
        backend.faults().device_creation.insert(1);
        let prober = CapabilityProber::new(&backend, VendorPolicy::default());
        let (info, caps) = prober.select_adapter().unwrap();
        assert_eq!(info.index, 2);
        assert_eq!(caps.vendor, GpuVendor::Amd);
        assert!(caps.super_resolution);
        assert_eq!(
            backend
                .recorder()
                .count(|c| *c == Command::CreateDevice { adapter: 0 }),
            0
        );
    }

    #[test]
    fn test_no_capable_adapter_is_cached() {
        let backend = RecordingBackend::with_adapters(vec![AdapterSpec::intel("Intel HD 4000")]);
        backend.faults().processors.insert("probe".to_string());
        let state = EnhancementState::new();
        let prober = CapabilityProber::new(&backend, VendorPolicy::default());

        assert_eq!(prober.probe_and_select_adapter(&state), None);
        backend.faults().processors.clear();
        assert_eq!(prober.probe_and_select_adapter(&state), None);
        assert_eq!(
            backend
                .recorder()
                .count(|c| matches!(c, Command::CreateDevice { .. })),
            1
        );
        assert!(!state.is_ui_visible());
    }

    #[test]
    fn test_generic_vendor_is_vsr_capable() {
        let backend = RecordingBackend::with_adapters(vec![AdapterSpec::new(0x5143, "Qualcomm Adreno")]);
        let state = EnhancementState::new();
        let prober = CapabilityProber::new(&backend, VendorPolicy::default());
        let selection = prober.probe_and_select_adapter(&state).unwrap();
        assert_eq!(selection.vendor, GpuVendor::Other(0x5143));
        assert!(state.is_vsr_capable());
        assert!(!state.is_hdr_capable());
    }
}
