// Video enhancement state
// Vendor identity and capability flags, computed once by the prober and shared by every session

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

const VENDOR_ID_AMD: u32 = 0x1002;
const VENDOR_ID_INTEL: u32 = 0x8086;
const VENDOR_ID_NVIDIA: u32 = 0x10DE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Other(u32),
}

impl GpuVendor {
    pub fn from_pci_id(vendor_id: u32) -> Self {
        match vendor_id {
            VENDOR_ID_NVIDIA => GpuVendor::Nvidia,
            VENDOR_ID_AMD => GpuVendor::Amd,
            VENDOR_ID_INTEL => GpuVendor::Intel,
            other => GpuVendor::Other(other),
        }
    }

    pub fn pci_id(self) -> u32 {
        match self {
            GpuVendor::Nvidia => VENDOR_ID_NVIDIA,
            GpuVendor::Amd => VENDOR_ID_AMD,
            GpuVendor::Intel => VENDOR_ID_INTEL,
            GpuVendor::Other(id) => id,
        }
    }
}

impl fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuVendor::Nvidia => write!(f, "NVIDIA"),
            GpuVendor::Amd => write!(f, "AMD"),
            GpuVendor::Intel => write!(f, "Intel"),
            GpuVendor::Other(id) => write!(f, "vendor {:#06x}", id),
        }
    }
}

/// Capabilities frozen once an adapter is selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSelection {
    pub adapter_index: u32,
    pub vendor: GpuVendor,
    pub integrated: bool,
    pub rtx: bool,
}

/// Last applied ratio and algorithm, for the statistics overlay
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnhancementStats {
    pub ratio: f32,
    pub algorithm: String,
}

/// Process-wide enhancement state shared by `Arc`
///
/// The adapter is probed once; later sessions read the cached result.
#[derive(Debug, Default)]
pub struct EnhancementState {
    selection: OnceCell<Option<AdapterSelection>>,
    vsr_capable: AtomicBool,
    hdr_capable: AtomicBool,
    force_capable: AtomicBool,
    ui_visible: AtomicBool,
    enabled: AtomicBool,
    stats: Mutex<EnhancementStats>,
}

impl EnhancementState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached probe result, computing it on first use
    pub fn selection_or_probe(
        &self,
        probe: impl FnOnce() -> Option<AdapterSelection>,
    ) -> Option<AdapterSelection> {
        *self.selection.get_or_init(probe)
    }

    pub fn selection(&self) -> Option<AdapterSelection> {
        self.selection.get().copied().flatten()
    }

    pub fn is_probed(&self) -> bool {
        self.selection.get().is_some()
    }

    pub fn adapter_index(&self) -> Option<u32> {
        self.selection().map(|s| s.adapter_index)
    }

    pub fn vendor(&self) -> Option<GpuVendor> {
        self.selection().map(|s| s.vendor)
    }

    pub fn set_vsr_capable(&self, capable: bool) {
        self.vsr_capable.store(capable, Ordering::Release);
    }

    pub fn set_hdr_capable(&self, capable: bool) {
        self.hdr_capable.store(capable, Ordering::Release);
    }

    pub fn set_force_capable(&self, capable: bool) {
        self.force_capable.store(capable, Ordering::Release);
    }

    pub fn set_ui_visible(&self, visible: bool) {
        self.ui_visible.store(visible, Ordering::Release);
    }

    pub fn is_vsr_capable(&self) -> bool {
        self.vsr_capable.load(Ordering::Acquire)
    }

    pub fn is_hdr_capable(&self) -> bool {
        self.hdr_capable.load(Ordering::Acquire)
    }

    pub fn is_ui_visible(&self) -> bool {
        self.ui_visible.load(Ordering::Acquire)
    }

    /// Any path (vendor driver or shader) can enhance on this adapter
    pub fn is_enhancement_capable(&self) -> bool {
        self.is_vsr_capable()
            || self.is_hdr_capable()
            || self.force_capable.load(Ordering::Acquire)
    }

    pub fn enable_video_enhancement(&self, enable: bool) {
        self.enabled.store(enable, Ordering::Release);
    }

    pub fn is_video_enhancement_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_stats(&self, ratio: f32, algorithm: impl Into<String>) {
        let mut stats = self.stats.lock();
        stats.ratio = ratio;
        stats.algorithm = algorithm.into();
    }

    pub fn stats(&self) -> EnhancementStats {
        self.stats.lock().clone()
    }
}
