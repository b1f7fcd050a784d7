// Renderer configuration
// JSON-backed settings with environment overrides and a read-only preference view

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::enhancement::GpuVendor;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Failed to write config: {0}")]
    WriteError(String),
}

/// User-selected super resolution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuperResolutionMode {
    #[default]
    Auto,
    /// Vendor driver super resolution
    Driver,
    /// Compositor processing unit with no shader
    VideoProcessorOnly,
    Fsr1,
    Nis,
    NisHalf,
    NisSharpen,
    NisSharpenHalf,
    Rcas,
    Cas,
    Upscaler,
    Copy,
    TestCompute,
    TestPixel,
}

impl SuperResolutionMode {
    pub fn is_auto(self) -> bool {
        self == SuperResolutionMode::Auto
    }
}

/// Per-vendor scores used to rank adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorScore {
    pub super_resolution: u32,
    pub hdr: u32,
}

/// Precedence among vendor enhancement features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorPolicy {
    pub nvidia: VendorScore,
    pub amd: VendorScore,
    pub intel: VendorScore,
    /// Score of an adapter whose vendor features are unavailable
    pub fallback: VendorScore,
}

impl VendorPolicy {
    pub fn score_for(&self, vendor: GpuVendor) -> VendorScore {
        match vendor {
            GpuVendor::Nvidia => self.nvidia,
            GpuVendor::Amd => self.amd,
            GpuVendor::Intel => self.intel,
            GpuVendor::Other(_) => self.fallback,
        }
    }

    /// Super resolution outranks HDR simulation
    pub fn score(&self, vendor: GpuVendor, vsr_capable: bool, hdr_capable: bool) -> u32 {
        let vendor_score = self.score_for(vendor);
        let vsr = if vsr_capable {
            vendor_score.super_resolution
        } else {
            self.fallback.super_resolution
        };
        let hdr = if hdr_capable {
            vendor_score.hdr
        } else {
            self.fallback.hdr
        };
        vsr.max(hdr)
    }
}

impl Default for VendorPolicy {
    fn default() -> Self {
        Self {
            nvidia: VendorScore {
                super_resolution: 400,
                hdr: 40,
            },
            amd: VendorScore {
                super_resolution: 300,
                hdr: 30,
            },
            intel: VendorScore {
                super_resolution: 200,
                hdr: 20,
            },
            fallback: VendorScore {
                super_resolution: 100,
                hdr: 10,
            },
        }
    }
}

/// Renderer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub renderer_enabled: bool,
    pub enhancement_enabled: bool,
    pub super_resolution_mode: SuperResolutionMode,
    pub vsync: bool,
    pub vendor_policy: VendorPolicy,
    pub hdr_probe_interval_ms: u64,
    /// Bind decoder textures directly instead of copying them
    pub force_bind_decoder_textures: Option<bool>,
    /// Wait on a fence before sampling decoder output
    pub force_fence: Option<bool>,
    /// Allow Intel devices below feature level 11.1
    pub allow_legacy_intel: bool,
    pub shader_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            renderer_enabled: true,
            enhancement_enabled: false,
            super_resolution_mode: SuperResolutionMode::Auto,
            vsync: true,
            vendor_policy: VendorPolicy::default(),
            hdr_probe_interval_ms: 1000,
            force_bind_decoder_textures: None,
            force_fence: None,
            allow_legacy_intel: false,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

impl RendererConfig {
    /// Default config location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("video-enhancer")
            .join("renderer.json")
    }

    /// Load from a JSON file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("No renderer config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteError(format!("{}: {}", parent.display(), e)))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", path.display(), e)))
    }

    /// Apply `D3D11VA_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup("D3D11VA_ENABLED") {
            match value.trim() {
                "0" => {
                    log::warn!("D3D11VA is disabled by environment variable");
                    self.renderer_enabled = false;
                }
                "1" => self.allow_legacy_intel = true,
                other => log::warn!("Ignoring D3D11VA_ENABLED={}", other),
            }
        }

        if let Some(value) = lookup("D3D11VA_FORCE_BIND") {
            self.force_bind_decoder_textures = parse_flag(&value);
            log::info!(
                "Using D3D11VA_FORCE_BIND to override default bind/copy logic: {:?}",
                self.force_bind_decoder_textures
            );
        }

        if let Some(value) = lookup("D3D11VA_FORCE_FENCE") {
            self.force_fence = parse_flag(&value);
            log::info!(
                "Using D3D11VA_FORCE_FENCE to override default fence workaround logic: {:?}",
                self.force_fence
            );
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

/// Read-only view of user preferences
pub trait PreferenceSource: Send + Sync {
    fn super_resolution_mode(&self) -> SuperResolutionMode;
    fn video_enhancement_enabled(&self) -> bool;
    fn vsync_enabled(&self) -> bool;
}

impl PreferenceSource for RendererConfig {
    fn super_resolution_mode(&self) -> SuperResolutionMode {
        self.super_resolution_mode
    }

    fn video_enhancement_enabled(&self) -> bool {
        self.enhancement_enabled
    }

    fn vsync_enabled(&self) -> bool {
        self.vsync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_policy_order() {
        let policy = VendorPolicy::default();
        let nvidia = policy.score(GpuVendor::Nvidia, true, false);
        let amd = policy.score(GpuVendor::Amd, true, false);
        let intel = policy.score(GpuVendor::Intel, true, false);
        let other = policy.score(GpuVendor::Other(0x1234), false, false);
        assert!(nvidia > amd && amd > intel && intel > other);
    }

    #[test]
    fn test_score_without_vsr_uses_fallback() {
        let policy = VendorPolicy::default();
        assert_eq!(policy.score(GpuVendor::Nvidia, false, true), 100);
        assert_eq!(policy.score(GpuVendor::Nvidia, false, false), 100);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RendererConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("renderer.json");

        let mut config = RendererConfig::default();
        config.enhancement_enabled = true;
        config.super_resolution_mode = SuperResolutionMode::NisSharpen;
        config.vendor_policy.intel.super_resolution = 500;
        config.save(&path).unwrap();

        let loaded = RendererConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renderer.json");
        std::fs::write(&path, r#"{ "super_resolution_mode": "cas", "vsync": false }"#).unwrap();

        let config = RendererConfig::load(&path).unwrap();
        assert_eq!(config.super_resolution_mode, SuperResolutionMode::Cas);
        assert!(!config.vsync);
        assert_eq!(config.hdr_probe_interval_ms, 1000);
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renderer.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RendererConfig::load(&path),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("D3D11VA_ENABLED", "0"),
            ("D3D11VA_FORCE_BIND", "1"),
            ("D3D11VA_FORCE_FENCE", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = RendererConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert!(!config.renderer_enabled);
        assert_eq!(config.force_bind_decoder_textures, Some(true));
        assert_eq!(config.force_fence, Some(false));
    }
}
