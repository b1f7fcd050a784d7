// Video Enhancer - Hardware-accelerated video renderer
// Main library entry point

pub mod color;
pub mod config;
pub mod decoder;
pub mod enhancement;
pub mod enhancer;
pub mod gpu;
pub mod hdr;
pub mod overlay;
pub mod pipeline;
pub mod presenter;
pub mod prober;
pub mod renderer;
pub mod selector;

pub use config::{PreferenceSource, RendererConfig, SuperResolutionMode};
pub use decoder::{DecodedFrame, DecoderParameters, VideoFormat};
pub use enhancement::{EnhancementState, GpuVendor};
pub use presenter::{FrameOutcome, RendererEvent, ResetReason};
pub use renderer::{RendererError, VideoRenderer, WindowProvider};

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber; `RUST_LOG` overrides `level`
///
/// `log` records are forwarded to the subscriber. Returns false if a
/// global subscriber was already installed.
pub fn init_logging(level: log::LevelFilter) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_once() {
        let first = init_logging(log::LevelFilter::Debug);
        assert!(!init_logging(log::LevelFilter::Info) || !first);
    }
}
