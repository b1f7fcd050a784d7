// Stage geometry
// Letterbox viewport, per-stage rectangles and color-space tags

use crate::gpu::{Background, ColorSpace, Dimensions, Rect};

use super::table::Choice;

/// Output rectangle inside the window, preserving the decoder aspect ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub left: u32,
    pub top: u32,
}

impl Viewport {
    pub fn size(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Viewport as a rectangle in back-buffer coordinates
    pub fn rect(&self) -> Rect {
        Rect::new(
            self.left as i32,
            self.top as i32,
            (self.left + self.width) as i32,
            (self.top + self.height) as i32,
        )
    }

    pub fn offset(&self) -> (u32, u32) {
        (self.left, self.top)
    }
}

/// Fit the decoder frame into the window
///
/// Window and decoder sizes are rounded down to even first; the scaled
/// side and its centring offset are rounded down to even as well.
pub fn letterbox(window: Dimensions, decoder: Dimensions) -> Viewport {
    let window = window.even();
    let decoder = decoder.even();

    let mut viewport = Viewport {
        width: window.width,
        height: window.height,
        left: 0,
        top: 0,
    };
    if decoder.width == 0 || decoder.height == 0 {
        return viewport;
    }

    let ratio_width = window.width as f64 / decoder.width as f64;
    let ratio_height = window.height as f64 / decoder.height as f64;

    if ratio_height < ratio_width {
        viewport.width = ((decoder.width as f64 * ratio_height).floor() as u32) & !1;
        viewport.left = (window.width.abs_diff(viewport.width) / 2) & !1;
    } else if ratio_width < ratio_height {
        viewport.height = ((decoder.height as f64 * ratio_width).floor() as u32) & !1;
        viewport.top = (window.height.abs_diff(viewport.height) / 2) & !1;
    }

    viewport
}

/// Rectangles and color spaces of one processor stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageGeometry {
    pub source: Rect,
    pub dest: Rect,
    pub target: Rect,
    pub input_color_space: ColorSpace,
    pub output_color_space: ColorSpace,
    pub background: Background,
}

/// Geometry of the first-pass, main and tone-mapping stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageLayout {
    pub first_pass: StageGeometry,
    pub main: StageGeometry,
    pub tone: StageGeometry,
}

const YCBCR_SDR: ColorSpace = ColorSpace::YcbcrStudioG22LeftP709;
const YCBCR_PQ: ColorSpace = ColorSpace::YcbcrStudioG2084LeftP2020;
const RGB_PQ: ColorSpace = ColorSpace::RgbFullG2084NoneP2020;
const RGB_SDR: ColorSpace = ColorSpace::RgbFullG22NoneP709;

pub fn stage_layout(
    choice: &Choice,
    viewport: &Viewport,
    decoder: Dimensions,
    decoder_hdr: bool,
    yuv444: bool,
) -> StageLayout {
    let output = viewport.size();
    let hdr = decoder_hdr || choice.vendor_hdr;
    let shader = choice.enhancer.is_using_shader();

    // First pass: decoder frame scaled to the output size by the vendor feature
    let (first_out, first_bg) = if decoder_hdr {
        if yuv444 || choice.two_pass {
            (RGB_PQ, Background::Rgb)
        } else {
            (YCBCR_PQ, Background::YCbCr)
        }
    } else if choice.vendor_hdr {
        (RGB_PQ, Background::Rgb)
    } else {
        (YCBCR_SDR, Background::YCbCr)
    };
    let first_pass = StageGeometry {
        source: Rect::from_size(decoder),
        dest: Rect::from_size(output),
        target: Rect::from_size(output),
        input_color_space: if decoder_hdr { YCBCR_PQ } else { YCBCR_SDR },
        output_color_space: first_out,
        background: first_bg,
    };

    let source = if choice.two_pass {
        Rect::from_size(output)
    } else {
        Rect::from_size(decoder)
    };
    let dest = if choice.enhancer.is_upscaler() {
        Rect::from_size(decoder)
    } else if !choice.tone_mapping && !shader {
        // The processor writes the back buffer directly, so it centres itself
        viewport.rect()
    } else {
        Rect::from_size(output)
    };
    let input_color_space = if choice.two_pass {
        first_out
    } else if hdr {
        YCBCR_PQ
    } else {
        YCBCR_SDR
    };
    let (output_color_space, background) = if !choice.tone_mapping || shader {
        (if hdr { RGB_PQ } else { RGB_SDR }, Background::Rgb)
    } else {
        (if hdr { YCBCR_PQ } else { YCBCR_SDR }, Background::YCbCr)
    };
    let main = StageGeometry {
        source,
        dest,
        target: Rect::new(0, 0, dest.right, dest.bottom),
        input_color_space,
        output_color_space,
        background,
    };

    let tone = StageGeometry {
        source: Rect::from_size(output),
        dest: Rect::from_size(output),
        target: Rect::from_size(output),
        input_color_space: if hdr && !yuv444 { YCBCR_PQ } else { YCBCR_SDR },
        output_color_space: if hdr { RGB_PQ } else { RGB_SDR },
        background: Background::Rgb,
    };

    StageLayout {
        first_pass,
        main,
        tone,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhancer::Enhancer;

    fn choice(enhancer: Enhancer, tone: bool, two_pass: bool, vendor_hdr: bool) -> Choice {
        Choice {
            vendor_super_resolution: two_pass,
            vendor_hdr,
            tone_mapping: tone,
            two_pass,
            enhancer,
            upscaler_label: "",
            sharpener_label: "",
        }
    }

    #[test]
    fn test_letterbox_same_ratio() {
        let v = letterbox(Dimensions::new(2560, 1440), Dimensions::new(1920, 1080));
        assert_eq!(v, Viewport { width: 2560, height: 1440, left: 0, top: 0 });
    }

    #[test]
    fn test_letterbox_pillarbox() {
        // 4:3 stream on a 16:9 window
        let v = letterbox(Dimensions::new(1920, 1080), Dimensions::new(1440, 1080));
        assert_eq!((v.width, v.height), (1440, 1080));
        assert_eq!((v.left, v.top), (240, 0));
    }

    #[test]
    fn test_letterbox_odd_window() {
        let v = letterbox(Dimensions::new(1921, 1203), Dimensions::new(1920, 1080));
        assert_eq!(v.width, 1920);
        assert_eq!(v.height % 2, 0);
        assert_eq!(v.top % 2, 0);
        assert!(v.height <= 1202);
    }

    #[test]
    fn test_main_dest_centred_without_shader() {
        let viewport = Viewport { width: 1440, height: 1080, left: 240, top: 0 };
        let layout = stage_layout(
            &choice(Enhancer::None, false, false, false),
            &viewport,
            Dimensions::new(1280, 960),
            false,
            false,
        );
        assert_eq!(layout.main.dest, Rect::new(240, 0, 1680, 1080));
        assert_eq!(layout.main.target, Rect::new(0, 0, 1680, 1080));
        assert_eq!(layout.main.output_color_space, ColorSpace::RgbFullG22NoneP709);
        assert_eq!(layout.main.background, Background::Rgb);
    }

    #[test]
    fn test_main_dest_for_shader_upscaler() {
        let viewport = Viewport { width: 2560, height: 1440, left: 0, top: 0 };
        let layout = stage_layout(
            &choice(Enhancer::Nis, false, false, false),
            &viewport,
            Dimensions::new(1920, 1080),
            false,
            false,
        );
        assert_eq!(layout.main.source, Rect::new(0, 0, 1920, 1080));
        assert_eq!(layout.main.dest, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_two_pass_chains_color_space() {
        let viewport = Viewport { width: 3840, height: 2160, left: 0, top: 0 };
        let layout = stage_layout(
            &choice(Enhancer::None, true, true, false),
            &viewport,
            Dimensions::new(1920, 1080),
            true,
            false,
        );
        assert_eq!(layout.first_pass.output_color_space, ColorSpace::RgbFullG2084NoneP2020);
        assert_eq!(layout.main.input_color_space, layout.first_pass.output_color_space);
        assert_eq!(layout.main.source, Rect::new(0, 0, 3840, 2160));
        assert_eq!(layout.main.output_color_space, ColorSpace::YcbcrStudioG2084LeftP2020);
        assert_eq!(layout.main.background, Background::YCbCr);
    }

    #[test]
    fn test_tone_stage() {
        let viewport = Viewport { width: 2560, height: 1440, left: 0, top: 0 };
        let layout = stage_layout(
            &choice(Enhancer::Copy, true, false, false),
            &viewport,
            Dimensions::new(1920, 1080),
            true,
            false,
        );
        assert_eq!(layout.tone.source, Rect::new(0, 0, 2560, 1440));
        assert_eq!(layout.tone.input_color_space, ColorSpace::YcbcrStudioG2084LeftP2020);
        assert_eq!(layout.tone.output_color_space, ColorSpace::RgbFullG2084NoneP2020);
    }
}
