// Color conversion
// YUV->RGB pixel shader selection and the generic shader's coefficient buffer

use crate::decoder::Colorspace;
use crate::enhancer::constants::ConstantWriter;
use crate::gpu::{ConversionShader, DeviceContext, GpuError, TextureFormat};

pub const RAW_MATRIX_LEN: usize = 9;
pub const PACKED_MATRIX_LEN: usize = 12;

/// Row-major YUV->RGB coefficients: rows are the Y, U and V contributions to R, G, B
pub type RawMatrix = [f32; RAW_MATRIX_LEN];

pub const BT601_LIMITED: RawMatrix = [
    1.1644, 1.1644, 1.1644, //
    0.0, -0.3917, 2.0172, //
    1.5960, -0.8129, 0.0,
];
pub const BT601_FULL: RawMatrix = [
    1.0, 1.0, 1.0, //
    0.0, -0.3441, 1.7720, //
    1.4020, -0.7141, 0.0,
];
pub const BT709_LIMITED: RawMatrix = [
    1.1644, 1.1644, 1.1644, //
    0.0, -0.2132, 2.1124, //
    1.7927, -0.5329, 0.0,
];
pub const BT709_FULL: RawMatrix = [
    1.0, 1.0, 1.0, //
    0.0, -0.1873, 1.8556, //
    1.5748, -0.4681, 0.0,
];
pub const BT2020_LIMITED: RawMatrix = [
    1.1644, 1.1644, 1.1644, //
    0.0, -0.1874, 2.1418, //
    1.6781, -0.6505, 0.0,
];
pub const BT2020_FULL: RawMatrix = [
    1.0, 1.0, 1.0, //
    0.0, -0.1646, 1.8814, //
    1.4746, -0.5714, 0.0,
];

pub const OFFSETS_LIMITED: [f32; 3] = [16.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0];
pub const OFFSETS_FULL: [f32; 3] = [0.0, 128.0 / 255.0, 128.0 / 255.0];

pub fn raw_matrix(colorspace: Colorspace, full_range: bool) -> &'static RawMatrix {
    match (colorspace, full_range) {
        (Colorspace::Rec601, false) => &BT601_LIMITED,
        (Colorspace::Rec601, true) => &BT601_FULL,
        (Colorspace::Rec709, false) => &BT709_LIMITED,
        (Colorspace::Rec709, true) => &BT709_FULL,
        (Colorspace::Rec2020, false) => &BT2020_LIMITED,
        (Colorspace::Rec2020, true) => &BT2020_FULL,
    }
}

pub fn offsets(full_range: bool) -> &'static [f32; 3] {
    if full_range {
        &OFFSETS_FULL
    } else {
        &OFFSETS_LIMITED
    }
}

/// Transpose to column-major with one padding float after each float3
pub fn pack_matrix(raw: &RawMatrix) -> [f32; PACKED_MATRIX_LEN] {
    let mut packed = [0.0; PACKED_MATRIX_LEN];
    for i in 0..3 {
        for j in 0..3 {
            packed[i * 4 + j] = raw[j * 3 + i];
        }
    }
    packed
}

/// Inverse of `pack_matrix`
pub fn unpack_matrix(packed: &[f32; PACKED_MATRIX_LEN]) -> RawMatrix {
    let mut raw = [0.0; RAW_MATRIX_LEN];
    for i in 0..3 {
        for j in 0..3 {
            raw[j * 3 + i] = packed[i * 4 + j];
        }
    }
    raw
}

/// Constant buffer bound to the generic conversion shader
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CscConstants {
    pub matrix: [f32; PACKED_MATRIX_LEN],
    pub offsets: [f32; 3],
}

impl CscConstants {
    pub fn new(colorspace: Colorspace, full_range: bool) -> Self {
        Self {
            matrix: pack_matrix(raw_matrix(colorspace, full_range)),
            offsets: *offsets(full_range),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ConstantWriter::new();
        for v in self.matrix.iter().chain(self.offsets.iter()) {
            w.f32(*v);
        }
        w.finish()
    }
}

/// Variant for the frame; `GenericYuv420` and the 4:4:4 shaders read the coefficient buffer
pub fn select_shader(
    texture_format: TextureFormat,
    colorspace: Colorspace,
    full_range: bool,
) -> ConversionShader {
    match texture_format {
        TextureFormat::Ayuv => ConversionShader::Ayuv,
        TextureFormat::Y410 => ConversionShader::Y410,
        _ if !full_range && colorspace == Colorspace::Rec601 => ConversionShader::Bt601LimitedYuv420,
        _ if !full_range && colorspace == Colorspace::Rec2020 => ConversionShader::Bt2020LimitedYuv420,
        _ => ConversionShader::GenericYuv420,
    }
}

fn needs_constants(shader: ConversionShader) -> bool {
    !matches!(
        shader,
        ConversionShader::Bt601LimitedYuv420 | ConversionShader::Bt2020LimitedYuv420
    )
}

/// Binds the conversion shader for the video texture format
///
/// The coefficient buffer is only rebuilt when colorspace or range change.
#[derive(Debug)]
pub struct ColorConverter {
    texture_format: TextureFormat,
    last: Option<(Colorspace, bool)>,
}

impl ColorConverter {
    pub fn new(texture_format: TextureFormat) -> Self {
        Self {
            texture_format,
            last: None,
        }
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.texture_format
    }

    /// Forget the cached state, e.g. after the context lost its bindings
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    pub fn bind_conversion(
        &mut self,
        ctx: &mut dyn DeviceContext,
        colorspace: Colorspace,
        full_range: bool,
    ) -> Result<(), GpuError> {
        let shader = select_shader(self.texture_format, colorspace, full_range);
        ctx.bind_conversion_shader(shader)?;

        if needs_constants(shader) && self.last != Some((colorspace, full_range)) {
            if !self.texture_format.is_yuv444() {
                log::warn!(
                    "Falling back to generic video pixel shader for {:?} ({} range)",
                    colorspace,
                    if full_range { "full" } else { "limited" }
                );
            }
            let constants = CscConstants::new(colorspace, full_range);
            ctx.upload_conversion_constants(&constants.to_bytes())
                .inspect_err(|e| log::error!("Failed to create conversion constants: {}", e))?;
        }

        self.last = Some((colorspace, full_range));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::{Command, RecordingBackend};
    use crate::gpu::GpuBackend;

    #[test]
    fn test_pack_layout() {
        let packed = pack_matrix(&BT709_LIMITED);
        // First column of the raw matrix is the R row
        assert_eq!(&packed[0..3], &[1.1644, 0.0, 1.7927]);
        assert_eq!(packed[3], 0.0);
        assert_eq!(&packed[4..7], &[1.1644, -0.2132, -0.5329]);
        assert_eq!(&packed[8..11], &[1.1644, 2.1124, 0.0]);
    }

    #[test]
    fn test_pack_round_trip() {
        for raw in [
            &BT601_LIMITED,
            &BT601_FULL,
            &BT709_LIMITED,
            &BT709_FULL,
            &BT2020_LIMITED,
            &BT2020_FULL,
        ] {
            assert_eq!(&unpack_matrix(&pack_matrix(raw)), raw);
        }
    }

    #[test]
    fn test_constants_layout() {
        let bytes = CscConstants::new(Colorspace::Rec709, true).to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[48..52], &0.0f32.to_le_bytes());
        assert_eq!(&bytes[52..56], &(128.0f32 / 255.0).to_le_bytes());
    }

    #[test]
    fn test_shader_selection() {
        assert_eq!(
            select_shader(TextureFormat::Nv12, Colorspace::Rec601, false),
            ConversionShader::Bt601LimitedYuv420
        );
        assert_eq!(
            select_shader(TextureFormat::P010, Colorspace::Rec2020, false),
            ConversionShader::Bt2020LimitedYuv420
        );
        assert_eq!(
            select_shader(TextureFormat::Nv12, Colorspace::Rec709, false),
            ConversionShader::GenericYuv420
        );
        assert_eq!(
            select_shader(TextureFormat::Nv12, Colorspace::Rec601, true),
            ConversionShader::GenericYuv420
        );
        assert_eq!(
            select_shader(TextureFormat::Y410, Colorspace::Rec2020, false),
            ConversionShader::Y410
        );
    }

    #[test]
    fn test_constants_cached_until_change() {
        let backend = RecordingBackend::new();
        let mut bundle = backend.create_device(0).unwrap();
        let recorder = backend.recorder();
        let mut converter = ColorConverter::new(TextureFormat::Nv12);

        converter
            .bind_conversion(bundle.context.as_mut(), Colorspace::Rec709, false)
            .unwrap();
        converter
            .bind_conversion(bundle.context.as_mut(), Colorspace::Rec709, false)
            .unwrap();
        converter
            .bind_conversion(bundle.context.as_mut(), Colorspace::Rec709, true)
            .unwrap();

        let uploads = recorder
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::UploadConversionConstants(_)))
            .count();
        assert_eq!(uploads, 2);
    }

    #[test]
    fn test_dedicated_variant_skips_constants() {
        let backend = RecordingBackend::new();
        let mut bundle = backend.create_device(0).unwrap();
        let recorder = backend.recorder();
        let mut converter = ColorConverter::new(TextureFormat::P010);

        converter
            .bind_conversion(bundle.context.as_mut(), Colorspace::Rec2020, false)
            .unwrap();

        let commands = recorder.commands();
        assert!(commands.contains(&Command::BindConversionShader(
            ConversionShader::Bt2020LimitedYuv420
        )));
        assert!(
            !commands
                .iter()
                .any(|c| matches!(c, Command::UploadConversionConstants(_)))
        );
    }
}
