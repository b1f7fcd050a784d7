// Shader constant buffers
// Little-endian packing for the enhancer constant buffers (16-byte aligned)

use crate::gpu::Dimensions;

/// Appends 32-bit fields and pads the result to a 16-byte multiple
#[derive(Debug, Default)]
pub struct ConstantWriter {
    bytes: Vec<u8>,
}

impl ConstantWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn f32(&mut self, value: f32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        let mut bytes = std::mem::take(&mut self.bytes);
        bytes.resize(bytes.len().next_multiple_of(16), 0);
        bytes
    }
}

/// IEEE half from single precision, round-to-nearest-even
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x007f_ffff;

    if exp == 0xff {
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7c00 | nan;
    }

    let half_exp = exp - 127 + 15;
    if half_exp >= 0x1f {
        return sign | 0x7c00;
    }
    if half_exp <= 0 {
        if half_exp < -10 {
            return sign;
        }
        let m = mantissa | 0x0080_0000;
        let shift = (14 - half_exp) as u32;
        let half_m = m >> shift;
        let round = (m >> (shift - 1)) & 1;
        let sticky = m & ((1 << (shift - 1)) - 1);
        let rounded = half_m + (round & ((sticky != 0) as u32 | (half_m & 1)));
        return sign | rounded as u16;
    }

    let half = ((half_exp as u32) << 10) | (mantissa >> 13);
    let round = (mantissa >> 12) & 1;
    let sticky = mantissa & 0x0fff;
    let rounded = half + (round & ((sticky != 0) as u32 | (half & 1)));
    sign | rounded as u16
}

/// FSR1 EASU constants: four uint4 registers, projection centre and radius
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fsr1EasuConstants {
    pub con0: [u32; 4],
    pub con1: [u32; 4],
    pub con2: [u32; 4],
    pub con3: [u32; 4],
}

impl Fsr1EasuConstants {
    pub fn new(input: Dimensions, output: Dimensions) -> Self {
        let in_w = input.width as f32;
        let in_h = input.height as f32;
        let out_w = output.width as f32;
        let out_h = output.height as f32;
        let bits = |v: f32| v.to_bits();

        Self {
            con0: [
                bits(in_w / out_w),
                bits(in_h / out_h),
                bits(0.5 * in_w / out_w - 0.5),
                bits(0.5 * in_h / out_h - 0.5),
            ],
            con1: [
                bits(1.0 / in_w),
                bits(1.0 / in_h),
                bits(1.0 / in_w),
                bits(-1.0 / in_h),
            ],
            con2: [
                bits(-1.0 / in_w),
                bits(2.0 / in_h),
                bits(1.0 / in_w),
                bits(2.0 / in_h),
            ],
            con3: [bits(0.0), bits(4.0 / in_h), 0, 0],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ConstantWriter::new();
        for v in self
            .con0
            .iter()
            .chain(&self.con1)
            .chain(&self.con2)
            .chain(&self.con3)
        {
            w.u32(*v);
        }
        // projCentre, squaredRadius, padding
        w.u32(0).u32(0).u32(0).u32(0);
        w.finish()
    }
}

/// FSR1 RCAS constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fsr1RcasConstants {
    pub con0: [u32; 4],
}

impl Fsr1RcasConstants {
    pub const SHARPNESS: f32 = 0.2;

    /// Sharpness is in stops: 0 is maximum, each unit halves it
    pub fn new(sharpness: f32) -> Self {
        let sharpness = (-sharpness).exp2();
        let half = f32_to_f16_bits(sharpness) as u32;
        Self {
            con0: [sharpness.to_bits(), half | (half << 16), 0, 0],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ConstantWriter::new();
        for v in self.con0 {
            w.u32(v);
        }
        // projCentre, squaredRadius, debugMode
        w.u32(0).u32(0).u32(0).u32(0);
        w.finish()
    }
}

/// Robust contrast adaptive sharpening
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RcasConstants {
    pub sharpness: f32,
    pub contrast: f32,
    pub display_width: i32,
    pub display_height: i32,
}

impl RcasConstants {
    pub fn new(output: Dimensions) -> Self {
        Self {
            sharpness: 0.5,
            contrast: 0.4,
            display_width: output.width as i32,
            display_height: output.height as i32,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ConstantWriter::new();
        w.f32(self.sharpness)
            .f32(self.contrast)
            // dynamic sharpen, motion-vector display size, debug
            .i32(0)
            .i32(0)
            .i32(0)
            // motion sharpness, texture scale, mv scale x/y
            .f32(0.0)
            .f32(0.0)
            .f32(0.0)
            .f32(0.0)
            // threshold, scale limit
            .f32(0.0)
            .f32(0.0)
            .i32(self.display_width)
            .i32(self.display_height);
        w.finish()
    }
}

/// Contrast adaptive sharpening pixel shader
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CasConstants {
    pub px: f32,
    pub py: f32,
    pub wh: [f32; 2],
}

impl CasConstants {
    pub fn new(input: Dimensions) -> Self {
        let w = input.width as f32;
        let h = input.height as f32;
        Self {
            px: 1.0 / w,
            py: 1.0 / h,
            wh: [w, h],
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ConstantWriter::new();
        w.f32(self.px)
            .f32(self.py)
            .f32(self.wh[0])
            .f32(self.wh[1])
            // counter, clock
            .u32(0)
            .f32(0.0);
        w.finish()
    }
}

/// Source and destination sizes for the bicubic upscaler
pub fn upscaler_constants(input: Dimensions, output: Dimensions) -> Vec<u8> {
    let mut w = ConstantWriter::new();
    w.i32(input.width as i32)
        .i32(input.height as i32)
        .i32(output.width as i32)
        .i32(output.height as i32);
    w.finish()
}

/// Output size for the copy and invert test shaders
pub fn size_constants(output: Dimensions) -> Vec<u8> {
    let mut w = ConstantWriter::new();
    w.u32(output.width).u32(output.height).u32(0).u32(0);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_pads_to_16() {
        let mut w = ConstantWriter::new();
        w.f32(1.0).u32(2).i32(-3);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(-3i32).to_le_bytes());
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_half_conversion() {
        assert_eq!(f32_to_f16_bits(0.0), 0x0000);
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(-2.0), 0xc000);
        assert_eq!(f32_to_f16_bits(0.5), 0x3800);
        assert_eq!(f32_to_f16_bits(65504.0), 0x7bff);
        assert_eq!(f32_to_f16_bits(1.0e6), 0x7c00);
    }

    #[test]
    fn test_easu_constants() {
        let c = Fsr1EasuConstants::new(Dimensions::new(1920, 1080), Dimensions::new(3840, 2160));
        assert_eq!(f32::from_bits(c.con0[0]), 0.5);
        assert_eq!(f32::from_bits(c.con0[2]), -0.25);
        assert_eq!(f32::from_bits(c.con3[1]), 4.0 / 1080.0);
        assert_eq!(c.to_bytes().len(), 80);
    }

    #[test]
    fn test_rcas_constants() {
        let c = Fsr1RcasConstants::new(0.0);
        assert_eq!(f32::from_bits(c.con0[0]), 1.0);
        assert_eq!(c.con0[1], 0x3c00_3c00);

        let rcas = RcasConstants::new(Dimensions::new(2560, 1440));
        let bytes = rcas.to_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[44..48], &2560i32.to_le_bytes());
    }

    #[test]
    fn test_cas_constants() {
        let c = CasConstants::new(Dimensions::new(1000, 500));
        assert_eq!(c.px, 0.001);
        assert_eq!(c.wh, [1000.0, 500.0]);
        assert_eq!(c.to_bytes().len(), 32);
    }
}
