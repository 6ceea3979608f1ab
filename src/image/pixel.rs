//! Decoded pixel samples and the composite operator `C` (§3).
//!
//! Active pixel records on the wire are packed, format-dependent bytes
//! (`color? ++ depth?`, per §4.1). [`Sample`] is the decoded, in-memory
//! counterpart used by the codec and the compositor; [`decode`]/[`encode`]
//! convert between the two without going through an intermediate format
//! that would lose bits for the common "just copy the winning operand"
//! path.

use crate::options::{ColorFormat, CompositeMode, DepthFormat, ImageFormat};
use bytes::BytesMut;

/// A decoded color value, kept in its wire-native representation so that
/// simply picking a winning operand (the z-buffer path) never touches a
/// float conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorSample {
    /// 4×8-bit RGBA.
    U8([u8; 4]),
    /// 4×32-bit float RGBA.
    F32([f32; 4]),
}

impl ColorSample {
    /// This sample's color as RGBA float in `0.0..=1.0`, for blend math.
    #[must_use]
    pub fn as_f32(self) -> [f32; 4] {
        match self {
            Self::U8([r, g, b, a]) => [
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
                f32::from(a) / 255.0,
            ],
            Self::F32(v) => v,
        }
    }

    fn from_f32(format: ColorFormat, v: [f32; 4]) -> Self {
        match format {
            ColorFormat::RgbaFloat => Self::F32(v),
            _ => Self::U8(v.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)),
        }
    }
}

/// One decoded active-pixel record: color and/or depth, per whichever
/// planes the session's [`ImageFormat`] carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Decoded color, or `None` if this session carries no color plane.
    pub color: Option<ColorSample>,
    /// Decoded depth, or `None` if this session carries no depth plane.
    pub depth: Option<f32>,
}

/// Whether a sample counts as "active" under the session's composite mode
/// (§4.1): inactive if depth-test compositing is in use and depth is
/// `f32::MAX`, or if blend compositing is in use and alpha is zero.
#[must_use]
pub fn is_active(mode: CompositeMode, sample: &Sample) -> bool {
    match mode {
        CompositeMode::ZBuffer => sample.depth != Some(f32::MAX),
        CompositeMode::AlphaBlend => sample
            .color
            .map(|c| c.as_f32()[3] != 0.0)
            .unwrap_or(true),
    }
}

/// Decode one active-pixel record from `bytes` (must hold at least
/// `format.active_pixel_bytes()` bytes), per the fixed plane order
/// `color? ++ depth?`.
#[must_use]
pub fn decode(format: ImageFormat, bytes: &[u8]) -> Sample {
    let mut off = 0usize;
    let color = match format.color {
        ColorFormat::None => None,
        ColorFormat::RgbaUbyte => {
            let c = [bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]];
            off += 4;
            Some(ColorSample::U8(c))
        }
        ColorFormat::RgbaFloat => {
            let mut c = [0f32; 4];
            for slot in &mut c {
                *slot = f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
                off += 4;
            }
            Some(ColorSample::F32(c))
        }
    };
    let depth = match format.depth {
        DepthFormat::None => None,
        DepthFormat::Float => Some(f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap())),
    };
    Sample { color, depth }
}

/// Append the wire encoding of `sample` to `out`, in the same plane order
/// `decode` expects.
pub fn encode(sample: &Sample, out: &mut BytesMut) {
    if let Some(color) = sample.color {
        match color {
            ColorSample::U8(bytes) => out.extend_from_slice(&bytes),
            ColorSample::F32(v) => {
                for c in v {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
        }
    }
    if let Some(depth) = sample.depth {
        out.extend_from_slice(&depth.to_le_bytes());
    }
}

/// Combine two *active* samples under the session's composite mode.
///
/// `front` is the nearer operand in composite order (used only by
/// `AlphaBlend`); `back` is the farther one. Depth comparison is strict
/// `<` with ties favoring `front` (§4.1 numerics).
///
/// Alpha blending uses straight (non-premultiplied) alpha and implements
/// the standard Porter-Duff "`front` over `back`" equation.
#[must_use]
pub fn combine(mode: CompositeMode, format: ImageFormat, front: Sample, back: Sample) -> Sample {
    match mode {
        CompositeMode::ZBuffer => {
            let front_depth = front.depth.unwrap_or(0.0);
            let back_depth = back.depth.unwrap_or(0.0);
            if front_depth <= back_depth {
                front
            } else {
                back
            }
        }
        CompositeMode::AlphaBlend => {
            let fc = front.color.map(ColorSample::as_f32).unwrap_or([0.0; 4]);
            let bc = back.color.map(ColorSample::as_f32).unwrap_or([0.0; 4]);
            let fa = fc[3];
            let mut out = [0f32; 4];
            for i in 0..3 {
                out[i] = fc[i].mul_add(fa, bc[i] * (1.0 - fa));
            }
            out[3] = fa + bc[3] * (1.0 - fa);
            let color = format
                .color
                .ne(&ColorFormat::None)
                .then(|| ColorSample::from_f32(format.color, out));
            Sample {
                color,
                depth: front.depth.or(back.depth),
            }
        }
    }
}

/// Combine two samples where either (or both) may be inactive: inactive in
/// both inputs is inactive in the output; otherwise the active one wins
/// outright (compositing an active pixel with "nothing" yields the active
/// pixel unchanged), matching `composite`'s contract in §4.1.
#[must_use]
pub fn combine_optional(
    mode: CompositeMode,
    format: ImageFormat,
    front: Option<Sample>,
    back: Option<Sample>,
) -> Option<Sample> {
    match (front, back) {
        (None, None) => None,
        (Some(f), None) => Some(f),
        (None, Some(b)) => Some(b),
        (Some(f), Some(b)) => Some(combine(mode, format, f, b)),
    }
}
