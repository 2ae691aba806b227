// ── Color transform ──
//
// sRGB <-> CIE 1931 xy conversion and gamut-triangle clamping. Pure
// functions; the gamut is only used for outbound writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An 8-bit sRGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A chromaticity coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

impl Xy {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Parse `{"x": .., "y": ..}`.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            x: value.get("x")?.as_f64()?,
            y: value.get("y")?.as_f64()?,
        })
    }
}

/// The triangle of chromaticities a light can reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gamut {
    pub red: Xy,
    pub green: Xy,
    pub blue: Xy,
}

impl Gamut {
    /// Parse a light's `color.gamut` object.
    pub fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            red: Xy::from_value(value.get("red")?)?,
            green: Xy::from_value(value.get("green")?)?,
            blue: Xy::from_value(value.get("blue")?)?,
        })
    }

    /// Signed-area containment test; points on an edge count as inside.
    pub fn contains(&self, p: Xy) -> bool {
        let d1 = edge_sign(p, self.red, self.green);
        let d2 = edge_sign(p, self.green, self.blue);
        let d3 = edge_sign(p, self.blue, self.red);

        let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
        let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
        !(has_neg && has_pos)
    }

    /// Return `p` unchanged if reproducible, otherwise the nearest point
    /// on the triangle's boundary.
    pub fn clamp(&self, p: Xy) -> Xy {
        if self.contains(p) {
            return p;
        }

        [
            closest_point_on_segment(self.red, self.green, p),
            closest_point_on_segment(self.green, self.blue, p),
            closest_point_on_segment(self.blue, self.red, p),
        ]
        .into_iter()
        .min_by(|a, b| distance_sq(*a, p).total_cmp(&distance_sq(*b, p)))
        .unwrap_or(p)
    }

    /// The gamut as `[[x, y]; 3]` (red, green, blue) for metadata.
    pub fn to_points(&self) -> Value {
        serde_json::json!([
            [self.red.x, self.red.y],
            [self.green.x, self.green.y],
            [self.blue.x, self.blue.y],
        ])
    }
}

// ── Conversions ──────────────────────────────────────────────────────

/// Convert sRGB to xy chromaticity. Black maps to `(0, 0)`.
pub fn rgb_to_xy(rgb: Rgb) -> Xy {
    let r = gamma_expand(f64::from(rgb.r) / 255.0);
    let g = gamma_expand(f64::from(rgb.g) / 255.0);
    let b = gamma_expand(f64::from(rgb.b) / 255.0);

    let x = r * 0.664_511 + g * 0.154_324 + b * 0.162_028;
    let y = r * 0.283_881 + g * 0.668_433 + b * 0.047_685;
    let z = r * 0.000_088 + g * 0.072_310 + b * 0.986_039;

    let sum = x + y + z;
    if sum <= 0.0 {
        return Xy::new(0.0, 0.0);
    }
    Xy::new(x / sum, y / sum)
}

/// Convert xy chromaticity at full luminance to sRGB.
pub fn xy_to_rgb(xy: Xy) -> Rgb {
    if xy.y <= 0.0 {
        return Rgb::new(0, 0, 0);
    }

    let lum = 1.0;
    let x = (lum / xy.y) * xy.x;
    let z = (lum / xy.y) * (1.0 - xy.x - xy.y);

    let mut r = x * 1.656_492 - lum * 0.354_851 - z * 0.255_038;
    let mut g = -x * 0.707_196 + lum * 1.655_397 + z * 0.036_152;
    let mut b = x * 0.051_713 - lum * 0.121_364 + z * 1.011_530;

    let max = r.max(g).max(b);
    if max > 1.0 {
        r /= max;
        g /= max;
        b /= max;
    }

    Rgb::new(
        to_channel(gamma_compress(r)),
        to_channel(gamma_compress(g)),
        to_channel(gamma_compress(b)),
    )
}

// ── Helpers ──────────────────────────────────────────────────────────

fn gamma_expand(c: f64) -> f64 {
    if c > 0.040_45 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    }
}

fn gamma_compress(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn to_channel(c: f64) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn edge_sign(p: Xy, a: Xy, b: Xy) -> f64 {
    (p.x - b.x) * (a.y - b.y) - (a.x - b.x) * (p.y - b.y)
}

fn closest_point_on_segment(a: Xy, b: Xy, p: Xy) -> Xy {
    let ab = Xy::new(b.x - a.x, b.y - a.y);
    let len_sq = ab.x * ab.x + ab.y * ab.y;
    if len_sq <= f64::EPSILON {
        return a;
    }
    let t = (((p.x - a.x) * ab.x + (p.y - a.y) * ab.y) / len_sq).clamp(0.0, 1.0);
    Xy::new(a.x + ab.x * t, a.y + ab.y * t)
}

fn distance_sq(a: Xy, b: Xy) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}
