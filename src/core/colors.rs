use crate::domain::model::ColorPalette;
use crate::utils::error::{Result, TractError};
use crate::utils::validation::{validate_hex_color, validate_range};

pub const DEFAULT_SATURATION: f64 = 0.7;
pub const DEFAULT_VALUE: f64 = 0.95;

/// 產生或驗證每個分群的顏色
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAssigner {
    saturation: f64,
    value: f64,
}

impl Default for ColorAssigner {
    fn default() -> Self {
        Self {
            saturation: DEFAULT_SATURATION,
            value: DEFAULT_VALUE,
        }
    }
}

impl ColorAssigner {
    pub fn new(saturation: f64, value: f64) -> Result<Self> {
        validate_range("colors.saturation", saturation, 0.0, 1.0)?;
        validate_range("colors.value", value, 0.0, 1.0)?;
        Ok(Self { saturation, value })
    }

    /// `k` colors with hues evenly spaced by `360 / k` degrees, starting at red.
    /// Pure: the same `k` always gives the same palette.
    pub fn generate(&self, k: usize) -> ColorPalette {
        let colors = (0..k)
            .map(|i| {
                let hue = i as f64 / k as f64;
                let (r, g, b) = hsv_to_rgb(hue, self.saturation, self.value);
                format!("#{:02X}{:02X}{:02X}", to_byte(r), to_byte(g), to_byte(b))
            })
            .collect();
        ColorPalette::new(colors)
    }

    /// Uses the caller palette verbatim when given, otherwise generates one.
    pub fn assign(&self, k: usize, supplied: Option<&[String]>) -> Result<ColorPalette> {
        match supplied {
            Some(colors) => {
                if colors.len() != k {
                    return Err(TractError::PaletteSizeMismatch {
                        expected: k,
                        got: colors.len(),
                    });
                }
                for color in colors {
                    validate_hex_color(color)?;
                }
                Ok(ColorPalette::new(colors.to_vec()))
            }
            None => Ok(self.generate(k)),
        }
    }
}

fn to_byte(channel: f64) -> u8 {
    // 截斷而非四捨五入
    (channel * 255.0).clamp(0.0, 255.0) as u8
}

/// HSV in `[0, 1]` to RGB in `[0, 1]`.
fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (v, v, v);
    }
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}
