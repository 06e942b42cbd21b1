//! Colors, the cluster palette and the colormaps of image visuals.
use once_cell::sync::OnceCell;
use regex::Regex;
use thiserror::Error;

use crate::lerp::{InverseLerp, Lerp};

/// The sRGB color space with a D65 white point and 8-bit values.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SRgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl SRgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_f32(self) -> [f32; 3] {
        [
            (self.r as f32) / 255.0,
            (self.g as f32) / 255.0,
            (self.b as f32) / 255.0,
        ]
    }

    pub fn with_alpha(self, alpha: f32) -> Rgba {
        let [r, g, b] = self.to_f32();
        Rgba { r, g, b, a: alpha }
    }
}

/// A color with straight alpha and channels in `[0, 1]`, as uploaded to the
/// GPU.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.a = alpha;
        self
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_array([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorParseError {
    #[error("unrecognized color {0:?}")]
    Unrecognized(String),
    #[error("alpha of color {0:?} is not in the range [0, 1]")]
    InvalidAlpha(String),
}

/// Parses a color name, a `#rrggbb` value or an `rgb(r g b [a])` string.
pub fn parse_css(css: &str) -> Result<Rgba, ColorParseError> {
    let css = css.trim();
    if let Some(color) = resolve_named(css) {
        Ok(color.with_alpha(1.0))
    } else if let Some(hex) = css.strip_prefix('#') {
        resolve_hex(hex).ok_or_else(|| ColorParseError::Unrecognized(css.into()))
    } else if css.starts_with("rgb") {
        resolve_rgb(css)
    } else {
        Err(ColorParseError::Unrecognized(css.into()))
    }
}

fn resolve_named(name: &str) -> Option<SRgb> {
    let [r, g, b] = match name {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "gray" | "grey" => [128, 128, 128],
        "darkgray" | "darkgrey" => [169, 169, 169],
        "lightgray" | "lightgrey" => [211, 211, 211],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "cyan" | "aqua" => [0, 255, 255],
        "magenta" | "fuchsia" => [255, 0, 255],
        _ => return None,
    };

    Some(SRgb { r, g, b })
}

fn resolve_hex(hex: &str) -> Option<Rgba> {
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();

    Some(SRgb::new(channel(0)?, channel(2)?, channel(4)?).with_alpha(1.0))
}

fn resolve_rgb(rgba: &str) -> Result<Rgba, ColorParseError> {
    static MATCHER: OnceCell<Regex> = OnceCell::new();
    let matcher = MATCHER.get_or_init(|| Regex::new("^rgb\\((?<R>((25[0-5])|(2[0-4][0-9]{1})|([0-1]?[0-9]{1,2}))) (?<G>((25[0-5])|(2[0-4][0-9]{1})|([0-1]?[0-9]{1,2}))) (?<B>((25[0-5])|(2[0-4][0-9]{1})|([0-1]?[0-9]{1,2})))( (?<A>[+-]?([0-9]*[.])?[0-9]+))?\\)$").unwrap());
    let unrecognized = || ColorParseError::Unrecognized(rgba.into());
    let captures = matcher.captures(rgba).ok_or_else(unrecognized)?;

    let channel = |name: &str| {
        captures
            .name(name)
            .and_then(|m| m.as_str().parse::<u8>().ok())
            .ok_or_else(unrecognized)
    };
    let color = SRgb::new(channel("R")?, channel("G")?, channel("B")?);
    let a = match captures.name("A") {
        Some(m) => m.as_str().parse::<f32>().map_err(|_| unrecognized())?,
        None => 1.0,
    };
    if !(0.0..=1.0).contains(&a) {
        return Err(ColorParseError::InvalidAlpha(rgba.into()));
    }

    Ok(color.with_alpha(a))
}

/// Categorical palette used for the selected clusters.
pub const CLUSTER_PALETTE: [SRgb; 12] = [
    SRgb::new(31, 119, 180),
    SRgb::new(255, 127, 14),
    SRgb::new(44, 160, 44),
    SRgb::new(214, 39, 40),
    SRgb::new(148, 103, 189),
    SRgb::new(140, 86, 75),
    SRgb::new(227, 119, 194),
    SRgb::new(188, 189, 34),
    SRgb::new(23, 190, 207),
    SRgb::new(174, 199, 232),
    SRgb::new(255, 187, 120),
    SRgb::new(152, 223, 138),
];

/// Color of the `index`-th selected cluster.
pub fn selection_color(index: usize, alpha: f32) -> Rgba {
    CLUSTER_PALETTE[index % CLUSTER_PALETTE.len()].with_alpha(alpha)
}

/// Continuous colormaps of image visuals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Colormap {
    #[default]
    Viridis,
    Gray,
}

impl Colormap {
    fn stops(self) -> &'static [SRgb] {
        const VIRIDIS: [SRgb; 5] = [
            SRgb::new(68, 1, 84),
            SRgb::new(59, 82, 139),
            SRgb::new(33, 145, 140),
            SRgb::new(94, 201, 98),
            SRgb::new(253, 231, 37),
        ];
        const GRAY: [SRgb; 2] = [SRgb::new(0, 0, 0), SRgb::new(255, 255, 255)];

        match self {
            Colormap::Viridis => &VIRIDIS,
            Colormap::Gray => &GRAY,
        }
    }

    /// Color of `value` mapped from `[min, max]`; values outside are clamped
    /// and non-finite values are transparent.
    pub fn sample(self, value: f32, min: f32, max: f32) -> Rgba {
        if !value.is_finite() {
            return Rgba::new(0.0, 0.0, 0.0, 0.0);
        }

        let t = if max > min {
            value.inv_lerp(min, max).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let stops = self.stops();
        let scaled = t * (stops.len() - 1) as f64;
        let i = (scaled.floor() as usize).min(stops.len() - 2);
        let color = stops[i].to_f32().lerp(stops[i + 1].to_f32(), scaled - i as f64);

        let [r, g, b] = color;
        Rgba::new(r, g, b, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_colors_are_parsed() {
        assert_eq!(parse_css("black"), Ok(Rgba::BLACK));
        assert_eq!(parse_css("#ff0000"), Ok(Rgba::new(1.0, 0.0, 0.0, 1.0)));
        assert_eq!(
            parse_css("rgb(255 255 255 0.5)"),
            Ok(Rgba::new(1.0, 1.0, 1.0, 0.5))
        );
        assert_eq!(
            parse_css("rgb(0 0 0 2)"),
            Err(ColorParseError::InvalidAlpha("rgb(0 0 0 2)".into()))
        );
        assert_eq!(
            parse_css("rgb(256 0 0)"),
            Err(ColorParseError::Unrecognized("rgb(256 0 0)".into()))
        );
        assert!(parse_css("#12345").is_err());
        assert!(parse_css("chartreuse-ish").is_err());
    }

    #[test]
    fn colormaps_hit_their_end_stops() {
        let low = Colormap::Gray.sample(-3.0, 0.0, 10.0);
        let high = Colormap::Gray.sample(10.0, 0.0, 10.0);
        assert_eq!(low, Rgba::BLACK);
        assert_eq!(high, Rgba::WHITE);

        let mid = Colormap::Gray.sample(5.0, 0.0, 10.0);
        assert!((mid.r - 0.5).abs() < 1e-6);
        assert_eq!(Colormap::Viridis.sample(f32::NAN, 0.0, 1.0).a, 0.0);
    }

    #[test]
    fn palette_wraps_around() {
        assert_eq!(selection_color(0, 1.0), selection_color(12, 1.0));
        assert_ne!(selection_color(0, 1.0), selection_color(1, 1.0));
    }
}
