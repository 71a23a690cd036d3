use anyhow::{anyhow, Result};
use plotters::style::RGBColor;

/// Continuous color scales over [0, 1], after the matplotlib maps of the
/// same names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorScale {
    Reds,
    CmrMap,
    Hot,
}

// (position, r, g, b) stops, linear in between.
const REDS: &[(f64, [u8; 3])] = &[
    (0.000, [0xff, 0xf5, 0xf0]),
    (0.125, [0xfe, 0xe0, 0xd2]),
    (0.250, [0xfc, 0xbb, 0xa1]),
    (0.375, [0xfc, 0x92, 0x72]),
    (0.500, [0xfb, 0x6a, 0x4a]),
    (0.625, [0xef, 0x3b, 0x2c]),
    (0.750, [0xcb, 0x18, 0x1d]),
    (0.875, [0xa5, 0x0f, 0x15]),
    (1.000, [0x67, 0x00, 0x0d]),
];

const CMRMAP: &[(f64, [u8; 3])] = &[
    (0.000, [0, 0, 0]),
    (0.125, [38, 38, 128]),
    (0.250, [77, 38, 191]),
    (0.375, [153, 51, 128]),
    (0.500, [255, 64, 38]),
    (0.625, [230, 128, 0]),
    (0.750, [230, 191, 26]),
    (0.875, [230, 230, 128]),
    (1.000, [255, 255, 255]),
];

const HOT: &[(f64, [u8; 3])] = &[
    (0.000, [11, 0, 0]),
    (0.365, [255, 0, 0]),
    (0.746, [255, 255, 0]),
    (1.000, [255, 255, 255]),
];

impl ColorScale {
    fn stops(self) -> &'static [(f64, [u8; 3])] {
        match self {
            ColorScale::Reds => REDS,
            ColorScale::CmrMap => CMRMAP,
            ColorScale::Hot => HOT,
        }
    }

    /// Color for `value`, clamped to [0, 1].
    pub fn color(self, value: f64) -> RGBColor {
        let stops = self.stops();
        let t = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

        let upper = stops
            .iter()
            .position(|&(pos, _)| pos >= t)
            .unwrap_or(stops.len() - 1)
            .max(1);
        let (p0, c0) = stops[upper - 1];
        let (p1, c1) = stops[upper];
        let w = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * w).round() as u8;
        RGBColor(mix(c0[0], c1[0]), mix(c0[1], c1[1]), mix(c0[2], c1[2]))
    }

    /// `cells` evenly spaced legend values `i / cells`.
    pub fn ramp(cells: usize) -> Vec<f64> {
        (0..cells).map(|i| i as f64 / cells as f64).collect()
    }
}

/// Categorical colors for ward boundary maps, picked by ward number.
pub const WARD_PALETTE: [&str; 7] = [
    "#E24A33", "#348ABD", "#988ED5", "#777777", "#FBC15E", "#8EBA42", "#FFB5B8",
];

pub fn ward_color(ward: u32) -> Result<RGBColor> {
    hex_to_rgb(WARD_PALETTE[ward as usize % WARD_PALETTE.len()])
}

pub fn hex_to_rgb(hex: &str) -> Result<RGBColor> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(anyhow!("Expected a #rrggbb color, got {:?}", hex));
    }
    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|e| anyhow!("Bad color {:?}: {}", hex, e))
    };
    Ok(RGBColor(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ends_of_the_scale_match_stops() {
        assert_eq!(ColorScale::Reds.color(0.0), RGBColor(0xff, 0xf5, 0xf0));
        assert_eq!(ColorScale::Reds.color(1.0), RGBColor(0x67, 0x00, 0x0d));
        assert_eq!(ColorScale::CmrMap.color(0.0), RGBColor(0, 0, 0));
        assert_eq!(ColorScale::Hot.color(1.0), RGBColor(255, 255, 255));
    }

    #[test]
    fn out_of_range_values_clamp() {
        assert_eq!(ColorScale::Reds.color(-3.0), ColorScale::Reds.color(0.0));
        assert_eq!(ColorScale::Hot.color(7.5), ColorScale::Hot.color(1.0));
        assert_eq!(ColorScale::CmrMap.color(f64::NAN), ColorScale::CmrMap.color(0.0));
    }

    #[test]
    fn interpolates_between_stops() {
        // Halfway between the first two Reds stops.
        let c = ColorScale::Reds.color(0.0625);
        assert_eq!(c, RGBColor(0xff, 0xeb, 0xe1));
        // Reds gets darker as the share grows.
        let lum = |c: RGBColor| c.0 as u32 + c.1 as u32 + c.2 as u32;
        assert!(lum(ColorScale::Reds.color(0.2)) > lum(ColorScale::Reds.color(0.8)));
    }

    #[test]
    fn legend_ramp() {
        let ramp = ColorScale::ramp(25);
        assert_eq!(ramp.len(), 25);
        assert_eq!(ramp[0], 0.0);
        assert!((ramp[24] - 0.96).abs() < 1e-12);
    }

    #[test]
    fn palette_cycles_by_ward() {
        assert_eq!(ward_color(0).unwrap(), RGBColor(0xE2, 0x4A, 0x33));
        assert_eq!(ward_color(7).unwrap(), ward_color(0).unwrap());
        assert!(hex_to_rgb("#12345").is_err());
        assert!(hex_to_rgb("zz0000").is_err());
    }
}
