use crate::colormap::ColorScale;
use crate::config::MapConfig;
use crate::data::Feature;
use crate::geometry::{ShapeKind, ShapeRecord};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const LEGEND_CELLS: usize = 25;
const TITLE_SIZE: f64 = 22.0;

/// Geographic extent of a map in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn from_config(config: &MapConfig) -> Self {
        let [ll_lat, ll_lon] = config.lower_left;
        let [ur_lat, ur_lon] = config.upper_right;
        Bounds {
            min_lon: ll_lon.min(ur_lon),
            min_lat: ll_lat.min(ur_lat),
            max_lon: ll_lon.max(ur_lon),
            max_lat: ll_lat.max(ur_lat),
        }
    }
}

// Mercator northing in radians, same form as the slippy-map tile maths.
fn mercator_y(lat: f64) -> f64 {
    let lat_rad = lat.to_radians();
    (lat_rad.tan() + (1.0 / lat_rad.cos())).ln()
}

/// Mercator projection of `Bounds` fitted into a pixel area, north up,
/// aspect ratio preserved and centered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapFrame {
    x_min: f64,
    y_max: f64,
    scale: f64,
    offset: (f64, f64),
    extent: (f64, f64),
}

impl MapFrame {
    pub fn fit(bounds: &Bounds, (width, height): (u32, u32)) -> Self {
        let x_min = bounds.min_lon.to_radians();
        let x_max = bounds.max_lon.to_radians();
        let y_min = mercator_y(bounds.min_lat);
        let y_max = mercator_y(bounds.max_lat);

        let (dx, dy) = ((x_max - x_min).max(f64::EPSILON), (y_max - y_min).max(f64::EPSILON));
        let scale = (width as f64 / dx).min(height as f64 / dy);
        let extent = (dx * scale, dy * scale);
        let offset = ((width as f64 - extent.0) / 2.0, (height as f64 - extent.1) / 2.0);

        MapFrame { x_min, y_max, scale, offset, extent }
    }

    /// lon/lat to pixel coordinates within the map area.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            self.offset.0 + (lon.to_radians() - self.x_min) * self.scale,
            self.offset.1 + (self.y_max - mercator_y(lat)) * self.scale,
        )
    }

    /// Pixel rectangle covered by the bounds.
    pub fn extent_px(&self) -> [(i32, i32); 2] {
        [
            to_px((self.offset.0, self.offset.1)),
            to_px((self.offset.0 + self.extent.0, self.offset.1 + self.extent.1)),
        ]
    }
}

fn to_px((x, y): (f64, f64)) -> (i32, i32) {
    (x.round() as i32, y.round() as i32)
}

/// Explicit drawing context for one map panel.
pub struct MapCanvas<'a, 'b> {
    area: &'a DrawingArea<BitMapBackend<'b>, Shift>,
    frame: MapFrame,
}

impl MapCanvas<'_, '_> {
    fn pixel_segments(&self, shape: &ShapeRecord) -> Vec<Vec<(i32, i32)>> {
        shape
            .segments(|lon, lat| self.frame.project(lon, lat))
            .into_iter()
            .map(|seg| seg.into_iter().map(to_px).collect())
            .collect()
    }

    /// Fill the outer rings of a polygon shape. Polylines have nothing to fill.
    pub fn fill_shape(&self, shape: &ShapeRecord, color: RGBColor) -> Result<()> {
        if shape.kind != ShapeKind::Polygon {
            return Ok(());
        }
        for (i, seg) in self.pixel_segments(shape).into_iter().enumerate() {
            if shape.is_hole(i) || seg.len() < 3 {
                continue;
            }
            self.area.draw(&Polygon::new(seg, color.filled()))?;
        }
        Ok(())
    }

    pub fn outline_shape(&self, shape: &ShapeRecord, color: RGBColor, width: u32) -> Result<()> {
        for seg in self.pixel_segments(shape) {
            if seg.len() < 2 {
                continue;
            }
            self.area.draw(&PathElement::new(seg, color.stroke_width(width)))?;
        }
        Ok(())
    }

    /// Frame around the mapped extent.
    pub fn draw_boundary(&self) -> Result<()> {
        self.area
            .draw(&Rectangle::new(self.frame.extent_px(), BLACK.stroke_width(1)))?;
        Ok(())
    }
}

/// Fill each feature with `scale.color(value)`. Features whose value is
/// `None` are left out; returns how many were drawn.
pub fn fill_choropleth<F>(canvas: &MapCanvas, features: &[Feature], scale: ColorScale, mut value: F) -> Result<usize>
where
    F: FnMut(&Feature) -> Option<f64>,
{
    let mut drawn = 0;
    for feature in features {
        if let Some(v) = value(feature) {
            canvas.fill_shape(&feature.shape, scale.color(v))?;
            drawn += 1;
        }
    }
    Ok(drawn)
}

pub fn outline_features(canvas: &MapCanvas, features: &[Feature], color: RGBColor, width: u32) -> Result<()> {
    for feature in features {
        canvas.outline_shape(&feature.shape, color, width)?;
    }
    Ok(())
}

fn draw_legend(area: &DrawingArea<BitMapBackend, Shift>, scale: ColorScale) -> Result<()> {
    let (w, h) = area.dim_in_pixel();
    let (w, h) = (w as i32, h as i32);
    let margin_x = (w / 10).max(1);
    let (top, bottom) = (h / 5, h - h / 5);
    let cell = (w - 2 * margin_x) as f64 / LEGEND_CELLS as f64;

    for (i, v) in ColorScale::ramp(LEGEND_CELLS).into_iter().enumerate() {
        let x0 = margin_x + (i as f64 * cell).round() as i32;
        let x1 = margin_x + ((i + 1) as f64 * cell).round() as i32;
        area.draw(&Rectangle::new([(x0, top), (x1, bottom)], scale.color(v).filled()))?;
    }
    area.draw(&Rectangle::new(
        [(margin_x, top), (w - margin_x, bottom)],
        BLACK.stroke_width(1),
    ))?;
    Ok(())
}

/// What goes around the map in a panel.
#[derive(Debug, Clone, Default)]
pub struct PanelStyle {
    pub title: Option<String>,
    pub legend: Option<ColorScale>,
}

/// Side-by-side map panels rendered into an RGB buffer.
pub struct Figure {
    width: u32,
    height: u32,
    panels: usize,
    legend_height: u32,
    buffer: Vec<u8>,
}

impl Figure {
    pub fn new(panels: usize, config: &MapConfig) -> Self {
        let panels = panels.max(1);
        let width = config.panel_width.max(1) * panels as u32;
        let height = config.panel_height.max(1);
        Figure {
            width,
            height,
            panels,
            legend_height: config.legend_height.min(height / 2),
            buffer: vec![255; (width * height * 3) as usize],
        }
    }

    pub fn draw_panel<F>(&mut self, index: usize, bounds: &Bounds, style: &PanelStyle, draw: F) -> Result<()>
    where
        F: FnOnce(&MapCanvas) -> Result<()>,
    {
        let (width, height, panels, legend_height) = (self.width, self.height, self.panels, self.legend_height);
        let root = BitMapBackend::with_buffer(&mut self.buffer, (width, height)).into_drawing_area();
        let panel = root
            .split_evenly((1, panels))
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow!("Panel {} out of range (figure has {})", index, panels))?;

        let panel = match &style.title {
            Some(title) => match panel.titled(title, FontDesc::new(FontFamily::SansSerif, TITLE_SIZE, FontStyle::Normal)) {
                Ok(area) => area,
                Err(e) => {
                    warn!("Could not draw title {:?}: {}", title, e);
                    panel
                }
            },
            None => panel,
        };

        let (_, panel_h) = panel.dim_in_pixel();
        let (map_area, legend_area) = match style.legend {
            Some(_) => {
                let (m, l) = panel.split_vertically(panel_h.saturating_sub(legend_height) as i32);
                (m, Some(l))
            }
            None => (panel, None),
        };

        let canvas = MapCanvas {
            area: &map_area,
            frame: MapFrame::fit(bounds, map_area.dim_in_pixel()),
        };
        canvas.draw_boundary()?;
        draw(&canvas)?;

        if let (Some(scale), Some(area)) = (style.legend, legend_area) {
            draw_legend(&area, scale)?;
        }
        root.present()?;
        Ok(())
    }

    /// Encode as PNG (format picked from the extension).
    pub fn save(self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
        let image = RgbImage::from_raw(self.width, self.height, self.buffer)
            .ok_or_else(|| anyhow!("Figure buffer does not match its size"))?;
        image
            .save(path)
            .with_context(|| format!("Failed to save figure {:?}", path))?;
        info!("Figure written to {:?}", path);
        Ok(())
    }

    #[cfg(test)]
    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.buffer[i], self.buffer[i + 1], self.buffer[i + 2]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Part;
    use crate::types::Attributes;

    fn bounds() -> Bounds {
        Bounds { min_lon: -1.0, min_lat: -1.0, max_lon: 1.0, max_lat: 1.0 }
    }

    fn config() -> MapConfig {
        MapConfig {
            panel_width: 100,
            panel_height: 120,
            legend_height: 20,
            ..MapConfig::default()
        }
    }

    fn square(lon: f64, lat: f64, size: f64) -> Feature {
        let ring = vec![(lon, lat), (lon + size, lat), (lon + size, lat + size), (lon, lat + size), (lon, lat)];
        Feature::new(ShapeRecord::from_parts(ShapeKind::Polygon, vec![Part::outer(ring)], Attributes::default()).unwrap())
    }

    #[test]
    fn frame_is_north_up_and_inside_the_area() {
        let chicago = Bounds::from_config(&MapConfig::default());
        let frame = MapFrame::fit(&chicago, (400, 500));
        let (x0, y0) = frame.project(chicago.min_lon, chicago.min_lat);
        let (x1, y1) = frame.project(chicago.max_lon, chicago.max_lat);
        assert!(x0 >= -0.5 && x1 <= 400.5, "{} {}", x0, x1);
        assert!(y1 >= -0.5 && y0 <= 500.5, "{} {}", y0, y1);
        assert!(y1 < y0);
        // One side fills the area exactly.
        assert!(((x1 - x0) - 400.0).abs() < 1e-6 || ((y0 - y1) - 500.0).abs() < 1e-6);
    }

    #[test]
    fn choropleth_fills_and_skips() {
        let mut figure = Figure::new(1, &config());
        let features = vec![square(-1.0, -1.0, 2.0), square(0.5, 0.5, 0.2)];
        let mut drawn = 0;
        figure
            .draw_panel(0, &bounds(), &PanelStyle { title: None, legend: Some(ColorScale::Reds) }, |canvas| {
                drawn = fill_choropleth(canvas, &features, ColorScale::Reds, |f| {
                    if f.shape.points()[0].0 < 0.0 { Some(1.0) } else { None }
                })?;
                Ok(())
            })
            .unwrap();

        assert_eq!(drawn, 1);
        let dark = ColorScale::Reds.color(1.0);
        assert_eq!(figure.pixel(50, 50), [dark.0, dark.1, dark.2]);
        // Legend strip sits below the map and is not blank.
        assert_ne!(figure.pixel(50, 110), [255, 255, 255]);
    }

    #[test]
    fn panels_are_side_by_side() {
        let mut figure = Figure::new(2, &config());
        assert_eq!((figure.width, figure.height), (200, 120));
        let style = PanelStyle::default();
        figure
            .draw_panel(1, &bounds(), &style, |canvas| canvas.fill_shape(&square(-1.0, -1.0, 2.0).shape, BLUE))
            .unwrap();
        assert_eq!(figure.pixel(150, 60), [0, 0, 255]);
        assert_eq!(figure.pixel(50, 60), [255, 255, 255]);
        assert!(figure.draw_panel(2, &bounds(), &style, |_| Ok(())).is_err());
    }
}
