use crate::geometry::{Part, ShapeKind, ShapeRecord};
use crate::projection::Reprojector;
use crate::types::{AttrValue, Attributes};
use anyhow::{anyhow, Context, Result};
use geo::MultiPolygon;
use shapefile::dbase::{FieldValue, Record};
use shapefile::{PolygonRing, Reader, Shape};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A shape in lon/lat with its polygon form (polygon layers only).
#[derive(Debug, Clone)]
pub struct Feature {
    pub shape: ShapeRecord,
    pub geometry: Option<MultiPolygon<f64>>,
}

impl Feature {
    pub fn new(shape: ShapeRecord) -> Self {
        let geometry = shape.to_multi_polygon();
        Feature { shape, geometry }
    }

    pub fn attributes(&self) -> &Attributes {
        &self.shape.attributes
    }
}

#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub features: Vec<Feature>,
}

impl Layer {
    pub fn find_by_u32(&self, field: &str, value: u32) -> Option<&Feature> {
        self.features
            .iter()
            .find(|f| f.attributes().get_u32(field) == Some(value))
    }
}

/// Load a layer from a shapefile path root (`shapefiles/Wards` for
/// `Wards.shp`/`.dbf`/`.prj`) or from a `.geojson` file.
pub fn load_layer(path: &Path) -> Result<Layer> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase());

    let layer = match extension.as_deref() {
        Some("json") | Some("geojson") => load_geojson(path)?,
        Some("shp") => load_shapefile(path)?,
        _ => load_shapefile(&with_suffix(path, ".shp"))?,
    };
    info!("Loaded {} features from {:?}", layer.features.len(), path);
    Ok(layer)
}

fn with_suffix(root: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(root.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

fn layer_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_shapefile(shp: &Path) -> Result<Layer> {
    let prj = shp.with_extension("prj");
    let reprojector = if prj.exists() {
        Reprojector::from_prj_file(&prj)?
    } else {
        debug!("No projection file next to {:?}, assuming lon/lat", shp);
        Reprojector::geographic()?
    };
    debug!("Source projection for {:?}: {}", shp, reprojector.definition());

    let mut reader = Reader::from_path(shp)
        .with_context(|| format!("Failed to open Shapefile: {:?}", shp))?;

    let mut features = Vec::new();
    let mut skipped = 0usize;

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;
        let attributes = attributes_from_record(record);

        let (kind, parts) = match shape {
            Shape::Polygon(p) => (ShapeKind::Polygon, ring_parts(p.rings(), |pt| (pt.x, pt.y))),
            Shape::PolygonM(p) => (ShapeKind::Polygon, ring_parts(p.rings(), |pt| (pt.x, pt.y))),
            Shape::PolygonZ(p) => (ShapeKind::Polygon, ring_parts(p.rings(), |pt| (pt.x, pt.y))),
            Shape::Polyline(l) => (ShapeKind::Polyline, line_parts(l.parts(), |pt| (pt.x, pt.y))),
            Shape::PolylineM(l) => (ShapeKind::Polyline, line_parts(l.parts(), |pt| (pt.x, pt.y))),
            Shape::PolylineZ(l) => (ShapeKind::Polyline, line_parts(l.parts(), |pt| (pt.x, pt.y))),
            _ => {
                skipped += 1;
                continue;
            }
        };

        let mut shape = match ShapeRecord::from_parts(kind, parts, attributes) {
            Ok(shape) => shape,
            Err(e) => {
                warn!("Skipping record in {:?}: {}", shp, e);
                skipped += 1;
                continue;
            }
        };
        shape
            .reproject(&reprojector)
            .with_context(|| format!("Failed to reproject record {} of {:?}", features.len(), shp))?;
        features.push(Feature::new(shape));
    }

    if skipped > 0 {
        debug!("Skipped {} non-line, non-polygon or empty records in {:?}", skipped, shp);
    }

    Ok(Layer { name: layer_name(shp), features })
}

fn ring_parts<P>(rings: &[PolygonRing<P>], xy: impl Fn(&P) -> (f64, f64)) -> Vec<Part> {
    rings
        .iter()
        .map(|ring| {
            let coords = ring.points().iter().map(&xy).collect();
            match ring {
                PolygonRing::Outer(_) => Part::outer(coords),
                PolygonRing::Inner(_) => Part::inner(coords),
            }
        })
        .collect()
}

fn line_parts<P>(parts: &[Vec<P>], xy: impl Fn(&P) -> (f64, f64)) -> Vec<Part> {
    parts
        .iter()
        .map(|part| Part::outer(part.iter().map(&xy).collect()))
        .collect()
}

fn attributes_from_record(record: Record) -> Attributes {
    record
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                FieldValue::Character(Some(s)) => AttrValue::Text(s.trim().to_string()),
                FieldValue::Memo(s) => AttrValue::Text(s),
                FieldValue::Numeric(Some(n)) => AttrValue::Number(n),
                FieldValue::Float(Some(f)) => AttrValue::Number(f as f64),
                FieldValue::Integer(i) => AttrValue::Number(i as f64),
                FieldValue::Double(d) => AttrValue::Number(d),
                FieldValue::Currency(c) => AttrValue::Number(c),
                FieldValue::Logical(Some(b)) => AttrValue::Text(b.to_string()),
                _ => AttrValue::Null,
            };
            (name, value)
        })
        .collect()
}

fn load_geojson(path: &Path) -> Result<Layer> {
    use geojson::{GeoJson, Value};

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    // Loads the whole file into memory.
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut features = Vec::new();

    for feature in collection.features {
        let attributes: Attributes = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, attr_from_json(v)))
            .collect();

        let Some(geometry) = feature.geometry else {
            continue;
        };

        let (kind, parts) = match geometry.value {
            Value::Polygon(rings) => (ShapeKind::Polygon, polygon_rings(&rings)),
            Value::MultiPolygon(polygons) => (
                ShapeKind::Polygon,
                polygons.iter().flat_map(|rings| polygon_rings(rings)).collect(),
            ),
            Value::LineString(line) => (ShapeKind::Polyline, vec![Part::outer(positions(&line))]),
            Value::MultiLineString(lines) => (
                ShapeKind::Polyline,
                lines.iter().map(|l| Part::outer(positions(l))).collect(),
            ),
            _ => continue, // Skip points
        };

        match ShapeRecord::from_parts(kind, parts, attributes) {
            Ok(shape) => features.push(Feature::new(shape)),
            Err(e) => warn!("Skipping feature in {:?}: {}", path, e),
        }
    }

    Ok(Layer { name: layer_name(path), features })
}

fn positions(line: &[Vec<f64>]) -> Vec<(f64, f64)> {
    line.iter()
        .filter(|p| p.len() >= 2)
        .map(|p| (p[0], p[1]))
        .collect()
}

fn polygon_rings(rings: &[Vec<Vec<f64>>]) -> Vec<Part> {
    rings
        .iter()
        .enumerate()
        .map(|(i, ring)| {
            if i == 0 {
                Part::outer(positions(ring))
            } else {
                Part::inner(positions(ring))
            }
        })
        .collect()
}

fn attr_from_json(value: serde_json::Value) -> AttrValue {
    match value {
        serde_json::Value::String(s) => AttrValue::Text(s),
        serde_json::Value::Number(n) => n.as_f64().map(AttrValue::Number).unwrap_or(AttrValue::Null),
        serde_json::Value::Null => AttrValue::Null,
        other => AttrValue::Text(other.to_string()),
    }
}

/// Ward number to alderman name. Records whose ward is not a number (the
/// "OUT" area of the pre-2015 map) are left out.
pub fn aldermen(layer: &Layer, ward_field: &str, alderman_field: &str) -> BTreeMap<u32, String> {
    layer
        .features
        .iter()
        .filter_map(|f| {
            let ward = f.attributes().get_u32(ward_field)?;
            let name = f.attributes().get_text(alderman_field)?;
            Some((ward, name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn feature(ward: AttrValue, alderman: &str) -> Feature {
        let attrs: Attributes = [
            ("WARD".to_string(), ward),
            ("ALDERMAN".to_string(), AttrValue::Text(alderman.to_string())),
        ]
        .into_iter()
        .collect();
        let shape = ShapeRecord::from_parts(
            ShapeKind::Polygon,
            vec![Part::outer(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)])],
            attrs,
        )
        .unwrap();
        Feature::new(shape)
    }

    #[test]
    fn alderman_directory_skips_out() {
        let layer = Layer {
            name: "wards".into(),
            features: vec![
                feature(AttrValue::Text("1".into()), "PROCO JOE MORENO"),
                feature(AttrValue::Text("OUT".into()), "NONE"),
                feature(AttrValue::Number(2.0), "ROBERT FIORETTI"),
            ],
        };
        let dir = aldermen(&layer, "WARD", "ALDERMAN");
        assert_eq!(dir.len(), 2);
        assert_eq!(dir[&2], "ROBERT FIORETTI");
        assert!(layer.find_by_u32("ward", 1).is_some());
        assert!(layer.find_by_u32("ward", 3).is_none());
    }

    #[test]
    fn geojson_layer_reads_polygons_and_properties() {
        let path = std::env::temp_dir().join(format!("chimap-layer-{}.geojson", std::process::id()));
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            r#"{{"type":"FeatureCollection","features":[
                {{"type":"Feature","properties":{{"TRACT":"010100","pop":1200}},
                  "geometry":{{"type":"MultiPolygon","coordinates":[
                    [[[-87.7,41.9],[-87.6,41.9],[-87.6,42.0],[-87.7,41.9]]],
                    [[[-87.5,41.8],[-87.4,41.8],[-87.4,41.85],[-87.5,41.8]]]]}}}},
                {{"type":"Feature","properties":{{}},"geometry":{{"type":"Point","coordinates":[-87.6,41.9]}}}}
            ]}}"#
        )
        .unwrap();
        drop(file);

        let layer = load_layer(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(layer.features.len(), 1);
        let f = &layer.features[0];
        assert_eq!(f.shape.part_count(), 2);
        assert_eq!(f.attributes().get_text("TRACT").as_deref(), Some("010100"));
        assert_eq!(f.attributes().get_u32("pop"), Some(1200));
        assert_eq!(f.geometry.as_ref().unwrap().0.len(), 2);
    }
}
