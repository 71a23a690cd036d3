//! Finished figures: the layers, result tables and color scales each map
//! needs, composed onto a `Figure`.

use crate::colormap::{self, ColorScale};
use crate::config::{AppConfig, LayerConfig};
use crate::data::{self, Feature, Layer};
use crate::geometry;
use crate::render::{self, Bounds, Figure, MapCanvas, PanelStyle};
use crate::results::ResultTable;
use crate::types::{Attributes, Candidate, Election, Geography, RowKey};
use anyhow::{anyhow, Context, Result};
use plotters::style::{RGBColor, BLACK, BLUE, RED};
use tracing::{debug, info, warn};

const GREY: RGBColor = RGBColor(150, 150, 150);
const ORANGE: RGBColor = RGBColor(255, 140, 0);

/// Row key for a shape. `None` when the shape has no numeric ward (or
/// precinct) attribute.
pub fn row_key(attributes: &Attributes, layer: &LayerConfig, geography: Geography) -> Option<RowKey> {
    let ward = attributes.get_u32(&layer.ward_field)?;
    match geography {
        Geography::Ward => Some(RowKey::ward(ward)),
        Geography::Precinct => Some(RowKey::precinct(ward, attributes.get_u32(&layer.precinct_field)?)),
    }
}

/// Where a feature's choropleth value comes from.
pub enum ValueSource<'a> {
    VoteFraction {
        table: &'a ResultTable,
        candidate: Candidate,
        layer: &'a LayerConfig,
        geography: Geography,
    },
    /// `field / total` from the feature's own attributes.
    AttributeShare { field: &'a str, total: &'a str },
}

impl ValueSource<'_> {
    /// Value in [0, 1], or `None` with a warning when the data is missing.
    pub fn value(&self, feature: &Feature) -> Option<f64> {
        let attrs = feature.attributes();
        match self {
            ValueSource::VoteFraction { table, candidate, layer, geography } => {
                let Some(key) = row_key(attrs, layer, *geography) else {
                    debug!("Shape without a numeric {:?} key: {}", geography, attrs);
                    return None;
                };
                let fraction = table.vote_fraction(&key, *candidate);
                if fraction.is_none() {
                    warn!("{} has no vote data.", key);
                }
                fraction
            }
            ValueSource::AttributeShare { field, total } => {
                match (attrs.get_f64(field), attrs.get_f64(total)) {
                    (Some(n), Some(d)) if d > 0.0 => Some(n / d),
                    _ => {
                        warn!("No usable {} / {} for shape: {}", field, total, attrs);
                        None
                    }
                }
            }
        }
    }
}

fn load(layer: &LayerConfig) -> Result<Layer> {
    data::load_layer(&layer.path).with_context(|| format!("Failed to load layer {:?}", layer.path))
}

fn choropleth(canvas: &MapCanvas, layer: &Layer, scale: ColorScale, source: &ValueSource) -> Result<()> {
    let drawn = render::fill_choropleth(canvas, &layer.features, scale, |f| source.value(f))?;
    let skipped = layer.features.len() - drawn;
    if skipped > 0 {
        info!("{} of {} shapes in {} drawn, {} skipped", drawn, layer.features.len(), layer.name, skipped);
    }
    Ok(())
}

/// One panel per candidate: precincts shaded by the candidate's share of
/// the 2015 vote, ward lines on top.
pub fn precinct_results(config: &AppConfig, candidates: &[Candidate]) -> Result<Figure> {
    let precinct_cfg = &config.layers.precincts_2015;
    let precincts = load(precinct_cfg)?;
    let wards = load(&config.layers.wards_2015)?;
    let table = ResultTable::read_csv_file(&config.results.precincts_2015)?;
    let bounds = Bounds::from_config(&config.map);

    let mut figure = Figure::new(candidates.len(), &config.map);
    for (i, &candidate) in candidates.iter().enumerate() {
        let style = PanelStyle {
            title: Some(format!("Fraction of precinct voting for {}", candidate)),
            legend: Some(ColorScale::Reds),
        };
        let source = ValueSource::VoteFraction {
            table: &table,
            candidate,
            layer: precinct_cfg,
            geography: Geography::Precinct,
        };
        figure.draw_panel(i, &bounds, &style, |canvas| {
            choropleth(canvas, &precincts, ColorScale::Reds, &source)?;
            render::outline_features(canvas, &wards.features, BLACK, 1)
        })?;
    }
    Ok(figure)
}

/// Two precinct maps side by side.
pub fn compare(config: &AppConfig, first: Candidate, second: Candidate) -> Result<Figure> {
    precinct_results(config, &[first, second])
}

/// Wards shaded by the candidate's share of the vote in the given election.
pub fn ward_results(config: &AppConfig, candidate: Candidate, election: Election) -> Result<Figure> {
    let (layer_cfg, results) = match election {
        Election::Mayor2011 => (&config.layers.wards_2011, &config.results.wards_2011),
        Election::Mayor2015 => (&config.layers.wards_2015, &config.results.wards_2015),
    };
    if !election.candidates().contains(&candidate) {
        warn!("{} was not on the {} ballot", candidate, election.year());
    }
    let wards = load(layer_cfg)?;
    let table = ResultTable::read_csv_file(results)?;

    let style = PanelStyle {
        title: Some(format!("{}: fraction of ward voting for {}", election.year(), candidate)),
        legend: Some(ColorScale::CmrMap),
    };
    let source = ValueSource::VoteFraction {
        table: &table,
        candidate,
        layer: layer_cfg,
        geography: Geography::Ward,
    };

    let mut figure = Figure::new(1, &config.map);
    figure.draw_panel(0, &Bounds::from_config(&config.map), &style, |canvas| {
        choropleth(canvas, &wards, ColorScale::CmrMap, &source)?;
        render::outline_features(canvas, &wards.features, BLACK, 1)
    })?;
    Ok(figure)
}

/// Ward areas in the categorical palette with precinct lines colored by
/// the candidate's precinct share.
pub fn boundaries(config: &AppConfig, candidate: Candidate) -> Result<Figure> {
    let ward_cfg = &config.layers.wards_2015;
    let precinct_cfg = &config.layers.precincts_2015;
    let wards = load(ward_cfg)?;
    let precincts = load(precinct_cfg)?;
    let table = ResultTable::read_csv_file(&config.results.precincts_2015)?;

    let style = PanelStyle {
        title: Some(format!("Wards and precincts, lines by {} share", candidate)),
        legend: Some(ColorScale::Hot),
    };

    let mut figure = Figure::new(1, &config.map);
    figure.draw_panel(0, &Bounds::from_config(&config.map), &style, |canvas| {
        for ward in &wards.features {
            if let Some(n) = ward.attributes().get_u32(&ward_cfg.ward_field) {
                canvas.fill_shape(&ward.shape, colormap::ward_color(n)?)?;
            }
        }
        for precinct in &precincts.features {
            let color = row_key(precinct.attributes(), precinct_cfg, Geography::Precinct)
                .and_then(|key| table.vote_fraction(&key, candidate))
                .map(|f| ColorScale::Hot.color(f))
                .unwrap_or(BLACK);
            canvas.outline_shape(&precinct.shape, color, 1)?;
        }
        render::outline_features(canvas, &wards.features, BLACK, 1)
    })?;
    Ok(figure)
}

/// Tract id and the share of the ward's area it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct TractShare {
    pub tract: String,
    pub fraction: f64,
}

struct WardTracts {
    wards: Layer,
    tracts: Layer,
    ward: u32,
    overlaps: Vec<usize>,
    shares: Vec<TractShare>,
}

fn find_ward_tracts(config: &AppConfig, ward: u32, threshold: f64) -> Result<WardTracts> {
    let ward_cfg = &config.layers.wards_2015;
    let tract_cfg = &config.layers.tracts;
    let wards = load(ward_cfg)?;
    let tracts = load(tract_cfg)?;

    let ward_feature = wards
        .find_by_u32(&ward_cfg.ward_field, ward)
        .ok_or_else(|| anyhow!("Ward {} not found in {:?}", ward, ward_cfg.path))?;
    let ward_geom = ward_feature
        .geometry
        .as_ref()
        .ok_or_else(|| anyhow!("Ward {} is not a polygon", ward))?;

    let candidates = tracts
        .features
        .iter()
        .enumerate()
        .filter_map(|(i, f)| Some((i, f.geometry.as_ref()?)));
    let report = geometry::overlaps(ward_geom, candidates, threshold)
        .with_context(|| format!("Failed to intersect ward {}", ward))?;

    if report.invalid_target {
        warn!("Ward {} has invalid geometry, no tracts intersected: {}", ward, ward_feature.attributes());
    }

    for &i in &report.invalid {
        warn!("Skipping tract with invalid geometry: {}", tracts.features[i].attributes());
    }

    let shares = report
        .overlaps
        .iter()
        .map(|o| TractShare {
            tract: tracts.features[o.index]
                .attributes()
                .get_text(&tract_cfg.tract_field)
                .unwrap_or_else(|| format!("#{}", o.index)),
            fraction: o.fraction,
        })
        .collect();
    let overlaps = report.overlaps.iter().map(|o| o.index).collect();

    Ok(WardTracts { wards, tracts, ward, overlaps, shares })
}

/// Census tracts covering more than `threshold` of the ward's area.
pub fn ward_tract_overlap(config: &AppConfig, ward: u32, threshold: f64) -> Result<Vec<TractShare>> {
    Ok(find_ward_tracts(config, ward, threshold)?.shares)
}

/// The ward outlined in blue over the tracts that overlap it, in red.
pub fn ward_tracts(config: &AppConfig, ward: u32, threshold: f64) -> Result<Figure> {
    let found = find_ward_tracts(config, ward, threshold)?;
    info!("Ward {} overlaps {} tracts", ward, found.overlaps.len());

    let style = PanelStyle {
        title: Some(format!("Ward {} and overlapping census tracts", ward)),
        legend: None,
    };
    let mut figure = Figure::new(1, &config.map);
    figure.draw_panel(0, &Bounds::from_config(&config.map), &style, |canvas| {
        render::outline_features(canvas, &found.wards.features, GREY, 1)?;
        for &i in &found.overlaps {
            canvas.outline_shape(&found.tracts.features[i].shape, RED, 1)?;
        }
        match found.wards.find_by_u32(&config.layers.wards_2015.ward_field, found.ward) {
            Some(f) => canvas.outline_shape(&f.shape, BLUE, 2),
            None => Ok(()),
        }
    })?;
    Ok(figure)
}

/// Every tract outlined, those with invalid polygons highlighted and logged.
pub fn invalid_tracts(config: &AppConfig) -> Result<Figure> {
    let tracts = load(&config.layers.tracts)?;
    let invalid: Vec<&Feature> = tracts
        .features
        .iter()
        .filter(|f| f.geometry.as_ref().is_some_and(|g| !geometry::is_valid_geometry(g)))
        .collect();
    for f in &invalid {
        warn!("Invalid tract geometry: {}", f.attributes());
    }
    info!("{} of {} tracts have invalid geometry", invalid.len(), tracts.features.len());

    let style = PanelStyle {
        title: Some(format!("{} census tracts with invalid geometry", invalid.len())),
        legend: None,
    };
    let mut figure = Figure::new(1, &config.map);
    figure.draw_panel(0, &Bounds::from_config(&config.map), &style, |canvas| {
        render::outline_features(canvas, &tracts.features, GREY, 1)?;
        for f in &invalid {
            canvas.fill_shape(&f.shape, ORANGE)?;
            canvas.outline_shape(&f.shape, RED, 2)?;
        }
        Ok(())
    })?;
    Ok(figure)
}

/// Tracts shaded by `field / total` from the census attributes, e.g. the
/// share of residents of one ethnicity.
pub fn census_share(config: &AppConfig, field: &str, total: &str) -> Result<Figure> {
    let tracts = load(&config.layers.tracts)?;
    let wards = load(&config.layers.wards_2015)?;
    let source = ValueSource::AttributeShare { field, total };

    let style = PanelStyle {
        title: Some(format!("{} / {} by census tract", field, total)),
        legend: Some(ColorScale::Reds),
    };
    let mut figure = Figure::new(1, &config.map);
    figure.draw_panel(0, &Bounds::from_config(&config.map), &style, |canvas| {
        choropleth(canvas, &tracts, ColorScale::Reds, &source)?;
        render::outline_features(canvas, &wards.features, BLACK, 1)
    })?;
    Ok(figure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Part, ShapeKind, ShapeRecord};
    use crate::types::{AttrValue, ResultRow};

    fn precinct(ward: u32, precinct: u32) -> Feature {
        let attrs: Attributes = [
            ("ward".to_string(), AttrValue::Number(ward as f64)),
            ("precinct".to_string(), AttrValue::Text(precinct.to_string())),
            ("WHITE".to_string(), AttrValue::Number(30.0)),
            ("TOTAL".to_string(), AttrValue::Number(120.0)),
        ]
        .into_iter()
        .collect();
        let ring = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)];
        Feature::new(ShapeRecord::from_parts(ShapeKind::Polygon, vec![Part::outer(ring)], attrs).unwrap())
    }

    fn table() -> ResultTable {
        let mut t = ResultTable::new(vec![Candidate::RahmEmanuel, Candidate::ChuyGarcia]);
        t.insert(ResultRow { key: RowKey::precinct(3, 4), votes: vec![40, 60], votes_cast: 100 })
            .unwrap();
        t
    }

    #[test]
    fn vote_fraction_source_keys_by_ward_and_precinct() {
        let t = table();
        let layer = AppConfig::default().layers.precincts_2015;
        let source = ValueSource::VoteFraction {
            table: &t,
            candidate: Candidate::RahmEmanuel,
            layer: &layer,
            geography: Geography::Precinct,
        };
        let v = source.value(&precinct(3, 4)).unwrap();
        assert!((v - 0.4).abs() < 1e-12);
        assert_eq!(source.value(&precinct(3, 5)), None);
    }

    #[test]
    fn ward_geography_ignores_precinct() {
        let layer = AppConfig::default().layers.wards_2015;
        let attrs = precinct(8, 2).attributes().clone();
        assert_eq!(row_key(&attrs, &layer, Geography::Ward), Some(RowKey::ward(8)));
        assert_eq!(row_key(&attrs, &layer, Geography::Precinct), Some(RowKey::precinct(8, 2)));
    }

    #[test]
    fn attribute_share() {
        let source = ValueSource::AttributeShare { field: "WHITE", total: "TOTAL" };
        assert_eq!(source.value(&precinct(1, 1)), Some(0.25));
        let missing = ValueSource::AttributeShare { field: "BLACK", total: "TOTAL" };
        assert_eq!(missing.value(&precinct(1, 1)), None);
    }
}
