use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub map: MapConfig,
    pub layers: LayersConfig,
    pub results: ResultsConfig,
    pub scrape: ScrapeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    /// [lat, lon]
    pub lower_left: [f64; 2],
    /// [lat, lon]
    pub upper_right: [f64; 2],
    pub panel_width: u32,
    pub panel_height: u32,
    pub legend_height: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            lower_left: [41.64, -87.95],
            upper_right: [42.03, -87.51],
            panel_width: 800,
            panel_height: 900,
            legend_height: 40,
        }
    }
}

/// Geometry file (path root or full path) plus the attribute names used to
/// key its records.
#[derive(Debug, Deserialize, Clone)]
pub struct LayerConfig {
    pub path: PathBuf,
    #[serde(default = "default_ward_field")]
    pub ward_field: String,
    #[serde(default = "default_precinct_field")]
    pub precinct_field: String,
    #[serde(default = "default_alderman_field")]
    pub alderman_field: String,
    #[serde(default = "default_tract_field")]
    pub tract_field: String,
}

fn default_ward_field() -> String {
    "ward".to_string()
}

fn default_precinct_field() -> String {
    "precinct".to_string()
}

fn default_alderman_field() -> String {
    "alderman".to_string()
}

fn default_tract_field() -> String {
    "TRACT".to_string()
}

impl LayerConfig {
    fn at(path: &str) -> Self {
        LayerConfig {
            path: PathBuf::from(path),
            ward_field: default_ward_field(),
            precinct_field: default_precinct_field(),
            alderman_field: default_alderman_field(),
            tract_field: default_tract_field(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LayersConfig {
    pub wards_2015: LayerConfig,
    pub precincts_2015: LayerConfig,
    pub wards_2011: LayerConfig,
    pub tracts: LayerConfig,
}

impl Default for LayersConfig {
    fn default() -> Self {
        LayersConfig {
            wards_2015: LayerConfig::at("shapefiles/chicago_2015_wards/chicago_2015_wards"),
            precincts_2015: LayerConfig::at("shapefiles/chicago_2015_precincts/chicago_2015_precincts"),
            wards_2011: LayerConfig {
                ward_field: "WARD".to_string(),
                alderman_field: "ALDERMAN".to_string(),
                ..LayerConfig::at("shapefiles/pre2015_wards/wgs84_wards/Wards")
            },
            tracts: LayerConfig::at("shapefiles/wgs84_ACSdata_tracts/ChTr0812"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResultsConfig {
    pub wards_2015: PathBuf,
    pub wards_2011: PathBuf,
    pub precincts_2015: PathBuf,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        ResultsConfig {
            wards_2015: PathBuf::from("data/mayoral_ward_results2015.csv"),
            wards_2011: PathBuf::from("data/mayoral_ward_results2011.csv"),
            precincts_2015: PathBuf::from("data/precinct_level_mayoral_results2015.csv"),
        }
    }
}

/// Layout of the Board of Elections precinct pages.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScrapeConfig {
    /// `{ward}` is replaced by the ward number.
    pub url_template: String,
    pub wards: u32,
    /// Index of the first precinct number among the bold tags.
    pub leading_tags: usize,
    /// Bold tags on every page that are not precinct rows.
    pub fixed_tags: usize,
    pub row_width: usize,
    /// Distance between consecutive candidate vote counts within a row.
    pub candidate_stride: usize,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            url_template: "http://www.chicagoelections.com/en/pctlevel3.asp?Ward={ward}&elec_code=10&race_number=10"
                .to_string(),
            wards: 50,
            leading_tags: 13,
            fixed_tags: 38,
            row_width: 12,
            candidate_stride: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub figure: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            figure: PathBuf::from("output/figure.png"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Built-in paths apply when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            info!("No config file at {:?}, using defaults", path);
            Ok(AppConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [map]
            panel_width = 400

            [layers.tracts]
            path = "tracts/custom"
            tract_field = "GEOID"

            [scrape]
            wards = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.map.panel_width, 400);
        assert_eq!(config.map.lower_left, [41.64, -87.95]);
        assert_eq!(config.layers.tracts.tract_field, "GEOID");
        assert_eq!(config.layers.tracts.ward_field, "ward");
        assert_eq!(config.layers.wards_2011.ward_field, "WARD");
        assert_eq!(config.scrape.wards, 3);
        assert_eq!(config.scrape.fixed_tags, 38);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = AppConfig::load_or_default(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(config.scrape.row_width, 12);
    }
}
