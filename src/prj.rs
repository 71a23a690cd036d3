//! ESRI `.prj` sidecar files: a small WKT reader and a proj4 exporter for the
//! projections the City of Chicago and Census Bureau shapefiles use.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;

const US_SURVEY_FOOT: f64 = 0.3048006096012192;
const INTERNATIONAL_FOOT: f64 = 0.3048;

#[derive(Debug, Clone, PartialEq)]
pub enum WktValue {
    Text(String),
    Number(f64),
    Node(WktNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WktNode {
    pub keyword: String,
    pub values: Vec<WktValue>,
}

impl WktNode {
    pub fn child(&self, keyword: &str) -> Option<&WktNode> {
        self.values.iter().find_map(|v| match v {
            WktValue::Node(n) if n.keyword.eq_ignore_ascii_case(keyword) => Some(n),
            _ => None,
        })
    }

    pub fn children<'a>(&'a self, keyword: &'a str) -> impl Iterator<Item = &'a WktNode> + 'a {
        self.values.iter().filter_map(move |v| match v {
            WktValue::Node(n) if n.keyword.eq_ignore_ascii_case(keyword) => Some(n),
            _ => None,
        })
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        match self.values.get(index) {
            Some(WktValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        match self.values.get(index) {
            Some(WktValue::Number(n)) => Some(*n),
            _ => None,
        }
    }
}

pub fn parse_wkt(input: &str) -> Result<WktNode> {
    let mut parser = Parser { src: input.as_bytes(), pos: 0 };
    let node = parser.node()?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        bail!("Trailing characters in WKT at offset {}", parser.pos);
    }
    Ok(node)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn node(&mut self) -> Result<WktNode> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.src.len()
            && (self.src[self.pos].is_ascii_alphanumeric() || self.src[self.pos] == b'_')
        {
            self.pos += 1;
        }
        if start == self.pos {
            bail!("Expected WKT keyword at offset {}", start);
        }
        let keyword = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();

        let close = match self.peek() {
            Some(b'[') => b']',
            Some(b'(') => b')',
            _ => bail!("Expected '[' after {} at offset {}", keyword, self.pos),
        };
        self.pos += 1;

        let mut values = Vec::new();
        loop {
            match self.peek() {
                Some(c) if c == close => {
                    self.pos += 1;
                    break;
                }
                Some(b',') => self.pos += 1,
                Some(b'"') => values.push(WktValue::Text(self.quoted()?)),
                Some(c) if c == b'-' || c == b'+' || c == b'.' || c.is_ascii_digit() => {
                    values.push(WktValue::Number(self.number()?))
                }
                Some(_) => values.push(WktValue::Node(self.node()?)),
                None => bail!("Unterminated {} node", keyword),
            }
        }
        Ok(WktNode { keyword, values })
    }

    fn quoted(&mut self) -> Result<String> {
        self.pos += 1;
        let start = self.pos;
        while self.pos < self.src.len() && self.src[self.pos] != b'"' {
            self.pos += 1;
        }
        if self.pos >= self.src.len() {
            bail!("Unterminated string starting at offset {}", start);
        }
        let s = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(s)
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while self.pos < self.src.len()
            && matches!(self.src[self.pos], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])?;
        text.parse()
            .with_context(|| format!("Invalid number {:?} in WKT", text))
    }
}

/// Convert an ESRI WKT projection description to a proj4 definition.
///
/// False easting/northing are given in the linear unit of the projection in
/// ESRI files but in metres in proj4, so they are scaled here. The linear
/// unit itself is kept (`+units=us-ft` and friends) so that coordinates are
/// read in feet rather than metres.
pub fn esri_to_proj4(wkt: &str) -> Result<String> {
    let root = parse_wkt(wkt)?;
    match root.keyword.to_ascii_uppercase().as_str() {
        "GEOGCS" => Ok(format!("+proj=longlat {} +no_defs", datum_params(&root)?)),
        "PROJCS" => projcs_to_proj4(&root),
        other => Err(anyhow!("Unsupported coordinate system kind: {}", other)),
    }
}

fn projcs_to_proj4(root: &WktNode) -> Result<String> {
    let geogcs = root
        .child("GEOGCS")
        .ok_or_else(|| anyhow!("PROJCS without GEOGCS"))?;
    let projection = root
        .child("PROJECTION")
        .and_then(|p| p.text(0))
        .ok_or_else(|| anyhow!("PROJCS without PROJECTION"))?;

    let params: HashMap<String, f64> = root
        .children("PARAMETER")
        .filter_map(|p| Some((p.text(0)?.to_ascii_lowercase(), p.number(1)?)))
        .collect();
    let param = |name: &str| params.get(name).copied().unwrap_or(0.0);

    let to_meter = root.child("UNIT").and_then(|u| u.number(1)).unwrap_or(1.0);

    let mut def = match projection.to_ascii_lowercase().as_str() {
        "transverse_mercator" => format!(
            "+proj=tmerc +lat_0={} +lon_0={} +k={}",
            param("latitude_of_origin"),
            param("central_meridian"),
            params.get("scale_factor").copied().unwrap_or(1.0),
        ),
        "lambert_conformal_conic" | "lambert_conformal_conic_2sp" | "lambert_conformal_conic_1sp" => {
            let lat_0 = param("latitude_of_origin");
            let lat_1 = params.get("standard_parallel_1").copied().unwrap_or(lat_0);
            let lat_2 = params.get("standard_parallel_2").copied().unwrap_or(lat_1);
            let mut s = format!(
                "+proj=lcc +lat_1={} +lat_2={} +lat_0={} +lon_0={}",
                lat_1,
                lat_2,
                lat_0,
                param("central_meridian"),
            );
            if let Some(k) = params.get("scale_factor") {
                s.push_str(&format!(" +k={}", k));
            }
            s
        }
        "mercator" => format!(
            "+proj=merc +lon_0={} +lat_ts={}",
            param("central_meridian"),
            param("standard_parallel_1"),
        ),
        other => bail!("Unsupported projection: {}", other),
    };

    def.push_str(&format!(
        " +x_0={} +y_0={} {} {} +no_defs",
        param("false_easting") * to_meter,
        param("false_northing") * to_meter,
        datum_params(geogcs)?,
        units_param(to_meter),
    ));
    Ok(def)
}

fn datum_params(geogcs: &WktNode) -> Result<String> {
    let datum = geogcs
        .child("DATUM")
        .ok_or_else(|| anyhow!("GEOGCS without DATUM"))?;
    let spheroid = datum
        .child("SPHEROID")
        .ok_or_else(|| anyhow!("DATUM without SPHEROID"))?;

    let name = spheroid.text(0).unwrap_or_default().to_ascii_uppercase();
    let ellps = match name.as_str() {
        "GRS_1980" | "GRS 1980" => "+ellps=GRS80".to_string(),
        "WGS_1984" | "WGS 84" => "+ellps=WGS84".to_string(),
        _ => {
            let a = spheroid
                .number(1)
                .ok_or_else(|| anyhow!("SPHEROID without semi-major axis"))?;
            match spheroid.number(2) {
                Some(rf) if rf != 0.0 => format!("+a={} +rf={}", a, rf),
                _ => format!("+a={} +b={}", a, a),
            }
        }
    };

    let datum_name = datum.text(0).unwrap_or_default().to_ascii_uppercase();
    if datum_name.contains("NORTH_AMERICAN_1983") || datum_name.contains("WGS_1984") {
        Ok(format!("{} +towgs84=0,0,0", ellps))
    } else {
        Ok(ellps)
    }
}

fn units_param(to_meter: f64) -> String {
    if (to_meter - US_SURVEY_FOOT).abs() < 1e-12 {
        "+units=us-ft".to_string()
    } else if (to_meter - INTERNATIONAL_FOOT).abs() < 1e-12 {
        "+units=ft".to_string()
    } else if (to_meter - 1.0).abs() < 1e-12 {
        "+units=m".to_string()
    } else {
        format!("+to_meter={}", to_meter)
    }
}
