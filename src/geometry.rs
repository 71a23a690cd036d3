use crate::projection::Reprojector;
use crate::types::Attributes;
use anyhow::{bail, Result};
use geo::{Area, BooleanOps, BoundingRect, Intersects, LineString, MultiPolygon, Polygon, Validation};
use rstar::{RTree, RTreeObject, AABB};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Polygon,
    Polyline,
}

/// One ring or line string of a multi-part shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub hole: bool,
    pub coords: Vec<(f64, f64)>,
}

impl Part {
    pub fn outer(coords: Vec<(f64, f64)>) -> Self {
        Part { hole: false, coords }
    }

    pub fn inner(coords: Vec<(f64, f64)>) -> Self {
        Part { hole: true, coords }
    }
}

/// A shapefile-style record: one flat coordinate array split into parts at
/// `breaks`, plus the attribute row it came with.
///
/// `breaks` holds the start index of every part but the first, so it is
/// strictly increasing and each entry lies inside `1..points.len()`.
#[derive(Debug, Clone)]
pub struct ShapeRecord {
    pub kind: ShapeKind,
    points: Vec<(f64, f64)>,
    breaks: Vec<usize>,
    holes: Vec<bool>,
    pub attributes: Attributes,
}

impl ShapeRecord {
    pub fn new(
        kind: ShapeKind,
        points: Vec<(f64, f64)>,
        breaks: Vec<usize>,
        attributes: Attributes,
    ) -> Result<Self> {
        if points.is_empty() {
            bail!("Shape has no points");
        }
        let mut prev = 0;
        for &b in &breaks {
            if b <= prev || b >= points.len() {
                bail!(
                    "Part boundary {} out of order or outside 1..{}",
                    b,
                    points.len()
                );
            }
            prev = b;
        }
        let holes = vec![false; breaks.len() + 1];
        Ok(ShapeRecord { kind, points, breaks, holes, attributes })
    }

    /// Assemble from individual parts. Empty parts are dropped.
    pub fn from_parts(kind: ShapeKind, parts: Vec<Part>, attributes: Attributes) -> Result<Self> {
        let mut points = Vec::new();
        let mut breaks = Vec::new();
        let mut holes = Vec::new();
        for part in parts.into_iter().filter(|p| !p.coords.is_empty()) {
            if !points.is_empty() {
                breaks.push(points.len());
            }
            holes.push(part.hole);
            points.extend(part.coords);
        }
        let mut shape = ShapeRecord::new(kind, points, breaks, attributes)?;
        shape.holes = holes;
        Ok(shape)
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn breaks(&self) -> &[usize] {
        &self.breaks
    }

    pub fn part_count(&self) -> usize {
        self.breaks.len() + 1
    }

    pub fn is_hole(&self, part: usize) -> bool {
        self.holes.get(part).copied().unwrap_or(false)
    }

    fn part_ranges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let starts = std::iter::once(0).chain(self.breaks.iter().copied());
        let ends = self.breaks.iter().copied().chain(std::iter::once(self.points.len()));
        starts.zip(ends)
    }

    pub fn parts(&self) -> impl Iterator<Item = &[(f64, f64)]> + '_ {
        self.part_ranges().map(move |(s, e)| &self.points[s..e])
    }

    /// Map every point through `project` (lon/lat to plot pixels) and split
    /// the result into one segment per part. A single-part shape yields one
    /// segment; the last segment always runs to the end of the array.
    pub fn segments<F>(&self, mut project: F) -> Vec<Vec<(f64, f64)>>
    where
        F: FnMut(f64, f64) -> (f64, f64),
    {
        let projected: Vec<(f64, f64)> = self.points.iter().map(|&(x, y)| project(x, y)).collect();
        self.part_ranges()
            .map(|(s, e)| projected[s..e].to_vec())
            .collect()
    }

    /// Replace native coordinates with lon/lat in place.
    pub fn reproject(&mut self, reprojector: &Reprojector) -> Result<()> {
        if reprojector.is_geographic() {
            return Ok(());
        }
        let (xs, ys): (Vec<f64>, Vec<f64>) = self.points.iter().copied().unzip();
        let (lons, lats) = reprojector.to_lon_lat(&xs, &ys)?;
        self.points = lons.into_iter().zip(lats).collect();
        Ok(())
    }

    /// Polygon parts as a `MultiPolygon`: each outer ring starts a polygon,
    /// the holes that follow it become its interiors.
    pub fn to_multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        if self.kind != ShapeKind::Polygon {
            return None;
        }
        let mut polygons: Vec<Polygon<f64>> = Vec::new();
        for (i, coords) in self.parts().enumerate() {
            if coords.len() < 3 {
                continue;
            }
            let ring = LineString::from(coords.to_vec());
            match polygons.last_mut() {
                Some(poly) if self.is_hole(i) => poly.interiors_push(ring),
                _ => polygons.push(Polygon::new(ring, vec![])),
            }
        }
        Some(MultiPolygon::new(polygons))
    }
}

struct IndexedEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

fn aabb_of(geometry: &MultiPolygon<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = geometry.bounding_rect()?;
    Some(AABB::from_corners(
        [rect.min().x, rect.min().y],
        [rect.max().x, rect.max().y],
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    pub index: usize,
    /// Intersection area as a share of the target's area.
    pub fraction: f64,
}

#[derive(Debug, Default)]
pub struct OverlapReport {
    pub overlaps: Vec<Overlap>,
    /// Candidates whose geometry is invalid and could not be intersected.
    pub invalid: Vec<usize>,
    /// The target itself is invalid; nothing was intersected.
    pub invalid_target: bool,
}

/// Find the polygons among `candidates` covering more than `threshold` of
/// `target`'s area. Invalid candidates are reported rather than intersected,
/// and an invalid target gives an empty report flagged `invalid_target`.
pub fn overlaps<'a, I>(target: &MultiPolygon<f64>, candidates: I, threshold: f64) -> Result<OverlapReport>
where
    I: IntoIterator<Item = (usize, &'a MultiPolygon<f64>)>,
{
    if !target.is_valid() {
        return Ok(OverlapReport { invalid_target: true, ..OverlapReport::default() });
    }
    let target_area = target.unsigned_area();
    let Some(target_aabb) = aabb_of(target) else {
        return Ok(OverlapReport::default());
    };
    if target_area <= 0.0 {
        return Ok(OverlapReport::default());
    }

    let candidates: Vec<(usize, &MultiPolygon<f64>)> = candidates.into_iter().collect();
    let tree = RTree::bulk_load(
        candidates
            .iter()
            .enumerate()
            .filter_map(|(slot, (_, geom))| Some(IndexedEnvelope { index: slot, aabb: aabb_of(geom)? }))
            .collect(),
    );

    let mut hits: Vec<usize> = tree
        .locate_in_envelope_intersecting(&target_aabb)
        .map(|e| e.index)
        .collect();
    hits.sort_unstable();

    let mut report = OverlapReport::default();
    for slot in hits {
        let (index, geom) = candidates[slot];
        if !target.intersects(geom) {
            continue;
        }
        if !geom.is_valid() {
            report.invalid.push(index);
            continue;
        }
        let fraction = target.intersection(geom).unsigned_area() / target_area;
        if fraction > threshold {
            report.overlaps.push(Overlap { index, fraction });
        }
    }
    Ok(report)
}

/// `false` for self-intersecting or otherwise malformed polygons.
pub fn is_valid_geometry(geometry: &MultiPolygon<f64>) -> bool {
    geometry.is_valid()
}
