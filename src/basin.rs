//! Basin boundaries and the polygon test used to crop rasters.

use std::{
    fmt,
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// Identity of a sub-basin inside its macro-basin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BasinId {
    pub macro_basin: String,
    pub sub_basin: String,
}

impl BasinId {
    pub fn new(macro_basin: impl Into<String>, sub_basin: impl Into<String>) -> Self {
        BasinId {
            macro_basin: macro_basin.into(),
            sub_basin: sub_basin.into(),
        }
    }
}

impl fmt::Display for BasinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.macro_basin, self.sub_basin)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasinBoundary {
    pub id: BasinId,
    pub geometry: Geometry,
}

/// Bounding box in degrees: west, south, east, north.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// A (multi)polygon in lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    polygons: Vec<Polygon>,
}

#[derive(Debug, Clone, PartialEq)]
struct Polygon {
    exterior: Vec<(f64, f64)>,
    holes: Vec<Vec<(f64, f64)>>,
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum GeoJsonGeometry {
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

impl Geometry {
    /// Single polygon without holes.
    #[cfg(test)]
    pub fn polygon(exterior: Vec<(f64, f64)>) -> Self {
        Geometry {
            polygons: vec![Polygon {
                exterior,
                holes: Vec::new(),
            }],
        }
    }

    /// Parses a GeoJSON `Polygon` or `MultiPolygon` geometry object.
    pub fn from_geojson(text: &str) -> Result<Self> {
        let geometry: GeoJsonGeometry = serde_json::from_str(text)
            .map_err(|e| SyncError::Boundary(format!("unsupported GeoJSON geometry: {e}")))?;
        Self::from_parsed(geometry)
    }

    fn from_value(value: serde_json::Value) -> Result<Self> {
        let geometry: GeoJsonGeometry = serde_json::from_value(value)
            .map_err(|e| SyncError::Boundary(format!("unsupported GeoJSON geometry: {e}")))?;
        Self::from_parsed(geometry)
    }

    fn from_parsed(geometry: GeoJsonGeometry) -> Result<Self> {
        let polygons = match geometry {
            GeoJsonGeometry::Polygon(rings) => vec![polygon_from_rings(rings)?],
            GeoJsonGeometry::MultiPolygon(polygons) => polygons
                .into_iter()
                .map(polygon_from_rings)
                .collect::<Result<Vec<_>>>()?,
        };

        if polygons.is_empty() {
            return Err(SyncError::Boundary("geometry has no polygon".to_string()));
        }

        Ok(Geometry { polygons })
    }

    pub fn extent(&self) -> Extent {
        let mut extent = Extent {
            west: f64::INFINITY,
            south: f64::INFINITY,
            east: f64::NEG_INFINITY,
            north: f64::NEG_INFINITY,
        };

        for (lon, lat) in self.polygons.iter().flat_map(|p| p.exterior.iter()) {
            extent.west = extent.west.min(*lon);
            extent.east = extent.east.max(*lon);
            extent.south = extent.south.min(*lat);
            extent.north = extent.north.max(*lat);
        }

        extent
    }

    /// True when the point lies inside any polygon and outside its holes.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.polygons.iter().any(|polygon| {
            ring_contains(&polygon.exterior, lon, lat)
                && !polygon
                    .holes
                    .iter()
                    .any(|hole| ring_contains(hole, lon, lat))
        })
    }
}

fn polygon_from_rings(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon> {
    let mut rings = rings.into_iter().map(ring_from_positions);

    let exterior = rings
        .next()
        .ok_or_else(|| SyncError::Boundary("polygon without exterior ring".to_string()))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;

    Ok(Polygon { exterior, holes })
}

fn ring_from_positions(positions: Vec<Vec<f64>>) -> Result<Vec<(f64, f64)>> {
    let ring = positions
        .into_iter()
        .map(|position| match position.as_slice() {
            [lon, lat, ..] => Ok((*lon, *lat)),
            _ => Err(SyncError::Boundary(
                "position with fewer than two coordinates".to_string(),
            )),
        })
        .collect::<Result<Vec<_>>>()?;

    if ring.len() < 3 {
        return Err(SyncError::Boundary(format!(
            "ring with {} vertices",
            ring.len()
        )));
    }

    Ok(ring)
}

// Even-odd rule; the ring may or may not repeat its first vertex.
fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;

    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Supplies the basin boundaries a run aggregates over.
#[async_trait]
pub trait BoundarySource: Send + Sync {
    async fn load(&self) -> Result<Vec<BasinBoundary>>;
}

/// Boundaries read from a GeoJSON `FeatureCollection` whose features carry
/// `macro_basin` and `sub_basin` properties.
pub struct GeoJsonBoundaries {
    path: PathBuf,
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    properties: FeatureProperties,
    geometry: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct FeatureProperties {
    macro_basin: String,
    sub_basin: String,
}

impl GeoJsonBoundaries {
    pub fn new(path: &Path) -> Self {
        GeoJsonBoundaries {
            path: path.to_path_buf(),
        }
    }

    fn parse(text: &str) -> Result<Vec<BasinBoundary>> {
        let collection: FeatureCollection = serde_json::from_str(text)
            .map_err(|e| SyncError::Boundary(format!("invalid feature collection: {e}")))?;

        let mut boundaries = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let id = BasinId::new(
                feature.properties.macro_basin,
                feature.properties.sub_basin,
            );
            match feature.geometry {
                Some(geometry) => boundaries.push(BasinBoundary {
                    geometry: Geometry::from_value(geometry)?,
                    id,
                }),
                None => warn!(basin = %id, "Basin has no geometry, skipping"),
            }
        }

        Ok(boundaries)
    }
}

#[async_trait]
impl BoundarySource for GeoJsonBoundaries {
    async fn load(&self) -> Result<Vec<BasinBoundary>> {
        let text = fs::read_to_string(&self.path)?;
        let boundaries = Self::parse(&text)?;

        info!(
            count = boundaries.len(),
            path = %self.path.display(),
            "Read sub-basin boundaries"
        );

        Ok(boundaries)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn square(west: f64, south: f64, size: f64) -> Vec<(f64, f64)> {
        vec![
            (west, south),
            (west + size, south),
            (west + size, south + size),
            (west, south + size),
            (west, south),
        ]
    }

    #[test]
    fn should_contain_points_inside_polygon() {
        let geometry = Geometry::polygon(square(-50.0, -20.0, 2.0));

        assert!(geometry.contains(-49.0, -19.0));
        assert!(!geometry.contains(-47.5, -19.0));
        assert!(!geometry.contains(-49.0, -17.0));
    }

    #[test]
    fn should_exclude_holes() {
        let text = r#"{
            "type": "Polygon",
            "coordinates": [
                [[0, 0], [10, 0], [10, 10], [0, 10], [0, 0]],
                [[4, 4], [6, 4], [6, 6], [4, 6], [4, 4]]
            ]
        }"#;
        let geometry = Geometry::from_geojson(text).unwrap();

        assert!(geometry.contains(2.0, 2.0));
        assert!(!geometry.contains(5.0, 5.0));
    }

    #[test]
    fn should_parse_multipolygon_extent() {
        let text = r#"{
            "type": "MultiPolygon",
            "coordinates": [
                [[[0, 0, 12.5], [1, 0, 12.5], [1, 1, 12.5], [0, 0, 12.5]]],
                [[[5, -3], [6, -3], [6, -2], [5, -3]]]
            ]
        }"#;
        let geometry = Geometry::from_geojson(text).unwrap();

        assert_eq!(
            geometry.extent(),
            Extent {
                west: 0.0,
                south: -3.0,
                east: 6.0,
                north: 1.0
            }
        );
    }

    #[test]
    fn should_reject_unsupported_geometry() {
        let point = r#"{"type": "Point", "coordinates": [1, 2]}"#;
        assert!(matches!(
            Geometry::from_geojson(point),
            Err(SyncError::Boundary(_))
        ));

        let degenerate = r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 1]]]}"#;
        assert!(matches!(
            Geometry::from_geojson(degenerate),
            Err(SyncError::Boundary(_))
        ));
    }

    #[test]
    fn should_parse_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"macro_basin": "Grande", "sub_basin": "Furnas"},
                    "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}
                },
                {
                    "type": "Feature",
                    "properties": {"macro_basin": "Madeira", "sub_basin": "Ficticio Jirau"},
                    "geometry": null
                }
            ]
        }"#;

        let boundaries = GeoJsonBoundaries::parse(text).unwrap();

        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].id, BasinId::new("Grande", "Furnas"));
    }

    #[tokio::test]
    async fn should_load_boundaries_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("basins.geojson");
        fs::write(
            &path,
            r#"{"features": [{"properties": {"macro_basin": "Parana", "sub_basin": "Itaipu"},
                "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}]}"#,
        )
        .unwrap();

        let boundaries = GeoJsonBoundaries::new(&path).load().await.unwrap();

        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].id.to_string(), "Parana - Itaipu");
    }
}
