use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::geo::Coordinate;

/// Finest resolution the zoom table reaches.
pub const MAX_RESOLUTION: u8 = 15;

/// Cell resolution for map zoom levels 0 through 22.
const ZOOM_RESOLUTIONS: [u8; 23] = [
    0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
];

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("invalid coordinate: lat={lat}, lng={lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid resolution: {0}")]
    InvalidResolution(u8),

    #[error("invalid cell id: {0}")]
    InvalidCell(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CellId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hexagonal grid capability used for clustering.
pub trait HexGrid: Send + Sync {
    fn point_to_cell(&self, coordinate: &Coordinate, resolution: u8) -> Result<CellId, GridError>;
    fn cell_boundary(&self, cell: &CellId) -> Result<Vec<Coordinate>, GridError>;
    fn cell_center(&self, cell: &CellId) -> Result<Coordinate, GridError>;
}

/// [`HexGrid`] backed by the H3 system.
#[derive(Debug, Clone, Copy, Default)]
pub struct H3Grid;

impl H3Grid {
    fn parse(cell: &CellId) -> Result<CellIndex, GridError> {
        CellIndex::from_str(cell.as_str()).map_err(|_| GridError::InvalidCell(cell.to_string()))
    }
}

fn from_latlng(latlng: LatLng) -> Coordinate {
    Coordinate {
        lat: latlng.lat(),
        lng: latlng.lng(),
    }
}

impl HexGrid for H3Grid {
    fn point_to_cell(&self, coordinate: &Coordinate, resolution: u8) -> Result<CellId, GridError> {
        if !coordinate.is_valid() {
            return Err(GridError::InvalidCoordinate {
                lat: coordinate.lat,
                lng: coordinate.lng,
            });
        }

        let resolution =
            Resolution::try_from(resolution).map_err(|_| GridError::InvalidResolution(resolution))?;
        let latlng = LatLng::new(coordinate.lat, coordinate.lng).map_err(|_| {
            GridError::InvalidCoordinate {
                lat: coordinate.lat,
                lng: coordinate.lng,
            }
        })?;

        Ok(CellId(latlng.to_cell(resolution).to_string()))
    }

    fn cell_boundary(&self, cell: &CellId) -> Result<Vec<Coordinate>, GridError> {
        let index = Self::parse(cell)?;
        Ok(index.boundary().iter().copied().map(from_latlng).collect())
    }

    fn cell_center(&self, cell: &CellId) -> Result<Coordinate, GridError> {
        let index = Self::parse(cell)?;
        Ok(from_latlng(LatLng::from(index)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexCell {
    pub cell_id: CellId,
    pub resolution: u8,
    pub boundary: Vec<Coordinate>,
    pub member_count: usize,
    pub centroid: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    pub resolution: u8,
    pub cells: Vec<HexCell>,
    /// Points that could not be indexed and were left out.
    pub skipped: usize,
}

/// Monotonic step from map zoom to cell resolution. Zoom beyond the table
/// saturates at [`MAX_RESOLUTION`].
pub fn resolution_for_zoom(zoom: u8) -> u8 {
    ZOOM_RESOLUTIONS
        .get(usize::from(zoom))
        .copied()
        .unwrap_or(MAX_RESOLUTION)
}

/// Groups points by the cell they fall in at the resolution for `zoom`.
///
/// Points the grid cannot index are skipped and counted; a cell whose boundary
/// or center cannot be resolved is dropped along with its members. Cells come
/// back ordered by member count, largest first, ties broken by cell id.
pub fn cluster_points<'a, G, I>(grid: &G, points: I, zoom: u8) -> Clustering
where
    G: HexGrid + ?Sized,
    I: IntoIterator<Item = &'a Coordinate>,
{
    let resolution = resolution_for_zoom(zoom);
    let mut counts: HashMap<CellId, usize> = HashMap::new();
    let mut skipped = 0;

    for point in points {
        match grid.point_to_cell(point, resolution) {
            Ok(cell) => *counts.entry(cell).or_insert(0) += 1,
            Err(err) => {
                skipped += 1;
                warn!(error = %err, "skipping point that failed to index");
            }
        }
    }

    let mut cells: Vec<HexCell> = counts
        .into_iter()
        .filter_map(|(cell_id, member_count)| {
            let geometry = grid
                .cell_boundary(&cell_id)
                .and_then(|boundary| Ok((boundary, grid.cell_center(&cell_id)?)));

            match geometry {
                Ok((boundary, centroid)) => Some(HexCell {
                    cell_id,
                    resolution,
                    boundary,
                    member_count,
                    centroid,
                }),
                Err(err) => {
                    skipped += member_count;
                    warn!(cell = %cell_id, error = %err, "dropping cell without geometry");
                    None
                }
            }
        })
        .collect();

    cells.sort_by(|a, b| {
        b.member_count
            .cmp(&a.member_count)
            .then_with(|| a.cell_id.cmp(&b.cell_id))
    });

    Clustering {
        resolution,
        cells,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::{CellId, H3Grid, HexGrid, MAX_RESOLUTION, cluster_points, resolution_for_zoom};
    use crate::geo::Coordinate;

    fn delhi_points() -> Vec<Coordinate> {
        vec![
            Coordinate { lat: 28.6139, lng: 77.2090 },
            Coordinate { lat: 28.6140, lng: 77.2091 },
            Coordinate { lat: 28.6141, lng: 77.2089 },
            Coordinate { lat: 28.7041, lng: 77.1025 },
            Coordinate { lat: 28.5355, lng: 77.3910 },
        ]
    }

    #[test]
    fn zoom_table_matches_reference_steps() {
        let expected = [
            0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
        ];
        for (zoom, resolution) in expected.iter().enumerate() {
            assert_eq!(resolution_for_zoom(zoom as u8), *resolution, "zoom {zoom}");
        }
        assert_eq!(resolution_for_zoom(7), 3);
        assert_eq!(resolution_for_zoom(22), 15);
    }

    #[test]
    fn zoom_table_is_monotonic_and_saturates() {
        let mut previous = 0;
        for zoom in 0..=u8::MAX {
            let resolution = resolution_for_zoom(zoom);
            assert!(resolution >= previous);
            assert!(resolution <= MAX_RESOLUTION);
            previous = resolution;
        }
        assert_eq!(resolution_for_zoom(30), MAX_RESOLUTION);
    }

    #[test]
    fn clustering_is_stable_and_counts_every_point() {
        let points = delhi_points();

        let first = cluster_points(&H3Grid, &points, 12);
        let second = cluster_points(&H3Grid, &points, 12);

        assert_eq!(first, second);
        assert_eq!(first.cells.iter().map(|c| c.member_count).sum::<usize>(), 5);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.resolution, 5);
    }

    #[test]
    fn nearby_points_share_a_cell_at_city_zoom() {
        let points = delhi_points();
        let clustering = cluster_points(&H3Grid, &points[..3], 10);

        assert_eq!(clustering.cells.len(), 1);
        assert_eq!(clustering.cells[0].member_count, 3);
    }

    #[test]
    fn high_zoom_splits_clusters() {
        let points = delhi_points();
        let coarse = cluster_points(&H3Grid, &points, 2);
        let fine = cluster_points(&H3Grid, &points, 22);

        assert_eq!(coarse.cells.len(), 1);
        assert_eq!(fine.cells.len(), 5);
        assert!(fine.cells.iter().all(|cell| cell.resolution == 15));
    }

    #[test]
    fn malformed_points_are_skipped() {
        let mut points = delhi_points();
        points.push(Coordinate { lat: 123.0, lng: 77.0 });
        points.push(Coordinate { lat: f64::NAN, lng: 77.0 });

        let clustering = cluster_points(&H3Grid, &points, 12);

        assert_eq!(clustering.skipped, 2);
        assert_eq!(
            clustering.cells.iter().map(|c| c.member_count).sum::<usize>(),
            5
        );
    }

    #[test]
    fn cells_are_ordered_by_member_count() {
        let points = delhi_points();
        let clustering = cluster_points(&H3Grid, &points, 16);

        let counts: Vec<usize> = clustering.cells.iter().map(|c| c.member_count).collect();
        let mut sorted = counts.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(counts, sorted);
    }

    #[test]
    fn cell_geometry_surrounds_the_point() {
        let grid = H3Grid;
        let point = Coordinate { lat: 28.6139, lng: 77.2090 };
        let cell = grid.point_to_cell(&point, 9).unwrap();

        let boundary = grid.cell_boundary(&cell).unwrap();
        let center = grid.cell_center(&cell).unwrap();

        assert!(boundary.len() >= 5);
        assert!((center.lat - point.lat).abs() < 0.01);
        assert!((center.lng - point.lng).abs() < 0.01);
        assert_eq!(grid.point_to_cell(&center, 9).unwrap(), cell);
    }

    #[test]
    fn unknown_cell_id_is_rejected() {
        let grid = H3Grid;
        let bogus = CellId::from("not-a-cell".to_string());
        assert!(grid.cell_boundary(&bogus).is_err());
        assert!(grid.cell_center(&bogus).is_err());
    }
}
