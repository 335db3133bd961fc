use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geo::hex::{HexCell, HexGrid, cluster_points};
use crate::geo::{Coordinate, haversine_km};
use crate::models::provider::ProviderMarker;
use crate::sources::{LocationProvider, Position, locate};

/// Visible map rectangle. `west > east` means the box wraps the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Bounds {
    pub const WORLD: Bounds = Bounds {
        south: -90.0,
        west: -180.0,
        north: 90.0,
        east: 180.0,
    };

    pub fn contains(&self, point: &Coordinate) -> bool {
        if point.lat < self.south || point.lat > self.north {
            return false;
        }
        if self.west <= self.east {
            point.lng >= self.west && point.lng <= self.east
        } else {
            point.lng >= self.west || point.lng <= self.east
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub zoom: u8,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedMarker {
    #[serde(flatten)]
    pub marker: ProviderMarker,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterRender {
    pub zoom: u8,
    pub resolution: u8,
    pub origin: Position,
    pub cells: Vec<HexCell>,
    pub markers: Vec<PlacedMarker>,
    pub skipped: usize,
}

/// Clusters the markers inside the viewport and lists them individually too,
/// so the caller can pick what to draw at a given zoom. Markers with malformed
/// coordinates are left out of both lists and counted in `skipped`.
pub fn render_clusters<G>(
    grid: &G,
    markers: &[ProviderMarker],
    viewport: &Viewport,
    origin: Position,
) -> ClusterRender
where
    G: HexGrid + ?Sized,
{
    let visible: Vec<&ProviderMarker> = markers
        .iter()
        .filter(|marker| {
            !marker.coordinate.is_valid() || viewport.bounds.contains(&marker.coordinate)
        })
        .collect();

    let clustering = cluster_points(
        grid,
        visible.iter().map(|marker| &marker.coordinate),
        viewport.zoom,
    );

    let markers = visible
        .into_iter()
        .filter(|marker| marker.coordinate.is_valid())
        .map(|marker| PlacedMarker {
            marker: marker.clone(),
            distance_km: haversine_km(&origin.coordinate, &marker.coordinate),
        })
        .collect();

    ClusterRender {
        zoom: viewport.zoom,
        resolution: clustering.resolution,
        origin,
        cells: clustering.cells,
        markers,
        skipped: clustering.skipped,
    }
}

fn fingerprint(markers: &[ProviderMarker]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for marker in markers {
        marker.id.hash(&mut hasher);
        marker.coordinate.lat.to_bits().hash(&mut hasher);
        marker.coordinate.lng.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RenderKey {
    viewport: Viewport,
    markers: u64,
    origin: Position,
}

/// Recomputes clusters only when the marker set, zoom, bounds or viewer
/// position changed since the last render.
pub struct MapClusterView {
    grid: Arc<dyn HexGrid>,
    location: Arc<dyn LocationProvider>,
    fallback: Coordinate,
    last: Option<RenderKey>,
}

impl MapClusterView {
    pub fn new(
        grid: Arc<dyn HexGrid>,
        location: Arc<dyn LocationProvider>,
        fallback: Coordinate,
    ) -> Self {
        Self {
            grid,
            location,
            fallback,
            last: None,
        }
    }

    /// Returns `None` when nothing relevant changed and the previous render
    /// still stands.
    pub async fn render(
        &mut self,
        markers: &[ProviderMarker],
        viewport: Viewport,
    ) -> Option<ClusterRender> {
        let origin = locate(self.location.as_ref(), self.fallback).await;
        let key = RenderKey {
            viewport,
            markers: fingerprint(markers),
            origin,
        };

        if self.last == Some(key) {
            debug!(zoom = viewport.zoom, "viewport unchanged; keeping clusters");
            return None;
        }

        let render = render_clusters(self.grid.as_ref(), markers, &viewport, origin);
        self.last = Some(key);
        debug!(
            zoom = viewport.zoom,
            cells = render.cells.len(),
            markers = render.markers.len(),
            "clusters recomputed"
        );
        Some(render)
    }

    /// Forgets the last viewport so the next render recomputes.
    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{Bounds, MapClusterView, Viewport, render_clusters};
    use crate::geo::Coordinate;
    use crate::geo::hex::H3Grid;
    use crate::models::provider::ProviderMarker;
    use crate::sources::{FixedLocation, Position};

    const DELHI: Coordinate = Coordinate {
        lat: 28.6139,
        lng: 77.2090,
    };

    fn marker(seed: u128, lat: f64, lng: f64) -> ProviderMarker {
        ProviderMarker {
            id: Uuid::from_u128(seed),
            name: format!("photographer-{seed}"),
            coordinate: Coordinate { lat, lng },
            specialties: vec!["wedding".to_string()],
            hourly_rate: 50.0,
            rating: 4.5,
        }
    }

    fn five_markers() -> Vec<ProviderMarker> {
        vec![
            marker(1, 28.6139, 77.2090),
            marker(2, 28.6140, 77.2091),
            marker(3, 28.6141, 77.2089),
            marker(4, 28.7041, 77.1025),
            marker(5, 28.5355, 77.3910),
        ]
    }

    fn origin() -> Position {
        Position {
            coordinate: DELHI,
            approximate: false,
        }
    }

    fn view() -> MapClusterView {
        MapClusterView::new(
            Arc::new(H3Grid),
            Arc::new(FixedLocation(Some(DELHI))),
            DELHI,
        )
    }

    #[test]
    fn repeated_render_gives_identical_counts() {
        let markers = five_markers();
        let viewport = Viewport {
            zoom: 11,
            bounds: Bounds::WORLD,
        };

        let first = render_clusters(&H3Grid, &markers, &viewport, origin());
        let second = render_clusters(&H3Grid, &markers, &viewport, origin());

        let counts = |render: &super::ClusterRender| -> Vec<usize> {
            render.cells.iter().map(|cell| cell.member_count).collect()
        };
        assert_eq!(counts(&first), counts(&second));
        assert_eq!(counts(&first).iter().sum::<usize>(), 5);
        assert_eq!(first.markers.len(), 5);
    }

    #[test]
    fn markers_outside_bounds_are_left_out() {
        let mut markers = five_markers();
        markers.push(marker(6, 19.076, 72.8777));
        let viewport = Viewport {
            zoom: 9,
            bounds: Bounds {
                south: 28.4,
                west: 76.8,
                north: 28.9,
                east: 77.5,
            },
        };

        let render = render_clusters(&H3Grid, &markers, &viewport, origin());

        assert_eq!(render.markers.len(), 5);
        assert_eq!(
            render.cells.iter().map(|cell| cell.member_count).sum::<usize>(),
            5
        );
    }

    #[test]
    fn malformed_markers_are_counted_and_skipped() {
        let mut markers = five_markers();
        markers.push(marker(6, 95.0, 77.0));

        let viewport = Viewport {
            zoom: 11,
            bounds: Bounds::WORLD,
        };
        let render = render_clusters(&H3Grid, &markers, &viewport, origin());

        assert_eq!(render.skipped, 1);
        assert_eq!(render.markers.len(), 5);
    }

    #[test]
    fn markers_carry_distance_from_origin() {
        let markers = five_markers();
        let viewport = Viewport {
            zoom: 11,
            bounds: Bounds::WORLD,
        };
        let render = render_clusters(&H3Grid, &markers, &viewport, origin());

        let home = render
            .markers
            .iter()
            .find(|placed| placed.marker.id == Uuid::from_u128(1))
            .unwrap();
        let far = render
            .markers
            .iter()
            .find(|placed| placed.marker.id == Uuid::from_u128(4))
            .unwrap();
        assert!(home.distance_km < 1e-6);
        assert!((far.distance_km - 14.44).abs() < 0.2);
    }

    #[test]
    fn antimeridian_bounds_wrap() {
        let bounds = Bounds {
            south: -20.0,
            west: 170.0,
            north: 20.0,
            east: -170.0,
        };
        assert!(bounds.contains(&Coordinate { lat: 0.0, lng: 175.0 }));
        assert!(bounds.contains(&Coordinate { lat: 0.0, lng: -175.0 }));
        assert!(!bounds.contains(&Coordinate { lat: 0.0, lng: 0.0 }));
    }

    #[tokio::test]
    async fn unchanged_viewport_is_not_recomputed() {
        let markers = five_markers();
        let mut view = view();
        let viewport = Viewport {
            zoom: 11,
            bounds: Bounds::WORLD,
        };

        assert!(view.render(&markers, viewport).await.is_some());
        assert!(view.render(&markers, viewport).await.is_none());

        let zoomed = Viewport { zoom: 12, ..viewport };
        assert!(view.render(&markers, zoomed).await.is_some());

        let panned = Viewport {
            bounds: Bounds {
                south: 28.0,
                west: 76.0,
                north: 29.0,
                east: 78.0,
            },
            ..zoomed
        };
        assert!(view.render(&markers, panned).await.is_some());
        assert!(view.render(&markers, panned).await.is_none());
    }

    #[tokio::test]
    async fn changed_markers_trigger_recompute() {
        let mut markers = five_markers();
        let mut view = view();
        let viewport = Viewport {
            zoom: 11,
            bounds: Bounds::WORLD,
        };

        assert!(view.render(&markers, viewport).await.is_some());
        markers.pop();
        let render = view.render(&markers, viewport).await.unwrap();
        assert_eq!(render.markers.len(), 4);

        view.invalidate();
        assert!(view.render(&markers, viewport).await.is_some());
    }
}
