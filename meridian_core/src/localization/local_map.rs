// meridian_core/src/localization/local_map.rs

use crate::filtering::{Region, RegionFilter};
use crate::messages::PointCloud;
use crate::types::Axis;
use nalgebra::Point3;
use std::sync::Arc;
use tracing::{info, warn};

/// # LocalMapWindow
/// The bounded piece of the global map currently used as registration target.
///
/// The window is a box of fixed half-extent. It is replaced wholesale on
/// every recentre, never patched, and it only moves when asked to.
#[derive(Debug)]
pub struct LocalMapWindow {
    global_map: Arc<PointCloud>,
    region_filter: RegionFilter,
    margin: f64,
    local_map: Arc<PointCloud>,
}

impl LocalMapWindow {
    /// A window over `global_map` that has not been centred anywhere yet.
    pub fn new(global_map: Arc<PointCloud>, half_extent: [f64; 3], margin: f64) -> Self {
        Self {
            global_map,
            region_filter: RegionFilter::new(half_extent),
            margin,
            local_map: Arc::new(PointCloud::default()),
        }
    }

    /// Crops a fresh local map around `origin` and returns it.
    ///
    /// An empty result (origin outside the map) is logged but not refused;
    /// registration reports it on the next scan.
    pub fn recenter(&mut self, origin: Point3<f64>) -> Arc<PointCloud> {
        let local = Arc::new(self.region_filter.filter(&self.global_map, origin));
        let region = self.region_filter.edges();
        if local.is_empty() {
            warn!(%region, "local map is empty; origin lies outside the global map");
        } else {
            info!(
                origin = ?[origin.x, origin.y, origin.z],
                %region,
                points = local.len(),
                "local map recentred"
            );
        }
        self.local_map = Arc::clone(&local);
        local
    }

    /// The first axis (x, then y, then z) on which `position` lies within
    /// `margin` of either edge of the current region, or `None` when every
    /// axis is clear. Axes after the first hit are not examined.
    pub fn refresh_trigger(&self, position: &Point3<f64>) -> Option<Axis> {
        let region = self.region_filter.edges();
        Axis::ALL.into_iter().find(|&axis| {
            let (near, far) = region.edge(axis);
            let c = position[axis.index()];
            !((c - near).abs() > self.margin && (c - far).abs() > self.margin)
        })
    }

    pub fn region(&self) -> &Region {
        self.region_filter.edges()
    }

    pub fn local_map(&self) -> &Arc<PointCloud> {
        &self.local_map
    }

    pub fn global_map(&self) -> &Arc<PointCloud> {
        &self.global_map
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// A grid of points every 2 units over [-100, 100] x [-100, 100] x [-5, 5].
    fn slab() -> Arc<PointCloud> {
        let mut coords = Vec::new();
        for i in -50..=50 {
            for j in -50..=50 {
                for k in [-5.0, 0.0, 5.0] {
                    coords.push([i as f64 * 2.0, j as f64 * 2.0, k]);
                }
            }
        }
        Arc::new(PointCloud::from_xyz(coords))
    }

    #[test]
    fn recenter_yields_a_subset_inside_the_region() {
        let global = slab();
        let mut window = LocalMapWindow::new(Arc::clone(&global), [30.0, 20.0, 10.0], 5.0);
        let local = window.recenter(Point3::new(40.0, -10.0, 0.0));

        assert_eq!(
            window.region().as_array(),
            [10.0, 70.0, -30.0, 10.0, -10.0, 10.0]
        );
        assert!(!local.is_empty());
        assert!(local.iter().all(|p| window.region().contains(&p.position)));
        let key = |p: &crate::messages::Point| {
            (p.position.x.to_bits(), p.position.y.to_bits(), p.position.z.to_bits())
        };
        let global_keys: HashSet<_> = global.iter().map(key).collect();
        assert!(local.iter().all(|p| global_keys.contains(&key(p))));
        // 31 x 21 columns of 3 points each.
        assert_eq!(local.len(), 31 * 21 * 3);
        assert!(Arc::ptr_eq(window.local_map(), &local));
    }

    #[test]
    fn recenter_replaces_rather_than_merges() {
        let mut window = LocalMapWindow::new(slab(), [10.0, 10.0, 10.0], 2.0);
        let first = window.recenter(Point3::new(-80.0, 0.0, 0.0));
        let second = window.recenter(Point3::new(80.0, 0.0, 0.0));
        assert_eq!(first.len(), second.len());
        assert!(second.iter().all(|p| p.position.x >= 70.0));
    }

    #[test]
    fn origin_outside_the_map_gives_an_empty_window() {
        let mut window = LocalMapWindow::new(slab(), [10.0, 10.0, 10.0], 2.0);
        assert!(window.recenter(Point3::new(500.0, 0.0, 0.0)).is_empty());
    }

    #[test]
    fn trigger_fires_within_margin_of_either_edge() {
        // Region [-60, 60] on every axis, margin 50.
        let window = LocalMapWindow::new(slab(), [60.0, 60.0, 60.0], 50.0);

        assert_eq!(window.refresh_trigger(&Point3::new(0.0, 0.0, 0.0)), None);
        assert_eq!(window.refresh_trigger(&Point3::new(9.9, -9.9, 0.0)), None);
        // |45 - 60| = 15 < 50
        assert_eq!(
            window.refresh_trigger(&Point3::new(45.0, 0.0, 0.0)),
            Some(Axis::X)
        );
        assert_eq!(
            window.refresh_trigger(&Point3::new(0.0, -20.0, 0.0)),
            Some(Axis::Y)
        );
        assert_eq!(
            window.refresh_trigger(&Point3::new(0.0, 0.0, 10.0)),
            Some(Axis::Z)
        );
        // Exactly at the margin is not "farther than" it.
        assert_eq!(
            window.refresh_trigger(&Point3::new(10.0, 0.0, 0.0)),
            Some(Axis::X)
        );
    }

    #[test]
    fn trigger_stops_at_the_first_axis() {
        let window = LocalMapWindow::new(slab(), [60.0, 60.0, 60.0], 50.0);
        assert_eq!(
            window.refresh_trigger(&Point3::new(45.0, 45.0, 45.0)),
            Some(Axis::X)
        );
        assert_eq!(
            window.refresh_trigger(&Point3::new(0.0, 45.0, 45.0)),
            Some(Axis::Y)
        );
    }

    #[test]
    fn zero_margin_only_fires_on_an_edge() {
        let window = LocalMapWindow::new(slab(), [60.0, 60.0, 60.0], 0.0);
        assert_eq!(window.refresh_trigger(&Point3::new(59.999, 0.0, 0.0)), None);
        assert_eq!(
            window.refresh_trigger(&Point3::new(60.0, 0.0, 0.0)),
            Some(Axis::X)
        );
    }
}
