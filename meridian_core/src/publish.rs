// meridian_core/src/publish.rs

//! Read-side surface for consumers running on their own schedule
//! (visualization, telemetry).
//!
//! The localizer is the only writer. Each artifact is an immutable
//! `Arc<PointCloud>` swapped under a short write lock, so a reader holding a
//! snapshot never sees a half-replaced cloud. Every artifact carries a
//! single-consumer dirty flag and a monotonically increasing version for
//! consumers that need to poll independently.

use crate::messages::PointCloud;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One published cloud.
#[derive(Debug, Default)]
pub struct PublishedCloud {
    cloud: RwLock<Arc<PointCloud>>,
    dirty: AtomicBool,
    version: AtomicU64,
}

impl PublishedCloud {
    /// Replaces the snapshot, marks it dirty and bumps the version.
    pub fn publish(&self, cloud: Arc<PointCloud>) {
        *self.cloud.write() = cloud;
        self.version.fetch_add(1, Ordering::AcqRel);
        self.dirty.store(true, Ordering::Release);
    }

    /// The current snapshot, leaving the dirty flag alone.
    pub fn snapshot(&self) -> Arc<PointCloud> {
        Arc::clone(&self.cloud.read())
    }

    /// The current snapshot, clearing the dirty flag.
    pub fn take(&self) -> Arc<PointCloud> {
        self.dirty.store(false, Ordering::Release);
        self.snapshot()
    }

    /// True when something was published since the last `take`.
    pub fn has_new(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of publications so far; zero means nothing was ever published.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// The three artifacts a localizer exposes.
#[derive(Debug, Default)]
pub struct LocalizationOutputs {
    pub global_map: PublishedCloud,
    pub local_map: PublishedCloud,
    pub current_scan: PublishedCloud,
}

impl LocalizationOutputs {
    /// Display copy of the global map; clears its dirty flag.
    pub fn global_map_for_display(&self) -> Arc<PointCloud> {
        self.global_map.take()
    }

    /// Current local map (registration target); clears its dirty flag.
    pub fn local_map(&self) -> Arc<PointCloud> {
        self.local_map.take()
    }

    /// Latest scan expressed in the map frame; clears its dirty flag.
    pub fn transformed_current_scan(&self) -> Arc<PointCloud> {
        self.current_scan.take()
    }

    pub fn has_new_global_map(&self) -> bool {
        self.global_map.has_new()
    }

    pub fn has_new_local_map(&self) -> bool {
        self.local_map.has_new()
    }

    pub fn has_new_current_scan(&self) -> bool {
        self.current_scan.has_new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn take_clears_the_flag_but_snapshot_does_not() {
        let slot = PublishedCloud::default();
        assert!(!slot.has_new());
        assert_eq!(slot.version(), 0);

        slot.publish(Arc::new(PointCloud::from_xyz([[1.0, 2.0, 3.0]])));
        assert!(slot.has_new());
        assert_eq!(slot.snapshot().len(), 1);
        assert!(slot.has_new());

        assert_eq!(slot.take().len(), 1);
        assert!(!slot.has_new());
        assert_eq!(slot.version(), 1);
    }

    #[test]
    fn readers_keep_their_snapshot_across_a_swap() {
        let slot = PublishedCloud::default();
        slot.publish(Arc::new(PointCloud::from_xyz([[1.0, 0.0, 0.0]])));
        let held = slot.snapshot();
        slot.publish(Arc::new(PointCloud::from_xyz([[2.0, 0.0, 0.0], [3.0, 0.0, 0.0]])));

        assert_eq!(held.len(), 1);
        assert_eq!(slot.snapshot().len(), 2);
        assert_eq!(slot.version(), 2);
    }

    #[test]
    fn concurrent_reader_only_sees_whole_clouds() {
        let outputs = Arc::new(LocalizationOutputs::default());
        let reader = {
            let outputs = Arc::clone(&outputs);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let cloud = outputs.local_map();
                    // Every published cloud has n points all at x = n.
                    if let Some(first) = cloud.points.first() {
                        assert_eq!(first.position.x as usize, cloud.len());
                        assert!(cloud.iter().all(|p| p.position.x == first.position.x));
                    }
                }
            })
        };
        for n in 1..200 {
            let cloud = PointCloud::from_xyz((0..n).map(|_| [n as f64, 0.0, 0.0]));
            outputs.local_map.publish(Arc::new(cloud));
        }
        reader.join().unwrap();
        assert_eq!(outputs.local_map.version(), 199);
    }
}
