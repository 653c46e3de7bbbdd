// meridian_core/src/filtering/none.rs

use crate::filtering::CloudFilter;
use crate::messages::PointCloud;

/// A pass-through filter.
/// It is used when a role is configured with no downsampling at all.
#[derive(Default, Debug, Clone, Copy)]
pub struct NoneFilter;

impl CloudFilter for NoneFilter {
    /// Returns an identical copy of the input.
    fn filter(&self, cloud: &PointCloud) -> PointCloud {
        cloud.clone()
    }

    fn name(&self) -> &'static str {
        "None"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_equals_input() {
        let cloud = PointCloud::from_xyz([[1.0, 2.0, 3.0], [1.0, 2.0, 3.0], [-1.0, 0.0, 9.0]]);
        assert_eq!(NoneFilter.filter(&cloud), cloud);
    }
}
