// meridian_core/src/registration/mod.rs

use crate::config::RegistrationConfig;
use crate::error::RegistrationError;
use crate::messages::PointCloud;
use crate::types::Pose;
use std::sync::Arc;

// --- Registration Output ---
/// The result of aligning a source cloud to the current target.
#[derive(Debug, Clone)]
pub struct Alignment {
    /// Refined pose taking source coordinates into the target frame.
    pub pose: Pose,
    /// The source cloud mapped through `pose`.
    pub aligned: PointCloud,
    /// False when the iteration budget ran out before the update became small.
    /// The pose is still the best estimate found.
    pub converged: bool,
    pub iterations: u32,
    /// Residual of the final pose; lower is better. Its unit depends on the
    /// engine, see the implementations.
    pub fitness: f64,
}

// --- The Registration Contract ---
/// The contract for any scan-to-map registration engine.
///
/// The target is fixed between calls to `set_target` and any search
/// structure over it is built there, once; `align` then only reads it.
pub trait Registration: Send + Sync {
    /// Replaces the target cloud. An empty target is accepted; `align` then
    /// reports `RegistrationError::EmptyTarget` instead of panicking.
    fn set_target(&mut self, target: Arc<PointCloud>);

    /// Refines `guess` so that `source` lines up with the target.
    fn align(&self, source: &PointCloud, guess: &Pose) -> Result<Alignment, RegistrationError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl RegistrationConfig {
    /// Resolves this configuration into a concrete engine, once, at startup.
    pub fn build(&self) -> Box<dyn Registration> {
        match self {
            RegistrationConfig::Icp(config) => Box::new(IcpRegistration::new(config.clone())),
            RegistrationConfig::Ndt(config) => Box::new(NdtRegistration::new(config.clone())),
        }
    }
}

// --- Declare the implementation sub-modules ---
mod icp;
mod ndt;

// --- Re-export the public structs for a clean API ---
pub use icp::IcpRegistration;
pub use ndt::NdtRegistration;

#[cfg(test)]
pub(crate) mod test_clouds {
    //! Deterministic synthetic clouds shared by the engine tests.

    use crate::messages::{Point, PointCloud};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Floor, walls and a few boxes: planar structure constraining all six
    /// degrees of freedom. Surfaces are rough (about 0.1 thick) like real
    /// scans, which keeps the NDT cells from collapsing onto their planes.
    pub fn structured_room(seed: u64) -> PointCloud {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut points = Vec::new();
        let jitter = |rng: &mut ChaCha8Rng| -> f64 { rng.gen_range(-0.1..0.1) };

        for _ in 0..8000 {
            // floor
            let x = rng.gen_range(-10.0..10.0);
            let y = rng.gen_range(-10.0..10.0);
            let z = jitter(&mut rng);
            points.push(Point::new(x, y, z));
        }
        for _ in 0..1500 {
            // walls at x = +-10 and y = +-10
            let a = rng.gen_range(-10.0..10.0);
            let z = rng.gen_range(0.0..4.0);
            let n = jitter(&mut rng);
            points.push(Point::new(10.0 + n, a, z));
            points.push(Point::new(-10.0 + n, a, z));
            points.push(Point::new(a, 10.0 + n, z));
            points.push(Point::new(a, -10.0 + n, z));
        }
        for (cx, cy, h) in [(3.0, 2.0, 1.5), (-4.0, -3.0, 2.5), (-2.0, 5.0, 1.0)] {
            for _ in 0..800 {
                // box faces: two sides and the top
                let u = rng.gen_range(-1.0..1.0);
                let v = rng.gen_range(0.0..h);
                let n = jitter(&mut rng);
                points.push(Point::new(cx + 1.0 + n, cy + u, v));
                points.push(Point::new(cx + u, cy + 1.0 + n, v));
                points.push(Point::new(cx + u, cy + rng.gen_range(-1.0..1.0), h + n));
            }
        }
        PointCloud::new(0.0, points)
    }

    /// A volumetric random cloud: every neighbourhood is unambiguous.
    pub fn random_blob(seed: u64, count: usize, extent: f64) -> PointCloud {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Point::new(
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                    rng.gen_range(-extent..extent),
                )
            })
            .collect()
    }
}
