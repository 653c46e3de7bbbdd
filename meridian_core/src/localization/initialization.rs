// meridian_core/src/localization/initialization.rs

use crate::config::CoarseFixOverwrite;
use crate::types::Pose;
use std::fmt;
use tracing::info;

/// How far the localizer is from trusting its own pose.
///
/// Transitions only move forward. `Tracking` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitState {
    /// Nothing known; registration is seeded from identity.
    Uninitialized,
    /// At least one coarse fix arrived, not yet enough to be trusted.
    CoarseFixPending,
    /// Registration is seeded from the pose predictor.
    Tracking,
}

impl fmt::Display for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitState::Uninitialized => "uninitialized",
            InitState::CoarseFixPending => "coarse-fix-pending",
            InitState::Tracking => "tracking",
        };
        f.write_str(name)
    }
}

/// What a coarse fix changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarseFixOutcome {
    /// Set on the first fix: the pose just committed as the initial pose.
    /// The caller recentres the local map on it.
    pub committed: Option<Pose>,
    pub state: InitState,
}

/// # InitializationArbiter
/// Owns the initialization state machine, fed either by a stream of coarse
/// fixes or by a single place-recognition proposal.
///
/// The arbiter is not synchronized: the two feeding paths must be driven
/// from one thread or behind one external lock.
#[derive(Debug, Clone)]
pub struct InitializationArbiter {
    state: InitState,
    coarse_fix_count: u32,
    /// Tracking is declared once the fix count exceeds this.
    threshold: u32,
    overwrite: CoarseFixOverwrite,
    coarse_pose: Option<Pose>,
    initial_pose: Pose,
}

impl InitializationArbiter {
    pub fn new(threshold: u32, overwrite: CoarseFixOverwrite) -> Self {
        Self {
            state: InitState::Uninitialized,
            coarse_fix_count: 0,
            threshold,
            overwrite,
            coarse_pose: None,
            initial_pose: Pose::identity(),
        }
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == InitState::Tracking
    }

    pub fn coarse_fix_count(&self) -> u32 {
        self.coarse_fix_count
    }

    /// The latest stored coarse fix, if any.
    pub fn coarse_pose(&self) -> Option<&Pose> {
        self.coarse_pose.as_ref()
    }

    /// The last committed initial pose; identity until one is committed.
    pub fn initial_pose(&self) -> &Pose {
        &self.initial_pose
    }

    /// Registration seed while not tracking: the latest coarse fix, or
    /// identity when none has arrived.
    pub fn seed(&self) -> Pose {
        self.coarse_pose.unwrap_or_else(Pose::identity)
    }

    /// Records a coarse fix.
    ///
    /// The first fix is committed as the initial pose (unless tracking was
    /// already reached by another path) and moves `Uninitialized` to
    /// `CoarseFixPending`. Once the count exceeds the threshold the state
    /// becomes `Tracking`.
    pub fn submit_coarse_fix(&mut self, pose: Pose) -> CoarseFixOutcome {
        self.coarse_fix_count = self.coarse_fix_count.saturating_add(1);
        let tracking = self.is_tracking();

        if !tracking || self.overwrite == CoarseFixOverwrite::Always {
            self.coarse_pose = Some(pose);
        }

        let mut committed = None;
        if self.coarse_fix_count == 1 && !tracking {
            self.initial_pose = pose;
            committed = Some(pose);
            self.advance(InitState::CoarseFixPending, "first coarse fix");
        }
        if self.coarse_fix_count > self.threshold {
            self.advance(InitState::Tracking, "coarse fix threshold exceeded");
        }

        CoarseFixOutcome {
            committed,
            state: self.state,
        }
    }

    /// Commits a place-recognition proposal and starts tracking.
    pub fn accept_proposal(&mut self, pose: Pose) {
        self.initial_pose = pose;
        self.advance(InitState::Tracking, "place recognition proposal accepted");
    }

    /// Manual override: start tracking now.
    pub fn mark_initialized(&mut self) {
        self.advance(InitState::Tracking, "marked initialized");
    }

    /// Moves forward to `next`; never backwards.
    fn advance(&mut self, next: InitState, reason: &str) {
        if next > self.state {
            info!(from = %self.state, to = %next, count = self.coarse_fix_count, "{reason}");
            self.state = next;
        }
    }
}
