//! # Remote-Entity Interpolation
//!
//! Remote cells are rendered in the past. Snapshots are timestamped on
//! receipt, shifted by a fixed delay, and the renderer samples the
//! buffer at presentation time, blending between the two timestamps
//! that bracket it. The delay buys a cushion: as long as the next
//! snapshot arrives within it, remote motion stays continuous even
//! when the network does not.
//!
//! ```text
//!                 render here (now)
//!                        │
//!   s0────────s1─────────┼──s2─────────s3        (buffered poses)
//!             └── lerp ──┘
//! ```
//!
//! When presentation time runs past the second sample the front is
//! dropped, always keeping at least two so the blend never runs dry;
//! with two samples and an overdue clock the blend extrapolates
//! through the most recent motion instead of freezing.

use std::collections::VecDeque;

use petri_shared::entity::Pose;

/// A pose bound to the presentation timestamp it should be shown at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedPose {
    /// Presentation time in milliseconds (receipt time plus delay).
    pub time_ms: u64,
    /// Pose decoded from the snapshot.
    pub pose: Pose,
}

/// Timestamped pose buffer for one remote cell.
#[derive(Clone, Debug, Default)]
pub struct EntityInterpolator {
    samples: VecDeque<TimedPose>,
    held: Pose,
}

impl EntityInterpolator {
    /// Creates an empty interpolator holding the given initial pose.
    #[must_use]
    pub fn new(initial: Pose) -> Self {
        Self {
            samples: VecDeque::with_capacity(8),
            held: initial,
        }
    }

    /// Buffers a pose to be shown at `time_ms`.
    ///
    /// The caller stamps `time_ms` as receipt time plus the
    /// interpolation delay. Out-of-order arrivals older than the
    /// newest buffered sample are dropped; the unreliable channel
    /// already delivered a fresher pose, so the stragglers carry
    /// nothing worth rewinding for.
    pub fn push(&mut self, time_ms: u64, pose: Pose) {
        if self
            .samples
            .back()
            .is_some_and(|newest| time_ms <= newest.time_ms)
        {
            return;
        }
        self.samples.push_back(TimedPose { time_ms, pose });
    }

    /// Number of buffered samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the pose to render at `now_ms`.
    ///
    /// With two or more samples this blends (unclamped) between the
    /// first pair; with one it shows that sample; with none it holds
    /// the last returned pose.
    pub fn sample(&mut self, now_ms: u64) -> Pose {
        // Advance past consumed samples, keeping a pair to blend.
        while self.samples.len() > 2
            && self
                .samples
                .get(1)
                .is_some_and(|second| now_ms > second.time_ms)
        {
            self.samples.pop_front();
        }

        self.held = match (self.samples.front(), self.samples.get(1)) {
            (Some(from), Some(to)) => {
                let span = to.time_ms.saturating_sub(from.time_ms);
                if span == 0 {
                    to.pose
                } else {
                    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                    let t = ((now_ms as f64 - from.time_ms as f64) / span as f64) as f32;
                    from.pose.lerp(to.pose, t)
                }
            }
            (Some(only), None) => only.pose,
            _ => self.held,
        };
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petri_shared::math::Vec2;

    fn pose_at(x: f32) -> Pose {
        Pose::new(Vec2::new(x, 0.0), 0.0)
    }

    #[test]
    fn test_blend_is_convex_between_bracketing_samples() {
        let mut interp = EntityInterpolator::new(Pose::default());
        interp.push(100, pose_at(0.0));
        interp.push(200, pose_at(10.0));

        assert_eq!(interp.sample(100).position.x, 0.0);
        let mid = interp.sample(150).position.x;
        assert!((mid - 5.0).abs() < 1e-4);
        assert_eq!(interp.sample(200).position.x, 10.0);
    }

    #[test]
    fn test_overdue_clock_extrapolates_forward() {
        let mut interp = EntityInterpolator::new(Pose::default());
        interp.push(100, pose_at(0.0));
        interp.push(200, pose_at(10.0));

        // 50 ms past the newest sample: keep moving along the segment.
        let ahead = interp.sample(250).position.x;
        assert!((ahead - 15.0).abs() < 1e-4);
    }

    #[test]
    fn test_consumed_samples_are_dropped_but_a_pair_remains() {
        let mut interp = EntityInterpolator::new(Pose::default());
        interp.push(100, pose_at(0.0));
        interp.push(200, pose_at(10.0));
        interp.push(300, pose_at(20.0));
        interp.push(400, pose_at(30.0));

        let x = interp.sample(350).position.x;
        assert!((x - 25.0).abs() < 1e-4);
        assert_eq!(interp.len(), 2);

        // Far past everything: the final pair stays for extrapolation.
        interp.sample(10_000);
        assert_eq!(interp.len(), 2);
    }

    #[test]
    fn test_single_sample_is_shown_as_is() {
        let mut interp = EntityInterpolator::new(Pose::default());
        interp.push(500, pose_at(7.0));
        assert_eq!(interp.sample(100).position.x, 7.0);
        assert_eq!(interp.sample(900).position.x, 7.0);
    }

    #[test]
    fn test_empty_buffer_holds_the_last_pose() {
        let mut interp = EntityInterpolator::new(pose_at(3.0));
        assert_eq!(interp.sample(0).position.x, 3.0);

        interp.push(100, pose_at(0.0));
        interp.push(200, pose_at(10.0));
        interp.sample(150);
        assert_eq!(interp.sample(150).position.x, 5.0);
    }

    #[test]
    fn test_orientation_blends_across_the_wrap_seam() {
        let mut interp = EntityInterpolator::new(Pose::default());
        interp.push(100, Pose::new(Vec2::ZERO, 3.0));
        interp.push(200, Pose::new(Vec2::ZERO, -3.0));

        // Halfway lands near the seam, not near zero: the cell turns
        // 0.28 rad through ±PI instead of sweeping 6 rad back.
        let mid = interp.sample(150).orientation;
        assert!(mid.abs() > 3.0, "took the long way: {mid}");
    }

    #[test]
    fn test_out_of_order_pushes_are_ignored() {
        let mut interp = EntityInterpolator::new(Pose::default());
        interp.push(200, pose_at(10.0));
        interp.push(100, pose_at(0.0));
        assert_eq!(interp.len(), 1);
        assert_eq!(interp.sample(200).position.x, 10.0);
    }
}
