//! Angular pivot cover
//!
//! Every vector with a non-zero norm sits in exactly one ball on the unit
//! sphere, centred on a pivot vector. A ball's radius is the widest angle
//! between its pivot and any member assigned to it. Angles obey the
//! triangle inequality, so no member of a ball lies closer to a query than
//! `angle(query, pivot) - radius`. A search that already holds `k` hits can
//! skip every ball whose best possible score is below its k-th hit, and
//! still return exactly what a full scan would.
//!
//! Angles are computed in `f64` on normalised copies; the margin below
//! covers the rounding of the `f32` scores they are compared against.

/// Slack between a ball's score bound and the k-th hit before the ball is skipped
const SCORE_MARGIN: f64 = 1e-4;

/// `v / |v|` in `f64`, or `None` for the zero vector
pub(super) fn unit_vector(v: &[f32]) -> Option<Vec<f64>> {
    let norm = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| f64::from(*x) / norm).collect())
}

fn angle(a: &[f64], b: &[f64]) -> f64 {
    let cos: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    cos.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone)]
struct Ball {
    pivot: Vec<f64>,
    radius: f64,
    members: Vec<usize>,
}

/// Partition of index slots into angular balls
#[derive(Debug, Clone, Default)]
pub(super) struct PivotCover {
    balls: Vec<Ball>,
    /// Zero vectors, which score 0 against every query
    unbounded: Vec<usize>,
}

impl PivotCover {
    pub(super) fn clear(&mut self) {
        self.balls.clear();
        self.unbounded.clear();
    }

    pub(super) fn balls(&self) -> usize {
        self.balls.len()
    }

    /// Place `slot`; with `pivot` set, or while no ball exists, it opens a
    /// new ball, otherwise it joins the ball with the nearest pivot
    pub(super) fn assign(&mut self, slot: usize, embedding: &[f32], pivot: bool) {
        let Some(unit) = unit_vector(embedding) else {
            self.unbounded.push(slot);
            return;
        };

        if pivot || self.balls.is_empty() {
            self.balls.push(Ball {
                pivot: unit,
                radius: 0.0,
                members: vec![slot],
            });
            return;
        }

        let mut nearest = 0;
        let mut nearest_angle = f64::INFINITY;
        for (index, ball) in self.balls.iter().enumerate() {
            let theta = angle(&ball.pivot, &unit);
            if theta < nearest_angle {
                nearest = index;
                nearest_angle = theta;
            }
        }
        let ball = &mut self.balls[nearest];
        ball.radius = ball.radius.max(nearest_angle);
        ball.members.push(slot);
    }

    /// Slots whose score against `query` could reach `threshold`
    ///
    /// Without a threshold, or for a zero query, every slot qualifies.
    pub(super) fn candidates(&self, query: Option<&[f64]>, threshold: Option<f32>) -> Vec<usize> {
        let (Some(query), Some(threshold)) = (query, threshold) else {
            return self.all();
        };
        let threshold = f64::from(threshold);

        let mut slots = Vec::new();
        for ball in &self.balls {
            let closest = (angle(&ball.pivot, query) - ball.radius).max(0.0);
            if closest.cos() + SCORE_MARGIN >= threshold {
                slots.extend_from_slice(&ball.members);
            }
        }
        if SCORE_MARGIN >= threshold {
            slots.extend_from_slice(&self.unbounded);
        }
        slots
    }

    fn all(&self) -> Vec<usize> {
        self.balls
            .iter()
            .flat_map(|ball| ball.members.iter().copied())
            .chain(self.unbounded.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_members_join_nearest_pivot() {
        let mut cover = PivotCover::default();
        cover.assign(0, &[1.0, 0.0], true);
        cover.assign(1, &[0.0, 1.0], true);
        cover.assign(2, &[0.9, 0.1], false);
        cover.assign(3, &[0.0, 0.0], false);

        assert_eq!(cover.balls(), 2);
        assert_eq!(cover.balls[0].members, vec![0, 2]);
        assert!(cover.balls[0].radius > 0.0);
        assert_eq!(cover.balls[1].members, vec![1]);
        assert_eq!(cover.unbounded, vec![3]);
    }

    #[test]
    fn test_far_balls_are_skipped() {
        let mut cover = PivotCover::default();
        cover.assign(0, &[1.0, 0.0], true);
        cover.assign(1, &[0.99, 0.05], false);
        cover.assign(2, &[-1.0, 0.0], true);
        cover.assign(3, &[-0.99, 0.05], false);

        let query = unit_vector(&[1.0, 0.0]).unwrap();
        let mut near = cover.candidates(Some(&query), Some(0.9));
        near.sort();
        assert_eq!(near, vec![0, 1]);

        // Without a threshold nothing can be ruled out
        assert_eq!(cover.candidates(Some(&query), None).len(), 4);
        assert_eq!(cover.candidates(None, Some(0.9)).len(), 4);
    }

    #[test]
    fn test_bound_never_excludes_a_better_member() {
        let mut cover = PivotCover::default();
        cover.assign(0, &[1.0, 0.0, 0.0], true);
        cover.assign(1, &[0.0, 1.0, 0.0], false);

        // Member 1 scores exactly 1.0 against this query
        let query = unit_vector(&[0.0, 1.0, 0.0]).unwrap();
        assert!(cover.candidates(Some(&query), Some(1.0)).contains(&1));
    }

    #[test]
    fn test_zero_vectors_only_when_threshold_allows() {
        let mut cover = PivotCover::default();
        cover.assign(0, &[1.0, 0.0], true);
        cover.assign(1, &[0.0, 0.0], false);

        let query = unit_vector(&[1.0, 0.0]).unwrap();
        assert!(!cover.candidates(Some(&query), Some(0.5)).contains(&1));
        assert!(cover.candidates(Some(&query), Some(-0.5)).contains(&1));
    }
}
