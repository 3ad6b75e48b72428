// SPDX-License-Identifier: GPL-3.0-or-later

// Jerk limited velocity changes. Velocities are in mm/min, times in minutes
// and jerk in mm/min^3, the units the feed rates come in.
//
// The acceleration rises linearly during the first half of the ramp and falls
// back to zero during the second half. The velocity follows an S-curve:
//
//   v ^          ______ v1
//     |        .'
//     |      .'
//     |  ___'
//   v0|_'
//     +-----------------> t
//     0      T/2      T
//
// With a peak acceleration of J*T/2, reaching v1 from v0 takes
// T = 2*sqrt(|v1-v0|/J) and the ramp covers (v0+v1)/2 * T.

#[cfg(not(test))]
use num::Float;

// (4/3)*sqrt(2/3), the factor of the longest deceleration, see tail_reserve().
const TAIL_RESERVE_FACTOR: f64 = 1.088_662_107_903_635_5;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ramp {
    pub v0: f64,
    pub v1: f64,
    pub duration: f64,
}

impl Ramp {
    pub fn new(v0: f64, v1: f64, jerk: f64) -> Self {
        Self { v0, v1, duration: ramp_time(v0, v1, jerk) }
    }

    pub fn length(&self) -> f64 {
        (self.v0 + self.v1) / 2.0 * self.duration
    }

    /// Distance covered `t` minutes into the ramp.
    pub fn distance_at(&self, t: f64) -> f64 {
        let t_total = self.duration;
        if t_total <= 0.0 {
            return 0.0;
        }
        let t = t.max(0.0).min(t_total);
        let dv = self.v1 - self.v0;

        // The second half mirrors the first one, seen from the end.
        let half = |v: f64, dv: f64, t: f64| v * t + 2.0 * dv * t * t * t / (3.0 * t_total * t_total);
        if t <= t_total / 2.0 {
            half(self.v0, dv, t)
        } else {
            self.length() - half(self.v1, -dv, t_total - t)
        }
    }

    pub fn velocity_at(&self, t: f64) -> f64 {
        let t_total = self.duration;
        if t_total <= 0.0 {
            return self.v1;
        }
        let t = t.max(0.0).min(t_total);
        let dv = self.v1 - self.v0;
        if t <= t_total / 2.0 {
            self.v0 + 2.0 * dv * t * t / (t_total * t_total)
        } else {
            let u = t_total - t;
            self.v1 - 2.0 * dv * u * u / (t_total * t_total)
        }
    }
}

pub fn ramp_time(v0: f64, v1: f64, jerk: f64) -> f64 {
    2.0 * ((v1 - v0).abs() / jerk).sqrt()
}

pub fn ramp_length(v0: f64, v1: f64, jerk: f64) -> f64 {
    (v0 + v1) / 2.0 * ramp_time(v0, v1, jerk)
}

/// Room to keep at the end of a line cruising at `v` so that it can slow down
/// to any exit velocity. Reaching v/3 takes the longest distance:
/// (4/3) * v * sqrt(2v / 3J).
pub fn tail_reserve(v: f64, jerk: f64) -> f64 {
    TAIL_RESERVE_FACTOR * v * (v / jerk).sqrt()
}

/// The highest velocity from which a line of `length` can still slow down to
/// any exit velocity. Inverse of tail_reserve().
pub fn stop_velocity(length: f64, jerk: f64) -> f64 {
    (length / TAIL_RESERVE_FACTOR).powf(2.0 / 3.0) * jerk.powf(1.0 / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JERK: f64 = 50_000_000.0;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn ramp_from_rest() {
        let ramp = Ramp::new(0.0, 1200.0, JERK);
        assert!(close(ramp.duration, 2.0 * (1200.0 / JERK).sqrt()));
        assert!(close(ramp.length(), 600.0 * ramp.duration));
        assert!(close(ramp.distance_at(ramp.duration), ramp.length()));
        assert_eq!(ramp.distance_at(0.0), 0.0);
    }

    #[test]
    fn halves_meet_at_the_midpoint() {
        for (v0, v1) in [(0.0, 1000.0), (1000.0, 200.0), (300.0, 300.5)] {
            let ramp = Ramp::new(v0, v1, JERK);
            let mid = ramp.duration / 2.0;
            let eps = ramp.duration * 1e-9;
            assert!(close(ramp.distance_at(mid - eps), ramp.distance_at(mid + eps)));
            assert!(close(ramp.velocity_at(mid), (v0 + v1) / 2.0));
            assert!(close(ramp.velocity_at(ramp.duration), v1));
        }
    }

    #[test]
    fn distance_is_monotonic() {
        let ramp = Ramp::new(800.0, 0.0, JERK);
        let mut last = 0.0;
        for i in 1..=100 {
            let s = ramp.distance_at(ramp.duration * i as f64 / 100.0);
            assert!(s > last);
            last = s;
        }
    }

    #[test]
    fn reserve_covers_every_exit_velocity() {
        let v = 1500.0;
        let reserve = tail_reserve(v, JERK);
        let worst = (0..=300)
            .map(|i| ramp_length(v, v * i as f64 / 300.0, JERK))
            .fold(0.0, f64::max);
        // v/3 is on the grid, so the worst case is hit exactly.
        assert!(close(worst, reserve));
    }

    #[test]
    fn stop_velocity_inverts_the_reserve() {
        for v in [10.0, 600.0, 2400.0] {
            assert!(close(stop_velocity(tail_reserve(v, JERK), JERK), v));
        }
    }
}
