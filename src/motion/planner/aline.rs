// SPDX-License-Identifier: GPL-3.0-or-later

// Accelerated lines. A line is cut into a head (accelerating from the entry
// velocity), a body (cruising) and a tail (decelerating to the exit
// velocity).
//
// In exact stop mode the exit velocity is always zero and the three regions
// are planned at once. In the other modes the exit velocity depends on the
// corner with the next line, which is not known yet. The tail is then held
// back: the line reserves enough room at its end to decelerate to any
// velocity, and the tail is planned once the next line shows up, or when the
// motors are about to run out of moves.

#[cfg(not(test))]
use num::Float;

use crate::config::{MachineConfig, PathControl};
use crate::consts::planner::{MIN_VELOCITY, VELOCITY_SEARCH_ITERATIONS};

use super::ramp::{ramp_length, stop_velocity, tail_reserve, Ramp};
use super::segments::{Path, Profile, Section, SectionRun};

/// The end of a line whose exit velocity isn't known yet.
#[derive(Copy, Clone, Debug)]
pub struct HeldTail {
    pub path: Path,
    /// Distance along the path where the tail begins.
    pub start: f64,
    pub velocity: f64,
}

impl HeldTail {
    fn reserve(&self) -> f64 {
        (self.path.length - self.start).max(0.0)
    }

    /// Plans the tail down to `exit_velocity`. What the deceleration doesn't
    /// need of the reserved room is run at cruise velocity first.
    pub fn release(&self, exit_velocity: f64, config: &MachineConfig) -> SectionRun {
        let exit_velocity = exit_velocity.min(self.velocity).max(0.0);
        let ramp = Ramp::new(self.velocity, exit_velocity, config.max_linear_jerk);
        let cruise = (self.reserve() - ramp.length()).max(0.0);

        let mut run = SectionRun::new(self.path, self.path.target);
        run.push(Section::sliced(
            self.start,
            Profile::Cruise { velocity: self.velocity, length: cruise },
            config.min_segment_time,
        ));
        run.push(Section::sliced(self.start + cruise, Profile::Ramp(ramp), config.min_segment_time));
        run
    }
}

/// The planned line. `hold` is set when the tail waits for the next move.
pub struct AlinePlan {
    pub run: SectionRun,
    pub hold: Option<HeldTail>,
    pub cruise_velocity: f64,
}

pub fn plan_aline(config: &MachineConfig, path: Path, velocity: f64, entry_velocity: f64) -> AlinePlan {
    let jerk = config.max_linear_jerk;
    let deferred = config.path_control != PathControl::ExactStop;
    let length = path.length;
    let entry = entry_velocity.min(velocity).max(0.0);

    let reserve_for = |v: f64| if deferred { tail_reserve(v, jerk) } else { ramp_length(v, 0.0, jerk) };
    let fits = |v: f64| ramp_length(entry, v, jerk) + reserve_for(v) <= length;

    // Short lines can't reach the requested velocity. The entry velocity
    // always fits, it was capped by corner_velocity() for that.
    let cruise = if fits(velocity) {
        velocity
    } else if !fits(entry) {
        entry
    } else {
        let (mut lo, mut hi) = (entry, velocity);
        for _ in 0..VELOCITY_SEARCH_ITERATIONS {
            let mid = (lo + hi) / 2.0;
            if fits(mid) { lo = mid } else { hi = mid }
        }
        lo
    };

    let head = Ramp::new(entry, cruise, jerk);
    let tail_start = (length - reserve_for(cruise)).max(head.length()).min(length);
    let body = Profile::Cruise { velocity: cruise, length: tail_start - head.length() };

    if deferred {
        let mut run = SectionRun::new(path, path.point_at(tail_start));
        run.push(Section::sliced(0.0, Profile::Ramp(head), config.min_segment_time));
        run.push(Section::sliced(head.length(), body, config.min_segment_time));
        let hold = HeldTail { path, start: tail_start, velocity: cruise };
        AlinePlan { run, hold: Some(hold), cruise_velocity: cruise }
    } else {
        let tail = Ramp::new(cruise, 0.0, jerk);
        let mut run = SectionRun::new(path, path.target);
        run.push(Section::sliced(0.0, Profile::Ramp(head), config.min_segment_time));
        run.push(Section::sliced(head.length(), body, config.min_segment_time));
        run.push(Section::sliced(tail_start, Profile::Ramp(tail), config.min_segment_time));
        AlinePlan { run, hold: None, cruise_velocity: cruise }
    }
}

/// Velocity at the junction of a held tail and the next line.
///
/// The junction is taken at min(v_prev, v_next) * cos(theta/2), theta being
/// the change of direction. Continuous mode goes through at full velocity
/// below angular_jerk_lower and stops above angular_jerk_upper. The result
/// never exceeds what the next line needs to stop within its own length.
pub fn corner_velocity(config: &MachineConfig, prev: &HeldTail, next: &Path, next_velocity: f64) -> f64 {
    let v_max = prev.velocity.min(next_velocity);
    let theta = prev.path.cos_angle_to(next).max(-1.0).min(1.0).acos();

    let v = match config.path_control {
        PathControl::ExactStop => 0.0,
        PathControl::ExactPath => v_max * (theta / 2.0).cos(),
        PathControl::Continuous if theta < config.angular_jerk_lower => v_max,
        PathControl::Continuous if theta > config.angular_jerk_upper => 0.0,
        PathControl::Continuous => v_max * (theta / 2.0).cos(),
    };

    let v = v.min(stop_velocity(next.length, config.max_linear_jerk)).max(0.0);
    if v < MIN_VELOCITY { 0.0 } else { v }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path_control: PathControl) -> MachineConfig {
        MachineConfig { path_control, ..MachineConfig::default() }
    }

    fn path(from: [f64; 2], to: [f64; 2]) -> Path {
        Path::new(&[from[0], from[1], 0.0, 0.0], &[to[0], to[1], 0.0, 0.0])
    }

    #[test]
    fn long_lines_reach_the_requested_velocity() {
        let cfg = config(PathControl::ExactStop);
        let plan = plan_aline(&cfg, path([0.0, 0.0], [100.0, 0.0]), 1200.0, 0.0);
        assert_eq!(plan.cruise_velocity, 1200.0);
        assert!(plan.hold.is_none());
    }

    #[test]
    fn short_lines_cruise_slower() {
        let cfg = config(PathControl::ExactStop);
        let p = path([0.0, 0.0], [1.0, 0.0]);
        let plan = plan_aline(&cfg, p, 1200.0, 0.0);
        let v = plan.cruise_velocity;
        assert!(v > 0.0 && v < 1200.0);

        // Head and tail use up the whole line.
        let used = 2.0 * ramp_length(0.0, v, cfg.max_linear_jerk);
        assert!((used - 1.0).abs() < 1e-6);
    }

    #[test]
    fn deferred_tail_reserves_room_to_stop() {
        let cfg = config(PathControl::ExactPath);
        let p = path([0.0, 0.0], [50.0, 0.0]);
        let plan = plan_aline(&cfg, p, 1500.0, 0.0);
        let hold = plan.hold.unwrap();
        assert_eq!(hold.velocity, 1500.0);
        let reserve = tail_reserve(1500.0, cfg.max_linear_jerk);
        assert!((hold.start - (50.0 - reserve)).abs() < 1e-9);

        // Stopping from the held tail fits in the reserve.
        let stop = Ramp::new(1500.0, 0.0, cfg.max_linear_jerk);
        assert!(stop.length() <= reserve);
    }

    #[test]
    fn straight_junctions_keep_their_velocity() {
        let cfg = config(PathControl::ExactPath);
        let prev = plan_aline(&cfg, path([0.0, 0.0], [50.0, 0.0]), 1200.0, 0.0).hold.unwrap();
        let next = path([50.0, 0.0], [100.0, 0.0]);
        let v = corner_velocity(&cfg, &prev, &next, 1500.0);
        assert!((v - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn right_angles_slow_down() {
        let next = path([50.0, 0.0], [50.0, 50.0]);

        let cfg = config(PathControl::ExactPath);
        let prev = plan_aline(&cfg, path([0.0, 0.0], [50.0, 0.0]), 1200.0, 0.0).hold.unwrap();
        let v = corner_velocity(&cfg, &prev, &next, 1200.0);
        assert!((v - 1200.0 * core::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        // 90 degrees is between the lower and upper angular jerk limits.
        let cfg = config(PathControl::Continuous);
        assert!((corner_velocity(&cfg, &prev, &next, 1200.0) - v).abs() < 1e-9);
    }

    #[test]
    fn reversals_stop_in_continuous_mode() {
        let cfg = config(PathControl::Continuous);
        let prev = plan_aline(&cfg, path([0.0, 0.0], [50.0, 0.0]), 1200.0, 0.0).hold.unwrap();
        let back = path([50.0, 0.0], [0.0, 0.1]);
        assert_eq!(corner_velocity(&cfg, &prev, &back, 1200.0), 0.0);

        let slight = path([50.0, 0.0], [100.0, 1.0]);
        assert!((corner_velocity(&cfg, &prev, &slight, 1200.0) - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn corners_are_capped_by_the_next_line() {
        let cfg = config(PathControl::ExactPath);
        let prev = plan_aline(&cfg, path([0.0, 0.0], [50.0, 0.0]), 1200.0, 0.0).hold.unwrap();
        let tiny = path([50.0, 0.0], [50.05, 0.0]);
        let v = corner_velocity(&cfg, &prev, &tiny, 1200.0);
        assert!(v < 1200.0);
        assert!(tail_reserve(v, cfg.max_linear_jerk) <= tiny.length * (1.0 + 1e-9));
    }

    #[test]
    fn full_speed_exits_cruise_through_the_reserve() {
        let cfg = config(PathControl::ExactPath);
        let p = path([0.0, 0.0], [20.0, 0.0]);
        let hold = plan_aline(&cfg, p, 600.0, 0.0).hold.unwrap();

        let to_stop = hold.release(0.0, &cfg);
        let at_speed = hold.release(600.0, &cfg);
        // Full speed exits spend the whole reserve cruising.
        assert!(at_speed.segments() < to_stop.segments());
    }
}
