// SPDX-License-Identifier: GPL-3.0-or-later

// Turning a path into motor queue records. Every generator describes its
// motion as points along the path and the time to get there; the cursor turns
// each point into a step delta from what was queued before. Since each
// delta is taken between two rounded absolute positions, rounding errors
// never accumulate and the last segment lands exactly on the target.

use heapless::Vec;
#[cfg(not(test))]
use num::Float;

use crate::config::MachineConfig;
use crate::consts::stepper::{MIN_STEP_PERIOD_TICKS, TICKS_PER_MICROSECOND};
use crate::motion::motor_queue::QueueWriter;
use crate::motion::units::{minutes_to_us, prelude::*, vector_length};
use crate::status::{Error, MotionResult, Status};

use super::ramp::Ramp;

/// The step position of what has been sent to the motor queue. It trails
/// the accepted position of the planner while a generator runs.
pub struct StepCursor {
    queued: StepVector,
    // Time of segments too short to move any motor, added to the next one.
    carry_us: f64,
}

impl StepCursor {
    pub fn new(position: StepVector) -> Self {
        Self { queued: position, carry_us: 0.0 }
    }

    pub fn position(&self) -> StepVector {
        self.queued
    }

    pub fn reset(&mut self, position: StepVector) {
        self.queued = position;
        self.carry_us = 0.0;
    }

    pub fn drop_carry(&mut self) {
        self.carry_us = 0.0;
    }

    /// Queues the move from the queued position to `point`, taking
    /// `microseconds`. Eagain when the motor queue is full.
    ///
    /// A segment too short for its steps is merged into the next one. The
    /// `last` of its move has no next one and is slowed down instead.
    pub fn emit<const N: usize>(
        &mut self,
        queue: &mut QueueWriter<'_, N>,
        config: &MachineConfig,
        point: &AxisVector,
        microseconds: f64,
        last: bool,
    ) -> MotionResult {
        if !queue.has_room(1) {
            return Ok(Status::Eagain);
        }

        let steps = config.to_steps(point, &self.queued);
        let mut delta = [Steps::ZERO; AXES];
        for ((d, to), from) in delta.iter_mut().zip(steps).zip(self.queued) {
            *d = to - from;
        }

        let total_us = microseconds + self.carry_us;
        let most_steps = delta.iter().map(|d| d.count()).max().unwrap_or(0) as f64;
        let shortest_us = (most_steps * MIN_STEP_PERIOD_TICKS as f64 / TICKS_PER_MICROSECOND as f64).ceil();
        let too_fast = total_us < shortest_us;
        if most_steps == 0.0 || (too_fast && !last) {
            self.carry_us = total_us;
            return Ok(Status::Ok);
        }

        let us = total_us.round().max(shortest_us);
        if us > u32::MAX as f64 {
            return Err(Error::ParameterOverRange);
        }
        queue.queue_line(delta, us as u32)?;
        self.queued = steps;
        self.carry_us = if too_fast { 0.0 } else { total_us - us };
        Ok(Status::Ok)
    }
}

// 250k steps/s, in steps per minute.
const MAX_STEPS_PER_MINUTE: f64 = 60_000_000.0 * TICKS_PER_MICROSECOND as f64 / MIN_STEP_PERIOD_TICKS as f64;

/// Refuses a rate that would step `axis` faster than its timer can go.
/// `rate` is in mm (or degrees) per minute.
pub fn check_step_rate(config: &MachineConfig, axis: Axis, rate: f64) -> MotionResult<()> {
    let cfg = config.axis(axis);
    if cfg.mode.is_stepped() && rate.abs() * cfg.steps_per_unit() > MAX_STEPS_PER_MINUTE {
        return Err(Error::MaxFeedRateExceeded);
    }
    Ok(())
}

/// A straight line between two points.
#[derive(Copy, Clone, Debug)]
pub struct Path {
    pub start: AxisVector,
    pub target: AxisVector,
    pub unit: AxisVector,
    pub length: f64,
}

impl Path {
    pub fn new(start: &AxisVector, target: &AxisVector) -> Self {
        let length = vector_length(start, target);
        let mut unit = [0.0; AXES];
        if length > 0.0 {
            for ((u, s), t) in unit.iter_mut().zip(start).zip(target) {
                *u = (t - s) / length;
            }
        }
        Self { start: *start, target: *target, unit, length }
    }

    pub fn point_at(&self, distance: f64) -> AxisVector {
        if distance >= self.length {
            return self.target;
        }
        let mut point = self.start;
        for (p, u) in point.iter_mut().zip(self.unit) {
            *p += u * distance;
        }
        point
    }

    pub fn cos_angle_to(&self, other: &Path) -> f64 {
        self.unit.iter().zip(other.unit).map(|(a, b)| a * b).sum()
    }
}

#[derive(Copy, Clone, Debug)]
pub enum Profile {
    Cruise { velocity: f64, length: f64 },
    Ramp(Ramp),
}

impl Profile {
    /// In minutes.
    pub fn duration(&self) -> f64 {
        match self {
            Profile::Cruise { velocity, length } if *velocity > 0.0 => length / velocity,
            Profile::Cruise { .. } => 0.0,
            Profile::Ramp(ramp) => ramp.duration,
        }
    }

    pub fn length(&self) -> f64 {
        match self {
            Profile::Cruise { length, .. } => *length,
            Profile::Ramp(ramp) => ramp.length(),
        }
    }

    pub fn distance_at(&self, t: f64) -> f64 {
        match self {
            Profile::Cruise { velocity, length } => (velocity * t).min(*length),
            Profile::Ramp(ramp) => ramp.distance_at(t),
        }
    }
}

/// A region of a move (head, body or tail), sliced into segments of equal
/// duration.
#[derive(Copy, Clone, Debug)]
pub struct Section {
    /// Distance along the path where the section begins.
    pub start: f64,
    pub profile: Profile,
    pub segments: u32,
    done: u32,
}

impl Section {
    /// Returns None when the section is too short to take any time.
    pub fn sliced(start: f64, profile: Profile, segment_us: f64) -> Option<Self> {
        let duration_us = minutes_to_us(profile.duration());
        if !(duration_us >= 1.0) {
            return None;
        }
        let segments = (duration_us / segment_us).ceil().max(1.0) as u32;
        Some(Self { start, profile, segments, done: 0 })
    }

    pub fn end(&self) -> f64 {
        self.start + self.profile.length()
    }

    /// Where segment `i` (1 based) ends, and how long it takes.
    fn segment(&self, i: u32) -> (f64, f64) {
        let n = self.segments as f64;
        let duration = self.profile.duration();
        let total_us = minutes_to_us(duration);

        // Boundaries are rounded on the absolute time, the durations of the
        // segments then add up to the rounded duration of the section.
        let us = (total_us * i as f64 / n).round() - (total_us * (i - 1) as f64 / n).round();
        let distance = if i == self.segments {
            self.end()
        } else {
            self.start + self.profile.distance_at(duration * i as f64 / n)
        };
        (distance, us)
    }
}

/// Emits sections one after the other along a path, ending on `end`.
pub struct SectionRun {
    path: Path,
    end: AxisVector,
    sections: Vec<Section, 3>,
    current: usize,
}

impl SectionRun {
    pub fn new(path: Path, end: AxisVector) -> Self {
        Self { path, end, sections: Vec::new(), current: 0 }
    }

    pub fn push(&mut self, section: Option<Section>) {
        if let Some(section) = section {
            // Runs never hold more than a head, a body and a tail.
            let pushed = self.sections.push(section).is_ok();
            debug_assert!(pushed);
        }
    }

    pub fn segments(&self) -> u32 {
        self.sections.iter().map(|s| s.segments).sum()
    }

    pub fn poll<const N: usize>(
        &mut self,
        cursor: &mut StepCursor,
        queue: &mut QueueWriter<'_, N>,
        config: &MachineConfig,
    ) -> MotionResult {
        let last = self.sections.len();
        while let Some(section) = self.sections.get_mut(self.current) {
            while section.done < section.segments {
                let i = section.done + 1;
                let (distance, us) = section.segment(i);
                let is_last = self.current + 1 == last && i == section.segments;
                let point = if is_last { self.end } else { self.path.point_at(distance) };
                if cursor.emit(queue, config, &point, us, is_last)?.is_blocking() {
                    return Ok(Status::Eagain);
                }
                section.done = i;
            }
            self.current += 1;
        }

        Ok(Status::Ok)
    }
}
