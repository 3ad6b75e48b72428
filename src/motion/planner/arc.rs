// SPDX-License-Identifier: GPL-3.0-or-later

// Helical arcs, approximated by chords. The canonical machine works out the
// geometry. Here we only walk the angle, one chord per poll of the queue.
//
// Angles follow the G-code convention: theta is measured from the +axis_1
// direction, so a point of the circle is center + r * (sin(theta), cos(theta))
// in the (axis_0, axis_1) plane.

#[cfg(not(test))]
use num::Float;

use crate::config::MachineConfig;
use crate::consts::planner::MAX_LINE_SEGMENT_TIME;
use crate::motion::motor_queue::QueueWriter;
use crate::motion::units::{minutes_to_us, prelude::*};
use crate::status::{Error, MotionResult, Status};

use super::segments::{check_step_rate, StepCursor};

/// An arc as described to the planner.
#[derive(Copy, Clone, Debug)]
pub struct ArcMove {
    pub target: AxisVector,
    /// Angle of the start point, as seen from the center.
    pub theta: f64,
    pub radius: f64,
    /// Signed, positive is clockwise.
    pub angular_travel: f64,
    pub linear_travel: f64,
    /// In plane axes, then the helical axis.
    pub axes: [Axis; 3],
    pub minutes: f64,
}

impl ArcMove {
    pub fn length(&self) -> f64 {
        (self.angular_travel * self.radius).hypot(self.linear_travel.abs())
    }
}

pub struct ArcRun {
    start: AxisVector,
    target: AxisVector,
    center: [f64; 2],
    radius: f64,
    theta: f64,
    theta_per_segment: f64,
    linear_per_segment: f64,
    axes: [Axis; 3],
    total_us: f64,
    segments: u32,
    done: u32,
}

impl ArcRun {
    pub fn new(config: &MachineConfig, start: &AxisVector, arc: &ArcMove) -> MotionResult<Self> {
        let length = arc.length();
        if !length.is_finite() {
            return Err(Error::ArcSpecError);
        }
        if length < config.min_segment_length {
            return Err(Error::ZeroLengthMove);
        }

        let [a0, a1, _] = arc.axes;
        let tangential = arc.radius * arc.angular_travel / arc.minutes;
        for axis in Axis::ALL {
            let rate = if axis == a0 || axis == a1 {
                tangential
            } else {
                (arc.target[axis.index()] - start[axis.index()]) / arc.minutes
            };
            check_step_rate(config, axis, rate)?;
        }

        // Slow arcs get more chords, a record holds at most u32::MAX us.
        let total_us = minutes_to_us(arc.minutes);
        let segments = (length / config.arc_segment_length())
            .max(total_us / MAX_LINE_SEGMENT_TIME)
            .ceil()
            .max(1.0);
        if segments > u32::MAX as f64 {
            return Err(Error::ParameterOverRange);
        }
        let center = [
            start[a0.index()] - arc.radius * arc.theta.sin(),
            start[a1.index()] - arc.radius * arc.theta.cos(),
        ];

        Ok(Self {
            start: *start,
            target: arc.target,
            center,
            radius: arc.radius,
            theta: arc.theta,
            theta_per_segment: arc.angular_travel / segments,
            linear_per_segment: arc.linear_travel / segments,
            axes: arc.axes,
            total_us,
            segments: segments as u32,
            done: 0,
        })
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn center(&self) -> [f64; 2] {
        self.center
    }

    fn point(&self, i: u32) -> AxisVector {
        if i == self.segments {
            return self.target;
        }

        let fraction = i as f64 / self.segments as f64;
        let [a0, a1, linear] = self.axes;

        // Axes out of the plane glide along with the arc.
        let mut point = self.start;
        for (p, t) in point.iter_mut().zip(self.target) {
            *p += (t - *p) * fraction;
        }

        let theta = self.theta + self.theta_per_segment * i as f64;
        point[a0.index()] = self.center[0] + self.radius * theta.sin();
        point[a1.index()] = self.center[1] + self.radius * theta.cos();
        point[linear.index()] = self.start[linear.index()] + self.linear_per_segment * i as f64;
        point
    }

    pub fn poll<const N: usize>(
        &mut self,
        cursor: &mut StepCursor,
        queue: &mut QueueWriter<'_, N>,
        config: &MachineConfig,
    ) -> MotionResult {
        let n = self.segments as f64;
        while self.done < self.segments {
            let i = self.done + 1;
            let us = (self.total_us * i as f64 / n).round() - (self.total_us * (i - 1) as f64 / n).round();
            let point = self.point(i);
            if cursor.emit(queue, config, &point, us, i == self.segments)?.is_blocking() {
                return Ok(Status::Eagain);
            }
            self.done = i;
        }
        Ok(Status::Ok)
    }
}
