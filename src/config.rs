// SPDX-License-Identifier: GPL-3.0-or-later

// The configuration store lives outside of the motion core. It hands us a
// MachineConfig at boot, and we treat it as read-only while moves are in
// flight.

use crate::consts::{defaults, homing};
use crate::motion::units::prelude::*;
use crate::status::{Error, MotionResult};

/// How a Cartesian coordinate maps onto the commanded position of an axis.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AxisMode {
    Disabled,
    Standard,
    /// Targets are computed but the motor is never stepped.
    Inhibited,
    /// Linear words are turned into degrees with the axis radius.
    Radius,
    SlaveX,
    SlaveY,
    SlaveZ,
    SlaveXY,
    SlaveXZ,
    SlaveYZ,
    SlaveXYZ,
}

impl AxisMode {
    /// Primary axes whose path length drives a slaved axis.
    pub fn slaved_to(self) -> &'static [Axis] {
        match self {
            AxisMode::SlaveX => &[Axis::X],
            AxisMode::SlaveY => &[Axis::Y],
            AxisMode::SlaveZ => &[Axis::Z],
            AxisMode::SlaveXY => &[Axis::X, Axis::Y],
            AxisMode::SlaveXZ => &[Axis::X, Axis::Z],
            AxisMode::SlaveYZ => &[Axis::Y, Axis::Z],
            AxisMode::SlaveXYZ => &[Axis::X, Axis::Y, Axis::Z],
            _ => &[],
        }
    }

    pub fn is_stepped(self) -> bool {
        !matches!(self, AxisMode::Disabled | AxisMode::Inhibited)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PathControl {
    /// Every move decelerates to a stop.
    ExactStop,
    /// Corners are taken at a velocity derived from the change of direction.
    ExactPath,
    /// Tails blend into the next head, up to the angular jerk limits.
    Continuous,
}

#[derive(Copy, Clone, Debug)]
pub struct AxisConfig {
    pub mode: AxisMode,
    pub step_angle: f64,
    pub travel_per_rev: f64,
    pub microsteps: Microsteps,
    pub polarity: bool,
    pub seek_rate_max: f64,
    pub feed_rate_max: f64,
    /// 0 means unlimited.
    pub travel_max: f64,
    pub radius: f64,

    pub homing_enabled: bool,
    pub search_velocity: f64,
    pub latch_velocity: f64,
    pub latch_backoff: f64,
}

impl AxisConfig {
    pub fn linear() -> Self {
        Self {
            mode: AxisMode::Standard,
            step_angle: defaults::STEP_ANGLE,
            travel_per_rev: defaults::TRAVEL_PER_REV,
            microsteps: Microsteps::Eighth,
            polarity: false,
            seek_rate_max: defaults::SEEK_RATE_MAX,
            feed_rate_max: defaults::FEED_RATE_MAX,
            travel_max: defaults::TRAVEL_MAX,
            radius: defaults::RADIUS,
            homing_enabled: true,
            search_velocity: homing::SEARCH_VELOCITY,
            latch_velocity: homing::LATCH_VELOCITY,
            latch_backoff: homing::LATCH_BACKOFF,
        }
    }

    pub fn rotary() -> Self {
        Self {
            travel_per_rev: defaults::A_TRAVEL_PER_REV,
            seek_rate_max: defaults::A_SEEK_RATE_MAX,
            feed_rate_max: defaults::A_FEED_RATE_MAX,
            travel_max: defaults::A_TRAVEL_MAX,
            homing_enabled: false,
            ..Self::linear()
        }
    }

    /// Microsteps per mm (or per degree for rotary axes).
    pub fn steps_per_unit(&self) -> f64 {
        (360.0 / self.step_angle) * self.microsteps.ratio() as f64 / self.travel_per_rev
    }

    pub fn with_mode(mut self, mode: AxisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_drive(mut self, step_angle: f64, microsteps: Microsteps, travel_per_rev: f64) -> Self {
        self.step_angle = step_angle;
        self.microsteps = microsteps;
        self.travel_per_rev = travel_per_rev;
        self
    }

    pub fn with_rates(mut self, seek_rate_max: f64, feed_rate_max: f64) -> Self {
        self.seek_rate_max = seek_rate_max;
        self.feed_rate_max = feed_rate_max;
        self
    }

    fn validate(&self) -> MotionResult<()> {
        let positive = [
            self.step_angle,
            self.travel_per_rev,
            self.seek_rate_max,
            self.feed_rate_max,
            self.radius,
            self.search_velocity,
            self.latch_velocity,
        ];
        if positive.iter().any(|v| !(*v > 0.0)) || self.travel_max < 0.0 || self.latch_backoff < 0.0 {
            return Err(Error::ParameterOverRange);
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug)]
pub struct MachineConfig {
    pub axes: [AxisConfig; AXES],

    pub mm_per_arc_segment: f64,
    pub min_segment_length: f64,
    /// Duration of the micro-segments of accelerated moves, in microseconds.
    pub min_segment_time: f64,
    pub max_linear_jerk: f64,
    pub angular_jerk_upper: f64,
    pub angular_jerk_lower: f64,
    pub path_control: PathControl,
    pub homing_mode: bool,
    pub accel_enabled: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            axes: [AxisConfig::linear(), AxisConfig::linear(), AxisConfig::linear(), AxisConfig::rotary()],
            mm_per_arc_segment: defaults::MM_PER_ARC_SEGMENT,
            min_segment_length: defaults::MIN_SEGMENT_LENGTH,
            min_segment_time: defaults::MIN_SEGMENT_TIME,
            max_linear_jerk: defaults::MAX_LINEAR_JERK,
            angular_jerk_upper: defaults::ANGULAR_JERK_UPPER,
            angular_jerk_lower: defaults::ANGULAR_JERK_LOWER,
            path_control: PathControl::ExactStop,
            homing_mode: true,
            accel_enabled: true,
        }
    }
}

impl MachineConfig {
    pub fn axis(&self, axis: Axis) -> &AxisConfig {
        &self.axes[axis.index()]
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut AxisConfig {
        &mut self.axes[axis.index()]
    }

    pub fn steps_per_unit(&self, axis: Axis) -> f64 {
        self.axis(axis).steps_per_unit()
    }

    /// Converts a position into motor steps. Axes that are not stepped keep
    /// `current`.
    pub fn to_steps(&self, position: &AxisVector, current: &StepVector) -> StepVector {
        let mut steps = *current;
        for axis in Axis::ALL {
            let cfg = self.axis(axis);
            if cfg.mode.is_stepped() {
                steps[axis.index()] = Steps::from_units(position[axis.index()], cfg.steps_per_unit());
            }
        }
        steps
    }

    /// Converts motor steps back into a position. Axes that are not stepped
    /// keep `current`.
    pub fn to_units(&self, steps: &StepVector, current: &AxisVector) -> AxisVector {
        let mut position = *current;
        for axis in Axis::ALL {
            let cfg = self.axis(axis);
            if cfg.mode.is_stepped() {
                position[axis.index()] = steps[axis.index()].as_units(cfg.steps_per_unit());
            }
        }
        position
    }

    /// Length of an arc segment, never shorter than the smallest segment the
    /// planner accepts.
    pub fn arc_segment_length(&self) -> f64 {
        if self.mm_per_arc_segment > self.min_segment_length {
            self.mm_per_arc_segment
        } else {
            self.min_segment_length
        }
    }

    pub fn validate(&self) -> MotionResult<()> {
        for axis in &self.axes {
            axis.validate()?;
        }
        let positive = [self.mm_per_arc_segment, self.min_segment_length, self.min_segment_time, self.max_linear_jerk];
        if positive.iter().any(|v| !(*v > 0.0)) {
            return Err(Error::ParameterOverRange);
        }
        if self.angular_jerk_lower < 0.0 || self.angular_jerk_upper < self.angular_jerk_lower {
            return Err(Error::ParameterOverRange);
        }
        Ok(())
    }
}
