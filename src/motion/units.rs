// SPDX-License-Identifier: GPL-3.0-or-later

#[cfg(not(test))]
use num::Float;

use crate::status::{Error, MotionResult};

pub const AXES: usize = 4;

const MM_PER_INCH: f64 = 25.4;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    A = 3,
}

impl Axis {
    pub const ALL: [Axis; AXES] = [Axis::X, Axis::Y, Axis::Z, Axis::A];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_linear(self) -> bool {
        self != Axis::A
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
        }
    }
}

/// Cartesian coordinates in canonical units: mm for linear axes, degrees for
/// rotary axes.
pub type AxisVector = [f64; AXES];

/// Positions counted in microsteps.
pub type StepVector = [Steps; AXES];

// We describe motor positions as integers, in number of microsteps, to not
// loose accuracy with floating points.

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug, Default)]
pub struct Steps(pub i32);

impl Steps {
    pub const ZERO: Self = Self(0);

    /// Rounds a coordinate to the nearest microstep. Both endpoints of a move
    /// go through here, so the deltas never drift.
    pub fn from_units(value: f64, steps_per_unit: f64) -> Self {
        Steps((value * steps_per_unit).round() as i32)
    }

    pub fn as_units(self, steps_per_unit: f64) -> f64 {
        (self.0 as f64) / steps_per_unit
    }

    pub fn direction(self) -> Direction {
        if self.0 < 0 { Direction::Reverse } else { Direction::Forward }
    }

    pub fn count(self) -> u32 {
        self.0.unsigned_abs()
    }
}

impl core::ops::Add for Steps {
    type Output = Steps;
    fn add(self, rhs: Self) -> Self::Output {
        Steps(self.0 + rhs.0)
    }
}

impl core::ops::Sub for Steps {
    type Output = Steps;
    fn sub(self, rhs: Self) -> Self::Output {
        Steps(self.0 - rhs.0)
    }
}

impl core::ops::Neg for Steps {
    type Output = Steps;

    fn neg(self) -> Self::Output {
        Steps(-self.0)
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    /// Level of the DIR pin, before the polarity of the axis is applied.
    pub fn is_forward(self) -> bool {
        self == Direction::Forward
    }
}

/// Driver-level subdivisions of a full step.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Microsteps {
    Full = 1,
    Half = 2,
    Quarter = 4,
    Eighth = 8,
}

impl Microsteps {
    pub fn new(n: u8) -> MotionResult<Self> {
        match n {
            1 => Ok(Microsteps::Full),
            2 => Ok(Microsteps::Half),
            4 => Ok(Microsteps::Quarter),
            8 => Ok(Microsteps::Eighth),
            _ => Err(Error::ParameterOverRange),
        }
    }

    pub fn ratio(self) -> u8 {
        self as u8
    }
}

pub fn inches_to_mm(value: f64) -> f64 {
    value * MM_PER_INCH
}

pub fn mm_to_inches(value: f64) -> f64 {
    value / MM_PER_INCH
}

/// Microseconds in a duration expressed in minutes, the unit of feed rates.
pub fn minutes_to_us(minutes: f64) -> f64 {
    minutes * 60_000_000.0
}

pub fn vector_length(a: &AxisVector, b: &AxisVector) -> f64 {
    a.iter().zip(b).map(|(a, b)| (b - a) * (b - a)).sum::<f64>().sqrt()
}

pub mod prelude {
    pub use super::{Axis, AxisVector, Direction, Microsteps, StepVector, Steps, AXES};
}
