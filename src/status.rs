// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt;

pub type MotionResult<T = Status> = Result<T, Error>;

/// Outcomes that are not failures. `Eagain` and `Noop` are the normal
/// answers of a continuation that is blocked or idle.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Status {
    Ok,
    /// Not done, state preserved. The caller must call again.
    Eagain,
    /// The generator was idle, nothing was done.
    Noop,
    /// A nested cycle (homing) has finished.
    Complete,
    Quit,
    Eof,
}

impl Status {
    pub fn is_blocking(self) -> bool {
        self == Status::Eagain
    }

    pub fn tag(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Eagain => "EAGAIN",
            Status::Noop => "NOOP",
            Status::Complete => "COMPLETE",
            Status::Quit => "QUIT",
            Status::Eof => "EOF",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Error {
    /// No axis would step. Suppressed by the controller.
    ZeroLengthMove,
    /// Theta of the arc came out as NaN.
    ArcSpecError,
    /// Radius arc maths produced NaN, the radius is shorter than half the chord.
    FloatingPointError,
    MotionControlError,

    // Input validation
    ParameterOverRange,
    MaxFeedRateExceeded,
    MaxSeekRateExceeded,
    MaxTableTravelExceeded,

    // Queue invariant violations
    BufferFullFatal,
    BufferEmpty,
}

impl Error {
    pub fn is_silent(self) -> bool {
        self == Error::ZeroLengthMove
    }

    pub fn tag(self) -> &'static str {
        match self {
            Error::ZeroLengthMove => "zero length move",
            Error::ArcSpecError => "arc specification error",
            Error::FloatingPointError => "floating point error",
            Error::MotionControlError => "motion control error",
            Error::ParameterOverRange => "parameter over range",
            Error::MaxFeedRateExceeded => "maximum feed rate exceeded",
            Error::MaxSeekRateExceeded => "maximum seek rate exceeded",
            Error::MaxTableTravelExceeded => "maximum table travel exceeded",
            Error::BufferFullFatal => "buffer full",
            Error::BufferEmpty => "buffer empty",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Calls a generator, and returns from the enclosing function if it is
/// blocked. Higher priority generators are dispatched first, so the first one
/// that can't make progress restarts the super-loop from the top.
#[macro_export]
macro_rules! dispatch {
    ($e:expr) => {
        match $e {
            Ok($crate::status::Status::Eagain) => return Ok($crate::status::Status::Eagain),
            Ok(_) => {}
            Err(e) => return Err(e),
        }
    };
}
