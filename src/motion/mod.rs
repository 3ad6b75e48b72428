// SPDX-License-Identifier: GPL-3.0-or-later

// Layered from the G-code side down to the pins:
//   canonical_machine -> planner -> motor_queue -> stepper

pub mod units;
pub mod motor_queue;
pub mod stepper;
pub mod planner;
pub mod canonical_machine;

pub use canonical_machine::{CanonicalMachine, MotionMode, Plane};
pub use motor_queue::{Marker, Move, MotorQueue, QueueReader, QueueWriter};
pub use planner::Planner;
pub use stepper::{ExecutorState, Stepper, StepperStatus};
