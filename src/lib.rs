// SPDX-License-Identifier: GPL-3.0-or-later

//! Motion core of a G-code driven stepper controller.
//!
//! Moves flow from the canonical machine (G-code semantics) to the planner
//! (velocity profiles, arcs), which fills the motor queue read by the stepper
//! executor running in the timer interrupts. [`Machine`] owns all of it.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

pub mod consts;
pub mod status;
pub mod config;
pub mod motion;
pub mod drivers;
pub mod machine;
pub mod util;
pub mod logging;

pub use config::{AxisConfig, AxisMode, MachineConfig, PathControl};
pub use machine::{BlockReader, HomingPhase, Machine, MachineIsr, MachineStorage};
pub use motion::units::{Axis, AxisVector, Steps, AXES};
pub use status::{Error, MotionResult, Status};
