// SPDX-License-Identifier: GPL-3.0-or-later

// The hardware surface the stepper executor drives. Boards implement these
// with their GPIO ports and timers; the overflow interrupts of the timers call
// back into Machine::on_axis_timer() and friends.

use crate::consts::stepper::STEP_PULSE_WIDTH_NS;
use crate::motion::motor_queue::Prescaler;
use crate::motion::units::{Axis, Microsteps};

use super::delay::delay_ns;

/// Per-axis STEP, DIR, ENABLE and microstep select outputs.
pub trait StepperOutputs {
    fn set_step(&mut self, axis: Axis, high: bool);
    fn set_dir(&mut self, axis: Axis, high: bool);
    fn set_enable(&mut self, axis: Axis, enabled: bool);
    fn set_microsteps(&mut self, axis: Axis, microsteps: Microsteps);

    /// Holds STEP high long enough for the driver to register the pulse.
    /// Called between the rising and the falling edge, after the interrupt
    /// has done its bookkeeping.
    fn step_pulse_delay(&mut self) {
        delay_ns(STEP_PULSE_WIDTH_NS);
    }
}

/// The four step timers, the dwell timer and the software interrupt that
/// runs the move loader.
pub trait StepTimers {
    /// Programs the timer of an axis and resets its counter. Doesn't start it.
    fn load_timer(&mut self, axis: Axis, prescaler: Prescaler, period: u16);
    /// Starts, or resumes, counting from where the counter was.
    fn start_timer(&mut self, axis: Axis);
    /// Stops counting, keeping the counter.
    fn stop_timer(&mut self, axis: Axis);

    fn load_dwell(&mut self, microseconds: u32);
    fn start_dwell(&mut self);
    fn stop_dwell(&mut self);

    /// Pends the software interrupt that calls Machine::on_software_interrupt().
    /// Its priority sits below the step timers and above the main loop.
    fn trigger_loader(&mut self);
}

pub trait Hal: StepperOutputs + StepTimers {}
impl<T: StepperOutputs + StepTimers> Hal for T {}

/// Glues the GPIO outputs and the timers of a board into a Hal.
pub struct HalParts<O, T> {
    pub outputs: O,
    pub timers: T,
}

impl<O: StepperOutputs, T> StepperOutputs for HalParts<O, T> {
    fn set_step(&mut self, axis: Axis, high: bool) { self.outputs.set_step(axis, high) }
    fn set_dir(&mut self, axis: Axis, high: bool) { self.outputs.set_dir(axis, high) }
    fn set_enable(&mut self, axis: Axis, enabled: bool) { self.outputs.set_enable(axis, enabled) }
    fn set_microsteps(&mut self, axis: Axis, microsteps: Microsteps) { self.outputs.set_microsteps(axis, microsteps) }
    fn step_pulse_delay(&mut self) { self.outputs.step_pulse_delay() }
}

impl<O, T: StepTimers> StepTimers for HalParts<O, T> {
    fn load_timer(&mut self, axis: Axis, prescaler: Prescaler, period: u16) { self.timers.load_timer(axis, prescaler, period) }
    fn start_timer(&mut self, axis: Axis) { self.timers.start_timer(axis) }
    fn stop_timer(&mut self, axis: Axis) { self.timers.stop_timer(axis) }
    fn load_dwell(&mut self, microseconds: u32) { self.timers.load_dwell(microseconds) }
    fn start_dwell(&mut self) { self.timers.start_dwell() }
    fn stop_dwell(&mut self) { self.timers.stop_dwell() }
    fn trigger_loader(&mut self) { self.timers.trigger_loader() }
}
