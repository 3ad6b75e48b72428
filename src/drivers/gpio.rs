// SPDX-License-Identifier: GPL-3.0-or-later

use embedded_hal::digital::v2::OutputPin;

use crate::motion::units::prelude::*;

use super::hal::StepperOutputs;

/// The pins wired to one stepper driver.
pub struct AxisPins<P> {
    pub step: P,
    pub dir: P,
    pub enable: P,
    pub ms0: P,
    pub ms1: P,
}

/// Drives the step/dir style drivers of the four axes. Pins are usually the
/// type-erased pins of the board HAL.
pub struct PinOutputs<P> {
    axes: [AxisPins<P>; AXES],
    // Most drivers take ENABLE as an active low input.
    enable_active_low: bool,
}

impl<P: OutputPin> PinOutputs<P> {
    pub fn new(axes: [AxisPins<P>; AXES], enable_active_low: bool) -> Self {
        let mut self_ = Self { axes, enable_active_low };
        for axis in Axis::ALL {
            self_.set_step(axis, false);
            self_.set_enable(axis, false);
        }
        self_
    }

    pub fn axis_pins(&self, axis: Axis) -> &AxisPins<P> {
        &self.axes[axis.index()]
    }
}

fn write<P: OutputPin>(pin: &mut P, high: bool) {
    // Pin errors are infallible on the MCUs we run on.
    let ok = (if high { pin.set_high() } else { pin.set_low() }).is_ok();
    debug_assert!(ok);
}

impl<P: OutputPin> StepperOutputs for PinOutputs<P> {
    fn set_step(&mut self, axis: Axis, high: bool) {
        write(&mut self.axes[axis.index()].step, high);
    }

    // Note: wait at least 200ns before STEP changes after changing the direction
    fn set_dir(&mut self, axis: Axis, high: bool) {
        write(&mut self.axes[axis.index()].dir, high);
    }

    fn set_enable(&mut self, axis: Axis, enabled: bool) {
        let level = enabled != self.enable_active_low;
        write(&mut self.axes[axis.index()].enable, level);
    }

    fn set_microsteps(&mut self, axis: Axis, microsteps: Microsteps) {
        // Microsteps | MS0 | MS1
        // -----------|-----|-----
        //  1         |  0  |  0
        //  2         |  1  |  0
        //  4         |  0  |  1
        //  8         |  1  |  1
        let (ms0, ms1) = match microsteps {
            Microsteps::Full => (false, false),
            Microsteps::Half => (true, false),
            Microsteps::Quarter => (false, true),
            Microsteps::Eighth => (true, true),
        };
        let pins = &mut self.axes[axis.index()];
        write(&mut pins.ms0, ms0);
        write(&mut pins.ms1, ms1);
    }
}
