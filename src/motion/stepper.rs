// SPDX-License-Identifier: GPL-3.0-or-later

// The stepper executor turns the records of the motor queue into step pulses.
//
// Three contexts meet here:
// * the step timer interrupts (highest priority) run on_axis_timer() and
//   on_dwell_timer(). They only touch the runtime of their own axis and the
//   active mask.
// * the loader software interrupt (medium priority) runs load_next_move(). It
//   is pended by the step interrupts when the last axis of a move is done, so
//   the next move starts without waiting for the main loop.
// * the main loop calls execute_move() to get things going when idle, and the
//   stop/start/end functions, with the stepper locked.
//
// The state bits live in a StepperStatus next to the stepper, so the main
// loop can poll them without taking the lock.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use bitflags::bitflags;

use crate::config::MachineConfig;
use crate::consts::motor_queue::MOTOR_QUEUE_SIZE;
use crate::drivers::hal::Hal;
use crate::status::MotionResult;

use super::motor_queue::{AxisStep, Move, QueueReader};
use super::units::prelude::*;

bitflags! {
    pub struct AxisMask: u8 {
        const X = 0b0001;
        const Y = 0b0010;
        const Z = 0b0100;
        const A = 0b1000;
    }
}

impl AxisMask {
    pub fn of(axis: Axis) -> Self {
        Self::from_bits_truncate(1 << axis.index())
    }

    pub fn axes(self) -> impl Iterator<Item = Axis> {
        Axis::ALL.into_iter().filter(move |a| self.contains(Self::of(*a)))
    }
}

/// The mask of axes that still have steps to do in the current move. Set by
/// the loader, cleared bit by bit by the step interrupts.
struct AtomicAxisMask(AtomicU8);

impl AtomicAxisMask {
    const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    fn load(&self) -> AxisMask {
        AxisMask::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    fn store(&self, mask: AxisMask) {
        self.0.store(mask.bits(), Ordering::Release);
    }

    /// Returns the axes that remain active.
    fn remove(&self, mask: AxisMask) -> AxisMask {
        let previous = self.0.fetch_and(!mask.bits(), Ordering::AcqRel);
        AxisMask::from_bits_truncate(previous & !mask.bits())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExecutorState {
    /// Waiting for main to call execute_move().
    Idle,
    Running,
    /// A queued stop went through, waiting for an async start.
    Held,
    /// Frozen by an async stop, waiting for an async start.
    Stopped,
}

/// What the loader found that the main loop has to act on.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum LoaderEvent {
    ProgramEnd,
}

/// What the executor is up to, readable from any context without a lock.
/// Written by the stepper only.
pub struct StepperStatus {
    active: AtomicAxisMask,
    dwell_active: AtomicBool,
    running: AtomicBool,
    gate_open: AtomicBool,
    frozen: AtomicBool,
}

impl StepperStatus {
    pub const fn new() -> Self {
        Self {
            active: AtomicAxisMask::new(),
            dwell_active: AtomicBool::new(false),
            running: AtomicBool::new(false),
            gate_open: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ExecutorState {
        if self.frozen.load(Ordering::Acquire) {
            ExecutorState::Stopped
        } else if !self.gate_open.load(Ordering::Acquire) {
            ExecutorState::Held
        } else if self.running.load(Ordering::Acquire) {
            ExecutorState::Running
        } else {
            ExecutorState::Idle
        }
    }

    /// True while a move has steps left on any axis, or a dwell is counting.
    pub fn is_busy(&self) -> bool {
        !self.active.load().is_empty() || self.dwell_active.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.active.store(AxisMask::empty());
        self.dwell_active.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
        self.gate_open.store(true, Ordering::Release);
        self.frozen.store(false, Ordering::Release);
    }
}

impl Default for StepperStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Default)]
struct AxisRuntime {
    steps: u32,
    postscale: u16,
    postscale_counter: u16,
}

pub struct Stepper<'a, H: Hal, const N: usize = MOTOR_QUEUE_SIZE> {
    hal: H,
    queue: QueueReader<'a, N>,
    status: &'a StepperStatus,
    axes: [AxisRuntime; AXES],

    polarity: [bool; AXES],
    pending_polarity: [Option<bool>; AXES],
    pending_microsteps: [Option<Microsteps>; AXES],
}

impl<'a, H: Hal, const N: usize> Stepper<'a, H, N> {
    pub fn new(mut hal: H, queue: QueueReader<'a, N>, status: &'a StepperStatus, config: &MachineConfig) -> Self {
        let mut polarity = [false; AXES];
        for axis in Axis::ALL {
            let cfg = config.axis(axis);
            polarity[axis.index()] = cfg.polarity;
            hal.stop_timer(axis);
            hal.set_step(axis, false);
            hal.set_enable(axis, false);
            hal.set_microsteps(axis, cfg.microsteps);
        }
        hal.stop_dwell();
        status.clear();

        Self {
            hal,
            queue,
            status,
            axes: [AxisRuntime::default(); AXES],
            polarity,
            pending_polarity: [None; AXES],
            pending_microsteps: [None; AXES],
        }
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn status(&self) -> &'a StepperStatus {
        self.status
    }

    pub fn state(&self) -> ExecutorState {
        self.status.state()
    }

    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    /// Records waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Remaining steps of the move being executed on that axis.
    pub fn remaining_steps(&self, axis: Axis) -> u32 {
        self.axes[axis.index()].steps
    }

    /// Starts the first move if we are idle. Called from the main loop.
    pub fn execute_move(&mut self) -> Option<LoaderEvent> {
        if self.state() != ExecutorState::Idle || self.queue.is_empty() {
            return None;
        }
        self.load_next_move()
    }

    /// Freezes the timers where they are.
    pub fn stop(&mut self) {
        let status = self.status;
        status.frozen.store(true, Ordering::Release);
        for axis in status.active.load().axes() {
            self.hal.stop_timer(axis);
        }
        if status.dwell_active.load(Ordering::Acquire) {
            self.hal.stop_dwell();
        }
    }

    /// Resumes after a stop, either an async one or a queued one.
    pub fn start(&mut self) {
        let status = self.status;
        status.frozen.store(false, Ordering::Release);
        status.gate_open.store(true, Ordering::Release);

        let active = status.active.load();
        let dwell = status.dwell_active.load(Ordering::Acquire);
        for axis in active.axes() {
            self.hal.start_timer(axis);
        }
        if dwell {
            self.hal.start_dwell();
        }
        if active.is_empty() && !dwell {
            // Either past a queued stop, or a load was skipped while frozen.
            self.hal.trigger_loader();
        }
    }

    /// Halts everything and drops what is left in the queue.
    pub fn end(&mut self) {
        for axis in Axis::ALL {
            self.hal.stop_timer(axis);
            self.hal.set_step(axis, false);
            self.axes[axis.index()] = AxisRuntime::default();
        }
        self.hal.stop_dwell();
        self.queue.flush();
        self.status.clear();
    }

    /// Takes effect at the next move boundary.
    pub fn set_microsteps(&mut self, axis: Axis, microsteps: u8) -> MotionResult<()> {
        self.pending_microsteps[axis.index()] = Some(Microsteps::new(microsteps)?);
        Ok(())
    }

    /// Takes effect at the next move boundary.
    pub fn set_polarity(&mut self, axis: Axis, polarity: bool) {
        self.pending_polarity[axis.index()] = Some(polarity);
    }

    /// Runs in the loader software interrupt, and from execute_move().
    pub fn load_next_move(&mut self) -> Option<LoaderEvent> {
        let status = self.status;
        if status.frozen.load(Ordering::Acquire) || status.is_busy() {
            return None;
        }

        let mv = match self.queue.dequeue() {
            Some(mv) => mv,
            None => {
                status.running.store(false, Ordering::Release);
                return None;
            }
        };
        status.running.store(true, Ordering::Release);

        match mv {
            Move::Line { axes, .. } => self.load_line(&axes),
            Move::Dwell { microseconds } => {
                status.dwell_active.store(true, Ordering::Release);
                self.hal.load_dwell(microseconds);
                self.hal.start_dwell();
            }
            Move::Start => {
                status.gate_open.store(true, Ordering::Release);
                self.hal.trigger_loader();
            }
            Move::Stop => {
                status.gate_open.store(false, Ordering::Release);
                status.running.store(false, Ordering::Release);
            }
            Move::End => {
                status.running.store(false, Ordering::Release);
                return Some(LoaderEvent::ProgramEnd);
            }
        }
        None
    }

    fn load_line(&mut self, steps: &[AxisStep; AXES]) {
        self.apply_pending_config();

        let mut mask = AxisMask::empty();
        for axis in Axis::ALL {
            let step = &steps[axis.index()];
            if !step.is_active() {
                continue;
            }
            debug_assert!(step.timing.period != 0 && step.timing.postscale != 0);

            let level = step.direction.is_forward() != self.polarity[axis.index()];
            self.hal.set_dir(axis, level);
            self.hal.set_enable(axis, true);
            self.hal.load_timer(axis, step.timing.prescaler, step.timing.period);
            self.axes[axis.index()] = AxisRuntime {
                steps: step.steps,
                postscale: step.timing.postscale,
                postscale_counter: step.timing.postscale,
            };
            mask |= AxisMask::of(axis);
        }

        if mask.is_empty() {
            self.hal.trigger_loader();
            return;
        }

        // All the axes are loaded before any of them starts, so they start
        // on the same tick.
        self.status.active.store(mask);
        for axis in mask.axes() {
            self.hal.start_timer(axis);
        }
    }

    fn apply_pending_config(&mut self) {
        for axis in Axis::ALL {
            let i = axis.index();
            if let Some(polarity) = self.pending_polarity[i].take() {
                self.polarity[i] = polarity;
            }
            if let Some(microsteps) = self.pending_microsteps[i].take() {
                self.hal.set_microsteps(axis, microsteps);
            }
        }
    }

    /// Overflow interrupt of the step timer of an axis.
    pub fn on_axis_timer(&mut self, axis: Axis) {
        let i = axis.index();
        if self.axes[i].steps == 0 {
            self.hal.stop_timer(axis);
            return;
        }

        // The postscale counter stretches the step interval beyond what the
        // 16 bit timer can count.
        let rt = &mut self.axes[i];
        rt.postscale_counter -= 1;
        if rt.postscale_counter != 0 {
            return;
        }
        rt.postscale_counter = rt.postscale;

        let remaining = self.do_step(axis, |rt| {
            rt.steps -= 1;
            rt.steps
        });

        if remaining == 0 {
            self.hal.stop_timer(axis);
            if self.status.active.remove(AxisMask::of(axis)).is_empty() {
                self.hal.trigger_loader();
            }
        }
    }

    /// Overflow interrupt of the dwell timer.
    pub fn on_dwell_timer(&mut self) {
        self.hal.stop_dwell();
        self.status.dwell_active.store(false, Ordering::Release);
        self.hal.trigger_loader();
    }

    fn do_step<R>(&mut self, axis: Axis, f: impl FnOnce(&mut AxisRuntime) -> R) -> R {
        // The driver advances when the STEP pin rises from low to high. We
        // do our bookkeeping while it's held high.
        self.hal.set_step(axis, true);
        let ret = f(&mut self.axes[axis.index()]);
        self.hal.step_pulse_delay();
        self.hal.set_step(axis, false);
        ret
    }
}
