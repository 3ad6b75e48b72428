// SPDX-License-Identifier: GPL-3.0-or-later

// A board made of software. Timers count on a virtual clock and the pins
// record what a logic analyzer would see. The run_*() functions play the role
// of the interrupt controller: they advance the clock to the next timer
// overflow and call the matching interrupt handler.

use crate::consts::stepper::TICKS_PER_MICROSECOND;
use crate::machine::MachineIsr;
use crate::motion::motor_queue::Prescaler;
use crate::motion::stepper::{LoaderEvent, Stepper};
use crate::motion::units::prelude::*;

use super::hal::{StepTimers, StepperOutputs};

// A runaway timer would otherwise spin the test forever.
const MAX_EVENTS: u64 = 100_000_000;

#[derive(Copy, Clone, Default, Debug)]
pub struct SimTimer {
    /// Ticks between two overflows.
    reload: u64,
    /// Ticks left before the next overflow, valid while stopped.
    remaining: u64,
    next_fire: u64,
    running: bool,
}

impl SimTimer {
    fn load(&mut self, ticks: u64) {
        self.reload = ticks;
        self.remaining = ticks;
    }

    fn start(&mut self, now: u64) {
        if !self.running && self.reload != 0 {
            self.running = true;
            self.next_fire = now + self.remaining;
        }
    }

    fn stop(&mut self, now: u64) {
        if self.running {
            self.running = false;
            self.remaining = self.next_fire.saturating_sub(now).max(1);
        }
    }

    fn fire(&mut self) {
        // Periodic, the counter restarts from zero on overflow.
        self.next_fire += self.reload;
        self.remaining = self.reload;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// The outputs of one axis, as seen from the driver side.
#[derive(Copy, Clone, Debug)]
pub struct SimAxis {
    pub step: bool,
    pub dir: bool,
    pub enabled: bool,
    pub microsteps: Microsteps,
    pub rising_edges: u32,
    /// Rising edges counted up when DIR is high and down when it is low.
    pub net_steps: i64,
    pub first_step_at: Option<u64>,
    pub last_step_at: Option<u64>,
    /// Longest time between two consecutive steps.
    pub longest_gap: u64,
}

impl Default for SimAxis {
    fn default() -> Self {
        Self {
            step: false,
            dir: false,
            enabled: false,
            microsteps: Microsteps::Full,
            rising_edges: 0,
            net_steps: 0,
            first_step_at: None,
            last_step_at: None,
            longest_gap: 0,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SimEvent {
    AxisTimer(Axis),
    DwellTimer,
    Loader,
}

#[derive(Default)]
pub struct SimHal {
    /// Virtual time, in timer clock ticks.
    pub now: u64,
    axes: [SimAxis; AXES],
    timers: [SimTimer; AXES],
    dwell: SimTimer,
    loader_pending: bool,
    pub dwells: u32,
}

impl SimHal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axis(&self, axis: Axis) -> &SimAxis {
        &self.axes[axis.index()]
    }

    pub fn timer(&self, axis: Axis) -> &SimTimer {
        &self.timers[axis.index()]
    }

    pub fn now_us(&self) -> u64 {
        self.now / TICKS_PER_MICROSECOND
    }

    /// Net steps of every axis, with the raw DIR level as the sign.
    pub fn net_steps(&self) -> [i64; AXES] {
        core::array::from_fn(|i| self.axes[i].net_steps)
    }

    pub fn has_pending_work(&self) -> bool {
        self.loader_pending || self.dwell.running || self.timers.iter().any(|t| t.running)
    }

    /// Advances the clock to the next interrupt due at or before `deadline`.
    /// When none is due, the clock moves to the deadline.
    pub fn next_event(&mut self, deadline: u64) -> Option<SimEvent> {
        if self.loader_pending {
            self.loader_pending = false;
            return Some(SimEvent::Loader);
        }

        let mut next: Option<(u64, SimEvent)> = None;
        for axis in Axis::ALL {
            let t = &self.timers[axis.index()];
            if t.running && next.map_or(true, |(at, _)| t.next_fire < at) {
                next = Some((t.next_fire, SimEvent::AxisTimer(axis)));
            }
        }
        if self.dwell.running && next.map_or(true, |(at, _)| self.dwell.next_fire < at) {
            next = Some((self.dwell.next_fire, SimEvent::DwellTimer));
        }

        match next {
            Some((at, event)) if at <= deadline => {
                self.now = self.now.max(at);
                match event {
                    SimEvent::AxisTimer(axis) => self.timers[axis.index()].fire(),
                    SimEvent::DwellTimer => self.dwell.fire(),
                    SimEvent::Loader => {}
                }
                Some(event)
            }
            _ => {
                if deadline != u64::MAX {
                    self.now = self.now.max(deadline);
                }
                None
            }
        }
    }
}

impl StepperOutputs for SimHal {
    fn set_step(&mut self, axis: Axis, high: bool) {
        let now = self.now;
        let a = &mut self.axes[axis.index()];
        if high && !a.step {
            a.rising_edges += 1;
            a.net_steps += if a.dir { 1 } else { -1 };
            if let Some(last) = a.last_step_at {
                a.longest_gap = a.longest_gap.max(now - last);
            }
            a.first_step_at.get_or_insert(now);
            a.last_step_at = Some(now);
        }
        a.step = high;
    }

    fn set_dir(&mut self, axis: Axis, high: bool) {
        self.axes[axis.index()].dir = high;
    }

    fn set_enable(&mut self, axis: Axis, enabled: bool) {
        self.axes[axis.index()].enabled = enabled;
    }

    fn set_microsteps(&mut self, axis: Axis, microsteps: Microsteps) {
        self.axes[axis.index()].microsteps = microsteps;
    }

    fn step_pulse_delay(&mut self) {}
}

impl StepTimers for SimHal {
    fn load_timer(&mut self, axis: Axis, prescaler: Prescaler, period: u16) {
        self.timers[axis.index()].load(prescaler.ratio() as u64 * period as u64);
    }

    fn start_timer(&mut self, axis: Axis) {
        self.timers[axis.index()].start(self.now);
    }

    fn stop_timer(&mut self, axis: Axis) {
        self.timers[axis.index()].stop(self.now);
    }

    fn load_dwell(&mut self, microseconds: u32) {
        self.dwells += 1;
        self.dwell.load(microseconds as u64 * TICKS_PER_MICROSECOND);
    }

    fn start_dwell(&mut self) {
        self.dwell.start(self.now);
    }

    fn stop_dwell(&mut self) {
        self.dwell.stop(self.now);
    }

    fn trigger_loader(&mut self) {
        self.loader_pending = true;
    }
}

/// Runs the interrupts of a bare executor. Returns the number of program
/// ends the loader reported.
pub fn run_stepper_until<const N: usize>(st: &mut Stepper<'_, SimHal, N>, deadline: u64) -> u32 {
    let mut ends = 0;
    for _ in 0..MAX_EVENTS {
        let event = match st.hal_mut().next_event(deadline) {
            Some(event) => event,
            None => return ends,
        };
        let loaded = match event {
            SimEvent::AxisTimer(axis) => { st.on_axis_timer(axis); None }
            SimEvent::DwellTimer => { st.on_dwell_timer(); None }
            SimEvent::Loader => st.load_next_move(),
        };
        if loaded == Some(LoaderEvent::ProgramEnd) {
            ends += 1;
        }
    }
    warn!("Simulation ran out of events");
    ends
}

/// Runs the interrupts of a machine up to `deadline`, without the main loop.
pub fn run_until<const N: usize>(isr: &MachineIsr<'_, SimHal, N>, deadline: u64) {
    for _ in 0..MAX_EVENTS {
        let event = match isr.with_stepper(|st| st.hal_mut().next_event(deadline)) {
            Some(event) => event,
            None => return,
        };
        match event {
            SimEvent::AxisTimer(axis) => isr.on_axis_timer(axis),
            SimEvent::DwellTimer => isr.on_dwell_timer(),
            SimEvent::Loader => isr.on_software_interrupt(),
        }
    }
    warn!("Simulation ran out of events");
}

/// Runs the interrupts until no timer is left running.
pub fn run_until_idle<const N: usize>(isr: &MachineIsr<'_, SimHal, N>) {
    run_until(isr, u64::MAX)
}
