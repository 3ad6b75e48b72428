// SPDX-License-Identifier: GPL-3.0-or-later

// Homing finds the place where each axis is 0. The switch sits at the
// negative end of the axis. For each axis, we go down quickly until the
// switch trips, back off a little, then go down again slowly so the switch
// trips at a repeatable place, and that's our origin.
//
// Like the planner, the cycle is a continuation. It's polled by the main
// loop, issues one move per phase, and waits for the motors in between.

use crate::consts::homing::DEFAULT_SEARCH_TRAVEL;
use crate::drivers::hal::Hal;
use crate::motion::canonical_machine::AxisWords;
use crate::motion::units::prelude::*;
use crate::status::{Error, MotionResult, Status};

use super::Machine;

const HOMING_ORDER: [Axis; AXES] = [Axis::Z, Axis::X, Axis::Y, Axis::A];

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HomingPhase {
    /// Moving toward the switch at search velocity.
    Search,
    /// Moving away from the switch after it tripped.
    Backoff,
    /// Moving toward the switch at latch velocity.
    Latch,
}

#[derive(Copy, Clone, Debug)]
pub(super) struct HomingCycle {
    // Index into HOMING_ORDER of the axis being homed.
    order: usize,
    // None between two axes.
    phase: Option<HomingPhase>,
}

impl HomingCycle {
    fn axis(&self) -> Axis {
        HOMING_ORDER[self.order]
    }
}

impl<'a, H: Hal, const N: usize> Machine<'a, H, N> {
    /// Starts the homing cycle. It runs from run_once(), which returns
    /// `Complete` once every axis is homed.
    pub fn homing_cycle(&mut self) -> MotionResult {
        if !self.cm.config().homing_mode {
            return Ok(Status::Noop);
        }
        if self.homing.is_some() || self.is_busy() {
            return Err(Error::MotionControlError);
        }

        self.cm.save_gcode_model();
        self.cm.use_length_units(false);
        self.cm.set_distance_mode(false);
        self.cm.set_inverse_feed_rate_mode(false);
        self.homing = Some(HomingCycle { order: 0, phase: None });
        info!("Homing");
        Ok(Status::Ok)
    }

    pub fn is_homing(&self) -> bool {
        self.homing.is_some()
    }

    /// The axis being homed and what it's doing.
    pub fn homing_phase(&self) -> Option<(Axis, HomingPhase)> {
        let cycle = self.homing?;
        Some((cycle.axis(), cycle.phase?))
    }

    /// The homing continuation. `Noop` when no cycle runs.
    pub(super) fn run_homing_cycle(&mut self) -> MotionResult {
        let mut cycle = match self.homing {
            Some(cycle) => cycle,
            None => return Ok(Status::Noop),
        };
        if self.is_busy() {
            return Ok(Status::Eagain);
        }

        match cycle.phase {
            None => {
                let next = (cycle.order..AXES).find(|&i| {
                    let cfg = self.cm.config().axis(HOMING_ORDER[i]);
                    cfg.homing_enabled && cfg.mode.is_stepped()
                });
                let order = match next {
                    Some(order) => order,
                    None => {
                        self.homing = None;
                        self.cm.restore_gcode_model();
                        info!("Homing complete");
                        return Ok(Status::Complete);
                    }
                };
                cycle = HomingCycle { order, phase: Some(HomingPhase::Search) };
            }
            // The motors got to the end of the search or the latch without
            // meeting the switch.
            Some(HomingPhase::Search) | Some(HomingPhase::Latch) => {
                warn!("Homing of {} found no switch", cycle.axis().letter());
                return self.abort_homing(Error::MaxTableTravelExceeded);
            }
            Some(HomingPhase::Backoff) => cycle.phase = Some(HomingPhase::Latch),
        }

        self.homing = Some(cycle);
        if let Err(e) = self.homing_move(cycle) {
            return self.abort_homing(e);
        }
        Ok(Status::Eagain)
    }

    fn abort_homing(&mut self, e: Error) -> MotionResult {
        self.homing = None;
        self.cm.restore_gcode_model();
        Err(e)
    }

    /// Called by the limit switch handler. Returns whether the homing cycle
    /// was expecting the switch.
    pub(super) fn homing_limit_hit(&mut self) -> MotionResult<bool> {
        let mut cycle = match self.homing {
            Some(cycle) => cycle,
            None => return Ok(false),
        };
        let axis = cycle.axis();

        match cycle.phase {
            Some(HomingPhase::Search) => {
                self.halt_motors();
                cycle.phase = Some(HomingPhase::Backoff);
                self.homing = Some(cycle);
                if let Err(e) = self.homing_move(cycle) {
                    return self.abort_homing(e).map(|_| true);
                }
            }
            Some(HomingPhase::Latch) => {
                self.halt_motors();
                self.cm.set_axis_position(axis, 0.0)?;
                debug!("Homing: {} is at 0", axis.letter());
                self.homing = Some(HomingCycle { order: cycle.order + 1, phase: None });
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn homing_move(&mut self, cycle: HomingCycle) -> MotionResult {
        let axis = cycle.axis();
        let cfg = *self.cm.config().axis(axis);
        let (distance, velocity) = match cycle.phase {
            Some(HomingPhase::Search) => {
                let travel = if cfg.travel_max > 0.0 { cfg.travel_max } else { DEFAULT_SEARCH_TRAVEL };
                (-travel, cfg.search_velocity)
            }
            Some(HomingPhase::Backoff) => (cfg.latch_backoff, cfg.search_velocity),
            // Twice the backoff, the switch should trip halfway.
            Some(HomingPhase::Latch) => (-2.0 * cfg.latch_backoff, cfg.latch_velocity),
            None => return Ok(Status::Noop),
        };
        debug!("Homing: {} {:?}, {}mm at {}mm/min", axis.letter(), cycle.phase, distance, velocity);

        let mut words: AxisWords = [None; AXES];
        words[axis.index()] = Some(distance);
        self.cm.set_feed_rate(velocity)?;
        self.cm.straight_feed(&words)
    }
}
