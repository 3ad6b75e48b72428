// SPDX-License-Identifier: GPL-3.0-or-later

// The motion planner accepts moves from the canonical machine and turns them
// into motor queue records. It never blocks: a move that doesn't fit in the
// queue is kept as a continuation, and move_dispatcher() picks it up again
// from the main loop once the stepper has made room.
//
// Positions are updated when a move is accepted, not when it's executed. The
// next move is then computed from where the last one will end, and the
// planner can run ahead of the motors by a whole queue.

mod aline;
mod arc;
mod ramp;
mod segments;

pub use aline::{corner_velocity, plan_aline, HeldTail};
pub use arc::ArcMove;
pub use ramp::Ramp;
pub use segments::Path;

use core::mem;

#[cfg(not(test))]
use num::Float;

use crate::config::MachineConfig;
use crate::consts::{
    motor_queue::MOTOR_QUEUE_SIZE,
    planner::{MAX_LINE_SEGMENT_TIME, TAIL_RELEASE_THRESHOLD},
};
use crate::status::{Error, MotionResult, Status};

use super::motor_queue::{Marker, QueueWriter};
use super::units::{minutes_to_us, prelude::*};

use arc::ArcRun;
use segments::{check_step_rate, Profile, Section, SectionRun, StepCursor};

enum Continuation {
    Off,
    Line(SectionRun),
    Aline { run: SectionRun, hold: Option<HeldTail> },
    Arc(ArcRun),
    Dwell { remaining_us: u64 },
    Marker(Marker),
}

impl Continuation {
    fn is_off(&self) -> bool {
        matches!(self, Continuation::Off)
    }

    /// Moves that start from a standstill, a held tail goes to zero before them.
    fn stops_first(&self) -> bool {
        !matches!(self, Continuation::Off | Continuation::Aline { .. })
    }
}

pub struct Planner<'q, const N: usize = MOTOR_QUEUE_SIZE> {
    queue: QueueWriter<'q, N>,
    /// Accepted position, in steps and in canonical units.
    position: StepVector,
    last_target: AxisVector,
    cursor: StepCursor,
    run: Continuation,
    // A released tail goes to the queue before anything else.
    tail: Option<SectionRun>,
    held: Option<HeldTail>,
}

impl<'q, const N: usize> Planner<'q, N> {
    pub fn new(queue: QueueWriter<'q, N>) -> Self {
        Self {
            queue,
            position: [Steps::ZERO; AXES],
            last_target: [0.0; AXES],
            cursor: StepCursor::new([Steps::ZERO; AXES]),
            run: Continuation::Off,
            tail: None,
            held: None,
        }
    }

    pub fn queue(&self) -> &QueueWriter<'q, N> {
        &self.queue
    }

    pub fn position(&self) -> StepVector {
        self.position
    }

    pub fn last_target(&self) -> AxisVector {
        self.last_target
    }

    pub fn has_held_tail(&self) -> bool {
        self.held.is_some()
    }

    /// True while a continuation runs or the queue is not empty. The stepper
    /// has its own is_busy() for the move being executed.
    pub fn is_busy(&self) -> bool {
        !self.queue.is_empty() || !self.run.is_off() || self.tail.is_some() || self.held.is_some()
    }

    /// Whether a new move can be accepted and the queue has room for `n`
    /// more records. Gates the reading of the next block.
    pub fn check_for_write_buffers(&self, n: usize) -> bool {
        self.run.is_off() && self.tail.is_none() && self.queue.has_room(n)
    }

    pub fn get_vector_length(a: &AxisVector, b: &AxisVector) -> f64 {
        super::units::vector_length(a, b)
    }

    /// Redefines the current position without moving. Refused while
    /// segments of an accepted move are still to be queued.
    pub fn set_position(&mut self, config: &MachineConfig, position: &AxisVector) -> MotionResult {
        if !self.run.is_off() || self.tail.is_some() || self.held.is_some() {
            return Ok(Status::Eagain);
        }
        self.position = config.to_steps(position, &self.position);
        self.last_target = *position;
        self.cursor.reset(self.position);
        debug!("Planner position set to {:?}", position);
        Ok(Status::Ok)
    }

    /// Constant velocity line to `target`, taking `minutes`.
    pub fn line(&mut self, config: &MachineConfig, target: &AxisVector, minutes: f64) -> MotionResult {
        self.ensure_ready()?;
        let steps = self.steps_to(config, target, minutes)?;

        let path = Path::new(&self.last_target, target);
        let cruise = Profile::Cruise { velocity: path.length / minutes, length: path.length };
        let mut run = SectionRun::new(path, *target);
        run.push(Section::sliced(0.0, cruise, MAX_LINE_SEGMENT_TIME));

        self.accept(target, steps);
        self.run = Continuation::Line(run);
        self.kick(config)
    }

    /// Jerk limited line to `target`. `minutes` sets the cruise velocity.
    pub fn aline(&mut self, config: &MachineConfig, target: &AxisVector, minutes: f64) -> MotionResult {
        self.ensure_ready()?;
        let steps = self.steps_to(config, target, minutes)?;

        let path = Path::new(&self.last_target, target);
        let velocity = path.length / minutes;
        let entry_velocity = match self.held.take() {
            Some(held) => {
                let v = corner_velocity(config, &held, &path, velocity);
                trace!("Corner at {:.1}mm/min", v);
                self.tail = Some(held.release(v, config));
                v
            }
            None => 0.0,
        };

        let plan = plan_aline(config, path, velocity, entry_velocity);
        trace!("Line of {:.3}mm, cruise at {:.1}mm/min", path.length, plan.cruise_velocity);

        self.accept(target, steps);
        self.run = Continuation::Aline { run: plan.run, hold: plan.hold };
        self.kick(config)
    }

    pub fn arc(&mut self, config: &MachineConfig, arc: &ArcMove) -> MotionResult {
        self.ensure_ready()?;
        if !(arc.minutes > 0.0) || !arc.minutes.is_finite() {
            return Err(Error::ParameterOverRange);
        }
        let run = ArcRun::new(config, &self.last_target, arc)?;
        let steps = config.to_steps(&arc.target, &self.position);
        trace!("Arc of {} segments", run.segments());

        self.accept(&arc.target, steps);
        self.run = Continuation::Arc(run);
        self.kick(config)
    }

    pub fn dwell(&mut self, config: &MachineConfig, seconds: f64) -> MotionResult {
        self.ensure_ready()?;
        if !(seconds >= 0.0) || !seconds.is_finite() {
            return Err(Error::ParameterOverRange);
        }
        let remaining_us = (seconds * 1_000_000.0).round() as u64;
        if remaining_us == 0 {
            return Ok(Status::Ok);
        }
        self.run = Continuation::Dwell { remaining_us };
        self.kick(config)
    }

    /// Queues a marker, effective when the stepper reaches it.
    pub fn queued_marker(&mut self, config: &MachineConfig, marker: Marker) -> MotionResult {
        self.ensure_ready()?;
        self.run = Continuation::Marker(marker);
        self.kick(config)
    }

    pub fn queued_stop(&mut self, config: &MachineConfig) -> MotionResult {
        self.queued_marker(config, Marker::Stop)
    }

    pub fn queued_start(&mut self, config: &MachineConfig) -> MotionResult {
        self.queued_marker(config, Marker::Start)
    }

    pub fn queued_end(&mut self, config: &MachineConfig) -> MotionResult {
        self.queued_marker(config, Marker::End)
    }

    /// Drops everything that is planned but not queued. The accepted
    /// position stays where the last move would have ended. The queue itself
    /// belongs to the stepper, which flushes it.
    pub fn abort(&mut self) {
        self.run = Continuation::Off;
        self.tail = None;
        self.held = None;
        self.cursor.reset(self.position);
    }

    /// The continuation pump, called on every turn of the main loop.
    pub fn move_dispatcher(&mut self, config: &MachineConfig) -> MotionResult {
        if self.held.is_some() && (self.queue.len() <= TAIL_RELEASE_THRESHOLD || self.run.stops_first()) {
            if let Some(held) = self.held.take() {
                trace!("Releasing held tail");
                self.tail = Some(held.release(0.0, config));
            }
        }

        if let Some(tail) = self.tail.as_mut() {
            match tail.poll(&mut self.cursor, &mut self.queue, config) {
                Ok(Status::Eagain) => return Ok(Status::Eagain),
                Ok(_) => self.tail = None,
                Err(e) => {
                    self.roll_back(config);
                    return Err(e);
                }
            }
        }

        let status = match self.poll_run(config) {
            Ok(status) => status,
            Err(e) => {
                self.roll_back(config);
                return Err(e);
            }
        };
        match status {
            Status::Eagain | Status::Noop => return Ok(status),
            _ => {}
        }

        if let Continuation::Aline { hold: Some(hold), .. } = mem::replace(&mut self.run, Continuation::Off) {
            self.held = Some(hold);
        }
        if self.cursor.position() == self.position {
            self.cursor.drop_carry();
        }
        Ok(Status::Ok)
    }

    fn poll_run(&mut self, config: &MachineConfig) -> MotionResult {
        let cursor = &mut self.cursor;
        let queue = &mut self.queue;
        match &mut self.run {
            Continuation::Off => Ok(Status::Noop),
            Continuation::Line(run) | Continuation::Aline { run, .. } => run.poll(cursor, queue, config),
            Continuation::Arc(arc) => arc.poll(cursor, queue, config),
            Continuation::Dwell { remaining_us } => {
                while *remaining_us > 0 {
                    if !queue.has_room(1) {
                        return Ok(Status::Eagain);
                    }
                    let chunk = (*remaining_us).min(u32::MAX as u64);
                    queue.queue_dwell(chunk as u32)?;
                    *remaining_us -= chunk;
                }
                Ok(Status::Ok)
            }
            Continuation::Marker(marker) => {
                if !queue.has_room(1) {
                    return Ok(Status::Eagain);
                }
                queue.queue_marker(*marker)?;
                Ok(Status::Ok)
            }
        }
    }

    fn ensure_ready(&self) -> MotionResult<()> {
        if !self.run.is_off() || self.tail.is_some() {
            return Err(Error::MotionControlError);
        }
        Ok(())
    }

    fn steps_to(&self, config: &MachineConfig, target: &AxisVector, minutes: f64) -> MotionResult<StepVector> {
        let steps = config.to_steps(target, &self.position);
        if steps == self.position {
            return Err(Error::ZeroLengthMove);
        }
        if !(minutes > 0.0) || !minutes.is_finite() || minutes_to_us(minutes) < 1.0 {
            return Err(Error::ParameterOverRange);
        }
        // Ramps never go past the cruise velocity, the cruise is the peak.
        for axis in Axis::ALL {
            let i = axis.index();
            check_step_rate(config, axis, (target[i] - self.last_target[i]) / minutes)?;
        }
        Ok(steps)
    }

    // A move failed half way through. What reached the queue stays, the rest
    // is dropped, and the planner picks up from where the motors will stop.
    fn roll_back(&mut self, config: &MachineConfig) {
        self.run = Continuation::Off;
        self.tail = None;
        self.held = None;
        self.position = self.cursor.position();
        self.last_target = config.to_units(&self.position, &self.last_target);
        self.cursor.drop_carry();
        warn!("Move dropped at {:?}", self.last_target);
    }

    fn accept(&mut self, target: &AxisVector, steps: StepVector) {
        self.last_target = *target;
        self.position = steps;
    }

    // Starts the new continuation right away. It stays accepted if the queue
    // is full.
    fn kick(&mut self, config: &MachineConfig) -> MotionResult {
        match self.move_dispatcher(config)? {
            Status::Eagain => Ok(Status::Eagain),
            _ => Ok(Status::Ok),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisConfig, PathControl};
    use crate::motion::motor_queue::{Move, MotorQueue, QueueReader};

    fn config(path_control: PathControl) -> MachineConfig {
        let mut cfg = MachineConfig { path_control, ..MachineConfig::default() };
        cfg.axes = [AxisConfig::linear().with_drive(1.8, Microsteps::Eighth, 1.6); AXES];
        cfg
    }

    fn planner<const N: usize>() -> (Planner<'static, N>, QueueReader<'static, N>) {
        let (tx, rx) = Box::leak(Box::new(MotorQueue::<N>::new())).split();
        (Planner::new(tx), rx)
    }

    #[derive(Default, Debug)]
    struct Drained {
        steps: [i64; AXES],
        lines: u32,
        dwells: Vec<u32>,
        markers: Vec<Move>,
        order: Vec<char>,
    }

    fn drain<const N: usize>(rx: &mut QueueReader<N>, out: &mut Drained) {
        drain_to(rx, out, 0)
    }

    fn drain_to<const N: usize>(rx: &mut QueueReader<N>, out: &mut Drained, keep: usize) {
        while rx.len() > keep {
            let Some(mv) = rx.dequeue() else { return };
            match mv {
                Move::Line { axes, .. } => {
                    out.lines += 1;
                    out.order.push('L');
                    for (t, a) in out.steps.iter_mut().zip(axes) {
                        *t += if a.direction.is_forward() { a.steps as i64 } else { -(a.steps as i64) };
                    }
                }
                Move::Dwell { microseconds } => {
                    out.dwells.push(microseconds);
                    out.order.push('D');
                }
                marker => {
                    out.markers.push(marker);
                    out.order.push('M');
                }
            }
        }
    }

    // Keeps the queue half full, like a stepper lagging behind the planner.
    fn pump_until_ready<const N: usize>(
        mp: &mut Planner<N>,
        rx: &mut QueueReader<N>,
        cfg: &MachineConfig,
        out: &mut Drained,
    ) {
        for _ in 0..100_000 {
            if mp.check_for_write_buffers(1) {
                return;
            }
            drain_to(rx, out, N / 2);
            mp.move_dispatcher(cfg).unwrap();
        }
        panic!("planner never got ready");
    }

    // Plays the main loop against an instant stepper.
    fn finish<const N: usize>(mp: &mut Planner<N>, rx: &mut QueueReader<N>, cfg: &MachineConfig, out: &mut Drained) {
        for _ in 0..100_000 {
            drain(rx, out);
            mp.move_dispatcher(cfg).unwrap();
            drain(rx, out);
            if !mp.is_busy() {
                return;
            }
        }
        panic!("planner never went idle");
    }

    #[test]
    fn line_updates_the_accepted_position() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, _rx) = planner::<8>();
        assert_eq!(mp.line(&cfg, &[1.0, 2.0, 0.0, 0.0], 0.1), Ok(Status::Ok));
        assert_eq!(mp.position(), [Steps(1000), Steps(2000), Steps(0), Steps(0)]);
        assert_eq!(mp.queue().len(), 1);
        assert!(mp.is_busy());
    }

    #[test]
    fn zero_length_lines_are_dropped() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, _rx) = planner::<8>();
        mp.line(&cfg, &[1.0, 0.0, 0.0, 0.0], 0.1).unwrap();
        assert_eq!(mp.line(&cfg, &[1.0, 0.0, 0.0, 0.0], 0.1), Err(Error::ZeroLengthMove));
        assert_eq!(mp.line(&cfg, &[1.0002, 0.0, 0.0, 0.0], 0.1), Err(Error::ZeroLengthMove));
        assert_eq!(mp.position()[0], Steps(1000));
        assert_eq!(mp.last_target()[0], 1.0);
    }

    #[test]
    fn aline_waits_for_room() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, mut rx) = planner::<4>();
        let mut out = Drained::default();

        assert_eq!(mp.aline(&cfg, &[10.0, 0.0, 0.0, 0.0], 10.0 / 600.0), Ok(Status::Eagain));
        // Accepted even though it's not queued yet.
        assert_eq!(mp.position()[0], Steps(10_000));
        assert!(!mp.check_for_write_buffers(1));
        assert_eq!(mp.aline(&cfg, &[20.0, 0.0, 0.0, 0.0], 0.1), Err(Error::MotionControlError));

        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.steps, [10_000, 0, 0, 0]);
        assert!(out.lines > 3);
        assert!(mp.check_for_write_buffers(3));
    }

    #[test]
    fn held_tail_blends_into_the_next_line() {
        let cfg = config(PathControl::ExactPath);
        let (mut mp, mut rx) = planner::<64>();
        let mut out = Drained::default();

        mp.aline(&cfg, &[20.0, 0.0, 0.0, 0.0], 20.0 / 1200.0).unwrap();
        pump_until_ready(&mut mp, &mut rx, &cfg, &mut out);
        // The queue is not running low, the tail waits for the next line.
        assert!(mp.has_held_tail());
        assert!(mp.queue().len() > TAIL_RELEASE_THRESHOLD);

        mp.aline(&cfg, &[20.0, 20.0, 0.0, 0.0], 20.0 / 1200.0).unwrap();
        assert!(!mp.has_held_tail());
        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.steps, [20_000, 20_000, 0, 0]);
        assert_eq!(mp.cursor.position(), mp.position());
    }

    #[test]
    fn held_tail_is_released_when_the_queue_runs_low() {
        let cfg = config(PathControl::Continuous);
        let (mut mp, mut rx) = planner::<64>();
        let mut out = Drained::default();

        mp.aline(&cfg, &[20.0, 0.0, 0.0, 0.0], 20.0 / 1200.0).unwrap();
        assert!(mp.has_held_tail());
        assert!(mp.is_busy());
        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.steps, [20_000, 0, 0, 0]);
    }

    #[test]
    fn dwell_and_markers_follow_the_held_tail() {
        let cfg = config(PathControl::ExactPath);
        let (mut mp, mut rx) = planner::<64>();
        let mut out = Drained::default();

        mp.aline(&cfg, &[5.0, 0.0, 0.0, 0.0], 5.0 / 600.0).unwrap();
        assert!(mp.has_held_tail());
        mp.dwell(&cfg, 1.5).unwrap();
        pump_until_ready(&mut mp, &mut rx, &cfg, &mut out);
        mp.queued_stop(&cfg).unwrap();
        finish(&mut mp, &mut rx, &cfg, &mut out);

        assert_eq!(out.steps[0], 5000);
        assert_eq!(out.dwells, [1_500_000]);
        assert_eq!(out.markers, [Move::Stop]);
        let tail_end = out.order.iter().rposition(|c| *c == 'L').unwrap();
        assert_eq!(&out.order[tail_end + 1..], ['D', 'M']);
    }

    #[test]
    fn long_dwells_are_split() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, mut rx) = planner::<8>();
        let mut out = Drained::default();
        mp.dwell(&cfg, 5000.0).unwrap();
        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.dwells.iter().map(|d| *d as u64).sum::<u64>(), 5_000_000_000);
        assert_eq!(out.dwells.len(), 2);

        assert_eq!(mp.dwell(&cfg, 0.0), Ok(Status::Ok));
        assert!(!mp.is_busy());
        assert_eq!(mp.dwell(&cfg, -1.0), Err(Error::ParameterOverRange));
    }

    #[test]
    fn arc_continuation_survives_a_tiny_queue() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, mut rx) = planner::<4>();
        let mut out = Drained::default();
        mp.set_position(&cfg, &[0.0; AXES]).unwrap();

        let arc = ArcMove {
            target: [10.0, 10.0, 0.0, 0.0],
            theta: -core::f64::consts::FRAC_PI_2,
            radius: 10.0,
            angular_travel: core::f64::consts::FRAC_PI_2,
            linear_travel: 0.0,
            axes: [Axis::X, Axis::Y, Axis::Z],
            minutes: 15.708 / 600.0,
        };
        assert_eq!(mp.arc(&cfg, &arc), Ok(Status::Eagain));
        assert_eq!(mp.position(), [Steps(10_000), Steps(10_000), Steps(0), Steps(0)]);

        let mut eagains = 0;
        loop {
            drain(&mut rx, &mut out);
            match mp.move_dispatcher(&cfg).unwrap() {
                Status::Eagain => eagains += 1,
                _ => break,
            }
        }
        drain(&mut rx, &mut out);
        assert!(eagains > 40);
        assert_eq!(out.lines, 158);
        assert_eq!(out.steps, [10_000, 10_000, 0, 0]);
    }

    #[test]
    fn set_position_waits_for_the_planner() {
        let cfg = config(PathControl::ExactPath);
        let (mut mp, mut rx) = planner::<64>();
        mp.aline(&cfg, &[5.0, 0.0, 0.0, 0.0], 0.01).unwrap();
        assert_eq!(mp.set_position(&cfg, &[0.0; AXES]), Ok(Status::Eagain));

        finish(&mut mp, &mut rx, &cfg, &mut Drained::default());
        assert_eq!(mp.set_position(&cfg, &[1.0, 2.0, 3.0, 4.0]), Ok(Status::Ok));
        assert_eq!(mp.position(), [Steps(1000), Steps(2000), Steps(3000), Steps(4000)]);
    }

    #[test]
    fn abort_drops_everything() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, mut rx) = planner::<4>();
        mp.aline(&cfg, &[10.0, 0.0, 0.0, 0.0], 0.1).unwrap();
        // The stepper flushes its side first.
        rx.flush();
        mp.abort();
        assert!(!mp.is_busy());
        assert_eq!(mp.move_dispatcher(&cfg), Ok(Status::Noop));
        assert!(mp.check_for_write_buffers(3));
        assert_eq!(mp.position()[0], Steps(10_000));
    }

    #[test]
    fn too_fast_moves_are_refused_before_they_are_accepted() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, mut rx) = planner::<8>();
        let mut out = Drained::default();

        // 1mm at 100000mm/min is 1.6M steps/s.
        let fast = 1.0 / 100_000.0;
        assert_eq!(mp.line(&cfg, &[1.0, 0.0, 0.0, 0.0], fast), Err(Error::MaxFeedRateExceeded));
        assert_eq!(mp.aline(&cfg, &[1.0, 0.0, 0.0, 0.0], fast), Err(Error::MaxFeedRateExceeded));
        assert_eq!(mp.position(), [Steps::ZERO; AXES]);
        assert_eq!(mp.last_target(), [0.0; AXES]);
        assert!(!mp.is_busy());

        // The same target at a sane rate is a move, not a zero length one.
        assert_eq!(mp.line(&cfg, &[1.0, 0.0, 0.0, 0.0], 1.0 / 60.0), Ok(Status::Ok));
        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.steps, [1000, 0, 0, 0]);

        mp.line(&cfg, &[2.0, 0.0, 0.0, 0.0], 1.0 / 60.0).unwrap();
        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.steps, [2000, 0, 0, 0]);
    }

    #[test]
    fn failed_emission_rolls_back_to_what_was_queued() {
        let cfg = config(PathControl::ExactStop);
        let (mut mp, mut rx) = planner::<4>();
        let mut out = Drained::default();

        assert_eq!(mp.aline(&cfg, &[10.0, 0.0, 0.0, 0.0], 10.0 / 600.0), Ok(Status::Eagain));
        drain(&mut rx, &mut out);
        let queued = out.steps[0];
        assert!(queued > 0 && queued < 10_000);

        mp.roll_back(&cfg);
        assert!(!mp.is_busy());
        assert_eq!(mp.position()[0], Steps(queued as i32));
        assert!((mp.last_target()[0] - queued as f64 / 1000.0).abs() < 1e-9);

        // Going to the old target again queues exactly the missing steps.
        mp.line(&cfg, &[10.0, 0.0, 0.0, 0.0], 0.1).unwrap();
        finish(&mut mp, &mut rx, &cfg, &mut out);
        assert_eq!(out.steps, [10_000, 0, 0, 0]);
    }
}
