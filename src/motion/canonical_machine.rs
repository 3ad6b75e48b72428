// SPDX-License-Identifier: GPL-3.0-or-later

// The canonical machine is what the G-code parser talks to. It keeps the
// modal state of the program, converts the words of a block into a target in
// mm (or degrees), works out the timing and the arc geometry, and hands the
// move to the planner.
//
// Coordinates come in user units: mm or inches (G21/G20), absolute or
// incremental (G90/G91). Everything past set_target() is in mm and degrees.

use core::f64::consts::PI;

#[cfg(not(test))]
use num::Float;

use crate::config::{AxisMode, MachineConfig};
use crate::consts::motor_queue::MOTOR_QUEUE_SIZE;
use crate::status::{Error, MotionResult, Status};

use super::motor_queue::QueueWriter;
use super::planner::{ArcMove, Planner};
use super::units::{inches_to_mm, mm_to_inches, prelude::*};

/// The axis words of a block. Missing words leave the axis where it is.
pub type AxisWords = [Option<f64>; AXES];

/// I, J and K, the arc center offsets along X, Y and Z.
pub type ArcOffsets = [Option<f64>; 3];

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NextAction {
    Motion,
    Dwell,
    SetOriginOffsets,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum MotionMode {
    StraightTraverse,
    StraightFeed,
    CwArc,
    CcwArc,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Plane {
    XY,
    XZ,
    YZ,
}

impl Plane {
    /// The two in plane axes, then the axis normal to the plane.
    pub fn axes(self) -> [Axis; 3] {
        match self {
            Plane::XY => [Axis::X, Axis::Y, Axis::Z],
            Plane::XZ => [Axis::X, Axis::Z, Axis::Y],
            Plane::YZ => [Axis::Y, Axis::Z, Axis::X],
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SpindleMode {
    Off,
    Cw,
    Ccw,
}

/// The modal state of the G-code program.
#[derive(Copy, Clone, Debug)]
pub struct GCodeModel {
    pub next_action: NextAction,
    pub motion_mode: MotionMode,
    pub plane: Plane,
    pub inches_mode: bool,
    pub absolute_mode: bool,
    /// G53, absolute coordinates for the current block only.
    pub absolute_override: bool,
    pub inverse_feed_rate_mode: bool,
    /// mm/min
    pub feed_rate: f64,
    /// Moves per minute, in G93.
    pub inverse_feed_rate: f64,
    pub seek_rate: f64,
    pub spindle_speed: f64,
    pub spindle_mode: SpindleMode,
    pub tool: u8,
    /// Seconds
    pub dwell_time: f64,

    pub position: AxisVector,
    pub target: AxisVector,
    /// I, J, K, in mm.
    pub offset: [f64; 3],
    pub radius: f64,
}

impl GCodeModel {
    fn new(config: &MachineConfig) -> Self {
        Self {
            next_action: NextAction::Motion,
            motion_mode: MotionMode::StraightFeed,
            plane: Plane::XY,
            inches_mode: false,
            absolute_mode: true,
            absolute_override: false,
            inverse_feed_rate_mode: false,
            feed_rate: 0.0,
            inverse_feed_rate: 0.0,
            seek_rate: config.axis(Axis::X).seek_rate_max,
            spindle_speed: 0.0,
            spindle_mode: SpindleMode::Off,
            tool: 0,
            dwell_time: 0.0,
            position: [0.0; AXES],
            target: [0.0; AXES],
            offset: [0.0; 3],
            radius: 0.0,
        }
    }
}

pub struct CanonicalMachine<'q, const N: usize = MOTOR_QUEUE_SIZE> {
    pub gm: GCodeModel,
    // Saved by save_gcode_model(), used around homing and macros.
    gt: GCodeModel,
    config: MachineConfig,
    mp: Planner<'q, N>,
}

impl<'q, const N: usize> CanonicalMachine<'q, N> {
    pub fn new(config: MachineConfig, queue: QueueWriter<'q, N>) -> MotionResult<Self> {
        config.validate()?;
        let gm = GCodeModel::new(&config);
        Ok(Self { gm, gt: gm, config, mp: Planner::new(queue) })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn planner(&self) -> &Planner<'q, N> {
        &self.mp
    }

    pub fn planner_mut(&mut self) -> &mut Planner<'q, N> {
        &mut self.mp
    }

    /// Position of an axis in user units.
    pub fn get_position(&self, axis: Axis) -> f64 {
        self.to_user_units(axis, self.gm.position[axis.index()])
    }

    fn to_user_units(&self, axis: Axis, value: f64) -> f64 {
        if self.gm.inches_mode && axis.is_linear() { mm_to_inches(value) } else { value }
    }

    fn to_mm(&self, value: f64) -> f64 {
        if self.gm.inches_mode { inches_to_mm(value) } else { value }
    }

    /*
     * Modal state
     */

    pub fn select_plane(&mut self, plane: Plane) {
        self.gm.plane = plane;
    }

    /// G20 (inches) or G21 (mm).
    pub fn use_length_units(&mut self, inches: bool) {
        self.gm.inches_mode = inches;
    }

    /// G90 (absolute) or G91 (incremental).
    pub fn set_distance_mode(&mut self, absolute: bool) {
        self.gm.absolute_mode = absolute;
    }

    pub fn set_absolute_override(&mut self, absolute_override: bool) {
        self.gm.absolute_override = absolute_override;
    }

    /// G93 (inverse time) or G94 (units per minute).
    pub fn set_inverse_feed_rate_mode(&mut self, inverse: bool) {
        self.gm.inverse_feed_rate_mode = inverse;
    }

    /// F word. A rate in units per minute, or moves per minute in G93.
    pub fn set_feed_rate(&mut self, rate: f64) -> MotionResult<()> {
        if !(rate >= 0.0) || !rate.is_finite() {
            return Err(Error::ParameterOverRange);
        }
        if self.gm.inverse_feed_rate_mode {
            self.gm.inverse_feed_rate = rate;
        } else {
            self.gm.feed_rate = self.to_mm(rate);
        }
        Ok(())
    }

    pub fn set_next_action(&mut self, action: NextAction) {
        self.gm.next_action = action;
    }

    pub fn set_spindle_speed(&mut self, speed: f64) {
        self.gm.spindle_speed = speed;
        debug!("Spindle speed {}", speed);
    }

    pub fn set_spindle_mode(&mut self, mode: SpindleMode) {
        self.gm.spindle_mode = mode;
        debug!("Spindle {:?}", mode);
    }

    pub fn select_tool(&mut self, tool: u8) {
        self.gm.tool = tool;
        debug!("Tool {} selected", tool);
    }

    pub fn change_tool(&mut self, tool: u8) {
        self.gm.tool = tool;
        info!("Tool change to {}", tool);
    }

    pub fn comment(&self, text: &str) {
        debug!("({})", text);
    }

    pub fn message(&self, text: &str) {
        info!("MSG: {}", text);
    }

    pub fn save_gcode_model(&mut self) {
        self.gt = self.gm;
    }

    /// Brings back the modal state saved by save_gcode_model(). The position
    /// is not restored, the machine is where it is.
    pub fn restore_gcode_model(&mut self) {
        let position = self.gm.position;
        self.gm = self.gt;
        self.gm.position = position;
        self.gm.target = position;
    }

    /// The modal state a program starts with, set at program end and by
    /// an async end.
    pub fn reset_modal_state(&mut self) {
        self.gm.plane = Plane::XY;
        self.gm.absolute_mode = true;
        self.gm.absolute_override = false;
        self.gm.inverse_feed_rate_mode = false;
        self.gm.motion_mode = MotionMode::StraightFeed;
        self.gm.next_action = NextAction::Motion;
        self.gm.spindle_mode = SpindleMode::Off;
        self.gm.target = self.gm.position;
        debug!("Modal state reset");
    }

    /// G92. The given axes take the given coordinates, without moving.
    pub fn set_origin_offsets(&mut self, words: &AxisWords) -> MotionResult {
        let mut position = self.gm.position;
        for axis in Axis::ALL {
            if let Some(value) = words[axis.index()] {
                position[axis.index()] = if axis.is_linear() { self.to_mm(value) } else { value };
            }
        }
        self.set_position(&position)
    }

    /// Moves the origin of one axis to where it is now. Used by homing.
    pub fn set_axis_position(&mut self, axis: Axis, value: f64) -> MotionResult {
        let mut position = self.gm.position;
        position[axis.index()] = value;
        self.set_position(&position)
    }

    fn set_position(&mut self, position: &AxisVector) -> MotionResult {
        let status = self.mp.set_position(&self.config, position)?;
        if status == Status::Ok {
            self.gm.position = *position;
            self.gm.target = *position;
        }
        Ok(status)
    }

    /*
     * Targets
     */

    /// Computes gm.target from the axis words of a block.
    pub fn set_target(&mut self, words: &AxisWords) {
        let absolute = self.gm.absolute_mode || self.gm.absolute_override;
        self.gm.absolute_override = false;

        let position = self.gm.position;
        let mut target = position;

        for axis in Axis::ALL {
            let i = axis.index();
            let cfg = self.config.axis(axis);
            let word = match words[i] {
                Some(word) => word,
                None => continue,
            };

            target[i] = match cfg.mode {
                AxisMode::Disabled => position[i],
                AxisMode::Standard | AxisMode::Inhibited => {
                    let value = if axis.is_linear() { self.to_mm(word) } else { word };
                    if absolute { value } else { position[i] + value }
                }
                // The word is a length along the surface of the cylinder.
                AxisMode::Radius => {
                    let degrees = length_to_degrees(self.to_mm(word), cfg.radius);
                    if absolute { degrees } else { position[i] + degrees }
                }
                // Computed below, from the primary axes.
                _ => position[i],
            };
        }

        for axis in Axis::ALL {
            let cfg = self.config.axis(axis);
            let primaries = cfg.mode.slaved_to();
            if primaries.is_empty() {
                continue;
            }
            let length = primaries
                .iter()
                .map(|p| {
                    let d = target[p.index()] - position[p.index()];
                    d * d
                })
                .sum::<f64>()
                .sqrt();
            target[axis.index()] = position[axis.index()] + length_to_degrees(length, cfg.radius);
        }

        self.gm.target = target;
    }

    /// Minutes the move from position to target takes. The slowest of the
    /// requested rate and the rate limits of each axis wins.
    fn move_time(&self, traverse: bool) -> f64 {
        let delta: AxisVector = core::array::from_fn(|i| self.gm.target[i] - self.gm.position[i]);
        let xyz = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
        let abc = delta[3].abs();

        let mut minutes: f64 = 0.0;
        if traverse {
            minutes = minutes.max(xyz / self.gm.seek_rate);
        } else if self.gm.inverse_feed_rate_mode {
            minutes = minutes.max(1.0 / self.gm.inverse_feed_rate);
        } else {
            minutes = minutes.max(xyz / self.gm.feed_rate).max(abc / self.gm.feed_rate);
        }

        for axis in Axis::ALL {
            let cfg = self.config.axis(axis);
            let limit = if traverse { cfg.seek_rate_max } else { cfg.feed_rate_max };
            minutes = minutes.max(delta[axis.index()].abs() / limit);
        }
        minutes
    }

    fn check_feed_rate(&self) -> MotionResult<()> {
        let rate = if self.gm.inverse_feed_rate_mode { self.gm.inverse_feed_rate } else { self.gm.feed_rate };
        if rate <= 0.0 {
            return Err(Error::ZeroLengthMove);
        }
        Ok(())
    }

    /*
     * Motion
     */

    /// G0
    pub fn straight_traverse(&mut self, words: &AxisWords) -> MotionResult {
        self.gm.motion_mode = MotionMode::StraightTraverse;
        self.set_target(words);
        let minutes = self.move_time(true);
        let result = self.line(minutes);
        self.commit(result)
    }

    /// G1
    pub fn straight_feed(&mut self, words: &AxisWords) -> MotionResult {
        self.gm.motion_mode = MotionMode::StraightFeed;
        self.check_feed_rate()?;
        self.set_target(words);
        let minutes = self.move_time(false);
        let result = self.line(minutes);
        self.commit(result)
    }

    fn line(&mut self, minutes: f64) -> MotionResult {
        if self.config.accel_enabled {
            self.mp.aline(&self.config, &self.gm.target, minutes)
        } else {
            self.mp.line(&self.config, &self.gm.target, minutes)
        }
    }

    // The position follows the target only if the planner took the move. A
    // move that failed half way leaves the planner where its last queued
    // segment ends.
    fn commit(&mut self, result: MotionResult) -> MotionResult {
        match result {
            Ok(Status::Ok | Status::Eagain) => self.gm.position = self.gm.target,
            Err(_) => self.gm.position = self.mp.last_target(),
            Ok(_) => {}
        }
        result
    }

    /// G2 and G3. With a radius (R word) the center is worked out from the
    /// chord, otherwise it's given by the I, J, K offsets.
    pub fn arc_feed(
        &mut self,
        words: &AxisWords,
        offsets: &ArcOffsets,
        radius: Option<f64>,
        motion_mode: MotionMode,
    ) -> MotionResult {
        let clockwise = match motion_mode {
            MotionMode::CwArc => true,
            MotionMode::CcwArc => false,
            _ => return Err(Error::ArcSpecError),
        };
        self.gm.motion_mode = motion_mode;
        self.check_feed_rate()?;
        self.set_target(words);

        for (o, word) in self.gm.offset.iter_mut().zip(offsets) {
            *o = word.unwrap_or(0.0);
        }
        if self.gm.inches_mode {
            for o in self.gm.offset.iter_mut() {
                *o = inches_to_mm(*o);
            }
        }
        self.gm.radius = radius.map(|r| self.to_mm(r)).unwrap_or(0.0);

        let result = self.compute_arc(clockwise);
        self.commit(result)
    }

    fn compute_arc(&mut self, clockwise: bool) -> MotionResult {
        let axes = self.gm.plane.axes();
        let [a0, a1, linear] = axes;
        let x = self.gm.target[a0.index()] - self.gm.position[a0.index()];
        let y = self.gm.target[a1.index()] - self.gm.position[a1.index()];

        let (i, j) = if self.gm.radius != 0.0 {
            compute_radius_arc(x, y, self.gm.radius, clockwise)?
        } else {
            (self.gm.offset[a0.index()], self.gm.offset[a1.index()])
        };
        self.gm.offset[a0.index()] = i;
        self.gm.offset[a1.index()] = j;

        let theta_start = theta(-i, -j);
        let theta_end = theta(x - i, y - j);
        if theta_start.is_nan() || theta_end.is_nan() {
            return Err(Error::ArcSpecError);
        }

        let full_circle = x.hypot(y) < self.config.min_segment_length;
        let angular_travel = if full_circle {
            if clockwise { 2.0 * PI } else { -2.0 * PI }
        } else {
            let theta_end = if theta_end < theta_start { theta_end + 2.0 * PI } else { theta_end };
            let travel = theta_end - theta_start;
            if clockwise { travel } else { travel - 2.0 * PI }
        };

        let radius = i.hypot(j);
        let linear_travel = self.gm.target[linear.index()] - self.gm.position[linear.index()];
        let length = (angular_travel * radius).hypot(linear_travel.abs());

        let mut minutes = if self.gm.inverse_feed_rate_mode {
            1.0 / self.gm.inverse_feed_rate
        } else {
            length / self.gm.feed_rate
        };
        // In the plane, the tangential velocity is bounded by the slower of
        // the two axes. The linear axis and the axes out of the plane move
        // along, at their own limits.
        let plane_rate_max = self.config.axis(a0).feed_rate_max.min(self.config.axis(a1).feed_rate_max);
        minutes = minutes.max((angular_travel * radius).abs() / plane_rate_max);
        for axis in Axis::ALL.into_iter().filter(|a| *a != a0 && *a != a1) {
            let d = self.gm.target[axis.index()] - self.gm.position[axis.index()];
            minutes = minutes.max(d.abs() / self.config.axis(axis).feed_rate_max);
        }

        let arc = ArcMove {
            target: self.gm.target,
            theta: theta_start,
            radius,
            angular_travel,
            linear_travel,
            axes,
            minutes,
        };
        self.mp.arc(&self.config, &arc)
    }

    /// G4
    pub fn dwell(&mut self, seconds: f64) -> MotionResult {
        self.gm.dwell_time = seconds;
        self.mp.dwell(&self.config, seconds)
    }

    /// M0. Motors stop when they get there.
    pub fn program_stop(&mut self) -> MotionResult {
        self.mp.queued_stop(&self.config)
    }

    pub fn program_resume(&mut self) -> MotionResult {
        self.mp.queued_start(&self.config)
    }

    /// M2. The modal state is reset once the motors get there.
    pub fn program_end(&mut self) -> MotionResult {
        self.mp.queued_end(&self.config)
    }

    pub fn move_dispatcher(&mut self) -> MotionResult {
        let result = self.mp.move_dispatcher(&self.config);
        if result.is_err() {
            self.gm.position = self.mp.last_target();
            self.gm.target = self.gm.position;
        }
        result
    }

    pub fn check_for_write_buffers(&self, n: usize) -> bool {
        self.mp.check_for_write_buffers(n)
    }

    /// Changes the microstepping of an axis, which changes its steps per
    /// unit. Waits for the planner to run dry, the position is then
    /// converted to the new scale.
    pub fn set_microsteps(&mut self, axis: Axis, microsteps: Microsteps) -> MotionResult {
        if self.mp.is_busy() {
            return Ok(Status::Eagain);
        }
        self.config.axis_mut(axis).microsteps = microsteps;
        let position = self.mp.last_target();
        self.mp.set_position(&self.config, &position)?;
        debug!("{} at {} microsteps, {} steps/unit", axis.letter(), microsteps.ratio(), self.config.steps_per_unit(axis));
        Ok(Status::Ok)
    }

    /// Drops everything planned, keeping the accepted position.
    pub fn abort(&mut self) {
        self.mp.abort();
        self.reset_modal_state();
    }
}

/// Angle of the (x, y) vector, measured clockwise from +y.
fn theta(x: f64, y: f64) -> f64 {
    x.atan2(y)
}

fn length_to_degrees(length: f64, radius: f64) -> f64 {
    length * 360.0 / (2.0 * PI * radius)
}

/// Center offsets of an arc of `radius` through the origin and (x, y).
///
/// The center sits on the perpendicular bisector of the chord, at a distance
/// h_x2_div_d * |chord| / 2 from its midpoint. Of the two circles of that
/// radius, the sign of h picks the one that goes the right way, and a
/// negative radius picks the longer arc.
fn compute_radius_arc(x: f64, y: f64, radius: f64, clockwise: bool) -> MotionResult<(f64, f64)> {
    let mut h_x2_div_d = -(4.0 * radius * radius - x * x - y * y).sqrt() / x.hypot(y);
    if h_x2_div_d.is_nan() {
        return Err(Error::FloatingPointError);
    }
    if !clockwise {
        h_x2_div_d = -h_x2_div_d;
    }
    if radius < 0.0 {
        h_x2_div_d = -h_x2_div_d;
    }
    Ok(((x - y * h_x2_div_d) / 2.0, (y + x * h_x2_div_d) / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AxisConfig;
    use crate::motion::motor_queue::{Move, MotorQueue, QueueReader};

    fn config() -> MachineConfig {
        let mut cfg = MachineConfig::default();
        let axis = AxisConfig::linear()
            .with_drive(1.8, Microsteps::Eighth, 1.6)
            .with_rates(3000.0, 3000.0);
        cfg.axes = [axis, axis, axis, AxisConfig::rotary()];
        cfg
    }

    fn cm_with<const N: usize>(cfg: MachineConfig) -> (CanonicalMachine<'static, N>, QueueReader<'static, N>) {
        let (tx, rx) = Box::leak(Box::new(MotorQueue::<N>::new())).split();
        (CanonicalMachine::new(cfg, tx).unwrap(), rx)
    }

    fn cm() -> (CanonicalMachine<'static, 64>, QueueReader<'static, 64>) {
        cm_with(config())
    }

    fn xy(x: f64, y: f64) -> AxisWords {
        [Some(x), Some(y), None, None]
    }

    fn drain<const N: usize>(cm: &mut CanonicalMachine<N>, rx: &mut QueueReader<N>) -> [i64; AXES] {
        let mut totals = [0; AXES];
        for _ in 0..100_000 {
            while let Some(mv) = rx.dequeue() {
                if let Move::Line { axes, .. } = mv {
                    for (t, a) in totals.iter_mut().zip(axes) {
                        *t += if a.direction.is_forward() { a.steps as i64 } else { -(a.steps as i64) };
                    }
                }
            }
            cm.move_dispatcher().unwrap();
            if !cm.planner().is_busy() {
                break;
            }
        }
        totals
    }

    #[test]
    fn planes_permute_the_axes() {
        assert_eq!(Plane::XY.axes(), [Axis::X, Axis::Y, Axis::Z]);
        assert_eq!(Plane::XZ.axes(), [Axis::X, Axis::Z, Axis::Y]);
        assert_eq!(Plane::YZ.axes(), [Axis::Y, Axis::Z, Axis::X]);
    }

    #[test]
    fn radius_arc_center() {
        // Quarter circle from (0,0) to (10,10), clockwise around (10,0).
        let (i, j) = compute_radius_arc(10.0, 10.0, 10.0, true).unwrap();
        assert!((i - 10.0).abs() < 1e-9 && j.abs() < 1e-9);

        // Counter clockwise goes around (0,10).
        let (i, j) = compute_radius_arc(10.0, 10.0, 10.0, false).unwrap();
        assert!(i.abs() < 1e-9 && (j - 10.0).abs() < 1e-9);

        // A negative radius takes the long way.
        let (i, j) = compute_radius_arc(10.0, 10.0, -10.0, true).unwrap();
        assert!(i.abs() < 1e-9 && (j - 10.0).abs() < 1e-9);
    }

    #[test]
    fn radius_shorter_than_half_the_chord() {
        assert_eq!(compute_radius_arc(10.0, 0.0, 4.0, true), Err(Error::FloatingPointError));

        let (mut cm, _rx) = cm();
        cm.set_feed_rate(600.0).unwrap();
        let result = cm.arc_feed(&xy(10.0, 0.0), &[None; 3], Some(4.0), MotionMode::CwArc);
        assert_eq!(result, Err(Error::FloatingPointError));
        assert_eq!(cm.gm.position, [0.0; AXES]);
    }

    #[test]
    fn quarter_arc_by_radius() {
        let (mut cm, mut rx) = cm();
        cm.set_feed_rate(600.0).unwrap();
        let status = cm.arc_feed(&xy(10.0, 10.0), &[None; 3], Some(10.0), MotionMode::CwArc).unwrap();
        assert!(status == Status::Ok || status == Status::Eagain);
        assert_eq!(cm.gm.position, [10.0, 10.0, 0.0, 0.0]);
        assert!((cm.gm.offset[0] - 10.0).abs() < 1e-9 && cm.gm.offset[1].abs() < 1e-9);

        assert_eq!(drain(&mut cm, &mut rx), [10_000, 10_000, 0, 0]);
    }

    #[test]
    fn center_format_full_circle() {
        let (mut cm, mut rx) = cm();
        cm.set_feed_rate(1200.0).unwrap();
        cm.arc_feed(&xy(0.0, 0.0), &[Some(5.0), Some(0.0), None], None, MotionMode::CcwArc).unwrap();
        assert_eq!(cm.gm.position, [0.0; AXES]);
        assert_eq!(drain(&mut cm, &mut rx), [0; AXES]);
    }

    #[test]
    fn arcs_need_a_feed_rate() {
        let (mut cm, _rx) = cm();
        let result = cm.arc_feed(&xy(1.0, 1.0), &[Some(1.0), None, None], None, MotionMode::CwArc);
        assert_eq!(result, Err(Error::ZeroLengthMove));
        assert_eq!(cm.straight_feed(&xy(1.0, 1.0)), Err(Error::ZeroLengthMove));
        assert_eq!(
            cm.arc_feed(&xy(1.0, 1.0), &[None; 3], Some(1.0), MotionMode::StraightFeed),
            Err(Error::ArcSpecError)
        );
    }

    #[test]
    fn inches_and_incremental_targets() {
        let (mut cm, _rx) = cm();
        cm.use_length_units(true);
        cm.set_target(&[Some(1.0), None, Some(-0.5), Some(90.0)]);
        assert_eq!(cm.gm.target, [25.4, 0.0, -12.7, 90.0]);

        cm.gm.position = cm.gm.target;
        cm.set_distance_mode(false);
        cm.set_target(&[Some(1.0), Some(1.0), None, None]);
        assert_eq!(cm.gm.target, [50.8, 25.4, -12.7, 90.0]);

        // G53 is for one block only.
        cm.set_absolute_override(true);
        cm.set_target(&[Some(1.0), None, None, None]);
        assert_eq!(cm.gm.target[0], 25.4);
        cm.set_target(&[Some(1.0), None, None, None]);
        assert_eq!(cm.gm.target[0], 50.8);
    }

    #[test]
    fn units_round_trip_through_the_model() {
        let (mut cm, _rx) = cm();
        cm.use_length_units(true);
        for value in [1.0, 0.1, 3.937, 12.345_678_9] {
            cm.set_target(&[Some(value), None, None, None]);
            cm.gm.position = cm.gm.target;
            let back = cm.get_position(Axis::X);
            assert!((back - value).abs() <= f64::EPSILON * value);
        }
    }

    #[test]
    fn axis_modes() {
        let mut cfg = config();
        cfg.axis_mut(Axis::Z).mode = AxisMode::Disabled;
        cfg.axis_mut(Axis::A).mode = AxisMode::Radius;
        cfg.axis_mut(Axis::A).radius = 10.0;
        let (mut cm, _rx) = cm_with::<8>(cfg);

        cm.set_target(&[None, None, Some(5.0), Some(2.0 * PI * 10.0)]);
        assert_eq!(cm.gm.target[2], 0.0);
        assert!((cm.gm.target[3] - 360.0).abs() < 1e-9);

        let mut cfg = config();
        cfg.axis_mut(Axis::A).mode = AxisMode::SlaveXY;
        cfg.axis_mut(Axis::A).radius = 5.0 / PI;
        let (mut cm, _rx) = cm_with::<8>(cfg);
        cm.set_target(&[Some(3.0), Some(4.0), Some(100.0), Some(1.0)]);
        // 5mm of XY path on a 10mm circumference is half a turn.
        assert!((cm.gm.target[3] - 180.0).abs() < 1e-9);
    }

    #[test]
    fn slowest_axis_sets_the_move_time() {
        let (mut cm, _rx) = cm();
        cm.config.axis_mut(Axis::Y).feed_rate_max = 100.0;
        cm.set_feed_rate(600.0).unwrap();
        cm.set_target(&xy(6.0, 2.0));
        // 6.32mm at 600mm/min is 0.0105 min, but Y needs 0.02 min.
        assert!((cm.move_time(false) - 0.02).abs() < 1e-12);

        cm.set_inverse_feed_rate_mode(true);
        cm.set_feed_rate(2.0).unwrap();
        assert!((cm.move_time(false) - 0.5).abs() < 1e-12);

        // Traverses go at the seek rates.
        cm.set_target(&xy(3000.0, 0.0));
        assert!((cm.move_time(true) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn failed_moves_keep_the_position() {
        let (mut cm, _rx) = cm_with::<4>(config());
        cm.set_feed_rate(600.0).unwrap();
        assert_eq!(cm.straight_feed(&xy(0.0001, 0.0)), Err(Error::ZeroLengthMove));
        assert_eq!(cm.gm.position, [0.0; AXES]);

        // A 1mm line doesn't fit in 3 records, it stays accepted.
        assert_eq!(cm.straight_feed(&xy(1.0, 0.0)), Ok(Status::Eagain));
        assert_eq!(cm.gm.position[0], 1.0);
        assert!(!cm.check_for_write_buffers(1));

        assert_eq!(cm.straight_feed(&xy(2.0, 0.0)), Err(Error::MotionControlError));
        assert_eq!(cm.gm.position[0], 1.0);
    }

    #[test]
    fn origin_offsets_rewrite_the_position() {
        let (mut cm, mut rx) = cm();
        cm.set_feed_rate(600.0).unwrap();
        cm.straight_feed(&xy(1.0, 2.0)).unwrap();
        drain(&mut cm, &mut rx);

        assert_eq!(cm.set_origin_offsets(&[Some(0.0), None, None, None]), Ok(Status::Ok));
        assert_eq!(cm.gm.position, [0.0, 2.0, 0.0, 0.0]);
        assert_eq!(cm.planner().position(), [Steps(0), Steps(2000), Steps(0), Steps(0)]);
    }

    #[test]
    fn save_and_restore_keep_the_position() {
        let (mut cm, _rx) = cm();
        cm.save_gcode_model();
        cm.use_length_units(true);
        cm.select_plane(Plane::YZ);
        cm.gm.position = [1.0, 2.0, 3.0, 4.0];
        cm.restore_gcode_model();
        assert!(!cm.gm.inches_mode);
        assert_eq!(cm.gm.plane, Plane::XY);
        assert_eq!(cm.gm.position, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn reset_restores_program_defaults() {
        let (mut cm, _rx) = cm();
        cm.select_plane(Plane::XZ);
        cm.set_distance_mode(false);
        cm.set_inverse_feed_rate_mode(true);
        cm.set_spindle_mode(SpindleMode::Cw);
        cm.gm.motion_mode = MotionMode::CcwArc;
        cm.reset_modal_state();
        assert_eq!(cm.gm.plane, Plane::XY);
        assert!(cm.gm.absolute_mode && !cm.gm.inverse_feed_rate_mode);
        assert_eq!(cm.gm.motion_mode, MotionMode::StraightFeed);
        assert_eq!(cm.gm.spindle_mode, SpindleMode::Off);
    }

    #[test]
    fn arc_time_respects_the_plane_axes_limits() {
        let mut cfg = config();
        cfg.axis_mut(Axis::Y).feed_rate_max = 100.0;
        let (mut cm, mut rx) = cm_with::<64>(cfg);
        cm.set_feed_rate(600.0).unwrap();
        cm.arc_feed(&xy(10.0, 10.0), &[None; 3], Some(10.0), MotionMode::CwArc).unwrap();

        let mut us = 0u64;
        for _ in 0..100_000 {
            while let Some(mv) = rx.dequeue() {
                if let Move::Line { microseconds, .. } = mv {
                    us += microseconds as u64;
                }
            }
            cm.move_dispatcher().unwrap();
            if !cm.planner().is_busy() {
                break;
            }
        }
        // A quarter of a 10mm circle at Y's 100mm/min, not at F600.
        let expected = 10.0 * PI / 2.0 / 100.0 * 60_000_000.0;
        assert!((us as f64 - expected).abs() < 1000.0, "{}us", us);
    }

    #[test]
    fn too_fast_feeds_keep_the_position() {
        let mut cfg = config();
        for axis in cfg.axes.iter_mut() {
            axis.feed_rate_max = 1e6;
        }
        let (mut cm, mut rx) = cm_with::<64>(cfg);

        // 100000mm/min at 1000 steps/mm is more than the step timers can do.
        cm.set_feed_rate(100_000.0).unwrap();
        assert_eq!(cm.straight_feed(&xy(1.0, 0.0)), Err(Error::MaxFeedRateExceeded));
        assert_eq!(cm.gm.position, [0.0; AXES]);
        assert_eq!(cm.planner().position(), [Steps::ZERO; AXES]);

        // The same target at a sane rate is a real move.
        cm.set_feed_rate(600.0).unwrap();
        cm.straight_feed(&xy(1.0, 0.0)).unwrap();
        assert_eq!(drain(&mut cm, &mut rx), [1000, 0, 0, 0]);
        cm.straight_feed(&xy(2.0, 0.0)).unwrap();
        assert_eq!(drain(&mut cm, &mut rx), [1000, 0, 0, 0]);
        assert_eq!(cm.gm.position[0], 2.0);
        assert_eq!(cm.planner().position()[0], Steps(2000));
    }

    #[test]
    fn microsteps_rescale_the_position() {
        let (mut cm, mut rx) = cm();
        cm.set_feed_rate(600.0).unwrap();
        cm.straight_feed(&xy(1.0, 0.0)).unwrap();
        // Steps in flight are at the old scale.
        assert_eq!(cm.set_microsteps(Axis::X, Microsteps::Half), Ok(Status::Eagain));
        assert_eq!(drain(&mut cm, &mut rx), [1000, 0, 0, 0]);

        assert_eq!(cm.set_microsteps(Axis::X, Microsteps::Half), Ok(Status::Ok));
        assert_eq!(cm.config().axis(Axis::X).microsteps, Microsteps::Half);
        assert_eq!(cm.planner().position()[0], Steps(250));
        assert_eq!(cm.gm.position[0], 1.0);

        cm.straight_feed(&xy(2.0, 0.0)).unwrap();
        assert_eq!(drain(&mut cm, &mut rx), [250, 0, 0, 0]);
    }
}
