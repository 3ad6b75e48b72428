// SPDX-License-Identifier: GPL-3.0-or-later

// The Machine is the main loop side of the motion core: the canonical machine
// and, through it, the planner and the writing end of the motor queue.
//
// The stepper executor is on the other side. It lives in a MachineIsr, inside
// a SharedWithInterrupt, with the reading end of the queue. The step timer
// handlers call on_axis_timer() and on_dwell_timer(), the software interrupt
// calls on_software_interrupt(). The main loop only takes the lock for the
// short stepper commands (start, stop, end), and reads the state of the
// executor from its atomics. Planning runs with interrupts enabled.
//
// Boot goes like this:
//   static STORAGE: Forever<MachineStorage> = ...;
//   let (queue, isr) = STORAGE.put(MachineStorage::new()).split(hal, &config);
//   let isr = ISR.put(isr);
//   let machine = Machine::new(isr, queue, config)?;

mod homing;

pub use homing::HomingPhase;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::MachineConfig;
use crate::consts::{motor_queue::MOTOR_QUEUE_SIZE, planner::MP_BUFFERS_NEEDED};
use crate::dispatch;
use crate::drivers::hal::Hal;
use crate::motion::canonical_machine::CanonicalMachine;
use crate::motion::motor_queue::{MotorQueue, QueueWriter};
use crate::motion::stepper::{ExecutorState, LoaderEvent, Stepper, StepperStatus};
use crate::motion::units::{Axis, Microsteps};
use crate::status::{MotionResult, Status};
use crate::util::SharedWithInterrupt;

use homing::HomingCycle;

/// The source of G-code blocks, usually the parser reading the serial port.
/// It is only called when the planner can take a new move.
pub trait BlockReader<const N: usize> {
    /// Reads one block and feeds it to the canonical machine. Returns `Eof`
    /// or `Quit` when the input is done.
    fn read_block(&mut self, cm: &mut CanonicalMachine<'_, N>) -> MotionResult;
}

/// Flags raised by interrupts and picked up by the main loop.
pub struct Signals {
    stepper: StepperStatus,
    limit_tripped: AtomicBool,
    stop_requested: AtomicBool,
    start_requested: AtomicBool,
    end_requested: AtomicBool,
    // The loader went through an End marker.
    program_end: AtomicBool,
}

impl Signals {
    pub const fn new() -> Self {
        Self {
            stepper: StepperStatus::new(),
            limit_tripped: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            start_requested: AtomicBool::new(false),
            end_requested: AtomicBool::new(false),
            program_end: AtomicBool::new(false),
        }
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the two sides share. It must outlive both, on the board it's
/// a static.
pub struct MachineStorage<const N: usize = MOTOR_QUEUE_SIZE> {
    queue: MotorQueue<N>,
    signals: Signals,
}

impl<const N: usize> MachineStorage<N> {
    pub const fn new() -> Self {
        Self { queue: MotorQueue::new(), signals: Signals::new() }
    }

    /// Hands the writing end of the queue to the main loop, and the stepper
    /// with the reading end to the interrupt handlers.
    pub fn split<H: Hal>(&mut self, hal: H, config: &MachineConfig) -> (QueueWriter<'_, N>, MachineIsr<'_, H, N>) {
        let (writer, reader) = self.queue.split();
        let signals = &self.signals;
        let stepper = Stepper::new(hal, reader, &signals.stepper, config);
        (writer, MachineIsr { stepper: SharedWithInterrupt::new(stepper), signals })
    }
}

impl<const N: usize> Default for MachineStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The interrupt side of the machine.
pub struct MachineIsr<'a, H: Hal, const N: usize = MOTOR_QUEUE_SIZE> {
    stepper: SharedWithInterrupt<Stepper<'a, H, N>>,
    signals: &'a Signals,
}

impl<'a, H: Hal, const N: usize> MachineIsr<'a, H, N> {
    /*
     * Interrupt handlers
     */

    /// Step timers run at the highest priority.
    pub fn on_axis_timer(&self, axis: Axis) {
        unsafe { self.stepper.lock_from_interrupt(|st| st.on_axis_timer(axis)) }
    }

    pub fn on_dwell_timer(&self) {
        unsafe { self.stepper.lock_from_interrupt(|st| st.on_dwell_timer()) }
    }

    /// The loader runs below the step timers and masks them while it loads.
    pub fn on_software_interrupt(&self) {
        if self.stepper.lock(|st| st.load_next_move()) == Some(LoaderEvent::ProgramEnd) {
            self.signals.program_end.store(true, Ordering::Release);
        }
    }

    /// Edge interrupt of the limit switches. The motors freeze right away,
    /// the main loop sorts out the rest.
    pub fn on_limit_switch(&self) {
        self.stepper.lock(|st| st.stop());
        self.signals.limit_tripped.store(true, Ordering::Release);
    }

    /*
     * Async signals, raised from the serial interrupt (^C and friends)
     */

    pub fn request_stop(&self) {
        self.signals.stop_requested.store(true, Ordering::Release);
    }

    pub fn request_start(&self) {
        self.signals.start_requested.store(true, Ordering::Release);
    }

    pub fn request_end(&self) {
        self.signals.end_requested.store(true, Ordering::Release);
    }

    /*
     * Main loop pass-throughs
     */

    pub fn status(&self) -> &'a StepperStatus {
        &self.signals.stepper
    }

    pub fn with_stepper<R>(&self, f: impl FnOnce(&mut Stepper<'a, H, N>) -> R) -> R {
        self.stepper.lock(f)
    }
}

pub struct Machine<'a, H: Hal, const N: usize = MOTOR_QUEUE_SIZE> {
    cm: CanonicalMachine<'a, N>,
    isr: &'a MachineIsr<'a, H, N>,
    homing: Option<HomingCycle>,
}

impl<'a, H: Hal, const N: usize> Machine<'a, H, N> {
    pub fn new(isr: &'a MachineIsr<'a, H, N>, queue: QueueWriter<'a, N>, config: MachineConfig) -> MotionResult<Self> {
        let cm = CanonicalMachine::new(config, queue)?;
        Ok(Self { cm, isr, homing: None })
    }

    pub fn isr(&self) -> &'a MachineIsr<'a, H, N> {
        self.isr
    }

    pub fn cm(&self) -> &CanonicalMachine<'a, N> {
        &self.cm
    }

    pub fn cm_mut(&mut self) -> &mut CanonicalMachine<'a, N> {
        &mut self.cm
    }

    pub fn state(&self) -> ExecutorState {
        self.isr.status().state()
    }

    /// Whether the motors still have something to do. The positions of the
    /// canonical machine run ahead of the motors, this is what tells when
    /// they got there.
    pub fn is_busy(&self) -> bool {
        self.isr.status().is_busy() || self.cm.planner().is_busy()
    }

    /// Changes the microstepping of an axis. Its steps per unit change with
    /// it, so it waits for the motors to stop.
    pub fn set_microsteps(&mut self, axis: Axis, microsteps: u8) -> MotionResult {
        let microsteps = Microsteps::new(microsteps)?;
        if self.is_busy() {
            return Ok(Status::Eagain);
        }
        dispatch!(self.cm.set_microsteps(axis, microsteps));
        self.isr.with_stepper(|st| st.set_microsteps(axis, microsteps.ratio()))?;
        Ok(Status::Ok)
    }

    /// Takes effect at the next move.
    pub fn set_polarity(&mut self, axis: Axis, polarity: bool) {
        self.isr.with_stepper(|st| st.set_polarity(axis, polarity));
    }

    /// Freezes the motors mid-move. Everything planned stays, async_start()
    /// picks up where we left.
    pub fn async_stop(&mut self) {
        self.isr.with_stepper(|st| st.stop());
        info!("Stopped");
    }

    pub fn async_start(&mut self) {
        self.isr.with_stepper(|st| st.start());
        info!("Resumed");
    }

    /// Kills the program: the motors halt, the queue and the planner are
    /// flushed and the modal state goes back to its defaults.
    pub fn async_end(&mut self) {
        self.halt_motors();
        self.cm.abort();
        self.homing = None;
        self.isr.signals.program_end.store(false, Ordering::Release);
        info!("Program ended");
    }

    // Stops the motors on the spot and drops everything queued or planned.
    // The accepted position stays.
    fn halt_motors(&mut self) {
        self.isr.with_stepper(|st| st.end());
        self.cm.planner_mut().abort();
    }

    /*
     * Controller
     */

    /// One turn of the super-loop. Each stage runs only if the ones before
    /// it are not blocked, and the reader only if the planner can take a
    /// move.
    pub fn run_once<R: BlockReader<N>>(&mut self, reader: &mut R) -> MotionResult {
        match self.dispatch(reader) {
            Err(e) if e.is_silent() => Ok(Status::Ok),
            Err(e) => {
                warn!("{}", e);
                Err(e)
            }
            ok => ok,
        }
    }

    fn dispatch<R: BlockReader<N>>(&mut self, reader: &mut R) -> MotionResult {
        dispatch!(self.limit_switch_handler());
        dispatch!(self.async_signal_handlers());
        dispatch!(self.execute_move());
        dispatch!(self.cm.move_dispatcher());
        dispatch!(self.run_homing_cycle());

        if !self.cm.check_for_write_buffers(MP_BUFFERS_NEEDED) {
            return Ok(Status::Eagain);
        }
        reader.read_block(&mut self.cm)
    }

    fn limit_switch_handler(&mut self) -> MotionResult {
        if !self.isr.signals.limit_tripped.swap(false, Ordering::AcqRel) {
            return Ok(Status::Noop);
        }
        if self.homing_limit_hit()? {
            return Ok(Status::Ok);
        }
        warn!("Limit switch hit");
        self.async_end();
        Ok(Status::Ok)
    }

    fn async_signal_handlers(&mut self) -> MotionResult {
        let signals = self.isr.signals;
        if signals.end_requested.swap(false, Ordering::AcqRel) {
            self.async_end();
        }
        if signals.stop_requested.swap(false, Ordering::AcqRel) {
            self.async_stop();
        }
        if signals.start_requested.swap(false, Ordering::AcqRel) {
            self.async_start();
        }
        Ok(Status::Ok)
    }

    fn execute_move(&mut self) -> MotionResult {
        let signals = self.isr.signals;
        if self.isr.status().state() == ExecutorState::Idle
            && self.isr.with_stepper(|st| st.execute_move()) == Some(LoaderEvent::ProgramEnd)
        {
            signals.program_end.store(true, Ordering::Release);
        }
        if signals.program_end.swap(false, Ordering::AcqRel) {
            self.cm.reset_modal_state();
            info!("Program end");
        }
        Ok(Status::Ok)
    }
}
