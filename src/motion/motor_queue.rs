// SPDX-License-Identifier: GPL-3.0-or-later

// The motor queue decouples the planner, running in the main loop, from the
// stepper loader, running in the software interrupt. It's a single producer,
// single consumer queue: the heapless queue keeps its indices in atomics and
// publishes a record before advancing the index that makes it visible. Each
// side only ever holds its own half, so neither needs a critical section.

use heapless::spsc::{Consumer, Producer, Queue};

use crate::consts::{motor_queue::MOTOR_QUEUE_SIZE, stepper::*};
use crate::status::{Error, MotionResult};

use super::units::prelude::*;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Prescaler {
    Div1,
    Div2,
    Div4,
    Div8,
    Div64,
    Div256,
    Div1024,
}

impl Prescaler {
    pub const ALL: [Prescaler; 7] = [
        Prescaler::Div1, Prescaler::Div2, Prescaler::Div4, Prescaler::Div8,
        Prescaler::Div64, Prescaler::Div256, Prescaler::Div1024,
    ];

    pub fn ratio(self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div2 => 2,
            Prescaler::Div4 => 4,
            Prescaler::Div8 => 8,
            Prescaler::Div64 => 64,
            Prescaler::Div256 => 256,
            Prescaler::Div1024 => 1024,
        }
    }
}

/// How a step timer must be programmed so it overflows once per step.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StepTiming {
    pub prescaler: Prescaler,
    pub period: u16,
    /// Number of timer overflows per step.
    pub postscale: u16,
}

impl StepTiming {
    /// Picks the finest prescaler whose period fits the 16 bit timer, and only
    /// then falls back to the postscale counter.
    pub fn for_interval(ticks_per_step: u64) -> MotionResult<Self> {
        if ticks_per_step < MIN_STEP_PERIOD_TICKS {
            return Err(Error::MaxFeedRateExceeded);
        }

        for prescaler in Prescaler::ALL {
            let period = div_round(ticks_per_step, prescaler.ratio() as u64);
            if period <= u16::MAX as u64 {
                return Ok(Self { prescaler, period: period as u16, postscale: 1 });
            }
        }

        let prescaler = Prescaler::Div1024;
        let ticks_per_overflow = prescaler.ratio() as u64 * u16::MAX as u64;
        let postscale = (ticks_per_step + ticks_per_overflow - 1) / ticks_per_overflow;
        if postscale > u16::MAX as u64 {
            return Err(Error::ParameterOverRange);
        }
        let period = div_round(ticks_per_step, prescaler.ratio() as u64 * postscale);
        Ok(Self { prescaler, period: period as u16, postscale: postscale as u16 })
    }

    /// Timer clock ticks between two steps.
    pub fn ticks_per_step(&self) -> u64 {
        self.period as u64 * self.prescaler.ratio() as u64 * self.postscale as u64
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AxisStep {
    pub direction: Direction,
    pub steps: u32,
    pub timing: StepTiming,
}

impl AxisStep {
    pub const IDLE: Self = Self {
        direction: Direction::Forward,
        steps: 0,
        timing: StepTiming { prescaler: Prescaler::Div1, period: 0, postscale: 1 },
    };

    pub fn is_active(&self) -> bool {
        self.steps != 0
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Marker {
    Start,
    Stop,
    End,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Move {
    Line { axes: [AxisStep; AXES], microseconds: u32 },
    /// A pause that emits no pulse.
    Dwell { microseconds: u32 },
    Start,
    Stop,
    End,
}

impl From<Marker> for Move {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Start => Move::Start,
            Marker::Stop => Move::Stop,
            Marker::End => Move::End,
        }
    }
}

/// Storage of the queue. It's split once at boot: the planner gets the
/// writer, the stepper the reader.
pub struct MotorQueue<const N: usize = MOTOR_QUEUE_SIZE> {
    queue: Queue<Move, N>,
}

impl<const N: usize> MotorQueue<N> {
    pub const fn new() -> Self {
        Self { queue: Queue::new() }
    }

    pub fn split(&mut self) -> (QueueWriter<'_, N>, QueueReader<'_, N>) {
        let (producer, consumer) = self.queue.split();
        (QueueWriter { producer }, QueueReader { consumer })
    }
}

impl<const N: usize> Default for MotorQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The planner side of the queue, used from the main loop only.
pub struct QueueWriter<'q, const N: usize = MOTOR_QUEUE_SIZE> {
    producer: Producer<'q, Move, N>,
}

impl<'q, const N: usize> QueueWriter<'q, N> {
    pub fn capacity(&self) -> usize {
        self.producer.capacity()
    }

    pub fn len(&self) -> usize {
        self.producer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_room(&self, n: usize) -> bool {
        self.len() + n <= self.capacity()
    }

    /// Queues a constant rate move. `steps` is the signed step delta of each
    /// axis, all axes run for `microseconds`.
    pub fn queue_line(&mut self, steps: StepVector, microseconds: u32) -> MotionResult<()> {
        if !self.has_room(1) {
            return Err(Error::BufferFullFatal);
        }
        if steps.iter().all(|s| s.0 == 0) {
            return Err(Error::ZeroLengthMove);
        }

        let total_ticks = microseconds as u64 * TICKS_PER_MICROSECOND;
        let mut axes = [AxisStep::IDLE; AXES];
        for (axis, delta) in axes.iter_mut().zip(steps) {
            if delta.0 == 0 {
                continue;
            }
            let count = delta.count();
            *axis = AxisStep {
                direction: delta.direction(),
                steps: count,
                timing: StepTiming::for_interval(div_round(total_ticks, count as u64))?,
            };
        }

        self.push(Move::Line { axes, microseconds })
    }

    /// A dwell of 0us would never get its timer interrupt.
    pub fn queue_dwell(&mut self, microseconds: u32) -> MotionResult<()> {
        if microseconds == 0 {
            return Err(Error::ParameterOverRange);
        }
        self.push(Move::Dwell { microseconds })
    }

    pub fn queue_marker(&mut self, marker: Marker) -> MotionResult<()> {
        self.push(marker.into())
    }

    fn push(&mut self, mv: Move) -> MotionResult<()> {
        self.producer.enqueue(mv).map_err(|_| Error::BufferFullFatal)
    }
}

/// The stepper side of the queue, used from the loader interrupt and from
/// main with the stepper locked.
pub struct QueueReader<'q, const N: usize = MOTOR_QUEUE_SIZE> {
    consumer: Consumer<'q, Move, N>,
}

impl<'q, const N: usize> QueueReader<'q, N> {
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.consumer.ready()
    }

    pub fn dequeue(&mut self) -> Option<Move> {
        self.consumer.dequeue()
    }

    pub fn flush(&mut self) {
        while self.consumer.dequeue().is_some() {}
    }
}

fn div_round(n: u64, d: u64) -> u64 {
    (n + d / 2) / d
}
