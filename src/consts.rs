// SPDX-License-Identifier: GPL-3.0-or-later

pub mod system {
    pub const CLOCK_SPEED_MHZ: u32 = 32;
}

pub mod stepper {
    // The step timers count at the system clock, before the prescaler.
    pub const TIMER_CLOCK_HZ: u32 = super::system::CLOCK_SPEED_MHZ * 1_000_000;
    pub const TICKS_PER_MICROSECOND: u64 = super::system::CLOCK_SPEED_MHZ as u64;

    // Below 4us between two steps, the overflow interrupts of the 4 axes would
    // starve the loader. That's 250k steps/s per axis.
    pub const MIN_STEP_PERIOD_TICKS: u64 = 4 * TICKS_PER_MICROSECOND;

    // The drivers need the STEP pin held high for at least 1us.
    pub const STEP_PULSE_WIDTH_NS: u32 = 1_000;
}

pub mod motor_queue {
    // One slot is always kept free to tell full from empty, so 31 records fit.
    pub const MOTOR_QUEUE_SIZE: usize = 32;
}

pub mod planner {
    // Head, body and tail of an accelerated line.
    pub const MP_BUFFERS_NEEDED: usize = 3;

    // A held tail is released once the motor queue holds this many records or
    // less. The dispatcher must be polled more often than one min_segment_time.
    pub const TAIL_RELEASE_THRESHOLD: usize = 1;

    // Bisection steps used to fit a velocity into a short line.
    pub const VELOCITY_SEARCH_ITERATIONS: u32 = 40;

    // Constant velocity lines are queued in pieces no longer than this (us),
    // a record can't hold more than u32::MAX microseconds.
    pub const MAX_LINE_SEGMENT_TIME: f64 = 60_000_000.0;

    // Velocities below this (mm/min) are treated as a stop.
    pub const MIN_VELOCITY: f64 = 0.01;
}

pub mod defaults {
    pub const STEP_ANGLE: f64 = 1.8; // degrees
    pub const MICROSTEPS: u8 = 8;
    pub const TRAVEL_PER_REV: f64 = 1.25; // mm, or degrees for rotary axes
    pub const SEEK_RATE_MAX: f64 = 1500.0; // mm/min
    pub const FEED_RATE_MAX: f64 = 1200.0; // mm/min
    pub const TRAVEL_MAX: f64 = 400.0; // mm
    pub const RADIUS: f64 = 1.0; // mm, used by radius mode rotary axes

    pub const A_TRAVEL_PER_REV: f64 = 360.0;
    pub const A_SEEK_RATE_MAX: f64 = 36_000.0; // deg/min
    pub const A_FEED_RATE_MAX: f64 = 36_000.0; // deg/min
    pub const A_TRAVEL_MAX: f64 = 0.0; // unlimited

    pub const MM_PER_ARC_SEGMENT: f64 = 0.1;
    pub const MIN_SEGMENT_LENGTH: f64 = 0.01; // mm
    pub const MIN_SEGMENT_TIME: f64 = 10_000.0; // us
    pub const MAX_LINEAR_JERK: f64 = 50_000_000.0; // mm/min^3

    // Direction changes, in radians, between which continuous mode behaves
    // like exact path.
    pub const ANGULAR_JERK_LOWER: f64 = 0.1;
    pub const ANGULAR_JERK_UPPER: f64 = 2.0;
}

pub mod homing {
    pub const SEARCH_VELOCITY: f64 = 500.0; // mm/min
    pub const LATCH_VELOCITY: f64 = 100.0; // mm/min
    pub const LATCH_BACKOFF: f64 = 5.0; // mm
    // The search distance if the axis has no travel_max configured.
    pub const DEFAULT_SEARCH_TRAVEL: f64 = 400.0; // mm
}
