// SPDX-License-Identifier: GPL-3.0-or-later

use crate::consts::system::CLOCK_SPEED_MHZ;

fn ns_to_cycles(duration_ns: u32) -> u32 {
    (duration_ns * CLOCK_SPEED_MHZ + 999) / 1000
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline(always)]
pub fn delay_ns(duration_ns: u32) {
    cortex_m::asm::delay(ns_to_cycles(duration_ns));
}

// Off target there's no cycle accurate delay, we spin for at least as many
// iterations as there would have been cycles.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
#[inline(always)]
pub fn delay_ns(duration_ns: u32) {
    for _ in 0..ns_to_cycles(duration_ns) {
        core::hint::spin_loop();
    }
}

#[inline(always)]
pub fn delay_us(duration_us: u32) {
    delay_ns(duration_us * 1000)
}
