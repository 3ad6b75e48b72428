// SPDX-License-Identifier: GPL-3.0-or-later

pub mod hal;
pub mod gpio;
pub mod sim;
mod delay;
pub use delay::*;
