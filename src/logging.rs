// SPDX-License-Identifier: GPL-3.0-or-later

// On the board, log records go out through RTT. Host builds (tests, the
// simulator) bring their own logger, if any.

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod rtt {
    use log::{LevelFilter, Metadata, Record};

    struct Logger;

    impl log::Log for Logger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                rtt_target::rprintln!("[{}] {}", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    static LOGGER: Logger = Logger;

    pub fn init_logging() {
        rtt_target::rtt_init_print!(NoBlockSkip, 4096);
        // Only fails if called twice, the first logger stays.
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Debug);
    }
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use rtt::init_logging;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn init_logging() {
    log::set_max_level(log::LevelFilter::Debug);
}
