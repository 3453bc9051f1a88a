//! Kernel print utilities.
//!
//! The console is the host's standard output. [`Console`] routes the `log`
//! facade to it with the kernel's `[LEVEL] message` format.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;

#[doc(hidden)]
pub fn _print(fmt: std::fmt::Arguments<'_>) {
    let mut out = std::io::stdout().lock();
    let _ = out.write_fmt(fmt);
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the console.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

/// The console logger.
pub struct Console;

static CONSOLE: Console = Console;

impl Log for Console {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        crate::kprintln!("[{tag}] {}", record.args());
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}

/// Installs the console logger and sets the maximum level.
///
/// The logger is installed once per process; later calls only change the
/// level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&CONSOLE);
    log::set_max_level(level);
}
