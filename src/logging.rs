//! `log` facade backend for the Workers console.

use log::{Level, LevelFilter, Log, Metadata, Record};

pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::Info;

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            worker::console_log!("{}", format_line(record.level(), &record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

/// Installs the console logger at `level`. The logger is installed once;
/// later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

fn format_line(level: Level, message: &str) -> String {
    format!("{level}: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_lead_with_the_level() {
        assert_eq!(
            format_line(Level::Warn, "Connector create rejected"),
            "WARN: Connector create rejected"
        );
        assert_eq!(format_line(Level::Debug, "x"), "DEBUG: x");
    }
}
