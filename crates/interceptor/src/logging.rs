//! A `log::Log` backend that writes through `rawsys` instead of
//! buffered `std::io`, so it stays usable on the abort path that
//! immediately precedes `exit_group`.

use std::fmt::Write as _;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::config::LogTarget;

struct RawLogger {
    fd: Mutex<Option<i32>>,
}

static LOGGER: RawLogger = RawLogger { fd: Mutex::new(None) };

impl Log for RawLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let fd = match *self.fd.lock().unwrap() {
            Some(fd) => fd,
            None => return,
        };
        let mut line = String::with_capacity(128);
        let _ = write!(
            line,
            "[{}] {}\n",
            level_tag(record.level()),
            record.args()
        );
        rawsys::io::write_all(fd, line.as_bytes());
    }

    fn flush(&self) {}
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warn",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    }
}

/// Installs the process-wide logger. Idempotent: a second call only
/// updates the target fd, it never re-registers with the `log` facade.
pub fn init(target: &LogTarget, debug_dump: bool) {
    let fd = match target {
        LogTarget::Disabled => None,
        LogTarget::Stderr => Some(rawsys::io::STDERR_FD),
        LogTarget::File { path, truncate } => {
            let mut flags = rawsys::io::O_WRONLY | rawsys::io::O_CREAT;
            flags |= if *truncate {
                rawsys::io::O_TRUNC
            } else {
                rawsys::io::O_APPEND
            };
            rawsys::io::open_path(path, flags, 0o644)
        }
    };
    *LOGGER.fd.lock().unwrap() = fd;

    let level = if debug_dump {
        LevelFilter::Trace
    } else if fd.is_some() {
        LevelFilter::Info
    } else {
        LevelFilter::Off
    };
    log::set_max_level(level);
    // `set_logger` fails if already set (e.g. re-init in tests); that's
    // fine, the fd/level above are already updated via the statics.
    let _ = log::set_logger(&LOGGER);
}
