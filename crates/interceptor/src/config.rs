//! Parses the `INTERCEPT_*` environment knobs exactly once, before any
//! other component runs. See SPEC_FULL.md §6.

/// Where diagnostic log lines go, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Disabled,
    Stderr,
    File { path: String, truncate: bool },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub patch_all_objs: bool,
    pub no_trampoline: bool,
    pub log_target: LogTarget,
    pub debug_dump: bool,
}

impl Config {
    /// Reads `std::env::var` only — this predates any patching, so it's
    /// exempt from the "no host libc I/O after init" rule (SPEC_FULL §4.F).
    pub fn from_env() -> Self {
        let patch_all_objs = std::env::var("INTERCEPT_ALL_OBJS").is_ok();
        let no_trampoline = std::env::var("INTERCEPT_NO_TRAMPOLINE")
            .map(|v| v == "1")
            .unwrap_or(false);
        let truncate = std::env::var("INTERCEPT_LOG_TRUNC").is_ok();
        let log_target = match std::env::var("INTERCEPT_LOG") {
            Err(_) => LogTarget::Disabled,
            Ok(v) if v == "-" => LogTarget::Stderr,
            Ok(path) => LogTarget::File { path, truncate },
        };
        let debug_dump = std::env::var("INTERCEPT_DEBUG_DUMP").is_ok();

        Config {
            patch_all_objs,
            no_trampoline,
            log_target,
            debug_dump,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        for var in [
            "INTERCEPT_ALL_OBJS",
            "INTERCEPT_NO_TRAMPOLINE",
            "INTERCEPT_LOG",
            "INTERCEPT_LOG_TRUNC",
            "INTERCEPT_DEBUG_DUMP",
        ] {
            unsafe { std::env::remove_var(var) };
        }
        let c = Config::from_env();
        assert!(!c.patch_all_objs);
        assert!(!c.no_trampoline);
        assert_eq!(c.log_target, LogTarget::Disabled);
        assert!(!c.debug_dump);
    }

    #[test]
    fn dash_routes_to_stderr() {
        unsafe { std::env::set_var("INTERCEPT_LOG", "-") };
        let c = Config::from_env();
        assert_eq!(c.log_target, LogTarget::Stderr);
        unsafe { std::env::remove_var("INTERCEPT_LOG") };
    }
}
