//! Ambient-stack properties from SPEC_FULL.md §8 (items 7, 8, 10). Item
//! 9 (no allocation on the pre-`exit_group` logging path) is not
//! exercised here: verifying it needs a counting allocator wired in as
//! the global allocator, which would affect every other test in this
//! binary, so it is left as a property to check with a dedicated
//! harness rather than asserted speculatively here.

use interceptor::config::{Config, LogTarget};

fn clear_env() {
    for var in [
        "INTERCEPT_ALL_OBJS",
        "INTERCEPT_NO_TRAMPOLINE",
        "INTERCEPT_LOG",
        "INTERCEPT_LOG_TRUNC",
        "INTERCEPT_DEBUG_DUMP",
    ] {
        unsafe { std::env::remove_var(var) };
    }
}

#[test]
fn property7_defaults_are_libc_only_trampolines_on_logging_off() {
    clear_env();
    let c = Config::from_env();
    assert!(!c.patch_all_objs);
    assert!(!c.no_trampoline);
    assert_eq!(c.log_target, LogTarget::Disabled);
    assert!(!c.debug_dump);
}

#[test]
fn property8_dash_routes_log_to_stderr_without_opening_a_file() {
    clear_env();
    unsafe { std::env::set_var("INTERCEPT_LOG", "-") };
    let c = Config::from_env();
    assert_eq!(c.log_target, LogTarget::Stderr);
    unsafe { std::env::remove_var("INTERCEPT_LOG") };
}

#[test]
fn property10_mmap_then_mprotect_round_trip() {
    let size = rawsys::PAGE_SIZE;
    let base = rawsys::mmap_anon(0, size, rawsys::PROT_READ | rawsys::PROT_WRITE, false)
        .expect("anonymous mapping should succeed");
    assert_eq!(base % rawsys::PAGE_SIZE, 0, "mapping must be page-aligned");
    assert!(rawsys::mprotect(base, size, rawsys::PROT_READ | rawsys::PROT_EXEC));

    assert_eq!(rawsys::PROT_READ, 0x1);
    assert_eq!(rawsys::PROT_WRITE, 0x2);
    assert_eq!(rawsys::PROT_EXEC, 0x4);

    assert!(rawsys::munmap(base, size));
}
