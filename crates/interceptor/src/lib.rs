//! A preloaded library that hot-patches every `syscall` instruction in
//! the host process's libc (and, optionally, other loaded objects) to
//! route through a user-supplied hook, without `ptrace` or kernel
//! support. See `SPEC_FULL.md` for the full design.

pub mod codegen;
pub mod config;
pub mod cpu;
pub mod crawler;
pub mod disasm;
pub mod driver;
pub mod hook;
pub mod logging;
pub mod map_iter;
pub mod obj_meta;
pub mod planner;
pub mod trampoline;

pub use hook::{intercept_set_clone_child_hook, intercept_set_syscall_hook};

#[ctor::ctor]
fn on_load() {
    driver::run();
}
