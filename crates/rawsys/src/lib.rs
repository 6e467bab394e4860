//! Raw Linux/x86-64 syscall primitives and an anonymous-mapping
//! allocator. Everything the interceptor does once it starts patching
//! goes through here instead of the hosting C library, so the engine
//! never depends on an allocator or I/O path that it might itself be
//! in the middle of rewriting.

pub mod io;
pub mod mem;
pub mod syscall;

pub use mem::{mmap_anon, mprotect, munmap, AnonVec, PAGE_SIZE, PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};
pub use syscall::exit_group;
