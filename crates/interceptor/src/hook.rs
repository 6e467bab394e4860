//! Hook registration: the two process-wide function-pointer statics a
//! host application sets before or during its own constructor ordering,
//! plus the default pass-through hook. Grounded on the `intercept_hook_point`
//! / `intercept_hook_point_clone_child` globals and the clone-thread
//! special-casing in `examples/original_source/src/intercept.c`.

use std::sync::atomic::{AtomicUsize, Ordering};

/// `(nr, a0..a5, result_out) -> i32`. Non-zero means "forward to kernel
/// unmodified"; zero means the hook already produced `*result_out`.
pub type SyscallHook = unsafe extern "C" fn(i64, i64, i64, i64, i64, i64, i64, *mut i64) -> i32;

/// Called on the child side of a `clone` syscall recognised as a
/// new-thread creation (`nr == SYS_clone && arg1 != 0`), before control
/// returns to guest code on the new stack.
pub type CloneChildHook = unsafe extern "C" fn();

static SYSCALL_HOOK: AtomicUsize = AtomicUsize::new(0);
static CLONE_CHILD_HOOK: AtomicUsize = AtomicUsize::new(0);

const SYS_CLONE: i64 = 56;

/// `nr == SYS_clone` and the second argument (the child stack pointer)
/// is non-null: matches the upstream `is_linux_clone_thread` check used
/// to route clone calls through the special clone wrapper entry instead
/// of the ordinary dispatcher return path.
pub fn is_linux_clone_thread(nr: i64, arg1: i64) -> bool {
    nr == SYS_CLONE && arg1 != 0
}

/// Registers the syscall hook. Safe to call from a host application's
/// own constructor, as long as it runs before this library's
/// `#[ctor]` driver (constructor ordering across translation units is
/// otherwise unspecified, matching the upstream library's own caveat).
///
/// # Safety
/// `hook` must be a valid `extern "C"` function pointer for the
/// lifetime of the process.
#[no_mangle]
pub unsafe extern "C" fn intercept_set_syscall_hook(hook: SyscallHook) {
    SYSCALL_HOOK.store(hook as usize, Ordering::Release);
}

/// # Safety
/// `hook` must be a valid `extern "C"` function pointer for the
/// lifetime of the process.
#[no_mangle]
pub unsafe extern "C" fn intercept_set_clone_child_hook(hook: CloneChildHook) {
    CLONE_CHILD_HOOK.store(hook as usize, Ordering::Release);
}

pub fn syscall_hook() -> Option<SyscallHook> {
    let raw = SYSCALL_HOOK.load(Ordering::Acquire);
    if raw == 0 {
        None
    } else {
        Some(unsafe { std::mem::transmute::<usize, SyscallHook>(raw) })
    }
}

pub fn clone_child_hook() -> Option<CloneChildHook> {
    let raw = CLONE_CHILD_HOOK.load(Ordering::Acquire);
    if raw == 0 {
        None
    } else {
        Some(unsafe { std::mem::transmute::<usize, CloneChildHook>(raw) })
    }
}

/// Called by every generated wrapper. If the host never registered a
/// hook, every syscall is forwarded unmodified -- this default keeps
/// the library usable (and testable) standalone.
///
/// # Safety
/// Called only from generated wrapper stubs with arguments taken
/// directly off the guest's registers at the interception point.
#[no_mangle]
pub unsafe extern "C" fn intercept_dispatch(
    nr: i64,
    a0: i64,
    a1: i64,
    a2: i64,
    a3: i64,
    a4: i64,
    a5: i64,
) -> i64 {
    let mut result: i64 = 0;
    let forward = match syscall_hook() {
        Some(hook) => unsafe { hook(nr, a0, a1, a2, a3, a4, a5, &mut result) != 0 },
        None => true,
    };
    if forward {
        unsafe { rawsys::syscall::raw_syscall(nr, a0, a1, a2, a3, a4, a5) }
    } else {
        result
    }
}

/// Invoked from the clone-child wrapper entry on the child side of a
/// recognised `clone` thread creation, before guest code resumes.
#[no_mangle]
pub extern "C" fn intercept_clone_child_entry() {
    if let Some(hook) = clone_child_hook() {
        unsafe { hook() };
    }
}
