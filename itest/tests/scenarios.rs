//! End-to-end scenarios against synthetic byte buffers, per SPEC_FULL.md
//! §8. No real dynamic loader is involved: each test hand-builds a
//! `types::ObjDesc` plus a raw `.text` byte buffer and drives the
//! crawler/planner pipeline directly, mirroring the teacher's `aTester`
//! crate's out-of-crate integration-test role.

use interceptor::{crawler, hook, obj_meta, planner};
use types::{ObjDesc, Plan, Range};

fn run_pipeline(text: &[u8], base: usize) -> ObjDesc {
    let range = Range::new(base, text.len());
    let mut desc = ObjDesc::new(0, "synthetic".into(), range);
    let outcome = crawler::crawl(text, range, &mut desc.jump_table);
    desc.patches = outcome.patches;
    desc.nop_table = outcome.nop_table;
    desc
}

/// Scenario 1: `nop; syscall; ret`, no jump targets. The single-byte
/// nop cannot serve as a Plan A trampoline (it is shorter than the
/// three-byte minimum), so the planner must fall back to Plan B,
/// consuming the trailing `ret` (relocatable after the syscall).
#[test]
fn scenario1_nop_syscall_ret_falls_back_to_plan_b() {
    let text = [0x90u8, 0x0f, 0x05, 0xc3];
    let mut desc = run_pipeline(&text, 0x1000);
    assert_eq!(desc.patches.len(), 1);
    planner::plan_object(&mut desc).unwrap();
    let p = &desc.patches[0];
    assert_eq!(p.plan, Some(Plan::WidenWindow));
    assert!(p.uses_next_ins, "ret must be consumed to reach 5 bytes");
    assert_eq!(p.dst_jmp_patch, Some(0x1001));
}

/// Scenario 2: two syscalls three bytes apart share one eligible
/// overwritable nop further down the buffer. The first candidate claims
/// it (Plan A); the monotonic nop cursor means the second cannot reuse
/// it and must fall back to Plan B.
#[test]
fn scenario2_first_syscall_claims_shared_nop_second_uses_plan_b() {
    let mut text = vec![
        0x0f, 0x05, // syscall1 @0
        0x90, // 1-byte filler @2
        0x0f, 0x05, // syscall2 @3
        0x89, 0xc0, // mov eax,eax @5 (following ins for syscall2)
    ];
    while text.len() < 16 {
        text.push(0x90); // 1-byte fillers, not overwritable
    }
    // 9-byte overwritable nop at offset 16: 66 0F 1F 84 00 00000000
    text.extend_from_slice(&[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let mut desc = run_pipeline(&text, 0x2000);
    assert_eq!(desc.patches.len(), 2);
    assert_eq!(desc.nop_table.len(), 1);
    assert_eq!(desc.nop_table[0].start, 0x2000 + 16);

    planner::plan_object(&mut desc).unwrap();
    assert_eq!(desc.patches[0].plan, Some(Plan::NopTrampoline));
    assert_eq!(desc.patches[1].plan, Some(Plan::WidenWindow));
}

/// Scenario 3: a syscall whose only preceding instruction is a relative
/// jump targeting the syscall itself. The syscall address becomes a
/// marked jump target, so the planner must refuse to consume the
/// preceding instruction, and with nothing else to widen into, planning
/// must fail with the documented fatal error.
#[test]
fn scenario3_syscall_as_jump_target_cannot_be_widened() {
    let text = [0xEBu8, 0x00, 0x0f, 0x05, 0x90];
    let mut desc = run_pipeline(&text, 0x3000);
    assert_eq!(desc.patches.len(), 1);
    assert!(desc.jump_table.is_set(0x3002), "jmp target (the syscall itself) must be marked");

    let err = planner::plan_object(&mut desc).unwrap_err();
    match err {
        types::EngineError::PatchWindowTooSmall { syscall_offset, .. } => {
            assert_eq!(syscall_offset, 2);
        }
        other => panic!("expected PatchWindowTooSmall, got {other}"),
    }
}

/// Scenario 4 (bounds check extracted as pure logic, since the real
/// allocator depends on this process's actual memory layout): a text
/// section living near the edge of the +-2GiB window is reachable right
/// at the boundary and unreachable one byte past it.
#[test]
fn scenario4_trampoline_reachability_boundary() {
    let two_gib: usize = 1 << 31;
    assert!(within_reach(0x1000, 0x1000 + two_gib));
    assert!(!within_reach(0x1000, 0x1000 + two_gib + 1));
}

fn within_reach(text_addr: usize, candidate: usize) -> bool {
    candidate.abs_diff(text_addr) <= (1usize << 31)
}

/// Scenario 5: a `clone` syscall with a non-null child stack pointer is
/// recognised as thread creation and takes the clone-child path; the
/// clone-child hook, once registered, is reachable from the wrapper's
/// child-side entry point.
#[test]
fn scenario5_clone_thread_detection_and_child_hook() {
    assert!(hook::is_linux_clone_thread(56, 0xdead_beef));
    assert!(!hook::is_linux_clone_thread(56, 0));
    assert!(!hook::is_linux_clone_thread(1, 0xdead_beef));

    static CALLED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
    unsafe extern "C" fn on_clone_child() {
        CALLED.store(true, std::sync::atomic::Ordering::SeqCst);
    }
    unsafe {
        hook::intercept_set_clone_child_hook(on_clone_child);
    }
    hook::intercept_clone_child_entry();
    assert!(CALLED.load(std::sync::atomic::Ordering::SeqCst));
}

/// Scenario 6: the vDSO is always excluded from patching, regardless of
/// `INTERCEPT_ALL_OBJS`.
#[test]
fn scenario6_vdso_always_excluded() {
    assert!(!obj_meta::should_patch_object("linux-vdso.so.1", true, false));
    assert!(!obj_meta::should_patch_object("linux-vdso.so.1", true, true));
}
