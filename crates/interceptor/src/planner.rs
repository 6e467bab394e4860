//! Component D: for each patch candidate, decide the concrete overwrite
//! plan. Grounded on `examples/original_source/src/patcher.c`'s
//! `assign_nop_trampoline`, `is_relocateable_before_syscall`,
//! `is_relocateable_after_syscall`, and `check_surrounding_instructions`.

use types::{EngineError, JumpTable, ObjDesc, PatchDesc, Plan, Range};

const SHORT_JMP_MIN: i64 = -128;
const SHORT_JMP_MAX: i64 = 127;

/// Runs the planner over every candidate in `desc.patches`, in place.
/// Candidates and `desc.nop_table` must both be sorted ascending by
/// address (the crawler guarantees this). Returns the first fatal
/// `PatchWindowTooSmall` error, if any -- planning otherwise continues
/// for diagnostic purposes (errors are reported, not short-circuited),
/// matching the fail-everything-at-once spirit of a hot-patch pass that
/// aborts the whole process on the first unpatchable site.
pub fn plan_object(desc: &mut ObjDesc) -> Result<(), EngineError> {
    let mut nop_cursor = 0usize;
    let path = desc.path.clone();
    let nop_table = desc.nop_table.clone();
    let jump_table = &desc.jump_table;

    for patch in desc.patches.iter_mut() {
        if let Some(nop) = find_nop_trampoline(&nop_table, &mut nop_cursor, patch.syscall_addr) {
            apply_plan_a(patch, nop);
            continue;
        }
        apply_plan_b(patch, jump_table, &path)?;
    }
    Ok(())
}

/// Advances `cursor` past any nop that has fallen out of short-jump
/// range behind `syscall_addr`, then returns the first nop (if any)
/// currently in range. The cursor only ever moves forward: once a nop
/// is consumed or skipped it is never reconsidered for a later (higher
/// address) candidate.
fn find_nop_trampoline(nop_table: &[Range], cursor: &mut usize, syscall_addr: usize) -> Option<Range> {
    loop {
        let nop = *nop_table.get(*cursor)?;
        let disp = nop.start as i64 - syscall_addr as i64;
        if disp < SHORT_JMP_MIN {
            *cursor += 1;
            continue;
        }
        if disp > SHORT_JMP_MAX {
            return None;
        }
        *cursor += 1;
        return Some(nop);
    }
}

fn apply_plan_a(patch: &mut PatchDesc, nop: Range) {
    patch.plan = Some(Plan::NopTrampoline);
    patch.uses_nop_trampoline = true;
    patch.nop_trampoline = Some(nop);
    patch.dst_jmp_patch = Some(nop.start + 2);
    patch.return_address = Some(patch.syscall_addr + 2);
}

fn apply_plan_b(patch: &mut PatchDesc, jump_table: &JumpTable, object_path: &str) -> Result<(), EngineError> {
    let prev_ok = patch
        .preceding_ins
        .map(|i| i.relocatable_before_syscall() && !jump_table.is_set(patch.syscall_addr))
        .unwrap_or(false);
    patch.uses_prev_ins = prev_ok;

    let prev2_ok = prev_ok
        && patch
            .preceding_ins_2
            .zip(patch.preceding_ins)
            .map(|(i2, i1)| i2.relocatable_before_syscall() && !jump_table.is_set(i1.address))
            .unwrap_or(false);
    patch.uses_prev_ins_2 = prev2_ok;

    let next_ok = patch
        .following_ins
        .map(|i| i.relocatable_after_syscall() && !jump_table.is_set(patch.syscall_addr + 2))
        .unwrap_or(false);
    patch.uses_next_ins = next_ok;

    let len = patch.window_len();
    if len < 5 {
        return Err(EngineError::PatchWindowTooSmall {
            object: object_path.to_string(),
            syscall_offset: patch.syscall_offset,
        });
    }

    patch.plan = Some(Plan::WidenWindow);
    let prev_len = if prev_ok { patch.preceding_ins.unwrap().length as usize } else { 0 };
    let prev2_len = if prev2_ok { patch.preceding_ins_2.unwrap().length as usize } else { 0 };
    let next_len = if next_ok { patch.following_ins.unwrap().length as usize } else { 0 };

    patch.dst_jmp_patch = Some(patch.syscall_addr - prev_len - prev2_len);
    patch.return_address = Some(patch.syscall_addr + 2 + next_len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::DisasmResult;

    fn nop_ins(addr: usize, len: u8) -> DisasmResult {
        DisasmResult {
            address: addr,
            length: len,
            is_overwritable_nop: true,
            ..Default::default()
        }
    }

    fn plain_ins(addr: usize, len: u8) -> DisasmResult {
        DisasmResult { address: addr, length: len, ..Default::default() }
    }

    fn ret_ins(addr: usize) -> DisasmResult {
        DisasmResult { address: addr, length: 1, is_return: true, ..Default::default() }
    }

    #[test]
    fn nop_exactly_127_ahead_is_accepted_128_is_rejected() {
        let mut cursor = 0usize;
        let table_ok = vec![Range::new(0x1000 + 127, 4)];
        assert!(find_nop_trampoline(&table_ok, &mut cursor, 0x1000).is_some());

        let mut cursor2 = 0usize;
        let table_bad = vec![Range::new(0x1000 + 128, 4)];
        assert!(find_nop_trampoline(&table_bad, &mut cursor2, 0x1000).is_none());
    }

    #[test]
    fn plan_a_preferred_over_plan_b() {
        let mut desc = ObjDesc::new(0, "x".into(), Range::new(0x1000, 0x100));
        let mut p = PatchDesc::new(0x1010, 0x10);
        p.preceding_ins = Some(plain_ins(0x100e, 2));
        p.following_ins = Some(ret_ins(0x1012));
        desc.nop_table.push(Range::new(0x1020, 4));
        desc.patches.push(p);
        plan_object(&mut desc).unwrap();
        assert_eq!(desc.patches[0].plan, Some(Plan::NopTrampoline));
    }

    #[test]
    fn plan_b_window_too_small_is_fatal() {
        let mut desc = ObjDesc::new(0, "x".into(), Range::new(0x1000, 0x100));
        let mut p = PatchDesc::new(0x1010, 0x10);
        p.preceding_ins = Some(nop_ins(0x100f, 1)); // not relocatable, too short anyway
        p.following_ins = Some(plain_ins(0x1012, 1));
        desc.patches.push(p);
        let err = plan_object(&mut desc).unwrap_err();
        matches!(err, EngineError::PatchWindowTooSmall { .. });
    }
}
