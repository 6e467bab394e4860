use crate::disasm::DisasmResult;
use crate::range::Range;

/// Which of the two patch strategies a candidate ended up using. See
/// SPEC_FULL.md §4.D: Plan A reuses a nearby overwritable nop as a
/// two-hop trampoline; Plan B widens the overwrite window into the
/// syscall's neighbouring instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    NopTrampoline,
    WidenWindow,
}

/// One discovered `syscall` instruction, together with everything the
/// planner and generator need to patch it safely.
#[derive(Debug, Clone)]
pub struct PatchDesc {
    pub syscall_addr: usize,
    pub syscall_offset: u32,

    pub preceding_ins_2: Option<DisasmResult>,
    pub preceding_ins: Option<DisasmResult>,
    pub following_ins: Option<DisasmResult>,

    pub uses_prev_ins_2: bool,
    pub uses_prev_ins: bool,
    pub uses_next_ins: bool,

    pub uses_nop_trampoline: bool,
    pub nop_trampoline: Option<Range>,

    pub plan: Option<Plan>,
    pub dst_jmp_patch: Option<usize>,
    pub return_address: Option<usize>,
    pub asm_wrapper: Option<usize>,
}

impl PatchDesc {
    pub fn new(syscall_addr: usize, syscall_offset: u32) -> Self {
        PatchDesc {
            syscall_addr,
            syscall_offset,
            preceding_ins_2: None,
            preceding_ins: None,
            following_ins: None,
            uses_prev_ins_2: false,
            uses_prev_ins: false,
            uses_next_ins: false,
            uses_nop_trampoline: false,
            nop_trampoline: None,
            plan: None,
            dst_jmp_patch: None,
            return_address: None,
            asm_wrapper: None,
        }
    }

    /// Total bytes reclaimed for the overwrite window under Plan B:
    /// the syscall itself plus whichever neighbours were consumed.
    pub fn window_len(&self) -> usize {
        let mut len = 2usize;
        if self.uses_prev_ins {
            len += self.preceding_ins.map(|i| i.length as usize).unwrap_or(0);
        }
        if self.uses_prev_ins_2 {
            len += self.preceding_ins_2.map(|i| i.length as usize).unwrap_or(0);
        }
        if self.uses_next_ins {
            len += self.following_ins.map(|i| i.length as usize).unwrap_or(0);
        }
        len
    }
}
