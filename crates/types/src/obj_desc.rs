use crate::jump_table::JumpTable;
use crate::patch_desc::PatchDesc;
use crate::range::Range;

/// The trampoline area for one object: a page-aligned RX-writable region
/// within +-2GiB of the object's text, plus a monotonic cursor tracking
/// how many 14-byte absolute-jump slots have been handed out.
#[derive(Debug, Clone, Copy)]
pub struct TrampolineArea {
    pub base: usize,
    pub size: usize,
    pub cursor: usize,
}

impl TrampolineArea {
    pub const SLOT_SIZE: usize = 14;

    pub fn new(base: usize, size: usize) -> Self {
        TrampolineArea { base, size, cursor: 0 }
    }

    /// Hands out the next 14-byte absolute-jump slot, or `None` if the
    /// area is exhausted.
    pub fn next_slot(&mut self) -> Option<usize> {
        if self.cursor + Self::SLOT_SIZE > self.size {
            return None;
        }
        let slot = self.base + self.cursor;
        self.cursor += Self::SLOT_SIZE;
        Some(slot)
    }
}

/// One loaded shared object selected for patching. Created once per
/// object during discovery and never destroyed; owned by the driver for
/// the rest of the process's life.
#[derive(Debug)]
pub struct ObjDesc {
    pub base_addr: usize,
    pub path: String,
    pub text: Range,
    pub jump_table: JumpTable,
    pub nop_table: Vec<Range>,
    pub patches: Vec<PatchDesc>,
    pub trampoline_area: Option<TrampolineArea>,
    /// Function pointers handed to the wrapper generator: the normal
    /// syscall dispatcher and the clone-child hook entry, resolved once
    /// by the driver from the process-wide hook registrations before any
    /// wrapper for this object is generated.
    pub wrapper_dest: Option<usize>,
    pub wrapper_dest_clone_child: Option<usize>,
}

impl ObjDesc {
    pub fn new(base_addr: usize, path: String, text: Range) -> Self {
        ObjDesc {
            base_addr,
            jump_table: JumpTable::new(text.start, text.size),
            nop_table: Vec::new(),
            patches: Vec::new(),
            trampoline_area: None,
            wrapper_dest: None,
            wrapper_dest_clone_child: None,
            text,
            path,
        }
    }
}
