//! Component C: disassembles an object's text range, classifies each
//! instruction, and emits one `PatchDesc` candidate per discovered
//! `syscall`. Grounded on `examples/original_source/src/crawl_text.c`'s
//! three-instruction sliding window.

use types::{DisasmResult, JumpTable, PatchDesc, Range};

use crate::disasm;

pub struct CrawlOutcome {
    pub patches: Vec<PatchDesc>,
    pub nop_table: Vec<Range>,
}

/// `text` must be the raw bytes of `[text_range.start, text_range.end)`.
/// `jump_table` is seeded by the object-metadata provider (Component B)
/// before this runs, and is extended here with any IP-relative targets
/// discovered during disassembly.
pub fn crawl(text: &[u8], text_range: Range, jump_table: &mut JumpTable) -> CrawlOutcome {
    let mut patches = Vec::new();
    let mut nop_table = Vec::new();

    // prevs[0] = most recent decoded instruction, prevs[2] = two steps back.
    let mut prevs: [Option<DisasmResult>; 3] = [None, None, None];

    let mut ctx = disasm::init(text, text_range.start as u64);
    loop {
        let Some(cur) = disasm::next(&mut ctx) else {
            break;
        };

        if let Some(target) = cur.ip_rel_target {
            if text_range.contains(target) {
                jump_table.mark(target);
            }
        }

        if cur.is_overwritable_nop {
            nop_table.push(Range::new(cur.address, cur.length as usize));
        }

        // The instruction immediately before `cur` was a syscall iff
        // prevs[0] is one.
        if let Some(syscall_ins) = prevs[0] {
            if syscall_ins.is_syscall {
                let mut desc = PatchDesc::new(
                    syscall_ins.address,
                    (syscall_ins.address - text_range.start) as u32,
                );
                desc.preceding_ins_2 = prevs[2];
                desc.preceding_ins = prevs[1];
                desc.following_ins = Some(cur);
                patches.push(desc);
            }
        }

        prevs[2] = prevs[1];
        prevs[1] = prevs[0];
        prevs[0] = Some(cur);
    }

    // Edge case: a syscall as the very last instruction of the text has
    // no following instruction and is intentionally skipped (see
    // DESIGN.md's Open Question ledger) -- prevs[1]/prevs[0] here would
    // be the syscall and whatever preceded it, with no fourth iteration
    // to observe it as "two steps back".
    if let Some(last) = prevs[0] {
        if last.is_syscall {
            log::debug!(
                "skipping syscall at end of text range: offset 0x{:x}",
                last.address - text_range.start
            );
        }
    }

    CrawlOutcome { patches, nop_table }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_syscall_with_neighbours() {
        // nop; syscall; ret
        let bytes = [0x90u8, 0x0f, 0x05, 0xc3];
        let mut jt = JumpTable::new(0x1000, bytes.len());
        let outcome = crawl(&bytes, Range::new(0x1000, bytes.len()), &mut jt);
        assert_eq!(outcome.patches.len(), 1);
        let p = &outcome.patches[0];
        assert_eq!(p.syscall_addr, 0x1001);
        assert!(p.preceding_ins.unwrap().length == 1);
        assert!(p.following_ins.unwrap().is_return);
    }

    #[test]
    fn syscall_at_end_of_text_is_skipped() {
        // nop; nop; syscall (nothing follows)
        let bytes = [0x90u8, 0x90, 0x0f, 0x05];
        let mut jt = JumpTable::new(0x1000, bytes.len());
        let outcome = crawl(&bytes, Range::new(0x1000, bytes.len()), &mut jt);
        assert!(outcome.patches.is_empty());
    }
}
