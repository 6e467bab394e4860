//! Component E: trampoline-area allocation, the wrapper pool, per-site
//! wrapper synthesis, and patch activation. Grounded on
//! `examples/original_source/src/allocate_trampoline_table.c` (area
//! placement) and `src/patcher.c` (wrapper template, `create_jump`
//! family); instruction-emission style follows the teacher's
//! `crates/kernel/src/task/trampoline.rs` (free functions stamping raw
//! opcodes into a byte buffer) and
//! `examples/other_examples/.../zpoline_loader-src-trampoline.rs.rs`'s
//! `generate_hook_stub` (save-call-restore shape).

use types::{EngineError, ObjDesc, PatchDesc, Plan, TrampolineArea};

use crate::codegen::{self, TRAP_FILL};
use crate::cpu;
use crate::map_iter;

const TWO_GIB: usize = 1 << 31;
const TRAMPOLINE_PAGES: usize = 64;

/// Picks and maps a trampoline area within +-2GiB of `text_end`,
/// probing `/proc/self/maps` for a free page the way the upstream
/// `allocate_trampoline_table` guesses then probes.
pub fn allocate_trampoline_area(text_start: usize, text_end: usize) -> Result<TrampolineArea, EngineError> {
    let min_addr = map_iter::min_mappable_address();
    let size = TRAMPOLINE_PAGES * rawsys::PAGE_SIZE;

    let guess = text_end.saturating_sub(TWO_GIB).max(min_addr);
    let guess = rawsys::mem::round_up_to_page(guess);

    let regions = map_iter::snapshot();
    let base = map_iter::find_free_region(&regions, guess, size)
        .ok_or(EngineError::TrampolineUnreachable { object: format!("0x{text_start:x}") })?;

    if base.abs_diff(text_start) > TWO_GIB || base.abs_diff(text_end) > TWO_GIB {
        return Err(EngineError::TrampolineUnreachable { object: format!("0x{text_start:x}") });
    }

    let prot = rawsys::PROT_READ | rawsys::PROT_WRITE | rawsys::PROT_EXEC;
    let mapped = rawsys::mmap_anon(base, size, prot, true)
        .ok_or(EngineError::TrampolineUnreachable { object: format!("0x{text_start:x}") })?;

    Ok(TrampolineArea::new(mapped, size))
}

/// Single anonymous region holding one fixed-size wrapper stub per
/// patch candidate across the whole process, writable during
/// generation and flipped to read-execute before any jump targeting it
/// is committed.
pub struct WrapperPool {
    base: usize,
    size: usize,
    cursor: usize,
}

impl WrapperPool {
    pub const WRAPPER_SIZE: usize = 256;
    pub const MIN_SIZE: usize = 1024 * 1024;

    pub fn new() -> Result<Self, EngineError> {
        let size = Self::MIN_SIZE;
        let base = rawsys::mmap_anon(0, size, rawsys::PROT_READ | rawsys::PROT_WRITE, false)
            .ok_or(EngineError::WrapperPoolExhausted)?;
        Ok(WrapperPool { base, size, cursor: 0 })
    }

    fn reserve(&mut self) -> Result<usize, EngineError> {
        if self.cursor + Self::WRAPPER_SIZE > self.size {
            return Err(EngineError::WrapperPoolExhausted);
        }
        let addr = self.base + self.cursor;
        self.cursor += Self::WRAPPER_SIZE;
        Ok(addr)
    }

    fn as_mut_slice(&mut self, addr: usize) -> &mut [u8] {
        let off = addr - self.base;
        unsafe { std::slice::from_raw_parts_mut((self.base + off) as *mut u8, Self::WRAPPER_SIZE) }
    }

    /// Flips the whole pool read-execute. Must happen after every
    /// wrapper has been generated and strictly before the first jump
    /// escaping a patched text section is written.
    pub fn activate(&mut self) -> bool {
        rawsys::mem::mprotect(self.base, self.size, rawsys::PROT_READ | rawsys::PROT_EXEC)
    }
}

const GP_SAVE_ORDER: [u8; 15] = [0, 1, 2, 3, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

// x86 register-number constants for the ABI-register moves build_wrapper
// emits; named here so the call-argument wiring below reads against
// names instead of magic encodings.
const RAX: u8 = 0;
const RCX: u8 = 1;
const RDX: u8 = 2;
const RSI: u8 = 6;
const RDI: u8 = 7;
const R8: u8 = 8;
const R9: u8 = 9;
const R10: u8 = 10;
const R11: u8 = 11;

fn push_reg(buf: &mut Vec<u8>, reg: u8) {
    if reg >= 8 {
        buf.push(0x41);
    }
    buf.push(0x50 + (reg & 7));
}

fn pop_reg(buf: &mut Vec<u8>, reg: u8) {
    if reg >= 8 {
        buf.push(0x41);
    }
    buf.push(0x58 + (reg & 7));
}

/// `mov dst, src` (64-bit GP-to-GP, opcode 89 /r).
fn mov_reg_reg(buf: &mut Vec<u8>, dst: u8, src: u8) {
    let rex = 0x48 | if src >= 8 { 0x04 } else { 0 } | if dst >= 8 { 0x01 } else { 0 };
    buf.push(rex);
    buf.push(0x89);
    buf.push(0xC0 | ((src & 7) << 3) | (dst & 7));
}

/// `test reg, reg` (64-bit, opcode 85 /r, reg against itself).
fn test_reg_self(buf: &mut Vec<u8>, reg: u8) {
    let rex = 0x48 | if reg >= 8 { 0x05 } else { 0 };
    buf.push(rex);
    buf.push(0x85);
    buf.push(0xC0 | ((reg & 7) << 3) | (reg & 7));
}

/// Width of the per-wrapper SIMD register-save area, chosen once from a
/// `CPUID`/`xgetbv` probe at init (see `cpu::avx_supported`) and threaded
/// through to every wrapper generated for the process, rather than
/// re-probed per site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdWidth {
    Xmm,
    Ymm,
}

impl SimdWidth {
    pub fn detect() -> Self {
        if cpu::avx_supported() {
            SimdWidth::Ymm
        } else {
            SimdWidth::Xmm
        }
    }

    fn stride(self) -> i32 {
        match self {
            SimdWidth::Xmm => 16,
            SimdWidth::Ymm => 32,
        }
    }

    fn area_size(self) -> u32 {
        self.stride() as u32 * 16
    }
}

/// One `movups`/`vmovups` of SIMD register `reg` (0..15) to or from
/// `[rsp + reg*width.stride()]`. Always emits a 32-bit displacement
/// (`mod=10`) since sixteen registers at either stride quickly exceed
/// the signed 8-bit range the shorter encoding would need.
fn emit_simd_move(buf: &mut Vec<u8>, width: SimdWidth, reg: u8, store: bool) {
    let disp = reg as i32 * width.stride();
    let modrm = 0x80 | ((reg & 7) << 3) | 0x04;
    match width {
        SimdWidth::Xmm => {
            if reg >= 8 {
                buf.push(0x44); // REX.R, extends ModRM.reg to xmm8..15
            }
            buf.push(0x0F);
            buf.push(if store { 0x11 } else { 0x10 }); // movups
            buf.push(modrm);
            buf.push(0x24); // SIB: base=rsp
            buf.extend_from_slice(&disp.to_le_bytes());
        }
        SimdWidth::Ymm => {
            // 2-byte VEX prefix: C5, [R' 1111 L pp]. R' is the inverted
            // extension bit for ModRM.reg; vvvv is unused (1111) since
            // vmovups takes no second source register; L=1 selects the
            // 256-bit (ymm) form; pp=00 (no mandatory prefix).
            let r_bit: u8 = if reg >= 8 { 0 } else { 1 };
            buf.push(0xC5);
            buf.push((r_bit << 7) | 0x7C);
            buf.push(if store { 0x11 } else { 0x10 }); // vmovups
            buf.push(modrm);
            buf.push(0x24);
            buf.extend_from_slice(&disp.to_le_bytes());
        }
    }
}

fn save_simd(buf: &mut Vec<u8>, width: SimdWidth) {
    let size = width.area_size();
    buf.extend_from_slice(&[0x48, 0x81, 0xEC]); // sub rsp, imm32
    buf.extend_from_slice(&size.to_le_bytes());
    for i in 0u8..16 {
        emit_simd_move(buf, width, i, true);
    }
}

fn restore_simd(buf: &mut Vec<u8>, width: SimdWidth) {
    for i in 0u8..16 {
        emit_simd_move(buf, width, i, false);
    }
    let size = width.area_size();
    buf.extend_from_slice(&[0x48, 0x81, 0xC4]); // add rsp, imm32
    buf.extend_from_slice(&size.to_le_bytes());
}

/// Matches `hook::is_linux_clone_thread`'s `SYS_clone` constant; kept
/// local since the clone-thread check below is inlined into the
/// generated bytes rather than calling back into Rust.
const SYS_CLONE: i32 = 56;

/// `cmp reg, imm32` (64-bit, opcode 81 /7).
fn cmp_reg_imm32(buf: &mut Vec<u8>, reg: u8, imm: i32) {
    let rex = 0x48 | if reg >= 8 { 0x01 } else { 0 };
    buf.push(rex);
    buf.push(0x81);
    buf.push(0xF8 | (reg & 7));
    buf.extend_from_slice(&imm.to_le_bytes());
}

/// Emits `0F <cc>` plus a placeholder rel32, returning the index of the
/// displacement field for a later `patch_rel32` call once the jump
/// target's position in `buf` is known.
fn emit_jcc(buf: &mut Vec<u8>, cc: u8) -> usize {
    buf.push(0x0F);
    buf.push(cc);
    let at = buf.len();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    at
}

/// Emits `E9` plus a placeholder rel32; same backpatch protocol as
/// `emit_jcc`.
fn emit_jmp32(buf: &mut Vec<u8>) -> usize {
    buf.push(0xE9);
    let at = buf.len();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    at
}

/// Patches a placeholder emitted by `emit_jcc`/`emit_jmp32`: `at` is the
/// buffer index of the displacement field itself, and the displacement
/// is relative to the end of that 4-byte field (the end of the jump
/// instruction), both purely in terms of offsets within `buf` -- this
/// never needs the wrapper's absolute load address.
fn patch_rel32(buf: &mut [u8], at: usize, target_len: usize) {
    let rel = (target_len - (at + 4)) as i32;
    buf[at..at + 4].copy_from_slice(&rel.to_le_bytes());
}

/// Builds one wrapper stub for `patch` into `out` (sized
/// `WrapperPool::WRAPPER_SIZE`), pulling the relocated neighbouring
/// instruction bytes straight out of `text` (the object's original code
/// bytes, read before any patch is committed). `clone_child_entry` is
/// the clone-child hook entry (SPEC_FULL.md §4.E point 6); `simd_width`
/// picks the XMM/YMM save form (`SimdWidth::detect`, §4.E point 1).
/// Returns the number of bytes written.
pub fn build_wrapper(
    out: &mut [u8],
    wrapper_addr: usize,
    patch: &PatchDesc,
    text: &[u8],
    text_base: usize,
    dispatcher: usize,
    clone_child_entry: usize,
    libpath_ptr: *const u8,
    simd_width: SimdWidth,
) -> Result<usize, EngineError> {
    let mut buf = Vec::with_capacity(out.len());
    let return_address = patch.return_address.ok_or(EngineError::WrapperPoolExhausted)?;

    for &r in GP_SAVE_ORDER.iter() {
        push_reg(&mut buf, r);
    }
    save_simd(&mut buf, simd_width);

    if let (true, Some(ins)) = (patch.uses_prev_ins_2, patch.preceding_ins_2) {
        copy_relocated(&mut buf, text, text_base, ins);
    }
    if let (true, Some(ins)) = (patch.uses_prev_ins, patch.preceding_ins) {
        copy_relocated(&mut buf, text, text_base, ins);
    }

    // Clone-thread detection runs on the live syscall registers, before
    // the dispatcher is ever involved: nr (rax) and arg1 (rsi, the
    // child-stack pointer) are still exactly what the guest left them,
    // mirroring `hook::is_linux_clone_thread`. A matching clone is
    // forwarded straight to the kernel (SPEC_FULL.md §8 item 5), never
    // routed through the syscall hook.
    cmp_reg_imm32(&mut buf, RAX, SYS_CLONE);
    let not_clone_at = emit_jcc(&mut buf, 0x85); // jne -> normal dispatch
    test_reg_self(&mut buf, RSI);
    let no_child_stack_at = emit_jcc(&mut buf, 0x84); // jz -> normal dispatch

    buf.extend_from_slice(&[0x0F, 0x05]); // syscall
    test_reg_self(&mut buf, RAX);
    let parent_side_at = emit_jcc(&mut buf, 0x85); // jnz -> clone parent, rax already the child pid

    // Child side: the kernel has already pointed rsp at the new
    // thread's stack by the time `syscall` returns here, so the GP/XMM
    // frame pushed above belongs to the parent's stack and is not
    // restored -- only the clone-child hook runs before resuming guest
    // code with the clone() child's `0` return value.
    let mut clone_hook_call = [0u8; 10];
    codegen::movabs_r11(&mut clone_hook_call, clone_child_entry as u64);
    buf.extend_from_slice(&clone_hook_call);
    buf.extend_from_slice(&[0x41, 0xFF, 0xD3]); // call r11
    buf.extend_from_slice(&[0x31, 0xC0]); // xor eax, eax
    emit_return_jump(&mut buf, wrapper_addr, return_address);

    patch_rel32(&mut buf, parent_side_at, buf.len());
    let parent_done_at = emit_jmp32(&mut buf); // parent: skip the normal dispatch path entirely

    patch_rel32(&mut buf, not_clone_at, buf.len());
    patch_rel32(&mut buf, no_child_stack_at, buf.len());

    let mut imm = [0u8; 5];
    codegen::push_imm32(&mut imm, patch.syscall_offset);
    buf.extend_from_slice(&imm);

    let mut mov = [0u8; 10];
    codegen::movabs_r11(&mut mov, libpath_ptr as u64);
    buf.extend_from_slice(&mov);
    push_reg(&mut buf, 11);

    // Move the syscall's nr/args -- still live in the registers the
    // guest left them in -- into the C-ABI argument registers
    // `intercept_dispatch(nr, a0..a5)` reads, in dependency order so
    // each source is read before it is overwritten. The seventh
    // parameter (a5) has no register left and goes on the stack,
    // immediately below the call's return address.
    push_reg(&mut buf, R9); // a5 -> 7th stack argument
    mov_reg_reg(&mut buf, R9, R8); // a4 -> r9
    mov_reg_reg(&mut buf, R8, R10); // a3 -> r8
    mov_reg_reg(&mut buf, RCX, RDX); // a2 -> rcx
    mov_reg_reg(&mut buf, RDX, RSI); // a1 -> rdx
    mov_reg_reg(&mut buf, RSI, RDI); // a0 -> rsi
    mov_reg_reg(&mut buf, RDI, RAX); // nr -> rdi

    let mut call_target = [0u8; 10];
    codegen::movabs_r11(&mut call_target, dispatcher as u64);
    buf.extend_from_slice(&call_target);
    buf.extend_from_slice(&[0x41, 0xFF, 0xD3]); // call r11

    buf.extend_from_slice(&[0x48, 0x83, 0xC4, 0x18]); // add rsp, 0x18 (offset+libpath+a5)

    patch_rel32(&mut buf, parent_done_at, buf.len());

    if let (true, Some(ins)) = (patch.uses_next_ins, patch.following_ins) {
        copy_relocated(&mut buf, text, text_base, ins);
    }

    restore_simd(&mut buf, simd_width);
    for &r in GP_SAVE_ORDER.iter().rev() {
        pop_reg(&mut buf, r);
    }

    emit_return_jump(&mut buf, wrapper_addr, return_address);

    if buf.len() > out.len() {
        return Err(EngineError::WrapperPoolExhausted);
    }
    out[..buf.len()].copy_from_slice(&buf);
    for b in out[buf.len()..].iter_mut() {
        *b = TRAP_FILL;
    }
    Ok(buf.len())
}

/// Relative jump to `return_address` if in range, otherwise the
/// absolute-indirect form; `wrapper_addr + buf.len()` is this
/// instruction's own address since it is about to be appended.
fn emit_return_jump(buf: &mut Vec<u8>, wrapper_addr: usize, return_address: usize) {
    let mut jmp = [0u8; 5];
    if codegen::rel_jmp32(&mut jmp, wrapper_addr + buf.len(), return_address).is_some() {
        buf.extend_from_slice(&jmp);
    } else {
        let mut abs = [0u8; 14];
        codegen::abs_jmp(&mut abs, return_address);
        buf.extend_from_slice(&abs);
    }
}

fn copy_relocated(buf: &mut Vec<u8>, text: &[u8], text_base: usize, ins: types::DisasmResult) {
    let start = ins.address.saturating_sub(text_base);
    let end = start + ins.length as usize;
    if end <= text.len() {
        buf.extend_from_slice(&text[start..end]);
    }
}

/// Generates every candidate's wrapper and returns the generated wrapper
/// addresses in the same order as `desc.patches`. Must run, for every
/// object, before `activate_object` is called for any object.
/// `desc.wrapper_dest`/`desc.wrapper_dest_clone_child` must already be
/// set by the driver.
pub fn generate_wrappers(
    pool: &mut WrapperPool,
    desc: &mut ObjDesc,
    text: &[u8],
    simd_width: SimdWidth,
) -> Result<(), EngineError> {
    let libpath = desc.path.as_ptr();
    let dispatcher = desc.wrapper_dest.ok_or(EngineError::WrapperPoolExhausted)?;
    let clone_child_entry = desc
        .wrapper_dest_clone_child
        .ok_or(EngineError::WrapperPoolExhausted)?;
    for patch in desc.patches.iter_mut() {
        let addr = pool.reserve()?;
        let slice = pool.as_mut_slice(addr);
        build_wrapper(
            slice,
            addr,
            patch,
            text,
            desc.text.start,
            dispatcher,
            clone_child_entry,
            libpath,
            simd_width,
        )?;
        patch.asm_wrapper = Some(addr);
    }
    Ok(())
}

/// Commits every planned patch in `desc` to the live text pages. The
/// wrapper pool must already be read-execute (see `WrapperPool::activate`)
/// before this runs.
pub fn activate_object(desc: &mut ObjDesc, no_trampoline: bool) -> Result<(), EngineError> {
    let page_start = rawsys::mem::round_down_to_page(desc.text.start);
    let page_end = rawsys::mem::round_up_to_page(desc.text.end());
    let prot_rwx = rawsys::PROT_READ | rawsys::PROT_WRITE | rawsys::PROT_EXEC;
    let prot_rx = rawsys::PROT_READ | rawsys::PROT_EXEC;

    if !rawsys::mem::mprotect(page_start, page_end - page_start, prot_rwx) {
        return Err(EngineError::Io { what: "mprotect rwx", errno: 0 });
    }

    for i in 0..desc.patches.len() {
        let wrapper = desc.patches[i]
            .asm_wrapper
            .ok_or(EngineError::WrapperPoolExhausted)?;
        let dst = desc.patches[i].dst_jmp_patch.unwrap();

        let target = if no_trampoline {
            wrapper
        } else {
            let area = desc
                .trampoline_area
                .as_mut()
                .ok_or(EngineError::TrampolineExhausted)?;
            let slot = area.next_slot().ok_or(EngineError::TrampolineExhausted)?;
            unsafe {
                let mut abs = [0u8; 14];
                codegen::abs_jmp(&mut abs, wrapper);
                std::ptr::copy_nonoverlapping(abs.as_ptr(), slot as *mut u8, 14);
            }
            slot
        };

        let mut jmp = [0u8; 5];
        let wrote_rel = codegen::rel_jmp32(&mut jmp, dst, target).is_some();
        if wrote_rel {
            unsafe { std::ptr::copy_nonoverlapping(jmp.as_ptr(), dst as *mut u8, 5) };
        } else {
            return Err(EngineError::TrampolineUnreachable { object: desc.path.clone() });
        }

        if desc.patches[i].plan == Some(Plan::NopTrampoline) {
            let nop = desc.patches[i].nop_trampoline.unwrap();
            unsafe {
                let mut s1 = [0u8; 2];
                codegen::short_jmp(&mut s1, desc.patches[i].syscall_addr, dst).unwrap();
                std::ptr::copy_nonoverlapping(s1.as_ptr(), desc.patches[i].syscall_addr as *mut u8, 2);

                let mut s2 = [0u8; 2];
                if codegen::short_jmp(&mut s2, nop.start, nop.end()).is_some() {
                    std::ptr::copy_nonoverlapping(s2.as_ptr(), nop.start as *mut u8, 2);
                }
            }
        } else {
            let fill_start = dst + 5;
            let fill_end = desc.patches[i].return_address.unwrap();
            if fill_end > fill_start {
                unsafe {
                    std::ptr::write_bytes(fill_start as *mut u8, TRAP_FILL, fill_end - fill_start);
                }
            }
        }
    }

    if !rawsys::mem::mprotect(page_start, page_end - page_start, prot_rx) {
        return Err(EngineError::Io { what: "mprotect rx", errno: 0 });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{PatchDesc, Range};

    #[test]
    fn wrapper_is_non_empty_and_fits() {
        let mut desc = ObjDesc::new(0, "x".into(), Range::new(0x1000, 0x10));
        let mut p = PatchDesc::new(0x1004, 4);
        p.return_address = Some(0x1006);
        p.plan = Some(Plan::NopTrampoline);
        desc.patches.push(p);
        desc.wrapper_dest = Some(0x400000);
        desc.wrapper_dest_clone_child = Some(0x401000);

        let mut pool = WrapperPool::new().unwrap();
        let text = [0x90u8; 16];
        generate_wrappers(&mut pool, &mut desc, &text, SimdWidth::Xmm).unwrap();
        assert!(desc.patches[0].asm_wrapper.is_some());
    }
}
