//! Thin adapter implementing the spec's `init`/`next`/`destroy`
//! disassembler contract on top of `iced-x86`. The crawler never touches
//! `iced_x86` types directly so the decoder could be swapped later
//! without touching Component C's algorithm.

use iced_x86::{Decoder, DecoderOptions, FlowControl, Mnemonic};
use types::DisasmResult;

pub struct DisasmCtx<'a> {
    decoder: Decoder<'a>,
}

/// Builds a decoding context over `data`, which is assumed to start at
/// virtual address `ip`.
pub fn init(data: &[u8], ip: u64) -> DisasmCtx<'_> {
    DisasmCtx {
        decoder: Decoder::with_ip(64, data, ip, DecoderOptions::NONE),
    }
}

/// Decodes one instruction at the decoder's current position and
/// advances past it. Returns `None` once the underlying buffer is
/// exhausted. A zero-length (undecodable) instruction still advances the
/// decoder by at least one byte, matching iced-x86's own recovery
/// behaviour for invalid opcodes.
pub fn next(ctx: &mut DisasmCtx<'_>) -> Option<DisasmResult> {
    if !ctx.decoder.can_decode() {
        return None;
    }
    let addr = ctx.decoder.ip() as usize;
    let instr = ctx.decoder.decode();
    let length = instr.len() as u8;

    let flow = instr.flow_control();
    let is_jump = matches!(
        flow,
        FlowControl::UnconditionalBranch | FlowControl::ConditionalBranch | FlowControl::IndirectBranch
    );
    let is_call = matches!(flow, FlowControl::Call | FlowControl::IndirectCall);
    let is_return = matches!(flow, FlowControl::Return);
    let is_syscall = instr.mnemonic() == Mnemonic::Syscall;

    let has_ip_relative_operand = instr.is_ip_rel_memory_operand();
    let ip_rel_target = if has_ip_relative_operand {
        Some(instr.ip_rel_memory_address() as usize)
    } else if is_jump || is_call {
        let target = instr.near_branch_target();
        if target != 0 {
            Some(target as usize)
        } else {
            None
        }
    } else {
        None
    };

    let is_overwritable_nop = instr.mnemonic() == Mnemonic::Nop && length >= 3;

    Some(DisasmResult {
        address: addr,
        length,
        is_jump,
        is_call,
        is_return,
        is_syscall,
        has_ip_relative_operand,
        ip_rel_target,
        is_overwritable_nop,
    })
}

pub fn destroy(_ctx: DisasmCtx<'_>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nop_syscall_ret() {
        // 90 = nop; 0f 05 = syscall; c3 = ret
        let bytes = [0x90u8, 0x0f, 0x05, 0xc3];
        let mut ctx = init(&bytes, 0x1000);
        let i0 = next(&mut ctx).unwrap();
        assert_eq!(i0.length, 1);
        assert!(!i0.is_syscall);

        let i1 = next(&mut ctx).unwrap();
        assert_eq!(i1.address, 0x1001);
        assert_eq!(i1.length, 2);
        assert!(i1.is_syscall);

        let i2 = next(&mut ctx).unwrap();
        assert!(i2.is_return);

        assert!(next(&mut ctx).is_none());
    }
}
