/// One decoded instruction, as produced by the crawler's disassembler
/// adapter. Kept deliberately narrow: only the facts the planner and
/// crawler actually branch on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisasmResult {
    pub address: usize,
    pub length: u8,
    pub is_jump: bool,
    pub is_call: bool,
    pub is_return: bool,
    pub is_syscall: bool,
    pub has_ip_relative_operand: bool,
    pub ip_rel_target: Option<usize>,
    /// Filler instruction of length >= 3 whose leading two bytes the
    /// planner may overwrite with a short jump (Plan A).
    pub is_overwritable_nop: bool,
}

impl DisasmResult {
    pub fn end(&self) -> usize {
        self.address + self.length as usize
    }

    /// Relocatable *before* the syscall: a return here would still be
    /// incorrect (it hasn't run yet), so returns are excluded in this
    /// position. Anything with a jump, call, syscall, or IP-relative
    /// operand can't be blindly relocated either.
    pub fn relocatable_before_syscall(&self) -> bool {
        !self.is_jump
            && !self.is_call
            && !self.is_return
            && !self.is_syscall
            && !self.has_ip_relative_operand
            && !self.is_overwritable_nop
    }

    /// Relocatable *after* the syscall: a `ret` here is fine to relocate,
    /// since by this point the syscall has already executed.
    pub fn relocatable_after_syscall(&self) -> bool {
        !self.is_jump
            && !self.is_call
            && !self.is_syscall
            && !self.has_ip_relative_operand
            && !self.is_overwritable_nop
    }
}
