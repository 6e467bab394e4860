/// Mirrors the ABI-visible layout a wrapper stub stamps before calling the
/// dispatcher: syscall number, six raw argument registers, the syscall's
/// file offset, and a pointer to the owning object's path. The offset and
/// libpath fields exist so a hook can produce a useful log line without a
/// back-reference to the `ObjDesc` that owns the site.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SyscallDesc {
    pub nr: i64,
    pub args: [i64; 6],
    pub offset: u32,
    pub libpath: *const u8,
}

const _: () = assert!(core::mem::size_of::<SyscallDesc>() <= 8 * 10);

unsafe impl Send for SyscallDesc {}
unsafe impl Sync for SyscallDesc {}
