use core::fmt;

/// The closed set of fatal conditions that terminate the process through
/// the raw-syscall exit path rather than unwinding. See SPEC_FULL.md §7.
#[derive(Debug)]
pub enum EngineError {
    Io { what: &'static str, errno: i32 },
    ElfParse(String),
    LibcNotFound,
    NoTextSection(String),
    TrampolineUnreachable { object: String },
    TrampolineExhausted,
    WrapperPoolExhausted,
    PatchWindowTooSmall { object: String, syscall_offset: u32 },
    Unsupported(&'static str),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Io { what, errno } => write!(f, "{what} failed, errno {errno}"),
            EngineError::ElfParse(msg) => write!(f, "ELF parse error: {msg}"),
            EngineError::LibcNotFound => write!(f, "libc not found among loaded objects"),
            EngineError::NoTextSection(path) => write!(f, "no text section in {path}"),
            EngineError::TrampolineUnreachable { object } => {
                write!(f, "no trampoline slot reachable within +-2GiB for {object}")
            }
            EngineError::TrampolineExhausted => write!(f, "trampoline area exhausted"),
            EngineError::WrapperPoolExhausted => write!(f, "wrapper pool exhausted"),
            EngineError::PatchWindowTooSmall { object, syscall_offset } => write!(
                f,
                "unintercepted syscall at: {object} 0x{syscall_offset:x}"
            ),
            EngineError::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

impl std::error::Error for EngineError {}
