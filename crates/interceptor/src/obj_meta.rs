//! Component B: object-metadata provider. Parses one loaded ELF shared
//! object's on-disk image to locate its text section and seed the
//! jump-target bitmap. Grounded on
//! `examples/original_source/src/analyze_elfs.c` (`find_sections`,
//! `find_jumps_in_section_syms`, `find_jumps_in_section_rela`) and
//! `src/detect_elfs.c` (`should_patch_object`, `get_lib_short_name`).

use goblin::elf::Elf;
use goblin::elf::reloc::R_X86_64_RELATIVE;
use types::{EngineError, ObjDesc, Range};

const SELF_NAMES: &[&str] = &["libinterceptor", "interceptor"];
const DISASSEMBLER_NAMES: &[&str] = &["libcapstone", "iced_x86"];

/// Short name of an object path, e.g. `/lib/x86_64-linux-gnu/libc.so.6`
/// -> `libc`. Mirrors the upstream `get_lib_short_name`: strip the
/// directory, strip a trailing `.so` and any `-x.y.z`/`.so.N` version
/// suffix.
pub fn short_name(path: &str) -> String {
    let file = path.rsplit('/').next().unwrap_or(path);
    let base = file.split(".so").next().unwrap_or(file);
    base.trim_end_matches(|c: char| c == '-' || c.is_ascii_digit() || c == '.')
        .to_string()
}

fn str_match(name: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| name == *c)
}

/// Object-selection policy: never patch the interceptor itself, its
/// disassembler, or the vDSO. In libc-only mode (the default) only
/// `libc`/`libpthread` are selected; `INTERCEPT_ALL_OBJS` widens that to
/// everything else not excluded above.
pub fn should_patch_object(path: &str, is_vdso: bool, patch_all_objs: bool) -> bool {
    if is_vdso {
        return false;
    }
    let name = short_name(path);
    if str_match(&name, SELF_NAMES) || str_match(&name, DISASSEMBLER_NAMES) {
        return false;
    }
    if name == "libc" {
        return true;
    }
    if patch_all_objs {
        return true;
    }
    name == "libpthread"
}

/// Parses `path`'s ELF image and builds an `ObjDesc` with its text range
/// and seeded jump table. `base_addr` is the object's runtime load
/// address as reported by the dynamic loader.
pub fn describe_object(path: &str, base_addr: usize) -> Result<(ObjDesc, Vec<u8>), EngineError> {
    let (ptr, len) = rawsys::io::read_file_anon(path)
        .ok_or(EngineError::Io { what: "open object file", errno: 0 })?;
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec();

    let elf = Elf::parse(&bytes).map_err(|e| EngineError::ElfParse(e.to_string()))?;

    let text_section = elf
        .section_headers
        .iter()
        .enumerate()
        .find(|(_, sh)| elf.shdr_strtab.get_at(sh.sh_name as usize) == Some(".text"))
        .ok_or_else(|| EngineError::NoTextSection(path.to_string()))?;
    let (text_idx, text_sh) = text_section;

    let text_start = base_addr + text_sh.sh_addr as usize;
    let text_end = text_start + text_sh.sh_size as usize;
    let text = Range::new(text_start, text_sh.sh_size as usize);

    let mut desc = ObjDesc::new(base_addr, path.to_string(), text);

    // Production shared objects (e.g. a stripped libc.so.6) often carry
    // only .dynsym; .symtab may be empty or absent entirely, so both
    // tables are scanned for STT_FUNC entries.
    for sym in elf.syms.iter().chain(elf.dynsyms.iter()) {
        if sym.st_type() != goblin::elf::sym::STT_FUNC {
            continue;
        }
        if sym.st_shndx as usize != text_idx {
            continue;
        }
        let entry = base_addr + sym.st_value as usize;
        desc.jump_table.mark(entry);
        if sym.st_size > 0 {
            desc.jump_table.mark(entry + sym.st_size as usize);
        }
    }

    for reloc in elf.dynrelas.iter().chain(elf.pltrelocs.iter()) {
        if reloc.r_type == R_X86_64_RELATIVE {
            if let Some(addend) = reloc.r_addend {
                desc.jump_table.mark(base_addr + addend as usize);
            }
        }
    }

    let text_bytes = bytes[text_sh.sh_offset as usize..(text_sh.sh_offset + text_sh.sh_size) as usize].to_vec();
    Ok((desc, text_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_strips_version_suffix() {
        assert_eq!(short_name("/lib/x86_64-linux-gnu/libc.so.6"), "libc");
        assert_eq!(short_name("/usr/lib/libpthread-2.31.so"), "libpthread");
    }

    #[test]
    fn policy_excludes_self_and_vdso() {
        assert!(!should_patch_object("linux-vdso.so.1", true, false));
        assert!(!should_patch_object("/x/libinterceptor.so", false, true));
        assert!(should_patch_object("/lib/libc.so.6", false, false));
        assert!(!should_patch_object("/lib/libm.so.6", false, false));
        assert!(should_patch_object("/lib/libm.so.6", false, true));
    }
}
