//! Top-level orchestration: walks the process's loaded objects,
//! builds metadata, crawls, plans, generates wrappers, and activates
//! patches, in the ordering required by SPEC_FULL.md §5. Grounded on
//! `examples/original_source/src/detect_elfs.c`'s `detect_object`/
//! `detect_objects` (`dl_iterate_phdr` driver loop).

use std::ffi::CStr;
use std::os::raw::{c_int, c_void};

use types::{EngineError, ObjDesc};

use crate::config::Config;
use crate::{crawler, hook, logging, obj_meta, planner, trampoline};

/// Owns every patched object descriptor for the rest of the process's
/// life. Never freed.
static mut OBJECTS: Vec<ObjDesc> = Vec::new();
static mut LIBC_FOUND: bool = false;

struct Collected {
    path: String,
    base_addr: usize,
}

extern "C" fn phdr_callback(
    info: *mut libc::dl_phdr_info,
    _size: usize,
    data: *mut c_void,
) -> c_int {
    let collected = unsafe { &mut *(data as *mut Vec<Collected>) };
    let info = unsafe { &*info };
    let path = if info.dlpi_name.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(info.dlpi_name) }
            .to_string_lossy()
            .into_owned()
    };
    // An empty name refers to the main executable itself; resolve it via
    // /proc/self/exe is left to a future enhancement -- for now the main
    // executable (never libc) is simply skipped, matching the upstream
    // library's primary focus on shared objects.
    if !path.is_empty() {
        collected.push(Collected { path, base_addr: info.dlpi_addr as usize });
    }
    0
}

fn collect_objects() -> Vec<Collected> {
    let mut collected = Vec::new();
    unsafe {
        libc::dl_iterate_phdr(Some(phdr_callback), &mut collected as *mut _ as *mut c_void);
    }
    collected
}

fn is_vdso(path: &str) -> bool {
    path.contains("vdso")
}

/// Runs the whole patching pass once. Never returns an error to a
/// caller by design: any fatal condition logs and terminates the
/// process via `rawsys::exit_group`, per SPEC_FULL.md §7.
pub fn run() {
    let config = Config::from_env();
    logging::init(&config.log_target, config.debug_dump);
    log::info!("interceptor: starting patch pass");

    if let Err(err) = run_inner(&config) {
        log::error!("fatal: {err}");
        rawsys::exit_group(1);
    }
}

fn run_inner(config: &Config) -> Result<(), EngineError> {
    let dispatcher = hook::intercept_dispatch as usize;
    let clone_child_entry = hook::intercept_clone_child_entry as usize;
    let simd_width = trampoline::SimdWidth::detect();
    let mut pool = trampoline::WrapperPool::new()?;
    let mut any_patched = false;

    for candidate in collect_objects() {
        if !obj_meta::should_patch_object(&candidate.path, is_vdso(&candidate.path), config.patch_all_objs) {
            log::debug!("skipping object {}", candidate.path);
            continue;
        }

        let (mut desc, text_bytes) = obj_meta::describe_object(&candidate.path, candidate.base_addr)?;
        log::info!("patching object {} text=0x{:x}..0x{:x}", desc.path, desc.text.start, desc.text.end());
        desc.wrapper_dest = Some(dispatcher);
        desc.wrapper_dest_clone_child = Some(clone_child_entry);

        if obj_meta::short_name(&desc.path) == "libc" {
            unsafe {
                #[allow(static_mut_refs)]
                {
                    LIBC_FOUND = true;
                }
            }
        }

        let outcome = crawler::crawl(&text_bytes, desc.text, &mut desc.jump_table);
        desc.patches = outcome.patches;
        desc.nop_table = outcome.nop_table;

        planner::plan_object(&mut desc)?;

        if !config.no_trampoline {
            let area = trampoline::allocate_trampoline_area(desc.text.start, desc.text.end())?;
            desc.trampoline_area = Some(area);
        }

        trampoline::generate_wrappers(&mut pool, &mut desc, &text_bytes, simd_width)?;

        unsafe {
            #[allow(static_mut_refs)]
            {
                OBJECTS.push(desc);
            }
        }
        any_patched = true;
    }

    if !unsafe {
        #[allow(static_mut_refs)]
        {
            LIBC_FOUND
        }
    } {
        return Err(EngineError::LibcNotFound);
    }

    if !any_patched {
        return Ok(());
    }

    pool.activate();

    unsafe {
        #[allow(static_mut_refs)]
        for desc in OBJECTS.iter_mut() {
            trampoline::activate_object(desc, config.no_trampoline)?;
        }
    }

    log::info!("interceptor: patch pass complete");
    Ok(())
}
