use crate::syscall;

pub const O_RDONLY: i32 = 0o0;
pub const O_WRONLY: i32 = 0o1;
pub const O_CREAT: i32 = 0o100;
pub const O_TRUNC: i32 = 0o1000;
pub const O_APPEND: i32 = 0o2000;

pub const STDERR_FD: i32 = 2;

/// Writes the whole buffer, looping over short writes. Returns `false`
/// on the first hard error.
pub fn write_all(fd: i32, mut buf: &[u8]) -> bool {
    while !buf.is_empty() {
        let ret = unsafe { syscall::write(fd, buf.as_ptr(), buf.len()) };
        if syscall::errno_of(ret).is_some() {
            return false;
        }
        let n = ret as usize;
        if n == 0 {
            return false;
        }
        buf = &buf[n..];
    }
    true
}

/// Opens `path` (must be NUL-terminated) and returns the fd, or `None`.
pub fn open_path(path: &str, flags: i32, mode: i32) -> Option<i32> {
    let mut buf = [0u8; 256];
    let bytes = path.as_bytes();
    if bytes.len() + 1 > buf.len() {
        return None;
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    let ret = unsafe { syscall::open(buf.as_ptr(), flags, mode) };
    if syscall::errno_of(ret).is_some() {
        None
    } else {
        Some(ret as i32)
    }
}

/// Reads the whole contents of `path` into an anonymous-mapped buffer
/// sized from `lseek(SEEK_END)`. Used for one-shot metadata files
/// (`/proc/self/maps`, ELF images) where a normal `Vec` would reach for
/// the host allocator.
pub fn read_file_anon(path: &str) -> Option<(*mut u8, usize)> {
    let fd = open_path(path, O_RDONLY, 0)?;
    let size = unsafe { syscall::lseek(fd, 0, 2 /* SEEK_END */) };
    let size = syscall::errno_of(size).map_or(Some(size as usize), |_| None)?;
    unsafe {
        syscall::lseek(fd, 0, 0 /* SEEK_SET */);
    }
    let alloc_size = crate::mem::round_up_to_page(size.max(1));
    let ptr = crate::mem::mmap_anon(
        0,
        alloc_size,
        crate::mem::PROT_READ | crate::mem::PROT_WRITE,
        false,
    )?;
    let mut off = 0usize;
    loop {
        let n = unsafe { syscall::read(fd, (ptr + off) as *mut u8, alloc_size - off) };
        if syscall::errno_of(n).is_some() || n == 0 {
            break;
        }
        off += n as usize;
        if off >= alloc_size {
            break;
        }
    }
    unsafe {
        syscall::close(fd);
    }
    Some((ptr as *mut u8, off))
}

/// `/proc/self/maps` can't be seeked to discover a size, so this reads
/// into a generously sized anonymous buffer (4MiB, far beyond any
/// realistic map listing) instead.
pub fn read_proc_self_maps_anon() -> Option<(*mut u8, usize)> {
    const CAP: usize = 4 * 1024 * 1024;
    let fd = open_path("/proc/self/maps", O_RDONLY, 0)?;
    let ptr = crate::mem::mmap_anon(
        0,
        CAP,
        crate::mem::PROT_READ | crate::mem::PROT_WRITE,
        false,
    )?;
    let mut off = 0usize;
    loop {
        let n = unsafe { syscall::read(fd, (ptr + off) as *mut u8, CAP - off) };
        if syscall::errno_of(n).is_some() || n == 0 {
            break;
        }
        off += n as usize;
        if off >= CAP {
            break;
        }
    }
    unsafe {
        syscall::close(fd);
    }
    Some((ptr as *mut u8, off))
}
