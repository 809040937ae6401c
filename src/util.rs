use nix::unistd::sysconf;
use nix::unistd::SysconfVar::PAGE_SIZE;
use raw_cpuid::CpuId;
use std::convert::TryInto;
use std::env;

lazy_static! {
    static ref SYSTEM_PAGE_SIZE: usize = page_size_init();
}

/// Set in tracee environments we spawn; lets the preload library detect
/// that it is being recorded by an outer retrace.
pub fn running_under_retrace() -> bool {
    env::var("RUNNING_UNDER_RETRACE").is_ok()
}

fn page_size_init() -> usize {
    sysconf(PAGE_SIZE).unwrap().unwrap().try_into().unwrap()
}

pub fn page_size() -> usize {
    *SYSTEM_PAGE_SIZE
}

pub fn ceil_page_size(size: usize) -> usize {
    (size + page_size() - 1) & !(page_size() - 1)
}

pub fn floor_page_size(size: usize) -> usize {
    size & !(page_size() - 1)
}

/// True when running under a hypervisor. Virtualized performance
/// counters have known delivery quirks, so the desched-counter sanity
/// check is advisory there instead of fatal.
pub fn running_under_hypervisor() -> bool {
    let cpuid = CpuId::new();
    match cpuid.get_feature_info() {
        Some(info) => info.has_hypervisor(),
        None => false,
    }
}

/// Write all of `buf` to `fd` at `offset`, retrying short writes.
/// Returns the byte count written before any unrecoverable error.
pub fn pwrite_all_fallible(fd: i32, buf_initial: &[u8], offset: isize) -> Result<usize, ()> {
    let mut buf = buf_initial;
    let mut written: usize = 0;
    while !buf.is_empty() {
        let nwritten = unsafe {
            libc::pwrite64(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                (offset + written as isize) as i64,
            )
        };
        if nwritten <= 0 {
            if written > 0 {
                return Ok(written);
            }
            return Err(());
        }
        written += nwritten as usize;
        buf = &buf[nwritten as usize..];
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        let ps = page_size();
        assert_eq!(0, ceil_page_size(0));
        assert_eq!(ps, ceil_page_size(1));
        assert_eq!(ps, ceil_page_size(ps));
        assert_eq!(0, floor_page_size(ps - 1));
        assert_eq!(ps, floor_page_size(ps + 1));
    }
}
