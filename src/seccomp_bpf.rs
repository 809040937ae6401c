//! The kernel-level callsite filter. Installed once per tracee process;
//! applies to the installing thread and every descendant.
//!
//! The decision order for every syscall is:
//! 1. syscalls entered from the untraced callsite pass straight to the
//!    kernel;
//! 2. clone, fork and restart_syscall pass (they have their own ptrace
//!    events; tracing them here would double-stop);
//! 3. everything else raises a ptrace-syscall-stop to the tracer.
//!
//! Anchoring on the callsite, a single fixed instruction address, gives
//! the tracer one stable classification of "untraced" that is immune to
//! tracee games with syscall numbers.

use crate::bindings::kernel::{
    seccomp_data, sock_filter, sock_fprog, BPF_ABS, BPF_JEQ, BPF_JMP, BPF_K, BPF_LD, BPF_RET,
    BPF_W, SECCOMP_MODE_FILTER, SECCOMP_RET_ALLOW, SECCOMP_RET_DATA, SECCOMP_RET_TRACE,
};
use std::convert::TryInto;

fn bpf_stmt(code: u16, k: u32) -> sock_filter {
    sock_filter {
        code,
        jt: 0,
        jf: 0,
        k,
    }
}

fn bpf_jump(code: u16, k: u32, jt: u8, jf: u8) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

#[derive(Clone, Default)]
pub struct SeccompFilter {
    pub filters: Vec<sock_filter>,
}

impl SeccompFilter {
    pub fn new() -> SeccompFilter {
        SeccompFilter {
            filters: Vec::new(),
        }
    }

    pub fn allow(&mut self) {
        self.filters
            .push(bpf_stmt(BPF_RET + BPF_K, SECCOMP_RET_ALLOW));
    }

    pub fn trace(&mut self) {
        self.filters
            .push(bpf_stmt(BPF_RET + BPF_K, SECCOMP_RET_TRACE | SECCOMP_RET_DATA));
    }

    /// Load the syscall number into the accumulator; subsequent
    /// `allow_syscall` jumps test against it.
    pub fn examine_syscall(&mut self) {
        let nr_offset: u32 = offset_of!(seccomp_data, nr) as u32;
        self.filters.push(bpf_stmt(BPF_LD + BPF_W + BPF_ABS, nr_offset));
    }

    pub fn allow_syscall(&mut self, syscallno: i32) {
        self.filters
            .push(bpf_jump(BPF_JMP + BPF_JEQ + BPF_K, syscallno as u32, 0, 1));
        self.allow();
    }

    pub fn allow_syscalls_from_callsite(&mut self, ip: usize) {
        let ip_offset: u32 = offset_of!(seccomp_data, instruction_pointer) as u32;
        let v: u32 = ip.try_into().unwrap();
        self.filters.push(bpf_stmt(BPF_LD + BPF_W + BPF_ABS, ip_offset));
        self.filters.push(bpf_jump(BPF_JMP + BPF_JEQ + BPF_K, v, 0, 1));
        self.allow();
    }

    pub fn as_fprog(&self) -> sock_fprog {
        sock_fprog {
            len: self.filters.len() as u16,
            filter: self.filters.as_ptr(),
        }
    }
}

/// Build the callsite filter program for `untraced_entry_ip`.
pub fn callsite_filter_program(untraced_entry_ip: usize) -> SeccompFilter {
    use crate::kernel_abi::native;

    let mut filter = SeccompFilter::new();
    filter.allow_syscalls_from_callsite(untraced_entry_ip);
    filter.examine_syscall();
    // If these were traced we would get a SIGSTOP after child creation;
    // they are captured by their own ptrace events instead.
    filter.allow_syscall(native::CLONE);
    filter.allow_syscall(native::FORK);
    // Tracing restart_syscall misfires when the restarted syscall is in
    // the wrapper.
    filter.allow_syscall(native::RESTART_SYSCALL);
    // All the rest are handled by the tracer.
    filter.trace();
    filter
}

/// Program the kernel filter into the calling process. Returns the raw
/// result of each prctl; the caller treats failure as fatal to the
/// tracee, since a process recorded without the filter cannot be
/// recorded correctly.
///
/// # Safety
/// Affects the whole process irreversibly; the caller must be the
/// tracee-side preload initialization path.
pub unsafe fn install_filter(
    untraced_entry_ip: usize,
    prctl: unsafe fn(i32, usize, usize, usize, usize) -> isize,
) -> Result<(), &'static str> {
    let filter = callsite_filter_program(untraced_entry_ip);
    let prog = filter.as_fprog();

    if prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
        return Err("prctl(NO_NEW_PRIVS) failed; seccomp filtering is unavailable");
    }
    // The filter is installed only during recording; this prctl is
    // emulated during replay.
    if prctl(
        libc::PR_SET_SECCOMP,
        SECCOMP_MODE_FILTER,
        &prog as *const sock_fprog as usize,
        0,
        0,
    ) != 0
    {
        return Err("prctl(SECCOMP) failed; seccomp filtering is unavailable");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::kernel::{SECCOMP_RET_ALLOW, SECCOMP_RET_TRACE};
    use crate::kernel_abi::native;

    fn returns(filter: &SeccompFilter) -> Vec<u32> {
        filter
            .filters
            .iter()
            .filter(|insn| insn.code == BPF_RET + BPF_K)
            .map(|insn| insn.k)
            .collect()
    }

    #[test]
    fn program_shape() {
        let prog = callsite_filter_program(0x7000_0000);
        // Two loads: the instruction pointer, then the syscall number.
        let loads: Vec<&sock_filter> = prog
            .filters
            .iter()
            .filter(|insn| insn.code == BPF_LD + BPF_W + BPF_ABS)
            .collect();
        assert_eq!(2, loads.len());
        assert_eq!(8, loads[0].k);
        assert_eq!(0, loads[1].k);

        // Callsite allow, three syscall allows, final trace.
        let rets = returns(&prog);
        assert_eq!(5, rets.len());
        assert_eq!(SECCOMP_RET_ALLOW, rets[0]);
        assert!(rets[1..4].iter().all(|&k| k == SECCOMP_RET_ALLOW));
        assert_eq!(SECCOMP_RET_TRACE | SECCOMP_RET_DATA, rets[4]);
    }

    #[test]
    fn allowed_syscall_numbers() {
        let prog = callsite_filter_program(0x1000);
        let jumps: Vec<u32> = prog
            .filters
            .iter()
            .filter(|insn| insn.code == BPF_JMP + BPF_JEQ + BPF_K)
            .map(|insn| insn.k)
            .collect();
        // First jump tests the callsite ip, the rest the syscall allows.
        assert_eq!(0x1000, jumps[0]);
        assert_eq!(
            vec![
                native::CLONE as u32,
                native::FORK as u32,
                native::RESTART_SYSCALL as u32
            ],
            jumps[1..].to_vec()
        );
    }

    #[test]
    fn callsite_check_precedes_syscall_checks() {
        let prog = callsite_filter_program(0x1000);
        // The very first instruction must load the instruction pointer:
        // the callsite decision dominates everything else.
        assert_eq!(BPF_LD + BPF_W + BPF_ABS, prog.filters[0].code);
        assert_eq!(8, prog.filters[0].k);
    }
}
