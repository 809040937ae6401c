use crate::kernel_abi::{SupportedArch, NATIVE_ARCH};
use crate::remote_ptr::{RemotePtr, Void};
use libc::user_regs_struct;
use std::fmt;

/// Error codes the kernel uses to mark an interrupted syscall that may
/// be transparently restarted.
const ERESTARTSYS: isize = -512;
const ERESTARTNOINTR: isize = -513;
const ERESTARTNOHAND: isize = -514;
const ERESTART_RESTARTBLOCK: isize = -516;

/// A tracee's register file, with accessors named for roles rather than
/// raw register names so arbiter code reads the same on both
/// architectures.
#[derive(Copy, Clone)]
pub struct Registers {
    regs: user_regs_struct,
}

impl Default for Registers {
    fn default() -> Self {
        Registers {
            regs: unsafe { std::mem::zeroed() },
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl Registers {
    pub fn arch(&self) -> SupportedArch {
        NATIVE_ARCH
    }

    pub fn from_ptrace(regs: user_regs_struct) -> Registers {
        Registers { regs }
    }

    pub fn get_ptrace(&self) -> user_regs_struct {
        self.regs
    }

    pub fn ip(&self) -> RemotePtr<Void> {
        RemotePtr::from_val(self.regs.rip as usize)
    }

    pub fn set_ip(&mut self, addr: RemotePtr<Void>) {
        self.regs.rip = addr.as_usize() as u64;
    }

    pub fn sp(&self) -> RemotePtr<Void> {
        RemotePtr::from_val(self.regs.rsp as usize)
    }

    pub fn set_sp(&mut self, addr: RemotePtr<Void>) {
        self.regs.rsp = addr.as_usize() as u64;
    }

    /// The syscall number as of syscall entry; survives the kernel's
    /// clobber of the result register.
    pub fn original_syscallno(&self) -> isize {
        self.regs.orig_rax as isize
    }

    pub fn set_original_syscallno(&mut self, syscallno: isize) {
        self.regs.orig_rax = syscallno as u64;
    }

    pub fn syscallno(&self) -> isize {
        self.regs.rax as isize
    }

    pub fn set_syscallno(&mut self, syscallno: isize) {
        self.regs.rax = syscallno as u64;
    }

    pub fn syscall_result(&self) -> usize {
        self.regs.rax as usize
    }

    pub fn syscall_result_signed(&self) -> isize {
        self.regs.rax as isize
    }

    pub fn set_syscall_result(&mut self, result: usize) {
        self.regs.rax = result as u64;
    }

    pub fn set_syscall_result_signed(&mut self, result: isize) {
        self.regs.rax = result as u64;
    }

    pub fn arg1(&self) -> usize {
        self.regs.rdi as usize
    }
    pub fn arg2(&self) -> usize {
        self.regs.rsi as usize
    }
    pub fn arg3(&self) -> usize {
        self.regs.rdx as usize
    }
    pub fn arg4(&self) -> usize {
        self.regs.r10 as usize
    }
    pub fn arg5(&self) -> usize {
        self.regs.r8 as usize
    }
    pub fn arg6(&self) -> usize {
        self.regs.r9 as usize
    }

    pub fn set_arg1(&mut self, value: usize) {
        self.regs.rdi = value as u64;
    }
    pub fn set_arg2(&mut self, value: usize) {
        self.regs.rsi = value as u64;
    }
    pub fn set_arg3(&mut self, value: usize) {
        self.regs.rdx = value as u64;
    }
    pub fn set_arg4(&mut self, value: usize) {
        self.regs.r10 = value as u64;
    }
    pub fn set_arg5(&mut self, value: usize) {
        self.regs.r8 = value as u64;
    }
    pub fn set_arg6(&mut self, value: usize) {
        self.regs.r9 = value as u64;
    }
}

#[cfg(target_arch = "x86")]
impl Registers {
    pub fn arch(&self) -> SupportedArch {
        NATIVE_ARCH
    }

    pub fn from_ptrace(regs: user_regs_struct) -> Registers {
        Registers { regs }
    }

    pub fn get_ptrace(&self) -> user_regs_struct {
        self.regs
    }

    pub fn ip(&self) -> RemotePtr<Void> {
        RemotePtr::from_val(self.regs.eip as usize)
    }

    pub fn set_ip(&mut self, addr: RemotePtr<Void>) {
        self.regs.eip = addr.as_usize() as i32;
    }

    pub fn sp(&self) -> RemotePtr<Void> {
        RemotePtr::from_val(self.regs.esp as usize)
    }

    pub fn set_sp(&mut self, addr: RemotePtr<Void>) {
        self.regs.esp = addr.as_usize() as i32;
    }

    pub fn original_syscallno(&self) -> isize {
        self.regs.orig_eax as isize
    }

    pub fn set_original_syscallno(&mut self, syscallno: isize) {
        self.regs.orig_eax = syscallno as i32;
    }

    pub fn syscallno(&self) -> isize {
        self.regs.eax as isize
    }

    pub fn set_syscallno(&mut self, syscallno: isize) {
        self.regs.eax = syscallno as i32;
    }

    pub fn syscall_result(&self) -> usize {
        self.regs.eax as usize
    }

    pub fn syscall_result_signed(&self) -> isize {
        self.regs.eax as isize
    }

    pub fn set_syscall_result(&mut self, result: usize) {
        self.regs.eax = result as i32;
    }

    pub fn set_syscall_result_signed(&mut self, result: isize) {
        self.regs.eax = result as i32;
    }

    pub fn arg1(&self) -> usize {
        self.regs.ebx as usize
    }
    pub fn arg2(&self) -> usize {
        self.regs.ecx as usize
    }
    pub fn arg3(&self) -> usize {
        self.regs.edx as usize
    }
    pub fn arg4(&self) -> usize {
        self.regs.esi as usize
    }
    pub fn arg5(&self) -> usize {
        self.regs.edi as usize
    }
    pub fn arg6(&self) -> usize {
        self.regs.ebp as usize
    }

    pub fn set_arg1(&mut self, value: usize) {
        self.regs.ebx = value as i32;
    }
    pub fn set_arg2(&mut self, value: usize) {
        self.regs.ecx = value as i32;
    }
    pub fn set_arg3(&mut self, value: usize) {
        self.regs.edx = value as i32;
    }
    pub fn set_arg4(&mut self, value: usize) {
        self.regs.esi = value as i32;
    }
    pub fn set_arg5(&mut self, value: usize) {
        self.regs.edi = value as i32;
    }
    pub fn set_arg6(&mut self, value: usize) {
        self.regs.ebp = value as i32;
    }
}

impl Registers {
    pub fn syscall_failed(&self) -> bool {
        let result = self.syscall_result_signed();
        -4096 < result && result < 0
    }

    /// Did the kernel mark this syscall for transparent restart?
    pub fn syscall_may_restart(&self) -> bool {
        matches!(
            self.syscall_result_signed(),
            ERESTARTSYS | ERESTARTNOINTR | ERESTARTNOHAND | ERESTART_RESTARTBLOCK
        )
    }

    /// Copy the six syscall argument registers from `src`, leaving every
    /// other register alone. Used to hide tracer-fudged args from the
    /// trace.
    pub fn copy_syscall_args_from(&mut self, src: &Registers) {
        self.set_arg1(src.arg1());
        self.set_arg2(src.arg2());
        self.set_arg3(src.arg3());
        self.set_arg4(src.arg4());
        self.set_arg5(src.arg5());
        self.set_arg6(src.arg6());
    }

    /// Register equality as observed at syscall entry: instruction
    /// pointer, stack, syscall number, and argument registers. Replay
    /// uses this to detect divergence.
    pub fn matches_at_syscall_entry(&self, other: &Registers) -> bool {
        self.ip() == other.ip()
            && self.sp() == other.sp()
            && self.original_syscallno() == other.original_syscallno()
            && self.arg1() == other.arg1()
            && self.arg2() == other.arg2()
            && self.arg3() == other.arg3()
            && self.arg4() == other.arg4()
            && self.arg5() == other.arg5()
            && self.arg6() == other.arg6()
    }
}

impl fmt::Debug for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registers {{ ip: {}, sp: {}, orig_syscallno: {}, result: {:#x}, args: [{:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}] }}",
            self.ip(),
            self.sp(),
            self.original_syscallno(),
            self.syscall_result(),
            self.arg1(),
            self.arg2(),
            self.arg3(),
            self.arg4(),
            self.arg5(),
            self.arg6()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_round_trip() {
        let mut r = Registers::default();
        r.set_syscall_result_signed(-libc::EINTR as isize);
        assert!(r.syscall_failed());
        assert_eq!(-(libc::EINTR as isize), r.syscall_result_signed());
    }

    #[test]
    fn restart_detection() {
        let mut r = Registers::default();
        r.set_syscall_result_signed(ERESTARTSYS);
        assert!(r.syscall_may_restart());
        r.set_syscall_result_signed(-(libc::EINTR as isize));
        assert!(!r.syscall_may_restart());
        r.set_syscall_result_signed(0);
        assert!(!r.syscall_may_restart());
    }

    #[test]
    fn entry_comparison_ignores_result() {
        let mut a = Registers::default();
        a.set_ip(RemotePtr::from_val(0x1000));
        a.set_original_syscallno(42);
        a.set_arg1(7);
        let mut b = a;
        b.set_syscall_result(999);
        assert!(a.matches_at_syscall_entry(&b));
        b.set_arg1(8);
        assert!(!a.matches_at_syscall_entry(&b));
    }
}
