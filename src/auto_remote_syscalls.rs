use crate::kernel_metadata::syscall_name;
use crate::kernel_abi::NATIVE_ARCH;
use crate::log::LogDebug;
use crate::registers::Registers;
use crate::remote_ptr::{RemotePtr, Void};
use crate::session::task::{ResumeRequest, Task, WaitRequest};

#[cfg(target_arch = "x86_64")]
const SYSCALL_INSN: [u8; 2] = [0x0f, 0x05];
#[cfg(target_arch = "x86")]
const SYSCALL_INSN: [u8; 2] = [0xcd, 0x80];

/// RAII helper to inject syscalls into a stopped tracee. A syscall
/// instruction is patched over the tracee's current code; every
/// injected call executes from there. Dropping restores the replaced
/// bytes and the task's registers, so *all* register changes made
/// through `initial_regs_mut` are intentional state the caller wants to
/// persist only for the injection window.
///
/// The caller must ensure the tracee receives no signals while remote
/// syscalls are in flight; this code does not attempt to deal with
/// them.
pub struct AutoRemoteSyscalls<'a> {
    task: &'a mut Task,
    initial_regs: Registers,
    syscall_insn_ip: RemotePtr<Void>,
    replaced_bytes: [u8; 2],
}

impl<'a> AutoRemoteSyscalls<'a> {
    pub fn new(task: &'a mut Task) -> AutoRemoteSyscalls<'a> {
        let initial_regs = *task.regs();
        let syscall_insn_ip = initial_regs.ip();
        let mut replaced_bytes = [0u8; 2];
        task.read_bytes(syscall_insn_ip, &mut replaced_bytes);
        task.write_bytes(syscall_insn_ip, &SYSCALL_INSN);
        AutoRemoteSyscalls {
            task,
            initial_regs,
            syscall_insn_ip,
            replaced_bytes,
        }
    }

    /// "Initial" registers saved from the target task.
    pub fn initial_regs_ref(&self) -> &Registers {
        &self.initial_regs
    }

    pub fn initial_regs_mut(&mut self) -> &mut Registers {
        &mut self.initial_regs
    }

    pub fn task_mut(&mut self) -> &mut Task {
        self.task
    }

    /// Execute `syscallno` remotely with up to six arguments; returns
    /// the raw kernel result (negative errno on failure, -ESRCH if the
    /// task died).
    pub fn syscall(&mut self, syscallno: i32, args: &[usize]) -> isize {
        debug_assert!(args.len() <= 6);
        log!(
            LogDebug,
            "injecting {} into {}",
            syscall_name(syscallno, NATIVE_ARCH),
            self.task.tid
        );

        let mut regs = self.initial_regs;
        regs.set_ip(self.syscall_insn_ip);
        regs.set_syscallno(syscallno as isize);
        let setters: [fn(&mut Registers, usize); 6] = [
            Registers::set_arg1,
            Registers::set_arg2,
            Registers::set_arg3,
            Registers::set_arg4,
            Registers::set_arg5,
            Registers::set_arg6,
        ];
        for (i, arg) in args.iter().enumerate() {
            setters[i](&mut regs, *arg);
        }
        self.task.set_regs(&regs);

        // Step through syscall entry, then exit. Injected clone/fork
        // raises its ptrace event between the two; skip past it.
        for _ in 0..2 {
            loop {
                self.task.resume_execution(
                    ResumeRequest::ResumeSyscall,
                    WaitRequest::ResumeWait,
                    None,
                );
                let status = self.task.status();
                if status.exit_code().is_some() || status.fatal_sig().is_some() {
                    return -(libc::ESRCH as isize);
                }
                if status.is_syscall() {
                    break;
                }
            }
        }

        self.task.regs().syscall_result_signed()
    }
}

impl<'a> Drop for AutoRemoteSyscalls<'a> {
    fn drop(&mut self) {
        self.task
            .write_bytes(self.syscall_insn_ip, &self.replaced_bytes);
        self.task.set_regs(&self.initial_regs);
    }
}
