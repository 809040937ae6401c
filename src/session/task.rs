use crate::bindings::perf_event::{PERF_EVENT_IOC_DISABLE, PERF_EVENT_IOC_ENABLE};
use crate::bindings::ptrace::{
    ptrace, PTRACE_CONT, PTRACE_EVENT_EXIT, PTRACE_GETREGS, PTRACE_GETSIGINFO, PTRACE_SETREGS,
    PTRACE_SINGLESTEP, PTRACE_SYSCALL, PTRACE_SYSEMU, PTRACE_SYSEMU_SINGLESTEP, PTRACE_O_EXITKILL,
    PTRACE_O_TRACECLONE, PTRACE_O_TRACEEXEC, PTRACE_O_TRACEEXIT, PTRACE_O_TRACEFORK,
    PTRACE_O_TRACESECCOMP, PTRACE_O_TRACESYSGOOD, PTRACE_O_TRACEVFORK,
};
use crate::kernel_abi::native;
use crate::kernel_metadata::errno_name;
use crate::log::{LogDebug, LogWarn};
use crate::preload_interface::{syscallbuf_hdr, SYSCALLBUF_BUFFER_SIZE};
use crate::registers::Registers;
use crate::remote_ptr::{RemotePtr, Void};
use crate::scoped_fd::ScopedFd;
use crate::sig::Sig;
use crate::wait_status::WaitStatus;
use libc::{c_void, pid_t, pread64, siginfo_t, waitpid, __WALL};
use nix::errno::errno;
use nix::fcntl::OFlag;
use std::collections::HashMap;
use std::mem::size_of;
use std::ptr;

/// Ways to resume execution. See the ptrace manual for the semantics;
/// we use a strong type because the PTRACE_SYSEMU* requests aren't part
/// of the official API and raw request numbers are easy to confuse.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResumeRequest {
    ResumeCont = PTRACE_CONT,
    ResumeSinglestep = PTRACE_SINGLESTEP,
    ResumeSyscall = PTRACE_SYSCALL,
    ResumeSysemu = PTRACE_SYSEMU,
    ResumeSysemuSinglestep = PTRACE_SYSEMU_SINGLESTEP,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub enum WaitRequest {
    /// After resuming, block in waitpid() until the tracee stops again.
    ResumeWait,
    /// Don't wait after resuming.
    ResumeNonblocking,
}

/// The software breakpoint instruction.
const BREAKPOINT_INSN: u8 = 0xcc;

bitflags! {
    /// The ptrace option set every tracee runs under.
    struct TraceOptions: u32 {
        const SYSGOOD = PTRACE_O_TRACESYSGOOD;
        const FORK = PTRACE_O_TRACEFORK;
        const VFORK = PTRACE_O_TRACEVFORK;
        const CLONE = PTRACE_O_TRACECLONE;
        const EXEC = PTRACE_O_TRACEEXEC;
        const EXIT = PTRACE_O_TRACEEXIT;
        const SECCOMP = PTRACE_O_TRACESECCOMP;
        const EXITKILL = PTRACE_O_EXITKILL;
    }
}

/// si_code for POLL_IN, what the counter's O_ASYNC delivery carries.
const POLL_IN_SI_CODE: i32 = 1;

/// libc's siginfo_t doesn't expose the _sigpoll union variant; dig out
/// si_fd by offset (3 header ints, alignment padding, si_band, si_fd).
fn siginfo_poll_fd(si: &siginfo_t) -> i32 {
    #[cfg(target_arch = "x86_64")]
    const FD_OFFSET: usize = 24;
    #[cfg(target_arch = "x86")]
    const FD_OFFSET: usize = 16;
    unsafe { *((si as *const siginfo_t as *const u8).add(FD_OFFSET) as *const i32) }
}

/// A tracee thread under our ptrace control. All observation and
/// mutation of the thread flows through here: registers via
/// GETREGS/SETREGS while stopped, memory via /proc/tid/mem, execution
/// via the resume requests.
pub struct Task {
    pub tid: pid_t,
    /// The tid this task had during recording; equal to `tid` while
    /// recording, possibly different in replay and diversion sessions.
    pub rec_tid: pid_t,
    registers: Registers,
    regs_valid: bool,
    wait_status: WaitStatus,
    /// Location of the thread's syscall buffer header in its address
    /// space; null until the init handshake.
    pub syscallbuf_child: RemotePtr<syscallbuf_hdr>,
    /// The desched counter's fd number inside the tracee.
    pub desched_fd_child: i32,
    /// Our dup of the desched counter fd, received over the control
    /// socket during the init handshake.
    pub desched_fd: ScopedFd,
    /// The untraced callsite address the preload library reported.
    pub untraced_syscall_ip: RemotePtr<Void>,
    /// Set once the tracee has installed its seccomp filter; switches
    /// the recorder from PTRACE_SYSCALL stepping to PTRACE_CONT.
    pub seccomp_bpf_enabled: bool,
    mem_fd: ScopedFd,
    breakpoints: HashMap<RemotePtr<Void>, u8>,
}

impl Task {
    pub fn new(tid: pid_t, rec_tid: pid_t) -> Task {
        Task {
            tid,
            rec_tid,
            registers: Registers::default(),
            regs_valid: false,
            wait_status: WaitStatus::default(),
            syscallbuf_child: RemotePtr::null(),
            desched_fd_child: -1,
            desched_fd: ScopedFd::new(),
            untraced_syscall_ip: RemotePtr::null(),
            seccomp_bpf_enabled: false,
            mem_fd: ScopedFd::new(),
            breakpoints: HashMap::new(),
        }
    }

    /// Set the ptrace options every tracee runs under. Must be called
    /// at the first stop after attach.
    pub fn set_ptrace_options(&self) {
        let options = TraceOptions::all();
        if unsafe {
            ptrace(
                crate::bindings::ptrace::PTRACE_SETOPTIONS,
                self.tid,
                ptr::null_mut(),
                options.bits() as usize as *mut c_void,
            )
        } < 0
        {
            fatal!("PTRACE_SETOPTIONS failed: {}", errno_name(errno()));
        }
    }

    pub fn open_mem_fd(&mut self) {
        let path = format!("/proc/{}/mem", self.tid);
        match ScopedFd::open_path(path.as_str(), OFlag::O_RDWR) {
            Ok(fd) => self.mem_fd = fd,
            Err(e) => fatal!("Failed to open {}: {}", path, e),
        }
    }

    // --- execution control ----------------------------------------------

    /// Resume the tracee, optionally delivering `sig`, optionally
    /// blocking until the next stop.
    pub fn resume_execution(&mut self, how: ResumeRequest, wait: WaitRequest, sig: Option<Sig>) {
        log!(
            LogDebug,
            "resuming {} with {:?} sig={:?}",
            self.tid,
            how,
            sig
        );
        self.regs_valid = false;
        let sig_data = sig.map(|s| s.as_raw()).unwrap_or(0) as usize;
        if unsafe {
            ptrace(
                how as u32,
                self.tid,
                ptr::null_mut(),
                sig_data as *mut c_void,
            )
        } < 0
        {
            fatal!(
                "ptrace resume of {} failed: {}",
                self.tid,
                errno_name(errno())
            );
        }
        if wait == WaitRequest::ResumeWait {
            self.wait();
        }
    }

    /// Block until the tracee stops (or exits).
    pub fn wait(&mut self) {
        let mut raw_status: i32 = 0;
        let ret = unsafe { waitpid(self.tid, &mut raw_status, __WALL) };
        if ret != self.tid {
            fatal!(
                "waitpid({}) returned {} ({})",
                self.tid,
                ret,
                errno_name(errno())
            );
        }
        self.wait_status = WaitStatus::new(raw_status);
        log!(LogDebug, "  {} stopped with {}", self.tid, self.wait_status);
    }

    pub fn status(&self) -> WaitStatus {
        self.wait_status
    }

    pub fn set_status(&mut self, status: WaitStatus) {
        self.wait_status = status;
    }

    pub fn maybe_ptrace_event(&self) -> Option<u32> {
        self.wait_status.ptrace_event()
    }

    pub fn stop_sig(&self) -> Option<i32> {
        self.wait_status.stop_sig()
    }

    pub fn is_syscall_stop(&self) -> bool {
        self.wait_status.is_syscall()
    }

    pub fn seen_ptrace_exit_event(&self) -> bool {
        self.maybe_ptrace_event() == Some(PTRACE_EVENT_EXIT)
    }

    // --- registers -------------------------------------------------------

    pub fn regs(&mut self) -> &Registers {
        if !self.regs_valid {
            let mut raw: libc::user_regs_struct = unsafe { std::mem::zeroed() };
            if unsafe {
                ptrace(
                    PTRACE_GETREGS,
                    self.tid,
                    ptr::null_mut(),
                    &mut raw as *mut libc::user_regs_struct as *mut c_void,
                )
            } < 0
            {
                fatal!(
                    "PTRACE_GETREGS on {} failed: {}",
                    self.tid,
                    errno_name(errno())
                );
            }
            self.registers = Registers::from_ptrace(raw);
            self.regs_valid = true;
        }
        &self.registers
    }

    pub fn set_regs(&mut self, regs: &Registers) {
        let mut raw = regs.get_ptrace();
        if unsafe {
            ptrace(
                PTRACE_SETREGS,
                self.tid,
                ptr::null_mut(),
                &mut raw as *mut libc::user_regs_struct as *mut c_void,
            )
        } < 0
        {
            fatal!(
                "PTRACE_SETREGS on {} failed: {}",
                self.tid,
                errno_name(errno())
            );
        }
        self.registers = *regs;
        self.regs_valid = true;
    }

    pub fn ip(&mut self) -> RemotePtr<Void> {
        self.regs().ip()
    }

    pub fn get_siginfo(&self) -> siginfo_t {
        let mut si: siginfo_t = unsafe { std::mem::zeroed() };
        if unsafe {
            ptrace(
                PTRACE_GETSIGINFO,
                self.tid,
                ptr::null_mut(),
                &mut si as *mut siginfo_t as *mut c_void,
            )
        } < 0
        {
            fatal!(
                "PTRACE_GETSIGINFO on {} failed: {}",
                self.tid,
                errno_name(errno())
            );
        }
        si
    }

    // --- memory ----------------------------------------------------------

    pub fn read_bytes(&self, addr: RemotePtr<Void>, buf: &mut [u8]) {
        let mut nread = 0usize;
        while nread < buf.len() {
            let ret = unsafe {
                pread64(
                    self.mem_fd.as_raw(),
                    buf[nread..].as_mut_ptr() as *mut c_void,
                    buf.len() - nread,
                    (addr.as_usize() + nread) as i64,
                )
            };
            if ret <= 0 {
                fatal!(
                    "read of {} bytes at {} in {} failed: {}",
                    buf.len(),
                    addr,
                    self.tid,
                    errno_name(errno())
                );
            }
            nread += ret as usize;
        }
    }

    pub fn write_bytes(&self, addr: RemotePtr<Void>, bytes: &[u8]) {
        match crate::util::pwrite_all_fallible(self.mem_fd.as_raw(), bytes, addr.as_usize() as isize)
        {
            Ok(n) if n == bytes.len() => (),
            _ => fatal!(
                "write of {} bytes at {} in {} failed: {}",
                bytes.len(),
                addr,
                self.tid,
                errno_name(errno())
            ),
        }
    }

    pub fn read_val<T: Copy>(&self, addr: RemotePtr<T>) -> T {
        let mut val: T = unsafe { std::mem::zeroed() };
        let buf = unsafe {
            std::slice::from_raw_parts_mut(&mut val as *mut T as *mut u8, size_of::<T>())
        };
        self.read_bytes(RemotePtr::cast(addr), buf);
        val
    }

    pub fn write_val<T: Copy>(&self, addr: RemotePtr<T>, val: &T) {
        let buf =
            unsafe { std::slice::from_raw_parts(val as *const T as *const u8, size_of::<T>()) };
        self.write_bytes(RemotePtr::cast(addr), buf);
    }

    // --- syscall buffer views --------------------------------------------

    pub fn has_syscallbuf(&self) -> bool {
        !self.syscallbuf_child.is_null()
    }

    pub fn syscallbuf_num_rec_bytes(&self) -> u32 {
        let addr = RemotePtr::<u32>::from_val(
            self.syscallbuf_child.as_usize() + offset_of!(syscallbuf_hdr, num_rec_bytes),
        );
        self.read_val(addr)
    }

    /// Drain the current record bytes (header excluded) out of the
    /// tracee.
    pub fn read_syscallbuf_contents(&self) -> Vec<u8> {
        let num = self.syscallbuf_num_rec_bytes() as usize;
        let mut buf = vec![0u8; num];
        if num > 0 {
            let records =
                RemotePtr::<Void>::from_val(self.syscallbuf_child.as_usize() + size_of::<syscallbuf_hdr>());
            self.read_bytes(records, &mut buf);
        }
        buf
    }

    /// Refill the tracee's record area with recorded bytes (replay side
    /// of a flush). The record count is reset to zero: the tracee's own
    /// wrapper code re-commits each record as its syscall is emulated,
    /// deterministically recreating the recorded header state, while
    /// the kernel-written outparam bytes come from this refill.
    pub fn write_syscallbuf_contents(&self, bytes: &[u8]) {
        debug_assert!(bytes.len() + size_of::<syscallbuf_hdr>() <= SYSCALLBUF_BUFFER_SIZE);
        let records =
            RemotePtr::<Void>::from_val(self.syscallbuf_child.as_usize() + size_of::<syscallbuf_hdr>());
        self.write_bytes(records, bytes);
        self.set_syscallbuf_num_rec_bytes(0);
    }

    pub fn set_syscallbuf_num_rec_bytes(&self, num: u32) {
        let addr = RemotePtr::<u32>::from_val(
            self.syscallbuf_child.as_usize() + offset_of!(syscallbuf_hdr, num_rec_bytes),
        );
        self.write_val(addr, &num);
    }

    /// The tracer-side abort: mark the tracee's in-progress reservation
    /// doomed. The tracee observes the flag at commit and discards the
    /// record.
    pub fn syscallbuf_abort_commit_from_tracer(&self) {
        let addr = RemotePtr::<u8>::from_val(
            self.syscallbuf_child.as_usize() + offset_of!(syscallbuf_hdr, abort_commit),
        );
        self.write_val(addr, &1u8);
    }

    pub fn reset_syscallbuf(&self) {
        self.set_syscallbuf_num_rec_bytes(0);
    }

    // --- desched ioctl recognition ---------------------------------------

    fn is_desched_ioctl(&mut self, op: u64) -> bool {
        if self.desched_fd_child < 0 {
            return false;
        }
        let desched_fd = self.desched_fd_child;
        let regs = self.regs();
        regs.original_syscallno() == native::IOCTL as isize
            && regs.arg1() as i32 == desched_fd
            && regs.arg2() as u64 == op
    }

    pub fn is_arm_desched_event_syscall(&mut self) -> bool {
        self.is_desched_ioctl(PERF_EVENT_IOC_ENABLE as u64)
    }

    pub fn is_disarm_desched_event_syscall(&mut self) -> bool {
        self.is_desched_ioctl(PERF_EVENT_IOC_DISABLE as u64)
    }

    pub fn is_desched_event_syscall(&mut self) -> bool {
        self.is_arm_desched_event_syscall() || self.is_disarm_desched_event_syscall()
    }

    /// Is the current stop a syscall issued from the untraced callsite?
    pub fn at_untraced_syscall(&mut self) -> bool {
        let untraced_ip = self.untraced_syscall_ip;
        !untraced_ip.is_null() && self.ip() == untraced_ip
    }

    /// Does siginfo identify this thread's desched counter? The counter
    /// delivers SIGIO with the _sigpoll payload naming its fd.
    pub fn is_desched_siginfo(&self, si: &siginfo_t) -> bool {
        si.si_signo == libc::SIGIO
            && si.si_code == POLL_IN_SI_CODE
            && self.desched_fd_child >= 0
            && siginfo_poll_fd(si) == self.desched_fd_child
    }

    // --- emulation helpers -----------------------------------------------

    /// At a PTRACE_SYSEMU syscall-entry stop, declare the syscall done
    /// without running it. The kernel never executes the syscall under
    /// SYSEMU; stepping once with SYSEMU_SINGLESTEP retires the
    /// emulated exit so the tracee continues after the syscall
    /// instruction.
    pub fn finish_emulated_syscall(&mut self) {
        let regs = *self.regs();
        self.resume_execution(
            ResumeRequest::ResumeSysemuSinglestep,
            WaitRequest::ResumeWait,
            None,
        );
        // The singlestep must not have run tracee code.
        self.set_regs(&regs);
    }

    // --- breakpoints -----------------------------------------------------

    pub fn set_breakpoint(&mut self, addr: RemotePtr<Void>) {
        if self.breakpoints.contains_key(&addr) {
            return;
        }
        let mut orig = [0u8; 1];
        self.read_bytes(addr, &mut orig);
        self.write_bytes(addr, &[BREAKPOINT_INSN]);
        self.breakpoints.insert(addr, orig[0]);
    }

    pub fn remove_breakpoint(&mut self, addr: RemotePtr<Void>) {
        if let Some(orig) = self.breakpoints.remove(&addr) {
            self.write_bytes(addr, &[orig]);
        }
    }

    /// Is there a breakpoint at the address the tracee would have
    /// executed from? (The trap pushes ip one byte past the 0xcc.)
    pub fn breakpoint_at_ip(&mut self) -> Option<RemotePtr<Void>> {
        let ip = self.ip();
        if ip.as_usize() == 0 {
            return None;
        }
        let bp = RemotePtr::from_val(ip.as_usize() - 1);
        if self.breakpoints.contains_key(&bp) {
            Some(bp)
        } else {
            None
        }
    }

    // --- teardown --------------------------------------------------------

    pub fn kill(&mut self) {
        log!(LogDebug, "sending SIGKILL to {}", self.tid);
        if unsafe { libc::kill(self.tid, libc::SIGKILL) } < 0 && errno() != libc::ESRCH {
            log!(
                LogWarn,
                "SIGKILL of {} failed: {}",
                self.tid,
                errno_name(errno())
            );
        }
        let mut raw_status: i32 = 0;
        unsafe { waitpid(self.tid, &mut raw_status, __WALL) };
    }
}
