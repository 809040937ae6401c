//! A DiversionSession lets you run tasks forward without replay: a
//! speculative branch off a replay session, used to support the
//! debugger's `call foo()` feature. A diversion is created for the call
//! frame and discarded when the call finishes.
//!
//! Diversion tracees execute freely, as in recording, but nothing is
//! recorded. Syscalls the session knows to be dangerous to the host are
//! suppressed, the desched-counter ioctls are emulated, and everything
//! else executes against the real kernel. Tracees can easily get into
//! inconsistent states within diversion mode, and no attempt is made to
//! detect or rectify that.

use crate::auto_remote_syscalls::AutoRemoteSyscalls;
use crate::bindings::ptrace::PTRACE_EVENT_EXIT;
use crate::diverter::{classify_syscall, DiversionSyscallPolicy};
use crate::kernel_abi::{native, NATIVE_ARCH};
use crate::kernel_metadata::syscall_name;
use crate::log::LogDebug;
use crate::session::task::{ResumeRequest, Task, WaitRequest};
use crate::session::TaskMap;
use crate::sig::Sig;
use libc::pid_t;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunCommand {
    RunContinue,
    RunSinglestep,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiversionStatus {
    /// Some execution was done; diversion_step() can be called again.
    DiversionContinue,
    /// All tracees are dead; diversion_step() must not be called again.
    DiversionExited,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BreakStatus {
    pub breakpoint_hit: bool,
    pub singlestep_complete: bool,
    /// A non-trap signal the tracee raised.
    pub signal: Option<i32>,
}

#[derive(Debug, Default)]
pub struct DiversionResult {
    pub status: Option<DiversionStatus>,
    pub break_status: BreakStatus,
}

/// The reference-counted speculative session. States: alive, dying.
/// `diversion_ref`/`diversion_unref` move the count; the session enters
/// `dying` when the count drops to zero, and stays dying until torn
/// down.
pub struct DiversionSession {
    tasks: TaskMap,
    ref_count: u32,
    dying: bool,
}

impl DiversionSession {
    pub fn new() -> DiversionSession {
        DiversionSession {
            tasks: TaskMap::new(),
            ref_count: 0,
            dying: false,
        }
    }

    /// Branch a diversion off the stopped tasks of a replay. Each task
    /// is snapshotted by injecting a fork(): the child is a
    /// copy-on-write image of the replay state, auto-attached through
    /// PTRACE_O_TRACEFORK, and owned by the diversion. The replay tasks
    /// themselves are left exactly as they were.
    pub fn clone_from_tasks(replay_tasks: &mut TaskMap) -> DiversionSession {
        let mut session = DiversionSession::new();
        for tid in replay_tasks.tids() {
            let t = replay_tasks.get_mut(tid).unwrap();
            let (child_tid, fields) = fork_snapshot(t);
            if child_tid <= 0 {
                fatal!("failed to snapshot {} for diversion", tid);
            }
            let mut child = Task::new(child_tid, t.rec_tid);
            child.wait();
            child.set_ptrace_options();
            child.open_mem_fd();
            child.syscallbuf_child = fields.0;
            child.untraced_syscall_ip = fields.1;
            child.desched_fd_child = fields.2;
            log!(
                LogDebug,
                "diversion snapshot of {} is {}",
                tid,
                child_tid
            );
            session.tasks.insert(child);
        }
        session
    }

    pub fn task_mut(&mut self, tid: pid_t) -> Option<&mut Task> {
        self.tasks.get_mut(tid)
    }

    pub fn first_tid(&self) -> Option<pid_t> {
        self.tasks.tids().into_iter().min()
    }

    pub fn find_task_by_rec_tid(&mut self, rec_tid: pid_t) -> Option<pid_t> {
        for tid in self.tasks.tids() {
            if self.tasks.get_mut(tid).map(|t| t.rec_tid) == Some(rec_tid) {
                return Some(tid);
            }
        }
        None
    }

    // --- reference counting ----------------------------------------------

    pub fn diversion_ref(&mut self) {
        debug_assert!(!self.dying);
        self.ref_count += 1;
    }

    pub fn diversion_unref(&mut self) {
        debug_assert!(self.ref_count > 0);
        self.ref_count -= 1;
        if self.ref_count == 0 {
            self.dying = true;
        }
    }

    pub fn diversion_dying(&self) -> bool {
        self.dying
    }

    /// Debugger disconnection: treated as if the count reached zero.
    pub fn mark_dying(&mut self) {
        self.dying = true;
    }

    // --- execution -------------------------------------------------------

    /// Try to make progress in this diversion session: run task `tid`
    /// until it makes a syscall or takes a signal, then classify and
    /// either emulate, forward, or drop the syscall.
    pub fn diversion_step(
        &mut self,
        tid: pid_t,
        command: RunCommand,
        signal_to_deliver: Option<Sig>,
    ) -> DiversionResult {
        let mut result = DiversionResult::default();
        let t = match self.tasks.get_mut(tid) {
            Some(t) => t,
            None => {
                result.status = Some(DiversionStatus::DiversionExited);
                return result;
            }
        };

        // An exit might have occurred while processing a previous
        // syscall.
        if t.maybe_ptrace_event() == Some(PTRACE_EVENT_EXIT) {
            result.status = Some(DiversionStatus::DiversionExited);
            return result;
        }

        match command {
            RunCommand::RunContinue => {
                log!(LogDebug, "continuing {} to next syscall", tid);
                t.resume_execution(
                    ResumeRequest::ResumeSysemu,
                    WaitRequest::ResumeWait,
                    signal_to_deliver,
                );
            }
            RunCommand::RunSinglestep => {
                log!(LogDebug, "stepping {} to next insn/syscall", tid);
                t.resume_execution(
                    ResumeRequest::ResumeSysemuSinglestep,
                    WaitRequest::ResumeWait,
                    signal_to_deliver,
                );
            }
        }

        if t.maybe_ptrace_event() == Some(PTRACE_EVENT_EXIT) {
            result.status = Some(DiversionStatus::DiversionExited);
            return result;
        }

        result.status = Some(DiversionStatus::DiversionContinue);
        if let Some(sig) = t.status().stop_sig() {
            if sig == libc::SIGTRAP {
                if t.breakpoint_at_ip().is_some() {
                    result.break_status.breakpoint_hit = true;
                    // Back up over the trap byte so resuming re-executes
                    // the original instruction once the breakpoint is
                    // removed.
                    let bp = t.breakpoint_at_ip().unwrap();
                    let mut regs = *t.regs();
                    regs.set_ip(bp);
                    t.set_regs(&regs);
                } else {
                    result.break_status.singlestep_complete =
                        command == RunCommand::RunSinglestep;
                }
            } else {
                result.break_status.signal = Some(sig);
            }
            log!(
                LogDebug,
                "diversion break at {}; breakpoint={} singlestep={} signal={:?}",
                t.ip(),
                result.break_status.breakpoint_hit,
                result.break_status.singlestep_complete,
                result.break_status.signal
            );
            return result;
        }

        if t.is_syscall_stop() {
            let syscallno = t.regs().original_syscallno() as i32;
            process_syscall(t, syscallno);
        }
        result
    }
}

impl Default for DiversionSession {
    fn default() -> Self {
        DiversionSession::new()
    }
}

impl Drop for DiversionSession {
    fn drop(&mut self) {
        // Terminal action: every diversion task dies with the session.
        self.tasks.kill_all_tasks();
        log!(LogDebug, "diversion session dropped");
    }
}

/// Inject fork() into a stopped task; returns the child tid and the
/// fields the child shares with its parent image.
fn fork_snapshot(
    t: &mut Task,
) -> (
    pid_t,
    (
        crate::remote_ptr::RemotePtr<crate::preload_interface::syscallbuf_hdr>,
        crate::remote_ptr::RemotePtr<crate::remote_ptr::Void>,
        i32,
    ),
) {
    let fields = (t.syscallbuf_child, t.untraced_syscall_ip, t.desched_fd_child);
    let mut remote = AutoRemoteSyscalls::new(t);
    let child = remote.syscall(native::FORK, &[]);
    (child as pid_t, fields)
}

fn process_syscall(t: &mut Task, syscallno: i32) {
    log!(
        LogDebug,
        "processing {}",
        syscall_name(syscallno, NATIVE_ARCH)
    );

    if t.is_desched_event_syscall() {
        // The arm/disarm-desched ioctls are emulated as no-ops. The
        // preload library expects these syscalls to succeed and aborts
        // if they don't, so fudge a 0 return value.
        finish_emulated_syscall_with_ret(t, 0);
        return;
    }

    match classify_syscall(syscallno) {
        DiversionSyscallPolicy::Suppress => {
            log!(
                LogDebug,
                "suppressing {}",
                syscall_name(syscallno, NATIVE_ARCH)
            );
            finish_emulated_syscall_with_ret(t, 0);
        }
        DiversionSyscallPolicy::Forward => {
            log!(
                LogDebug,
                "executing {}",
                syscall_name(syscallno, NATIVE_ARCH)
            );
            execute_syscall(t);
        }
    }
}

fn finish_emulated_syscall_with_ret(t: &mut Task, ret: isize) {
    t.finish_emulated_syscall();
    let mut r = *t.regs();
    r.set_syscall_result_signed(ret);
    t.set_regs(&r);
}

/// Execute the syscall contained in the task's current register set
/// against the real kernel; its return value is placed in the task's
/// registers, to be seen by the tracee.
fn execute_syscall(t: &mut Task) {
    t.finish_emulated_syscall();

    let regs = *t.regs();
    let syscallno = regs.original_syscallno() as i32;
    let args = [
        regs.arg1(),
        regs.arg2(),
        regs.arg3(),
        regs.arg4(),
        regs.arg5(),
        regs.arg6(),
    ];
    let ret = {
        let mut remote = AutoRemoteSyscalls::new(t);
        remote.syscall(syscallno, &args)
    };
    let mut r = *t.regs();
    r.set_syscall_result_signed(ret);
    t.set_regs(&r);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refcount_reaches_zero_exactly_once() {
        let mut session = DiversionSession::new();
        assert!(!session.diversion_dying());
        session.diversion_ref();
        session.diversion_ref();
        session.diversion_unref();
        assert!(!session.diversion_dying());
        session.diversion_unref();
        assert!(session.diversion_dying());
    }

    #[test]
    fn nested_brackets_keep_the_session_alive() {
        // A single diversion can host nested user operations; only the
        // final unref kills it.
        let mut session = DiversionSession::new();
        for _ in 0..3 {
            session.diversion_ref();
        }
        for i in (0..3).rev() {
            session.diversion_unref();
            assert_eq!(i == 0, session.diversion_dying());
        }
    }

    #[test]
    fn disconnect_marks_dying() {
        let mut session = DiversionSession::new();
        session.mark_dying();
        assert!(session.diversion_dying());
    }
}
