//! The diversion controller: branches a speculative session off a
//! replay at the debugger's request, services debugger requests inside
//! it, and tears it down through the reference-count protocol when the
//! user is done.
//!
//! There is at most one live diversion at a time -- the debugger
//! transport is serial -- and that is enforced here; the session handle
//! itself lives on the controller's stack for exactly the duration of
//! `divert`.

use crate::gdb_request::{BreakType, DebuggerConnection, DebuggerRequest};
use crate::kernel_abi::native;
use crate::log::LogDebug;
use crate::session::diversion_session::{
    DiversionSession, DiversionStatus, RunCommand,
};
use crate::session::replay_session::ReplaySession;
use libc::pid_t;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide "current diversion" marker.
static DIVERSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// How a syscall is treated inside a diversion. The emulate/forward/
/// suppress decision is a policy knob; keeping it in one classifier
/// keeps the knob in one place. (The desched-ioctl emulation is not
/// here because it depends on the task's counter fd, not just the
/// syscall number.)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiversionSyscallPolicy {
    /// Pretend success without touching the kernel. These syscalls take
    /// namespace-scoped identifiers that were valid at record time but
    /// may name a live, unrelated resource now: a recorded tracee may
    /// have killed a sibling whose pid today belongs to an innocent
    /// host process. Diversion tracees must not shoot down other
    /// processes.
    Suppress,
    /// Execute against the real kernel and return the real result. We
    /// optimistically assume filesystem and similar operations are
    /// intended by the user.
    Forward,
}

pub fn classify_syscall(syscallno: i32) -> DiversionSyscallPolicy {
    if syscallno == native::KILL
        || syscallno == native::TKILL
        || syscallno == native::TGKILL
        || syscallno == native::RT_SIGQUEUEINFO
        || syscallno == native::RT_TGSIGQUEUEINFO
        || syscallno == native::IPC
    {
        return DiversionSyscallPolicy::Suppress;
    }
    DiversionSyscallPolicy::Forward
}

/// Run a debugging diversion for `replay`, starting at the task
/// recorded as `rec_tid`. Returns the request that ended the diversion
/// (a restart, or the resume issued against a dying session) so the
/// caller can act on it against the underlying replay.
pub fn divert(
    replay: &mut ReplaySession,
    dbg: &mut dyn DebuggerConnection,
    rec_tid: pid_t,
) -> DebuggerRequest {
    if DIVERSION_ACTIVE.swap(true, Ordering::SeqCst) {
        fatal!("attempted to start a second concurrent diversion");
    }
    log!(LogDebug, "starting debugging diversion");

    let mut session = DiversionSession::clone_from_tasks(replay.tasks_mut());
    let mut tid = session
        .find_task_by_rec_tid(rec_tid)
        .or_else(|| session.first_tid())
        .unwrap_or(0);

    let final_req;
    loop {
        let (next_tid, req) = match process_debugger_requests(dbg, &mut session, tid) {
            Some(pair) => pair,
            None => {
                // Restart, detach, or a request against a dying
                // session: return to the underlying replay.
                final_req = DebuggerRequest::Restart;
                break;
            }
        };
        tid = next_tid;
        if !advance(&mut session, dbg, tid, &req) {
            final_req = req;
            break;
        }
    }

    log!(LogDebug, "ending debugging diversion");
    // Dropping the session kills all diversion tasks.
    drop(session);
    DIVERSION_ACTIVE.store(false, Ordering::SeqCst);
    final_req
}

/// Process debugger requests until action needs to be taken by the
/// caller (a resume-execution request against a live session arrives).
/// Returns None when the diversion should end instead.
fn process_debugger_requests(
    dbg: &mut dyn DebuggerConnection,
    session: &mut DiversionSession,
    mut tid: pid_t,
) -> Option<(pid_t, DebuggerRequest)> {
    loop {
        let req = dbg.get_request();

        if req.is_resume() {
            if session.diversion_dying() {
                return None;
            }
            return Some((tid, req));
        }

        match req {
            DebuggerRequest::Restart | DebuggerRequest::Detach => {
                if req == DebuggerRequest::Detach {
                    session.mark_dying();
                }
                return None;
            }
            DebuggerRequest::ReadSiginfo { len } => {
                log!(LogDebug, "adding ref to diversion session");
                session.diversion_ref();
                // The diversion has no real pending signal; the
                // expression bracket only needs a well-formed reply.
                let zeros = vec![0u8; len];
                dbg.reply_read_siginfo(&zeros);
            }
            DebuggerRequest::WriteSiginfo => {
                log!(LogDebug, "removing ref to diversion session");
                session.diversion_unref();
                if session.diversion_dying() {
                    log!(LogDebug, "  ... dying at next continue request");
                }
                dbg.reply_write_siginfo();
            }
            DebuggerRequest::SetQueryThread { tid: target } => {
                if let Some(found) = session.find_task_by_rec_tid(target) {
                    tid = found;
                }
            }
            ref break_req @ DebuggerRequest::SetBreak { .. }
            | ref break_req @ DebuggerRequest::RemoveBreak { .. } => {
                // Setting breakpoints in a dying diversion is assumed to
                // be a user action intended for the replay session, so
                // return to it now.
                if session.diversion_dying() {
                    return None;
                }
                apply_break_request(session, tid, break_req, dbg);
            }
            DebuggerRequest::Other => {
                dbg.dispatch_other(&req);
            }
            _ => (),
        }
    }
}

fn apply_break_request(
    session: &mut DiversionSession,
    tid: pid_t,
    req: &DebuggerRequest,
    dbg: &mut dyn DebuggerConnection,
) {
    match req {
        DebuggerRequest::SetBreak {
            kind: BreakType::Software,
            addr,
            ..
        } => {
            if let Some(t) = session.task_mut(tid) {
                t.set_breakpoint(*addr);
            }
        }
        DebuggerRequest::RemoveBreak {
            kind: BreakType::Software,
            addr,
            ..
        } => {
            if let Some(t) = session.task_mut(tid) {
                t.remove_breakpoint(*addr);
            }
        }
        // Hardware breaks and watchpoints belong to the debug-register
        // collaborator.
        _ => dbg.dispatch_other(req),
    }
}

/// Advance execution according to `req` until either a signal is
/// received (including the SIGTRAP of a completed single-step) or a
/// syscall is processed. Returns false when the diversion is over.
fn advance(
    session: &mut DiversionSession,
    dbg: &mut dyn DebuggerConnection,
    tid: pid_t,
    req: &DebuggerRequest,
) -> bool {
    let command = match req {
        DebuggerRequest::Continue => RunCommand::RunContinue,
        DebuggerRequest::Step => RunCommand::RunSinglestep,
        _ => fatal!("illegal resume request {:?}", req),
    };

    let result = session.diversion_step(tid, command, None);
    match result.status {
        Some(DiversionStatus::DiversionExited) | None => return false,
        Some(DiversionStatus::DiversionContinue) => (),
    }

    let bs = result.break_status;
    if bs.breakpoint_hit || bs.singlestep_complete || bs.signal.is_some() {
        let rec_tid = session
            .task_mut(tid)
            .map(|t| t.rec_tid)
            .unwrap_or(tid);
        let sig = if bs.breakpoint_hit || bs.singlestep_complete {
            libc::SIGTRAP
        } else {
            bs.signal.unwrap()
        };
        log!(LogDebug, "notifying debugger of {} in {}", sig, rec_tid);
        dbg.notify_stop(rec_tid, sig);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_delivery_family_is_suppressed() {
        assert_eq!(DiversionSyscallPolicy::Suppress, classify_syscall(native::KILL));
        assert_eq!(DiversionSyscallPolicy::Suppress, classify_syscall(native::TKILL));
        assert_eq!(DiversionSyscallPolicy::Suppress, classify_syscall(native::TGKILL));
        assert_eq!(
            DiversionSyscallPolicy::Suppress,
            classify_syscall(native::RT_SIGQUEUEINFO)
        );
        assert_eq!(
            DiversionSyscallPolicy::Suppress,
            classify_syscall(native::RT_TGSIGQUEUEINFO)
        );
    }

    #[cfg(target_arch = "x86")]
    #[test]
    fn sysv_ipc_is_suppressed() {
        assert_eq!(DiversionSyscallPolicy::Suppress, classify_syscall(native::IPC));
    }

    #[test]
    fn queries_are_forwarded() {
        assert_eq!(
            DiversionSyscallPolicy::Forward,
            classify_syscall(native::CLOCK_GETTIME)
        );
        assert_eq!(
            DiversionSyscallPolicy::Forward,
            classify_syscall(native::GETTIMEOFDAY)
        );
        assert_eq!(DiversionSyscallPolicy::Forward, classify_syscall(native::READ));
        assert_eq!(
            DiversionSyscallPolicy::Forward,
            classify_syscall(native::FSTAT64)
        );
    }
}
