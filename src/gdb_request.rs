//! The debugger request surface the diversion controller consumes. The
//! wire protocol itself (packet parsing, register formatting) is a
//! collaborator behind the `DebuggerConnection` trait; only the request
//! shapes the core reacts to are modeled here.

use crate::remote_ptr::{RemotePtr, Void};
use libc::pid_t;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BreakType {
    Software,
    Hardware,
    ReadWatch,
    WriteWatch,
    ReadWriteWatch,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DebuggerRequest {
    /// Resume execution of the addressed task.
    Continue,
    /// Single-step the addressed task.
    Step,
    /// Leave any diversion and return to the underlying replay.
    Restart,
    /// Start of a user expression-evaluation bracket; the reply is the
    /// current siginfo bytes.
    ReadSiginfo { len: usize },
    /// End of the expression-evaluation bracket.
    WriteSiginfo,
    /// Rebind the currently addressed task.
    SetQueryThread { tid: pid_t },
    SetBreak {
        kind: BreakType,
        addr: RemotePtr<Void>,
        len: usize,
    },
    RemoveBreak {
        kind: BreakType,
        addr: RemotePtr<Void>,
        len: usize,
    },
    /// The transport went away. Treated like the refcount reaching
    /// zero: the diversion dies at the next resume point.
    Detach,
    /// Anything else (memory reads, register queries, ...); serviced by
    /// the transport's own dispatcher, invisible to the diversion
    /// state machine.
    Other,
}

impl DebuggerRequest {
    pub fn is_resume(&self) -> bool {
        matches!(self, DebuggerRequest::Continue | DebuggerRequest::Step)
    }

    pub fn is_break_request(&self) -> bool {
        matches!(
            self,
            DebuggerRequest::SetBreak { .. } | DebuggerRequest::RemoveBreak { .. }
        )
    }
}

/// The transport the controller blocks on. Every method may block on
/// the debugger side of the connection.
pub trait DebuggerConnection {
    fn get_request(&mut self) -> DebuggerRequest;
    fn reply_read_siginfo(&mut self, siginfo_bytes: &[u8]);
    fn reply_write_siginfo(&mut self);
    /// Report a stop of `tid` with `sig` to the debugger user.
    fn notify_stop(&mut self, tid: pid_t, sig: i32);
    /// Service a request the diversion state machine doesn't interpret.
    fn dispatch_other(&mut self, req: &DebuggerRequest);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_classification() {
        assert!(DebuggerRequest::Continue.is_resume());
        assert!(DebuggerRequest::Step.is_resume());
        assert!(!DebuggerRequest::Restart.is_resume());
        assert!(!DebuggerRequest::WriteSiginfo.is_resume());
    }

    #[test]
    fn break_classification() {
        let set = DebuggerRequest::SetBreak {
            kind: BreakType::Software,
            addr: RemotePtr::from_val(0x1000),
            len: 1,
        };
        let remove = DebuggerRequest::RemoveBreak {
            kind: BreakType::WriteWatch,
            addr: RemotePtr::from_val(0x1000),
            len: 4,
        };
        assert!(set.is_break_request());
        assert!(remove.is_break_request());
        assert!(!DebuggerRequest::Other.is_break_request());
    }
}
