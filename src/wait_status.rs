use crate::bindings::ptrace::PTRACE_EVENT_STOP;
use crate::kernel_metadata::{ptrace_event_name, signal_name};
use libc::{SIGSTOP, SIGTRAP};
use libc::{WEXITSTATUS, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WSTOPSIG, WTERMSIG};
use std::fmt;
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WaitType {
    /// Task exited normally.
    Exit,
    /// Task exited due to fatal signal.
    FatalSignal,
    /// Task is in a signal-delivery-stop.
    SignalStop,
    /// Task is in a group-stop. Requires PTRACE_SEIZE to be distinguished
    /// from SignalStop.
    GroupStop,
    /// Task is in a syscall-stop under PTRACE_O_TRACESYSGOOD.
    SyscallStop,
    /// Task is in a PTRACE_EVENT stop other than PTRACE_EVENT_STOP.
    PtraceEvent,
}

/// A raw waitpid() status word plus decoding. Stops are interpreted
/// assuming PTRACE_SEIZE + PTRACE_O_TRACESYSGOOD, which is how every task
/// here is attached.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct WaitStatus {
    status: i32,
}

impl Default for WaitStatus {
    fn default() -> Self {
        WaitStatus::new(0)
    }
}

impl WaitStatus {
    pub fn new(status: i32) -> WaitStatus {
        WaitStatus { status }
    }

    pub fn wait_type(&self) -> WaitType {
        if self.exit_code().is_some() {
            return WaitType::Exit;
        }
        if self.fatal_sig().is_some() {
            return WaitType::FatalSignal;
        }
        if self.stop_sig().is_some() {
            return WaitType::SignalStop;
        }
        if self.group_stop_sig().is_some() {
            return WaitType::GroupStop;
        }
        if self.is_syscall() {
            return WaitType::SyscallStop;
        }
        if self.ptrace_event().is_some() {
            return WaitType::PtraceEvent;
        }
        fatal!("Status {:#x} not understood", self.status);
    }

    /// Exit code if wait_type() == Exit, otherwise None.
    pub fn exit_code(&self) -> Option<i32> {
        if unsafe { WIFEXITED(self.status) } {
            Some(unsafe { WEXITSTATUS(self.status) })
        } else {
            None
        }
    }

    /// Terminating signal if wait_type() == FatalSignal, otherwise None.
    pub fn fatal_sig(&self) -> Option<i32> {
        if unsafe { WIFSIGNALED(self.status) } && unsafe { WTERMSIG(self.status) } > 0 {
            Some(unsafe { WTERMSIG(self.status) })
        } else {
            None
        }
    }

    /// Stop signal if wait_type() == SignalStop, otherwise None. A zero
    /// signal (observed with PTRACE_INTERRUPT) is reported as SIGSTOP.
    pub fn stop_sig(&self) -> Option<i32> {
        if !unsafe { WIFSTOPPED(self.status) } || ((self.status >> 16) & 0xff) != 0 {
            return None;
        }
        let mut sig = unsafe { WSTOPSIG(self.status) };
        if sig == (SIGTRAP | 0x80) {
            // Syscall-stop under PTRACE_O_TRACESYSGOOD.
            return None;
        }
        sig &= !0x80;
        if sig != 0 {
            Some(sig)
        } else {
            Some(SIGSTOP)
        }
    }

    /// Group-stop signal if wait_type() == GroupStop, otherwise None.
    pub fn group_stop_sig(&self) -> Option<i32> {
        if !unsafe { WIFSTOPPED(self.status) }
            || ((self.status >> 16) & 0xff) != PTRACE_EVENT_STOP as i32
        {
            return None;
        }
        let sig = unsafe { WSTOPSIG(self.status) } & !0x80;
        if sig != 0 {
            Some(sig)
        } else {
            Some(SIGSTOP)
        }
    }

    pub fn is_syscall(&self) -> bool {
        if self.ptrace_event().is_some() || !unsafe { WIFSTOPPED(self.status) } {
            return false;
        }
        unsafe { WSTOPSIG(self.status) == (SIGTRAP | 0x80) }
    }

    /// Ptrace event number if wait_type() == PtraceEvent, otherwise None.
    pub fn ptrace_event(&self) -> Option<u32> {
        let event = ((self.status >> 16) & 0xff) as u32;
        if event == PTRACE_EVENT_STOP || event == 0 {
            None
        } else {
            Some(event)
        }
    }

    /// For any stop type, the signal involved; None for exits.
    pub fn ptrace_signal(&self) -> Option<i32> {
        if unsafe { WIFSTOPPED(self.status) } {
            Some(unsafe { WSTOPSIG(self.status) } & 0x7f)
        } else {
            None
        }
    }

    pub fn for_exit_code(code: i32) -> WaitStatus {
        debug_assert!(code >= 0 && code < 0x100);
        WaitStatus { status: code << 8 }
    }

    pub fn for_fatal_sig(sig: i32) -> WaitStatus {
        debug_assert!(sig >= 1 && sig < 0x80);
        WaitStatus { status: sig }
    }

    pub fn for_stop_sig(sig: i32) -> WaitStatus {
        debug_assert!(sig >= 1 && sig < 0x80);
        WaitStatus {
            status: (sig << 8) | 0x7f,
        }
    }

    /// The status a PTRACE_O_TRACESYSGOOD syscall-stop reports.
    pub fn for_syscall() -> WaitStatus {
        WaitStatus {
            status: ((SIGTRAP | 0x80) << 8) | 0x7f,
        }
    }

    pub fn for_ptrace_event(ptrace_event: u32) -> WaitStatus {
        debug_assert!(ptrace_event >= 1 && ptrace_event < 0x100);
        WaitStatus {
            status: ((ptrace_event as i32) << 16) | (SIGTRAP << 8) | 0x7f,
        }
    }

    pub fn get(&self) -> i32 {
        self.status
    }
}

impl Display for WaitStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.status)?;
        match self.wait_type() {
            WaitType::Exit => write!(f, " (EXIT-{})", self.exit_code().unwrap()),
            WaitType::FatalSignal => {
                write!(f, " (FATAL-{})", signal_name(self.fatal_sig().unwrap()))
            }
            WaitType::SignalStop => write!(f, " (STOP-{})", signal_name(self.stop_sig().unwrap())),
            WaitType::GroupStop => write!(
                f,
                " (GROUP-STOP-{})",
                signal_name(self.group_stop_sig().unwrap())
            ),
            WaitType::SyscallStop => write!(f, " (SYSCALL)"),
            WaitType::PtraceEvent => {
                write!(f, " ({})", ptrace_event_name(self.ptrace_event().unwrap()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::ptrace::PTRACE_EVENT_SECCOMP;

    #[test]
    fn exit_round_trip() {
        let st = WaitStatus::for_exit_code(3);
        assert_eq!(WaitType::Exit, st.wait_type());
        assert_eq!(Some(3), st.exit_code());
        assert_eq!(None, st.stop_sig());
    }

    #[test]
    fn fatal_round_trip() {
        let st = WaitStatus::for_fatal_sig(libc::SIGKILL);
        assert_eq!(WaitType::FatalSignal, st.wait_type());
        assert_eq!(Some(libc::SIGKILL), st.fatal_sig());
    }

    #[test]
    fn stop_round_trip() {
        let st = WaitStatus::for_stop_sig(libc::SIGIO);
        assert_eq!(WaitType::SignalStop, st.wait_type());
        assert_eq!(Some(libc::SIGIO), st.stop_sig());
        assert_eq!(Some(libc::SIGIO), st.ptrace_signal());
    }

    #[test]
    fn syscall_stop_is_not_a_signal() {
        let st = WaitStatus::for_syscall();
        assert_eq!(WaitType::SyscallStop, st.wait_type());
        assert_eq!(None, st.stop_sig());
    }

    #[test]
    fn ptrace_event_round_trip() {
        let st = WaitStatus::for_ptrace_event(PTRACE_EVENT_SECCOMP);
        assert_eq!(WaitType::PtraceEvent, st.wait_type());
        assert_eq!(Some(PTRACE_EVENT_SECCOMP), st.ptrace_event());
    }
}
