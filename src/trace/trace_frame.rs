use crate::registers::Registers;
use libc::pid_t;
use std::fmt;

/// Global time is recorded as the number of frames written so far.
pub type FrameTime = u64;

/// The register state the recorder observed at a syscall entry, in the
/// arch-independent shape the stream carries. Replay compares these
/// against the live tracee to detect divergence.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct EntryRegs {
    pub ip: u64,
    pub sp: u64,
    pub syscallno: i64,
    pub args: [u64; 6],
}

impl EntryRegs {
    pub fn from_registers(regs: &Registers) -> EntryRegs {
        EntryRegs {
            ip: regs.ip().as_usize() as u64,
            sp: regs.sp().as_usize() as u64,
            syscallno: regs.original_syscallno() as i64,
            args: [
                regs.arg1() as u64,
                regs.arg2() as u64,
                regs.arg3() as u64,
                regs.arg4() as u64,
                regs.arg5() as u64,
                regs.arg6() as u64,
            ],
        }
    }

    pub fn matches(&self, regs: &Registers) -> bool {
        *self == EntryRegs::from_registers(regs)
    }
}

/// One recorded write to tracee memory: the outparam bytes of a traced
/// syscall, replayed verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemWrite {
    pub addr: u64,
    pub bytes: Vec<u8>,
}

/// The kinds of events the stream carries. The flush payload is the raw
/// byte range drained from a tracee buffer, reinjected byte-for-byte on
/// replay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    /// An individually traced syscall: entry state, result, and the
    /// memory its exit wrote.
    Syscall {
        entry_regs: EntryRegs,
        ret: i64,
        mem_writes: Vec<MemWrite>,
    },
    /// The verbatim contents of a tracee's syscall buffer at a flush
    /// point.
    SyscallbufFlush { bytes: Vec<u8> },
    /// The tracer demoted an in-progress buffered record (desched); the
    /// tracee will discard it at commit.
    SyscallbufAbortCommit,
    /// The buffer's record count was reset to zero.
    SyscallbufReset,
    /// A desched notification pair was consumed while disarming.
    Desched,
    /// Signal delivery observed at this point.
    Signal { signo: i32 },
    /// A scheduling decision point with no other observable effect.
    Sched,
    /// A task exited with this status.
    Exit { wait_status: i32 },
    /// End of the recording.
    TraceTermination,
}

impl Event {
    /// Stable tag for the wire encoding.
    pub fn kind(&self) -> u8 {
        match self {
            Event::Syscall { .. } => 1,
            Event::SyscallbufFlush { .. } => 2,
            Event::SyscallbufAbortCommit => 3,
            Event::SyscallbufReset => 4,
            Event::Desched => 5,
            Event::Signal { .. } => 6,
            Event::Sched => 7,
            Event::Exit { .. } => 8,
            Event::TraceTermination => 9,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceFrame {
    pub time: FrameTime,
    pub tid: pid_t,
    pub event: Event,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ time: {}, tid: {}, event: ", self.time, self.tid)?;
        match &self.event {
            Event::Syscall {
                entry_regs, ret, ..
            } => write!(f, "syscall({}) = {}", entry_regs.syscallno, ret)?,
            Event::SyscallbufFlush { bytes } => write!(f, "flush[{} bytes]", bytes.len())?,
            Event::SyscallbufAbortCommit => write!(f, "abort-commit")?,
            Event::SyscallbufReset => write!(f, "buf-reset")?,
            Event::Desched => write!(f, "desched")?,
            Event::Signal { signo } => write!(f, "signal({})", signo)?,
            Event::Sched => write!(f, "sched")?,
            Event::Exit { wait_status } => write!(f, "exit({:#x})", wait_status)?,
            Event::TraceTermination => write!(f, "termination")?,
        }
        write!(f, " }}")
    }
}
