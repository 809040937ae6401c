//! Per-syscall replay policy. During replay no syscall reaches the
//! kernel: the tracee advances under PTRACE_SYSEMU, and each stop is
//! satisfied from the trace -- result register rewritten, recorded
//! outparam bytes written back to the addresses they were recorded
//! from.

use crate::kernel_metadata::syscall_name;
use crate::kernel_abi::NATIVE_ARCH;
use crate::log::LogDebug;
use crate::remote_ptr::RemotePtr;
use crate::session::task::Task;
use crate::trace::trace_frame::{EntryRegs, MemWrite};

/// Replay a traced syscall from its frame: verify we are at the same
/// control-flow position the recorder saw, restore the recorded memory
/// effects, and emulate the result.
///
/// A mismatch between the recorded and observed entry state means the
/// trace is corrupted or the tracee is nondeterministic through an
/// unrecorded channel; there is no recovering a divergent replay.
pub fn rep_emulate_traced_syscall(
    t: &mut Task,
    entry_regs: &EntryRegs,
    ret: i64,
    mem_writes: &[MemWrite],
) {
    let regs = *t.regs();
    ed_assert!(
        t,
        entry_regs.matches(&regs),
        "replay divergence at syscall {}: recorded entry {:?}, live {:?}",
        syscall_name(entry_regs.syscallno as i32, NATIVE_ARCH),
        entry_regs,
        regs
    );
    log!(
        LogDebug,
        "emulating {} = {}",
        syscall_name(entry_regs.syscallno as i32, NATIVE_ARCH),
        ret
    );

    for w in mem_writes {
        t.write_bytes(RemotePtr::from_val(w.addr as usize), &w.bytes);
    }

    t.finish_emulated_syscall();
    let mut r = *t.regs();
    r.set_syscall_result_signed(ret as isize);
    t.set_regs(&r);
}

/// Replay one buffered syscall at the untraced callsite: the buffer was
/// already refilled with the recorded outparam bytes, so only the
/// result register needs to be produced; the wrapper code copies the
/// shadow data out exactly as it did during recording.
pub fn rep_emulate_untraced_syscall(t: &mut Task, ret: i64) {
    t.finish_emulated_syscall();
    let mut r = *t.regs();
    r.set_syscall_result_signed(ret as isize);
    t.set_regs(&r);
}
