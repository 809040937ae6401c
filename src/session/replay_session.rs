//! The replay-side arbiter. Drives tracees under PTRACE_SYSEMU so no
//! syscall reaches the kernel, and satisfies every stop from the trace:
//!
//! - at a flush frame, the recorded record bytes are written back into
//!   the tracee's buffer; the subsequent untraced-callsite stops are
//!   emulated one record at a time, and the tracee's own wrapper code
//!   copies the refilled outparam bytes to user memory;
//! - at a syscall frame, the live entry state must match the recorded
//!   one exactly (anything else is fatal divergence), then the recorded
//!   memory effects and result are applied;
//! - clone/fork and process exit execute for real, since new tasks and
//!   dead tasks cannot be emulated.

use crate::auto_remote_syscalls::AutoRemoteSyscalls;
use crate::bindings::ptrace::{PTRACE_EVENT_CLONE, PTRACE_EVENT_EXIT, PTRACE_EVENT_FORK};
use crate::kernel_abi::{is_clone_syscall, is_fork_syscall, native, NATIVE_ARCH};
use crate::kernel_metadata::{signal_name, syscall_name};
use crate::log::{LogDebug, LogInfo, LogWarn};
use crate::preload_interface::{
    syscallbuf_hdr, syscallbuf_record, stored_record_size, SYSCALLBUF_BUFFER_SIZE,
    SYS_rtcall_init_syscall_buffer,
};
use crate::remote_ptr::RemotePtr;
use crate::replay_syscall::{rep_emulate_traced_syscall, rep_emulate_untraced_syscall};
use crate::session::record_session::spawn_tracee;
use crate::session::task::{ResumeRequest, Task, WaitRequest};
use crate::session::TaskMap;
use crate::sig::Sig;
use crate::trace::trace_frame::{Event, TraceFrame};
use crate::trace::trace_stream::TraceReader;
use libc::pid_t;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::error::Error;
use std::mem::size_of;
use std::path::Path;

#[derive(Debug, Eq, PartialEq)]
pub enum ReplayResult {
    ReplayContinue,
    ReplayExited(i32),
}

#[derive(Default)]
struct ReplayTaskState {
    /// The tracee is already sitting in an unconsumed stop.
    at_stop: bool,
    /// Signal recorded at this point, to inject on the next resume.
    pending_sig: Option<i32>,
}

pub struct ReplaySession {
    tasks: TaskMap,
    trace_in: TraceReader,
    /// Recorded tid -> live tid. Children appear here as their clone
    /// frames are replayed; the initial task binds on first use.
    tid_map: HashMap<pid_t, pid_t>,
    initial_live_tid: pid_t,
    task_state: HashMap<pid_t, ReplayTaskState>,
    last_exit_code: i32,
}

impl ReplaySession {
    pub fn create(trace_dir: &Path) -> Result<ReplaySession, Box<dyn Error>> {
        let trace_in = TraceReader::open(trace_dir)?;
        let header = trace_in.header().clone();
        log!(
            LogInfo,
            "replaying {} from {:?}",
            header.exe,
            trace_dir
        );

        let tid = spawn_tracee(&header.exe, &header.args, header.bind_to_cpu);
        let mut task = Task::new(tid, tid);
        task.wait();
        task.set_ptrace_options();
        task.open_mem_fd();

        let mut tasks = TaskMap::new();
        let mut task_state = HashMap::new();
        task_state.insert(tid, ReplayTaskState::default());
        tasks.insert(task);

        Ok(ReplaySession {
            tasks,
            trace_in,
            tid_map: HashMap::new(),
            initial_live_tid: tid,
            task_state,
            last_exit_code: 0,
        })
    }

    /// Consume one trace frame, driving the tracees to its position.
    pub fn replay_step(&mut self) -> ReplayResult {
        let frame = match self.trace_in.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return ReplayResult::ReplayExited(self.last_exit_code),
            Err(e) => fatal!("trace read failed: {}", e),
        };
        log!(LogDebug, "replaying frame {}", frame);

        let live_tid = self.live_tid(frame.tid);
        match frame.event.clone() {
            Event::Syscall {
                entry_regs,
                ret,
                mem_writes,
            } => {
                self.replay_traced_syscall(live_tid, &frame, entry_regs, ret, mem_writes);
            }
            Event::SyscallbufFlush { bytes } => {
                self.replay_flush(live_tid, &bytes);
            }
            Event::SyscallbufAbortCommit => {
                let t = self.task_mut(live_tid);
                t.syscallbuf_abort_commit_from_tracer();
            }
            Event::SyscallbufReset => {
                let t = self.task_mut(live_tid);
                if t.has_syscallbuf() {
                    t.reset_syscallbuf();
                }
            }
            Event::Desched => {
                // Position marker only; the arm/disarm pair around it
                // is emulated at the untraced stops themselves.
            }
            Event::Signal { signo } => {
                log!(LogDebug, "  queueing {} for delivery", signal_name(signo));
                self.state_mut(live_tid).pending_sig = Some(signo);
            }
            Event::Sched => (),
            Event::Exit { wait_status } => {
                self.replay_exit(live_tid, wait_status);
            }
            Event::TraceTermination => {
                log!(LogInfo, "trace termination reached");
                self.tasks.kill_all_tasks();
                return ReplayResult::ReplayExited(self.last_exit_code);
            }
        }
        ReplayResult::ReplayContinue
    }

    /// Expose the task set for diversion cloning.
    pub fn task_tids(&self) -> Vec<pid_t> {
        self.tasks.tids()
    }

    // --- frame handlers --------------------------------------------------

    fn replay_traced_syscall(
        &mut self,
        live_tid: pid_t,
        frame: &TraceFrame,
        entry_regs: crate::trace::trace_frame::EntryRegs,
        ret: i64,
        mem_writes: Vec<crate::trace::trace_frame::MemWrite>,
    ) {
        // A demoted may-block call leaves its arm/disarm-desched ioctls
        // in the instruction stream ahead of the recorded entry; they
        // are untraced and unrecorded, so emulate them in place.
        loop {
            self.advance_to_syscall_entry(live_tid);
            let is_desched = {
                let t = self.tasks.get_mut(live_tid).unwrap();
                t.is_syscall_stop() && t.is_desched_event_syscall()
            };
            if !is_desched {
                break;
            }
            let t = self.tasks.get_mut(live_tid).unwrap();
            rep_emulate_untraced_syscall(t, 0);
            self.state_mut(live_tid).at_stop = false;
        }
        let syscallno = entry_regs.syscallno as i32;

        if syscallno == SYS_rtcall_init_syscall_buffer {
            self.replay_rtcall_init_buffer(live_tid, &entry_regs, ret);
            return;
        }
        if is_clone_syscall(syscallno, NATIVE_ARCH) || is_fork_syscall(syscallno, NATIVE_ARCH) {
            self.replay_clone(live_tid, frame.tid, ret);
            return;
        }

        let t = self.tasks.get_mut(live_tid).unwrap();
        rep_emulate_traced_syscall(t, &entry_regs, ret, &mem_writes);
        self.state_mut(live_tid).at_stop = false;
    }

    /// Refill the buffer and emulate each refilled record at its
    /// untraced stop, so the tracee's wrappers find exactly the bytes
    /// they recorded.
    fn replay_flush(&mut self, live_tid: pid_t, bytes: &[u8]) {
        let expected = bytes.len() as u32;
        {
            let t = self.task_mut(live_tid);
            ed_assert!(
                t,
                t.has_syscallbuf(),
                "flush frame for a task with no syscall buffer"
            );
            t.write_syscallbuf_contents(bytes);
        }

        // Drive the tracee until its own commits have rebuilt the
        // recorded byte count.
        loop {
            {
                let t = self.task_mut(live_tid);
                if t.syscallbuf_num_rec_bytes() >= expected {
                    break;
                }
            }
            self.advance_to_syscall_entry(live_tid);
            let (is_desched_ioctl, committed) = {
                let t = self.tasks.get_mut(live_tid).unwrap();
                (
                    t.is_desched_event_syscall(),
                    t.syscallbuf_num_rec_bytes(),
                )
            };
            if is_desched_ioctl {
                // The arm/disarm-desched ioctls are emulated as no-ops
                // with a forced 0 return; the preload library aborts on
                // anything else.
                let t = self.tasks.get_mut(live_tid).unwrap();
                rep_emulate_untraced_syscall(t, 0);
                self.state_mut(live_tid).at_stop = false;
                continue;
            }
            let at_untraced = {
                let t = self.tasks.get_mut(live_tid).unwrap();
                t.at_untraced_syscall()
            };
            if !at_untraced {
                // The tracee reached a traced syscall while records
                // remain: the trace and the tracee disagree.
                let t = self.tasks.get_mut(live_tid).unwrap();
                ed_assert!(
                    t,
                    false,
                    "tracee left the buffered path with {} of {} flush bytes replayed",
                    committed,
                    expected
                );
            }
            // The next record's refilled header carries the recorded
            // return value for this untraced syscall.
            let rec_ret = {
                let t = self.tasks.get_mut(live_tid).unwrap();
                let rec_addr = t.syscallbuf_child.as_usize()
                    + size_of::<syscallbuf_hdr>()
                    + committed as usize;
                let rec: syscallbuf_record =
                    t.read_val(RemotePtr::from_val(rec_addr));
                ed_assert!(
                    t,
                    committed + stored_record_size(rec.size) <= expected,
                    "refilled record overruns the flush payload"
                );
                let syscallno = t.regs().original_syscallno() as i32;
                ed_assert!(
                    t,
                    syscallno == rec.syscallno as i32,
                    "buffered replay divergence: tracee at {}, record says {}",
                    syscall_name(syscallno, NATIVE_ARCH),
                    syscall_name(rec.syscallno as i32, NATIVE_ARCH)
                );
                rec.ret
            };
            let t = self.tasks.get_mut(live_tid).unwrap();
            rep_emulate_untraced_syscall(t, rec_ret);
            self.state_mut(live_tid).at_stop = false;
        }
    }

    /// The magic init call during replay: map the ring at its recorded
    /// address and adopt the recorded handshake values.
    fn replay_rtcall_init_buffer(
        &mut self,
        live_tid: pid_t,
        entry_regs: &crate::trace::trace_frame::EntryRegs,
        recorded_buffer_addr: i64,
    ) {
        let t = self.tasks.get_mut(live_tid).unwrap();
        t.untraced_syscall_ip = RemotePtr::from_val(entry_regs.args[0] as usize);
        let fdptr = entry_regs.args[3] as usize;
        t.desched_fd_child = t.read_val(RemotePtr::<i32>::from_val(fdptr));

        let mapped = {
            let mut remote = AutoRemoteSyscalls::new(t);
            remote.syscall(
                native::MMAP,
                &[
                    recorded_buffer_addr as usize,
                    SYSCALLBUF_BUFFER_SIZE,
                    (libc::PROT_READ | libc::PROT_WRITE) as usize,
                    (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED) as usize,
                    usize::MAX,
                    0,
                ],
            )
        };
        ed_assert!(
            t,
            mapped == recorded_buffer_addr as isize,
            "buffer landed at {:#x}, recorded at {:#x}",
            mapped,
            recorded_buffer_addr
        );
        t.syscallbuf_child = RemotePtr::from_val(recorded_buffer_addr as usize);
        let zeroed = syscallbuf_hdr::default();
        t.write_val(t.syscallbuf_child, &zeroed);

        rep_emulate_untraced_syscall(t, recorded_buffer_addr);
        self.state_mut(live_tid).at_stop = false;
    }

    /// clone/fork must really execute; afterwards the parent's live
    /// result is mapped to the recorded child tid.
    fn replay_clone(&mut self, live_tid: pid_t, _rec_parent: pid_t, recorded_ret: i64) {
        let (live_child, exited) = {
            let t = self.tasks.get_mut(live_tid).unwrap();
            // At the sysemu entry stop; resuming with PTRACE_SYSCALL
            // lets the syscall really execute.
            t.resume_execution(ResumeRequest::ResumeSyscall, WaitRequest::ResumeWait, None);
            // The clone event reports the new live tid.
            match t.maybe_ptrace_event() {
                Some(e) if e == PTRACE_EVENT_CLONE || e == PTRACE_EVENT_FORK => {
                    let mut msg: u64 = 0;
                    unsafe {
                        crate::bindings::ptrace::ptrace(
                            crate::bindings::ptrace::PTRACE_GETEVENTMSG,
                            t.tid,
                            std::ptr::null_mut(),
                            &mut msg as *mut u64 as *mut libc::c_void,
                        );
                    }
                    // Step to the syscall exit.
                    t.resume_execution(ResumeRequest::ResumeSyscall, WaitRequest::ResumeWait, None);
                    (msg as pid_t, false)
                }
                Some(e) if e == PTRACE_EVENT_EXIT => (0, true),
                _ => {
                    ed_assert!(t, false, "expected clone event, got {}", t.status());
                    unreachable!()
                }
            }
        };
        if exited {
            self.replay_exit(live_tid, 0);
            return;
        }

        log!(
            LogDebug,
            "  recorded child {} is live {}",
            recorded_ret,
            live_child
        );
        self.tid_map.insert(recorded_ret as pid_t, live_child);
        let mut child = Task::new(live_child, recorded_ret as pid_t);
        child.wait();
        child.set_ptrace_options();
        child.open_mem_fd();
        self.tasks.insert(child);
        self.task_state
            .insert(live_child, ReplayTaskState::default());

        // The parent sees the recorded tid, not the live one.
        let t = self.tasks.get_mut(live_tid).unwrap();
        let mut regs = *t.regs();
        regs.set_syscall_result_signed(recorded_ret as isize);
        t.set_regs(&regs);
        self.state_mut(live_tid).at_stop = false;
    }

    fn replay_exit(&mut self, live_tid: pid_t, wait_status: i32) {
        log!(LogDebug, "  {} exits with {:#x}", live_tid, wait_status);
        if let Some(code) = crate::wait_status::WaitStatus::new(wait_status).exit_code() {
            self.last_exit_code = code;
        }
        if let Some(t) = self.tasks.get_mut(live_tid) {
            // Run the tracee into its real exit; the exit syscall is
            // executed, not emulated.
            loop {
                t.resume_execution(ResumeRequest::ResumeSyscall, WaitRequest::ResumeWait, None);
                if t.maybe_ptrace_event() == Some(PTRACE_EVENT_EXIT) {
                    t.resume_execution(
                        ResumeRequest::ResumeCont,
                        WaitRequest::ResumeWait,
                        None,
                    );
                    break;
                }
                if t.status().exit_code().is_some() || t.status().fatal_sig().is_some() {
                    break;
                }
            }
        }
        self.tasks.remove(live_tid);
        self.task_state.remove(&live_tid);
    }

    // --- plumbing --------------------------------------------------------

    /// Advance the task to its next syscall-entry stop under sysemu,
    /// delivering any queued recorded signal on the way.
    fn advance_to_syscall_entry(&mut self, live_tid: pid_t) {
        if self.state_mut(live_tid).at_stop {
            return;
        }
        let sig = self.state_mut(live_tid).pending_sig.take();
        let t = self.tasks.get_mut(live_tid).unwrap();
        let mut deliver = sig.and_then(|s| Sig::try_from(s).ok());
        loop {
            t.resume_execution(
                ResumeRequest::ResumeSysemu,
                WaitRequest::ResumeWait,
                deliver.take(),
            );
            let status = t.status();
            if status.is_syscall() {
                break;
            }
            if let Some(event) = status.ptrace_event() {
                ed_assert!(t, event == PTRACE_EVENT_EXIT, "unexpected event {}", event);
                break;
            }
            if let Some(sig) = status.stop_sig() {
                // Signals the recorder saw are in the trace as frames;
                // anything else here is the tracee's own deterministic
                // signal (e.g. a SIGSEGV the recording also hit), which
                // the surrounding signal bookkeeping replays. We just
                // re-deliver it.
                log!(LogWarn, "  passing through {}", signal_name(sig));
                deliver = Sig::try_from(sig).ok();
                continue;
            }
            ed_assert!(t, false, "unclassified replay stop {}", status);
        }
        self.state_mut(live_tid).at_stop = true;
    }

    fn live_tid(&mut self, rec_tid: pid_t) -> pid_t {
        let initial = self.initial_live_tid;
        *self.tid_map.entry(rec_tid).or_insert(initial)
    }

    fn task_mut(&mut self, live_tid: pid_t) -> &mut Task {
        match self.tasks.get_mut(live_tid) {
            Some(t) => t,
            None => fatal!("no live task for tid {}", live_tid),
        }
    }

    fn state_mut(&mut self, live_tid: pid_t) -> &mut ReplayTaskState {
        self.task_state
            .entry(live_tid)
            .or_insert_with(ReplayTaskState::default)
    }

    /// Hand the task set to a diversion; the diversion session borrows
    /// the tasks and returns them untouched (the diversion's own
    /// speculative state is torn down with it).
    pub fn tasks_mut(&mut self) -> &mut TaskMap {
        &mut self.tasks
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.tasks.kill_all_tasks();
    }
}
