//! The record-side syscall arbiter. Consumes ptrace stops from the
//! tracee set and turns them into trace frames:
//!
//! - a traced syscall entry first drains ("flushes") the thread's
//!   syscall buffer verbatim into the trace, then records the syscall's
//!   entry state, result, and memory effects;
//! - a SIGIO identifying the desched counter demotes the in-progress
//!   buffered record, re-records the interrupted call as a normal
//!   traced pair, and silently consumes the counter's second SIGIO;
//! - other signals are recorded and delivered;
//! - ptrace lifecycle events (seccomp arrival, exit) adjust how the
//!   task is driven.

use crate::auto_remote_syscalls::AutoRemoteSyscalls;
use crate::bindings::ptrace::{
    ptrace, PTRACE_EVENT_CLONE, PTRACE_EVENT_EXEC, PTRACE_EVENT_EXIT, PTRACE_EVENT_FORK,
    PTRACE_EVENT_SECCOMP, PTRACE_EVENT_VFORK, PTRACE_GETEVENTMSG, PTRACE_TRACEME,
};
use crate::flags::Flags;
use crate::kernel_abi::{native, NATIVE_ARCH};
use crate::kernel_metadata::{errno_name, signal_name, syscall_name};
use crate::log::{LogDebug, LogInfo, LogWarn};
use crate::preload_interface::{
    syscallbuf_hdr, SYSCALLBUF_BUFFER_SIZE, SYSCALLBUF_DISABLED_ENV_VAR, SYSCALLBUF_LIB_FILENAME,
    SYS_rtcall_init_syscall_buffer,
};
use crate::record_syscall::rec_process_syscall;
use crate::remote_ptr::RemotePtr;
use crate::session::task::{ResumeRequest, Task, WaitRequest};
use crate::session::TaskMap;
use crate::sig::Sig;
use crate::trace::trace_frame::{EntryRegs, Event};
use crate::trace::trace_stream::{TraceHeader, TraceResult, TraceWriter};
use crate::wait_status::{WaitStatus, WaitType};
use libc::{c_void, pid_t, waitpid, __WALL};
use nix::errno::errno;
use std::convert::TryFrom;
use std::error::Error;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::ptr;

#[derive(Debug, Eq, PartialEq)]
pub enum RecordResult {
    StepContinue,
    StepExited(i32),
}

pub struct RecordSession {
    tasks: TaskMap,
    trace_out: TraceWriter,
    /// Exit code of the last task to leave, reported when the set
    /// drains empty.
    last_exit_code: i32,
}

impl RecordSession {
    pub fn create(
        exe: &str,
        args: &[String],
        trace_dir: Option<&Path>,
    ) -> Result<RecordSession, Box<dyn Error>> {
        let dir: PathBuf = match trace_dir {
            Some(d) => d.to_owned(),
            None => PathBuf::from(format!("retrace-trace-{}", std::process::id())),
        };
        let bind_to_cpu = Flags::get().bind_to_cpu.map(|c| c as i32).unwrap_or(-1);
        let header = TraceHeader {
            exe: exe.to_owned(),
            args: args.to_vec(),
            bind_to_cpu,
        };
        let trace_out = TraceWriter::create(&dir, &header)?;
        log!(LogInfo, "recording {} to {:?}", exe, dir);

        if crate::util::running_under_retrace() {
            fatal!("nested recording is not supported");
        }
        if crate::util::running_under_hypervisor()
            && !Flags::get().suppress_environment_warnings
        {
            log!(
                LogWarn,
                "running under a hypervisor; desched counter delivery may be unreliable"
            );
        }
        debug_assert_eq!(0, SYSCALLBUF_BUFFER_SIZE % crate::util::page_size());

        let tid = spawn_tracee(exe, args, bind_to_cpu);
        let mut task = Task::new(tid, tid);
        // First stop: the SIGTRAP from the execve under TRACEME.
        task.wait();
        task.set_ptrace_options();
        task.open_mem_fd();

        let mut tasks = TaskMap::new();
        tasks.insert(task);
        let mut session = RecordSession {
            tasks,
            trace_out,
            last_exit_code: 1,
        };
        session.task_continue(tid);
        Ok(session)
    }

    /// Drive the tracees forward by one observed event.
    pub fn record_step(&mut self) -> RecordResult {
        if self.tasks.is_empty() {
            return RecordResult::StepExited(self.last_exit_code);
        }

        // The scheduler proper is a collaborator; here any stopped
        // tracee is taken as the next to observe.
        let mut raw_status: i32 = 0;
        let tid = unsafe { waitpid(-1, &mut raw_status, __WALL) };
        if tid < 0 {
            fatal!("waitpid(-1) failed: {}", errno_name(errno()));
        }
        let status = WaitStatus::new(raw_status);
        if !self.tasks.contains(tid) {
            // A thread created by clone/fork stops before we processed
            // the parent's event; adopt it now.
            log!(LogDebug, "adopting new task {}", tid);
            let mut t = Task::new(tid, tid);
            t.set_status(status);
            t.set_ptrace_options();
            t.open_mem_fd();
            self.tasks.insert(t);
            return RecordResult::StepContinue;
        }

        {
            let t = self.tasks.get_mut(tid).unwrap();
            t.set_status(status);
        }

        match status.wait_type() {
            WaitType::Exit | WaitType::FatalSignal => {
                // Already reaped; the PTRACE_EVENT_EXIT path recorded it.
                self.tasks.remove(tid);
                return RecordResult::StepContinue;
            }
            _ => (),
        }

        if let Some(event) = status.ptrace_event() {
            self.handle_ptrace_event(tid, event);
            return RecordResult::StepContinue;
        }

        if status.is_syscall() {
            self.handle_traced_syscall_entry(tid);
            return RecordResult::StepContinue;
        }

        if let Some(sig) = status.stop_sig() {
            self.handle_signal(tid, sig);
            return RecordResult::StepContinue;
        }

        log!(LogWarn, "unclassified stop {} for {}", status, tid);
        self.task_continue(tid);
        RecordResult::StepContinue
    }

    pub fn terminate_recording(mut self) -> TraceResult<()> {
        log!(LogInfo, "recording final trace-termination event");
        for tid in self.tasks.tids() {
            self.flush_syscallbuf(tid)?;
        }
        self.trace_out.write_frame(0, &Event::TraceTermination)?;
        self.tasks.kill_all_tasks();
        self.trace_out.close()
    }

    // --- stop handlers ---------------------------------------------------

    fn handle_ptrace_event(&mut self, tid: pid_t, event: u32) {
        log!(LogDebug, "  {}: ptrace event {}", tid, event);
        match event {
            PTRACE_EVENT_SECCOMP => {
                // First seccomp event: the tracee's filter is live; from
                // now on PTRACE_CONT suffices and the filter makes the
                // stops. The event fires at syscall entry.
                let t = self.tasks.get_mut(tid).unwrap();
                if !t.seccomp_bpf_enabled {
                    t.seccomp_bpf_enabled = true;
                    log!(LogDebug, "  seccomp filter is live for {}", tid);
                }
                self.handle_traced_syscall_entry(tid);
            }
            PTRACE_EVENT_CLONE | PTRACE_EVENT_FORK | PTRACE_EVENT_VFORK => {
                let new_tid = self.get_eventmsg(tid) as pid_t;
                log!(LogDebug, "  {} created task {}", tid, new_tid);
                // The filter lets clone/fork through untrapped, so the
                // event stop is the only place to record them. Replay
                // re-executes the call for real and maps the recorded
                // child tid to the live one.
                self.must_flush_syscallbuf(tid);
                let entry_regs = {
                    let t = self.tasks.get_mut(tid).unwrap();
                    EntryRegs::from_registers(t.regs())
                };
                self.must_write(
                    tid,
                    &Event::Syscall {
                        entry_regs,
                        ret: new_tid as i64,
                        mem_writes: Vec::new(),
                    },
                );
                if !self.tasks.contains(new_tid) {
                    let mut child = Task::new(new_tid, new_tid);
                    // The child stops before running; adopt and hold it
                    // until its first own stop arrives via waitpid.
                    child.wait();
                    child.set_ptrace_options();
                    child.open_mem_fd();
                    // The child inherits the parent's filter state; its
                    // buffer mapping is dropped by the atfork hook.
                    child.seccomp_bpf_enabled =
                        self.tasks.get_mut(tid).unwrap().seccomp_bpf_enabled;
                    self.tasks.insert(child);
                    self.task_continue(new_tid);
                }
                self.task_continue(tid);
            }
            PTRACE_EVENT_EXEC => {
                let t = self.tasks.get_mut(tid).unwrap();
                t.open_mem_fd();
                self.task_continue(tid);
            }
            PTRACE_EVENT_EXIT => {
                let exit_status = self.get_eventmsg(tid) as i32;
                let _ = self.flush_syscallbuf(tid);
                self.must_write(tid, &Event::Exit {
                    wait_status: exit_status,
                });
                let status = WaitStatus::new(exit_status);
                if let Some(code) = status.exit_code() {
                    self.last_exit_code = code;
                }
                // Let the task finish dying and reap it.
                let t = self.tasks.get_mut(tid).unwrap();
                t.resume_execution(ResumeRequest::ResumeCont, WaitRequest::ResumeWait, None);
                self.tasks.remove(tid);
            }
            _ => {
                log!(LogWarn, "unhandled ptrace event {} for {}", event, tid);
                self.task_continue(tid);
            }
        }
    }

    /// The tracee is at a traced syscall entry (an unbuffered syscall,
    /// a buffered path's traced fallback, or an explicit flush).
    fn handle_traced_syscall_entry(&mut self, tid: pid_t) {
        let entry_regs;
        let syscallno;
        {
            let t = self.tasks.get_mut(tid).unwrap();
            let regs = *t.regs();
            entry_regs = EntryRegs::from_registers(&regs);
            syscallno = regs.original_syscallno() as i32;
        }
        log!(
            LogDebug,
            "  {}: traced syscall entry {}",
            tid,
            syscall_name(syscallno, NATIVE_ARCH)
        );

        // Any records accumulated since the last trap are flushed
        // before the new event, so the replayer sees them at the same
        // point.
        self.must_flush_syscallbuf(tid);

        // Step to syscall exit. Linux kicks tasks out of syscalls
        // before delivering signals, but a signal stop can still arrive
        // ahead of the exit stop; record such signals at this position
        // and deliver them once the exit is reached.
        let mut deliver: Option<Sig> = None;
        let exited = loop {
            let sig = {
                let t = self.tasks.get_mut(tid).unwrap();
                t.resume_execution(
                    ResumeRequest::ResumeSyscall,
                    WaitRequest::ResumeWait,
                    deliver.take(),
                );
                if t.seen_ptrace_exit_event() {
                    break true;
                }
                if t.status().is_syscall() {
                    break false;
                }
                match t.status().stop_sig() {
                    Some(sig) => sig,
                    None => break false,
                }
            };
            self.must_write(tid, &Event::Signal { signo: sig });
            deliver = Sig::try_from(sig).ok();
        };
        if exited {
            // The syscall was exit/exit_group; handle the exit event.
            self.handle_ptrace_event(tid, PTRACE_EVENT_EXIT);
            return;
        }

        if syscallno == SYS_rtcall_init_syscall_buffer {
            self.process_rtcall_init_buffer(tid, &entry_regs);
            return;
        }

        let (ret, mem_writes) = {
            let t = self.tasks.get_mut(tid).unwrap();
            let ret = t.regs().syscall_result_signed() as i64;
            let writes = rec_process_syscall(t);
            (ret, writes)
        };
        self.must_write(
            tid,
            &Event::Syscall {
                entry_regs,
                ret,
                mem_writes,
            },
        );
        self.task_continue(tid);
    }

    /// SIGIO from the desched counter, or an ordinary signal.
    fn handle_signal(&mut self, tid: pid_t, sig: i32) {
        let is_desched = {
            let t = self.tasks.get_mut(tid).unwrap();
            let si = t.get_siginfo();
            sig == libc::SIGIO && t.is_desched_siginfo(&si)
        };
        if is_desched {
            self.handle_desched_event(tid);
            return;
        }

        log!(LogDebug, "  {}: signal {}", tid, signal_name(sig));
        self.must_flush_syscallbuf(tid);
        self.must_write(tid, &Event::Signal { signo: sig });
        // Deliver it.
        let t = self.tasks.get_mut(tid).unwrap();
        let how = if t.seccomp_bpf_enabled {
            ResumeRequest::ResumeCont
        } else {
            ResumeRequest::ResumeSyscall
        };
        t.resume_execution(how, WaitRequest::ResumeNonblocking, Sig::try_from(sig).ok());
    }

    /// The thread was involuntarily descheduled inside a may-block
    /// untraced syscall. Demote the in-progress buffered record and
    /// re-record the interrupted call as a traced entry/exit pair,
    /// giving the scheduler a chance to run another task. The counter
    /// yields two SIGIOs per genuine desched until the disarm lands;
    /// both are discarded here.
    fn handle_desched_event(&mut self, tid: pid_t) {
        log!(LogDebug, "  {}: desched", tid);

        {
            let t = self.tasks.get_mut(tid).unwrap();
            if !t.has_syscallbuf() {
                // Counter noise before buffer setup; drop it.
                t.resume_execution(
                    ResumeRequest::ResumeCont,
                    WaitRequest::ResumeNonblocking,
                    None,
                );
                return;
            }
            t.syscallbuf_abort_commit_from_tracer();
        }
        self.must_write(tid, &Event::SyscallbufAbortCommit);

        // Step syscall-by-syscall until the disarm-desched ioctl,
        // consuming desched SIGIOs (including the counter's second
        // firing) along the way and re-recording the interrupted
        // syscall as a traced pair.
        let mut deliver: Option<Sig> = None;
        loop {
            let stop_classification = {
                let t = self.tasks.get_mut(tid).unwrap();
                t.resume_execution(
                    ResumeRequest::ResumeSyscall,
                    WaitRequest::ResumeWait,
                    deliver.take(),
                );
                let status = t.status();
                if let Some(sig) = status.stop_sig() {
                    let si = t.get_siginfo();
                    if sig == libc::SIGIO && t.is_desched_siginfo(&si) {
                        log!(LogDebug, "  discarding desched SIGIO");
                        continue;
                    }
                    Err(sig)
                } else if status.is_syscall() {
                    Ok(t.is_disarm_desched_event_syscall())
                } else {
                    // Exit events and the like end the hunt.
                    Ok(true)
                }
            };
            match stop_classification {
                Err(sig) => {
                    // Another signal became pending while disarming;
                    // record it here and deliver it on the next resume.
                    self.must_write(tid, &Event::Signal { signo: sig });
                    deliver = Sig::try_from(sig).ok();
                }
                Ok(false) => {
                    // A syscall entry that isn't the disarm: this is
                    // the interrupted call being restarted; re-record
                    // it as an ordinary traced pair.
                    let (entry_regs, ret, writes) = {
                        let t = self.tasks.get_mut(tid).unwrap();
                        let entry = EntryRegs::from_registers(t.regs());
                        t.resume_execution(
                            ResumeRequest::ResumeSyscall,
                            WaitRequest::ResumeWait,
                            None,
                        );
                        let ret = t.regs().syscall_result_signed() as i64;
                        let writes = rec_process_syscall(t);
                        (entry, ret, writes)
                    };
                    self.must_write(
                        tid,
                        &Event::Syscall {
                            entry_regs,
                            ret,
                            mem_writes: writes,
                        },
                    );
                }
                Ok(true) => {
                    // Step over the disarm ioctl's exit.
                    let t = self.tasks.get_mut(tid).unwrap();
                    t.resume_execution(ResumeRequest::ResumeSyscall, WaitRequest::ResumeWait, None);
                    break;
                }
            }
        }

        self.must_write(tid, &Event::Desched);

        // The tracee has finished sanity-checking the aborted record
        // and won't touch the buffer again in this transaction; reset
        // the record counter now.
        {
            let t = self.tasks.get_mut(tid).unwrap();
            t.reset_syscallbuf();
        }
        self.must_write(tid, &Event::SyscallbufReset);
        self.task_continue(tid);
    }

    /// Service the magic buffer-init syscall: learn the untraced
    /// callsite and the desched fd, map the ring, and return its
    /// address as the syscall result. Called with the tracee at the
    /// magic call's exit, all tracee signals blocked.
    fn process_rtcall_init_buffer(&mut self, tid: pid_t, entry_regs: &EntryRegs) {
        let untraced_ip = entry_regs.args[0] as usize;
        let fdptr = entry_regs.args[3] as usize;

        let t = self.tasks.get_mut(tid).unwrap();
        t.untraced_syscall_ip = RemotePtr::from_val(untraced_ip);
        // The fd slot holds the tracee-side desched counter fd number;
        // the full fd passing over the control socket is the mapping
        // bootstrap collaborator's job.
        t.desched_fd_child = t.read_val(RemotePtr::<i32>::from_val(fdptr));
        log!(
            LogDebug,
            "  {}: untraced ip {:#x}, desched fd {}",
            tid,
            untraced_ip,
            t.desched_fd_child
        );

        let buffer_addr = {
            let mut remote = AutoRemoteSyscalls::new(t);
            remote.syscall(
                native::MMAP,
                &[
                    0,
                    SYSCALLBUF_BUFFER_SIZE,
                    (libc::PROT_READ | libc::PROT_WRITE) as usize,
                    (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as usize,
                    usize::MAX, // fd = -1
                    0,
                ],
            )
        };
        if buffer_addr <= 0 {
            fatal!("failed to map syscall buffer in {}", tid);
        }
        t.syscallbuf_child = RemotePtr::from_val(buffer_addr as usize);
        let zeroed_hdr = syscallbuf_hdr::default();
        t.write_val(t.syscallbuf_child, &zeroed_hdr);

        // The magic syscall returns the mapped address.
        let mut regs = *t.regs();
        regs.set_syscall_result(buffer_addr as usize);
        t.set_regs(&regs);

        self.must_write(
            tid,
            &Event::Syscall {
                entry_regs: *entry_regs,
                ret: buffer_addr as i64,
                mem_writes: Vec::new(),
            },
        );
        self.task_continue(tid);
    }

    // --- plumbing --------------------------------------------------------

    fn get_eventmsg(&mut self, tid: pid_t) -> u64 {
        let mut msg: u64 = 0;
        if unsafe {
            ptrace(
                PTRACE_GETEVENTMSG,
                tid,
                ptr::null_mut(),
                &mut msg as *mut u64 as *mut c_void,
            )
        } < 0
        {
            fatal!("PTRACE_GETEVENTMSG failed: {}", errno_name(errno()));
        }
        msg
    }

    /// Drain the thread's buffer into the trace, verbatim, and reset
    /// it. No-op when there is nothing buffered.
    fn flush_syscallbuf(&mut self, tid: pid_t) -> TraceResult<()> {
        let bytes = {
            let t = match self.tasks.get_mut(tid) {
                Some(t) => t,
                None => return Ok(()),
            };
            if !t.has_syscallbuf() || t.syscallbuf_num_rec_bytes() == 0 {
                return Ok(());
            }
            t.read_syscallbuf_contents()
        };
        log!(LogDebug, "  flushing {} buffered bytes from {}", bytes.len(), tid);
        self.trace_out
            .write_frame(tid, &Event::SyscallbufFlush { bytes })?;
        let t = self.tasks.get_mut(tid).unwrap();
        t.reset_syscallbuf();
        self.trace_out.write_frame(tid, &Event::SyscallbufReset)?;
        Ok(())
    }

    fn must_flush_syscallbuf(&mut self, tid: pid_t) {
        if let Err(e) = self.flush_syscallbuf(tid) {
            fatal!("trace write failed: {}", e);
        }
    }

    fn must_write(&mut self, tid: pid_t, event: &Event) {
        if let Err(e) = self.trace_out.write_frame(tid, event) {
            fatal!("trace write failed: {}", e);
        }
    }

    /// Resume a task the way the recorder drives tracees: with
    /// PTRACE_SYSCALL until the tracee's filter is installed (we won't
    /// receive seccomp events before that), with PTRACE_CONT after.
    fn task_continue(&mut self, tid: pid_t) {
        if let Some(t) = self.tasks.get_mut(tid) {
            let how = if t.seccomp_bpf_enabled {
                ResumeRequest::ResumeCont
            } else {
                ResumeRequest::ResumeSyscall
            };
            t.resume_execution(how, WaitRequest::ResumeNonblocking, None);
        }
    }
}

/// Fork the tracee: child disables address randomization (record and
/// replay must lay memory out identically), binds to the recording CPU,
/// requests tracing, injects the preload library, and execs.
pub(crate) fn spawn_tracee(exe: &str, args: &[String], bind_to_cpu: i32) -> pid_t {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        fatal!("fork failed: {}", errno_name(errno()));
    }
    if pid > 0 {
        return pid;
    }

    // Child.
    unsafe {
        libc::personality(libc::ADDR_NO_RANDOMIZE as u64);
    }
    if bind_to_cpu >= 0 {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(bind_to_cpu as usize, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        }
    }
    unsafe {
        if ptrace(PTRACE_TRACEME, 0, ptr::null_mut(), ptr::null_mut()) < 0 {
            libc::_exit(126);
        }
    }

    let flags = Flags::get();
    let preload = flags
        .syscall_buffer_lib_path
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| SYSCALLBUF_LIB_FILENAME.to_owned());
    std::env::set_var("LD_PRELOAD", preload);
    std::env::set_var("RUNNING_UNDER_RETRACE", "1");
    if flags.disable_syscall_buffer {
        std::env::set_var(SYSCALLBUF_DISABLED_ENV_VAR, "1");
    }

    let c_exe = CString::new(exe).unwrap();
    let mut c_args: Vec<CString> = vec![c_exe.clone()];
    c_args.extend(args.iter().map(|a| CString::new(a.as_str()).unwrap()));
    let mut argv: Vec<*const libc::c_char> = c_args.iter().map(|a| a.as_ptr()).collect();
    argv.push(ptr::null());
    unsafe {
        libc::execvp(c_exe.as_ptr(), argv.as_ptr());
        libc::_exit(127);
    }
}
