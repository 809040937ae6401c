//! Per-thread syscall buffering, so the tracer can process a whole batch
//! of syscalls with one trap instead of a trap per call.
//!
//! Each thread owns one shared-memory ring, mapped at the same address
//! in tracer and tracee. Wrappers reserve space, redirect syscall
//! outparams into the reservation, invoke the kernel through the
//! untraced callsite, then commit. When the buffer fills up, or an
//! unbuffered syscall is made, control traps to the tracer, which drains
//! the ring into the trace.
//!
//! During replay the tracer refills the ring with the recorded bytes at
//! each flush point and emulates each buffered call's register result;
//! the same wrapper code then restores the recorded data to the user's
//! outparams with no syscall to the kernel.
//!
//! May-block syscalls get a "desched counter" armed around them: a
//! perf event counting software context switches, sample period 1,
//! delivering SIGIO to this thread. If the kernel blocks the call and
//! schedules the thread out, the SIGIO stop tells the tracer to run
//! another task instead of spinning on a thread that cannot progress.
//!
//! The tracer always sees *two* SIGIOs per desched notification: the
//! first schedules the thread without running application code, the
//! resulting ptrace stop bumps the counter again, and the second SIGIO
//! is queued behind the first. The tracer expects the pair and silently
//! discards both until the disarm completes. Do not "fix" this here.

use crate::bindings::fcntl::{f_owner_ex, F_OWNER_TID, F_SETOWN_EX, F_SETSIG};
use crate::bindings::perf_event::{
    perf_event_attr, ATTR_DISABLED, PERF_COUNT_SW_CONTEXT_SWITCHES, PERF_EVENT_IOC_DISABLE,
    PERF_EVENT_IOC_ENABLE, PERF_TYPE_SOFTWARE,
};
use crate::kernel_abi::native;
use crate::preload::raw_syscall::{
    traced_syscall0, traced_syscall1, traced_syscall3, traced_syscall4, traced_syscall5,
    traced_syscall6, untraced_syscall3, untraced_syscall_ip,
};
use crate::preload_interface::{
    socketcall_args, syscallbuf_hdr, syscallbuf_record, stored_record_size, DeschedMode,
    SYSCALLBUF_BUFFER_SIZE, SYS_rtcall_init_syscall_buffer,
};
use crate::seccomp_bpf;
use std::cell::Cell;
use std::fmt;
use std::mem::size_of;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

thread_local! {
    /// This thread's buffer mapping, null until the first intercepted
    /// call. The lazy handshake happens through a traced path, so the
    /// thread_local's own lazy initialization also runs outside any
    /// wrapper reentry.
    static BUFFER: Cell<*mut u8> = Cell::new(std::ptr::null_mut());
    /// Whether the buffer is currently in use for a system call. A
    /// signal handler that interrupts a wrapped call must not also use
    /// the buffer; this flag is the only synchronization, by design --
    /// the library is signal-safe precisely because there is nothing to
    /// deadlock on.
    static BUFFER_LOCKED: Cell<bool> = Cell::new(false);
    static DESCHED_COUNTER_FD: Cell<RawFd> = Cell::new(-1);
}

/// The filter is process-wide; install it exactly once.
static SECCOMP_FILTER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Set from the environment on first use; when true every wrapper takes
/// the traced path and no buffer is ever mapped.
static BUFFERING_DISABLED: AtomicBool = AtomicBool::new(false);

fn buffer() -> *mut u8 {
    BUFFER.with(|b| b.get())
}

fn buffer_hdr() -> *mut syscallbuf_hdr {
    buffer() as *mut syscallbuf_hdr
}

/// The byte just after the last valid record.
fn buffer_last() -> *mut u8 {
    unsafe { buffer().add(size_of::<syscallbuf_hdr>() + (*buffer_hdr()).num_rec_bytes as usize) }
}

/// The byte just after the very end of the mapped region.
fn buffer_end() -> *mut u8 {
    unsafe { buffer().add(SYSCALLBUF_BUFFER_SIZE) }
}

pub fn desched_counter_fd() -> RawFd {
    DESCHED_COUNTER_FD.with(|fd| fd.get())
}

// --- traced infrastructure syscalls -------------------------------------
//
// These trap to the tracer, which is what we want for calls the tracer
// must observe or emulate. None of them may go through libc wrappers.

pub unsafe fn traced_exit_group(status: i32) -> ! {
    traced_syscall1(native::EXIT_GROUP, status as usize);
    unreachable!()
}

unsafe fn traced_fcntl(fd: RawFd, cmd: i32, arg: usize) -> isize {
    traced_syscall3(native::FCNTL, fd as usize, cmd as usize, arg)
}

unsafe fn traced_gettid() -> libc::pid_t {
    traced_syscall0(native::GETTID) as libc::pid_t
}

unsafe fn traced_perf_event_open(
    attr: *const perf_event_attr,
    pid: libc::pid_t,
    cpu: i32,
    group_fd: i32,
    flags: usize,
) -> isize {
    traced_syscall5(
        native::PERF_EVENT_OPEN,
        attr as usize,
        pid as usize,
        cpu as usize,
        group_fd as usize,
        flags,
    )
}

unsafe fn traced_prctl(option: i32, arg2: usize, arg3: usize, arg4: usize, arg5: usize) -> isize {
    traced_syscall5(native::PRCTL, option as usize, arg2, arg3, arg4, arg5)
}

/// The kernel's sigset is 8 bytes regardless of glibc's opinion.
unsafe fn traced_sigprocmask(how: i32, set: *const u64, oldset: *mut u64) -> isize {
    traced_syscall4(
        native::RT_SIGPROCMASK,
        how as usize,
        set as usize,
        oldset as usize,
        size_of::<u64>(),
    )
}

unsafe fn traced_write(fd: RawFd, buf: *const u8, count: usize) -> isize {
    traced_syscall3(native::WRITE, fd as usize, buf as usize, count)
}

// --- logging without libc -----------------------------------------------

/// Formats into a fixed stack buffer; silently truncates. We can't use
/// the tracer-side logging here because it relies on libc machinery.
struct FixedWriter {
    buf: [u8; 1024],
    len: usize,
}

impl FixedWriter {
    fn new() -> FixedWriter {
        FixedWriter {
            buf: [0; 1024],
            len: 0,
        }
    }

    unsafe fn write_to_stderr(&self) {
        traced_write(libc::STDERR_FILENO, self.buf.as_ptr(), self.len);
    }
}

impl fmt::Write for FixedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = self.buf.len() - self.len;
        let take = s.len().min(avail);
        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

macro_rules! preload_log {
    ($($args:tt)+) => {
        {
            use ::std::fmt::Write;
            let mut w = FixedWriter::new();
            let _ = write!(w, $($args)+);
            let _ = w.write_str("\n");
            unsafe { w.write_to_stderr() };
        }
    };
}

/// Bootstrap failure is fatal to the tracee: the tracer observes the
/// exit and aborts the recording.
macro_rules! preload_fatal {
    ($($args:tt)+) => {
        {
            preload_log!($($args)+);
            unsafe { traced_exit_group(1) }
        }
    };
}

// --- initialization -----------------------------------------------------

unsafe fn prctl_for_filter(option: i32, a2: usize, a3: usize, a4: usize, a5: usize) -> isize {
    traced_prctl(option, a2, a3, a4, a5)
}

fn install_syscall_filter() {
    let entry_ip = untraced_syscall_ip();
    preload_log!(
        "[retrace-preload] installing callsite filter, untraced entry = {:#x}",
        entry_ip
    );
    if let Err(msg) = unsafe { seccomp_bpf::install_filter(entry_ip, prctl_for_filter) } {
        preload_fatal!("{}", msg);
    }
    // Anything that happens from this point on gets filtered.
}

/// Return a counter that generates a SIGIO targeted at this task every
/// time the task is descheduled `nr_descheds` times. Disabled at rest;
/// `arm_desched_event` enables it only across may-block untraced calls.
fn open_desched_event_counter(nr_descheds: u64) -> RawFd {
    let mut attr = perf_event_attr::default();
    attr.type_ = PERF_TYPE_SOFTWARE;
    attr.config = PERF_COUNT_SW_CONTEXT_SWITCHES;
    attr.flags = ATTR_DISABLED;
    attr.sample_period = nr_descheds;

    unsafe {
        let fd = traced_perf_event_open(&attr, 0 /*self*/, -1 /*any cpu*/, -1, 0);
        if fd < 0 {
            preload_fatal!("Failed to perf_event_open(cs, period={})", nr_descheds);
        }
        let fd = fd as RawFd;
        if traced_fcntl(fd, libc::F_SETFL, libc::O_ASYNC as usize) != 0 {
            preload_fatal!("Failed to fcntl(O_ASYNC) the desched counter");
        }
        let own = f_owner_ex {
            type_: F_OWNER_TID,
            pid: traced_gettid(),
        };
        if traced_fcntl(fd, F_SETOWN_EX, &own as *const f_owner_ex as usize) != 0 {
            preload_fatal!("Failed to fcntl(SETOWN_EX) the desched counter to this task");
        }
        if traced_fcntl(fd, F_SETSIG, libc::SIGIO as usize) != 0 {
            preload_fatal!("Failed to fcntl(SETSIG, SIGIO) the desched counter");
        }
        fd
    }
}

fn control_socket_addr(tid: libc::pid_t) -> libc::sockaddr_un {
    use std::fmt::Write;
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    let mut w = FixedWriter::new();
    let _ = write!(w, "/tmp/retrace-ctl-{}", tid);
    for (i, b) in w.buf[..w.len].iter().enumerate() {
        addr.sun_path[i] = *b as libc::c_char;
    }
    addr
}

/// Map the shared syscall buffer region into this thread and remember
/// it. The arguments are prepared here in the tracee just to avoid hairy
/// IPC to set them up remotely; the tracer completes the handshake while
/// servicing the magic syscall: it receives the desched counter fd over
/// the control socket and sends back the fd of the shared mapping.
fn set_up_buffer() {
    assert!(buffer().is_null());

    // NB: we want this setup emulated during replay.
    let desched_fd = open_desched_event_counter(1);
    DESCHED_COUNTER_FD.with(|fd| fd.set(desched_fd));

    let tid = unsafe { traced_gettid() };
    let addr = control_socket_addr(tid);

    let mut msgbuf: RawFd = desched_fd;
    let mut data = libc::iovec {
        iov_base: &mut msgbuf as *mut RawFd as *mut libc::c_void,
        iov_len: size_of::<RawFd>(),
    };
    let mut cmsgbuf = [0u8; 64];
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut data;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsgbuf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = unsafe { libc::CMSG_SPACE(size_of::<RawFd>() as u32) } as _;

    let cmsg_fdptr: *mut RawFd;
    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_len = libc::CMSG_LEN(size_of::<RawFd>() as u32) as _;
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        cmsg_fdptr = libc::CMSG_DATA(cmsg) as *mut RawFd;
        // The kernel parses the cmsg copy, dups the fd, and rewrites the
        // slot with the number allocated in the receiving process.
        *cmsg_fdptr = desched_fd;
    }

    let mut args_vec = socketcall_args::default();

    unsafe {
        // A critical section the tracer can rely on: no signals while it
        // is injecting syscalls into us.
        let mask: u64 = !0;
        let mut oldmask: u64 = 0;
        traced_sigprocmask(libc::SIG_BLOCK, &mask, &mut oldmask);

        let buf = traced_syscall6(
            SYS_rtcall_init_syscall_buffer,
            untraced_syscall_ip(),
            &addr as *const libc::sockaddr_un as usize,
            &mut msg as *mut libc::msghdr as usize,
            cmsg_fdptr as usize,
            &mut args_vec as *mut socketcall_args as usize,
            0,
        );
        // The tracer initializes the buffer header.
        BUFFER.with(|b| b.set(buf as *mut u8));

        traced_sigprocmask(libc::SIG_SETMASK, &oldmask, std::ptr::null_mut());
    }
}

/// After a fork() the child still shares the buffer mapping with its
/// parent. Pretend we don't know about it, so the next buffered syscall
/// in the child maps a fresh ring instead of writing into the parent's.
extern "C" fn drop_buffer() {
    BUFFER.with(|b| b.set(std::ptr::null_mut()));
    BUFFER_LOCKED.with(|l| l.set(false));
    DESCHED_COUNTER_FD.with(|fd| fd.set(-1));
}

/// Initialize the library for this thread (and, the first time, the
/// process): install the callsite filter, register the at-fork hook,
/// and map this thread's ring. Runs lazily off the first intercepted
/// call.
fn init() {
    if std::env::var_os(crate::preload_interface::SYSCALLBUF_DISABLED_ENV_VAR).is_some() {
        BUFFERING_DISABLED.store(true, Ordering::SeqCst);
        return;
    }
    if !SECCOMP_FILTER_INSTALLED.swap(true, Ordering::SeqCst) {
        install_syscall_filter();
        unsafe {
            libc::pthread_atfork(None, None, Some(drop_buffer));
        }
    }
    set_up_buffer();
}

// --- the reserve / commit protocol --------------------------------------

/// Call this and save the result at the start of every syscall we want
/// to buffer. The cursor points into the record space just past the
/// record header; wrappers advance it to reserve outparam space, then
/// must call `can_buffer_syscall` before touching the reservation.
///
/// `None` means "cannot buffer right now, make a traced syscall": either
/// we are reentering from a signal handler while a reservation is open,
/// or the buffer is not mapped yet and initialization is in progress.
pub fn prep_syscall(_desched_mode: DeschedMode) -> Option<*mut u8> {
    if BUFFERING_DISABLED.load(Ordering::Relaxed) {
        return None;
    }
    if buffer().is_null() {
        init();
        if buffer().is_null() {
            return None;
        }
    }
    if BUFFER_LOCKED.with(|l| l.get()) {
        // Reentering via a signal handler.
        return None;
    }
    // No race between testing and setting the lock: it is thread-local,
    // and the tracer keeps signals out of the prologue/epilogue itself.
    BUFFER_LOCKED.with(|l| l.set(true));
    Some(unsafe { buffer_last().add(size_of::<syscallbuf_record>()) })
}

/// True if it is ok to proceed with buffering this system call; false
/// means the wrapper must fall back to a traced syscall (which also
/// prompts the tracer to drain the buffer). Must be called exactly once
/// after a successful `prep_syscall`, before the untraced invocation.
pub fn can_buffer_syscall(record_end: *mut u8) -> bool {
    let record_start = buffer_last();
    let needed = unsafe { record_end.offset_from(record_start) };
    if needed < size_of::<syscallbuf_record>() as isize {
        // Catastrophic overflow computing the reservation. Bail.
        BUFFER_LOCKED.with(|l| l.set(false));
        return false;
    }
    let stored_end = unsafe { record_start.add(stored_record_size(needed as u32) as usize) };
    if stored_end > unsafe { buffer_end().sub(size_of::<syscallbuf_record>()) } {
        // Buffer overflow. Unlock and execute the call with a trap to
        // the tracer. The one-spare-record margin keeps the *next*
        // prep_syscall's reservation abortable.
        BUFFER_LOCKED.with(|l| l.set(false));
        return false;
    }
    true
}

/// Enable the desched counter. Untraced, so it doesn't trigger the
/// flushing ptrace trap this code exists to avoid. No extra buffer space
/// is allocated, but the commit records that the counter was armed; the
/// replayer knows to skip over the pair.
pub fn arm_desched_event() {
    let fd = desched_counter_fd();
    if unsafe { untraced_syscall3(native::IOCTL, fd as usize, PERF_EVENT_IOC_ENABLE as usize, 0) }
        != 0
    {
        preload_fatal!("Failed to ENABLE counter {}", fd);
    }
}

pub fn disarm_desched_event() {
    let fd = desched_counter_fd();
    if unsafe { untraced_syscall3(native::IOCTL, fd as usize, PERF_EVENT_IOC_DISABLE as usize, 0) }
        != 0
    {
        preload_fatal!("Failed to DISABLE counter {}", fd);
    }
}

/// Translate a raw kernel return into the errno convention. EHWPOISON
/// is the last errno the kernel can produce; more-negative values are
/// in-band results (e.g. mmap addresses).
pub fn update_errno_ret(ret: isize) -> isize {
    if ret < 0 && ret >= -(libc::EHWPOISON as isize) {
        unsafe {
            *libc::__errno_location() = -ret as i32;
        }
        return -1;
    }
    ret
}

/// Commit the record for a buffered system call. `record_end` can be
/// adjusted downward from what was passed to `can_buffer_syscall` if not
/// all the reserved space was needed. The return value is what the
/// wrapper function should return to its caller.
pub fn commit_syscall(
    syscallno: i32,
    record_end: *mut u8,
    ret: isize,
    desched: DeschedMode,
) -> isize {
    let record_start = buffer_last();
    let rec = record_start as *mut syscallbuf_record;
    let hdr = buffer_hdr();

    unsafe {
        if (*hdr).abort_commit != 0 {
            // We were descheduled in the middle of a may-block syscall,
            // and it was recorded as a normal entry/exit pair. Don't
            // also record it here or replay will go haywire.
            (*hdr).abort_commit = 0;
        } else {
            (*rec).ret = ret as i64;
            (*rec).syscallno = syscallno as u16;
            (*rec).desched = if desched == DeschedMode::NoDesched { 0 } else { 1 };
            (*rec).size = record_end.offset_from(record_start) as u32;
            (*hdr).num_rec_bytes += stored_record_size((*rec).size);
        }
    }
    BUFFER_LOCKED.with(|l| l.set(false));

    update_errno_ret(ret)
}

// --- test support --------------------------------------------------------

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Point this thread's buffer at caller-owned memory so the reserve/
    /// commit protocol can be exercised without a tracer.
    pub fn install_buffer(region: &mut [u8]) {
        assert!(region.len() >= size_of::<syscallbuf_hdr>() + size_of::<syscallbuf_record>());
        region.iter_mut().for_each(|b| *b = 0);
        BUFFER.with(|b| b.set(region.as_mut_ptr()));
        BUFFER_LOCKED.with(|l| l.set(false));
    }

    pub fn uninstall_buffer() {
        BUFFER.with(|b| b.set(std::ptr::null_mut()));
        BUFFER_LOCKED.with(|l| l.set(false));
    }

    pub fn hdr() -> *mut syscallbuf_hdr {
        buffer_hdr()
    }

    pub fn locked() -> bool {
        BUFFER_LOCKED.with(|l| l.get())
    }

    pub fn force_lock() {
        BUFFER_LOCKED.with(|l| l.set(true));
    }

    pub fn record_area_start() -> *mut u8 {
        unsafe { buffer().add(size_of::<syscallbuf_hdr>()) }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn region() -> Vec<u8> {
        vec![0u8; SYSCALLBUF_BUFFER_SIZE]
    }

    #[test]
    fn prep_commit_one_record() {
        let mut buf = region();
        install_buffer(&mut buf);

        let cursor = prep_syscall(DeschedMode::NoDesched).unwrap();
        assert!(locked());
        // Reserve 12 bytes of outparam data.
        let end = unsafe { cursor.add(12) };
        assert!(can_buffer_syscall(end));
        let ret = commit_syscall(42, end, 7, DeschedMode::NoDesched);
        assert_eq!(7, ret);
        assert!(!locked());

        unsafe {
            let h = hdr();
            // Header (16) + data (12), rounded up to a word.
            assert_eq!(stored_record_size(16 + 12), (*h).num_rec_bytes);
            let rec = record_area_start() as *const syscallbuf_record;
            assert_eq!(42, (*rec).syscallno);
            assert_eq!(7, (*rec).ret);
            assert_eq!(0, (*rec).desched);
            assert_eq!(28, (*rec).size);
        }
        uninstall_buffer();
    }

    #[test]
    fn records_append_in_order() {
        let mut buf = region();
        install_buffer(&mut buf);

        for i in 0..5 {
            let cursor = prep_syscall(DeschedMode::NoDesched).unwrap();
            let end = unsafe { cursor.add(8 * i) };
            assert!(can_buffer_syscall(end));
            commit_syscall(100 + i as i32, end, i as isize, DeschedMode::NoDesched);
        }

        unsafe {
            let mut offset = 0usize;
            for i in 0..5 {
                let rec = record_area_start().add(offset) as *const syscallbuf_record;
                assert_eq!(100 + i as u16, (*rec).syscallno);
                assert_eq!(i as i64, (*rec).ret);
                offset += stored_record_size((*rec).size) as usize;
            }
            assert_eq!(offset as u32, (*hdr()).num_rec_bytes);
        }
        uninstall_buffer();
    }

    #[test]
    fn signal_reentry_cannot_buffer() {
        let mut buf = region();
        install_buffer(&mut buf);

        let _outer = prep_syscall(DeschedMode::NoDesched).unwrap();
        // A handler interrupting the outer reservation must get "cannot
        // buffer" and fall back to a traced syscall.
        assert!(prep_syscall(DeschedMode::NoDesched).is_none());
        // The outer reservation is still open.
        assert!(locked());
        uninstall_buffer();
    }

    #[test]
    fn overflow_falls_back_and_unlocks() {
        let mut buf = region();
        install_buffer(&mut buf);

        let cursor = prep_syscall(DeschedMode::NoDesched).unwrap();
        // A reservation that stays inside the mapping but breaches the
        // one-spare-record high-water mark.
        let end = unsafe { cursor.add(SYSCALLBUF_BUFFER_SIZE - 36) };
        assert!(!can_buffer_syscall(end));
        assert!(!locked());
        unsafe {
            assert_eq!(0, (*hdr()).num_rec_bytes);
        }
        uninstall_buffer();
    }

    #[test]
    fn high_water_mark_leaves_room_for_one_spare_record() {
        let mut buf = region();
        install_buffer(&mut buf);

        // Fill the buffer up to just below the refusal threshold.
        let room = SYSCALLBUF_BUFFER_SIZE
            - size_of::<syscallbuf_hdr>()
            - 2 * size_of::<syscallbuf_record>();
        let cursor = prep_syscall(DeschedMode::NoDesched).unwrap();
        let end = unsafe { cursor.add(room - size_of::<syscallbuf_record>()) };
        assert!(can_buffer_syscall(end));
        commit_syscall(1, end, 0, DeschedMode::NoDesched);

        // The next reservation of any size must be refused: the spare
        // record margin is gone.
        let cursor = prep_syscall(DeschedMode::NoDesched).unwrap();
        let end = unsafe { cursor.add(8) };
        assert!(!can_buffer_syscall(end));
        assert!(!locked());
        uninstall_buffer();
    }

    #[test]
    fn abort_commit_discards_the_record() {
        let mut buf = region();
        install_buffer(&mut buf);

        let cursor = prep_syscall(DeschedMode::WillArmDeschedEvent).unwrap();
        let end = unsafe { cursor.add(8) };
        assert!(can_buffer_syscall(end));
        // Tracer observed a desched mid-call and demoted this record.
        unsafe {
            (*hdr()).abort_commit = 1;
        }
        let ret = commit_syscall(3, end, -4, DeschedMode::DisarmedDeschedEvent);

        unsafe {
            assert_eq!(0, (*hdr()).num_rec_bytes);
            assert_eq!(0, (*hdr()).abort_commit);
        }
        assert!(!locked());
        // The errno translation still applies to the aborted call.
        assert_eq!(-1, ret);
        uninstall_buffer();
    }

    #[test]
    fn desched_flag_recorded() {
        let mut buf = region();
        install_buffer(&mut buf);

        let cursor = prep_syscall(DeschedMode::WillArmDeschedEvent).unwrap();
        let end = cursor;
        assert!(can_buffer_syscall(end));
        commit_syscall(5, end, 0, DeschedMode::DisarmedDeschedEvent);
        unsafe {
            let rec = record_area_start() as *const syscallbuf_record;
            assert_eq!(1, (*rec).desched);
        }
        uninstall_buffer();
    }

    #[test]
    fn errno_translation_window() {
        // Any negative value in [-EHWPOISON, -1] becomes -1 + errno.
        assert_eq!(-1, update_errno_ret(-(libc::EINTR as isize)));
        assert_eq!(libc::EINTR, nix::errno::errno());
        assert_eq!(-1, update_errno_ret(-(libc::EHWPOISON as isize)));
        // More-negative values are in-band data (mmap addresses).
        let fake_addr = -(libc::EHWPOISON as isize) - 1;
        assert_eq!(fake_addr, update_errno_ret(fake_addr));
        assert_eq!(0, update_errno_ret(0));
        assert_eq!(99, update_errno_ret(99));
    }
}
