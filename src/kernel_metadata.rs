use crate::bindings::ptrace;
use crate::kernel_abi::{x64, x86, SupportedArch};

pub fn syscall_name(syscall: i32, arch: SupportedArch) -> String {
    let known = match arch {
        SupportedArch::X86 => x86_syscall_name(syscall),
        SupportedArch::X86_64 => x64_syscall_name(syscall),
    };
    match known {
        Some(name) => name.to_owned(),
        None => format!("syscall({})", syscall),
    }
}

fn x86_syscall_name(syscall: i32) -> Option<&'static str> {
    let name = match syscall {
        x86::RESTART_SYSCALL => "restart_syscall",
        x86::EXIT => "exit",
        x86::FORK => "fork",
        x86::READ => "read",
        x86::WRITE => "write",
        x86::OPEN => "open",
        x86::CLOSE => "close",
        x86::WAITPID => "waitpid",
        x86::EXECVE => "execve",
        x86::GETPID => "getpid",
        x86::PAUSE => "pause",
        x86::KILL => "kill",
        x86::IOCTL => "ioctl",
        x86::FCNTL => "fcntl",
        x86::GETTIMEOFDAY => "gettimeofday",
        x86::SOCKETCALL => "socketcall",
        x86::IPC => "ipc",
        x86::SIGRETURN => "sigreturn",
        x86::CLONE => "clone",
        x86::MPROTECT => "mprotect",
        x86::WRITEV => "writev",
        x86::NANOSLEEP => "nanosleep",
        x86::POLL => "poll",
        x86::PRCTL => "prctl",
        x86::RT_SIGRETURN => "rt_sigreturn",
        x86::RT_SIGACTION => "rt_sigaction",
        x86::RT_SIGPROCMASK => "rt_sigprocmask",
        x86::RT_SIGQUEUEINFO => "rt_sigqueueinfo",
        x86::VFORK => "vfork",
        x86::STAT64 => "stat64",
        x86::LSTAT64 => "lstat64",
        x86::FSTAT64 => "fstat64",
        x86::MADVISE => "madvise",
        x86::GETTID => "gettid",
        x86::TKILL => "tkill",
        x86::FUTEX => "futex",
        x86::SCHED_SETAFFINITY => "sched_setaffinity",
        x86::SCHED_GETAFFINITY => "sched_getaffinity",
        x86::EXIT_GROUP => "exit_group",
        x86::CLOCK_GETTIME => "clock_gettime",
        x86::TGKILL => "tgkill",
        x86::RT_TGSIGQUEUEINFO => "rt_tgsigqueueinfo",
        x86::PERF_EVENT_OPEN => "perf_event_open",
        x86::ACCEPT4 => "accept4",
        _ => return None,
    };
    Some(name)
}

fn x64_syscall_name(syscall: i32) -> Option<&'static str> {
    let name = match syscall {
        x64::READ => "read",
        x64::WRITE => "write",
        x64::OPEN => "open",
        x64::CLOSE => "close",
        x64::STAT => "stat",
        x64::FSTAT => "fstat",
        x64::LSTAT => "lstat",
        x64::POLL => "poll",
        x64::MPROTECT => "mprotect",
        x64::RT_SIGACTION => "rt_sigaction",
        x64::RT_SIGPROCMASK => "rt_sigprocmask",
        x64::RT_SIGRETURN => "rt_sigreturn",
        x64::IOCTL => "ioctl",
        x64::WRITEV => "writev",
        x64::MADVISE => "madvise",
        x64::PAUSE => "pause",
        x64::NANOSLEEP => "nanosleep",
        x64::SOCKET => "socket",
        x64::CONNECT => "connect",
        x64::ACCEPT => "accept",
        x64::SENDTO => "sendto",
        x64::RECVFROM => "recvfrom",
        x64::SENDMSG => "sendmsg",
        x64::RECVMSG => "recvmsg",
        x64::SHUTDOWN => "shutdown",
        x64::BIND => "bind",
        x64::LISTEN => "listen",
        x64::GETSOCKNAME => "getsockname",
        x64::GETPEERNAME => "getpeername",
        x64::SETSOCKOPT => "setsockopt",
        x64::GETSOCKOPT => "getsockopt",
        x64::CLONE => "clone",
        x64::FORK => "fork",
        x64::VFORK => "vfork",
        x64::EXECVE => "execve",
        x64::EXIT => "exit",
        x64::WAIT4 => "wait4",
        x64::KILL => "kill",
        x64::FCNTL => "fcntl",
        x64::GETTIMEOFDAY => "gettimeofday",
        x64::RT_SIGQUEUEINFO => "rt_sigqueueinfo",
        x64::PRCTL => "prctl",
        x64::GETTID => "gettid",
        x64::TKILL => "tkill",
        x64::FUTEX => "futex",
        x64::SCHED_SETAFFINITY => "sched_setaffinity",
        x64::SCHED_GETAFFINITY => "sched_getaffinity",
        x64::RESTART_SYSCALL => "restart_syscall",
        x64::CLOCK_GETTIME => "clock_gettime",
        x64::EXIT_GROUP => "exit_group",
        x64::TGKILL => "tgkill",
        x64::ACCEPT4 => "accept4",
        x64::RT_TGSIGQUEUEINFO => "rt_tgsigqueueinfo",
        x64::PERF_EVENT_OPEN => "perf_event_open",
        _ => return None,
    };
    Some(name)
}

pub fn signal_name(sig: i32) -> String {
    /* strsignal() would be nice to use here, but it provides TMI. */
    if (32..=64).contains(&sig) {
        return format!("SIGRT{}", sig);
    }

    match sig {
        libc::SIGHUP => "SIGHUP".into(),
        libc::SIGINT => "SIGINT".into(),
        libc::SIGQUIT => "SIGQUIT".into(),
        libc::SIGILL => "SIGILL".into(),
        libc::SIGTRAP => "SIGTRAP".into(),
        libc::SIGABRT => "SIGABRT".into(),
        libc::SIGBUS => "SIGBUS".into(),
        libc::SIGFPE => "SIGFPE".into(),
        libc::SIGKILL => "SIGKILL".into(),
        libc::SIGUSR1 => "SIGUSR1".into(),
        libc::SIGSEGV => "SIGSEGV".into(),
        libc::SIGUSR2 => "SIGUSR2".into(),
        libc::SIGPIPE => "SIGPIPE".into(),
        libc::SIGALRM => "SIGALRM".into(),
        libc::SIGTERM => "SIGTERM".into(),
        libc::SIGSTKFLT => "SIGSTKFLT".into(),
        libc::SIGCHLD => "SIGCHLD".into(),
        libc::SIGCONT => "SIGCONT".into(),
        libc::SIGSTOP => "SIGSTOP".into(),
        libc::SIGTSTP => "SIGTSTP".into(),
        libc::SIGTTIN => "SIGTTIN".into(),
        libc::SIGTTOU => "SIGTTOU".into(),
        libc::SIGURG => "SIGURG".into(),
        libc::SIGXCPU => "SIGXCPU".into(),
        libc::SIGXFSZ => "SIGXFSZ".into(),
        libc::SIGVTALRM => "SIGVTALRM".into(),
        libc::SIGPROF => "SIGPROF".into(),
        libc::SIGWINCH => "SIGWINCH".into(),
        libc::SIGIO => "SIGIO".into(),
        libc::SIGPWR => "SIGPWR".into(),
        libc::SIGSYS => "SIGSYS".into(),
        /* Special-cased so callers can pass 0 to assertions cheaply. */
        0 => "signal(0)".into(),
        _ => format!("signal({})", sig),
    }
}

pub fn ptrace_event_name(event: u32) -> String {
    match event {
        ptrace::PTRACE_EVENT_FORK => "PTRACE_EVENT_FORK".into(),
        ptrace::PTRACE_EVENT_VFORK => "PTRACE_EVENT_VFORK".into(),
        ptrace::PTRACE_EVENT_CLONE => "PTRACE_EVENT_CLONE".into(),
        ptrace::PTRACE_EVENT_EXEC => "PTRACE_EVENT_EXEC".into(),
        ptrace::PTRACE_EVENT_VFORK_DONE => "PTRACE_EVENT_VFORK_DONE".into(),
        ptrace::PTRACE_EVENT_EXIT => "PTRACE_EVENT_EXIT".into(),
        ptrace::PTRACE_EVENT_SECCOMP => "PTRACE_EVENT_SECCOMP".into(),
        ptrace::PTRACE_EVENT_STOP => "PTRACE_EVENT_STOP".into(),
        _ => format!("ptrace_event({})", event),
    }
}

pub fn errno_name(err: i32) -> String {
    match err {
        0 => "SUCCESS".into(),
        libc::EPERM => "EPERM".into(),
        libc::ENOENT => "ENOENT".into(),
        libc::ESRCH => "ESRCH".into(),
        libc::EINTR => "EINTR".into(),
        libc::EIO => "EIO".into(),
        libc::ENXIO => "ENXIO".into(),
        libc::E2BIG => "E2BIG".into(),
        libc::ENOEXEC => "ENOEXEC".into(),
        libc::EBADF => "EBADF".into(),
        libc::ECHILD => "ECHILD".into(),
        libc::EAGAIN => "EAGAIN".into(),
        libc::ENOMEM => "ENOMEM".into(),
        libc::EACCES => "EACCES".into(),
        libc::EFAULT => "EFAULT".into(),
        libc::ENOTBLK => "ENOTBLK".into(),
        libc::EBUSY => "EBUSY".into(),
        libc::EEXIST => "EEXIST".into(),
        libc::EXDEV => "EXDEV".into(),
        libc::ENODEV => "ENODEV".into(),
        libc::ENOTDIR => "ENOTDIR".into(),
        libc::EISDIR => "EISDIR".into(),
        libc::EINVAL => "EINVAL".into(),
        libc::ENFILE => "ENFILE".into(),
        libc::EMFILE => "EMFILE".into(),
        libc::ENOTTY => "ENOTTY".into(),
        libc::ETXTBSY => "ETXTBSY".into(),
        libc::EFBIG => "EFBIG".into(),
        libc::ENOSPC => "ENOSPC".into(),
        libc::ESPIPE => "ESPIPE".into(),
        libc::EROFS => "EROFS".into(),
        libc::EMLINK => "EMLINK".into(),
        libc::EPIPE => "EPIPE".into(),
        libc::EDOM => "EDOM".into(),
        libc::ERANGE => "ERANGE".into(),
        libc::EDEADLK => "EDEADLK".into(),
        libc::ENAMETOOLONG => "ENAMETOOLONG".into(),
        libc::ENOSYS => "ENOSYS".into(),
        libc::ELOOP => "ELOOP".into(),
        libc::ENOTSOCK => "ENOTSOCK".into(),
        libc::EOPNOTSUPP => "EOPNOTSUPP".into(),
        libc::ECONNRESET => "ECONNRESET".into(),
        libc::ENOBUFS => "ENOBUFS".into(),
        libc::EISCONN => "EISCONN".into(),
        libc::ENOTCONN => "ENOTCONN".into(),
        libc::ETIMEDOUT => "ETIMEDOUT".into(),
        libc::ECONNREFUSED => "ECONNREFUSED".into(),
        libc::EINPROGRESS => "EINPROGRESS".into(),
        _ => format!("errno({})", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_names_per_arch() {
        assert_eq!("clone", syscall_name(x86::CLONE, SupportedArch::X86));
        assert_eq!("clone", syscall_name(x64::CLONE, SupportedArch::X86_64));
        assert_eq!("socketcall", syscall_name(102, SupportedArch::X86));
        assert_eq!("syscall(9999)", syscall_name(9999, SupportedArch::X86));
    }

    #[test]
    fn signal_names() {
        assert_eq!("SIGIO", signal_name(libc::SIGIO));
        assert_eq!("SIGRT33", signal_name(33));
        assert_eq!("signal(0)", signal_name(0));
    }

    #[test]
    fn errno_names() {
        assert_eq!("EINTR", errno_name(libc::EINTR));
        assert_eq!("SUCCESS", errno_name(0));
    }
}
