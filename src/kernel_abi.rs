//! Syscall number tables for the architectures we trace. Only the
//! syscalls this engine actually inspects are listed; the tables are
//! maintained by hand against the kernel's syscall tables.

#![allow(non_upper_case_globals)]

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SupportedArch {
    X86,
    X86_64,
}

#[cfg(target_arch = "x86_64")]
pub const NATIVE_ARCH: SupportedArch = SupportedArch::X86_64;

#[cfg(target_arch = "x86")]
pub const NATIVE_ARCH: SupportedArch = SupportedArch::X86;

pub fn syscall_instruction_length(_arch: SupportedArch) -> usize {
    // `int $0x80` and `syscall` are both two bytes.
    2
}

/// i386 syscall numbers, from arch/x86/entry/syscalls/syscall_32.tbl.
pub mod x86 {
    pub const RESTART_SYSCALL: i32 = 0;
    pub const EXIT: i32 = 1;
    pub const FORK: i32 = 2;
    pub const READ: i32 = 3;
    pub const WRITE: i32 = 4;
    pub const OPEN: i32 = 5;
    pub const CLOSE: i32 = 6;
    pub const WAITPID: i32 = 7;
    pub const EXECVE: i32 = 11;
    pub const GETPID: i32 = 20;
    pub const PAUSE: i32 = 29;
    pub const KILL: i32 = 37;
    pub const IOCTL: i32 = 54;
    pub const FCNTL: i32 = 55;
    pub const GETTIMEOFDAY: i32 = 78;
    pub const MUNMAP: i32 = 91;
    pub const SOCKETCALL: i32 = 102;
    pub const IPC: i32 = 117;
    pub const SIGRETURN: i32 = 119;
    pub const CLONE: i32 = 120;
    pub const MPROTECT: i32 = 125;
    pub const _LLSEEK: i32 = 140;
    pub const WRITEV: i32 = 146;
    pub const NANOSLEEP: i32 = 162;
    pub const POLL: i32 = 168;
    pub const PRCTL: i32 = 172;
    pub const RT_SIGRETURN: i32 = 173;
    pub const RT_SIGACTION: i32 = 174;
    pub const RT_SIGPROCMASK: i32 = 175;
    pub const RT_SIGQUEUEINFO: i32 = 178;
    pub const VFORK: i32 = 190;
    pub const MMAP2: i32 = 192;
    pub const STAT64: i32 = 195;
    pub const LSTAT64: i32 = 196;
    pub const FSTAT64: i32 = 197;
    pub const MADVISE: i32 = 219;
    pub const GETTID: i32 = 224;
    pub const TKILL: i32 = 238;
    pub const FUTEX: i32 = 240;
    pub const SCHED_SETAFFINITY: i32 = 241;
    pub const SCHED_GETAFFINITY: i32 = 242;
    pub const EXIT_GROUP: i32 = 252;
    pub const EPOLL_WAIT: i32 = 256;
    pub const CLOCK_GETTIME: i32 = 265;
    pub const TGKILL: i32 = 270;
    pub const WAITID: i32 = 284;
    pub const RT_TGSIGQUEUEINFO: i32 = 335;
    pub const PERF_EVENT_OPEN: i32 = 336;
    pub const ACCEPT4: i32 = 364;
}

/// x86_64 syscall numbers, from arch/x86/entry/syscalls/syscall_64.tbl.
pub mod x64 {
    pub const READ: i32 = 0;
    pub const WRITE: i32 = 1;
    pub const OPEN: i32 = 2;
    pub const CLOSE: i32 = 3;
    pub const STAT: i32 = 4;
    pub const FSTAT: i32 = 5;
    pub const LSTAT: i32 = 6;
    pub const POLL: i32 = 7;
    pub const MMAP: i32 = 9;
    pub const MPROTECT: i32 = 10;
    pub const MUNMAP: i32 = 11;
    pub const RT_SIGACTION: i32 = 13;
    pub const RT_SIGPROCMASK: i32 = 14;
    pub const RT_SIGRETURN: i32 = 15;
    pub const IOCTL: i32 = 16;
    pub const WRITEV: i32 = 20;
    pub const MADVISE: i32 = 28;
    pub const PAUSE: i32 = 34;
    pub const NANOSLEEP: i32 = 35;
    pub const SOCKET: i32 = 41;
    pub const CONNECT: i32 = 42;
    pub const ACCEPT: i32 = 43;
    pub const SENDTO: i32 = 44;
    pub const RECVFROM: i32 = 45;
    pub const SENDMSG: i32 = 46;
    pub const RECVMSG: i32 = 47;
    pub const SHUTDOWN: i32 = 48;
    pub const BIND: i32 = 49;
    pub const LISTEN: i32 = 50;
    pub const GETSOCKNAME: i32 = 51;
    pub const GETPEERNAME: i32 = 52;
    pub const SETSOCKOPT: i32 = 54;
    pub const GETSOCKOPT: i32 = 55;
    pub const CLONE: i32 = 56;
    pub const FORK: i32 = 57;
    pub const VFORK: i32 = 58;
    pub const EXECVE: i32 = 59;
    pub const EXIT: i32 = 60;
    pub const WAIT4: i32 = 61;
    pub const KILL: i32 = 62;
    pub const FCNTL: i32 = 72;
    pub const GETTIMEOFDAY: i32 = 96;
    pub const RT_SIGQUEUEINFO: i32 = 129;
    pub const PRCTL: i32 = 157;
    pub const GETTID: i32 = 186;
    pub const TKILL: i32 = 200;
    pub const FUTEX: i32 = 202;
    pub const SCHED_SETAFFINITY: i32 = 203;
    pub const SCHED_GETAFFINITY: i32 = 204;
    pub const RESTART_SYSCALL: i32 = 219;
    pub const CLOCK_GETTIME: i32 = 228;
    pub const EXIT_GROUP: i32 = 231;
    pub const TGKILL: i32 = 234;
    pub const WAITID: i32 = 247;
    pub const ACCEPT4: i32 = 288;
    pub const RT_TGSIGQUEUEINFO: i32 = 297;
    pub const PERF_EVENT_OPEN: i32 = 298;
}

/// Syscall numbers for whatever architecture this build traces natively.
#[cfg(target_arch = "x86_64")]
pub mod native {
    pub use super::x64::*;
    /// x86_64 has no socketcall multiplexer or 16-bit stat variants.
    pub const SOCKETCALL: i32 = -1;
    pub const MMAP2: i32 = super::x64::MMAP;
    pub const IPC: i32 = -1;
    pub const WAITPID: i32 = -1;
    pub const STAT64: i32 = super::x64::STAT;
    pub const LSTAT64: i32 = super::x64::LSTAT;
    pub const FSTAT64: i32 = super::x64::FSTAT;
}

#[cfg(target_arch = "x86")]
pub mod native {
    pub use super::x86::*;
    pub const MMAP: i32 = super::x86::MMAP2;
    pub const SOCKET: i32 = -1;
    pub const CONNECT: i32 = -1;
    pub const ACCEPT: i32 = -1;
    pub const SENDTO: i32 = -1;
    pub const RECVFROM: i32 = -1;
    pub const SENDMSG: i32 = -1;
    pub const RECVMSG: i32 = -1;
    pub const SHUTDOWN: i32 = -1;
    pub const BIND: i32 = -1;
    pub const LISTEN: i32 = -1;
    pub const GETSOCKNAME: i32 = -1;
    pub const GETPEERNAME: i32 = -1;
    pub const SETSOCKOPT: i32 = -1;
    pub const GETSOCKOPT: i32 = -1;
    pub const WAIT4: i32 = -1;
}

/// Multiplexed socketcall operation numbers, from linux/net.h. On x86
/// the whole socket API is one syscall; these select the operation.
pub mod socketcall {
    pub const SYS_SOCKET: usize = 1;
    pub const SYS_BIND: usize = 2;
    pub const SYS_CONNECT: usize = 3;
    pub const SYS_LISTEN: usize = 4;
    pub const SYS_ACCEPT: usize = 5;
    pub const SYS_GETSOCKNAME: usize = 6;
    pub const SYS_GETPEERNAME: usize = 7;
    pub const SYS_SOCKETPAIR: usize = 8;
    pub const SYS_SEND: usize = 9;
    pub const SYS_RECV: usize = 10;
    pub const SYS_SENDTO: usize = 11;
    pub const SYS_RECVFROM: usize = 12;
    pub const SYS_SHUTDOWN: usize = 13;
    pub const SYS_SETSOCKOPT: usize = 14;
    pub const SYS_GETSOCKOPT: usize = 15;
    pub const SYS_SENDMSG: usize = 16;
    pub const SYS_RECVMSG: usize = 17;
    pub const SYS_ACCEPT4: usize = 18;
}

pub fn is_clone_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::CLONE,
        SupportedArch::X86_64 => syscallno == x64::CLONE,
    }
}

pub fn is_fork_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::FORK || syscallno == x86::VFORK,
        SupportedArch::X86_64 => syscallno == x64::FORK || syscallno == x64::VFORK,
    }
}

pub fn is_restart_syscall_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::RESTART_SYSCALL,
        SupportedArch::X86_64 => syscallno == x64::RESTART_SYSCALL,
    }
}

pub fn is_exit_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::EXIT,
        SupportedArch::X86_64 => syscallno == x64::EXIT,
    }
}

pub fn is_exit_group_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::EXIT_GROUP,
        SupportedArch::X86_64 => syscallno == x64::EXIT_GROUP,
    }
}

pub fn is_ioctl_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::IOCTL,
        SupportedArch::X86_64 => syscallno == x64::IOCTL,
    }
}

pub fn is_sigreturn_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::SIGRETURN || syscallno == x86::RT_SIGRETURN,
        SupportedArch::X86_64 => syscallno == x64::RT_SIGRETURN,
    }
}

pub fn is_pause_syscall(syscallno: i32, arch: SupportedArch) -> bool {
    match arch {
        SupportedArch::X86 => syscallno == x86::PAUSE,
        SupportedArch::X86_64 => syscallno == x64::PAUSE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_arch_predicates() {
        assert!(is_clone_syscall(x86::CLONE, SupportedArch::X86));
        assert!(is_clone_syscall(x64::CLONE, SupportedArch::X86_64));
        assert!(!is_clone_syscall(x86::CLONE, SupportedArch::X86_64));
        assert!(is_fork_syscall(x86::VFORK, SupportedArch::X86));
        assert!(is_restart_syscall_syscall(0, SupportedArch::X86));
        assert!(is_restart_syscall_syscall(219, SupportedArch::X86_64));
    }
}
