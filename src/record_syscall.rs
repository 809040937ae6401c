//! Per-syscall record policy: which tracee memory a traced syscall's
//! exit wrote, so the recorder can save it and replay can restore it.
//!
//! Buffered syscalls never come through here; their outparam data rides
//! in the syscall buffer. This path serves unbuffered syscalls and the
//! traced fallbacks of buffered ones (reentry, buffer-full).
//!
//! A syscall with no entry in the policy gets its return value recorded
//! and nothing else; that is correct for everything whose only
//! user-visible effect is the result register (e.g. sched_setaffinity:
//! no outparam, and replay is pinned to one CPU anyway).

use crate::kernel_abi::{native, socketcall, NATIVE_ARCH};
use crate::kernel_metadata::syscall_name;
use crate::log::LogDebug;
#[cfg(target_arch = "x86")]
use crate::preload_interface::socketcall_args;
use crate::remote_ptr::{RemotePtr, Void};
use crate::session::task::Task;
use crate::trace::trace_frame::MemWrite;
use std::mem::size_of;

fn record_mem(t: &Task, addr: usize, len: usize, out: &mut Vec<MemWrite>) {
    if addr == 0 || len == 0 {
        return;
    }
    let mut bytes = vec![0u8; len];
    t.read_bytes(RemotePtr::<Void>::from_val(addr), &mut bytes);
    out.push(MemWrite {
        addr: addr as u64,
        bytes,
    });
}

/// Collect the memory effects of the syscall the task just exited.
/// Call with the task stopped at a traced syscall exit.
pub fn rec_process_syscall(t: &mut Task) -> Vec<MemWrite> {
    let regs = *t.regs();
    let syscallno = regs.original_syscallno() as i32;
    let ret = regs.syscall_result_signed();
    let (arg1, arg2, arg3) = (regs.arg1(), regs.arg2(), regs.arg3());

    log!(
        LogDebug,
        "recording effects of {} = {}",
        syscall_name(syscallno, NATIVE_ARCH),
        ret
    );

    let mut writes = Vec::new();
    match syscallno {
        _ if syscallno == native::CLOCK_GETTIME => {
            if ret == 0 {
                record_mem(t, arg2, size_of::<libc::timespec>(), &mut writes);
            }
        }
        _ if syscallno == native::GETTIMEOFDAY => {
            if ret == 0 {
                record_mem(t, arg1, size_of::<libc::timeval>(), &mut writes);
                record_mem(t, arg2, size_of::<crate::preload::wrappers::timezone>(), &mut writes);
            }
        }
        _ if syscallno == native::NANOSLEEP => {
            // The kernel writes the remaining time only when it was
            // interrupted; an untouched rem must stay untouched on
            // replay too.
            if ret == -(libc::EINTR as isize) {
                record_mem(t, arg2, size_of::<libc::timespec>(), &mut writes);
            }
        }
        _ if syscallno == native::READ => {
            if ret > 0 {
                record_mem(t, arg2, ret as usize, &mut writes);
            }
        }
        _ if syscallno == native::POLL => {
            if ret >= 0 {
                record_mem(t, arg1, arg2 * size_of::<libc::pollfd>(), &mut writes);
            }
        }
        _ if syscallno == native::STAT64
            || syscallno == native::LSTAT64
            || syscallno == native::FSTAT64 =>
        {
            if ret == 0 {
                record_mem(t, arg2, stat_size(), &mut writes);
            }
        }
        _ if syscallno == native::RT_SIGACTION => {
            // oldact, sized by the kernel sigaction, not glibc's.
            if ret == 0 {
                record_mem(t, arg3, kernel_sigaction_size(), &mut writes);
            }
        }
        _ if syscallno == native::RT_SIGPROCMASK => {
            if ret == 0 {
                record_mem(t, arg3, 8, &mut writes);
            }
        }
        _ if is_wait_syscall(syscallno) => {
            if ret > 0 {
                record_mem(t, arg2, size_of::<libc::c_int>(), &mut writes);
            }
        }
        #[cfg(target_arch = "x86")]
        _ if syscallno == native::SOCKETCALL => {
            rec_process_socketcall(t, arg1, arg2, ret, &mut writes);
        }
        #[cfg(target_arch = "x86_64")]
        _ if is_direct_socket_outparam_syscall(syscallno) => {
            rec_process_socket_op(t, direct_socket_op(syscallno), &socket_args_from_regs(&regs), ret, &mut writes);
        }
        _ => (),
    }
    writes
}

fn is_wait_syscall(syscallno: i32) -> bool {
    #[cfg(target_arch = "x86")]
    {
        syscallno == native::WAITPID
    }
    #[cfg(target_arch = "x86_64")]
    {
        syscallno == native::WAIT4
    }
}

fn stat_size() -> usize {
    #[cfg(target_arch = "x86")]
    {
        size_of::<libc::stat64>()
    }
    #[cfg(target_arch = "x86_64")]
    {
        size_of::<libc::stat>()
    }
}

/// The kernel's struct sigaction: handler, flags, restorer, and an
/// 8-byte mask. Glibc's is bigger; recording glibc's size would copy
/// bytes the kernel never wrote.
fn kernel_sigaction_size() -> usize {
    3 * size_of::<usize>() + 8
}

#[cfg(target_arch = "x86_64")]
fn is_direct_socket_outparam_syscall(syscallno: i32) -> bool {
    syscallno == native::ACCEPT
        || syscallno == native::ACCEPT4
        || syscallno == native::GETSOCKNAME
        || syscallno == native::GETPEERNAME
        || syscallno == native::GETSOCKOPT
        || syscallno == native::RECVFROM
        || syscallno == native::RECVMSG
}

#[cfg(target_arch = "x86_64")]
fn direct_socket_op(syscallno: i32) -> usize {
    match syscallno {
        _ if syscallno == native::ACCEPT => socketcall::SYS_ACCEPT,
        _ if syscallno == native::ACCEPT4 => socketcall::SYS_ACCEPT4,
        _ if syscallno == native::GETSOCKNAME => socketcall::SYS_GETSOCKNAME,
        _ if syscallno == native::GETPEERNAME => socketcall::SYS_GETPEERNAME,
        _ if syscallno == native::GETSOCKOPT => socketcall::SYS_GETSOCKOPT,
        _ if syscallno == native::RECVMSG => socketcall::SYS_RECVMSG,
        _ => socketcall::SYS_RECVFROM,
    }
}

#[cfg(target_arch = "x86_64")]
fn socket_args_from_regs(regs: &crate::registers::Registers) -> [usize; 6] {
    [
        regs.arg1(),
        regs.arg2(),
        regs.arg3(),
        regs.arg4(),
        regs.arg5(),
        regs.arg6(),
    ]
}

/// x86 multiplexes the socket API; fetch the arg vector from tracee
/// memory and dispatch on the operation.
#[cfg(target_arch = "x86")]
fn rec_process_socketcall(
    t: &mut Task,
    op: usize,
    args_ptr: usize,
    ret: isize,
    writes: &mut Vec<MemWrite>,
) {
    let vec: socketcall_args = t.read_val(RemotePtr::from_val(args_ptr));
    let a: Vec<usize> = vec.args.iter().map(|v| *v as usize).collect();
    let a6 = [a[0], a[1], a[2], a[3], a[4], a[5]];
    rec_process_socket_op(t, op, &a6, ret, writes);
}

/// Socket operations whose outparams the recorder must capture on the
/// traced path.
fn rec_process_socket_op(
    t: &mut Task,
    op: usize,
    a: &[usize; 6],
    ret: isize,
    writes: &mut Vec<MemWrite>,
) {
    match op {
        socketcall::SYS_ACCEPT
        | socketcall::SYS_ACCEPT4
        | socketcall::SYS_GETSOCKNAME
        | socketcall::SYS_GETPEERNAME => {
            if ret >= 0 && a[1] != 0 && a[2] != 0 {
                let addrlen: u32 = t.read_val(RemotePtr::from_val(a[2]));
                record_mem(t, a[1], addrlen as usize, writes);
                record_mem(t, a[2], size_of::<u32>(), writes);
            }
        }
        socketcall::SYS_GETSOCKOPT => {
            if ret == 0 && a[3] != 0 && a[4] != 0 {
                let optlen: u32 = t.read_val(RemotePtr::from_val(a[4]));
                record_mem(t, a[3], optlen as usize, writes);
                record_mem(t, a[4], size_of::<u32>(), writes);
            }
        }
        socketcall::SYS_RECV | socketcall::SYS_RECVFROM => {
            if ret > 0 && a[1] != 0 {
                record_mem(t, a[1], ret as usize, writes);
            }
            if op == socketcall::SYS_RECVFROM && a[4] != 0 && a[5] != 0 {
                let addrlen: u32 = t.read_val(RemotePtr::from_val(a[5]));
                record_mem(t, a[4], addrlen as usize, writes);
                record_mem(t, a[5], size_of::<u32>(), writes);
            }
        }
        socketcall::SYS_RECVMSG => {
            if ret >= 0 && a[1] != 0 {
                rec_process_recvmsg(t, a[1], ret, writes);
            }
        }
        _ => (),
    }
}

/// recvmsg on the traced path: the kernel writes into the caller's
/// msghdr in place (msg_namelen, msg_controllen, msg_flags), into the
/// name and control buffers it points at, and fills the iovecs in order
/// up to the return value. All of it must land in the trace, since the
/// wrapper's shadow-copy scheme is not in play here.
fn rec_process_recvmsg(t: &mut Task, msg_ptr: usize, ret: isize, writes: &mut Vec<MemWrite>) {
    let msg: libc::msghdr = t.read_val(RemotePtr::from_val(msg_ptr));
    record_mem(t, msg_ptr, size_of::<libc::msghdr>(), writes);

    if !msg.msg_name.is_null() && msg.msg_namelen > 0 {
        record_mem(t, msg.msg_name as usize, msg.msg_namelen as usize, writes);
    }

    let mut remaining = ret as usize;
    let iov_base = RemotePtr::<libc::iovec>::from_val(msg.msg_iov as usize);
    for i in 0..msg.msg_iovlen as usize {
        if remaining == 0 {
            break;
        }
        let iov: libc::iovec = t.read_val(iov_base + i);
        let filled = remaining.min(iov.iov_len);
        record_mem(t, iov.iov_base as usize, filled, writes);
        remaining -= filled;
    }

    if !msg.msg_control.is_null() && msg.msg_controllen > 0 {
        record_mem(
            t,
            msg.msg_control as usize,
            msg.msg_controllen as usize,
            writes,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_sigaction_is_smaller_than_glibcs() {
        assert!(kernel_sigaction_size() < size_of::<libc::sigaction>());
        #[cfg(target_arch = "x86_64")]
        assert_eq!(32, kernel_sigaction_size());
    }
}
