//! The buffered syscall wrappers. Every wrapper follows one template:
//!
//! 1. `prep_syscall`; on "cannot buffer", make a traced syscall.
//! 2. Reserve shadow space in the record for each user outparam; copy
//!    initial contents into the shadow for inout params (the kernel
//!    reads `*addrlen` and friends as input).
//! 3. `can_buffer_syscall`; on refusal, make a traced syscall (which
//!    also prompts the tracer to drain the buffer).
//! 4. If the call may block, arm the desched notifier.
//! 5. Invoke the kernel through the untraced callsite, passing the
//!    shadow pointers, never the user's.
//! 6. Disarm if armed.
//! 7. Copy each shadow back to the user pointer, truncated by the return
//!    value where applicable.
//! 8. `commit_syscall` yields the user-visible return value.
//!
//! During replay the tracer emulates the untraced syscall at the
//! callsite after refilling the buffer, so this very same code restores
//! the recorded bytes to the user's pointers without entering the
//! kernel.
//!
//! These symbols override their libc namesakes when the library is
//! preloaded; signatures must match the C ABI exactly.

#![allow(clippy::missing_safety_doc)]
#![allow(non_camel_case_types)]

use crate::kernel_abi::native;
use crate::kernel_abi::socketcall::*;
use crate::preload::raw_syscall::{
    traced_syscall2, traced_syscall3, traced_syscall4, traced_syscall6, untraced_syscall2,
    untraced_syscall3, untraced_syscall4, untraced_syscall6,
};
use crate::preload::syscallbuf::{
    arm_desched_event, can_buffer_syscall, commit_syscall, disarm_desched_event, prep_syscall,
    update_errno_ret,
};
use crate::preload_interface::DeschedMode;
#[cfg(target_arch = "x86")]
use crate::preload_interface::socketcall_args;
use libc::{c_char, c_int, c_void, nfds_t, size_t, sockaddr, socklen_t, ssize_t};
use std::mem::size_of;
use std::ptr;

#[cfg(target_arch = "x86")]
type stat_buf = libc::stat64;
#[cfg(target_arch = "x86_64")]
type stat_buf = libc::stat;

/// libc leaves this one opaque.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct timezone {
    pub tz_minuteswest: c_int,
    pub tz_dsttime: c_int,
}

// --- socket dispatch -----------------------------------------------------
//
// On x86 the socket API is one multiplexed socketcall syscall; on x86_64
// each operation is a direct syscall. These shims keep the wrappers
// identical across both.

#[cfg(target_arch = "x86")]
unsafe fn untraced_socket_op(op: usize, a: [usize; 6]) -> isize {
    let args = socketcall_args {
        args: [
            a[0] as libc::c_long,
            a[1] as libc::c_long,
            a[2] as libc::c_long,
            a[3] as libc::c_long,
            a[4] as libc::c_long,
            a[5] as libc::c_long,
        ],
    };
    untraced_syscall2(
        native::SOCKETCALL,
        op,
        &args as *const socketcall_args as usize,
    )
}

#[cfg(target_arch = "x86")]
unsafe fn traced_socket_op(op: usize, a: [usize; 6]) -> isize {
    let args = socketcall_args {
        args: [
            a[0] as libc::c_long,
            a[1] as libc::c_long,
            a[2] as libc::c_long,
            a[3] as libc::c_long,
            a[4] as libc::c_long,
            a[5] as libc::c_long,
        ],
    };
    traced_syscall2(
        native::SOCKETCALL,
        op,
        &args as *const socketcall_args as usize,
    )
}

/// The syscall number the record carries for a socket operation: the
/// multiplexer on x86, the direct number on x86_64.
#[cfg(target_arch = "x86")]
fn socket_record_no(_direct: i32) -> i32 {
    native::SOCKETCALL
}

#[cfg(target_arch = "x86_64")]
fn socket_record_no(direct: i32) -> i32 {
    direct
}

#[cfg(target_arch = "x86_64")]
unsafe fn untraced_socket_direct(no: i32, a: [usize; 6]) -> isize {
    untraced_syscall6(no, a[0], a[1], a[2], a[3], a[4], a[5])
}

#[cfg(target_arch = "x86_64")]
unsafe fn traced_socket_direct(no: i32, a: [usize; 6]) -> isize {
    traced_syscall6(no, a[0], a[1], a[2], a[3], a[4], a[5])
}

macro_rules! socket_syscall {
    (untraced, $op:ident, $direct:expr, $args:expr) => {{
        #[cfg(target_arch = "x86")]
        {
            untraced_socket_op($op, $args)
        }
        #[cfg(target_arch = "x86_64")]
        {
            untraced_socket_direct($direct, $args)
        }
    }};
    (traced, $op:ident, $direct:expr, $args:expr) => {{
        #[cfg(target_arch = "x86")]
        {
            traced_socket_op($op, $args)
        }
        #[cfg(target_arch = "x86_64")]
        {
            traced_socket_direct($direct, $args)
        }
    }};
}

// --- time ----------------------------------------------------------------

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn clock_gettime(clk_id: libc::clockid_t, tp: *mut libc::timespec) -> c_int {
    let mut ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall2(
                native::CLOCK_GETTIME,
                clk_id as usize,
                tp as usize,
            )) as c_int
        }
    };
    let mut tp2: *mut libc::timespec = ptr::null_mut();
    if !tp.is_null() {
        tp2 = ptr as *mut libc::timespec;
        ptr = ptr.add(size_of::<libc::timespec>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall2(
            native::CLOCK_GETTIME,
            clk_id as usize,
            tp as usize,
        )) as c_int;
    }
    let ret = untraced_syscall2(native::CLOCK_GETTIME, clk_id as usize, tp2 as usize);
    if !tp.is_null() {
        *tp = *tp2;
    }
    commit_syscall(native::CLOCK_GETTIME, ptr, ret, DeschedMode::NoDesched) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn gettimeofday(
    tp: *mut libc::timeval,
    tzp: *mut timezone,
) -> c_int {
    let mut ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall2(
                native::GETTIMEOFDAY,
                tp as usize,
                tzp as usize,
            )) as c_int
        }
    };
    let mut tp2: *mut libc::timeval = ptr::null_mut();
    let mut tzp2: *mut timezone = ptr::null_mut();
    if !tp.is_null() {
        tp2 = ptr as *mut libc::timeval;
        ptr = ptr.add(size_of::<libc::timeval>());
    }
    if !tzp.is_null() {
        tzp2 = ptr as *mut timezone;
        ptr = ptr.add(size_of::<timezone>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall2(
            native::GETTIMEOFDAY,
            tp as usize,
            tzp as usize,
        )) as c_int;
    }
    let ret = untraced_syscall2(native::GETTIMEOFDAY, tp2 as usize, tzp2 as usize);
    if !tp.is_null() {
        *tp = *tp2;
    }
    if !tzp.is_null() {
        *tzp = *tzp2;
    }
    commit_syscall(native::GETTIMEOFDAY, ptr, ret, DeschedMode::NoDesched) as c_int
}

// --- stat family ---------------------------------------------------------

unsafe fn do_stat(
    syscallno: i32,
    arg1: usize,
    buf: *mut stat_buf,
) -> c_int {
    let mut ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => return update_errno_ret(traced_syscall2(syscallno, arg1, buf as usize)) as c_int,
    };
    let mut buf2: *mut stat_buf = ptr::null_mut();
    if !buf.is_null() {
        buf2 = ptr as *mut stat_buf;
        ptr = ptr.add(size_of::<stat_buf>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall2(syscallno, arg1, buf as usize)) as c_int;
    }
    let ret = untraced_syscall2(syscallno, arg1, buf2 as usize);
    if !buf.is_null() && ret == 0 {
        *buf = *buf2;
    }
    commit_syscall(syscallno, ptr, ret, DeschedMode::NoDesched) as c_int
}

#[cfg_attr(target_arch = "x86", export_name = "stat64")]
#[cfg_attr(target_arch = "x86_64", export_name = "stat")]
pub unsafe extern "C" fn stat_wrapper(path: *const c_char, buf: *mut stat_buf) -> c_int {
    do_stat(native::STAT64, path as usize, buf)
}

#[cfg_attr(target_arch = "x86", export_name = "lstat64")]
#[cfg_attr(target_arch = "x86_64", export_name = "lstat")]
pub unsafe extern "C" fn lstat_wrapper(path: *const c_char, buf: *mut stat_buf) -> c_int {
    do_stat(native::LSTAT64, path as usize, buf)
}

#[cfg_attr(target_arch = "x86", export_name = "fstat64")]
#[cfg_attr(target_arch = "x86_64", export_name = "fstat")]
pub unsafe extern "C" fn fstat_wrapper(fd: c_int, buf: *mut stat_buf) -> c_int {
    do_stat(native::FSTAT64, fd as usize, buf)
}

// --- metadata socket operations (no outparams, no blocking) --------------

#[allow(unused_variables)]
unsafe fn socket_op_no_output(op: usize, direct: i32, a: [usize; 6]) -> isize {
    let ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => return update_errno_ret(socket_syscall!(traced, op, direct, a)),
    };
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(traced, op, direct, a));
    }
    let ret = socket_syscall!(untraced, op, direct, a);
    commit_syscall(socket_record_no(direct), ptr, ret, DeschedMode::NoDesched)
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn socket(domain: c_int, type_: c_int, protocol: c_int) -> c_int {
    socket_op_no_output(
        SYS_SOCKET,
        native::SOCKET,
        [domain as usize, type_ as usize, protocol as usize, 0, 0, 0],
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn bind(sockfd: c_int, addr: *const sockaddr, addrlen: socklen_t) -> c_int {
    socket_op_no_output(
        SYS_BIND,
        native::BIND,
        [sockfd as usize, addr as usize, addrlen as usize, 0, 0, 0],
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn connect(
    sockfd: c_int,
    addr: *const sockaddr,
    addrlen: socklen_t,
) -> c_int {
    socket_op_no_output(
        SYS_CONNECT,
        native::CONNECT,
        [sockfd as usize, addr as usize, addrlen as usize, 0, 0, 0],
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn listen(sockfd: c_int, backlog: c_int) -> c_int {
    socket_op_no_output(
        SYS_LISTEN,
        native::LISTEN,
        [sockfd as usize, backlog as usize, 0, 0, 0, 0],
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn shutdown(sockfd: c_int, how: c_int) -> c_int {
    socket_op_no_output(
        SYS_SHUTDOWN,
        native::SHUTDOWN,
        [sockfd as usize, how as usize, 0, 0, 0, 0],
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn setsockopt(
    sockfd: c_int,
    level: c_int,
    optname: c_int,
    optval: *const c_void,
    optlen: socklen_t,
) -> c_int {
    socket_op_no_output(
        SYS_SETSOCKOPT,
        native::SETSOCKOPT,
        [
            sockfd as usize,
            level as usize,
            optname as usize,
            optval as usize,
            optlen as usize,
            0,
        ],
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn sendmsg(sockfd: c_int, msg: *const libc::msghdr, flags: c_int) -> ssize_t {
    socket_op_may_block_no_output(
        SYS_SENDMSG,
        native::SENDMSG,
        [sockfd as usize, msg as usize, flags as usize, 0, 0, 0],
    ) as ssize_t
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn send(
    sockfd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
) -> ssize_t {
    #[cfg(target_arch = "x86")]
    {
        socket_op_may_block_no_output(
            SYS_SEND,
            native::SENDTO,
            [sockfd as usize, buf as usize, len, flags as usize, 0, 0],
        ) as ssize_t
    }
    #[cfg(target_arch = "x86_64")]
    {
        // No direct send syscall; it is sendto with a null address.
        sendto(sockfd, buf, len, flags, ptr::null(), 0)
    }
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn sendto(
    sockfd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
    dest_addr: *const sockaddr,
    addrlen: socklen_t,
) -> ssize_t {
    socket_op_may_block_no_output(
        SYS_SENDTO,
        native::SENDTO,
        [
            sockfd as usize,
            buf as usize,
            len,
            flags as usize,
            dest_addr as usize,
            addrlen as usize,
        ],
    ) as ssize_t
}

/// Same as `socket_op_no_output` but armed: the data-carrying send side
/// can block on a full peer buffer.
#[allow(unused_variables)]
unsafe fn socket_op_may_block_no_output(op: usize, direct: i32, a: [usize; 6]) -> isize {
    let ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => return update_errno_ret(socket_syscall!(traced, op, direct, a)),
    };
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(traced, op, direct, a));
    }
    arm_desched_event();
    let ret = socket_syscall!(untraced, op, direct, a);
    disarm_desched_event();
    commit_syscall(
        socket_record_no(direct),
        ptr,
        ret,
        DeschedMode::DisarmedDeschedEvent,
    )
}

// --- socket operations with outparams ------------------------------------

/// accept-family template: records the peer address and the inout
/// addrlen when the caller asked for them.
#[allow(unused_variables)]
unsafe fn do_accept(
    op: usize,
    direct: i32,
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
    flags: Option<c_int>,
) -> c_int {
    let flags_arg = flags.unwrap_or(0) as usize;
    let fallback_args = [
        sockfd as usize,
        addr as usize,
        addrlen as usize,
        flags_arg,
        0,
        0,
    ];

    let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => return update_errno_ret(socket_syscall!(traced, op, direct, fallback_args)) as c_int,
    };
    let mut addr2: *mut sockaddr = ptr::null_mut();
    let mut addrlen2: *mut socklen_t = ptr::null_mut();
    if !addr.is_null() {
        addr2 = ptr as *mut sockaddr;
        ptr = ptr.add(*addrlen as usize);
        addrlen2 = ptr as *mut socklen_t;
        *addrlen2 = *addrlen;
        ptr = ptr.add(size_of::<socklen_t>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(traced, op, direct, fallback_args)) as c_int;
    }
    let args = [
        sockfd as usize,
        addr2 as usize,
        addrlen2 as usize,
        flags_arg,
        0,
        0,
    ];
    arm_desched_event();
    let ret = socket_syscall!(untraced, op, direct, args);
    disarm_desched_event();
    if !addr.is_null() && ret >= 0 {
        let copied = (*addrlen2).min(*addrlen) as usize;
        ptr::copy_nonoverlapping(addr2 as *const u8, addr as *mut u8, copied);
        *addrlen = *addrlen2;
    }
    commit_syscall(
        socket_record_no(direct),
        ptr,
        ret,
        DeschedMode::DisarmedDeschedEvent,
    ) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn accept(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    do_accept(SYS_ACCEPT, native::ACCEPT, sockfd, addr, addrlen, None)
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn accept4(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
    flags: c_int,
) -> c_int {
    do_accept(
        SYS_ACCEPT4,
        native::ACCEPT4,
        sockfd,
        addr,
        addrlen,
        Some(flags),
    )
}

/// getsockname/getpeername template. The address buffer is inout: the
/// kernel reads `*addrlen` to know how much room it has.
#[allow(unused_variables)]
unsafe fn do_getname(
    op: usize,
    direct: i32,
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    let fallback_args = [sockfd as usize, addr as usize, addrlen as usize, 0, 0, 0];
    let mut ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => return update_errno_ret(socket_syscall!(traced, op, direct, fallback_args)) as c_int,
    };
    let mut addr2: *mut sockaddr = ptr::null_mut();
    let mut addrlen2: *mut socklen_t = ptr::null_mut();
    if !addr.is_null() {
        addr2 = ptr as *mut sockaddr;
        ptr::copy_nonoverlapping(addr as *const u8, addr2 as *mut u8, *addrlen as usize);
        ptr = ptr.add(*addrlen as usize);
        addrlen2 = ptr as *mut socklen_t;
        *addrlen2 = *addrlen;
        ptr = ptr.add(size_of::<socklen_t>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(traced, op, direct, fallback_args)) as c_int;
    }
    let args = [sockfd as usize, addr2 as usize, addrlen2 as usize, 0, 0, 0];
    let ret = socket_syscall!(untraced, op, direct, args);
    if !addr.is_null() && ret == 0 {
        let copied = (*addrlen2).min(*addrlen) as usize;
        ptr::copy_nonoverlapping(addr2 as *const u8, addr as *mut u8, copied);
        *addrlen = *addrlen2;
    }
    commit_syscall(socket_record_no(direct), ptr, ret, DeschedMode::NoDesched) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn getsockname(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    do_getname(SYS_GETSOCKNAME, native::GETSOCKNAME, sockfd, addr, addrlen)
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn getpeername(
    sockfd: c_int,
    addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> c_int {
    do_getname(SYS_GETPEERNAME, native::GETPEERNAME, sockfd, addr, addrlen)
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn getsockopt(
    sockfd: c_int,
    level: c_int,
    optname: c_int,
    optval: *mut c_void,
    optlen: *mut socklen_t,
) -> c_int {
    let fallback_args = [
        sockfd as usize,
        level as usize,
        optname as usize,
        optval as usize,
        optlen as usize,
        0,
    ];
    let mut ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => {
            return update_errno_ret(socket_syscall!(
                traced,
                SYS_GETSOCKOPT,
                native::GETSOCKOPT,
                fallback_args
            )) as c_int
        }
    };
    let mut optval2: *mut c_void = ptr::null_mut();
    let mut optlen2: *mut socklen_t = ptr::null_mut();
    if !optval.is_null() && !optlen.is_null() {
        optval2 = ptr as *mut c_void;
        ptr::copy_nonoverlapping(optval as *const u8, optval2 as *mut u8, *optlen as usize);
        ptr = ptr.add(*optlen as usize);
        optlen2 = ptr as *mut socklen_t;
        *optlen2 = *optlen;
        ptr = ptr.add(size_of::<socklen_t>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(
            traced,
            SYS_GETSOCKOPT,
            native::GETSOCKOPT,
            fallback_args
        )) as c_int;
    }
    let args = [
        sockfd as usize,
        level as usize,
        optname as usize,
        optval2 as usize,
        optlen2 as usize,
        0,
    ];
    let ret = socket_syscall!(untraced, SYS_GETSOCKOPT, native::GETSOCKOPT, args);
    if !optval.is_null() && !optlen.is_null() && ret == 0 {
        let copied = (*optlen2).min(*optlen) as usize;
        ptr::copy_nonoverlapping(optval2 as *const u8, optval as *mut u8, copied);
        *optlen = *optlen2;
    }
    commit_syscall(
        socket_record_no(native::GETSOCKOPT),
        ptr,
        ret,
        DeschedMode::NoDesched,
    ) as c_int
}

// --- data-carrying socket receives ---------------------------------------

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn recv(
    sockfd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
) -> ssize_t {
    #[cfg(target_arch = "x86")]
    {
        let fallback_args = [sockfd as usize, buf as usize, len, flags as usize, 0, 0];
        let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
            Some(p) => p,
            None => {
                return update_errno_ret(traced_socket_op(SYS_RECV, fallback_args)) as ssize_t
            }
        };
        let mut buf2: *mut c_void = ptr::null_mut();
        if !buf.is_null() && len > 0 {
            buf2 = ptr as *mut c_void;
            ptr = ptr.add(len);
        }
        if !can_buffer_syscall(ptr) {
            return update_errno_ret(traced_socket_op(SYS_RECV, fallback_args)) as ssize_t;
        }
        let args = [sockfd as usize, buf2 as usize, len, flags as usize, 0, 0];
        arm_desched_event();
        let ret = untraced_socket_op(SYS_RECV, args);
        disarm_desched_event();
        if !buf.is_null() && ret > 0 {
            ptr::copy_nonoverlapping(buf2 as *const u8, buf as *mut u8, (ret as usize).min(len));
        }
        commit_syscall(
            native::SOCKETCALL,
            ptr,
            ret,
            DeschedMode::DisarmedDeschedEvent,
        ) as ssize_t
    }
    #[cfg(target_arch = "x86_64")]
    {
        // No direct recv syscall; it is recvfrom with no source address.
        recvfrom(sockfd, buf, len, flags, ptr::null_mut(), ptr::null_mut())
    }
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn recvfrom(
    sockfd: c_int,
    buf: *mut c_void,
    len: size_t,
    flags: c_int,
    src_addr: *mut sockaddr,
    addrlen: *mut socklen_t,
) -> ssize_t {
    let fallback_args = [
        sockfd as usize,
        buf as usize,
        len,
        flags as usize,
        src_addr as usize,
        addrlen as usize,
    ];
    let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(socket_syscall!(
                traced,
                SYS_RECVFROM,
                native::RECVFROM,
                fallback_args
            )) as ssize_t
        }
    };
    let mut buf2: *mut c_void = ptr::null_mut();
    let mut src_addr2: *mut sockaddr = ptr::null_mut();
    let mut addrlen2: *mut socklen_t = ptr::null_mut();
    if !buf.is_null() && len > 0 {
        buf2 = ptr as *mut c_void;
        ptr = ptr.add(len);
    }
    if !src_addr.is_null() {
        src_addr2 = ptr as *mut sockaddr;
        ptr::copy_nonoverlapping(src_addr as *const u8, src_addr2 as *mut u8, *addrlen as usize);
        ptr = ptr.add(*addrlen as usize);
        addrlen2 = ptr as *mut socklen_t;
        *addrlen2 = *addrlen;
        ptr = ptr.add(size_of::<socklen_t>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(
            traced,
            SYS_RECVFROM,
            native::RECVFROM,
            fallback_args
        )) as ssize_t;
    }
    let args = [
        sockfd as usize,
        buf2 as usize,
        len,
        flags as usize,
        src_addr2 as usize,
        addrlen2 as usize,
    ];
    arm_desched_event();
    let ret = socket_syscall!(untraced, SYS_RECVFROM, native::RECVFROM, args);
    disarm_desched_event();
    if ret > 0 && !buf.is_null() {
        ptr::copy_nonoverlapping(buf2 as *const u8, buf as *mut u8, (ret as usize).min(len));
    }
    if ret >= 0 && !src_addr.is_null() {
        let copied = (*addrlen2).min(*addrlen) as usize;
        ptr::copy_nonoverlapping(src_addr2 as *const u8, src_addr as *mut u8, copied);
        *addrlen = *addrlen2;
    }
    commit_syscall(
        socket_record_no(native::RECVFROM),
        ptr,
        ret,
        DeschedMode::DisarmedDeschedEvent,
    ) as ssize_t
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn recvmsg(sockfd: c_int, msg: *mut libc::msghdr, flags: c_int) -> ssize_t {
    let fallback_args = [sockfd as usize, msg as usize, flags as usize, 0, 0, 0];
    // Scatter arrays longer than one entry don't fit the simple shadow
    // layout; trace those.
    if msg.is_null() || (*msg).msg_iovlen != 1 {
        return update_errno_ret(socket_syscall!(
            traced,
            SYS_RECVMSG,
            native::RECVMSG,
            fallback_args
        )) as ssize_t;
    }
    let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(socket_syscall!(
                traced,
                SYS_RECVMSG,
                native::RECVMSG,
                fallback_args
            )) as ssize_t
        }
    };

    // Shadow the msghdr itself, the single iovec, its data area, and the
    // control buffer.
    let msg2 = ptr as *mut libc::msghdr;
    ptr::copy_nonoverlapping(msg as *const u8, msg2 as *mut u8, size_of::<libc::msghdr>());
    ptr = ptr.add(size_of::<libc::msghdr>());

    let iov = (*msg).msg_iov;
    let iov2 = ptr as *mut libc::iovec;
    ptr::copy_nonoverlapping(iov as *const u8, iov2 as *mut u8, size_of::<libc::iovec>());
    ptr = ptr.add(size_of::<libc::iovec>());
    (*msg2).msg_iov = iov2;

    (*iov2).iov_base = ptr as *mut c_void;
    ptr = ptr.add((*iov).iov_len);

    if !(*msg).msg_control.is_null() {
        (*msg2).msg_control = ptr as *mut c_void;
        ptr::copy_nonoverlapping(
            (*msg).msg_control as *const u8,
            (*msg2).msg_control as *mut u8,
            (*msg).msg_controllen,
        );
        ptr = ptr.add((*msg).msg_controllen);
    }

    if !can_buffer_syscall(ptr) {
        return update_errno_ret(socket_syscall!(
            traced,
            SYS_RECVMSG,
            native::RECVMSG,
            fallback_args
        )) as ssize_t;
    }
    let args = [sockfd as usize, msg2 as usize, flags as usize, 0, 0, 0];
    arm_desched_event();
    let ret = socket_syscall!(untraced, SYS_RECVMSG, native::RECVMSG, args);
    disarm_desched_event();

    if ret >= 0 {
        (*iov).iov_len = (*iov2).iov_len;
        ptr::copy_nonoverlapping(
            (*iov2).iov_base as *const u8,
            (*iov).iov_base as *mut u8,
            (*iov).iov_len,
        );
        if !(*msg).msg_control.is_null() {
            (*msg).msg_controllen = (*msg2).msg_controllen;
            ptr::copy_nonoverlapping(
                (*msg2).msg_control as *const u8,
                (*msg).msg_control as *mut u8,
                (*msg).msg_controllen,
            );
        }
        (*msg).msg_flags = (*msg2).msg_flags;
    }
    commit_syscall(
        socket_record_no(native::RECVMSG),
        ptr,
        ret,
        DeschedMode::DisarmedDeschedEvent,
    ) as ssize_t
}

// --- plain file descriptor IO --------------------------------------------

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall3(
                native::READ,
                fd as usize,
                buf as usize,
                count,
            )) as ssize_t
        }
    };
    let mut buf2: *mut c_void = ptr::null_mut();
    if !buf.is_null() {
        buf2 = ptr as *mut c_void;
        ptr = ptr.add(count);
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall3(
            native::READ,
            fd as usize,
            buf as usize,
            count,
        )) as ssize_t;
    }
    arm_desched_event();
    let ret = untraced_syscall3(native::READ, fd as usize, buf2 as usize, count);
    disarm_desched_event();
    if !buf.is_null() && ret > 0 {
        ptr::copy_nonoverlapping(buf2 as *const u8, buf as *mut u8, (ret as usize).min(count));
    }
    commit_syscall(native::READ, ptr, ret, DeschedMode::DisarmedDeschedEvent) as ssize_t
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    let ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall3(
                native::WRITE,
                fd as usize,
                buf as usize,
                count,
            )) as ssize_t
        }
    };
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall3(
            native::WRITE,
            fd as usize,
            buf as usize,
            count,
        )) as ssize_t;
    }
    arm_desched_event();
    let ret = untraced_syscall3(native::WRITE, fd as usize, buf as usize, count);
    disarm_desched_event();
    commit_syscall(native::WRITE, ptr, ret, DeschedMode::DisarmedDeschedEvent) as ssize_t
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn writev(fd: c_int, iov: *const libc::iovec, iovcnt: c_int) -> ssize_t {
    let ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall3(
                native::WRITEV,
                fd as usize,
                iov as usize,
                iovcnt as usize,
            )) as ssize_t
        }
    };
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall3(
            native::WRITEV,
            fd as usize,
            iov as usize,
            iovcnt as usize,
        )) as ssize_t;
    }
    arm_desched_event();
    let ret = untraced_syscall3(native::WRITEV, fd as usize, iov as usize, iovcnt as usize);
    disarm_desched_event();
    commit_syscall(native::WRITEV, ptr, ret, DeschedMode::DisarmedDeschedEvent) as ssize_t
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn poll(fds: *mut libc::pollfd, nfds: nfds_t, timeout: c_int) -> c_int {
    let size = nfds as usize * size_of::<libc::pollfd>();
    let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall3(
                native::POLL,
                fds as usize,
                nfds as usize,
                timeout as usize,
            )) as c_int
        }
    };
    let mut fds2: *mut libc::pollfd = ptr::null_mut();
    if !fds.is_null() {
        // Inout: the kernel reads the fd/events fields.
        fds2 = ptr as *mut libc::pollfd;
        ptr::copy_nonoverlapping(fds as *const u8, fds2 as *mut u8, size);
        ptr = ptr.add(size);
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall3(
            native::POLL,
            fds as usize,
            nfds as usize,
            timeout as usize,
        )) as c_int;
    }
    arm_desched_event();
    let ret = untraced_syscall3(
        native::POLL,
        fds2 as usize,
        nfds as usize,
        timeout as usize,
    );
    disarm_desched_event();
    if !fds.is_null() && ret >= 0 {
        ptr::copy_nonoverlapping(fds2 as *const u8, fds as *mut u8, size);
    }
    commit_syscall(native::POLL, ptr, ret, DeschedMode::DisarmedDeschedEvent) as c_int
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn waitpid(pid: libc::pid_t, status: *mut c_int, options: c_int) -> libc::pid_t {
    #[cfg(target_arch = "x86")]
    let (syscallno, arg4) = (native::WAITPID, 0usize);
    #[cfg(target_arch = "x86_64")]
    let (syscallno, arg4) = (native::WAIT4, 0usize);

    let mut ptr = match prep_syscall(DeschedMode::WillArmDeschedEvent) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall4(
                syscallno,
                pid as usize,
                status as usize,
                options as usize,
                arg4,
            )) as libc::pid_t
        }
    };
    let mut status2: *mut c_int = ptr::null_mut();
    if !status.is_null() {
        status2 = ptr as *mut c_int;
        ptr = ptr.add(size_of::<c_int>());
    }
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall4(
            syscallno,
            pid as usize,
            status as usize,
            options as usize,
            arg4,
        )) as libc::pid_t;
    }
    arm_desched_event();
    let ret = untraced_syscall4(
        syscallno,
        pid as usize,
        status2 as usize,
        options as usize,
        arg4,
    );
    disarm_desched_event();
    if !status.is_null() && ret >= 0 {
        *status = *status2;
    }
    commit_syscall(syscallno, ptr, ret, DeschedMode::DisarmedDeschedEvent) as libc::pid_t
}

#[cfg_attr(feature = "preload_hooks", no_mangle)]
pub unsafe extern "C" fn madvise(addr: *mut c_void, length: size_t, advice: c_int) -> c_int {
    let ptr = match prep_syscall(DeschedMode::NoDesched) {
        Some(p) => p,
        None => {
            return update_errno_ret(traced_syscall3(
                native::MADVISE,
                addr as usize,
                length,
                advice as usize,
            )) as c_int
        }
    };
    if !can_buffer_syscall(ptr) {
        return update_errno_ret(traced_syscall3(
            native::MADVISE,
            addr as usize,
            length,
            advice as usize,
        )) as c_int;
    }
    let ret = untraced_syscall3(native::MADVISE, addr as usize, length, advice as usize);
    commit_syscall(native::MADVISE, ptr, ret, DeschedMode::NoDesched) as c_int
}
