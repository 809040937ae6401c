//! From linux/fcntl.h / asm-generic/fcntl.h: fd-ownership plumbing used
//! to target the desched counter's SIGIO at one thread.

#![allow(non_camel_case_types)]

use libc::pid_t;

pub const F_SETSIG: i32 = 10;
pub const F_SETOWN_EX: i32 = 15;

pub const F_OWNER_TID: i32 = 0;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct f_owner_ex {
    pub type_: i32,
    pub pid: pid_t,
}
