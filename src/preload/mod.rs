//! The library preloaded into every tracee.
//!
//! This code runs in the tracee's address space and overrides libc
//! symbols, so it is rather delicate. The rules:
//!
//! - all syscalls invoked from here go through the raw stubs in
//!   `raw_syscall` (never through libc wrappers, which this library may
//!   itself be wrapping);
//! - no locks beyond the per-thread `buffer_locked` flag: wrappers must
//!   be callable from signal handlers, where a lock held by the
//!   interrupted frame would deadlock;
//! - nothing here may allocate on hot paths.

pub mod raw_syscall;
pub mod syscallbuf;
pub mod wrappers;
