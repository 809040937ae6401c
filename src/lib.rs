//! Core of a user-space record/replay debugging engine for Linux.
//!
//! Three tightly coupled subsystems live here:
//!
//! - the in-tracee syscall buffer (`preload`): a preloaded library that
//!   intercepts a closed set of syscalls inside each traced thread,
//!   executes them against the real kernel through an untraced callsite,
//!   and records their nondeterministic outputs into a shared ring;
//! - the tracer-side arbiter (`session::record_session` /
//!   `session::replay_session`): classifies ptrace stops, drains the ring
//!   to the trace during recording, and refills it byte-for-byte during
//!   replay so the very same wrapper code reproduces the recorded effects
//!   without entering the kernel;
//! - the diversion controller (`diverter`): a reference-counted scratch
//!   session branched off a replay, in which the debugger user can call
//!   functions and step without perturbing the recording.

#![allow(clippy::missing_safety_doc)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate memoffset;

#[macro_use]
pub mod log;

pub mod auto_remote_syscalls;
pub mod bindings;
pub mod commands;
pub mod core;
pub mod diverter;
pub mod flags;
pub mod gdb_request;
pub mod kernel_abi;
pub mod kernel_metadata;
pub mod preload;
pub mod preload_interface;
pub mod record_syscall;
pub mod registers;
pub mod remote_ptr;
pub mod replay_syscall;
pub mod scoped_fd;
pub mod seccomp_bpf;
pub mod session;
pub mod sig;
pub mod trace;
pub mod util;
pub mod wait_status;
