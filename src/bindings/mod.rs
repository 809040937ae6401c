//! Hand-maintained kernel UAPI items that `libc` does not expose.
//! Values are copied from the Linux uapi headers; each module notes its
//! source header.

pub mod fcntl;
pub mod kernel;
pub mod perf_event;
pub mod ptrace;
