//! The ABI shared between the tracer and the preload library mapped into
//! every tracee. Be very careful making changes to this file: the buffer
//! layout is copied verbatim into traces, so any change here invalidates
//! previously recorded traces.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use static_assertions::const_assert_eq;

pub const SYSCALLBUF_LIB_FILENAME: &str = "libretracepreload.so";

/// Set this env var to disable syscall buffering.
pub const SYSCALLBUF_DISABLED_ENV_VAR: &str = "_RETRACE_NO_SYSCALLBUF";

/// Size of the per-thread syscall buffer region, header included. The
/// value is a policy choice; changing it changes only how often the
/// buffer must be flushed.
pub const SYSCALLBUF_BUFFER_SIZE: usize = 1 << 16;

/// "Magic" (tracer-implemented) syscall with which the preload library
/// asks for a buffer mapping in each thread.
///
/// Arguments, in order:
/// 1. the untraced-callsite IP (the address just after the syscall
///    instruction at the fixed entry symbol);
/// 2. a pointer to a pre-filled sockaddr_un for the tracer control
///    socket;
/// 3. a pointer to a pre-filled msghdr whose ancillary data carries one
///    fd slot;
/// 4. a pointer to the fd slot within that ancillary data, where the
///    tracer places the shared buffer fd;
/// 5. a pointer to a preallocated socketcall argument vector the tracer
///    may use for injected socket operations;
/// 6. reserved, must be zero.
///
/// Returns the mapped buffer address in the tracee. Issued with all
/// signals blocked; never returns failure.
///
/// NB: magic syscall numbers must be positive: with at least linux 3.8.0
/// the tracer only gets a trap for the *entry* of invalid negative
/// syscalls, not the exit.
pub const SYS_rtcall_init_syscall_buffer: i32 = 442;

/// Preallocated space the tracer can use to issue multiplexed socketcall
/// syscalls inside the tracee (x86 has no direct socket syscalls).
#[repr(C)]
#[derive(Copy, Clone, Default)]
pub struct socketcall_args {
    pub args: [libc::c_long; 6],
}

/// Desched-notification disposition a wrapper declares to `prep_syscall`
/// and `commit_syscall`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeschedMode {
    /// The wrapped call may block; the desched counter will be armed
    /// around the untraced syscall.
    WillArmDeschedEvent,
    /// The wrapped call armed and then disarmed the counter.
    DisarmedDeschedEvent,
    /// The wrapped call cannot block; no desched bookkeeping.
    NoDesched,
}

/// This struct summarizes the state of the syscall buffer. It happens to
/// be located at the start of the buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct syscallbuf_hdr {
    /// The number of valid syscallbuf_record bytes in the buffer, not
    /// counting this header. Advanced only by the committing thread; the
    /// tracer only ever resets it to zero while the thread is stopped.
    pub num_rec_bytes: u32,
    /// True if the current syscall should not be committed to the
    /// buffer, for whatever reason; likely interrupted by desched. Set
    /// by the tracer.
    pub abort_commit: u8,
    /// Reserved for future fields; keeps records word-aligned.
    pub _reserved: [u8; 3],
}

/// The syscall buffer comprises an array of these variable-length
/// records, along with the header above.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct syscallbuf_record {
    /// Return value from the syscall. This can be a memory address, so
    /// it must be as big as a memory address can be. We use 64 bits
    /// rather than making the record arch-specific.
    pub ret: i64,
    /// Syscall number.
    ///
    /// NB: the x86 linux ABI has ~350 syscalls and x86-64 defines ~313,
    /// so u16 is a comfortable allocation.
    pub syscallno: u16,
    /// Did the tracee arm/disarm the desched notification for this
    /// syscall? If so, the call was re-recorded as a traced entry/exit
    /// pair and must not be replayed from the buffer.
    pub desched: u8,
    pub _padding: u8,
    /// Size of the entire record in bytes: this struct plus extra
    /// recorded outparam data stored inline after the last field, not
    /// including padding.
    pub size: u32,
    /// Extra recorded outparam data starts here.
    pub extra_data: [u8; 0],
}

const_assert_eq!(std::mem::size_of::<syscallbuf_hdr>(), 8);
const_assert_eq!(std::mem::size_of::<syscallbuf_record>(), 16);

/// Return the amount of space a record of `length` will occupy in the
/// buffer if committed, including padding.
pub fn stored_record_size(length: u32) -> u32 {
    // Round up to a whole number of 64-bit words.
    (length + 7) & !7u32
}

/// The next record position after a record of stored size `size` at byte
/// offset `offset` within the record area.
pub fn next_record_offset(offset: u32, size: u32) -> u32 {
    offset + stored_record_size(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check_type_has_no_holes;

    #[test]
    fn stored_size_rounds_to_words() {
        assert_eq!(0, stored_record_size(0));
        assert_eq!(8, stored_record_size(1));
        assert_eq!(8, stored_record_size(8));
        assert_eq!(16, stored_record_size(9));
        assert_eq!(24, stored_record_size(17));
    }

    #[test]
    fn record_field_offsets_are_stable() {
        assert_eq!(0, offset_of!(syscallbuf_record, ret));
        assert_eq!(8, offset_of!(syscallbuf_record, syscallno));
        assert_eq!(10, offset_of!(syscallbuf_record, desched));
        assert_eq!(12, offset_of!(syscallbuf_record, size));
        assert_eq!(16, offset_of!(syscallbuf_record, extra_data));
    }

    #[test]
    fn hdr_field_offsets_are_stable() {
        assert_eq!(0, offset_of!(syscallbuf_hdr, num_rec_bytes));
        assert_eq!(4, offset_of!(syscallbuf_hdr, abort_commit));
    }

    #[test]
    fn shared_types_have_no_holes() {
        assert!(check_type_has_no_holes::<syscallbuf_hdr>());
        assert!(check_type_has_no_holes::<syscallbuf_record>());
        assert!(check_type_has_no_holes::<socketcall_args>());
    }

    #[test]
    fn a_minimum_record_fits_many_times_over() {
        let room = SYSCALLBUF_BUFFER_SIZE - std::mem::size_of::<syscallbuf_hdr>();
        assert!(room / std::mem::size_of::<syscallbuf_record>() > 1000);
    }
}
