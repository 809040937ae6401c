//! From linux/perf_event.h. Only what the desched notifier needs: the
//! attr struct (through the flags word; the kernel zero-fills any tail we
//! omit as long as `size` is honest), the software event ids, and the
//! enable/disable/reset/period ioctls.

#![allow(non_camel_case_types)]

use libc::c_ulong;

pub const PERF_TYPE_SOFTWARE: u32 = 1;

/// Counts schedule-out, not schedule-in.
pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;

/// Bits of `perf_event_attr::flags`.
pub const ATTR_DISABLED: u64 = 1 << 0;
pub const ATTR_EXCLUDE_KERNEL: u64 = 1 << 5;
pub const ATTR_EXCLUDE_HV: u64 = 1 << 6;
pub const ATTR_EXCLUDE_GUEST: u64 = 1 << 20;

#[repr(C)]
#[derive(Copy, Clone)]
pub struct perf_event_attr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    /// sample_period / sample_freq union; we only ever use the period.
    pub sample_period: u64,
    pub sample_type: u64,
    pub read_format: u64,
    /// The kernel's bitfield block (disabled, inherit, pinned, ...). See
    /// the ATTR_* constants.
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub bp_addr: u64,
    pub bp_len: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub __reserved_2: u16,
}

impl Default for perf_event_attr {
    fn default() -> Self {
        let mut attr: perf_event_attr = unsafe { std::mem::zeroed() };
        attr.size = std::mem::size_of::<perf_event_attr>() as u32;
        attr
    }
}

pub const PERF_EVENT_IOC_ENABLE: c_ulong = 0x2400;
pub const PERF_EVENT_IOC_DISABLE: c_ulong = 0x2401;
pub const PERF_EVENT_IOC_RESET: c_ulong = 0x2403;
/// _IOW('$', 4, u64)
pub const PERF_EVENT_IOC_PERIOD: c_ulong = 0x4008_2404;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn attr_size_covers_the_flags_word() {
        // PERF_ATTR_SIZE_VER0; anything >= this is accepted by the kernel.
        assert!(size_of::<perf_event_attr>() >= 64);
        assert_eq!(0, size_of::<perf_event_attr>() % 8);
    }

    #[test]
    fn default_is_zeroed_with_honest_size() {
        let attr = perf_event_attr::default();
        assert_eq!(attr.size as usize, size_of::<perf_event_attr>());
        assert_eq!(0, attr.config);
        assert_eq!(0, attr.flags);
    }
}
