use crate::commands::retrace_options::RetraceOptions;
use std::path::PathBuf;
use std::sync::RwLock;

/// Process-wide flags, set once at startup from the parsed command line
/// and read from anywhere.
#[derive(Clone, Debug)]
pub struct Flags {
    /// CPU to pin tracees (and ourselves) to; None leaves them unbound.
    /// Record and replay must agree on the pinning decision.
    pub bind_to_cpu: Option<u32>,
    /// Path of the preload library pushed into tracee LD_PRELOAD.
    pub syscall_buffer_lib_path: Option<PathBuf>,
    /// Disable the in-tracee syscall buffer entirely; everything is
    /// recorded through traced stops. Mostly useful for debugging the
    /// engine itself.
    pub disable_syscall_buffer: bool,
    /// Treat environment-dependent warnings as fatal.
    pub fatal_errors_and_warnings: bool,
    /// Suppress warnings about environmental features outside our
    /// control (hypervisors, missing perf access).
    pub suppress_environment_warnings: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            bind_to_cpu: Some(0),
            syscall_buffer_lib_path: None,
            disable_syscall_buffer: false,
            fatal_errors_and_warnings: false,
            suppress_environment_warnings: false,
        }
    }
}

lazy_static! {
    static ref FLAGS: RwLock<Flags> = RwLock::new(Flags::default());
}

impl Flags {
    pub fn get() -> Flags {
        FLAGS.read().unwrap().clone()
    }
}

pub fn init_flags(options: &RetraceOptions) {
    let mut flags = FLAGS.write().unwrap();
    *flags = Flags {
        bind_to_cpu: if options.cpu_unbound {
            None
        } else {
            Some(options.bind_to_cpu.unwrap_or(0))
        },
        syscall_buffer_lib_path: options.syscall_buffer_lib_path.clone(),
        disable_syscall_buffer: options.no_syscall_buffer,
        fatal_errors_and_warnings: options.fatal_errors,
        suppress_environment_warnings: options.suppress_environment_warnings,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pin_to_cpu_zero() {
        let flags = Flags::default();
        assert_eq!(Some(0), flags.bind_to_cpu);
        assert!(!flags.disable_syscall_buffer);
    }
}
