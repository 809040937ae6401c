use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "retrace",
    about = "Record and deterministically replay process execution"
)]
pub struct RetraceOptions {
    /// Pin tracees to this CPU (default 0; record and replay must agree).
    #[structopt(long, global = true)]
    pub bind_to_cpu: Option<u32>,

    /// Do not pin tracees to any CPU.
    #[structopt(long, global = true)]
    pub cpu_unbound: bool,

    /// Path to the preload library injected into tracees.
    #[structopt(long, parse(from_os_str), global = true)]
    pub syscall_buffer_lib_path: Option<PathBuf>,

    /// Disable in-tracee syscall buffering; record everything through
    /// traced stops.
    #[structopt(long, global = true)]
    pub no_syscall_buffer: bool,

    /// Treat warnings as fatal.
    #[structopt(long, global = true)]
    pub fatal_errors: bool,

    /// Suppress warnings about the environment (hypervisor, perf access).
    #[structopt(long, global = true)]
    pub suppress_environment_warnings: bool,

    #[structopt(subcommand)]
    pub cmd: RetraceSubCommand,
}

#[derive(Debug, StructOpt)]
pub enum RetraceSubCommand {
    /// Record the execution of a program to a trace.
    Record(RecordOptions),
    /// Deterministically replay a recorded trace.
    Replay(ReplayOptions),
}

#[derive(Debug, StructOpt)]
pub struct RecordOptions {
    /// Directory to write the trace into.
    #[structopt(short = "o", long, parse(from_os_str))]
    pub trace_dir: Option<PathBuf>,

    /// The program to record.
    pub exe: String,

    /// Arguments passed to the recorded program.
    pub args: Vec<String>,
}

#[derive(Debug, StructOpt)]
pub struct ReplayOptions {
    /// Directory holding the trace to replay.
    #[structopt(parse(from_os_str))]
    pub trace_dir: PathBuf,
}
