pub mod record_command;
pub mod replay_command;
pub mod retrace_options;

use std::error::Error;

/// A subcommand of the `retrace` binary. `run` returns the process exit
/// code on success.
pub trait RetraceCommand {
    fn run(&mut self) -> Result<i32, Box<dyn Error>>;
}
