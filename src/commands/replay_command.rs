use crate::commands::retrace_options::ReplayOptions;
use crate::commands::RetraceCommand;
use crate::log::LogInfo;
use crate::session::replay_session::{ReplayResult, ReplaySession};
use std::error::Error;

pub struct ReplayCommand {
    options: ReplayOptions,
}

impl ReplayCommand {
    pub fn new(options: ReplayOptions) -> ReplayCommand {
        ReplayCommand { options }
    }
}

impl RetraceCommand for ReplayCommand {
    fn run(&mut self) -> Result<i32, Box<dyn Error>> {
        let mut session = ReplaySession::create(&self.options.trace_dir)?;

        let exit_code = loop {
            match session.replay_step() {
                ReplayResult::ReplayContinue => (),
                ReplayResult::ReplayExited(code) => break code,
            }
        };

        log!(LogInfo, "Replay finished with exit code {}", exit_code);
        Ok(exit_code)
    }
}
