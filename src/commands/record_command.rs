use crate::commands::retrace_options::RecordOptions;
use crate::commands::RetraceCommand;
use crate::log::LogInfo;
use crate::session::record_session::{RecordResult, RecordSession};
use std::error::Error;

pub struct RecordCommand {
    options: RecordOptions,
}

impl RecordCommand {
    pub fn new(options: RecordOptions) -> RecordCommand {
        RecordCommand { options }
    }
}

impl RetraceCommand for RecordCommand {
    fn run(&mut self) -> Result<i32, Box<dyn Error>> {
        let mut session = RecordSession::create(
            &self.options.exe,
            &self.options.args,
            self.options.trace_dir.as_deref(),
        )?;

        let exit_code = loop {
            match session.record_step() {
                RecordResult::StepContinue => (),
                RecordResult::StepExited(code) => break code,
            }
        };

        session.terminate_recording()?;
        log!(LogInfo, "Recording finished with exit code {}", exit_code);
        Ok(exit_code)
    }
}
