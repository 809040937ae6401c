use retrace::commands::retrace_options::{RetraceOptions, RetraceSubCommand};
use retrace::commands::{record_command::RecordCommand, replay_command::ReplayCommand, RetraceCommand};
use retrace::flags;
use std::process::exit;
use structopt::StructOpt;

fn main() {
    let options = RetraceOptions::from_args();
    flags::init_flags(&options);

    let mut cmd: Box<dyn RetraceCommand> = match options.cmd {
        RetraceSubCommand::Record(rec) => Box::new(RecordCommand::new(rec)),
        RetraceSubCommand::Replay(rep) => Box::new(ReplayCommand::new(rep)),
    };

    match cmd.run() {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("retrace: {}", e);
            exit(1);
        }
    }
}
