use crate::kernel_metadata::errno_name;
use backtrace::Backtrace;
use nix::errno::errno;
use std::collections::HashMap;
use std::env;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Result, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogInfo,
    LogDebug,
}

pub use LogLevel::*;

struct LogGlobals {
    /// Module name -> level, from RETRACE_LOG.
    level_map: HashMap<String, LogLevel>,
    /// Filename -> (module name, level), memoized lookups.
    module_cache: HashMap<String, (String, LogLevel)>,
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let mut f: Box<dyn Write + Send> = match env::var("RETRACE_LOG_FILE") {
            Ok(filename) => match OpenOptions::new().create(true).append(true).open(&filename) {
                Ok(file) => Box::new(file),
                Err(_) => Box::new(io::stderr()),
            },
            Err(_) => Box::new(io::stderr()),
        };
        if let Ok(bufsize) = env::var("RETRACE_LOG_BUFFER") {
            if let Ok(n) = bufsize.parse::<usize>() {
                f = Box::new(BufWriter::with_capacity(n, f));
            }
        }

        let mut default_level = LogWarn;
        let mut level_map: HashMap<String, LogLevel> = HashMap::new();
        // RETRACE_LOG is a comma-separated list of `module=level` pairs;
        // a bare `level` or `all=level` sets the default.
        if let Ok(spec) = env::var("RETRACE_LOG") {
            for entry in spec.split(',') {
                let entry = entry.trim();
                if entry.is_empty() {
                    continue;
                }
                match entry.find('=') {
                    Some(pos) => {
                        let (module, level) = entry.split_at(pos);
                        let level = parse_level(&level[1..]);
                        if module == "all" {
                            default_level = level;
                        } else {
                            level_map.insert(module.to_owned(), level);
                        }
                    }
                    None => default_level = parse_level(entry),
                }
            }
        }

        Mutex::new(LogGlobals {
            level_map,
            module_cache: HashMap::new(),
            log_file: f,
            default_level,
        })
    };
}

fn parse_level(s: &str) -> LogLevel {
    match s {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "info" => LogInfo,
        "debug" => LogDebug,
        _ => LogWarn,
    }
}

fn log_name(level: LogLevel) -> &'static str {
    match level {
        LogFatal => "FATAL",
        LogError => "ERROR",
        LogWarn => "WARN",
        LogInfo => "INFO",
        LogDebug => "DEBUG",
    }
}

/// Module name and level for `filename`, consulting the cache first.
fn module_of(filename: &str, l: &mut MutexGuard<LogGlobals>) -> (String, LogLevel) {
    if let Some(hit) = l.module_cache.get(filename) {
        return hit.clone();
    }
    // Filenames are case sensitive on Linux; don't fold case.
    let name = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_owned());
    let level = l.level_map.get(&name).copied().unwrap_or(l.default_level);
    l.module_cache
        .insert(filename.to_owned(), (name.clone(), level));
    (name, level)
}

/// A log line under construction. Appends a newline and flushes on drop.
pub struct NewLineTerminatingOstream {
    enabled: bool,
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        func_name: &str,
        always_enabled: bool,
    ) -> NewLineTerminatingOstream {
        let mut lock = LOG_GLOBALS.lock().unwrap();
        let (module_name, module_level) = module_of(filename, &mut lock);
        let enabled = always_enabled || level <= module_level;
        let mut this = NewLineTerminatingOstream {
            message: Vec::new(),
            enabled,
            lock,
        };
        if enabled {
            if level == LogDebug {
                write!(this, "[{}] ", module_name).unwrap();
            } else {
                write_prefix(&mut this, level, filename, line, func_name);
            }
        }
        this
    }
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        if self.enabled {
            self.write_all(b"\n").unwrap();
            self.flush().unwrap();
        }
    }
}

impl Write for NewLineTerminatingOstream {
    fn flush(&mut self) -> Result<()> {
        if !self.message.is_empty() && self.enabled {
            self.lock.log_file.write_all(&self.message)?;
            self.lock.log_file.flush()?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.enabled {
            self.message.extend_from_slice(buf);
        }
        // Pretend the bytes were written even when disabled, otherwise
        // callers see WriteZero errors.
        Ok(buf.len())
    }
}

pub fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    filename: &str,
    line: u32,
    func_name: &str,
) {
    write!(stream, "[{} ", log_name(level)).unwrap();
    if level <= LogError {
        write!(stream, "{}:{} ", filename, line).unwrap();
    }
    write!(stream, "{}()", func_name).unwrap();
    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {}", errno_name(err)).unwrap();
    }
    write!(stream, "] ").unwrap();
}

pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
    always_enabled: bool,
) -> NewLineTerminatingOstream {
    NewLineTerminatingOstream::new(log_level, filename, line, module_path, always_enabled)
}

/// Write a line to the log file (stderr unless RETRACE_LOG_FILE is set),
/// subject to per-module level filtering. Execution continues normally.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use ::std::io::Write;
            let mut stream = crate::log::log(
                $log_level,
                file!(),
                line!(),
                module_path!(),
                false
            );
            write!(stream, $($args)+).unwrap()
        }
    };
}

/// Log unconditionally, dump a backtrace, and abort the process.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use ::std::io::Write;
                use crate::log::LogFatal;
                let mut stream = crate::log::log(
                    LogFatal,
                    file!(),
                    line!(),
                    module_path!(),
                    true
                );
                write!(stream, $($args)+).unwrap();
            }
            crate::log::notifying_abort(backtrace::Backtrace::new());
        }
    };
}

/// Log to stderr unconditionally and exit without a backtrace.
macro_rules! clean_fatal {
    ($($args:tt)+) => {
        use ::std::io::Write;
        use ::std::io::stderr;
        use crate::log::LogFatal;
        crate::log::write_prefix(&mut stderr(), LogFatal, file!(), line!(), module_path!());
        write!(stderr(), $($args)+).unwrap();
        write!(stderr(), "\n").unwrap();
        ::std::process::exit(1);
    };
}

/// Assert a condition that, when violated, means the tracee or the trace
/// can no longer be trusted. Logs the tracee's identity and aborts.
macro_rules! ed_assert {
    ($task:expr, $cond:expr) => {
        {
            if !$cond {
                {
                    use ::std::io::Write;
                    use crate::log::LogFatal;
                    let mut stream = crate::log::log(
                        LogFatal,
                        file!(),
                        line!(),
                        module_path!(),
                        true
                    );
                    write!(
                        stream,
                        "(tid: {}) Assertion `{}' failed to hold. ",
                        $task.tid,
                        stringify!($cond)
                    ).unwrap();
                }
                crate::log::notifying_abort(backtrace::Backtrace::new());
            }
        }
    };
    ($task:expr, $cond:expr, $($args:tt)+) => {
        {
            if !$cond {
                {
                    use ::std::io::Write;
                    use crate::log::LogFatal;
                    let mut stream = crate::log::log(
                        LogFatal,
                        file!(),
                        line!(),
                        module_path!(),
                        true
                    );
                    write!(
                        stream,
                        "(tid: {}) Assertion `{}' failed to hold. ",
                        $task.tid,
                        stringify!($cond)
                    ).unwrap();
                    write!(stream, $($args)+).unwrap();
                }
                crate::log::notifying_abort(backtrace::Backtrace::new());
            }
        }
    };
}

/// Dump the stacktrace and abort.
pub fn notifying_abort(bt: Backtrace) -> ! {
    let mut stderr = io::stderr();
    write!(stderr, "=== Start retrace backtrace:\n").unwrap();
    write!(stderr, "{:?}", bt).unwrap();
    write!(stderr, "=== End retrace backtrace\n").unwrap();
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing() {
        assert!(parse_level("debug") == LogDebug);
        assert!(parse_level("warn") == LogWarn);
        assert!(parse_level("nonsense") == LogWarn);
    }

    #[test]
    fn level_ordering() {
        assert!(LogFatal < LogError);
        assert!(LogError < LogWarn);
        assert!(LogWarn < LogInfo);
        assert!(LogInfo < LogDebug);
    }
}
