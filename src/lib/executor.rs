//! Subprocess executor
//!
//! Runs a rendered argument vector, optionally behind `sudo` and with a
//! clean environment, and captures stdout and stderr as separate buffers.
//! A non-zero exit code is a normal outcome and comes back in
//! [`ExecutionResult::exit_code`]; only failing to launch or reap the
//! process is an error.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::command::{build_command, render_command, Verb};
use crate::error::{Error, Result};

/// Command prefixed to argv for elevated operations
pub const ELEVATION_COMMAND: &str = "sudo";

/// `PATH` handed to children started with a clean environment
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Minimal environment for clean-environment runs
pub fn default_environment() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("PATH".to_string(), DEFAULT_PATH.to_string());
    env
}

/// Options for a single subprocess invocation
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory override (None or empty inherits the caller's)
    pub pwd: Option<PathBuf>,
    /// Do not log the command line
    pub quiet: bool,
    /// Start the child from `env` instead of the caller's environment
    pub clean_env: bool,
    /// Environment applied when `clean_env` is set (empty means the default set)
    pub env: BTreeMap<String, String>,
    /// Kill the child after this long (None waits forever)
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    /// Clean environment with the default variable set
    pub fn clean() -> Self {
        Self {
            clean_env: true,
            env: default_environment(),
            ..Self::default()
        }
    }

    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_pwd(mut self, pwd: impl Into<PathBuf>) -> Self {
        self.pwd = Some(pwd.into());
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.clean_env = true;
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Environment the child actually receives when `clean_env` is set
    fn child_environment(&self) -> BTreeMap<String, String> {
        if self.env.is_empty() {
            default_environment()
        } else {
            self.env.clone()
        }
    }
}

/// Outcome of a process that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: Vec<u8>,
    /// Process exit code
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Turn a non-zero exit into [`Error::NonZeroExit`] for `argv`
    pub fn into_checked(self, argv: &[String]) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::NonZeroExit {
                command: render_command(argv),
                code: self.exit_code,
                stderr: self.stderr_string().trim().to_string(),
            })
        }
    }
}

/// Something that can run an argument vector.
///
/// [`SystemRunner`] spawns real processes; tests substitute their own.
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String], options: &ExecOptions, elevated: bool) -> Result<ExecutionResult>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(
        &self,
        argv: &[String],
        options: &ExecOptions,
        elevated: bool,
    ) -> Result<ExecutionResult> {
        (**self).run(argv, options, elevated)
    }
}

/// Runs commands as child processes of the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        argv: &[String],
        options: &ExecOptions,
        elevated: bool,
    ) -> Result<ExecutionResult> {
        run_command(argv, options, elevated)
    }
}

/// Run `argv` to completion and capture its streams
pub fn run_command(
    argv: &[String],
    options: &ExecOptions,
    elevated: bool,
) -> Result<ExecutionResult> {
    let mut full: Vec<String> = Vec::with_capacity(argv.len() + 1);
    if elevated {
        full.push(ELEVATION_COMMAND.to_string());
    }
    full.extend(argv.iter().cloned());

    let Some((program, args)) = full.split_first() else {
        return Err(Error::Launch {
            program: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        });
    };

    if !options.quiet {
        tracing::info!(command = %render_command(&full), "running command");
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if options.clean_env {
        command.env_clear();
        command.envs(options.child_environment());
    }

    if let Some(pwd) = options.pwd.as_ref().filter(|p| !p.as_os_str().is_empty()) {
        command.current_dir(pwd);
    }

    let mut child = command.spawn().map_err(|source| Error::Launch {
        program: program.clone(),
        source,
    })?;

    let stdout_handle = spawn_pipe_reader(child.stdout.take());
    let stderr_handle = spawn_pipe_reader(child.stderr.take());

    let status = match options.timeout {
        Some(timeout) => match child.wait_timeout(timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                if let Err(e) = child.kill() {
                    tracing::warn!(
                        program = %program,
                        error = %e,
                        "failed to kill timed out process"
                    );
                }
                if let Err(e) = child.wait() {
                    tracing::warn!(
                        program = %program,
                        error = %e,
                        "failed to reap timed out process"
                    );
                }
                // A grandchild may still hold the pipes open, so the readers
                // are detached rather than joined; each ends at pipe EOF.
                drop(stdout_handle);
                drop(stderr_handle);
                return Err(Error::Timeout {
                    program: program.clone(),
                    timeout,
                });
            }
            Err(e) => {
                return Err(Error::Wait {
                    program: program.clone(),
                    reason: e.to_string(),
                })
            }
        },
        None => child.wait().map_err(|e| Error::Wait {
            program: program.clone(),
            reason: e.to_string(),
        })?,
    };

    let stdout = collect_pipe(stdout_handle, program)?;
    let stderr = collect_pipe(stderr_handle, program)?;

    Ok(ExecutionResult {
        stdout,
        stderr,
        exit_code: exit_code(&status, program)?,
    })
}

fn spawn_pipe_reader<R>(pipe: Option<R>) -> Option<thread::JoinHandle<io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut stream| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf)?;
            Ok(buf)
        })
    })
}

fn collect_pipe(
    handle: Option<thread::JoinHandle<io::Result<Vec<u8>>>>,
    program: &str,
) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| Error::Wait {
                program: program.to_string(),
                reason: "output reader thread panicked".to_string(),
            })?
            .map_err(|e| Error::Wait {
                program: program.to_string(),
                reason: format!("failed to read output: {}", e),
            }),
        None => Ok(Vec::new()),
    }
}

fn exit_code(status: &ExitStatus, program: &str) -> Result<i32> {
    if let Some(code) = status.code() {
        return Ok(code);
    }

    #[cfg(unix)]
    let reason = {
        use std::os::unix::process::ExitStatusExt;
        match status.signal() {
            Some(sig) => format!("terminated by signal {}", sig),
            None => "terminated without an exit code".to_string(),
        }
    };
    #[cfg(not(unix))]
    let reason = "terminated without an exit code".to_string();

    Err(Error::Wait {
        program: program.to_string(),
        reason,
    })
}

/// A runner bound to a runtime binary and session options
pub struct Invoker<'a> {
    runner: &'a dyn CommandRunner,
    binary: &'a str,
    options: ExecOptions,
}

impl<'a> Invoker<'a> {
    pub fn new(runner: &'a dyn CommandRunner, binary: &'a str, options: ExecOptions) -> Self {
        Self {
            runner,
            binary,
            options,
        }
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    /// Render a runtime command without running it
    pub fn command<I, S>(&self, verb: Verb, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        build_command(self.binary, verb, args)
    }

    /// Run a runtime verb; non-zero exits become [`Error::NonZeroExit`]
    pub fn invoke_checked<I, S>(
        &self,
        verb: Verb,
        args: I,
        elevated: bool,
    ) -> Result<ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let argv = self.command(verb, args);
        self.runner
            .run(&argv, &self.options, elevated)?
            .into_checked(&argv)
    }

    /// Run an already rendered argv with explicit options
    pub fn run_argv(
        &self,
        argv: &[String],
        options: &ExecOptions,
        elevated: bool,
    ) -> Result<ExecutionResult> {
        self.runner.run(argv, options, elevated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_environment_has_path() {
        let env = default_environment();
        assert_eq!(env.get("PATH").map(String::as_str), Some(DEFAULT_PATH));
    }

    #[test]
    fn test_clean_options_fall_back_to_default_env() {
        let options = ExecOptions {
            clean_env: true,
            ..Default::default()
        };
        assert!(options.child_environment().contains_key("PATH"));
    }

    #[test]
    fn test_empty_argv_is_launch_error() {
        let err = run_command(&[], &ExecOptions::default(), false).unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[test]
    fn test_into_checked() {
        let ok = ExecutionResult::default();
        assert!(ok.into_checked(&argv(&["true"])).is_ok());

        let failed = ExecutionResult {
            stderr: b"FATAL: no instance\n".to_vec(),
            exit_code: 255,
            ..Default::default()
        };
        match failed.into_checked(&argv(&["singularity", "instance", "stop", "x"])) {
            Err(Error::NonZeroExit {
                command,
                code,
                stderr,
            }) => {
                assert_eq!(command, "singularity instance stop x");
                assert_eq!(code, 255);
                assert_eq!(stderr, "FATAL: no instance");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_streams_are_separate() {
        let result = run_command(
            &argv(&["sh", "-c", "echo out; echo err 1>&2"]),
            &ExecOptions::default().quiet(true),
            false,
        )
        .unwrap();
        assert_eq!(result.stdout_string(), "out\n");
        assert_eq!(result.stderr_string(), "err\n");
        assert!(result.success());
    }
}
