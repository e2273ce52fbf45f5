//! Shared test helpers: a runner that records every invocation and answers
//! from a script instead of spawning the runtime.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use singularity_client::{
    run_command, CommandRunner, Error, ExecOptions, ExecutionResult, Result,
};

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub argv: Vec<String>,
    pub options: ExecOptions,
    pub elevated: bool,
}

type Handler = dyn Fn(&[String], &ExecOptions) -> Result<ExecutionResult> + Send + Sync;

pub struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
    handler: Box<Handler>,
}

impl RecordingRunner {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&[String], &ExecOptions) -> Result<ExecutionResult> + Send + Sync + 'static,
    {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        })
    }

    /// Every invocation exits 0 with no output
    pub fn succeeding() -> Arc<Self> {
        Self::new(|_, _| ok(""))
    }

    /// Runs `tar` for real when asked to `exec <image> tar ...`, succeeds otherwise
    pub fn with_host_tar() -> Arc<Self> {
        Self::new(|argv, options| {
            if argv.get(1).map(String::as_str) == Some("exec")
                && argv.get(3).map(String::as_str) == Some("tar")
            {
                return run_command(&argv[3..], options, false);
            }
            ok("")
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose argv after the binary starts with `words`
    pub fn count(&self, words: &[&str]) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| is(&c.argv, words))
            .count()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(
        &self,
        argv: &[String],
        options: &ExecOptions,
        elevated: bool,
    ) -> Result<ExecutionResult> {
        self.calls.lock().unwrap().push(Call {
            argv: argv.to_vec(),
            options: options.clone(),
            elevated,
        });
        (self.handler)(argv, options)
    }
}

pub fn ok(stdout: &str) -> Result<ExecutionResult> {
    Ok(ExecutionResult {
        stdout: stdout.as_bytes().to_vec(),
        ..Default::default()
    })
}

pub fn exit(code: i32, stderr: &str) -> Result<ExecutionResult> {
    Ok(ExecutionResult {
        stderr: stderr.as_bytes().to_vec(),
        exit_code: code,
        ..Default::default()
    })
}

pub fn launch_failure(program: &str) -> Result<ExecutionResult> {
    Err(Error::Launch {
        program: program.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
    })
}

pub fn is(argv: &[String], words: &[&str]) -> bool {
    argv.len() > words.len() && argv[1..].iter().zip(words).all(|(a, w)| a == w)
}

pub fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
