//! Client façade
//!
//! The single entry point for driving the runtime. A client owns its
//! registry of started instances and tears them down when asked, or when it
//! is dropped without having been torn down.
//!
//! Registry mutations (start, stop) run under a write lock for the whole
//! runtime call, so two callers can never register the same name. Lookups
//! take the read lock only long enough to copy what they need.

use std::collections::BTreeMap;
use std::fs;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::archive::{archive_file_name, scratch_dir, ContainerArchive};
use crate::command::{archive_command, build_command, Verb};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::executor::{CommandRunner, ExecOptions, ExecutionResult, Invoker, SystemRunner};
use crate::instance::Instance;
use crate::pull::{pull, PullOptions};
use crate::registry::{InstanceRegistry, StopAllReport};

/// Separator line used in listings
const RULE: &str = "-----------------";

/// Outcome of tearing a client down
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Result of stopping every registered instance
    pub stop: StopAllReport,
    /// Output of `instance list` afterwards, if the query succeeded
    pub running: Option<String>,
}

/// Façade over the container runtime
pub struct Client {
    config: ClientConfig,
    runner: Arc<dyn CommandRunner>,
    registry: RwLock<InstanceRegistry>,
    torn_down: AtomicBool,
}

impl Client {
    /// Client that runs real processes
    pub fn new(config: ClientConfig) -> Self {
        Self::with_runner(config, SystemRunner)
    }

    /// Client that sends every invocation through `runner`
    pub fn with_runner(config: ClientConfig, runner: impl CommandRunner + 'static) -> Self {
        Self {
            config,
            runner: Arc::new(runner),
            registry: RwLock::new(InstanceRegistry::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn invoker(&self) -> Invoker<'_> {
        Invoker::new(
            self.runner.as_ref(),
            &self.config.binary,
            self.config.exec_options(),
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, InstanceRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InstanceRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Image and elevation of a registered instance
    fn resolve(&self, name: &str) -> Result<(String, bool)> {
        let registry = self.read();
        let instance = registry.get(name)?;
        Ok((instance.image().to_string(), instance.elevated()))
    }

    /// Version string reported by the runtime
    pub fn version(&self) -> Result<String> {
        let result = self
            .invoker()
            .invoke_checked(Verb::Version, iter::empty::<&str>(), false)?;
        Ok(result.stdout_string().trim().to_string())
    }

    /// Start an instance of `image` named `name` and register it
    pub fn new_instance(&self, image: &str, name: &str) -> Result<Instance> {
        let instance = Instance::new(
            image,
            name,
            self.config.snapshot_environment(),
            self.config.sudo,
        );
        let invoker = self.invoker();
        let started = self.write().start(&invoker, instance)?.clone();
        self.torn_down.store(false, Ordering::SeqCst);
        Ok(started)
    }

    /// Run `command` inside a registered instance.
    ///
    /// A command that runs and fails comes back as `Ok` with a non-zero
    /// `exit_code`; `Err` means it could not be run at all.
    pub fn execute<S: AsRef<str>>(
        &self,
        instance: &str,
        command: &[S],
        options: &ExecOptions,
    ) -> Result<ExecutionResult> {
        let (image, elevated) = self.resolve(instance)?;
        let argv = build_command(
            &self.config.binary,
            Verb::Exec,
            iter::once(image.as_str()).chain(command.iter().map(|c| c.as_ref())),
        );

        let mut options = options.clone();
        if options.timeout.is_none() {
            options.timeout = self.config.timeout;
        }

        let result = self.runner.run(&argv, &options, elevated);
        if let Err(ref e) = result {
            tracing::warn!(instance = %instance, error = %e, "error running command");
        }
        result
    }

    /// Archive `source` from inside an instance into its scratch directory.
    ///
    /// The caller owns the returned archive file and its scratch directory.
    pub fn copy_archive(
        &self,
        instance: &str,
        source: impl AsRef<Path>,
    ) -> Result<ContainerArchive> {
        let source = source.as_ref();
        let (image, elevated) = self.resolve(instance)?;
        let creation_error = |reason: String| Error::ArchiveCreation {
            source_path: source.display().to_string(),
            reason,
        };

        let scratch = scratch_dir(&self.config.scratch_root, instance)?;
        fs::create_dir_all(&scratch).map_err(|e| {
            creation_error(format!(
                "cannot create scratch directory {}: {}",
                scratch.display(),
                e
            ))
        })?;
        let archive_path = scratch.join(archive_file_name(source));
        tracing::debug!(instance = %instance, archive = %archive_path.display(), "creating archive");

        let tar = archive_command(source, &archive_path);
        let argv = build_command(&self.config.binary, Verb::Exec, iter::once(image).chain(tar));
        let options = ExecOptions::clean()
            .quiet(true)
            .with_timeout(self.config.timeout);

        let result = self
            .runner
            .run(&argv, &options, elevated)
            .map_err(|e| creation_error(e.to_string()))?;
        if !result.success() {
            return Err(creation_error(format!(
                "tar exited with code {}: {}",
                result.exit_code,
                result.stderr_string().trim()
            )));
        }

        ContainerArchive::open(archive_path, scratch)
    }

    /// Stop a registered instance and forget it
    pub fn stop_instance(&self, name: &str) -> Result<Instance> {
        let invoker = self.invoker();
        let result = self.write().stop(&invoker, name);
        result
    }

    /// Stop every registered instance, reporting each failure
    pub fn stop_all(&self) -> StopAllReport {
        let invoker = self.invoker();
        let report = self.write().stop_all(&invoker);
        report
    }

    /// Snapshot of the registered instances
    pub fn instances(&self) -> Vec<Instance> {
        self.read().list().into_iter().cloned().collect()
    }

    /// Environment an instance was started with
    pub fn get_env(&self, instance: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.read().get(instance)?.env().clone())
    }

    /// One variable of an instance's environment
    pub fn get_env_var(&self, instance: &str, var: &str) -> Result<Option<String>> {
        Ok(self.read().get(instance)?.env_var(var).map(str::to_string))
    }

    /// Human-readable listing of the registered instances
    pub fn format_instances(&self) -> String {
        let registry = self.read();
        let mut lines = vec!["CLIENT LOADED INSTANCES".to_string(), RULE.to_string()];
        if registry.is_empty() {
            lines.push("No Loaded Instances".to_string());
        }
        for instance in registry.list() {
            lines.push(format!(
                "{}: {} (started {})",
                instance.name(),
                instance.image(),
                instance.started_at().format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.push(RULE.to_string());
        lines.join("\n")
    }

    /// Print the registered instances
    pub fn list_instances(&self) {
        println!("{}", self.format_instances());
    }

    /// Every instance the runtime reports as running (`instance list`)
    pub fn list_running(&self) -> Result<String> {
        let result = self.invoker().invoke_checked(
            Verb::InstanceList,
            iter::empty::<&str>(),
            self.config.sudo,
        )?;
        Ok(result.stdout_string())
    }

    /// Pull a `shub://` or `docker://` image into `folder`
    pub fn pull(
        &self,
        image: &str,
        name: Option<&str>,
        ext: Option<&str>,
        folder: Option<&Path>,
    ) -> Result<PathBuf> {
        pull(
            &self.invoker(),
            image,
            &PullOptions {
                name,
                ext,
                folder,
                elevated: self.config.sudo,
            },
        )
    }

    /// Stop everything this client started, then ask the runtime what is
    /// still running. Safe to call more than once.
    pub fn teardown(&self) -> TeardownReport {
        tracing::info!("performing cleanup");
        let stop = self.stop_all();

        let running = match self.list_running() {
            Ok(output) => {
                tracing::info!(running = %output.trim(), "instances still running");
                Some(output)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not list running instances");
                None
            }
        };

        self.torn_down.store(true, Ordering::SeqCst);
        TeardownReport { stop, running }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.torn_down.load(Ordering::SeqCst) {
            self.teardown();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("instances", &self.read().len())
            .finish_non_exhaustive()
    }
}
