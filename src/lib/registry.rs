//! Instance registry
//!
//! Tracks the instances this client started. The registry trusts its own
//! bookkeeping: an entry is added only after `instance start` succeeded and
//! removed only after `instance stop` succeeded. It never reconciles with
//! what the runtime reports.

use std::collections::BTreeMap;

use crate::command::Verb;
use crate::error::{Error, Result};
use crate::executor::Invoker;
use crate::instance::{validate_name, Instance};

/// Outcome of stopping every registered instance
#[derive(Debug, Default)]
pub struct StopAllReport {
    /// Instances that were stopped and removed
    pub stopped: Vec<String>,
    /// Instances that failed to stop, still registered
    pub failures: Vec<(String, Error)>,
}

impl StopAllReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Name-keyed collection of running instances
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: BTreeMap<String, Instance>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Instance> {
        self.instances
            .get(name)
            .ok_or_else(|| Error::UnknownInstance(name.to_string()))
    }

    /// Registered instances, ordered by name
    pub fn list(&self) -> Vec<&Instance> {
        self.instances.values().collect()
    }

    /// Start `instance` and register it once the runtime reports success
    pub fn start(&mut self, invoker: &Invoker<'_>, instance: Instance) -> Result<&Instance> {
        validate_name(instance.name())?;
        if self.contains(instance.name()) {
            return Err(Error::DuplicateName(instance.name().to_string()));
        }

        invoker.invoke_checked(
            Verb::InstanceStart,
            [instance.image(), instance.name()],
            instance.elevated(),
        )?;

        tracing::debug!(
            instance = %instance.name(),
            image = %instance.image(),
            "instance registered"
        );
        let name = instance.name().to_string();
        Ok(self.instances.entry(name).or_insert(instance))
    }

    /// Stop an instance; the entry is kept if the runtime refuses
    pub fn stop(&mut self, invoker: &Invoker<'_>, name: &str) -> Result<Instance> {
        let elevated = self.get(name)?.elevated();

        if let Err(e) = invoker.invoke_checked(Verb::InstanceStop, [name], elevated) {
            tracing::warn!(
                instance = %name,
                error = %e,
                "failed to stop instance, it must be stopped manually"
            );
            return Err(e);
        }

        tracing::debug!(instance = %name, "instance removed");
        self.instances
            .remove(name)
            .ok_or_else(|| Error::UnknownInstance(name.to_string()))
    }

    /// Attempt to stop every registered instance, collecting each failure
    pub fn stop_all(&mut self, invoker: &Invoker<'_>) -> StopAllReport {
        let names: Vec<String> = self.instances.keys().cloned().collect();
        let mut report = StopAllReport::default();

        for name in names {
            match self.stop(invoker, &name) {
                Ok(_) => report.stopped.push(name),
                Err(e) => report.failures.push((name, e)),
            }
        }

        report
    }
}
