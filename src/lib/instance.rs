//! Instance descriptor
//!
//! An instance is a named container session started through
//! `singularity instance start`. Fields are fixed once the instance is
//! registered.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Check that `name` is one normal path component.
///
/// Instance names double as scratch directory names, so `.`, `..`, absolute
/// paths and anything containing a separator are refused.
pub fn validate_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    );
    if single {
        Ok(())
    } else {
        Err(Error::InvalidInstanceName(name.to_string()))
    }
}

/// A named, externally running container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    name: String,
    image: String,
    environment: BTreeMap<String, String>,
    elevated: bool,
    started_at: DateTime<Utc>,
}

impl Instance {
    /// Describe an instance that is about to be started
    pub fn new(
        image: impl Into<String>,
        name: impl Into<String>,
        environment: BTreeMap<String, String>,
        elevated: bool,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            environment,
            elevated,
            started_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image reference: a local path or `scheme://identifier`
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Whether operations on this instance run behind `sudo`
    pub fn elevated(&self) -> bool {
        self.elevated
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Environment captured when the instance was started
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Look up a single variable from the captured environment
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.environment.get(name).map(String::as_str)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.image)
    }
}
