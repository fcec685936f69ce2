//! Purpose: Identity and declared dependencies of a code unit.
//! Exports: `Descriptor`, `DESCRIPTOR_ENTRY`.
//! Role: Immutable value shared by namespaces, the dependency oracle, and the loader.
//! Invariants: `name` is non-empty and never contains path separators.
//! Invariants: A descriptor is never mutated after a namespace is built from it.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

/// Archive entry holding the descriptor as JSON.
pub const DESCRIPTOR_ENTRY: &str = "plugin.json";

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Dotted name of the unit's entry symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub soft_depends: Vec<String>,
}

impl Descriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = dedup(depends);
        self
    }

    pub fn with_soft_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.soft_depends = dedup(depends);
        self
    }

    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = Some(main.into());
        self
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, Error> {
        let mut descriptor: Descriptor = serde_json::from_slice(bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("invalid plugin descriptor")
                .with_entry(DESCRIPTOR_ENTRY)
                .with_source(err)
        })?;
        descriptor.depends = dedup(std::mem::take(&mut descriptor.depends));
        descriptor.soft_depends = dedup(std::mem::take(&mut descriptor.soft_depends));
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("descriptor name is empty"));
        }
        if self.name.contains('/') || self.name.contains('\\') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("descriptor name must not contain path separators")
                .with_unit(&self.name));
        }
        Ok(())
    }

    /// Hard and soft dependency names, in declaration order.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends
            .iter()
            .chain(self.soft_depends.iter())
            .map(String::as_str)
    }
}

// Declared order is kept; only repeats are dropped.
fn dedup<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let name = name.into();
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
