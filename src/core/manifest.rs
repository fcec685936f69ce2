//! Purpose: Parse archive manifest attributes and derive per-group metadata records.
//! Exports: `Manifest`, `PackageInfo`, `MANIFEST_ENTRY`.
//! Role: Supplies group ("package") defaults to namespaces on first materialization.
//! Invariants: Group sections override main-section attributes, key by key.
//! Invariants: Attribute names compare case-insensitively; values are kept verbatim.
use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";

const SPECIFICATION_TITLE: &str = "specification-title";
const SPECIFICATION_VERSION: &str = "specification-version";
const SPECIFICATION_VENDOR: &str = "specification-vendor";
const IMPLEMENTATION_TITLE: &str = "implementation-title";
const IMPLEMENTATION_VERSION: &str = "implementation-version";
const IMPLEMENTATION_VENDOR: &str = "implementation-vendor";
const SEALED: &str = "sealed";

type Attributes = HashMap<String, String>;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Manifest {
    main: Attributes,
    sections: HashMap<String, Attributes>,
}

impl Manifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("manifest is not valid UTF-8")
                .with_entry(MANIFEST_ENTRY)
                .with_source(err)
        })?;

        let mut manifest = Manifest::default();
        let mut current = Attributes::new();
        let mut current_name: Option<String> = None;
        let mut in_main = true;
        let mut last_key: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                manifest.finish_section(in_main, current_name.take(), &mut current);
                in_main = false;
                last_key = None;
                continue;
            }
            if let Some(rest) = line.strip_prefix(' ') {
                let Some(key) = last_key.as_ref() else {
                    return Err(continuation_error(idx));
                };
                if let Some(value) = current.get_mut(key) {
                    value.push_str(rest);
                }
                if key == "name" {
                    if let Some(name) = current_name.as_mut() {
                        name.push_str(rest);
                    }
                }
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message(format!("manifest line {} has no attribute separator", idx + 1))
                    .with_entry(MANIFEST_ENTRY));
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.strip_prefix(' ').unwrap_or(value).to_string();
            if !in_main && key == "name" && current.is_empty() {
                current_name = Some(value.clone());
            }
            current.insert(key.clone(), value);
            last_key = Some(key);
        }
        manifest.finish_section(in_main, current_name.take(), &mut current);
        Ok(manifest)
    }

    fn finish_section(&mut self, in_main: bool, name: Option<String>, current: &mut Attributes) {
        if current.is_empty() {
            return;
        }
        let attrs = std::mem::take(current);
        if in_main {
            self.main.extend(attrs);
        } else if let Some(name) = name {
            self.sections.insert(name, attrs);
        }
    }

    pub fn main_attribute(&self, key: &str) -> Option<&str> {
        self.main.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn section_attribute(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|attrs| attrs.get(&key.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Raw `Sealed` value in effect for a group, section first.
    pub fn sealed_attribute(&self, group: &str) -> Option<&str> {
        self.section_attribute(&group_section(group), SEALED)
            .or_else(|| self.main_attribute(SEALED))
    }

    /// A `Sealed` value that is neither `true` nor `false`.
    pub fn unrecognized_seal(&self, group: &str) -> Option<&str> {
        self.sealed_attribute(group).filter(|value| {
            !value.eq_ignore_ascii_case("true") && !value.eq_ignore_ascii_case("false")
        })
    }

    /// Derives the metadata record for a dotted group name.
    pub fn package_info(&self, group: &str, location: PathBuf) -> PackageInfo {
        let section = group_section(group);
        let lookup = |key: &str| -> Option<String> {
            self.section_attribute(&section, key)
                .or_else(|| self.main_attribute(key))
                .map(str::to_string)
        };
        let sealed = lookup(SEALED)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        PackageInfo {
            name: group.to_string(),
            specification_title: lookup(SPECIFICATION_TITLE),
            specification_version: lookup(SPECIFICATION_VERSION),
            specification_vendor: lookup(SPECIFICATION_VENDOR),
            implementation_title: lookup(IMPLEMENTATION_TITLE),
            implementation_version: lookup(IMPLEMENTATION_VERSION),
            implementation_vendor: lookup(IMPLEMENTATION_VENDOR),
            seal_base: sealed.then_some(location),
        }
    }
}

fn group_section(group: &str) -> String {
    format!("{}/", group.replace('.', "/"))
}

fn continuation_error(idx: usize) -> Error {
    Error::new(ErrorKind::Corrupt)
        .with_message(format!(
            "manifest line {} continues a missing attribute",
            idx + 1
        ))
        .with_entry(MANIFEST_ENTRY)
}

/// Namespace-scoped metadata for one symbol group.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub specification_title: Option<String>,
    pub specification_version: Option<String>,
    pub specification_vendor: Option<String>,
    pub implementation_title: Option<String>,
    pub implementation_version: Option<String>,
    pub implementation_vendor: Option<String>,
    /// Archive location the group is sealed to, if sealed.
    pub seal_base: Option<PathBuf>,
}

impl PackageInfo {
    pub fn unattributed(group: &str) -> Self {
        Self {
            name: group.to_string(),
            ..Self::default()
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.seal_base.is_some()
    }
}
