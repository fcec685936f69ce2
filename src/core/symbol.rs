//! Purpose: Materialized code symbols and the naming rules that map them to archive entries.
//! Exports: `CodeSymbol`, `CodeSource`, `SymbolOrigin`, `NamespaceId`, `SymbolSource`,
//! `SYMBOL_SUFFIX`, `symbol_entry_path`, `entry_symbol_name`, `symbol_group`.
//! Role: Value types returned by every resolution scope.
//! Invariants: `a.b.C` always maps to entry `a/b/C.code` and back.
//! Invariants: A symbol records exactly one origin; it never changes after definition.
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::Error;
use crate::core::manifest::PackageInfo;

pub const SYMBOL_SUFFIX: &str = ".code";

/// Process-unique identity of a namespace.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NamespaceId(u64);

impl NamespaceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolOrigin {
    /// Defined from the archive owned by this namespace.
    Namespace(NamespaceId),
    /// Defined by the shared library scope.
    Shared,
}

/// Where a symbol's bytes came from, with signer names passed through unverified.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CodeSource {
    pub location: PathBuf,
    pub signers: Vec<String>,
}

#[derive(Debug)]
pub struct CodeSymbol {
    name: String,
    bytes: Vec<u8>,
    origin: SymbolOrigin,
    source: CodeSource,
    package: Option<Arc<PackageInfo>>,
}

impl CodeSymbol {
    pub fn new(
        name: impl Into<String>,
        bytes: Vec<u8>,
        origin: SymbolOrigin,
        source: CodeSource,
        package: Option<Arc<PackageInfo>>,
    ) -> Self {
        Self {
            name: name.into(),
            bytes,
            origin,
            source,
            package,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn origin(&self) -> SymbolOrigin {
        self.origin
    }

    /// Namespace that defined this symbol, `None` for shared symbols.
    pub fn defining_namespace(&self) -> Option<NamespaceId> {
        match self.origin {
            SymbolOrigin::Namespace(id) => Some(id),
            SymbolOrigin::Shared => None,
        }
    }

    pub fn source(&self) -> &CodeSource {
        &self.source
    }

    pub fn package(&self) -> Option<&PackageInfo> {
        self.package.as_deref()
    }
}

/// A scope that may provide symbols by dotted name.
pub trait SymbolSource: Send + Sync {
    /// `Ok(None)` means "not provided here"; errors are reserved for real failures.
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<CodeSymbol>>, Error>;
}

pub fn symbol_entry_path(name: &str) -> String {
    format!("{}{SYMBOL_SUFFIX}", name.replace('.', "/"))
}

/// Inverse of `symbol_entry_path`; `None` for entries that are not symbols.
pub fn entry_symbol_name(entry: &str) -> Option<String> {
    let stem = entry.strip_suffix(SYMBOL_SUFFIX)?;
    if stem.is_empty() || stem.starts_with("META-INF/") {
        return None;
    }
    Some(stem.replace('/', "."))
}

/// Dotted group prefix of a symbol, `None` for ungrouped names.
pub fn symbol_group(name: &str) -> Option<&str> {
    name.rfind('.').map(|idx| &name[..idx])
}
