//! Purpose: Define the stable public Rust API boundary for plugspace.
//! Exports: Core types and operations needed by embedding hosts and the CLI.
//! Role: Public, additive-only surface over namespaces, resolution, and binding.
//! Invariants: Registry mutation is reachable only through namespace open/close.
//! Invariants: Internal helpers stay crate-private.

mod loader;
mod summary;

pub use crate::core::archive::{ARCHIVE_EXTENSION, ArchiveBackend, ArchiveReader, ArchiveWriter};
pub use crate::core::binder::{Host, Unit, UnitBinder};
pub use crate::core::descriptor::{DESCRIPTOR_ENTRY, Descriptor};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::manifest::{MANIFEST_ENTRY, Manifest, PackageInfo};
pub use crate::core::namespace::{Delegation, Namespace, NamespaceConfig};
pub use crate::core::oracle::{DependencyGraph, DependencyOracle, LoadOrder};
pub use crate::core::registry::NamespaceRegistry;
pub use crate::core::shared::{SharedScope, SharedScopeBuilder};
pub use crate::core::symbol::{
    CodeSource, CodeSymbol, NamespaceId, SYMBOL_SUFFIX, SymbolOrigin, SymbolSource,
    symbol_entry_path,
};
pub use loader::{
    ApiResult, DiscoveredPlugin, Discovery, LoadReport, Loader, SkippedPlugin, read_descriptor,
};
pub use summary::{ArchiveSummary, SymbolSummary, sha256_hex};
