//! Purpose: Process-wide fallback symbol source common to all namespaces.
//! Exports: `SharedScope`, `SharedScopeBuilder`.
//! Role: Read-only library layer consulted after a namespace's own archive.
//! Invariants: Contents are fixed once built; lookups take no locks.
//! Invariants: Symbols defined here carry `SymbolOrigin::Shared`.
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::archive::ArchiveReader;
use crate::core::error::Error;
use crate::core::manifest::PackageInfo;
use crate::core::symbol::{
    CodeSource, CodeSymbol, SymbolOrigin, SymbolSource, entry_symbol_name, symbol_group,
};

#[derive(Debug, Default)]
pub struct SharedScope {
    symbols: HashMap<String, Arc<CodeSymbol>>,
}

impl SharedScope {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> SharedScopeBuilder {
        SharedScopeBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CodeSymbol>> {
        self.symbols.get(name).cloned()
    }
}

impl SymbolSource for SharedScope {
    fn find_symbol(&self, name: &str) -> Result<Option<Arc<CodeSymbol>>, Error> {
        Ok(self.get(name))
    }
}

#[derive(Default)]
pub struct SharedScopeBuilder {
    symbols: HashMap<String, Arc<CodeSymbol>>,
}

impl SharedScopeBuilder {
    /// First definition of a name wins; later ones are ignored.
    pub fn symbol(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        if !self.symbols.contains_key(&name) {
            let symbol = shared_symbol(&name, bytes, CodeSource::default());
            self.symbols.insert(name, Arc::new(symbol));
        }
        self
    }

    /// Loads every symbol entry of a library archive, then releases the file.
    pub fn archive(mut self, path: impl AsRef<Path>) -> Result<Self, Error> {
        let reader = ArchiveReader::open(path.as_ref())?;
        let source = CodeSource {
            location: reader.path().to_path_buf(),
            signers: reader.signers().to_vec(),
        };
        let mut loaded = 0usize;
        for entry in reader.entry_names() {
            let Some(name) = entry_symbol_name(entry) else {
                continue;
            };
            if self.symbols.contains_key(&name) {
                tracing::debug!(symbol = %name, library = %source.location.display(), "shadowed library symbol");
                continue;
            }
            let bytes = match reader.read_entry(entry) {
                Ok(bytes) => bytes,
                Err(err) => {
                    let _ = reader.close();
                    return Err(err);
                }
            };
            let symbol = shared_symbol(&name, bytes, source.clone());
            self.symbols.insert(name, Arc::new(symbol));
            loaded += 1;
        }
        reader.close()?;
        tracing::debug!(library = %source.location.display(), loaded, "loaded shared library");
        Ok(self)
    }

    pub fn build(self) -> SharedScope {
        SharedScope {
            symbols: self.symbols,
        }
    }
}

fn shared_symbol(name: &str, bytes: Vec<u8>, source: CodeSource) -> CodeSymbol {
    let package = symbol_group(name).map(|group| Arc::new(PackageInfo::unattributed(group)));
    CodeSymbol::new(name, bytes, SymbolOrigin::Shared, source, package)
}
