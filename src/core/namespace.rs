//! Purpose: Isolation domain owning one archive, with bounded symbol resolution.
//! Exports: `Namespace`, `NamespaceConfig`, `NamespaceCore`, `Delegation`.
//! Role: Resolves symbols from its own archive, the shared scope, then one hop outward.
//! Invariants: Outward delegation never goes past one hop; peers answer `LocalOnly`.
//! Invariants: Closed implies absent from the registry and every lookup fails.
//! Invariants: A symbol is defined at most once per namespace; racers observe the first.
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::archive::ArchiveReader;
use crate::core::binder::{Unit, UnitSlot};
use crate::core::descriptor::Descriptor;
use crate::core::error::{Error, ErrorKind};
use crate::core::manifest::PackageInfo;
use crate::core::oracle::DependencyOracle;
use crate::core::registry::NamespaceRegistry;
use crate::core::shared::SharedScope;
use crate::core::symbol::{
    CodeSource, CodeSymbol, NamespaceId, SymbolOrigin, SymbolSource, entry_symbol_name,
    symbol_entry_path, symbol_group,
};

/// How far a resolution request may reach beyond the requesting namespace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delegation {
    /// Own archive, shared scope, then dependency namespaces (one hop).
    Outward,
    /// Own archive and shared scope only.
    LocalOnly,
}

/// Everything a namespace needs besides its archive.
#[derive(Clone)]
pub struct NamespaceConfig {
    pub descriptor: Descriptor,
    pub registry: Arc<NamespaceRegistry>,
    pub oracle: Arc<dyn DependencyOracle>,
    pub shared: Arc<dyn SymbolSource>,
}

impl NamespaceConfig {
    pub fn new(
        descriptor: Descriptor,
        registry: Arc<NamespaceRegistry>,
        oracle: Arc<dyn DependencyOracle>,
    ) -> Self {
        Self {
            descriptor,
            registry,
            oracle,
            shared: Arc::new(SharedScope::empty()),
        }
    }

    pub fn with_shared(mut self, shared: Arc<dyn SymbolSource>) -> Self {
        self.shared = shared;
        self
    }
}

/// Registry-visible part of a namespace. Holds no references to other namespaces.
pub struct NamespaceCore {
    id: NamespaceId,
    descriptor: Descriptor,
    archive: ArchiveReader,
    shared: Arc<dyn SymbolSource>,
    closed: AtomicBool,
    symbols: Mutex<HashMap<String, Arc<CodeSymbol>>>,
    packages: Mutex<HashMap<String, Arc<PackageInfo>>>,
    pub(crate) unit: Mutex<UnitSlot>,
}

impl NamespaceCore {
    pub fn id(&self) -> NamespaceId {
        self.id
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, symbol: Option<&str>) -> Result<(), Error> {
        if !self.is_closed() {
            return Ok(());
        }
        let mut err = Error::new(ErrorKind::Closed)
            .with_message("namespace is closed")
            .with_unit(&self.descriptor.name);
        if let Some(symbol) = symbol {
            err = err.with_symbol(symbol);
        }
        Err(err)
    }

    fn materialize(&self, entry: &str) -> Result<Vec<u8>, Error> {
        self.ensure_open(None)?;
        self.archive
            .read_entry(entry)
            .map_err(|err| err.with_unit(&self.descriptor.name))
    }

    /// Own archive only. Defines and caches the symbol on first hit.
    fn find_local(&self, name: &str) -> Result<Option<Arc<CodeSymbol>>, Error> {
        self.ensure_open(Some(name))?;
        if let Some(symbol) = self.lock_symbols().get(name) {
            return Ok(Some(Arc::clone(symbol)));
        }
        let entry = symbol_entry_path(name);
        if !self.archive.contains(&entry) {
            return Ok(None);
        }
        let bytes = self
            .archive
            .read_entry(&entry)
            .map_err(|err| err.with_symbol(name).with_unit(&self.descriptor.name))?;
        let package = symbol_group(name).map(|group| self.package_for(group));
        let source = CodeSource {
            location: self.archive.path().to_path_buf(),
            signers: self.archive.signers().to_vec(),
        };
        let symbol = CodeSymbol::new(
            name,
            bytes,
            SymbolOrigin::Namespace(self.id),
            source,
            package,
        );

        let mut symbols = self.lock_symbols();
        let defined = symbols
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(symbol));
        tracing::trace!(unit = %self.descriptor.name, symbol = name, "defined local symbol");
        Ok(Some(Arc::clone(defined)))
    }

    /// Own archive, then the shared scope. This is the whole of `Delegation::LocalOnly`.
    fn find_scoped(&self, name: &str) -> Result<Option<Arc<CodeSymbol>>, Error> {
        if let Some(symbol) = self.find_local(name)? {
            return Ok(Some(symbol));
        }
        self.shared.find_symbol(name)
    }

    // Derived once per group; later materializations reuse the record.
    fn package_for(&self, group: &str) -> Arc<PackageInfo> {
        let mut packages = self
            .packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = packages.get(group) {
            return Arc::clone(info);
        }
        let info = match self.archive.manifest() {
            Some(manifest) => {
                if let Some(value) = manifest.unrecognized_seal(group) {
                    tracing::warn!(
                        unit = %self.descriptor.name,
                        group,
                        value,
                        "unrecognized Sealed attribute; group left unsealed"
                    );
                }
                manifest.package_info(group, self.archive.path().to_path_buf())
            }
            None => PackageInfo::unattributed(group),
        };
        let info = Arc::new(info);
        packages.insert(group.to_string(), Arc::clone(&info));
        info
    }

    fn lock_symbols(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CodeSymbol>>> {
        self.symbols.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Host-facing handle to a namespace. Clones share the same namespace.
#[derive(Clone)]
pub struct Namespace {
    core: Arc<NamespaceCore>,
    registry: Arc<NamespaceRegistry>,
    oracle: Arc<dyn DependencyOracle>,
}

impl Namespace {
    /// Opens the archive at `path` and registers the new namespace.
    pub fn open(path: impl AsRef<Path>, config: NamespaceConfig) -> Result<Self, Error> {
        config.descriptor.validate()?;
        let reader = ArchiveReader::open(path.as_ref())
            .map_err(|err| err.with_unit(&config.descriptor.name))?;
        Self::with_reader(reader, config)
    }

    /// Builds a namespace over an already-open reader. Registration is the last step.
    pub fn with_reader(reader: ArchiveReader, config: NamespaceConfig) -> Result<Self, Error> {
        let NamespaceConfig {
            descriptor,
            registry,
            oracle,
            shared,
        } = config;
        if let Err(err) = descriptor.validate() {
            let _ = reader.close();
            return Err(err);
        }
        let core = Arc::new(NamespaceCore {
            id: NamespaceId::next(),
            descriptor,
            archive: reader,
            shared,
            closed: AtomicBool::new(false),
            symbols: Mutex::new(HashMap::new()),
            packages: Mutex::new(HashMap::new()),
            unit: Mutex::new(UnitSlot::Unbound),
        });
        if let Err(err) = registry.add(Arc::clone(&core)) {
            let _ = core.archive.close();
            return Err(err);
        }
        tracing::debug!(
            unit = %core.descriptor.name,
            id = %core.id,
            path = %core.archive.path().display(),
            "opened namespace"
        );
        Ok(Self {
            core,
            registry,
            oracle,
        })
    }

    pub fn id(&self) -> NamespaceId {
        self.core.id
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.core.descriptor
    }

    pub fn archive_path(&self) -> &Path {
        self.core.archive.path()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn is_bound(&self) -> bool {
        matches!(*self.core.lock_unit(), UnitSlot::Bound(_))
    }

    pub fn unit(&self) -> Option<Arc<dyn Unit>> {
        match &*self.core.lock_unit() {
            UnitSlot::Bound(unit) => Some(Arc::clone(unit)),
            _ => None,
        }
    }

    /// Symbol names present in this namespace's own archive.
    pub fn symbols(&self) -> Vec<String> {
        self.core
            .archive
            .entry_names()
            .iter()
            .filter_map(|entry| entry_symbol_name(entry))
            .collect()
    }

    /// Group metadata already attached to this namespace, sorted by group name.
    pub fn packages(&self) -> Vec<Arc<PackageInfo>> {
        let packages = self
            .core
            .packages
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = packages.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Raw bytes of an archive entry addressed by slash-separated path.
    pub fn materialize(&self, entry: &str) -> Result<Vec<u8>, Error> {
        self.core.materialize(entry)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<CodeSymbol>, Error> {
        self.resolve_with(name, Delegation::Outward)
    }

    pub fn resolve_with(
        &self,
        name: &str,
        delegation: Delegation,
    ) -> Result<Arc<CodeSymbol>, Error> {
        let core = &self.core;
        if let Some(symbol) = core.find_scoped(name)? {
            return Ok(symbol);
        }

        let mut peer_failure = None;
        if delegation == Delegation::Outward {
            let peers = self.registry.snapshot();
            for peer in peers.iter() {
                if peer.id == core.id
                    || !self
                        .oracle
                        .transitively_depends(&core.descriptor, &peer.descriptor)
                {
                    continue;
                }
                // One hop: the peer answers from its own scopes, never delegating further.
                match peer.find_scoped(name) {
                    Ok(Some(symbol)) => {
                        tracing::debug!(
                            unit = %core.descriptor.name,
                            from = %peer.descriptor.name,
                            symbol = name,
                            "resolved through dependency"
                        );
                        return Ok(symbol);
                    }
                    Ok(None) => {}
                    Err(err) if err.kind() == ErrorKind::Closed => {
                        tracing::trace!(from = %peer.descriptor.name, "skipping closed peer");
                    }
                    Err(err) => {
                        tracing::warn!(
                            unit = %core.descriptor.name,
                            from = %peer.descriptor.name,
                            symbol = name,
                            error = %err,
                            "dependency lookup failed; trying remaining peers"
                        );
                        peer_failure.get_or_insert(err);
                    }
                }
            }
        }

        if let Some(err) = peer_failure {
            return Err(err);
        }

        Err(Error::new(ErrorKind::NotFound)
            .with_message(format!(
                "symbol {name} not found for unit {}",
                core.descriptor.name
            ))
            .with_symbol(name)
            .with_unit(&core.descriptor.name))
    }

    /// Releases the archive, leaves the registry, retires any bound unit.
    /// A second call is a no-op.
    pub fn close(&self) -> Result<(), Error> {
        let core = &self.core;
        if core.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let released = core.archive.close();
        self.registry.remove(core.id);
        let retired = std::mem::replace(&mut *core.lock_unit(), UnitSlot::Retired);
        drop(retired);
        core.lock_symbols().clear();
        tracing::debug!(unit = %core.descriptor.name, id = %core.id, "closed namespace");
        released.map_err(|err| {
            tracing::warn!(unit = %core.descriptor.name, error = %err, "archive release failed");
            err.with_unit(&core.descriptor.name)
        })
    }

    pub(crate) fn core(&self) -> &NamespaceCore {
        &self.core
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.core.id)
            .field("name", &self.core.descriptor.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl NamespaceCore {
    pub(crate) fn lock_unit(&self) -> std::sync::MutexGuard<'_, UnitSlot> {
        self.unit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
