//! Purpose: Host-facing loader that discovers plugin archives and manages their namespaces.
//! Exports: `Loader`, `Discovery`, `DiscoveredPlugin`, `LoadReport`, `SkippedPlugin`.
//! Role: Thin embedding boundary over the core; the CLI's only path into namespaces.
//! Invariants: Namespaces open in dependency order; a plugin with a missing or skipped
//! hard dependency is never opened.
//! Invariants: `unload` closes before forgetting, so a name can be reused afterwards.
//! Invariants: An unreadable archive is skipped, never fatal to the rest of the directory.
//! Invariants: The dependency graph only changes for names with no live namespace.
#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::archive::{ArchiveReader, io_error_kind};
use crate::core::binder::{Host, Unit, UnitBinder};
use crate::core::descriptor::Descriptor;
use crate::core::error::{Error, ErrorKind};
use crate::core::namespace::{Namespace, NamespaceConfig};
use crate::core::oracle::{DependencyGraph, DependencyOracle};
use crate::core::registry::NamespaceRegistry;
use crate::core::shared::SharedScope;
use crate::core::symbol::{CodeSymbol, NamespaceId, SymbolSource};
use crate::plugin_paths::{default_plugin_dir, is_plugin_archive};

pub type ApiResult<T> = Result<T, Error>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscoveredPlugin {
    pub descriptor: Descriptor,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SkippedPlugin {
    pub name: String,
    pub reason: String,
    pub missing: Vec<String>,
}

/// Readable archives plus the ones that had to be passed over.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Discovery {
    pub plugins: Vec<DiscoveredPlugin>,
    pub skipped: Vec<SkippedPlugin>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadReport {
    pub discovered: Vec<DiscoveredPlugin>,
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedPlugin>,
    pub cyclic: Vec<String>,
}

pub struct Loader {
    binder: UnitBinder,
    plugin_dir: PathBuf,
    shared: Arc<SharedScope>,
    registry: Arc<NamespaceRegistry>,
    graph: Arc<DependencyGraph>,
    loaded: Mutex<BTreeMap<String, Namespace>>,
}

impl Loader {
    pub fn new(host: Host) -> Self {
        let plugin_dir = if host.plugin_dir().as_os_str().is_empty() {
            default_plugin_dir()
        } else {
            host.plugin_dir().to_path_buf()
        };
        Self {
            binder: UnitBinder::new(Arc::new(host)),
            plugin_dir,
            shared: Arc::new(SharedScope::empty()),
            registry: Arc::new(NamespaceRegistry::new()),
            graph: Arc::new(DependencyGraph::new()),
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_plugin_dir(mut self, plugin_dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = plugin_dir.into();
        self
    }

    pub fn with_shared(mut self, shared: SharedScope) -> Self {
        self.shared = Arc::new(shared);
        self
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn host(&self) -> &Host {
        self.binder.host()
    }

    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Reads the descriptor of every archive in the plugin directory, sorted by path.
    /// Unreadable archives and later duplicates of a name land in `skipped`.
    pub fn discover(&self) -> ApiResult<Discovery> {
        let entries = std::fs::read_dir(&self.plugin_dir).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to read plugin directory")
                .with_path(&self.plugin_dir)
                .with_source(err)
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::ReadFailure)
                    .with_message("failed to read plugin directory entry")
                    .with_path(&self.plugin_dir)
                    .with_source(err)
            })?;
            let path = entry.path();
            if path.is_file() && is_plugin_archive(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut discovery = Discovery::default();
        for path in paths {
            let descriptor = match read_descriptor(&path) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable archive"
                    );
                    discovery.skipped.push(SkippedPlugin {
                        name: file_stem(&path),
                        reason: err.to_string(),
                        missing: Vec::new(),
                    });
                    continue;
                }
            };
            if let Some(first) = seen.get(&descriptor.name) {
                let err = Error::new(ErrorKind::AlreadyExists)
                    .with_message(format!(
                        "plugin {} is provided by more than one archive (kept {})",
                        descriptor.name,
                        first.display()
                    ))
                    .with_unit(&descriptor.name)
                    .with_path(&path);
                tracing::warn!(
                    plugin = %descriptor.name,
                    error = %err,
                    "skipping duplicate archive"
                );
                discovery.skipped.push(SkippedPlugin {
                    name: descriptor.name,
                    reason: err.to_string(),
                    missing: Vec::new(),
                });
                continue;
            }
            seen.insert(descriptor.name.clone(), path.clone());
            discovery.plugins.push(DiscoveredPlugin { descriptor, path });
        }
        Ok(discovery)
    }

    /// Opens every discovered plugin that is not loaded yet, prerequisites first.
    pub fn load_all(&self) -> ApiResult<LoadReport> {
        let Discovery { plugins, skipped } = self.discover()?;
        for plugin in &plugins {
            // A live namespace keeps the edges it was opened with.
            if !self.registry.contains_name(&plugin.descriptor.name) {
                self.graph.insert(plugin.descriptor.clone());
            }
        }
        let paths: BTreeMap<&str, &Path> = plugins
            .iter()
            .map(|plugin| (plugin.descriptor.name.as_str(), plugin.path.as_path()))
            .collect();
        let order = self.graph.load_order();
        if !order.cyclic.is_empty() {
            tracing::warn!(plugins = ?order.cyclic, "dependency cycle detected; loading anyway");
        }

        let mut report = LoadReport {
            skipped,
            cyclic: order.cyclic.clone(),
            ..LoadReport::default()
        };
        let mut failed: BTreeSet<String> = BTreeSet::new();
        for name in &order.order {
            let Some(path) = paths.get(name.as_str()) else {
                continue;
            };
            if self.lock_loaded().contains_key(name) {
                continue;
            }
            let Some(descriptor) = self.graph.get(name) else {
                continue;
            };

            let missing = self.graph.missing_dependencies(name);
            if !missing.is_empty() {
                tracing::warn!(plugin = %name, missing = ?missing, "missing hard dependencies");
                failed.insert(name.clone());
                report.skipped.push(SkippedPlugin {
                    name: name.clone(),
                    reason: "missing hard dependencies".to_string(),
                    missing,
                });
                continue;
            }
            let blocked: Vec<String> = descriptor
                .depends
                .iter()
                .filter(|dep| failed.contains(*dep))
                .cloned()
                .collect();
            if !blocked.is_empty() {
                tracing::warn!(plugin = %name, blocked = ?blocked, "dependency failed to load");
                failed.insert(name.clone());
                report.skipped.push(SkippedPlugin {
                    name: name.clone(),
                    reason: "hard dependency failed to load".to_string(),
                    missing: blocked,
                });
                continue;
            }

            match self.open(path, descriptor) {
                Ok(_) => report.loaded.push(name.clone()),
                Err(err) => {
                    tracing::warn!(plugin = %name, error = %err, "failed to open plugin");
                    failed.insert(name.clone());
                    report.skipped.push(SkippedPlugin {
                        name: name.clone(),
                        reason: err.to_string(),
                        missing: Vec::new(),
                    });
                }
            }
        }
        report.discovered = plugins;
        Ok(report)
    }

    /// Opens a single archive under the given descriptor and tracks its namespace.
    /// The descriptor reaches the dependency graph only once the open succeeds.
    pub fn open(&self, path: &Path, descriptor: Descriptor) -> ApiResult<Namespace> {
        let oracle: Arc<dyn DependencyOracle> = self.graph.clone();
        let shared: Arc<dyn SymbolSource> = self.shared.clone();
        let config = NamespaceConfig::new(descriptor.clone(), Arc::clone(&self.registry), oracle)
            .with_shared(shared);
        let ns = Namespace::open(path, config)?;
        let name = descriptor.name.clone();
        self.graph.insert(descriptor);
        self.lock_loaded().insert(name, ns.clone());
        Ok(ns)
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.lock_loaded().get(name).cloned()
    }

    pub fn loaded_names(&self) -> Vec<String> {
        self.lock_loaded().keys().cloned().collect()
    }

    /// Descriptor name of a live namespace.
    pub fn name_of(&self, id: NamespaceId) -> Option<String> {
        self.lock_loaded()
            .values()
            .find(|ns| ns.id() == id)
            .map(|ns| ns.descriptor().name.clone())
    }

    pub fn resolve(&self, plugin: &str, symbol: &str) -> ApiResult<Arc<CodeSymbol>> {
        self.require(plugin)?.resolve(symbol)
    }

    pub fn bind(&self, plugin: &str, unit: Arc<dyn Unit>) -> ApiResult<()> {
        let ns = self.require(plugin)?;
        self.binder.bind(&ns, unit)
    }

    /// Closes and forgets a plugin's namespace. The descriptor stays known.
    pub fn unload(&self, plugin: &str) -> ApiResult<()> {
        let ns = self.lock_loaded().remove(plugin);
        match ns {
            Some(ns) => ns.close(),
            None => Err(not_loaded(plugin)),
        }
    }

    /// Closes every namespace, returning the first release failure after trying all.
    pub fn unload_all(&self) -> ApiResult<()> {
        let namespaces: Vec<Namespace> = std::mem::take(&mut *self.lock_loaded())
            .into_values()
            .collect();
        let mut first_err = None;
        for ns in namespaces {
            if let Err(err) = ns.close() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn require(&self, plugin: &str) -> ApiResult<Namespace> {
        self.namespace(plugin).ok_or_else(|| not_loaded(plugin))
    }

    fn lock_loaded(&self) -> MutexGuard<'_, BTreeMap<String, Namespace>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Descriptor from `plugin.json`, or a name taken from the file stem.
pub fn read_descriptor(path: &Path) -> ApiResult<Descriptor> {
    let reader = ArchiveReader::open(path)?;
    let descriptor = reader.descriptor();
    reader.close()?;
    match descriptor? {
        Some(descriptor) => Ok(descriptor),
        None => {
            let descriptor = Descriptor::new(file_stem(path), "0");
            descriptor.validate().map_err(|err| err.with_path(path))?;
            Ok(descriptor)
        }
    }
}

fn not_loaded(plugin: &str) -> Error {
    Error::new(ErrorKind::NotFound)
        .with_message(format!("plugin {plugin} is not loaded"))
        .with_unit(plugin)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
