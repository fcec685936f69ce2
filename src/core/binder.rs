//! Purpose: Exactly-once binding of a materialized unit to its defining namespace.
//! Exports: `Unit`, `Host`, `UnitBinder`.
//! Role: Final step of loading a unit; hands it the host handle and its descriptor.
//! Invariants: Unbound -> Bound is terminal; there is no unbind and no rebind.
//! Invariants: `Unit::init` runs at most once per namespace, even under racing binds.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::descriptor::Descriptor;
use crate::core::error::{Error, ErrorKind};
use crate::core::namespace::Namespace;
use crate::core::symbol::NamespaceId;

/// A materialized plugin instance.
pub trait Unit: Send + Sync {
    /// Namespace whose archive defined this unit's entry symbol.
    fn defining_namespace(&self) -> NamespaceId;

    fn init(&self, host: &Host, descriptor: &Descriptor);
}

/// Embedding host handle passed to every unit on initialization.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Host {
    name: String,
    version: String,
    plugin_dir: PathBuf,
}

impl Host {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            plugin_dir: PathBuf::new(),
        }
    }

    pub fn with_plugin_dir(mut self, plugin_dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = plugin_dir.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }
}

pub(crate) enum UnitSlot {
    Unbound,
    Bound(Arc<dyn Unit>),
    /// The namespace was closed; nothing may bind again.
    Retired,
}

#[derive(Clone, Debug)]
pub struct UnitBinder {
    host: Arc<Host>,
}

impl UnitBinder {
    pub fn new(host: Arc<Host>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn bind(&self, ns: &Namespace, unit: Arc<dyn Unit>) -> Result<(), Error> {
        let descriptor = ns.descriptor();
        if ns.is_closed() {
            return Err(closed_error(&descriptor.name));
        }
        if unit.defining_namespace() != ns.id() {
            return Err(Error::new(ErrorKind::IdentityMismatch)
                .with_message(format!(
                    "unit defined by {} cannot bind to {}",
                    unit.defining_namespace(),
                    ns.id()
                ))
                .with_unit(&descriptor.name));
        }

        {
            let mut slot = ns.core().lock_unit();
            match *slot {
                UnitSlot::Unbound => *slot = UnitSlot::Bound(Arc::clone(&unit)),
                UnitSlot::Bound(_) => {
                    return Err(Error::new(ErrorKind::AlreadyBound)
                        .with_message("unit already initialized")
                        .with_unit(&descriptor.name));
                }
                UnitSlot::Retired => return Err(closed_error(&descriptor.name)),
            }
        }

        // The slot is claimed before init runs, so a concurrent bind sees AlreadyBound.
        unit.init(&self.host, descriptor);
        tracing::info!("initialized unit {} v{}", descriptor.name, descriptor.version);
        Ok(())
    }
}

fn closed_error(unit: &str) -> Error {
    Error::new(ErrorKind::Closed)
        .with_message("namespace is closed")
        .with_unit(unit)
}

#[cfg(test)]
mod tests {
    use super::{Host, Unit, UnitBinder};
    use crate::core::archive::ArchiveWriter;
    use crate::core::descriptor::Descriptor;
    use crate::core::error::ErrorKind;
    use crate::core::namespace::{Namespace, NamespaceConfig};
    use crate::core::oracle::DependencyGraph;
    use crate::core::registry::NamespaceRegistry;
    use crate::core::symbol::NamespaceId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct CountingUnit {
        ns: NamespaceId,
        inits: AtomicUsize,
        seen: Mutex<Option<(String, String)>>,
    }

    impl CountingUnit {
        fn new(ns: NamespaceId) -> Arc<Self> {
            Arc::new(Self {
                ns,
                inits: AtomicUsize::new(0),
                seen: Mutex::new(None),
            })
        }
    }

    impl Unit for CountingUnit {
        fn defining_namespace(&self) -> NamespaceId {
            self.ns
        }

        fn init(&self, host: &Host, descriptor: &Descriptor) {
            self.inits.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().expect("lock") =
                Some((host.name().to_string(), descriptor.name.clone()));
        }
    }

    fn open(dir: &std::path::Path, name: &str, registry: &Arc<NamespaceRegistry>) -> Namespace {
        let path = dir.join(format!("{name}.plug"));
        let mut writer = ArchiveWriter::create(&path).expect("create");
        writer.append("main/Entry.code", b"entry").expect("append");
        writer.finish().expect("finish");
        let descriptor = Descriptor::new(name, "1.0");
        let graph = Arc::new(DependencyGraph::from_descriptors([descriptor.clone()]));
        Namespace::open(&path, NamespaceConfig::new(descriptor, Arc::clone(registry), graph))
            .expect("open")
    }

    fn binder() -> UnitBinder {
        UnitBinder::new(Arc::new(Host::new("testhost", "0.1")))
    }

    #[test]
    fn bind_runs_init_once_with_host_and_descriptor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(NamespaceRegistry::new());
        let ns = open(dir.path(), "alpha", &registry);
        let unit = CountingUnit::new(ns.id());

        binder().bind(&ns, unit.clone()).expect("bind");
        assert!(ns.is_bound());
        assert_eq!(unit.inits.load(Ordering::SeqCst), 1);
        let seen = unit.seen.lock().expect("lock").clone();
        assert_eq!(seen, Some(("testhost".to_string(), "alpha".to_string())));

        let err = binder().bind(&ns, unit.clone()).expect_err("second bind");
        assert_eq!(err.kind(), ErrorKind::AlreadyBound);
        assert_eq!(unit.inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn foreign_unit_is_identity_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(NamespaceRegistry::new());
        let alpha = open(dir.path(), "alpha", &registry);
        let beta = open(dir.path(), "beta", &registry);
        let unit = CountingUnit::new(beta.id());

        let err = binder().bind(&alpha, unit.clone()).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
        assert!(!alpha.is_bound());
        assert_eq!(unit.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_namespace_cannot_bind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(NamespaceRegistry::new());
        let ns = open(dir.path(), "alpha", &registry);
        ns.close().expect("close");

        let unit = CountingUnit::new(ns.id());
        let err = binder().bind(&ns, unit.clone()).expect_err("closed");
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert_eq!(unit.inits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn close_retires_bound_unit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(NamespaceRegistry::new());
        let ns = open(dir.path(), "alpha", &registry);
        let unit = CountingUnit::new(ns.id());
        binder().bind(&ns, unit.clone()).expect("bind");

        ns.close().expect("close");
        assert!(ns.unit().is_none());
        assert_eq!(Arc::strong_count(&unit), 1);
    }

    #[test]
    fn racing_binds_initialize_exactly_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Arc::new(NamespaceRegistry::new());
        let ns = open(dir.path(), "alpha", &registry);
        let unit = CountingUnit::new(ns.id());
        let binder = binder();

        let outcomes: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let unit: Arc<dyn Unit> = unit.clone();
                    let ns = &ns;
                    let binder = &binder;
                    scope.spawn(move || binder.bind(ns, unit).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("join"))
                .collect()
        });

        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(unit.inits.load(Ordering::SeqCst), 1);
    }
}
