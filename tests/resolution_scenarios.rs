// End-to-end resolution scenarios over real archives on disk.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use plugspace::api::{
    ArchiveWriter, DependencyGraph, DependencyOracle, Descriptor, ErrorKind, Host, Loader,
    Namespace, NamespaceConfig, NamespaceRegistry, SharedScope, SymbolOrigin, Unit,
};

fn write_plugin(dir: &Path, name: &str, depends: &[&str], symbols: &[&str]) -> PathBuf {
    let path = dir.join(format!("{name}.plug"));
    let descriptor = Descriptor::new(name, "1").with_depends(depends.iter().copied());
    let mut writer = ArchiveWriter::create(&path).expect("create");
    writer
        .append(
            "plugin.json",
            &serde_json::to_vec(&descriptor).expect("descriptor json"),
        )
        .expect("descriptor");
    for symbol in symbols {
        let entry = format!("{}.code", symbol.replace('.', "/"));
        writer
            .append(&entry, format!("{name}:{symbol}").as_bytes())
            .expect("symbol");
    }
    writer.finish().expect("finish");
    path
}

fn loader(dir: &Path) -> Loader {
    Loader::new(Host::new("scenarios", "0").with_plugin_dir(dir))
}

#[test]
fn dependency_direction_is_one_way() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plugin(temp.path(), "alpha", &[], &["pkg.X"]);
    write_plugin(temp.path(), "beta", &["alpha"], &["pkg.Y"]);

    let loader = loader(temp.path());
    let report = loader.load_all().expect("load");
    assert_eq!(report.loaded, vec!["alpha", "beta"]);

    let x = loader.resolve("beta", "pkg.X").expect("X from beta");
    assert_eq!(x.bytes(), b"alpha:pkg.X");
    let alpha = loader.namespace("alpha").expect("alpha");
    assert_eq!(x.origin(), SymbolOrigin::Namespace(alpha.id()));

    let err = loader.resolve("alpha", "pkg.Y").expect_err("Y from alpha");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.symbol(), Some("pkg.Y"));
    assert_eq!(err.unit(), Some("alpha"));
}

#[test]
fn dependency_cycle_terminates() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plugin(temp.path(), "a", &["b"], &["one.A"]);
    write_plugin(temp.path(), "b", &["c"], &["one.B"]);
    write_plugin(temp.path(), "c", &["a"], &["one.C"]);

    let loader = loader(temp.path());
    let report = loader.load_all().expect("load");
    assert_eq!(report.loaded.len(), 3);
    assert_eq!(report.cyclic, vec!["a", "b", "c"]);

    let c = loader.resolve("a", "one.C").expect("C from a");
    assert_eq!(c.bytes(), b"c:one.C");
    let a = loader.resolve("c", "one.A").expect("A from c");
    assert_eq!(a.bytes(), b"a:one.A");

    let err = loader.resolve("a", "one.Nowhere").expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn closed_namespace_leaves_delegation() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plugin(temp.path(), "gamma", &[], &["g.Z"]);
    write_plugin(temp.path(), "delta", &["gamma"], &[]);

    let loader = loader(temp.path());
    loader.load_all().expect("load");
    assert!(loader.resolve("delta", "g.Z").is_ok());

    let gamma = loader.namespace("gamma").expect("gamma");
    gamma.close().expect("close");
    gamma.close().expect("second close");

    let err = gamma.resolve("g.Z").expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert!(!loader.registry().contains(gamma.id()));

    let err = loader.resolve("delta", "g.Z").expect_err("gone");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn local_symbol_wins_over_shared_and_peers() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plugin(temp.path(), "base", &[], &["dup.S", "only.Base"]);
    write_plugin(temp.path(), "app", &["base"], &["dup.S"]);
    let shared = SharedScope::builder()
        .symbol("dup.S", b"shared".to_vec())
        .symbol("lib.Common", b"shared".to_vec())
        .build();

    let loader = loader(temp.path()).with_shared(shared);
    loader.load_all().expect("load");

    assert_eq!(loader.resolve("app", "dup.S").expect("local").bytes(), b"app:dup.S");
    assert_eq!(loader.resolve("base", "dup.S").expect("local").bytes(), b"base:dup.S");
    let common = loader.resolve("base", "lib.Common").expect("shared");
    assert_eq!(common.origin(), SymbolOrigin::Shared);
    assert_eq!(loader.resolve("app", "only.Base").expect("peer").bytes(), b"base:only.Base");
}

#[test]
fn shared_scope_beats_dependency() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plugin(temp.path(), "base", &[], &["lib.Common"]);
    write_plugin(temp.path(), "app", &["base"], &[]);
    let shared = SharedScope::builder()
        .symbol("lib.Common", b"shared".to_vec())
        .build();

    let loader = loader(temp.path()).with_shared(shared);
    loader.load_all().expect("load");
    let found = loader.resolve("app", "lib.Common").expect("resolve");
    assert_eq!(found.origin(), SymbolOrigin::Shared);
    assert_eq!(found.bytes(), b"shared");
}

struct Recorder {
    ns: plugspace::api::NamespaceId,
    inits: AtomicUsize,
}

impl Unit for Recorder {
    fn defining_namespace(&self) -> plugspace::api::NamespaceId {
        self.ns
    }

    fn init(&self, _host: &Host, _descriptor: &Descriptor) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn loader_bind_is_exactly_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_plugin(temp.path(), "alpha", &[], &["pkg.X"]);
    let loader = loader(temp.path());
    loader.load_all().expect("load");
    let ns = loader.namespace("alpha").expect("alpha");

    let unit = Arc::new(Recorder {
        ns: ns.id(),
        inits: AtomicUsize::new(0),
    });
    loader.bind("alpha", unit.clone()).expect("bind");
    let err = loader.bind("alpha", unit.clone()).expect_err("rebind");
    assert_eq!(err.kind(), ErrorKind::AlreadyBound);
    assert_eq!(unit.inits.load(Ordering::SeqCst), 1);

    loader.unload("alpha").expect("unload");
    let err = ns.resolve("pkg.X").expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert!(!ns.is_bound());
}

#[test]
fn registry_churn_races_resolution() {
    let temp = tempfile::tempdir().expect("tempdir");
    let stable = write_plugin(temp.path(), "stable", &[], &["s.Fixed"]);
    let churn = write_plugin(temp.path(), "churn", &[], &["c.Moving"]);
    let app = write_plugin(temp.path(), "app", &["stable", "churn"], &[]);

    let graph = Arc::new(DependencyGraph::from_descriptors([
        Descriptor::new("stable", "1"),
        Descriptor::new("churn", "1"),
        Descriptor::new("app", "1").with_depends(["stable", "churn"]),
    ]));
    let registry = Arc::new(NamespaceRegistry::new());
    let open = |path: &Path, name: &str| {
        let oracle: Arc<dyn DependencyOracle> = graph.clone();
        let descriptor = graph.get(name).expect("known descriptor");
        Namespace::open(path, NamespaceConfig::new(descriptor, registry.clone(), oracle))
    };

    let _stable = open(&stable, "stable").expect("stable");
    let app = open(&app, "app").expect("app");
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..50 {
                let ns = open(&churn, "churn").expect("churn");
                std::thread::yield_now();
                ns.close().expect("close churn");
            }
            done.store(true, Ordering::SeqCst);
        });

        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let fixed = app.resolve("s.Fixed").expect("stable symbol");
                    assert_eq!(fixed.bytes(), b"stable:s.Fixed");
                    match app.resolve("c.Moving") {
                        Ok(symbol) => assert_eq!(symbol.bytes(), b"churn:c.Moving"),
                        Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
                    }
                }
            });
        }
    });

    assert_eq!(registry.len(), 2);
    let err = app.resolve("c.Moving").expect_err("churn closed");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
