//! Purpose: Answer transitive-dependency queries over declared dependency edges.
//! Exports: `DependencyOracle`, `DependencyGraph`, `LoadOrder`.
//! Role: Gate for cross-namespace lookups; also orders plugin loading for the host.
//! Invariants: Cycles and self-loops are ordinary structure; every query terminates.
//! Invariants: Hard and soft dependencies both contribute edges.
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

use crate::core::descriptor::Descriptor;

pub trait DependencyOracle: Send + Sync {
    /// True when `a` reaches `b` by following one or more declared edges.
    fn transitively_depends(&self, a: &Descriptor, b: &Descriptor) -> bool;
}

/// Descriptor graph keyed by name.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    descriptors: RwLock<BTreeMap<String, Descriptor>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadOrder {
    /// Every known descriptor name, prerequisites first.
    pub order: Vec<String>,
    /// Names that sit on a dependency cycle.
    pub cyclic: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = Descriptor>,
    {
        let graph = Self::new();
        for descriptor in descriptors {
            graph.insert(descriptor);
        }
        graph
    }

    /// Replaces any descriptor with the same name.
    pub fn insert(&self, descriptor: Descriptor) {
        self.write().insert(descriptor.name.clone(), descriptor);
    }

    pub fn remove(&self, name: &str) -> Option<Descriptor> {
        self.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Descriptor> {
        self.read().get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<Descriptor> {
        self.read().values().cloned().collect()
    }

    /// Hard dependencies of `name` that no known descriptor provides.
    pub fn missing_dependencies(&self, name: &str) -> Vec<String> {
        let graph = self.read();
        graph
            .get(name)
            .map(|descriptor| {
                descriptor
                    .depends
                    .iter()
                    .filter(|dep| !graph.contains_key(dep.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn load_order(&self) -> LoadOrder {
        let graph = self.read();
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = graph
            .values()
            .map(|descriptor| {
                let deps = descriptor
                    .dependency_names()
                    .filter(|dep| graph.contains_key(*dep))
                    .collect();
                (descriptor.name.as_str(), deps)
            })
            .collect();
        let cyclic: Vec<String> = graph
            .values()
            .filter(|descriptor| reaches(&graph, descriptor, &descriptor.name))
            .map(|descriptor| descriptor.name.clone())
            .collect();

        let mut order = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            let next = if ready.is_empty() {
                // Stalled on a cycle: release its first member by name.
                let forced = pending
                    .keys()
                    .copied()
                    .find(|name| cyclic.iter().any(|c| c == name))
                    .or_else(|| pending.keys().next().copied());
                forced.into_iter().collect()
            } else {
                ready
            };
            for name in next {
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
                order.push(name.to_string());
            }
        }

        LoadOrder { order, cyclic }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Descriptor>> {
        self.descriptors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Descriptor>> {
        self.descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl DependencyOracle for DependencyGraph {
    fn transitively_depends(&self, a: &Descriptor, b: &Descriptor) -> bool {
        reaches(&self.read(), a, &b.name)
    }
}

// Breadth-first walk from `from`'s declared edges. `from` itself is only reached
// again through a cycle.
fn reaches(graph: &BTreeMap<String, Descriptor>, from: &Descriptor, target: &str) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = from.dependency_names().collect();
    while let Some(name) = queue.pop_front() {
        if name == target {
            return true;
        }
        if !seen.insert(name) {
            continue;
        }
        if let Some(next) = graph.get(name) {
            queue.extend(next.dependency_names());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::{DependencyGraph, DependencyOracle};
    use crate::core::descriptor::Descriptor;

    fn desc(name: &str, depends: &[&str]) -> Descriptor {
        Descriptor::new(name, "1").with_depends(depends.iter().copied())
    }

    #[test]
    fn direct_and_transitive_edges_are_reachable() {
        let graph = DependencyGraph::from_descriptors([
            desc("a", &["b"]),
            desc("b", &["c"]),
            desc("c", &[]),
        ]);
        let (a, b, c) = (desc("a", &["b"]), desc("b", &["c"]), desc("c", &[]));
        assert!(graph.transitively_depends(&a, &b));
        assert!(graph.transitively_depends(&a, &c));
        assert!(!graph.transitively_depends(&c, &a));
        assert!(!graph.transitively_depends(&c, &c));
    }

    #[test]
    fn soft_dependencies_count_as_edges() {
        let a = Descriptor::new("a", "1").with_soft_depends(["b"]);
        let b = desc("b", &[]);
        let graph = DependencyGraph::from_descriptors([a.clone(), b.clone()]);
        assert!(graph.transitively_depends(&a, &b));
    }

    #[test]
    fn cycles_terminate_and_are_reachable() {
        let a = desc("a", &["b"]);
        let b = desc("b", &["c"]);
        let c = desc("c", &["a"]);
        let graph = DependencyGraph::from_descriptors([a.clone(), b.clone(), c.clone()]);
        assert!(graph.transitively_depends(&a, &c));
        assert!(graph.transitively_depends(&c, &b));
        assert!(graph.transitively_depends(&a, &a));
        let outsider = desc("z", &[]);
        assert!(!graph.transitively_depends(&a, &outsider));
    }

    #[test]
    fn self_loop_is_reachable() {
        let a = desc("a", &["a"]);
        let graph = DependencyGraph::from_descriptors([a.clone()]);
        assert!(graph.transitively_depends(&a, &a));
    }

    #[test]
    fn load_order_puts_prerequisites_first() {
        let graph = DependencyGraph::from_descriptors([
            desc("app", &["core", "net"]),
            desc("net", &["core"]),
            desc("core", &[]),
        ]);
        let order = graph.load_order();
        assert_eq!(order.order, vec!["core", "net", "app"]);
        assert!(order.cyclic.is_empty());
    }

    #[test]
    fn load_order_breaks_cycles_and_keeps_dependents_after() {
        let graph = DependencyGraph::from_descriptors([
            desc("a", &["b"]),
            desc("b", &["a"]),
            desc("c", &["a"]),
        ]);
        let order = graph.load_order();
        assert_eq!(order.cyclic, vec!["a", "b"]);
        assert_eq!(order.order.len(), 3);
        let pos = |name: &str| order.order.iter().position(|n| n == name).expect("pos");
        assert!(pos("c") > pos("a"));
        assert!(pos("c") > pos("b"));
    }

    #[test]
    fn missing_hard_dependencies_are_reported() {
        let graph = DependencyGraph::from_descriptors([
            Descriptor::new("a", "1")
                .with_depends(["ghost"])
                .with_soft_depends(["phantom"]),
        ]);
        assert_eq!(graph.missing_dependencies("a"), vec!["ghost"]);
    }
}
