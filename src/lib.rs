//! Purpose: Plugin namespace library backing the `plugspace` CLI and embedding hosts.
//! Exports: `api` (stable surface), `core` (archives, namespaces, resolution, binding),
//! `notice`, `plugin_paths`.
//! Role: Loads plugin archives into isolated namespaces with bounded cross-namespace lookup.
//! Invariants: Hosts should depend on `api`; `core` layout may change between releases.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod notice;
pub mod plugin_paths;
