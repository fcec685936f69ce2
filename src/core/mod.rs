// Core modules implementing archives, namespaces, resolution, binding, and errors.
pub mod archive;
pub mod binder;
pub mod descriptor;
pub mod error;
pub mod manifest;
pub mod namespace;
pub mod oracle;
pub mod registry;
pub mod shared;
pub mod symbol;
