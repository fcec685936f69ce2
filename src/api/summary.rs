//! Purpose: Serializable summaries of archives and resolved symbols for tooling output.
//! Exports: `ArchiveSummary`, `SymbolSummary`, `sha256_hex`.
//! Role: Shared contract for `inspect`/`resolve` CLI output and API users.
//! Invariants: Summaries never embed symbol bytes, only sizes and digests.
//! Invariants: Fields are additive-only once published.
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::api::loader::read_descriptor;
use crate::core::archive::ArchiveReader;
use crate::core::descriptor::Descriptor;
use crate::core::error::{Error, ErrorKind};
use crate::core::manifest::PackageInfo;
use crate::core::symbol::{CodeSymbol, SymbolOrigin, entry_symbol_name};

#[derive(Clone, Debug, Serialize)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub descriptor: Descriptor,
    pub entries: usize,
    pub symbols: Vec<String>,
    pub signers: Vec<String>,
    pub has_manifest: bool,
    pub sha256: String,
}

impl ArchiveSummary {
    pub fn read(path: &Path) -> Result<Self, Error> {
        let descriptor = read_descriptor(path)?;
        let reader = ArchiveReader::open(path)?;
        let symbols = reader
            .entry_names()
            .iter()
            .filter_map(|entry| entry_symbol_name(entry))
            .collect();
        let summary = Self {
            path: path.to_path_buf(),
            descriptor,
            entries: reader.entry_names().len(),
            symbols,
            signers: reader.signers().to_vec(),
            has_manifest: reader.manifest().is_some(),
            sha256: String::new(),
        };
        reader.close()?;

        let bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::ReadFailure)
                .with_message("failed to hash archive")
                .with_path(path)
                .with_source(err)
        })?;
        Ok(Self {
            sha256: sha256_hex(&bytes),
            ..summary
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub requested_by: String,
    pub origin: &'static str,
    pub defined_by: Option<String>,
    pub size: usize,
    pub sha256: String,
    pub location: PathBuf,
    pub signers: Vec<String>,
    pub package: Option<PackageInfo>,
}

impl SymbolSummary {
    pub fn new(symbol: &CodeSymbol, requested_by: &str, defined_by: Option<String>) -> Self {
        let origin = match symbol.origin() {
            SymbolOrigin::Namespace(_) => "namespace",
            SymbolOrigin::Shared => "shared",
        };
        Self {
            symbol: symbol.name().to_string(),
            requested_by: requested_by.to_string(),
            origin,
            defined_by,
            size: symbol.bytes().len(),
            sha256: sha256_hex(symbol.bytes()),
            location: symbol.source().location.clone(),
            signers: symbol.source().signers.clone(),
            package: symbol.package().cloned(),
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
