//! Purpose: One structured error type for archive, resolution, and binding failures.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Shared error contract between the library, the loader, and the CLI.
//! Invariants: Kinds are additive-only; exit code mapping is stable once published.
//! Invariants: Context (symbol, unit, entry, path) is attached at the failure site.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    EntryNotFound,
    ReadFailure,
    AlreadyExists,
    IdentityMismatch,
    AlreadyBound,
    Closed,
    Busy,
    Permission,
    Corrupt,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    symbol: Option<String>,
    unit: Option<String>,
    entry: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            symbol: None,
            unit: None,
            entry: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Symbol name the failing request was about.
    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Descriptor name of the unit whose namespace reported the failure.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(symbol) = &self.symbol {
            write!(f, " (symbol: {symbol})")?;
        }
        if let Some(unit) = &self.unit {
            write!(f, " (unit: {unit})")?;
        }
        if let Some(entry) = &self.entry {
            write!(f, " (entry: {entry})")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::Busy => 5,
        ErrorKind::Permission => 6,
        ErrorKind::Corrupt => 7,
        ErrorKind::ReadFailure => 8,
        ErrorKind::EntryNotFound => 9,
        ErrorKind::IdentityMismatch => 10,
        ErrorKind::AlreadyBound => 11,
        ErrorKind::Closed => 12,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use std::error::Error as StdError;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::AlreadyExists, 4),
            (ErrorKind::Busy, 5),
            (ErrorKind::Permission, 6),
            (ErrorKind::Corrupt, 7),
            (ErrorKind::ReadFailure, 8),
            (ErrorKind::EntryNotFound, 9),
            (ErrorKind::IdentityMismatch, 10),
            (ErrorKind::AlreadyBound, 11),
            (ErrorKind::Closed, 12),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_resolution_context() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("symbol not found")
            .with_symbol("acme.Widget")
            .with_unit("beta");
        let text = err.to_string();
        assert!(text.starts_with("NotFound: symbol not found"));
        assert!(text.contains("(symbol: acme.Widget)"));
        assert!(text.contains("(unit: beta)"));
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::new(ErrorKind::ReadFailure).with_source(io);
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "disk on fire");
    }
}
