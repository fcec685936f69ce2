// Plugin archive reading (indexed tar), manifest/signer extraction, and packing.
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::descriptor::{DESCRIPTOR_ENTRY, Descriptor};
use crate::core::error::{Error, ErrorKind};
use crate::core::manifest::{MANIFEST_ENTRY, Manifest};

pub const ARCHIVE_EXTENSION: &str = "plug";

const SIGNATURE_DIR: &str = "META-INF/";
const SIGNATURE_SUFFIX: &str = ".SF";

/// Raw entry storage behind an `ArchiveReader`.
pub trait ArchiveBackend: Send {
    fn entry_names(&self) -> Vec<String>;
    fn read_entry(&mut self, entry: &str) -> io::Result<Option<Vec<u8>>>;
    fn close(self: Box<Self>) -> io::Result<()>;
}

#[derive(Clone, Copy, Debug)]
struct EntrySpan {
    offset: u64,
    size: u64,
}

/// Tar file indexed once at open; entries are read on demand.
pub struct TarBackend {
    file: File,
    names: Vec<String>,
    index: HashMap<String, EntrySpan>,
}

impl TarBackend {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|err| {
            Error::new(io_error_kind(&err))
                .with_message("failed to open archive")
                .with_path(path)
                .with_source(err)
        })?;
        FileExt::try_lock_shared(&file).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("archive is locked for writing")
                .with_path(path)
                .with_source(err)
        })?;

        let (names, index) = match index_entries(&file) {
            Ok(indexed) => indexed,
            Err(err) => {
                let _ = FileExt::unlock(&file);
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message("failed to index archive entries")
                    .with_path(path)
                    .with_source(err));
            }
        };
        Ok(Self { file, names, index })
    }
}

fn index_entries(file: &File) -> io::Result<(Vec<String>, HashMap<String, EntrySpan>)> {
    let mut names = Vec::new();
    let mut index = HashMap::new();
    let mut archive = tar::Archive::new(file);
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let path = normalize_entry_name(&path);
        let span = EntrySpan {
            offset: entry.raw_file_position(),
            size: entry.size(),
        };
        if index.insert(path.clone(), span).is_none() {
            names.push(path);
        }
    }
    Ok((names, index))
}

fn normalize_entry_name(name: &str) -> String {
    name.trim_start_matches("./").replace('\\', "/")
}

impl ArchiveBackend for TarBackend {
    fn entry_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn read_entry(&mut self, entry: &str) -> io::Result<Option<Vec<u8>>> {
        let Some(span) = self.index.get(entry).copied() else {
            return Ok(None);
        };
        let len = usize::try_from(span.size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "entry too large"))?;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(span.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        FileExt::unlock(&self.file)
    }
}

/// Owns one archive's backend; released exactly once by `close`.
pub struct ArchiveReader {
    path: PathBuf,
    entries: Vec<String>,
    entry_set: HashSet<String>,
    manifest: Option<Manifest>,
    signers: Vec<String>,
    backend: Mutex<Option<Box<dyn ArchiveBackend>>>,
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let backend = TarBackend::open(&path)?;
        Self::with_backend(path, Box::new(backend))
    }

    /// Wraps an already-open backend, reading the manifest eagerly.
    pub fn with_backend(
        path: impl Into<PathBuf>,
        mut backend: Box<dyn ArchiveBackend>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let entries = backend.entry_names();
        let manifest = match backend.read_entry(MANIFEST_ENTRY) {
            Ok(Some(bytes)) => match Manifest::parse(&bytes) {
                Ok(manifest) => Some(manifest),
                Err(err) => {
                    let _ = backend.close();
                    return Err(err.with_path(&path));
                }
            },
            Ok(None) => None,
            Err(err) => {
                let _ = backend.close();
                return Err(read_failure(MANIFEST_ENTRY, &path, err));
            }
        };
        let signers = signer_names(&entries);
        let entry_set = entries.iter().cloned().collect();
        Ok(Self {
            path,
            entries,
            entry_set,
            manifest,
            signers,
            backend: Mutex::new(Some(backend)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_names(&self) -> &[String] {
        &self.entries
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entry_set.contains(entry)
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn signers(&self) -> &[String] {
        &self.signers
    }

    pub fn is_closed(&self) -> bool {
        self.backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Reads an entry; `EntryNotFound` if absent, `ReadFailure` on I/O errors.
    pub fn read_entry(&self, entry: &str) -> Result<Vec<u8>, Error> {
        self.try_read_entry(entry)?.ok_or_else(|| {
            Error::new(ErrorKind::EntryNotFound)
                .with_message("archive entry not found")
                .with_entry(entry)
                .with_path(&self.path)
        })
    }

    pub fn try_read_entry(&self, entry: &str) -> Result<Option<Vec<u8>>, Error> {
        let mut guard = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(backend) = guard.as_mut() else {
            return Err(Error::new(ErrorKind::Closed)
                .with_message("archive is closed")
                .with_entry(entry)
                .with_path(&self.path));
        };
        backend
            .read_entry(entry)
            .map_err(|err| read_failure(entry, &self.path, err))
    }

    /// Descriptor embedded in the archive, if any.
    pub fn descriptor(&self) -> Result<Option<Descriptor>, Error> {
        match self.try_read_entry(DESCRIPTOR_ENTRY)? {
            Some(bytes) => Descriptor::from_json(&bytes)
                .map(Some)
                .map_err(|err| err.with_path(&self.path)),
            None => Ok(None),
        }
    }

    /// Releases the backend. Later calls are no-ops returning `Ok`.
    pub fn close(&self) -> Result<(), Error> {
        let backend = self
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match backend {
            Some(backend) => backend.close().map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to release archive")
                    .with_path(&self.path)
                    .with_source(err)
            }),
            None => Ok(()),
        }
    }
}

fn signer_names(entries: &[String]) -> Vec<String> {
    let mut signers: Vec<String> = entries
        .iter()
        .filter_map(|entry| entry.strip_prefix(SIGNATURE_DIR))
        .filter(|rest| !rest.contains('/'))
        .filter_map(|rest| rest.strip_suffix(SIGNATURE_SUFFIX))
        .map(str::to_string)
        .collect();
    signers.sort();
    signers
}

fn read_failure(entry: &str, path: &Path, err: io::Error) -> Error {
    Error::new(ErrorKind::ReadFailure)
        .with_message("failed to read archive entry")
        .with_entry(entry)
        .with_path(path)
        .with_source(err)
}

/// Writes a plugin archive while holding an exclusive lock on the output file.
pub struct ArchiveWriter {
    path: PathBuf,
    builder: tar::Builder<File>,
    count: usize,
}

impl ArchiveWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to create archive")
                    .with_path(&path)
                    .with_source(err)
            })?;
        FileExt::try_lock_exclusive(&file).map_err(|err| {
            Error::new(lock_error_kind(&err))
                .with_message("archive is in use")
                .with_path(&path)
                .with_source(err)
        })?;
        file.set_len(0).map_err(|err| {
            Error::new(ErrorKind::ReadFailure)
                .with_message("failed to truncate archive")
                .with_path(&path)
                .with_source(err)
        })?;
        let mut builder = tar::Builder::new(file);
        builder.mode(tar::HeaderMode::Deterministic);
        Ok(Self {
            path,
            builder,
            count: 0,
        })
    }

    pub fn append(&mut self, entry: &str, bytes: &[u8]) -> Result<(), Error> {
        let entry = normalize_entry_name(entry);
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        self.builder
            .append_data(&mut header, &entry, bytes)
            .map_err(|err| self.write_error(&entry, err))?;
        self.count += 1;
        Ok(())
    }

    /// Adds every regular file under `root`, in sorted path order.
    pub fn append_dir(&mut self, root: &Path) -> Result<(), Error> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        files.sort();
        for (entry, path) in files {
            let bytes = std::fs::read(&path).map_err(|err| {
                Error::new(io_error_kind(&err))
                    .with_message("failed to read source file")
                    .with_path(&path)
                    .with_source(err)
            })?;
            self.append(&entry, &bytes)?;
        }
        Ok(())
    }

    /// Finishes the archive and returns the number of entries written.
    pub fn finish(self) -> Result<usize, Error> {
        let Self {
            path,
            builder,
            count,
        } = self;
        let mut file = builder.into_inner().map_err(|err| {
            Error::new(ErrorKind::ReadFailure)
                .with_message("failed to finish archive")
                .with_path(&path)
                .with_source(err)
        })?;
        file.flush().map_err(|err| {
            Error::new(ErrorKind::ReadFailure)
                .with_message("failed to flush archive")
                .with_path(&path)
                .with_source(err)
        })?;
        let _ = FileExt::unlock(&file);
        Ok(count)
    }

    fn write_error(&self, entry: &str, err: io::Error) -> Error {
        Error::new(ErrorKind::ReadFailure)
            .with_message("failed to write archive entry")
            .with_entry(entry)
            .with_path(&self.path)
            .with_source(err)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<(), Error> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        Error::new(io_error_kind(&err))
            .with_message("failed to read source directory")
            .with_path(dir)
            .with_source(err)
    })?;
    for entry in entries {
        let entry = entry.map_err(|err| {
            Error::new(ErrorKind::ReadFailure)
                .with_message("failed to read source directory entry")
                .with_path(dir)
                .with_source(err)
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if path.is_file() {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((name, path));
        }
    }
    Ok(())
}

pub(crate) fn io_error_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::ReadFailure,
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::ReadFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::{ArchiveBackend, ArchiveReader, ArchiveWriter, signer_names};
    use crate::core::error::ErrorKind;
    use std::collections::HashMap;
    use std::io;

    struct MemoryBackend {
        entries: HashMap<String, Vec<u8>>,
        fail_reads: bool,
    }

    impl ArchiveBackend for MemoryBackend {
        fn entry_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.entries.keys().cloned().collect();
            names.sort();
            names
        }

        fn read_entry(&mut self, entry: &str) -> io::Result<Option<Vec<u8>>> {
            if self.fail_reads && entry != crate::core::manifest::MANIFEST_ENTRY {
                return Err(io::Error::other("bad sector"));
            }
            Ok(self.entries.get(entry).cloned())
        }

        fn close(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }

    fn write_sample(path: &std::path::Path) {
        let mut writer = ArchiveWriter::create(path).expect("create");
        writer
            .append("plugin.json", br#"{"name":"alpha","version":"1"}"#)
            .expect("descriptor");
        writer.append("acme/X.code", b"x-bytes").expect("symbol");
        writer
            .append("META-INF/MANIFEST.MF", b"Implementation-Vendor: Acme\n")
            .expect("manifest");
        writer.append("META-INF/ACME.SF", b"sig").expect("signer");
        assert_eq!(writer.finish().expect("finish"), 4);
    }

    #[test]
    fn written_archive_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alpha.plug");
        write_sample(&path);

        let reader = ArchiveReader::open(&path).expect("open");
        assert!(reader.contains("acme/X.code"));
        assert_eq!(reader.read_entry("acme/X.code").expect("read"), b"x-bytes");
        assert_eq!(reader.signers(), ["ACME".to_string()]);
        let manifest = reader.manifest().expect("manifest");
        assert_eq!(manifest.main_attribute("Implementation-Vendor"), Some("Acme"));
        let descriptor = reader.descriptor().expect("descriptor").expect("present");
        assert_eq!(descriptor.name, "alpha");
    }

    #[test]
    fn contains_matches_exact_entry_names_in_large_archives() {
        let entries: HashMap<String, Vec<u8>> = (0..5000)
            .map(|idx| (format!("gen/S{idx}.code"), Vec::new()))
            .collect();
        let backend = MemoryBackend {
            entries,
            fail_reads: false,
        };
        let reader = ArchiveReader::with_backend("mem.plug", Box::new(backend)).expect("open");
        assert!(reader.contains("gen/S0.code"));
        assert!(reader.contains("gen/S4999.code"));
        assert!(!reader.contains("gen/S5000.code"));
        assert!(!reader.contains("gen/S1"));
    }

    #[test]
    fn missing_entry_is_entry_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alpha.plug");
        write_sample(&path);

        let reader = ArchiveReader::open(&path).expect("open");
        let err = reader.read_entry("acme/Y.code").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::EntryNotFound);
        assert_eq!(err.entry(), Some("acme/Y.code"));
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("alpha.plug");
        write_sample(&path);

        let reader = ArchiveReader::open(&path).expect("open");
        reader.close().expect("close");
        reader.close().expect("second close");
        assert!(reader.is_closed());
        let err = reader.read_entry("acme/X.code").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Closed);
    }

    #[test]
    fn io_failures_surface_as_read_failure() {
        let mut entries = HashMap::new();
        entries.insert("acme/X.code".to_string(), b"x".to_vec());
        let backend = MemoryBackend {
            entries,
            fail_reads: true,
        };
        let reader = ArchiveReader::with_backend("mem.plug", Box::new(backend)).expect("open");
        let err = reader.read_entry("acme/X.code").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::ReadFailure);
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("junk.plug");
        std::fs::write(&path, vec![0x5au8; 1024]).expect("write");
        let result = ArchiveReader::open(&path);
        match result {
            Ok(_) => panic!("expected corrupt archive error"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::Corrupt),
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = ArchiveReader::open(dir.path().join("absent.plug"));
        match result {
            Ok(_) => panic!("expected not found"),
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
        }
    }

    #[test]
    fn signers_ignore_nested_and_foreign_entries() {
        let entries = vec![
            "META-INF/B.SF".to_string(),
            "META-INF/A.SF".to_string(),
            "META-INF/sub/C.SF".to_string(),
            "D.SF".to_string(),
        ];
        assert_eq!(signer_names(&entries), vec!["A", "B"]);
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(super::lock_error_kind(&err), ErrorKind::ReadFailure);
    }
}
