//! Gantry artifact packaging.
//!
//! A function's declared files are flattened by basename into a gzip-compressed tar.
//! Output is byte-for-byte reproducible: entries are sorted, and every timestamp, owner
//! and mode is fixed, so unchanged sources always yield the same digest.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use flate2::{Compression, GzBuilder};
use gantry_core::FunctionSpec;
use sha2::{Digest, Sha256};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("function '{0}' declares no files")]
    NoFiles(String),
    #[error("handler '{handler}' does not match any declared file")]
    MissingEntry { handler: String },
    #[error("two declared files share the basename '{0}'")]
    DuplicateFile(String),
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing archive: {0}")]
    Archive(#[source] std::io::Error),
}

/// A packaged, deployable archive.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    /// Base64 SHA-256 of `bytes`.
    pub sha256: String,
    /// Archive entry names in archive order.
    pub entries: Vec<String>,
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("len", &self.bytes.len())
            .field("sha256", &self.sha256)
            .field("entries", &self.entries)
            .finish()
    }
}

pub trait ArtifactPackager: Send + Sync {
    fn package(&self, spec: &FunctionSpec) -> Result<Artifact, PackageError>;
}

/// Deterministic `.tar.gz` packager.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzPackager;

const ENTRY_MODE: u32 = 0o644;

fn basename(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

impl ArtifactPackager for TarGzPackager {
    fn package(&self, spec: &FunctionSpec) -> Result<Artifact, PackageError> {
        if spec.files.is_empty() {
            return Err(PackageError::NoFiles(spec.name.clone()));
        }
        if spec.entry_file().is_none() {
            return Err(PackageError::MissingEntry { handler: spec.handler.clone() });
        }

        let mut by_name: BTreeMap<String, &Path> = BTreeMap::new();
        for file in &spec.files {
            let name = basename(file);
            if by_name.insert(name.clone(), file.as_path()).is_some() {
                return Err(PackageError::DuplicateFile(name));
            }
        }

        let mut builder = tar::Builder::new(Vec::new());
        let mut entries = Vec::with_capacity(by_name.len());
        for (name, path) in &by_name {
            let data = std::fs::read(path).map_err(|source| PackageError::Io { path: path.to_path_buf(), source })?;
            let mut header = tar::Header::new_gnu();
            header.set_path(name).map_err(PackageError::Archive)?;
            header.set_size(data.len() as u64);
            header.set_mode(ENTRY_MODE);
            header.set_mtime(0);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder.append(&header, data.as_slice()).map_err(PackageError::Archive)?;
            entries.push(name.clone());
        }
        let tarball = builder.into_inner().map_err(PackageError::Archive)?;

        let mut gz = GzBuilder::new().mtime(0).write(Vec::new(), Compression::default());
        gz.write_all(&tarball).map_err(PackageError::Archive)?;
        let bytes = gz.finish().map_err(PackageError::Archive)?;

        let sha256 = base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&bytes));
        debug!(function = %spec.name, entries = entries.len(), bytes = bytes.len(), sha256 = %sha256, "packaged artifact");
        Ok(Artifact { bytes, sha256, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_specs_without_files_or_entry() {
        let none = FunctionSpec::new("Quotes", "quote.get", vec![]);
        assert!(matches!(TarGzPackager.package(&none), Err(PackageError::NoFiles(n)) if n == "Quotes"));

        let wrong = FunctionSpec::new("Quotes", "index.get", vec![PathBuf::from("/nowhere/quote.js")]);
        assert!(matches!(TarGzPackager.package(&wrong), Err(PackageError::MissingEntry { .. })));
    }

    #[test]
    fn duplicate_basenames_are_rejected_before_reading() {
        let spec = FunctionSpec::new(
            "Quotes",
            "quote.get",
            vec![PathBuf::from("/a/quote.js"), PathBuf::from("/b/quote.js")],
        );
        assert!(matches!(TarGzPackager.package(&spec), Err(PackageError::DuplicateFile(n)) if n == "quote.js"));
    }
}
