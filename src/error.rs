//! Failure taxonomy for package processing.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("upload is empty")]
    EmptyUpload,

    #[error("unsupported upload '{0}': expected a .mag archive")]
    UnsupportedUpload(String),

    #[error("not a valid zip archive: {0}")]
    MalformedArchive(#[from] zip::result::ZipError),

    #[error("package declares {declared} bytes, ceiling is {limit} bytes")]
    PackageTooLarge { declared: u64, limit: u64 },

    #[error("entry '{entry}' exceeded the per-file ceiling of {limit} bytes")]
    EntryOverflow { entry: String, limit: u64 },

    #[error("package exceeded the ceiling of {limit} bytes while extracting")]
    PackageOverflow { limit: u64 },

    #[error("insufficient disk space: {required} bytes required, {usable} bytes usable")]
    InsufficientSpace { required: u64, usable: u64 },

    #[error("storage failure at '{path}': {source}")]
    Storage { path: PathBuf, source: io::Error },
}

/// Coarse class of a [`PackageError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Malformed,
    Policy,
    Storage,
}

impl PackageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PackageError::EmptyUpload
            | PackageError::UnsupportedUpload(_)
            | PackageError::MalformedArchive(_) => ErrorKind::Malformed,
            PackageError::PackageTooLarge { .. }
            | PackageError::EntryOverflow { .. }
            | PackageError::PackageOverflow { .. }
            | PackageError::InsufficientSpace { .. } => ErrorKind::Policy,
            PackageError::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackageError::Storage {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PackageError>;
