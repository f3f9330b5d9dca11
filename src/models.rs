use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use tempfile::NamedTempFile;

/// Progress events emitted by the engine: percent done and a status line.
pub type ProgressSender = mpsc::Sender<(f32, String)>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
    Zstd,
}

impl Compression {
    pub fn method(self) -> zip::CompressionMethod {
        match self {
            Compression::Stored => zip::CompressionMethod::Stored,
            Compression::Deflated => zip::CompressionMethod::Deflated,
            Compression::Zstd => zip::CompressionMethod::Zstd,
        }
    }
}

/// How entry timestamps and permissions end up in the archive.
///
/// `Normalized` pins every entry to the zip epoch and fixed modes so the
/// digest only depends on paths and content.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    #[default]
    Normalized,
    Preserve,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SymlinkPolicy {
    #[default]
    Skip,
    Follow,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackOptions {
    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub timestamps: TimestampPolicy,

    #[serde(default)]
    pub symlinks: SymlinkPolicy,
}

/// One packaging job. The root is always explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub options: PackOptions,
}

impl PackageRequest {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            options: PackOptions::default(),
        }
    }

    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn options(mut self, options: PackOptions) -> Self {
        self.options = options;
        self
    }
}

/// A filesystem object that survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Forward-slash path relative to the root, without a trailing `/`.
    pub rel_path: String,
    pub is_dir: bool,
    /// Where the bytes are read from at write time.
    pub source: PathBuf,
    pub size: u64,
    pub modified: u64,
}

impl FileEntry {
    /// Name as stored in the archive; directories carry a trailing `/`.
    pub fn archive_name(&self) -> String {
        if self.is_dir {
            format!("{}/", self.rel_path)
        } else {
            self.rel_path.clone()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The produced zip. Dropping it removes the temporary file.
#[derive(Debug)]
pub struct PackagedArchive {
    pub(crate) file: NamedTempFile,
    pub entries: Vec<String>,
    pub digest: ContentDigest,
    pub size: u64,
}

impl PackagedArchive {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Copies the archive out of the temp dir; the temp file is still removed on drop.
    pub fn persist_copy(&self, dest: &Path) -> std::io::Result<u64> {
        std::fs::copy(self.path(), dest)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackSummary {
    pub directories: usize,
    pub files: usize,
    pub bytes_in: u64,
}

impl PackSummary {
    pub fn from_entries(entries: &[FileEntry]) -> Self {
        let mut summary = PackSummary::default();
        for entry in entries {
            if entry.is_dir {
                summary.directories += 1;
            } else {
                summary.files += 1;
                summary.bytes_in += entry.size;
            }
        }
        summary
    }
}
