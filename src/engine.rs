use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::UNIX_EPOCH;

use chrono::{Datelike, Local, TimeZone, Timelike};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::DateTime as ZipDateTime;

use crate::error::{Error, Result};
use crate::filter::{Decision, Filter};
use crate::models::{
    ContentDigest, FileEntry, PackOptions, PackageRequest, PackagedArchive, ProgressSender,
    SymlinkPolicy, TimestampPolicy,
};

// -----------------------------------------------------------------------------
// Public helpers
// -----------------------------------------------------------------------------

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

// -----------------------------------------------------------------------------
// Walk & Filter
// -----------------------------------------------------------------------------

fn check_root(root: &Path) -> Result<()> {
    let meta = match fs::metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::RootNotFound {
                path: root.to_path_buf(),
            })
        }
        Err(e) => return Err(Error::io(root, e)),
    };
    if !meta.is_dir() {
        return Err(Error::RootNotDirectory {
            path: root.to_path_buf(),
        });
    }
    Ok(())
}

/// Joins the components below `root` with `/`. Separator characters inside a
/// component (a `\\` in a Unix file name) are kept as-is.
fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path {
                path: path.to_path_buf(),
            })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Walks `request.root` depth-first in file-name order and returns every entry
/// that passes the include/exclude filter, directories before their contents.
pub fn collect_entries(request: &PackageRequest) -> Result<Vec<FileEntry>> {
    check_root(&request.root)?;
    let filter = Filter::new(&request.include, &request.exclude)?;
    let follow = request.options.symlinks == SymlinkPolicy::Follow;

    let mut walker = WalkDir::new(&request.root)
        .follow_links(follow)
        .sort_by_file_name()
        .into_iter();
    let mut entries = Vec::new();

    while let Some(next) = walker.next() {
        let entry = next?;
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let rel = relative_name(&request.root, path)?;

        if entry.path_is_symlink() && !follow {
            if request.options.symlinks == SymlinkPolicy::Error {
                return Err(Error::SymlinkRejected {
                    path: path.to_path_buf(),
                });
            }
            debug!(path = %rel, "skipping symlink");
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        match filter.decide(&rel, is_dir) {
            Decision::Prune => {
                debug!(path = %rel, "pruned excluded directory");
                walker.skip_current_dir();
                continue;
            }
            Decision::Skip => {
                debug!(path = %rel, "skipped file");
                continue;
            }
            Decision::Include => {}
        }

        let meta = entry.metadata()?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        entries.push(FileEntry {
            rel_path: rel,
            is_dir,
            source: path.to_path_buf(),
            size: if is_dir { 0 } else { meta.len() },
            modified,
        });
    }

    Ok(entries)
}

// -----------------------------------------------------------------------------
// ZIP helpers
// -----------------------------------------------------------------------------

fn entry_time(entry: &FileEntry, policy: TimestampPolicy) -> ZipDateTime {
    if policy == TimestampPolicy::Normalized {
        return ZipDateTime::default();
    }
    let Some(dt) = Local.timestamp_opt(entry.modified as i64, 0).single() else {
        return ZipDateTime::default();
    };
    ZipDateTime::from_date_and_time(
        dt.year() as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .unwrap_or_default()
}

/// Writes `entries` as a zip into `writer` and returns the writer once the
/// central directory is written.
pub fn write_entries<W: Write + Seek>(
    entries: &[FileEntry],
    writer: W,
    options: &PackOptions,
    tx: &ProgressSender,
) -> Result<W> {
    let mut zip = zip::ZipWriter::new(writer);
    let total = entries.len().max(1) as f32;

    for (idx, entry) in entries.iter().enumerate() {
        let name = entry.archive_name();
        let zip_time = entry_time(entry, options.timestamps);

        if entry.is_dir {
            let opts = FileOptions::<()>::default()
                .compression_method(zip::CompressionMethod::Stored)
                .unix_permissions(0o755)
                .last_modified_time(zip_time);
            zip.add_directory(name.as_str(), opts)?;
        } else {
            let opts = FileOptions::<()>::default()
                .compression_method(options.compression.method())
                .unix_permissions(0o644)
                .large_file(entry.size > 0xffffffff)
                .last_modified_time(zip_time);
            zip.start_file(name.as_str(), opts)?;

            let mut f = File::open(&entry.source).map_err(|e| Error::io(&entry.source, e))?;
            io::copy(&mut f, &mut zip).map_err(|e| Error::io(&entry.source, e))?;
        }

        tx.send((10.0 + (idx as f32 / total) * 80.0, name)).ok();
    }

    Ok(zip.finish()?)
}

/// Writes the archive to `dest` and syncs it so it is readable right away.
/// On error the partial file at `dest` is left for the caller to remove.
pub fn write_archive(entries: &[FileEntry], dest: &Path, options: &PackOptions) -> Result<PathBuf> {
    let file = File::create(dest).map_err(|e| Error::io(dest, e))?;
    let (tx, _rx) = mpsc::channel();
    let file = write_entries(entries, file, options, &tx)?;
    file.sync_all().map_err(|e| Error::io(dest, e))?;
    Ok(dest.to_path_buf())
}

// -----------------------------------------------------------------------------
// Hashing
// -----------------------------------------------------------------------------

/// SHA-256 over the full archive bytes, lowercase hex.
pub fn compute_digest(path: &Path) -> Result<ContentDigest> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io(path, e))?;
    Ok(ContentDigest::from_hex(hex::encode(hasher.finalize())))
}

// -----------------------------------------------------------------------------
// Packaging pipeline
// -----------------------------------------------------------------------------

pub fn engine_package(request: &PackageRequest, tx: &ProgressSender) -> Result<PackagedArchive> {
    tx.send((0.0, format!("Scanning {}...", request.root.display())))
        .ok();
    let entries = collect_entries(request)?;

    tx.send((10.0, format!("Compressing {} entries...", entries.len())))
        .ok();
    let tmp = tempfile::Builder::new()
        .prefix("srcpack-")
        .suffix(".zip")
        .tempfile()
        .map_err(|e| Error::io(std::env::temp_dir(), e))?;

    let written = write_entries(&entries, tmp.as_file(), &request.options, tx)?;
    written.sync_all().map_err(|e| Error::io(tmp.path(), e))?;

    tx.send((90.0, "Hashing archive...".into())).ok();
    let digest = compute_digest(tmp.path())?;
    let size = fs::metadata(tmp.path())
        .map_err(|e| Error::io(tmp.path(), e))?
        .len();

    info!(
        root = %request.root.display(),
        entries = entries.len(),
        size,
        digest = %digest,
        "source archive ready"
    );
    tx.send((100.0, format!("Packed {} entries ({})", entries.len(), format_bytes(size))))
        .ok();

    Ok(PackagedArchive {
        file: tmp,
        entries: entries.iter().map(FileEntry::archive_name).collect(),
        digest,
        size,
    })
}

pub fn package_source(request: &PackageRequest) -> Result<PackagedArchive> {
    let (tx, _rx) = mpsc::channel();
    engine_package(request, &tx)
}

/// Packages the tree only to fingerprint it; the archive is removed before returning.
pub fn source_code_hash(request: &PackageRequest) -> Result<ContentDigest> {
    let archive = package_source(request)?;
    Ok(archive.digest.clone())
}
