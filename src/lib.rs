//! Source packaging for serverless container deploys.
//!
//! Walks a source tree, filters it through include/exclude globs, writes a
//! zip with normalized metadata, fingerprints it with SHA-256 and hands it to
//! an uploader. [`deploy`] layers the run service resource on top.

pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod filter;
pub mod models;
pub mod upload;

pub use config::{SourceConfig, DEFAULT_SOURCE_CODE_EXCLUDE};
pub use engine::{
    collect_entries, compute_digest, engine_package, package_source, source_code_hash,
    write_archive,
};
pub use error::{Error, Result};
pub use filter::{Decision, Filter, PatternSet};
pub use models::{
    Compression, ContentDigest, FileEntry, PackOptions, PackageRequest, PackagedArchive,
    SymlinkPolicy, TimestampPolicy,
};
pub use upload::{HttpUploader, UploadOptions, UploadResult, Uploader};
