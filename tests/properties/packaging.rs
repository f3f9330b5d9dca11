//! Property tests for walk, filter and archive output over arbitrary trees.

use std::collections::BTreeSet;
use std::fs::{self, File};

use proptest::prelude::*;
use srcpack::{package_source, source_code_hash, PackageRequest};
use tempfile::TempDir;
use zip::ZipArchive;

/// Directory segments carry no dot and file names always do, so a generated
/// path is never both a file and a directory.
fn file_path() -> impl Strategy<Value = String> {
    let dir = proptest::string::string_regex("[a-d]{1,3}").unwrap();
    let stem = proptest::string::string_regex("[a-z]{1,6}").unwrap();
    let ext = prop_oneof![Just("go"), Just("txt"), Just("log")];
    (proptest::collection::vec(dir, 0..=3), stem, ext).prop_map(|(dirs, stem, ext)| {
        let mut parts = dirs;
        parts.push(format!("{stem}.{ext}"));
        parts.join("/")
    })
}

fn file_set() -> impl Strategy<Value = BTreeSet<String>> {
    proptest::collection::btree_set(file_path(), 1..=12)
}

fn write_tree(files: &BTreeSet<String>) -> TempDir {
    let dir = TempDir::new().unwrap();
    for f in files {
        let p = dir.path().join(f);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, f.as_bytes()).unwrap();
    }
    dir
}

/// Every file plus every ancestor directory, directories with a trailing `/`.
fn all_entries(files: &BTreeSet<String>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for f in files {
        let segments: Vec<&str> = f.split('/').collect();
        for i in 1..segments.len() {
            out.insert(format!("{}/", segments[..i].join("/")));
        }
        out.insert(f.clone());
    }
    out
}

fn archive_names(request: &PackageRequest) -> BTreeSet<String> {
    let archive = package_source(request).unwrap();
    let mut zip = ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();
    (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: With no patterns every file and directory lands in the archive.
    #[test]
    fn property_empty_patterns_include_whole_tree(files in file_set()) {
        let dir = write_tree(&files);
        let names = archive_names(&PackageRequest::new(dir.path()));
        prop_assert_eq!(names, all_entries(&files));
    }

    /// PROPERTY: Excluding a top-level directory drops exactly its subtree.
    #[test]
    fn property_excluded_directory_drops_its_subtree(
        files in file_set(),
        pick in any::<prop::sample::Index>(),
    ) {
        let dirs: Vec<String> = files
            .iter()
            .filter_map(|f| f.split_once('/').map(|(d, _)| d.to_string()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        prop_assume!(!dirs.is_empty());
        let excluded = pick.get(&dirs).clone();

        let dir = write_tree(&files);
        let names = archive_names(
            &PackageRequest::new(dir.path()).exclude([excluded.clone()]),
        );

        let prefix = format!("{excluded}/");
        let expected: BTreeSet<String> = all_entries(&files)
            .into_iter()
            .filter(|n| !n.starts_with(&prefix))
            .collect();
        prop_assert_eq!(names, expected);
    }

    /// PROPERTY: An include list narrows files only; every directory survives.
    #[test]
    fn property_include_filters_files_not_directories(files in file_set()) {
        let dir = write_tree(&files);
        let names = archive_names(&PackageRequest::new(dir.path()).include(["**/*.go"]));

        let expected: BTreeSet<String> = all_entries(&files)
            .into_iter()
            .filter(|n| n.ends_with('/') || n.ends_with(".go"))
            .collect();
        prop_assert_eq!(names, expected);
    }

    /// PROPERTY: Packaging an unchanged tree twice yields the same digest.
    #[test]
    fn property_digest_is_stable(files in file_set()) {
        let dir = write_tree(&files);
        let request = PackageRequest::new(dir.path());
        let first = source_code_hash(&request).unwrap();
        let second = source_code_hash(&request).unwrap();
        prop_assert_eq!(first, second);
    }
}
