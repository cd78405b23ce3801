// Data package extraction with disk-space and path-traversal checks

use crate::errors::FileStoreError;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use sysinfo::Disks;
use tracing::{error, info, warn};
use zip::ZipArchive;

/// Package metadata entries that are never extracted
pub const MANIFEST_ENTRIES: [&str; 2] = ["Manifest.xml", "PackageHeader.xml"];

/// Free space required relative to the uncompressed payload
const DISK_SPACE_FACTOR_NUM: u64 = 6;
const DISK_SPACE_FACTOR_DEN: u64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub extracted: Vec<PathBuf>,
    /// Entry names rejected because they resolve outside the package folder
    pub skipped: Vec<String>,
}

struct Candidate {
    index: usize,
    name: String,
    size: u64,
}

/// Extract `archive_path` next to itself.
///
/// Manifest entries and empty entries are skipped. Fails before writing
/// anything when the volume has less than 1.2x the payload free. Entries that
/// resolve outside the package folder are logged and skipped. With
/// `add_timestamp` every file is named `{package stem}-{entry}` and an existing
/// file is never overwritten.
pub fn extract_archive(
    archive_path: &Path,
    delete_archive: bool,
    add_timestamp: bool,
) -> Result<ExtractionReport, FileStoreError> {
    if !archive_path.exists() {
        return Err(FileStoreError::SourceMissing(archive_path.to_path_buf()));
    }

    let parent = archive_path
        .parent()
        .ok_or_else(|| FileStoreError::NoParent(archive_path.to_path_buf()))?;
    let base = fs::canonicalize(parent).map_err(|e| FileStoreError::io(parent, e))?;
    let stem = archive_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let file = fs::File::open(archive_path).map_err(|e| FileStoreError::io(archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| FileStoreError::Archive {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut candidates = Vec::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index).map_err(|e| FileStoreError::Archive {
            path: archive_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let name = entry.name().to_string();
        if entry.is_dir() || entry.size() == 0 || MANIFEST_ENTRIES.contains(&name.as_str()) {
            continue;
        }
        candidates.push(Candidate {
            index,
            name,
            size: entry.size(),
        });
    }

    let payload: u64 = candidates.iter().map(|c| c.size).sum();
    ensure_sufficient_disk_space(&base, payload)?;

    let mut report = ExtractionReport::default();
    for candidate in &candidates {
        let relative = if add_timestamp {
            format!("{}-{}", stem, candidate.name)
        } else {
            candidate.name.clone()
        };

        let Some(destination) = resolve_within(&base, &relative) else {
            warn!(
                entry = %candidate.name,
                base = %base.display(),
                "Skipping zip entry because it resolves outside the package folder"
            );
            report.skipped.push(candidate.name.clone());
            continue;
        };

        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).map_err(|e| FileStoreError::io(dir, e))?;
        }

        let mut entry = archive
            .by_index(candidate.index)
            .map_err(|e| FileStoreError::Archive {
                path: archive_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut out = if add_timestamp {
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&destination)
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => FileStoreError::Archive {
                        path: archive_path.to_path_buf(),
                        reason: format!("{} already exists", destination.display()),
                    },
                    _ => FileStoreError::io(&destination, e),
                })?
        } else {
            fs::File::create(&destination).map_err(|e| FileStoreError::io(&destination, e))?
        };
        io::copy(&mut entry, &mut out).map_err(|e| FileStoreError::io(&destination, e))?;
        report.extracted.push(destination);
    }

    if delete_archive {
        fs::remove_file(archive_path).map_err(|e| FileStoreError::io(archive_path, e))?;
    }

    info!(
        archive = %archive_path.display(),
        extracted = report.extracted.len(),
        skipped = report.skipped.len(),
        "Package extracted"
    );
    Ok(report)
}

/// Join `relative` onto `base` and resolve `.`/`..` lexically.
/// Returns None unless the result is a path strictly below `base`.
fn resolve_within(base: &Path, relative: &str) -> Option<PathBuf> {
    let normalized = relative.replace('\\', "/");
    let mut resolved = base.to_path_buf();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return None;
                }
            }
            // Absolute names and drive prefixes escape the base outright
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (resolved.starts_with(base) && resolved != base).then_some(resolved)
}

fn ensure_sufficient_disk_space(base: &Path, payload: u64) -> Result<(), FileStoreError> {
    if payload == 0 {
        return Ok(());
    }
    check_disk_space(base, payload, available_space(base))
}

/// Compare the payload against `available` free bytes; unknown space passes with a warning
fn check_disk_space(base: &Path, payload: u64, available: Option<u64>) -> Result<(), FileStoreError> {
    let Some(available) = available else {
        warn!(
            path = %base.display(),
            "Unable to validate disk space before extraction"
        );
        return Ok(());
    };

    let required = payload.saturating_mul(DISK_SPACE_FACTOR_NUM) / DISK_SPACE_FACTOR_DEN;
    if available < required {
        let err = FileStoreError::InsufficientDiskSpace {
            required,
            available,
        };
        error!(path = %base.display(), "{}", err);
        return Err(err);
    }
    Ok(())
}

/// Free bytes on the volume holding `path` (longest matching mount point)
fn available_space(path: &Path) -> Option<u64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}
