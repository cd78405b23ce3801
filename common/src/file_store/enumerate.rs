// File discovery: wildcard matching, ordering and DataMessage production

use super::sidecar::read_status;
use crate::errors::FileStoreError;
use crate::models::{DataMessage, MessageStatus, OrderBy};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// Parameters of one directory listing
#[derive(Debug, Clone)]
pub struct FileQuery {
    pub path: PathBuf,
    pub pattern: String,
    pub recursive: bool,
    pub order_by: OrderBy,
    pub reverse: bool,
}

impl FileQuery {
    pub fn new(path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pattern: pattern.into(),
            recursive: false,
            order_by: OrderBy::default(),
            reverse: false,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn order(mut self, order_by: OrderBy, reverse: bool) -> Self {
        self.order_by = order_by;
        self.reverse = reverse;
        self
    }
}

/// Compile a file mask (`*`, `?`) into a case-insensitive regex.
/// `*` and `*.*` match every name, including names without an extension.
pub fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let pattern = pattern.trim();
    if pattern.is_empty() || pattern == "*" || pattern == "*.*" {
        return Regex::new("^.*$");
    }

    let mut expr = String::from("(?i)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

pub fn matches_wildcard(name: &str, pattern: &str) -> bool {
    match wildcard_regex(pattern) {
        Ok(re) => re.is_match(name),
        Err(_) => name.eq_ignore_ascii_case(pattern),
    }
}

struct Candidate {
    path: PathBuf,
    created: SystemTime,
    modified: SystemTime,
    size: u64,
}

/// Ordered, finite listing of matching files
///
/// The directory is read once when the listing is built; iterating yields one
/// DataMessage per file. Building a new listing re-reads the directory.
pub struct FileEnumeration {
    files: std::vec::IntoIter<PathBuf>,
    status: MessageStatus,
}

impl Iterator for FileEnumeration {
    type Item = DataMessage;

    fn next(&mut self) -> Option<Self::Item> {
        self.files
            .next()
            .map(|path| DataMessage::from_path(&path, self.status))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.files.size_hint()
    }
}

/// List the files matching `query`, each tagged with `status`.
///
/// A missing directory yields an empty listing.
pub fn enumerate(query: &FileQuery, status: MessageStatus) -> Result<FileEnumeration, FileStoreError> {
    let matcher = wildcard_regex(&query.pattern).map_err(|e| FileStoreError::Io {
        path: query.path.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
    })?;

    let mut candidates = Vec::new();
    if query.path.is_dir() {
        collect(&query.path, &matcher, query.recursive, &mut candidates)?;
    }
    sort_candidates(&mut candidates, query.order_by, query.reverse);

    let files: Vec<PathBuf> = candidates.into_iter().map(|c| c.path).collect();
    Ok(FileEnumeration {
        files: files.into_iter(),
        status,
    })
}

/// Read every status sidecar below `query.path` back into a DataMessage.
/// Sidecars that cannot be parsed are logged and skipped.
pub fn enumerate_status_files(query: &FileQuery) -> Result<Vec<DataMessage>, FileStoreError> {
    let listing = enumerate(query, MessageStatus::InProcess)?;
    let mut messages = Vec::new();
    for sidecar in listing {
        let path = sidecar.path();
        match read_status(&path) {
            Ok(message) => messages.push(message),
            Err(e @ FileStoreError::Io { .. }) => {
                warn!(path = %path.display(), error = %e, "Unable to read status file");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed status file");
            }
        }
    }
    Ok(messages)
}

/// Immediate subfolders of `path`, sorted by name
pub fn subfolders(path: &Path) -> Result<Vec<PathBuf>, FileStoreError> {
    let mut folders = Vec::new();
    if !path.is_dir() {
        return Ok(folders);
    }
    for entry in fs::read_dir(path).map_err(|e| FileStoreError::io(path, e))? {
        let entry = entry.map_err(|e| FileStoreError::io(path, e))?;
        if entry.path().is_dir() {
            folders.push(entry.path());
        }
    }
    folders.sort();
    Ok(folders)
}

fn collect(
    dir: &Path,
    matcher: &Regex,
    recursive: bool,
    out: &mut Vec<Candidate>,
) -> Result<(), FileStoreError> {
    let entries = fs::read_dir(dir).map_err(|e| FileStoreError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FileStoreError::io(dir, e))?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            // Vanished between listing and stat
            Err(_) => continue,
        };

        if metadata.is_dir() {
            if recursive {
                collect(&path, matcher, recursive, out)?;
            }
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if !matcher.is_match(&name) {
            continue;
        }

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        out.push(Candidate {
            path,
            created: metadata.created().unwrap_or(modified),
            modified,
            size: metadata.len(),
        });
    }
    Ok(())
}

fn sort_candidates(candidates: &mut [Candidate], order_by: OrderBy, reverse: bool) {
    match order_by {
        OrderBy::Created => candidates.sort_by(|a, b| a.created.cmp(&b.created).then(a.path.cmp(&b.path))),
        OrderBy::Modified => {
            candidates.sort_by(|a, b| a.modified.cmp(&b.modified).then(a.path.cmp(&b.path)))
        }
        OrderBy::Size => candidates.sort_by(|a, b| a.size.cmp(&b.size).then(a.path.cmp(&b.path))),
        OrderBy::FileName => candidates.sort_by(|a, b| a.path.cmp(&b.path)),
    }
    if reverse {
        candidates.reverse();
    }
}
