//! Directory browsing with per-identity filtering and tag state

use std::cmp::Ordering;
use std::fs::{self, Metadata};
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tagstore::{TagStore, WATCHED_TAG};

use crate::access::{AccessPolicy, Identity};
use crate::error::MediaError;
use crate::media;
use crate::paths::{self, MediaRoot};
use crate::utils::{format_size, to_utc};

/// Discriminator serialised as `"type"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File,
}

/// Subdirectory with one-level-deep child counts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub modified: DateTime<Utc>,
    pub media_count: usize,
    pub subfolder_count: usize,
    pub locked: bool,
}

/// Supported media file with its tag state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileEntry {
    pub name: String,
    pub display_name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub size_formatted: String,
    pub modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub extension: String,
    pub tags: Vec<String>,
    pub watched: bool,
}

/// One classified child of a listed directory
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEntry {
    Folder(FolderEntry),
    MediaFile(MediaFileEntry),
}

/// Result of listing one directory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub folders: Vec<FolderEntry>,
    pub files: Vec<MediaFileEntry>,
    pub current_path: String,
}

impl Listing {
    fn empty(current_path: String) -> Self {
        Self {
            current_path,
            ..Self::default()
        }
    }
}

/// Name ordering used for both folders and files
///
/// Case-folded comparison first so "alpha" sorts next to "Alpha". Names that
/// differ only in case put the lowercase form first. Accented letters are
/// compared by code point, so "Élan" sorts after "Zorro".
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let case_key = |name: &str| {
        name.chars()
            .map(|c| (c.is_uppercase(), c))
            .collect::<Vec<_>>()
    };
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| case_key(a).cmp(&case_key(b)))
}

/// Builds fresh listings from the filesystem on every call
#[derive(Debug, Clone)]
pub struct DirectoryLister {
    root: Arc<MediaRoot>,
    policy: Arc<AccessPolicy>,
    tags: Arc<TagStore>,
}

impl DirectoryLister {
    pub fn new(root: Arc<MediaRoot>, policy: Arc<AccessPolicy>, tags: Arc<TagStore>) -> Self {
        Self { root, policy, tags }
    }

    /// List the folders and media files directly inside `relative`
    ///
    /// This does blocking filesystem I/O; call it from a blocking task.
    ///
    /// # Errors
    /// * `AccessDenied` if a segment of the path is hidden or gated for `identity`
    /// * `PathEscape` if the path cannot be confined to the media root
    /// * `NotADirectory` if the path names something other than a directory
    pub fn list(
        &self,
        identity: &Identity,
        relative: &str,
        unlock: Option<&str>,
    ) -> Result<Listing, MediaError> {
        let current = paths::sanitize(relative);
        self.policy.check_access(identity, &current, unlock)?;
        let full_path = self.root.resolve(&current)?;

        match fs::metadata(&full_path) {
            Ok(meta) if !meta.is_dir() => return Err(MediaError::NotADirectory),
            Ok(_) => {}
            Err(e) if paths::is_missing(&e) => {
                tracing::warn!("Directory does not exist: {}", full_path.display());
                return Ok(Listing::empty(current));
            }
            Err(e) => return Err(MediaError::io("Reading directory", e)),
        }

        let children = match fs::read_dir(&full_path) {
            Ok(children) => children,
            Err(e) if paths::is_missing(&e) => return Ok(Listing::empty(current)),
            Err(e) => return Err(MediaError::io("Reading directory", e)),
        };

        let mut listing = Listing::empty(current.clone());
        for child in children {
            let child = match child {
                Ok(child) => child,
                Err(e) => {
                    tracing::warn!("Error reading entry in {}: {}", full_path.display(), e);
                    continue;
                }
            };

            let Some(name) = child.file_name().to_str().map(str::to_owned) else {
                tracing::warn!("Skipping non UTF-8 entry {:?}", child.file_name());
                continue;
            };

            let child_path = child.path();
            let meta = match fs::metadata(&child_path) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("Error reading item {}: {}", child_path.display(), e);
                    continue;
                }
            };

            match self.classify(identity, &current, name, &child_path, &meta) {
                Some(DirectoryEntry::Folder(folder)) => listing.folders.push(folder),
                Some(DirectoryEntry::MediaFile(file)) => listing.files.push(file),
                None => {}
            }
        }

        listing.folders.sort_by(|a, b| compare_names(&a.name, &b.name));
        listing.files.sort_by(|a, b| compare_names(&a.name, &b.name));
        Ok(listing)
    }

    fn classify(
        &self,
        identity: &Identity,
        parent: &str,
        name: String,
        full_path: &Path,
        meta: &Metadata,
    ) -> Option<DirectoryEntry> {
        let relative = paths::join_relative(parent, &name);
        let modified = meta.modified().map(to_utc).unwrap_or_default();

        if meta.is_dir() {
            if !self.policy.is_visible(identity, &relative, true) {
                return None;
            }
            let (media_count, subfolder_count) = self.count_children(identity, full_path);
            return Some(DirectoryEntry::Folder(FolderEntry {
                locked: self.policy.is_locked(identity, &name),
                name,
                path: relative,
                kind: EntryKind::Folder,
                modified,
                media_count,
                subfolder_count,
            }));
        }

        if !meta.is_file() || !media::is_supported_media(&name) {
            return None;
        }

        let extension = media::extension_of(&name)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let display_name = Path::new(&name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&name)
            .to_string();
        let tags = self.tags.get(&relative);
        let watched = tags.iter().any(|t| t == WATCHED_TAG);

        Some(DirectoryEntry::MediaFile(MediaFileEntry {
            name,
            display_name,
            path: relative,
            kind: EntryKind::File,
            size: meta.len(),
            size_formatted: format_size(meta.len()),
            modified,
            created: meta.created().map(to_utc).unwrap_or(modified),
            extension,
            tags,
            watched,
        }))
    }

    /// Media files and visible subfolders directly inside `dir`
    ///
    /// An unreadable directory counts as empty.
    fn count_children(&self, identity: &Identity, dir: &Path) -> (usize, usize) {
        let Ok(children) = fs::read_dir(dir) else {
            return (0, 0);
        };

        let mut media_count = 0;
        let mut subfolder_count = 0;
        for child in children.flatten() {
            let Ok(meta) = fs::metadata(child.path()) else {
                continue;
            };
            let name = child.file_name();
            let name = name.to_string_lossy();
            if meta.is_file() && media::is_supported_media(&*name) {
                media_count += 1;
            } else if meta.is_dir() && self.policy.is_visible(identity, &name, true) {
                subfolder_count += 1;
            }
        }
        (media_count, subfolder_count)
    }
}
