//! Relative path sanitising and confinement to the media root

use std::path::{Component, Path, PathBuf};

use crate::error::MediaError;

/// Canonical base directory every relative path is resolved against
#[derive(Debug, Clone)]
pub struct MediaRoot {
    root: PathBuf,
}

impl MediaRoot {
    /// Canonicalize `path` and check that it is a directory
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(path.as_ref())?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("media root {} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// The canonical root directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied relative path to an absolute path under the root
    ///
    /// The input is sanitised first, then joined component by component. No
    /// filesystem call is made, so the target does not need to exist. An empty
    /// input resolves to the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, MediaError> {
        let sanitized = sanitize(relative);
        if sanitized.contains('\0') {
            return Err(MediaError::PathEscape);
        }

        let mut resolved = self.root.clone();
        for component in Path::new(&sanitized).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(MediaError::PathEscape)
                }
            }
        }

        // Path::starts_with compares whole components, so "/media2" is not
        // under "/media".
        if !resolved.starts_with(&self.root) {
            return Err(MediaError::PathEscape);
        }
        Ok(resolved)
    }
}

/// Strip traversal sequences and normalise separators
///
/// Every `..` is removed, runs of `/` collapse to one, and leading or
/// trailing separators are dropped so the result is always root-relative.
pub fn sanitize(input: &str) -> String {
    let stripped = input.replace("..", "");
    stripped
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Non-empty `/`-separated segments of a relative path
pub fn segments(relative: &str) -> impl Iterator<Item = &str> {
    relative.split('/').filter(|segment| !segment.is_empty())
}

/// Join a child name onto a relative directory path
pub fn join_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// Whether an I/O error means nothing exists at the path
///
/// A path that runs through a regular file fails with `NotADirectory`
/// rather than `NotFound`; both mean the target is absent.
pub(crate) fn is_missing(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
    )
}
