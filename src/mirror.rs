//! Symlink mirror from the model cache volume into the app's model directory
//!
//! Every file under the source root gets a symlink at the same relative path
//! under the target root. Existing symlinks are replaced, anything else that
//! already occupies a path is left alone.

use crate::error::{DeployError, DeployResult};
use serde::Serialize;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome counts for one mirror pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    pub created: usize,
    pub replaced: usize,
    /// Paths already occupied by a non-symlink
    pub skipped: usize,
}

impl MirrorReport {
    pub fn linked(&self) -> usize {
        self.created + self.replaced
    }
}

/// Mirror `source` into `target` using symlinks
pub fn mirror_tree(source: &Path, target: &Path) -> DeployResult<MirrorReport> {
    if !source.is_dir() {
        return Err(DeployError::MirrorSourceMissing(source.to_path_buf()));
    }

    let source = std::path::absolute(source).map_err(|e| DeployError::io(source, e))?;

    // Links created under the target would otherwise be walked again
    let real_source = resolve(&source).map_err(|e| DeployError::io(&source, e))?;
    let real_target = resolve(target).map_err(|e| DeployError::io(target, e))?;
    if real_target.starts_with(&real_source) {
        return Err(DeployError::MirrorTargetInsideSource {
            source_dir: real_source,
            target_dir: real_target,
        });
    }

    std::fs::create_dir_all(target).map_err(|e| DeployError::io(target, e))?;

    tracing::info!(source = ?source, target = ?target, "Mirroring model cache");

    let mut report = MirrorReport::default();

    for entry in WalkDir::new(&source).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable cache entry");
                continue;
            }
        };

        let Ok(relative) = entry.path().strip_prefix(&source) else {
            continue;
        };
        let link = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&link).map_err(|e| DeployError::io(&link, e))?;
            continue;
        }

        if !is_file_like(&entry) {
            continue;
        }

        match link_file(entry.path(), &link)? {
            LinkAction::Created => report.created += 1,
            LinkAction::Replaced => report.replaced += 1,
            LinkAction::Skipped => report.skipped += 1,
        }
    }

    tracing::info!(
        created = report.created,
        replaced = report.replaced,
        skipped = report.skipped,
        "Symlinking complete"
    );

    Ok(report)
}

/// Canonical form of a path that may not exist yet: the deepest existing
/// ancestor is canonicalized and the missing tail appended.
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let path = std::path::absolute(path)?;
    let mut existing = path.as_path();
    let mut missing = Vec::new();

    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = std::fs::canonicalize(existing)?;
    resolved.extend(missing.iter().rev());
    Ok(resolved)
}

/// Regular files and symlinks that are not directory links
///
/// Dangling symlinks inside the cache are linked too, with a warning.
fn is_file_like(entry: &walkdir::DirEntry) -> bool {
    if entry.file_type().is_file() {
        return true;
    }
    if !entry.path_is_symlink() {
        return false;
    }

    match std::fs::metadata(entry.path()) {
        Ok(meta) => meta.is_file(),
        Err(e) => {
            tracing::warn!(path = ?entry.path(), error = %e, "Dangling symlink in model cache");
            true
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkAction {
    Created,
    Replaced,
    Skipped,
}

impl LinkAction {
    fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Replaced => "replaced",
            Self::Skipped => "skipped",
        }
    }
}

fn link_file(original: &Path, link: &Path) -> DeployResult<LinkAction> {
    let action = match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::remove_file(link).map_err(|e| DeployError::io(link, e))?;
            LinkAction::Replaced
        }
        Ok(_) => {
            tracing::warn!(path = ?link, "Path exists and is not a symlink, skipping");
            crate::metrics::record_symlink(LinkAction::Skipped.label());
            return Ok(LinkAction::Skipped);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => LinkAction::Created,
        Err(e) => return Err(DeployError::io(link, e)),
    };

    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
    }

    symlink(original, link).map_err(|source| DeployError::Symlink {
        link: link.to_path_buf(),
        target: original.to_path_buf(),
        source,
    })?;

    tracing::debug!(link = ?link, target = ?original, action = action.label(), "Linked");
    crate::metrics::record_symlink(action.label());

    Ok(action)
}

/// Files currently linked into `target` that point inside `source`
pub fn list_links(source: &Path, target: &Path) -> Vec<(PathBuf, PathBuf)> {
    WalkDir::new(target)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path_is_symlink())
        .filter_map(|e| {
            let points_to = std::fs::read_link(e.path()).ok()?;
            points_to
                .starts_with(source)
                .then(|| (e.path().to_path_buf(), points_to))
        })
        .collect()
}
