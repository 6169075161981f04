//! Content-addressed store of staged trees.
//!
//! Each staged tree is built as a fresh generation directory:
//! `<root>/.hermit-store/<parent>/<identity>.<nonce>/`
//!
//! and published at `<root>/<parent>/<identity>` as a symlink to that
//! generation. Publishing renames a temporary symlink over the published one,
//! so a concurrent reader sees either the previous generation or the new one,
//! never a partially removed or partially rebuilt tree.
//!
//! Stagers of the same identity are serialized by an advisory lock on
//! `<root>/.hermit-store/<parent>/.<identity>.lock`. While holding it, a stager
//! builds, publishes and then removes every other generation of its identity.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use fs2::FileExt;

use super::{absolute_path, make_symlink, symlink, StagePlan, StagingError};
use crate::identity::PathIdentity;

/// Store directory name under the mirror root.
pub const STORE_DIR: &str = ".hermit-store";

/// A published staged tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedHandle {
    pub identity: PathIdentity,
    /// Name handed to make.
    pub make_name: String,
    /// Published path (a symlink to `generation`).
    pub published: PathBuf,
    /// Generation directory holding the actual links.
    pub generation: PathBuf,
}

/// Staging store rooted at a firmware mirror.
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

/// Exclusive lock on one identity, released on drop.
struct IdentityLock(File);

impl Drop for IdentityLock {
    fn drop(&mut self) {
        let _ = self.0.unlock();
    }
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, parent: &Path) -> PathBuf {
        self.root.join(STORE_DIR).join(parent)
    }

    fn nonce() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!(
            "{}-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    fn lock(store_dir: &Path, identity: &PathIdentity) -> Result<IdentityLock, StagingError> {
        fs::create_dir_all(store_dir).map_err(StagingError::io(store_dir))?;
        let path = store_dir.join(format!(".{}.lock", identity));
        let file = File::create(&path).map_err(StagingError::io(&path))?;
        file.lock_exclusive().map_err(StagingError::io(&path))?;
        Ok(IdentityLock(file))
    }

    /// Build `plan` in a new generation and publish it.
    ///
    /// Link targets are absolute even when the store root is relative, so the
    /// published tree resolves from wherever it is read.
    pub fn stage(&self, plan: &StagePlan) -> Result<StagedHandle, StagingError> {
        let root = absolute_path(&self.root).map_err(StagingError::io(&self.root))?;
        let store_dir = root.join(STORE_DIR).join(&plan.parent);
        let _lock = Self::lock(&store_dir, &plan.identity)?;

        let nonce = Self::nonce();
        let generation = store_dir.join(format!("{}.{}", plan.identity, nonce));

        if let Err(e) = self.build_generation(plan, &generation) {
            let _ = fs::remove_dir_all(&generation);
            return Err(e);
        }

        let published = root.join(plan.relative_path());
        if let Err(e) = self.publish(&published, &generation, &nonce) {
            let _ = fs::remove_dir_all(&generation);
            return Err(e);
        }

        sweep_generations(&store_dir, &plan.identity, &generation);

        tracing::debug!(
            "staged {} link(s) at `{}`",
            plan.links.len(),
            published.display()
        );

        Ok(StagedHandle {
            identity: plan.identity.clone(),
            make_name: plan.make_name.clone(),
            published,
            generation,
        })
    }

    fn build_generation(&self, plan: &StagePlan, generation: &Path) -> Result<(), StagingError> {
        fs::create_dir_all(generation).map_err(StagingError::io(generation))?;
        for link in &plan.links {
            let dst = generation.join(&link.dest);
            if fs::symlink_metadata(&dst).is_ok() {
                tracing::debug!(
                    "`{}` is staged more than once, keeping `{}`",
                    link.dest.display(),
                    link.source.display()
                );
            }
            make_symlink(&link.source, &dst).map_err(StagingError::io(&dst))?;
        }
        Ok(())
    }

    /// Point `published` at `generation`.
    fn publish(&self, published: &Path, generation: &Path, nonce: &str) -> Result<(), StagingError> {
        let parent = published
            .parent()
            .ok_or_else(|| StagingError::NotADirectory(published.to_path_buf()))?;
        fs::create_dir_all(parent).map_err(StagingError::io(parent))?;

        match fs::symlink_metadata(published) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            Ok(meta) if meta.is_dir() => {
                // a plain directory left by an older layout of the mirror
                fs::remove_dir_all(published).map_err(StagingError::io(published))?;
            }
            Ok(_) => fs::remove_file(published).map_err(StagingError::io(published))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StagingError::io(published)(e)),
        }

        let file_name = published
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let swap = parent.join(format!(".{}.swap-{}", file_name, nonce));
        symlink(generation, &swap).map_err(StagingError::io(&swap))?;
        if let Err(e) = fs::rename(&swap, published) {
            let _ = fs::remove_file(&swap);
            return Err(StagingError::io(published)(e));
        }
        Ok(())
    }

    /// Remove the published tree for `identity` under `parent` and every
    /// generation the store holds for it. Returns whether anything was removed.
    pub fn evict(&self, parent: &Path, identity: &PathIdentity) -> Result<bool, StagingError> {
        let mut removed = false;

        let published = self.root.join(parent).join(identity.as_str());
        match fs::symlink_metadata(&published) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(&published).map_err(StagingError::io(&published))?;
                removed = true;
            }
            Ok(_) => {
                fs::remove_file(&published).map_err(StagingError::io(&published))?;
                removed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StagingError::io(&published)(e)),
        }

        let store_dir = self.store_dir(parent);
        for path in generations(&store_dir, identity).map_err(StagingError::io(&store_dir))? {
            fs::remove_dir_all(&path).map_err(StagingError::io(&path))?;
            removed = true;
        }

        Ok(removed)
    }
}

/// Generation directories of `identity` in `store_dir`.
fn generations(store_dir: &Path, identity: &PathIdentity) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("{}.", identity);
    let entries = match fs::read_dir(store_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            found.push(entry.path());
        }
    }
    Ok(found)
}

/// Best-effort removal of every generation of `identity` except `keep`.
fn sweep_generations(store_dir: &Path, identity: &PathIdentity, keep: &Path) {
    let stale = match generations(store_dir, identity) {
        Ok(stale) => stale,
        Err(e) => {
            tracing::warn!("cannot list `{}`: {}", store_dir.display(), e);
            return;
        }
    };
    for path in stale.into_iter().filter(|p| p != keep) {
        tracing::debug!("evicting generation `{}`", path.display());
        match fs::remove_dir_all(&path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                tracing::warn!("cannot remove `{}`: {}", path.display(), e)
            }
            _ => {}
        }
    }
}
