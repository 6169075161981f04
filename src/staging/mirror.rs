//! Per-installation symlink mirror of the firmware tree.
//!
//! make runs inside the mirror rather than the real checkout, so build
//! products and staged sources never touch the user's QMK install.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{make_symlink, StagingError};

/// Directories that must be real so staged trees and build output can be added.
const REAL_DIRS: &[&str] = &[".build", "keyboards", "layouts"];

/// Files copied rather than linked (`bin/qmk` resolves its own real path).
const COPIED_FILES: &[&str] = &["bin/qmk"];

/// Files created empty because make writes to them.
const WRITABLE_FILES: &[&str] = &["quantum/version.h"];

/// What a mirror pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub linked: usize,
    pub copied: usize,
    pub existing: usize,
}

/// Create or refresh the mirror of `qmk_home` at `root`.
///
/// Entries already present in the mirror are left alone; directories that are
/// real in the mirror are descended into so their missing children get linked.
pub fn mirror_firmware_tree(qmk_home: &Path, root: &Path) -> Result<MirrorStats, StagingError> {
    let mut stats = MirrorStats::default();

    for dir in REAL_DIRS {
        let path = root.join(dir);
        if fs::symlink_metadata(&path).map(|m| m.file_type().is_symlink()).unwrap_or(false) {
            fs::remove_file(&path).map_err(StagingError::io(&path))?;
        }
        if !path.is_dir() {
            tracing::trace!("mkdir `{}`", path.display());
        }
        fs::create_dir_all(&path).map_err(StagingError::io(&path))?;
    }

    for file in COPIED_FILES {
        let src = qmk_home.join(file);
        if src.is_file() {
            let dst = root.join(file);
            copy_replacing(&src, &dst).map_err(StagingError::io(&dst))?;
            stats.copied += 1;
        }
    }

    for file in WRITABLE_FILES {
        let dst = root.join(file);
        touch(&dst).map_err(StagingError::io(&dst))?;
    }

    let mut queue: VecDeque<PathBuf> = read_children(qmk_home)?.into();
    while let Some(src) = queue.pop_front() {
        let rel = match src.strip_prefix(qmk_home) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let dst = root.join(rel);

        match fs::symlink_metadata(&dst) {
            Ok(meta) if meta.is_dir() => {
                if src.is_dir() {
                    queue.extend(read_children(&src)?);
                }
            }
            Ok(meta) if meta.file_type().is_symlink() && !dst.exists() => {
                // dangling link from a previous install layout
                make_symlink(&src, &dst).map_err(StagingError::io(&dst))?;
                stats.linked += 1;
            }
            Ok(_) => stats.existing += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                make_symlink(&src, &dst).map_err(StagingError::io(&dst))?;
                stats.linked += 1;
            }
            Err(e) => return Err(StagingError::io(&dst)(e)),
        }
    }

    tracing::debug!(
        "mirror `{}`: {} linked, {} copied, {} already present",
        root.display(),
        stats.linked,
        stats.copied,
        stats.existing
    );
    Ok(stats)
}

fn read_children(dir: &Path) -> Result<Vec<PathBuf>, StagingError> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(StagingError::io(dir))? {
        children.push(entry.map_err(StagingError::io(dir))?.path());
    }
    children.sort();
    Ok(children)
}

fn copy_replacing(src: &Path, dst: &Path) -> io::Result<()> {
    tracing::trace!("copy `{}` <- `{}`", dst.display(), src.display());
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    fs::copy(src, dst)?;
    Ok(())
}

fn touch(dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(dst) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => {
            fs::remove_file(dst)?;
            fs::File::create(dst).map(|_| ())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::trace!("touch `{}`", dst.display());
            fs::File::create(dst).map(|_| ())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_qmk_home(dir: &Path) -> PathBuf {
        let home = dir.join("qmk_firmware");
        for d in ["bin", "quantum", "keyboards/planck/rev6", "layouts/default/60_ansi", "tmk_core"] {
            fs::create_dir_all(home.join(d)).unwrap();
        }
        fs::write(home.join("Makefile"), "all:\n").unwrap();
        fs::write(home.join("bin/qmk"), "#!/usr/bin/env python3\n").unwrap();
        fs::write(home.join("quantum/quantum.c"), "").unwrap();
        fs::write(home.join("quantum/version.h"), "#define QMK_VERSION \"x\"\n").unwrap();
        fs::write(home.join("keyboards/planck/rules.mk"), "MCU = atmega32u4\n").unwrap();
        home
    }

    fn is_symlink(path: &Path) -> bool {
        fs::symlink_metadata(path).unwrap().file_type().is_symlink()
    }

    #[test]
    fn test_mirror_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let home = make_qmk_home(temp_dir.path());
        let root = temp_dir.path().join("mirror");

        mirror_firmware_tree(&home, &root).unwrap();

        for dir in [".build", "keyboards", "layouts", "quantum", "bin"] {
            assert!(!is_symlink(&root.join(dir)), "{} should be real", dir);
        }
        assert!(is_symlink(&root.join("Makefile")));
        assert!(is_symlink(&root.join("tmk_core")));
        assert!(is_symlink(&root.join("keyboards/planck")));
        assert!(is_symlink(&root.join("layouts/default")));
        assert!(is_symlink(&root.join("quantum/quantum.c")));

        // copied and writable files are real
        assert!(!is_symlink(&root.join("bin/qmk")));
        assert!(!is_symlink(&root.join("quantum/version.h")));
        assert_eq!(fs::read_to_string(root.join("quantum/version.h")).unwrap(), "");
        assert_eq!(
            fs::read_to_string(root.join("keyboards/planck/rules.mk")).unwrap(),
            "MCU = atmega32u4\n"
        );
    }

    #[test]
    fn test_mirror_keeps_staged_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let home = make_qmk_home(temp_dir.path());
        let root = temp_dir.path().join("mirror");

        let staged = root.join("keyboards/hermit/0a1b2c3d");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("rules.mk"), "").unwrap();

        mirror_firmware_tree(&home, &root).unwrap();
        let stats = mirror_firmware_tree(&home, &root).unwrap();

        assert!(staged.join("rules.mk").exists());
        assert_eq!(stats.linked, 0);
        assert!(stats.existing > 0);
    }
}
