//! Locating and copying build outputs.
//!
//! make names its outputs after the staged keyboard and keymap, e.g.
//! `hermit_0a1b2c3d_default.hex`. Copies are named after the names the user
//! knows instead, unless an explicit basename is given.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Extension retrieved when none is requested.
pub const DEFAULT_EXTENSION: &str = "hex";

/// Build output directory inside the mirror.
pub const BUILD_DIR: &str = ".build";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("build output `{name}` not found in {root}")]
    Missing { name: String, root: PathBuf },

    #[error("cannot copy {count} formats into the single file {dest}")]
    AmbiguousDestination { dest: PathBuf, count: usize },

    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Output file name make produces for `keyboard`/`keymap`.
pub fn expected_artifact_name(keyboard: &str, keymap: &str, ext: &str) -> String {
    format!("{}_{}.{}", keyboard, keymap, ext).replace('/', "_")
}

/// Directories searched for outputs, in order.
pub fn search_dirs(root: &Path) -> [PathBuf; 2] {
    [root.to_path_buf(), root.join(BUILD_DIR)]
}

/// First existing output named `name` under the mirror `root`.
pub fn find_artifact(root: &Path, name: &str) -> Option<PathBuf> {
    search_dirs(root)
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

/// What to retrieve after a build.
#[derive(Debug, Clone)]
pub struct ArtifactRequest<'a> {
    /// Staged keyboard name, as passed to make.
    pub keyboard: &'a str,
    /// Staged keymap name, as passed to make.
    pub keymap: &'a str,
    pub extensions: &'a [String],
    /// Directory or exact file name to copy to.
    pub into: &'a Path,
    /// Basename used when `into` is a directory.
    pub basename: &'a str,
}

/// One copied output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedArtifact {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Where the output with extension `ext` ends up.
pub fn copy_destination(
    into: &Path,
    basename: &str,
    ext: &str,
    format_count: usize,
) -> Result<PathBuf, ArtifactError> {
    if into.is_dir() {
        return Ok(into.join(format!("{}.{}", basename, ext)));
    }
    if format_count > 1 {
        return Err(ArtifactError::AmbiguousDestination {
            dest: into.to_path_buf(),
            count: format_count,
        });
    }
    Ok(into.to_path_buf())
}

/// Copy every requested output out of the mirror `root`.
///
/// All outputs are located before anything is copied.
pub fn collect(root: &Path, request: &ArtifactRequest<'_>) -> Result<Vec<CollectedArtifact>, ArtifactError> {
    let mut planned = Vec::with_capacity(request.extensions.len());
    for ext in request.extensions {
        let name = expected_artifact_name(request.keyboard, request.keymap, ext);
        let source = find_artifact(root, &name).ok_or_else(|| ArtifactError::Missing {
            name: name.clone(),
            root: root.to_path_buf(),
        })?;
        let dest = copy_destination(request.into, request.basename, ext, request.extensions.len())?;
        planned.push(CollectedArtifact { source, dest });
    }

    for artifact in &planned {
        tracing::info!("copying output to `{}`", artifact.dest.display());
        fs::copy(&artifact.source, &artifact.dest).map_err(|source| ArtifactError::Copy {
            from: artifact.source.clone(),
            to: artifact.dest.clone(),
            source,
        })?;
    }
    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expected_name() {
        assert_eq!(
            expected_artifact_name("hermit/0a1b2c3d", "default", "hex"),
            "hermit_0a1b2c3d_default.hex"
        );
        assert_eq!(
            expected_artifact_name("crkbd/rev1", "5e6f7a8b", "uf2"),
            "crkbd_rev1_5e6f7a8b.uf2"
        );
    }

    #[test]
    fn test_find_prefers_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join(BUILD_DIR)).unwrap();
        fs::write(root.join(BUILD_DIR).join("kb_km.hex"), "build").unwrap();
        assert_eq!(find_artifact(root, "kb_km.hex"), Some(root.join(".build/kb_km.hex")));

        fs::write(root.join("kb_km.hex"), "root").unwrap();
        assert_eq!(find_artifact(root, "kb_km.hex"), Some(root.join("kb_km.hex")));
        assert_eq!(find_artifact(root, "kb_km.bin"), None);
    }

    #[test]
    fn test_collect_into_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("mirror");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(root.join(BUILD_DIR)).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(root.join("hermit_0a1b2c3d_default.hex"), ":00000001FF").unwrap();
        fs::write(root.join(BUILD_DIR).join("hermit_0a1b2c3d_default.bin"), "bin").unwrap();

        let extensions = exts(&["hex", "bin"]);
        let collected = collect(
            &root,
            &ArtifactRequest {
                keyboard: "hermit/0a1b2c3d",
                keymap: "default",
                extensions: &extensions,
                into: &out,
                basename: "my_board_default",
            },
        )
        .unwrap();

        assert_eq!(collected.len(), 2);
        assert_eq!(fs::read_to_string(out.join("my_board_default.hex")).unwrap(), ":00000001FF");
        assert_eq!(fs::read_to_string(out.join("my_board_default.bin")).unwrap(), "bin");
    }

    #[test]
    fn test_collect_into_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("kb_km.hex"), "hex").unwrap();
        let dest = root.join("firmware.hex");

        let extensions = exts(&["hex"]);
        let request = ArtifactRequest {
            keyboard: "kb",
            keymap: "km",
            extensions: &extensions,
            into: &dest,
            basename: "unused",
        };
        collect(root, &request).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hex");

        fs::write(root.join("kb_km.bin"), "bin").unwrap();
        let two = exts(&["hex", "bin"]);
        let new_dest = root.join("new.out");
        let request = ArtifactRequest {
            extensions: &two,
            into: &new_dest,
            ..request
        };
        assert!(matches!(
            collect(root, &request),
            Err(ArtifactError::AmbiguousDestination { count: 2, .. })
        ));
        assert!(!new_dest.exists());
    }

    #[test]
    fn test_missing_copies_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("mirror");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(root.join("kb_km.hex"), "hex").unwrap();

        let extensions = exts(&["hex", "uf2"]);
        let result = collect(
            &root,
            &ArtifactRequest {
                keyboard: "kb",
                keymap: "km",
                extensions: &extensions,
                into: &out,
                basename: "kb_km",
            },
        );
        assert!(matches!(result, Err(ArtifactError::Missing { ref name, .. }) if name == "kb_km.uf2"));
        assert!(!out.join("kb_km.hex").exists());
    }
}
