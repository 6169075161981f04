//! Resolution of user-supplied keyboard and layout arguments.
//!
//! An argument is either a path to out-of-tree sources or the name of a
//! keyboard/keymap already registered in the firmware tree. Paths are
//! resolved once, to absolute symlink-free form, and never change afterwards.

use std::io;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors resolving sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("`{0}` is not a valid keyboard")]
    UnknownKeyboard(String),

    #[error("`{0}` is not a valid keyboard name")]
    InvalidName(String),

    #[error("out-of-tree layout must be a directory: {0}")]
    LayoutNotADirectory(PathBuf),

    #[error("I/O error resolving {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Discriminant of a [`SourceLocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    OutOfTreeFile,
    Registered,
    OutOfTreeDir,
}

/// Where a keyboard or layout comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A canonical path to a file (a keyboard's primary `.c`).
    OutOfTreeFile(PathBuf),
    /// A name known to the firmware tree.
    Registered(String),
    /// A canonical path to a directory of sources.
    OutOfTreeDir(PathBuf),
}

impl SourceLocation {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceLocation::OutOfTreeFile(_) => SourceKind::OutOfTreeFile,
            SourceLocation::Registered(_) => SourceKind::Registered,
            SourceLocation::OutOfTreeDir(_) => SourceKind::OutOfTreeDir,
        }
    }

    /// Directory holding the sources, for out-of-tree locations.
    pub fn source_dir(&self) -> Option<&Path> {
        match self {
            SourceLocation::OutOfTreeFile(path) => path.parent(),
            SourceLocation::OutOfTreeDir(path) => Some(path),
            SourceLocation::Registered(_) => None,
        }
    }

    /// Name as the user knows it: the file stem, the directory name, or the
    /// registered name.
    pub fn user_name(&self) -> String {
        match self {
            SourceLocation::OutOfTreeFile(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            SourceLocation::OutOfTreeDir(path) => path
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            SourceLocation::Registered(name) => name.clone(),
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf, SourceError> {
    path.canonicalize().map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the keyboard argument.
///
/// An existing file is an out-of-tree source, and so is an existing directory
/// holding `<dirname>.c`. Anything else must name a directory somewhere under
/// `<qmk_home>/keyboards/`.
pub fn resolve_keyboard(arg: &str, qmk_home: &Path) -> Result<SourceLocation, SourceError> {
    let path = Path::new(arg);
    if path.is_file() {
        return Ok(SourceLocation::OutOfTreeFile(canonical(path)?));
    }
    if path.is_dir() {
        let dir = canonical(path)?;
        let primary = dir
            .file_name()
            .map(|name| dir.join(format!("{}.c", name.to_string_lossy())))
            .filter(|primary| primary.is_file());
        if primary.is_some() {
            return Ok(SourceLocation::OutOfTreeDir(dir));
        }
        tracing::debug!(
            "`{}` has no primary source, looking up a QMK keyboard",
            dir.display()
        );
    }

    if is_registered_keyboard(qmk_home, arg)? {
        Ok(SourceLocation::Registered(arg.to_string()))
    } else {
        Err(SourceError::UnknownKeyboard(arg.to_string()))
    }
}

/// Resolve the layout argument.
///
/// Directories are out-of-tree layouts; anything that does not exist is taken
/// as a layout/keymap name and left for make to validate.
pub fn resolve_layout(arg: &str) -> Result<SourceLocation, SourceError> {
    let path = Path::new(arg);
    if path.is_dir() {
        return Ok(SourceLocation::OutOfTreeDir(canonical(path)?));
    }
    if path.is_file() {
        return Err(SourceError::LayoutNotADirectory(path.to_path_buf()));
    }
    Ok(SourceLocation::Registered(arg.to_string()))
}

fn keyboard_matcher(name: &str) -> Result<GlobMatcher, SourceError> {
    let trimmed = name.trim_matches('/');
    let invalid = trimmed.is_empty()
        || trimmed.contains(|c| matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\'))
        || trimmed.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(SourceError::InvalidName(name.to_string()));
    }

    GlobBuilder::new(&format!("keyboards/**/{}", trimmed))
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|_| SourceError::InvalidName(name.to_string()))
}

/// Whether `name` matches a directory anywhere under `<qmk_home>/keyboards/`.
pub fn is_registered_keyboard(qmk_home: &Path, name: &str) -> Result<bool, SourceError> {
    let matcher = keyboard_matcher(name)?;
    let keyboards = qmk_home.join("keyboards");
    if !keyboards.is_dir() {
        return Ok(false);
    }

    for entry in WalkDir::new(&keyboards).min_depth(1).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(qmk_home) {
            if matcher.is_match(rel) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
