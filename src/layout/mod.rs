//! Layout family detection for out-of-tree layouts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hermit_rules::{infer_layout_variant, RulesMap};
use thiserror::Error;
use walkdir::WalkDir;

/// Source file extensions scanned for layout macros.
const SOURCE_EXTENSIONS: &[&str] = &["c", "h"];

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("could not guess layout type: no LAYOUT_<type>( call in {0}")]
    Ambiguous(PathBuf),

    #[error("keyboard does not support layouts")]
    NoLayoutsSupported,

    #[error("keyboard does not support `{layout}` layouts (supported: {supported})")]
    UnsupportedLayout { layout: String, supported: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Read every `.c`/`.h` file under `dir`, in sorted path order.
pub fn read_layout_sources(dir: &Path) -> Result<Vec<String>, LayoutError> {
    let mut texts = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_source = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e));
        if !is_source {
            continue;
        }
        let bytes = fs::read(entry.path()).map_err(|source| LayoutError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        texts.push(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(texts)
}

/// Infer the layout family of the sources in `dir`.
pub fn infer_layout_type(dir: &Path) -> Result<String, LayoutError> {
    let texts = read_layout_sources(dir)?;
    infer_layout_variant(&texts).ok_or_else(|| LayoutError::Ambiguous(dir.to_path_buf()))
}

/// Check that the keyboard's `LAYOUTS` rule lists `layout`.
pub fn check_layout_support(rules: &RulesMap, layout: &str) -> Result<(), LayoutError> {
    let supported = rules.words("LAYOUTS");
    if supported.is_empty() {
        return Err(LayoutError::NoLayoutsSupported);
    }
    if !supported.contains(&layout) {
        return Err(LayoutError::UnsupportedLayout {
            layout: layout.to_string(),
            supported: supported.join(" "),
        });
    }
    tracing::debug!("keyboard supports layouts: {}", supported.join(" "));
    Ok(())
}
