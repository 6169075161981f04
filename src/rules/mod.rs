//! Loading of a keyboard's `rules.mk` cascade from a firmware tree.
//!
//! For keyboard `a/b/c` the candidates are `keyboards/a/rules.mk`,
//! `keyboards/a/b/rules.mk` and `keyboards/a/b/c/rules.mk`, in that order.
//! Missing candidates are skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hermit_rules::{parse_cascade, RulesMap};
use thiserror::Error;

/// Name of the per-directory rules file.
pub const RULES_FILE: &str = "rules.mk";

#[derive(Debug, Error)]
#[error("failed to read {path}: {source}")]
pub struct RulesError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Candidate rules files for `keyboard`, most general first.
pub fn rules_candidates(root: &Path, keyboard: &str) -> Vec<PathBuf> {
    let mut dir = root.join("keyboards");
    let mut candidates = Vec::new();
    for part in keyboard.split('/').filter(|p| !p.is_empty()) {
        dir.push(part);
        candidates.push(dir.join(RULES_FILE));
    }
    candidates
}

/// Existing rules files for `keyboard`, most general first.
pub fn rules_chain(root: &Path, keyboard: &str) -> Vec<PathBuf> {
    rules_candidates(root, keyboard)
        .into_iter()
        .filter(|p| p.is_file())
        .collect()
}

/// Read and fold the rules cascade for `keyboard` under mirror `root`.
pub fn load_keyboard_rules(root: &Path, keyboard: &str) -> Result<RulesMap, RulesError> {
    let chain = rules_chain(root, keyboard);
    let mut contents = Vec::with_capacity(chain.len());
    for path in &chain {
        tracing::debug!("reading rules `{}`", path.display());
        let bytes = fs::read(path).map_err(|source| RulesError {
            path: path.clone(),
            source,
        })?;
        contents.push(String::from_utf8_lossy(&bytes).into_owned());
    }

    let rules = parse_cascade(&contents);
    tracing::trace!("resolved {} rule(s) for `{}`", rules.len(), keyboard);
    Ok(rules)
}
