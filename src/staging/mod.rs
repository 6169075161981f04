//! Staging of out-of-tree sources into the firmware tree layout.
//!
//! QMK only builds keyboards that live under `keyboards/` and layouts that
//! live under `layouts/<category>/<type>/`, and it expects a keyboard's
//! primary source to be named after its directory. Out-of-tree sources are
//! presented in that shape as a farm of symlinks:
//!
//! ```text
//! keyboards/<namespace>/<hash>/{<hash>.c, <hash>.h, <stem>.c, <stem>.h,
//!                               keymaps/<variant>/keymap.{c,h}, ...}
//! layouts/<namespace>/<type>/<hash>/...
//! ```
//!
//! Keymap sources are recognized only when the whole file name matches
//! `keymap[<sep><variant>].{c,h}`, so names such as `keymap.c.orig` or
//! `keymapper.c` are linked unchanged.
//!
//! Planning (which link goes where) is separate from materializing the plan
//! in a [`StagingStore`].

mod mirror;
mod store;
mod tree;

pub use mirror::{mirror_firmware_tree, MirrorStats};
pub use store::{StagedHandle, StagingStore, STORE_DIR};
pub use tree::render_tree;

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex_lite::Regex;
use thiserror::Error;

use crate::identity::PathIdentity;

/// Default namespace directory under `keyboards/` and `layouts/`.
pub const DEFAULT_NAMESPACE: &str = "hermit";

/// Errors from staging operations.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("source directory not found: {0}")]
    NotFound(PathBuf),

    #[error("source is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("I/O error while staging {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StagingError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| StagingError::Io { path, source }
    }
}

/// How one source file name maps into the staged tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameRule {
    /// `<stem>.c` / `<stem>.h`: the keyboard's primary source pair.
    PrimarySource { ext: String },
    /// `keymap.c`, `keymap_<variant>.h`, ...
    Keymap { variant: String, ext: String },
    /// Anything else, linked unchanged.
    Passthrough,
}

fn keymap_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^keymap(?:[-_ ]+(.+))?\.(c|h)$").expect("keymap pattern is valid")
    })
}

impl RenameRule {
    /// Classify a file name. `stem` is the keyboard's declared name; pass
    /// `None` to disable primary-source matching.
    pub fn classify(file_name: &str, stem: Option<&str>) -> Self {
        if let Some(stem) = stem {
            for ext in ["c", "h"] {
                if file_name.strip_suffix(ext).and_then(|s| s.strip_suffix('.')) == Some(stem) {
                    return RenameRule::PrimarySource {
                        ext: ext.to_string(),
                    };
                }
            }
        }

        if let Some(caps) = keymap_regex().captures(file_name) {
            let variant = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or("default")
                .to_string();
            let ext = caps.get(2).map(|m| m.as_str()).unwrap_or("c").to_string();
            return RenameRule::Keymap { variant, ext };
        }

        RenameRule::Passthrough
    }

    /// Destination paths, relative to the staged directory, for `file_name`.
    ///
    /// The primary source is linked twice: once under the staged name so it
    /// matches its directory, and once under its original name so includes
    /// of `<stem>.h` keep working.
    pub fn destinations(&self, file_name: &OsStr, staged_name: &str) -> Vec<PathBuf> {
        match self {
            RenameRule::PrimarySource { ext } => vec![
                PathBuf::from(format!("{}.{}", staged_name, ext)),
                PathBuf::from(file_name),
            ],
            RenameRule::Keymap { variant, ext } => vec![Path::new("keymaps")
                .join(variant)
                .join(format!("keymap.{}", ext))],
            RenameRule::Passthrough => vec![PathBuf::from(file_name)],
        }
    }
}

/// Which namespace a plan is staged into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Keyboard,
    Layout,
}

/// One symlink in a staged tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedLink {
    /// Absolute path of the out-of-tree file.
    pub source: PathBuf,
    /// Path relative to the staged directory.
    pub dest: PathBuf,
}

/// Everything needed to materialize one staged directory.
#[derive(Debug, Clone)]
pub struct StagePlan {
    pub kind: StageKind,
    pub identity: PathIdentity,
    /// Directory holding the staged tree, relative to the mirror root.
    pub parent: PathBuf,
    /// Name handed to make (`<namespace>/<hash>` or `<hash>`).
    pub make_name: String,
    pub links: Vec<StagedLink>,
}

impl StagePlan {
    /// Published location relative to the mirror root.
    pub fn relative_path(&self) -> PathBuf {
        self.parent.join(self.identity.as_str())
    }
}

/// Canonical source directory plus its sorted top-level entry names.
fn read_source_dir(src_dir: &Path) -> Result<(PathBuf, Vec<OsString>), StagingError> {
    let meta = match fs::metadata(src_dir) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StagingError::NotFound(src_dir.to_path_buf()))
        }
        Err(e) => return Err(StagingError::io(src_dir)(e)),
    };
    if !meta.is_dir() {
        return Err(StagingError::NotADirectory(src_dir.to_path_buf()));
    }

    let canonical = src_dir.canonicalize().map_err(StagingError::io(src_dir))?;
    let mut names = Vec::new();
    for entry in fs::read_dir(&canonical).map_err(StagingError::io(&canonical))? {
        let entry = entry.map_err(StagingError::io(&canonical))?;
        names.push(entry.file_name());
    }
    // fixed order so "last write wins" is reproducible
    names.sort();
    Ok((canonical, names))
}

/// Plan the staging of an out-of-tree keyboard.
///
/// `stem` is the keyboard's declared name: the primary sources are
/// `<stem>.c` and `<stem>.h`.
pub fn plan_keyboard(src_dir: &Path, stem: &str, namespace: &str) -> Result<StagePlan, StagingError> {
    let (canonical, names) = read_source_dir(src_dir)?;
    let identity = PathIdentity::of(&canonical);

    let mut links = Vec::new();
    for name in names {
        let rule = RenameRule::classify(&name.to_string_lossy(), Some(stem));
        for dest in rule.destinations(&name, identity.as_str()) {
            links.push(StagedLink {
                source: canonical.join(&name),
                dest,
            });
        }
    }

    Ok(StagePlan {
        kind: StageKind::Keyboard,
        make_name: format!("{}/{}", namespace, identity),
        parent: Path::new("keyboards").join(namespace),
        identity,
        links,
    })
}

/// Plan the staging of an out-of-tree layout of family `layout_type`.
///
/// Layout files are never renamed.
pub fn plan_layout(src_dir: &Path, layout_type: &str, namespace: &str) -> Result<StagePlan, StagingError> {
    let (canonical, names) = read_source_dir(src_dir)?;
    let identity = PathIdentity::of(&canonical);

    let links = names
        .into_iter()
        .map(|name| StagedLink {
            source: canonical.join(&name),
            dest: PathBuf::from(name),
        })
        .collect();

    Ok(StagePlan {
        kind: StageKind::Layout,
        make_name: identity.to_string(),
        parent: Path::new("layouts").join(namespace).join(layout_type),
        identity,
        links,
    })
}

/// `path` made absolute against the current directory, without touching the
/// filesystem. Symlinks created under a relative root would otherwise dangle.
pub(crate) fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Create a symlink at `dst` pointing to `src`, creating parent directories.
///
/// An existing symlink at `dst` is replaced; anything else is an error.
pub(crate) fn make_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    tracing::trace!("symlink `{}` -> `{}`", dst.display(), src.display());
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match symlink(src, dst) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if fs::symlink_metadata(dst)?.file_type().is_symlink() {
                tracing::debug!("replacing existing link `{}`", dst.display());
                fs::remove_file(dst)?;
                symlink(src, dst)
            } else {
                Err(e)
            }
        }
        other => other,
    }
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)
    } else {
        std::os::windows::fs::symlink_file(src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dests(name: &str, stem: &str, hash: &str) -> Vec<PathBuf> {
        RenameRule::classify(name, Some(stem)).destinations(OsStr::new(name), hash)
    }

    #[test]
    fn test_classify_primary() {
        assert_eq!(
            RenameRule::classify("foo.c", Some("foo")),
            RenameRule::PrimarySource { ext: "c".to_string() }
        );
        assert_eq!(
            RenameRule::classify("foo.h", Some("foo")),
            RenameRule::PrimarySource { ext: "h".to_string() }
        );
        assert_eq!(RenameRule::classify("foo.c", None), RenameRule::Passthrough);
        assert_eq!(RenameRule::classify("foobar.c", Some("foo")), RenameRule::Passthrough);
    }

    #[test]
    fn test_classify_keymaps() {
        assert_eq!(
            RenameRule::classify("keymap.c", None),
            RenameRule::Keymap { variant: "default".to_string(), ext: "c".to_string() }
        );
        assert_eq!(
            RenameRule::classify("keymap_gamer.h", None),
            RenameRule::Keymap { variant: "gamer".to_string(), ext: "h".to_string() }
        );
        assert_eq!(
            RenameRule::classify("keymap-colemak.c", None),
            RenameRule::Keymap { variant: "colemak".to_string(), ext: "c".to_string() }
        );
        assert_eq!(
            RenameRule::classify("keymap two.c", None),
            RenameRule::Keymap { variant: "two".to_string(), ext: "c".to_string() }
        );
        assert_eq!(RenameRule::classify("keymap.json", None), RenameRule::Passthrough);
        assert_eq!(RenameRule::classify("keymap.c.orig", None), RenameRule::Passthrough);
        assert_eq!(RenameRule::classify("keymapper.c", None), RenameRule::Passthrough);
    }

    #[test]
    fn test_destinations() {
        assert_eq!(
            dests("foo.c", "foo", "0a1b2c3d"),
            vec![PathBuf::from("0a1b2c3d.c"), PathBuf::from("foo.c")]
        );
        assert_eq!(
            dests("keymap_gamer.c", "foo", "0a1b2c3d"),
            vec![PathBuf::from("keymaps/gamer/keymap.c")]
        );
        assert_eq!(dests("config.h", "foo", "0a1b2c3d"), vec![PathBuf::from("config.h")]);
    }

    #[test]
    fn test_plan_keyboard() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("foo");
        fs::create_dir(&src).unwrap();
        for name in ["foo.c", "foo.h", "keymap.c", "keymap_gamer.c", "rules.mk"] {
            fs::write(src.join(name), "").unwrap();
        }

        let plan = plan_keyboard(&src, "foo", "hermit").unwrap();
        let hash = plan.identity.to_string();
        assert_eq!(plan.kind, StageKind::Keyboard);
        assert_eq!(plan.make_name, format!("hermit/{}", hash));
        assert_eq!(plan.relative_path(), Path::new("keyboards/hermit").join(&hash));

        let mut dests: Vec<_> = plan.links.iter().map(|l| l.dest.clone()).collect();
        dests.sort();
        let mut expected = vec![
            PathBuf::from(format!("{}.c", hash)),
            PathBuf::from(format!("{}.h", hash)),
            PathBuf::from("foo.c"),
            PathBuf::from("foo.h"),
            PathBuf::from("keymaps/default/keymap.c"),
            PathBuf::from("keymaps/gamer/keymap.c"),
            PathBuf::from("rules.mk"),
        ];
        expected.sort();
        assert_eq!(dests, expected);
        assert!(plan.links.iter().all(|l| l.source.is_absolute()));
    }

    #[test]
    fn test_plan_layout_passthrough() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("mine");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("keymap.c"), "").unwrap();
        fs::write(src.join("config.h"), "").unwrap();

        let plan = plan_layout(&src, "60_ansi", "hermit").unwrap();
        assert_eq!(plan.kind, StageKind::Layout);
        assert_eq!(plan.make_name, plan.identity.to_string());
        assert_eq!(plan.parent, PathBuf::from("layouts/hermit/60_ansi"));
        let dests: Vec<_> = plan.links.iter().map(|l| l.dest.clone()).collect();
        assert_eq!(dests, vec![PathBuf::from("config.h"), PathBuf::from("keymap.c")]);
    }

    #[test]
    fn test_plan_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing");
        assert!(matches!(
            plan_keyboard(&missing, "x", "hermit"),
            Err(StagingError::NotFound(_))
        ));

        let file = temp_dir.path().join("file.c");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            plan_layout(&file, "60_ansi", "hermit"),
            Err(StagingError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_absolute_path() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(absolute_path(Path::new("tmp/x")).unwrap(), cwd.join("tmp/x"));
        assert_eq!(absolute_path(Path::new("/a/b")).unwrap(), PathBuf::from("/a/b"));
    }
}
