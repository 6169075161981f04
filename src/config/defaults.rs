//! Built-in defaults (layer 1).

use std::path::PathBuf;

use serde::Serialize;

use crate::artifact::DEFAULT_EXTENSION;
use crate::runner::DEFAULT_MAKE;
use crate::staging::DEFAULT_NAMESPACE;

/// Directory under the system temporary directory holding all mirrors.
pub const TMP_SUBDIR: &str = "qmk-hermit";

#[derive(Debug, Clone, Serialize)]
pub struct BuiltinDefaults {
    /// Temporary build directory (default: `<system tmp>/qmk-hermit`)
    pub tmp_dir: PathBuf,

    /// Staging namespace (default: "hermit")
    pub namespace: String,

    /// Artifact extensions to retrieve (default: ["hex"])
    pub extensions: Vec<String>,

    /// make program (default: "make")
    pub make: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            tmp_dir: std::env::temp_dir().join(TMP_SUBDIR),
            namespace: DEFAULT_NAMESPACE.to_string(),
            extensions: vec![DEFAULT_EXTENSION.to_string()],
            make: DEFAULT_MAKE.to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to a JSON value for merging. There is no built-in install
    /// directory.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "tmp_dir": self.tmp_dir.to_string_lossy(),
            "namespace": self.namespace,
            "extensions": self.extensions,
            "make": self.make,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.namespace, "hermit");
        assert_eq!(defaults.extensions, vec!["hex"]);
        assert_eq!(defaults.make, "make");
        assert!(defaults.tmp_dir.ends_with(TMP_SUBDIR));
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();
        assert_eq!(value["namespace"], "hermit");
        assert_eq!(value["extensions"][0], "hex");
        assert!(value.get("qmk_home").is_none());
    }
}
