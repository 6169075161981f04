//! Effective configuration with provenance.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Environment variable naming the QMK install directory.
pub const QMK_HOME_ENV: &str = "QMK_HOME";

/// Config file name inside the per-user config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

const CONFIG_DIR_NAME: &str = "qmk-hermit";

/// Origin of a configuration layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Env,
    Cli,
}

/// A contributing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of the raw file bytes (file layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A config file to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    /// Explicitly requested files must exist; the per-user default may not.
    pub required: bool,
}

/// Resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HermitConfig {
    #[serde(default)]
    pub qmk_home: Option<PathBuf>,
    pub tmp_dir: PathBuf,
    pub namespace: String,
    pub extensions: Vec<String>,
    pub make: String,
}

/// Merged configuration plus the layers it came from.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub config: HermitConfig,
    /// Contributing layers in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Merge built-in defaults, `file`, `env` and `cli` (in that order).
    ///
    /// `env` and `cli` are JSON objects; null members are ignored.
    pub fn build(file: Option<&ConfigFile>, env: Value, cli: Value) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(file) = file {
            if file.required || file.path.exists() {
                let (value, digest) = load_toml_file(&file.path)?;
                tracing::debug!("loaded config `{}`", file.path.display());
                layers.push(value);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::File,
                    path: Some(file.path.to_string_lossy().into_owned()),
                    digest: Some(digest),
                });
            }
        }

        for (origin, layer) in [(ConfigOrigin::Env, env), (ConfigOrigin::Cli, cli)] {
            if has_values(&layer) {
                layers.push(layer);
                sources.push(ConfigSource {
                    origin,
                    path: None,
                    digest: None,
                });
            }
        }

        let merged = merge_layers(layers);
        let config: HermitConfig = serde_json::from_value(merged)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        validate_config(&config)?;

        Ok(Self { config, sources })
    }
}

fn has_values(layer: &Value) -> bool {
    layer
        .as_object()
        .is_some_and(|map| map.values().any(|v| !v.is_null()))
}

/// Per-user config file location, if a config directory can be determined.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Environment layer, read through `lookup`.
pub fn env_layer(lookup: impl Fn(&str) -> Option<String>) -> Value {
    match lookup(QMK_HOME_ENV).filter(|v| !v.is_empty()) {
        Some(home) => serde_json::json!({ "qmk_home": home }),
        None => serde_json::json!({}),
    }
}

/// Load and parse a TOML file, returning the value and digest.
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    })?;

    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("{}: invalid UTF-8: {}", path.display(), e)))?;
    let toml_value: toml::Value = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

    Ok((toml_to_json(toml_value), digest))
}

fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

fn validate_config(config: &HermitConfig) -> Result<(), ConfigError> {
    let ns = config.namespace.as_str();
    if ns.is_empty() || ns.contains(['/', '\\']) || ns == "." || ns == ".." {
        return Err(ConfigError::ValidationError(format!(
            "namespace must be a single path component, got `{}`",
            ns
        )));
    }

    if config.extensions.is_empty() {
        return Err(ConfigError::ValidationError(
            "at least one artifact extension is required".to_string(),
        ));
    }
    if let Some(ext) = config
        .extensions
        .iter()
        .find(|ext| ext.is_empty() || ext.contains(['/', '\\']))
    {
        return Err(ConfigError::ValidationError(format!(
            "invalid artifact extension `{}`",
            ext
        )));
    }

    if config.make.trim().is_empty() {
        return Err(ConfigError::ValidationError("make must not be empty".to_string()));
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_build_with_defaults_only() {
        let config = EffectiveConfig::build(None, json!({}), json!({})).unwrap();

        assert_eq!(config.config.namespace, "hermit");
        assert_eq!(config.config.qmk_home, None);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_layer_precedence() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "qmk_home = \"/from/file\"").unwrap();
        writeln!(file, "namespace = \"filens\"").unwrap();
        writeln!(file, "extensions = [\"bin\"]").unwrap();
        let file = ConfigFile {
            path: file.path().to_path_buf(),
            required: true,
        };

        let env = env_layer(|key| (key == QMK_HOME_ENV).then(|| "/from/env".to_string()));
        let cli = json!({"namespace": "clins", "qmk_home": null, "make": null});
        let config = EffectiveConfig::build(Some(&file), env, cli).unwrap();

        assert_eq!(config.config.qmk_home, Some(PathBuf::from("/from/env")));
        assert_eq!(config.config.namespace, "clins");
        assert_eq!(config.config.extensions, vec!["bin"]);
        assert_eq!(config.config.make, "make");

        let origins: Vec<_> = config.sources.iter().map(|s| s.origin).collect();
        assert_eq!(
            origins,
            vec![ConfigOrigin::Builtin, ConfigOrigin::File, ConfigOrigin::Env, ConfigOrigin::Cli]
        );
        assert_eq!(config.sources[1].digest.as_ref().map(String::len), Some(64));
    }

    #[test]
    fn test_optional_file_may_be_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("config.toml");

        let optional = ConfigFile {
            path: missing.clone(),
            required: false,
        };
        assert!(EffectiveConfig::build(Some(&optional), json!({}), json!({})).is_ok());

        let required = ConfigFile {
            path: missing,
            required: true,
        };
        assert!(matches!(
            EffectiveConfig::build(Some(&required), json!({}), json!({})),
            Err(ConfigError::IoError { .. })
        ));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = EffectiveConfig::build(None, json!({}), json!({"overall_seconds": 10}));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "namespace = ").unwrap();
        let file = ConfigFile {
            path: file.path().to_path_buf(),
            required: true,
        };
        assert!(matches!(
            EffectiveConfig::build(Some(&file), json!({}), json!({})),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validation() {
        for cli in [
            json!({"namespace": "a/b"}),
            json!({"namespace": ".."}),
            json!({"extensions": []}),
            json!({"extensions": ["hex", ""]}),
            json!({"make": " "}),
        ] {
            assert!(
                matches!(
                    EffectiveConfig::build(None, json!({}), cli.clone()),
                    Err(ConfigError::ValidationError(_))
                ),
                "{} should be rejected",
                cli
            );
        }
    }

    #[test]
    fn test_empty_env_ignored() {
        assert_eq!(env_layer(|_| Some(String::new())), json!({}));
        assert_eq!(env_layer(|_| None), json!({}));
    }
}
