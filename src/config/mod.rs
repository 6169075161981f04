//! Layered configuration.
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`--config`, else `$XDG_CONFIG_HOME/qmk-hermit/config.toml`,
//!    else `~/.config/qmk-hermit/config.toml`)
//! 3. Environment (`QMK_HOME`)
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{
    default_config_path, env_layer, ConfigError, ConfigFile, ConfigOrigin, ConfigSource,
    EffectiveConfig, HermitConfig, CONFIG_FILE_NAME, QMK_HOME_ENV,
};
pub use merge::{deep_merge, merge_layers};
