//! qmk-hermit CLI
//!
//! Entry point for the `qmk-hermit` command-line tool.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueEnum};
use qmk_hermit::config::{default_config_path, env_layer, ConfigFile, EffectiveConfig};
use qmk_hermit::signal::{self, CancelFlag};
use qmk_hermit::{BuildRequest, FlashIntent, HermitError, Pipeline};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qmk-hermit")]
#[command(about = "Build QMK firmware from out-of-tree keyboards and layouts", version)]
struct Cli {
    /// QMK install directory (default: $QMK_HOME)
    #[arg(long, value_name = "DIR")]
    qmk: Option<PathBuf>,

    /// Temporary build directory (default: <system tmp>/qmk-hermit)
    #[arg(long, value_name = "DIR")]
    tmp: Option<PathBuf>,

    /// Flash after compiling, optionally only the left or right half
    #[arg(long, value_enum, num_args = 0..=1, require_equals = true, conflicts_with = "into")]
    flash: Option<Option<FlashSide>>,

    /// Directory or file name to copy the built firmware to
    #[arg(long, value_name = "DEST")]
    into: Option<PathBuf>,

    /// Firmware file extension(s) to retrieve (default: hex)
    #[arg(short = 'f', long = "format", value_name = "EXT", value_delimiter = ',')]
    formats: Vec<String>,

    /// Basename for copied firmware files
    #[arg(long, requires = "into")]
    name: Option<String>,

    /// Staging namespace under keyboards/ and layouts/ (default: hermit)
    #[arg(long)]
    namespace: Option<String>,

    /// make program to run (default: make)
    #[arg(long, value_name = "PROGRAM")]
    make: Option<String>,

    /// Wipe the temporary build directory first
    #[arg(long)]
    fresh: bool,

    /// Print the make command instead of running it
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// With --dry-run, print the whole build plan as JSON
    #[arg(long, requires = "dry_run")]
    json: bool,

    /// Configuration file (default: ~/.config/qmk-hermit/config.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Out-of-tree keyboard primary C file or directory, or QMK keyboard name
    keyboard: String,

    /// Out-of-tree layout directory, or QMK layout/keymap name
    #[arg(default_value = "default")]
    layout: String,

    /// ":target" fragments appended to the make target, other arguments passed to make
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    extra: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FlashSide {
    #[value(alias = "left")]
    L,
    #[value(alias = "right")]
    R,
}

impl Cli {
    fn flash_intent(&self) -> FlashIntent {
        match self.flash {
            None => FlashIntent::NoFlash,
            Some(None) => FlashIntent::Single,
            Some(Some(FlashSide::L)) => FlashIntent::Left,
            Some(Some(FlashSide::R)) => FlashIntent::Right,
        }
    }

    fn cli_layer(&self) -> serde_json::Value {
        serde_json::json!({
            "qmk_home": self.qmk,
            "tmp_dir": self.tmp,
            "namespace": self.namespace,
            "extensions": (!self.formats.is_empty()).then_some(&self.formats),
            "make": self.make,
        })
    }

    fn config_file(&self) -> Option<ConfigFile> {
        match &self.config {
            Some(path) => Some(ConfigFile {
                path: path.clone(),
                required: true,
            }),
            None => default_config_path().map(|path| ConfigFile {
                path,
                required: false,
            }),
        }
    }

    fn build_request(&self) -> BuildRequest {
        BuildRequest {
            keyboard: self.keyboard.clone(),
            layout: self.layout.clone(),
            flash: self.flash_intent(),
            extra_args: self.extra.clone(),
            into: self.into.clone(),
            name: self.name.clone(),
            fresh: self.fresh,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    };
    process::exit(code);
}

fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), HermitError> {
    let effective = EffectiveConfig::build(
        cli.config_file().as_ref(),
        env_layer(|key| std::env::var(key).ok()),
        cli.cli_layer(),
    )?;
    for source in &effective.sources {
        tracing::trace!("config layer {:?} {}", source.origin, source.path.as_deref().unwrap_or(""));
    }

    let cancel = CancelFlag::new();
    if let Err(e) = signal::install_handler(cancel.clone()) {
        tracing::warn!("could not install Ctrl-C handler: {}", e);
    }

    let pipeline = Pipeline::new(effective.config, cancel);
    let request = cli.build_request();
    let plan = pipeline.prepare(&request)?;

    if cli.dry_run {
        if cli.json {
            println!("{}", plan.to_json()?);
        } else {
            println!("{}", plan.command_line);
        }
        return Ok(());
    }

    pipeline.execute(plan, &request)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("qmk-hermit").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positionals_and_extras() {
        let cli = parse(&["-v", "board.c", "my_layout", ":clean", "-j8", "VERBOSE=true"]);
        assert_eq!(cli.keyboard, "board.c");
        assert_eq!(cli.layout, "my_layout");
        assert_eq!(cli.extra, vec![":clean", "-j8", "VERBOSE=true"]);
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.flash_intent(), FlashIntent::NoFlash);

        let cli = parse(&["planck/rev6"]);
        assert_eq!(cli.layout, "default");
    }

    #[test]
    fn test_flash_values() {
        assert_eq!(parse(&["--flash", "kb"]).flash_intent(), FlashIntent::Single);
        assert_eq!(parse(&["--flash=l", "kb"]).flash_intent(), FlashIntent::Left);
        assert_eq!(parse(&["--flash=right", "kb"]).flash_intent(), FlashIntent::Right);
    }

    #[test]
    fn test_flash_conflicts_with_into() {
        let result = Cli::try_parse_from(["qmk-hermit", "--flash", "--into", "/tmp", "kb"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_json_requires_dry_run() {
        assert!(Cli::try_parse_from(["qmk-hermit", "--json", "kb"]).is_err());
        assert!(parse(&["-n", "--json", "kb"]).json);
    }

    #[test]
    fn test_cli_layer() {
        let cli = parse(&["--qmk", "/opt/qmk", "-f", "hex,bin", "kb"]);
        let layer = cli.cli_layer();
        assert_eq!(layer["qmk_home"], "/opt/qmk");
        assert_eq!(layer["extensions"], serde_json::json!(["hex", "bin"]));
        assert!(layer["namespace"].is_null());
        assert!(layer["make"].is_null());

        assert!(parse(&["kb"]).cli_layer()["extensions"].is_null());
    }
}
