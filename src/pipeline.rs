//! Build orchestration.
//!
//! One invocation runs these steps in order:
//! - resolve the QMK install and its mirror root
//! - resolve the keyboard and layout arguments
//! - infer the layout type of an out-of-tree layout
//! - refresh the mirror and stage out-of-tree sources into it
//! - read the keyboard rules and check layout support
//! - compose the make target and run make (or stop at the plan)
//! - copy the requested outputs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hermit_rules::RulesMap;
use serde::Serialize;

use crate::artifact::{collect, expected_artifact_name, find_artifact, ArtifactRequest, CollectedArtifact};
use crate::config::HermitConfig;
use crate::error::HermitError;
use crate::identity::PathIdentity;
use crate::layout::{check_layout_support, infer_layout_type};
use crate::rules::load_keyboard_rules;
use crate::runner::{program_available, BuildOutcome, BuildRunner, MakeInvocation};
use crate::signal::CancelFlag;
use crate::source::{resolve_keyboard, resolve_layout, SourceLocation};
use crate::staging::{
    absolute_path, mirror_firmware_tree, plan_keyboard, plan_layout, render_tree, StagedHandle,
    StagingError, StagingStore,
};
use crate::target::{compose_target, partition_extra_args, BuildTarget, FlashIntent, TargetRequest};

/// What the user asked to build.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Keyboard primary C file, source directory, or QMK keyboard name.
    pub keyboard: String,
    /// Layout directory or QMK layout/keymap name.
    pub layout: String,
    pub flash: FlashIntent,
    /// `:target` fragments and pass-through make arguments.
    pub extra_args: Vec<String>,
    /// Directory or file to copy outputs to.
    pub into: Option<PathBuf>,
    /// Basename for copied outputs.
    pub name: Option<String>,
    /// Wipe the mirror root first.
    pub fresh: bool,
}

/// How one side of the target (keyboard or keymap) is provided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedSource {
    /// Name as the user knows it.
    pub user_name: String,
    /// Name handed to make.
    pub make_name: String,
    /// Out-of-tree source directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Published staged directory inside the mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged: Option<PathBuf>,
}

impl ResolvedSource {
    fn registered(name: &str) -> Self {
        Self {
            user_name: name.to_string(),
            make_name: name.to_string(),
            source: None,
            staged: None,
        }
    }

    fn staged(location: &SourceLocation, handle: &StagedHandle) -> Self {
        Self {
            user_name: location.user_name(),
            make_name: handle.make_name.clone(),
            source: location.source_dir().map(Path::to_path_buf),
            staged: Some(handle.published.clone()),
        }
    }
}

/// Everything decided before make runs.
#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub qmk_home: PathBuf,
    /// Mirror root, `<tmp>/<identity of qmk_home>`.
    pub tmp_root: PathBuf,
    pub keyboard: ResolvedSource,
    pub keymap: ResolvedSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_type: Option<String>,
    /// Keyboard variables after the `rules.mk` cascade.
    pub rules: RulesMap,
    pub target: BuildTarget,
    pub invocation: MakeInvocation,
    pub command_line: String,
    /// Output file names make is expected to produce.
    pub artifacts: Vec<String>,
}

impl BuildPlan {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Default basename for copied outputs.
    pub fn output_basename(&self) -> String {
        format!("{}_{}", self.keyboard.user_name, self.keymap.user_name).replace('/', "_")
    }
}

/// Result of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub plan: BuildPlan,
    pub outcome: BuildOutcome,
    pub collected: Vec<CollectedArtifact>,
}

/// Runs build requests against one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: HermitConfig,
    runner: BuildRunner,
}

impl Pipeline {
    pub fn new(config: HermitConfig, cancel: CancelFlag) -> Self {
        Self {
            config,
            runner: BuildRunner::new(cancel),
        }
    }

    pub fn with_runner(mut self, runner: BuildRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &HermitConfig {
        &self.config
    }

    /// Resolve, stage and compose, without running make.
    #[tracing::instrument(level = "debug", skip_all, fields(keyboard = %request.keyboard, layout = %request.layout))]
    pub fn prepare(&self, request: &BuildRequest) -> Result<BuildPlan, HermitError> {
        let qmk_home = self.resolve_install()?;
        let tmp_dir =
            absolute_path(&self.config.tmp_dir).map_err(StagingError::io(&self.config.tmp_dir))?;
        let tmp_root = mirror_root(&tmp_dir, &qmk_home);
        tracing::info!("using `{}` as temporary QMK", tmp_root.display());

        if request.fresh {
            wipe(&tmp_root)?;
        }

        let keyboard_source = resolve_keyboard(&request.keyboard, &qmk_home)?;
        match &keyboard_source {
            SourceLocation::Registered(name) => tracing::info!("using QMK keyboard `{}`", name),
            other => tracing::info!(
                "using out-of-tree keyboard `{}`",
                other.source_dir().unwrap_or(Path::new("")).display()
            ),
        }

        let layout_source = resolve_layout(&request.layout)?;
        let layout_type = match &layout_source {
            SourceLocation::Registered(name) => {
                tracing::info!("using QMK layout `{}`", name);
                None
            }
            other => {
                let dir = other.source_dir().unwrap_or(Path::new(""));
                tracing::info!("using out-of-tree layout `{}`", dir.display());
                let layout_type = infer_layout_type(dir)?;
                tracing::debug!("guessed `{}` layout type", layout_type);
                Some(layout_type)
            }
        };

        tracing::debug!("setting up temporary QMK directory");
        mirror_firmware_tree(&qmk_home, &tmp_root)?;

        let store = StagingStore::new(&tmp_root);
        let namespace = &self.config.namespace;

        let keyboard = match &keyboard_source {
            SourceLocation::Registered(name) => ResolvedSource::registered(name),
            located => {
                let dir = located.source_dir().unwrap_or(Path::new(""));
                let plan = plan_keyboard(dir, &located.user_name(), namespace)?;
                let handle = store.stage(&plan)?;
                log_tree(&handle);
                ResolvedSource::staged(located, &handle)
            }
        };

        let rules = load_keyboard_rules(&tmp_root, &keyboard.make_name)?;

        let keymap = match (&layout_source, &layout_type) {
            (SourceLocation::Registered(name), _) => ResolvedSource::registered(name),
            (located, Some(layout_type)) => {
                check_layout_support(&rules, layout_type)?;
                let dir = located.source_dir().unwrap_or(Path::new(""));
                let plan = plan_layout(dir, layout_type, namespace)?;
                let handle = store.stage(&plan)?;
                log_tree(&handle);
                ResolvedSource::staged(located, &handle)
            }
            // an out-of-tree layout always has an inferred type
            (located, None) => ResolvedSource::registered(&located.user_name()),
        };

        let (extra_targets, make_args) = partition_extra_args(&request.extra_args);
        let target = compose_target(&TargetRequest {
            keyboard: &keyboard.make_name,
            keymap: &keymap.make_name,
            rules: &rules,
            flash: request.flash,
            extra_targets: &extra_targets,
            make_args: &make_args,
        });
        for warning in &target.warnings {
            tracing::warn!("{}", warning);
        }

        let invocation = MakeInvocation::new(self.config.make.clone(), &target, &tmp_root);
        let command_line = invocation.command_line();
        let artifacts = self
            .config
            .extensions
            .iter()
            .map(|ext| expected_artifact_name(&keyboard.make_name, &keymap.make_name, ext))
            .collect();

        Ok(BuildPlan {
            qmk_home,
            tmp_root,
            keyboard,
            keymap,
            layout_type,
            rules,
            target,
            invocation,
            command_line,
            artifacts,
        })
    }

    /// Run make for a prepared plan and copy the outputs.
    pub fn execute(&self, plan: BuildPlan, request: &BuildRequest) -> Result<BuildReport, HermitError> {
        if !program_available(&plan.invocation.program) {
            return Err(HermitError::MakeNotFound(plan.invocation.program.clone()));
        }
        tracing::info!("QMK build...");
        let outcome = self.runner.run(&plan.invocation)?;
        if outcome.cancelled {
            return Err(HermitError::Cancelled);
        }
        if outcome.exit_code != 0 {
            return Err(HermitError::BuildFailed(outcome.exit_code));
        }
        tracing::info!("QMK build done.");

        let collected = match &request.into {
            Some(into) => {
                let basename = request
                    .name
                    .clone()
                    .unwrap_or_else(|| plan.output_basename());
                collect(
                    &plan.tmp_root,
                    &ArtifactRequest {
                        keyboard: &plan.keyboard.make_name,
                        keymap: &plan.keymap.make_name,
                        extensions: &self.config.extensions,
                        into,
                        basename: &basename,
                    },
                )?
            }
            None => {
                for name in &plan.artifacts {
                    if let Some(path) = find_artifact(&plan.tmp_root, name) {
                        tracing::info!("output: `{}`", path.display());
                    }
                }
                Vec::new()
            }
        };

        Ok(BuildReport {
            plan,
            outcome,
            collected,
        })
    }

    /// [`prepare`](Self::prepare) then [`execute`](Self::execute).
    pub fn run(&self, request: &BuildRequest) -> Result<BuildReport, HermitError> {
        let plan = self.prepare(request)?;
        self.execute(plan, request)
    }

    fn resolve_install(&self) -> Result<PathBuf, HermitError> {
        let home = self.config.qmk_home.as_ref().ok_or(HermitError::MissingInstall)?;
        let home = home
            .canonicalize()
            .map_err(|_| HermitError::InstallNotFound(home.clone()))?;
        if !home.is_dir() {
            return Err(HermitError::InstallNotFound(home));
        }
        tracing::info!("using QMK from `{}`", home.display());
        Ok(home)
    }
}

/// Mirror root for the install at `qmk_home` (already canonical).
pub fn mirror_root(tmp_dir: &Path, qmk_home: &Path) -> PathBuf {
    tmp_dir.join(PathIdentity::of(qmk_home).as_str())
}

fn wipe(root: &Path) -> Result<(), StagingError> {
    tracing::debug!("removing `{}`", root.display());
    match fs::remove_dir_all(root) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(StagingError::io(root)(e)),
        _ => Ok(()),
    }
}

fn log_tree(handle: &StagedHandle) {
    if tracing::enabled!(tracing::Level::DEBUG) {
        for line in render_tree(&handle.published) {
            tracing::debug!("{}", line);
        }
    }
}
