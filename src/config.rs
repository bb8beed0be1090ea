//! Harness configuration.
//!
//! Values come from three layers, highest priority first: command-line flags
//! (or their `ARX_RT_*` environment variables), an optional JSON config file,
//! then built-in defaults. [`ConfigLayer`] is the partial form shared by the
//! first two layers; [`HarnessConfig`] is the resolved, validated result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};

use crate::error::{RtError, RtResult};

pub const DEFAULT_LEVEL_ID: u32 = 1;
pub const DEFAULT_ADDON_MODULE: &str = "arx_addon";
pub const DEFAULT_IMPORT_OPERATOR: &str = "arx.area_list_import_selected";
pub const DEFAULT_EXPORT_OPERATOR: &str = "arx.area_list_export_selected";
pub const DEFAULT_READY_POLL_MS: u64 = 500;
pub const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_CONSUMER_TIMEOUT_SECS: u64 = 20;

/// Placeholder in consumer arguments replaced by the two-digit level id.
pub const LEVEL_PLACEHOLDER: &str = "{level}";

const MAX_LEVEL_ID: u32 = 99;

/// Partially specified configuration, as parsed from flags or a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    /// Known-good backup of the level file. Never modified.
    #[arg(long, env = "ARX_RT_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Level file overwritten by each run. Defaults to the level's
    /// `fast.fts` under the asset root.
    #[arg(long, env = "ARX_RT_WORKING_FILE")]
    pub working_file: Option<PathBuf>,

    /// Arx asset root handed to the Blender addon.
    #[arg(long, env = "ARX_RT_ASSET_ROOT")]
    pub asset_root: Option<PathBuf>,

    /// Symlink (or path) to the Blender executable.
    #[arg(long, env = "ARX_RT_BLENDER")]
    pub blender: Option<PathBuf>,

    /// Game binary used to validate the exported level.
    #[arg(long, env = "ARX_RT_ARX_BINARY")]
    pub arx_binary: Option<PathBuf>,

    /// Run log, truncated at the start of every run.
    #[arg(long, env = "ARX_RT_LOG")]
    pub log: Option<PathBuf>,

    /// Write a JSON run report to this path.
    #[arg(long, env = "ARX_RT_REPORT")]
    pub report: Option<PathBuf>,

    /// Level (area) id to round-trip.
    #[arg(long, env = "ARX_RT_LEVEL")]
    pub level: Option<u32>,

    /// Blender scene name. Defaults to `Area_NN`.
    #[arg(long, env = "ARX_RT_SCENE")]
    pub scene: Option<String>,

    /// Python module name of the Blender addon.
    #[arg(long)]
    pub addon_module: Option<String>,

    /// Operator id used for the import step.
    #[arg(long)]
    pub import_operator: Option<String>,

    /// Operator id used for the export step.
    #[arg(long)]
    pub export_operator: Option<String>,

    /// Interval between UI readiness polls inside Blender, in milliseconds.
    #[arg(long)]
    pub ready_poll_ms: Option<u64>,

    /// Give up waiting for the Blender UI after this many seconds.
    #[arg(long)]
    pub ready_timeout_secs: Option<u64>,

    /// Hard limit on the whole Blender process, in seconds.
    #[arg(long, env = "ARX_RT_TOOL_TIMEOUT")]
    pub tool_timeout_secs: Option<u64>,

    /// Hard limit on the validation launch of the game, in seconds.
    #[arg(long, env = "ARX_RT_ARX_TIMEOUT")]
    pub arx_timeout_secs: Option<u64>,

    /// Extra argument passed to Blender before `--python` (repeatable).
    #[arg(long = "blender-arg", allow_hyphen_values = true)]
    pub blender_args: Option<Vec<String>>,

    /// Argument passed to the game binary (repeatable). `{level}` expands to
    /// the two-digit level id.
    #[arg(long = "arx-arg", allow_hyphen_values = true)]
    pub arx_args: Option<Vec<String>>,
}

impl ConfigLayer {
    /// Read a JSON config file. Unknown keys are rejected.
    pub fn from_json_file(path: &Path) -> RtResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|error| {
            RtError::InvalidConfig(format!("{}: {error}", path.display()))
        })
    }

    /// Fill every unset field of `self` from `lower`.
    #[must_use]
    pub fn or(self, lower: Self) -> Self {
        Self {
            fixture: self.fixture.or(lower.fixture),
            working_file: self.working_file.or(lower.working_file),
            asset_root: self.asset_root.or(lower.asset_root),
            blender: self.blender.or(lower.blender),
            arx_binary: self.arx_binary.or(lower.arx_binary),
            log: self.log.or(lower.log),
            report: self.report.or(lower.report),
            level: self.level.or(lower.level),
            scene: self.scene.or(lower.scene),
            addon_module: self.addon_module.or(lower.addon_module),
            import_operator: self.import_operator.or(lower.import_operator),
            export_operator: self.export_operator.or(lower.export_operator),
            ready_poll_ms: self.ready_poll_ms.or(lower.ready_poll_ms),
            ready_timeout_secs: self.ready_timeout_secs.or(lower.ready_timeout_secs),
            tool_timeout_secs: self.tool_timeout_secs.or(lower.tool_timeout_secs),
            arx_timeout_secs: self.arx_timeout_secs.or(lower.arx_timeout_secs),
            blender_args: self.blender_args.or(lower.blender_args),
            arx_args: self.arx_args.or(lower.arx_args),
        }
    }
}

/// Fully resolved harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HarnessConfig {
    pub fixture: PathBuf,
    pub working_file: PathBuf,
    pub asset_root: PathBuf,
    pub blender: PathBuf,
    pub arx_binary: PathBuf,
    pub log_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub level_id: u32,
    pub scene_name: String,
    pub addon_module: String,
    pub import_operator: String,
    pub export_operator: String,
    pub ready_poll: Duration,
    pub ready_timeout: Duration,
    pub tool_timeout: Duration,
    pub arx_timeout: Duration,
    pub blender_args: Vec<String>,
    pub arx_args: Vec<String>,
}

impl HarnessConfig {
    /// Apply defaults to `layer` and validate the result.
    pub fn resolve(layer: ConfigLayer) -> RtResult<Self> {
        let level_id = layer.level.unwrap_or(DEFAULT_LEVEL_ID);
        let asset_root = layer.asset_root.unwrap_or_else(|| PathBuf::from("arx-data"));
        let working_file = layer
            .working_file
            .unwrap_or_else(|| default_working_file(&asset_root, level_id));

        let config = Self {
            fixture: layer
                .fixture
                .unwrap_or_else(|| PathBuf::from("level-backup").join("fast.fts")),
            working_file,
            asset_root,
            blender: layer.blender.unwrap_or_else(|| PathBuf::from("blender")),
            arx_binary: layer.arx_binary.unwrap_or_else(|| PathBuf::from("arx")),
            log_path: layer.log.unwrap_or_else(|| PathBuf::from("roundtrip.log")),
            report_path: layer.report,
            level_id,
            scene_name: layer.scene.unwrap_or_else(|| default_scene_name(level_id)),
            addon_module: layer
                .addon_module
                .unwrap_or_else(|| DEFAULT_ADDON_MODULE.to_owned()),
            import_operator: layer
                .import_operator
                .unwrap_or_else(|| DEFAULT_IMPORT_OPERATOR.to_owned()),
            export_operator: layer
                .export_operator
                .unwrap_or_else(|| DEFAULT_EXPORT_OPERATOR.to_owned()),
            ready_poll: Duration::from_millis(layer.ready_poll_ms.unwrap_or(DEFAULT_READY_POLL_MS)),
            ready_timeout: Duration::from_secs(
                layer.ready_timeout_secs.unwrap_or(DEFAULT_READY_TIMEOUT_SECS),
            ),
            tool_timeout: Duration::from_secs(
                layer.tool_timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS),
            ),
            arx_timeout: Duration::from_secs(
                layer.arx_timeout_secs.unwrap_or(DEFAULT_CONSUMER_TIMEOUT_SECS),
            ),
            blender_args: layer.blender_args.unwrap_or_default(),
            arx_args: layer.arx_args.unwrap_or_else(default_arx_args),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RtResult<()> {
        if self.level_id > MAX_LEVEL_ID {
            return Err(RtError::InvalidConfig(format!(
                "level id {} is out of range (0..={MAX_LEVEL_ID})",
                self.level_id
            )));
        }
        if self.scene_name.trim().is_empty() {
            return Err(RtError::InvalidConfig("scene name is empty".to_owned()));
        }
        for (name, value) in [
            ("addon module", &self.addon_module),
            ("import operator", &self.import_operator),
            ("export operator", &self.export_operator),
        ] {
            if !is_python_dotted_name(value) {
                return Err(RtError::InvalidConfig(format!(
                    "{name} `{value}` is not a dotted python identifier"
                )));
            }
        }
        if !self.import_operator.contains('.') || !self.export_operator.contains('.') {
            return Err(RtError::InvalidConfig(
                "operator ids must have the form `category.name`".to_owned(),
            ));
        }
        if self.ready_poll.is_zero() {
            return Err(RtError::InvalidConfig("ready poll interval is zero".to_owned()));
        }
        if self.tool_timeout.is_zero() || self.arx_timeout.is_zero() {
            return Err(RtError::InvalidConfig("timeouts must be non-zero".to_owned()));
        }
        if self.ready_timeout >= self.tool_timeout {
            return Err(RtError::InvalidConfig(format!(
                "ready timeout ({}s) must be shorter than the tool timeout ({}s)",
                self.ready_timeout.as_secs(),
                self.tool_timeout.as_secs()
            )));
        }
        if self.fixture == self.working_file {
            return Err(RtError::InvalidConfig(
                "fixture and working file are the same path".to_owned(),
            ));
        }
        Ok(())
    }

    /// Game arguments with `{level}` expanded.
    #[must_use]
    pub fn expanded_arx_args(&self) -> Vec<String> {
        let level = format!("{:02}", self.level_id);
        self.arx_args
            .iter()
            .map(|arg| arg.replace(LEVEL_PLACEHOLDER, &level))
            .collect()
    }
}

#[must_use]
pub fn default_scene_name(level_id: u32) -> String {
    format!("Area_{level_id:02}")
}

#[must_use]
pub fn default_working_file(asset_root: &Path, level_id: u32) -> PathBuf {
    asset_root
        .join("game")
        .join("graph")
        .join("levels")
        .join(format!("level{level_id}"))
        .join("fast.fts")
}

fn default_arx_args() -> Vec<String> {
    ["--loadlevel", LEVEL_PLACEHOLDER, "-g", "--skiplogo", "--noclip"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn is_python_dotted_name(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
