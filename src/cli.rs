use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::config::{ConfigLayer, HarnessConfig};
use crate::error::{RtError, RtResult};

/// Global flag indicating that a shutdown signal has been received.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Coordinates Ctrl+C handling.
///
/// The signal handler only flips a global flag; the subprocess poll loop in
/// [`crate::process`] checks it, kills the running child and unwinds with
/// [`RtError::Cancelled`].
pub struct ShutdownController;

impl ShutdownController {
    /// Install the Ctrl+C handler. Failure is non-fatal; callers log it.
    pub fn install() -> RtResult<()> {
        ctrlc::set_handler(|| {
            Self::trigger_shutdown();
            tracing::info!("shutdown signal received (Ctrl+C)");
        })
        .map_err(|e| RtError::Io(std::io::Error::other(format!("ctrlc handler: {e}"))))?;
        Ok(())
    }

    #[must_use]
    pub fn is_shutting_down() -> bool {
        SHUTDOWN_FLAG.load(Ordering::SeqCst)
    }

    /// Raise the shutdown flag without a signal. The running subprocess, if
    /// any, is killed at its next poll.
    pub fn trigger_shutdown() {
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    }

    /// The exit code the binary uses when interrupted.
    #[must_use]
    pub const fn signal_exit_code() -> i32 {
        130 // 128 + SIGINT(2)
    }
}

#[derive(Debug, Parser)]
#[command(name = "arx-roundtrip", version)]
#[command(about = "Restore a level fixture, round-trip it through Blender and load it in Arx")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Raise diagnostic verbosity (-v debug, -vv trace). `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

impl Cli {
    /// The subcommand to execute; a bare invocation runs the full pipeline.
    #[must_use]
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Run(self.run))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Restore, automate and validate (the default).
    Run(RunArgs),
    /// Only reset the working file from the fixture.
    Restore(RunArgs),
    /// Print the Blender automation script that `run` would use.
    Script(RunArgs),
    /// Print the container header of a level file as JSON.
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// JSON config file; flags and environment variables override it.
    #[arg(long, env = "ARX_RT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub layer: ConfigLayer,
}

impl RunArgs {
    pub fn resolve(&self) -> RtResult<HarnessConfig> {
        let file_layer = match &self.config {
            Some(path) => ConfigLayer::from_json_file(path).map_err(|error| match error {
                RtError::Io(io) => {
                    RtError::InvalidConfig(format!("cannot read {}: {io}", path.display()))
                }
                other => other,
            })?,
            None => ConfigLayer::default(),
        };
        HarnessConfig::resolve(self.layer.clone().or(file_layer))
    }
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    /// Level container to inspect.
    pub file: PathBuf,

    /// Also compare against this reference container.
    #[arg(long)]
    pub against: Option<PathBuf>,
}
