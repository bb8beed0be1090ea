//! Restore, automate, validate.
//!
//! [`Harness::run`] is the whole pipeline. Only missing inputs are fatal;
//! once the working file has been restored, every stage failure is written to
//! the run log and the pipeline moves on.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::config::HarnessConfig;
use crate::error::{RtError, RtResult};
use crate::fixture::{self, RestoreReceipt};
use crate::level::{self, LevelComparison};
use crate::process::{self, BoundedOutput};
use crate::roundtrip::{self, RoundTripOutcome, RoundTripTrace};
use crate::run_log::RunLog;
use crate::script;

const STAGE_HARNESS: &str = "harness";
const STAGE_PRECHECK: &str = "precheck";
const STAGE_RESTORE: &str = "restore";
const STAGE_AUTOMATE: &str = "automate";
const STAGE_VALIDATE: &str = "validate";
const STAGE_COMPARE: &str = "compare";

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl From<&BoundedOutput> for ProcessSummary {
    fn from(output: &BoundedOutput) -> Self {
        Self {
            command: output.command.clone(),
            exit_code: output.exit_code(),
            timed_out: output.timed_out,
            elapsed_ms: process::saturating_duration_ms(output.elapsed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationResult {
    pub process: Option<ProcessSummary>,
    pub trace: RoundTripTrace,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub process: Option<ProcessSummary>,
    pub loaded: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at_rfc3339: String,
    pub finished_at_rfc3339: String,
    pub log_path: PathBuf,
    pub config: HarnessConfig,
    pub restore: RestoreReceipt,
    pub automation: AutomationResult,
    pub validation: ValidationResult,
    pub comparison: Option<LevelComparison>,
    pub comparison_error: Option<String>,
}

impl RunReport {
    #[must_use]
    pub fn outcome(&self) -> RoundTripOutcome {
        self.automation.trace.outcome
    }
}

pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline.
    ///
    /// Returns `Err` only for precondition failures, a failed restore, an
    /// unwritable log or report, and Ctrl+C.
    pub fn run(&self) -> RtResult<RunReport> {
        let started_at = Utc::now();
        let mut log = RunLog::create(&self.config.log_path)?;
        log.line(
            STAGE_HARNESS,
            &format!(
                "round trip of level {} (scene {}) started",
                self.config.level_id, self.config.scene_name
            ),
        )?;

        if let Err(error) = self.check_preconditions(&mut log) {
            log.line(STAGE_HARNESS, "aborted: required input missing")?;
            tracing::error!(code = error.error_code(), %error, "precondition failed");
            return Err(error);
        }

        let restore = match fixture::restore(&self.config.fixture, &self.config.working_file) {
            Ok(receipt) => {
                log.line(
                    STAGE_RESTORE,
                    &format!(
                        "{} -> {} ({} bytes, sha256 {})",
                        receipt.fixture.display(),
                        receipt.working_file.display(),
                        receipt.bytes,
                        receipt.sha256
                    ),
                )?;
                receipt
            }
            Err(error) => {
                log.error(STAGE_RESTORE, &error)?;
                log.line(STAGE_HARNESS, "aborted: working file could not be reset")?;
                return Err(error);
            }
        };

        let automation = self.automate(&mut log)?;
        let validation = self.validate(&mut log)?;

        let (comparison, comparison_error) =
            match level::compare(&self.config.fixture, &self.config.working_file) {
                Ok(comparison) => {
                    log.line(STAGE_COMPARE, &comparison.summary())?;
                    (Some(comparison), None)
                }
                Err(error) => {
                    log.error(STAGE_COMPARE, &error)?;
                    (None, Some(error.to_string()))
                }
            };

        let report = RunReport {
            started_at_rfc3339: started_at.to_rfc3339(),
            finished_at_rfc3339: Utc::now().to_rfc3339(),
            log_path: self.config.log_path.clone(),
            config: self.config.clone(),
            restore,
            automation,
            validation,
            comparison,
            comparison_error,
        };

        log.line(
            STAGE_HARNESS,
            &format!(
                "finished: round trip {}, level {}",
                report.outcome(),
                if report.validation.loaded {
                    "loaded"
                } else {
                    "did not load cleanly"
                }
            ),
        )?;

        if let Some(path) = &self.config.report_path {
            write_report(path, &report)?;
            log.line(STAGE_HARNESS, &format!("report written to {}", path.display()))?;
        }

        tracing::info!(
            outcome = %report.outcome(),
            loaded = report.validation.loaded,
            log = %log.path().display(),
            log_lines = log.line_count(),
            "round trip finished"
        );
        Ok(report)
    }

    /// Step A only: reset the working file. Only the fixture is required.
    pub fn restore_only(&self) -> RtResult<RestoreReceipt> {
        fixture::restore(&self.config.fixture, &self.config.working_file)
    }

    /// Check every required input, logging each result. Returns the first
    /// failure after all checks have been logged.
    pub fn check_preconditions(&self, log: &mut RunLog) -> RtResult<()> {
        let checks = [
            check_file("fixture file", &self.config.fixture),
            check_dir("asset root", &self.config.asset_root),
            check_tool_link(&self.config.blender),
            process::resolve_program(&self.config.arx_binary)
                .map_err(|_| RtError::precondition("arx binary", &self.config.arx_binary)),
        ];

        let mut first_error = None;
        for check in checks {
            match check {
                Ok(resolved) => {
                    log.line(STAGE_PRECHECK, &format!("ok: {}", resolved.display()))?;
                }
                Err(error) => {
                    log.line(STAGE_PRECHECK, &format!("missing: {error}"))?;
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn automate(&self, log: &mut RunLog) -> RtResult<AutomationResult> {
        let outcome = self.run_blender(log);
        match outcome {
            Ok((output, trace)) => {
                if output.timed_out {
                    log.line(
                        STAGE_AUTOMATE,
                        &format!(
                            "blender killed after {}s without exiting",
                            self.config.tool_timeout.as_secs()
                        ),
                    )?;
                }
                for transition in &trace.transitions {
                    log.line(
                        STAGE_AUTOMATE,
                        &format!(
                            "state {} -> {} on {}",
                            transition.from,
                            transition.to,
                            transition.event.as_str()
                        ),
                    )?;
                }
                for anomaly in &trace.anomalies {
                    log.line(STAGE_AUTOMATE, &format!("out-of-order marker {anomaly}"))?;
                }
                log.line(STAGE_AUTOMATE, &format!("round trip {}", trace.outcome))?;
                if !trace.outcome.exported() {
                    log.line(
                        STAGE_AUTOMATE,
                        "no completed export recorded; the working file may still hold the fixture",
                    )?;
                }
                Ok(AutomationResult {
                    process: Some(ProcessSummary::from(&output)),
                    trace,
                    error: output.check().err().map(|e| e.to_string()),
                })
            }
            Err(error) if error.is_fatal() => {
                log.error(STAGE_AUTOMATE, &error)?;
                Err(error)
            }
            Err(error) => {
                log.error(STAGE_AUTOMATE, &error)?;
                let trace = roundtrip::replay("");
                log.line(STAGE_AUTOMATE, &format!("round trip {}", trace.outcome))?;
                Ok(AutomationResult {
                    process: None,
                    trace,
                    error: Some(error.to_string()),
                })
            }
        }
    }

    fn run_blender(&self, log: &mut RunLog) -> RtResult<(BoundedOutput, RoundTripTrace)> {
        let source = script::render(&self.config)?;
        let script_file = script::write_temp(&source)?;
        let args = script::blender_args(&self.config, script_file.path());
        log.line(
            STAGE_AUTOMATE,
            &format!(
                "launching {}",
                process::render_command(&self.config.blender, &args)
            ),
        )?;

        let output = process::run_bounded(&self.config.blender, &args, None, self.config.tool_timeout)?;
        let stdout = output.stdout_lossy();
        log.capture(STAGE_AUTOMATE, "stdout", &stdout)?;
        log.capture(STAGE_AUTOMATE, "stderr", &output.stderr_lossy())?;
        let trace = roundtrip::replay(&stdout);
        Ok((output, trace))
    }

    fn validate(&self, log: &mut RunLog) -> RtResult<ValidationResult> {
        let args = self.config.expanded_arx_args();
        let cwd = self
            .config
            .arx_binary
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        log.line(
            STAGE_VALIDATE,
            &format!(
                "launching {} (limit {}s)",
                process::render_command(&self.config.arx_binary, &args),
                self.config.arx_timeout.as_secs()
            ),
        )?;

        match process::run_bounded(&self.config.arx_binary, &args, cwd, self.config.arx_timeout) {
            Ok(output) => {
                log.capture(STAGE_VALIDATE, "stdout", &output.stdout_lossy())?;
                log.capture(STAGE_VALIDATE, "stderr", &output.stderr_lossy())?;
                let error = output.check().err();
                match &error {
                    Some(error) => log.line(STAGE_VALIDATE, &format!("non-fatal: {error}"))?,
                    None => log.line(STAGE_VALIDATE, "arx exited cleanly")?,
                }
                Ok(ValidationResult {
                    process: Some(ProcessSummary::from(&output)),
                    loaded: output.succeeded(),
                    error: error.map(|e| e.to_string()),
                })
            }
            Err(error) if error.is_fatal() => {
                log.error(STAGE_VALIDATE, &error)?;
                Err(error)
            }
            Err(error) => {
                log.error(STAGE_VALIDATE, &error)?;
                Ok(ValidationResult {
                    process: None,
                    loaded: false,
                    error: Some(error.to_string()),
                })
            }
        }
    }
}

fn check_file(what: &str, path: &Path) -> RtResult<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(RtError::precondition(what, path))
    }
}

fn check_dir(what: &str, path: &Path) -> RtResult<PathBuf> {
    if path.is_dir() {
        Ok(path.to_path_buf())
    } else {
        Err(RtError::precondition(what, path))
    }
}

/// The Blender path is normally a symlink into a versioned install; it must
/// resolve to an executable. Plain executables and `PATH` names are accepted.
fn check_tool_link(path: &Path) -> RtResult<PathBuf> {
    let is_symlink = fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink());
    if is_symlink {
        let target =
            fs::canonicalize(path).map_err(|_| RtError::precondition("blender symlink target", path))?;
        return process::resolve_program(&target)
            .map_err(|_| RtError::precondition("blender executable", &target));
    }
    process::resolve_program(path).map_err(|_| RtError::precondition("blender executable", path))
}

fn write_report(path: &Path, report: &RunReport) -> RtResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}
