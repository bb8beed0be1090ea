//! The per-run text log shared by every stage.
//!
//! Opening truncates the file, so each invocation starts from an empty log.
//! After that the log is append-only: every line is written and flushed as it
//! is produced, prefixed with a timestamp and the stage tag.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::error::RtResult;

pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl RunLog {
    /// Create or truncate the log at `path`, creating parent directories.
    pub fn create(path: &Path) -> RtResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines written since the log was opened.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines
    }

    /// Append one tagged line.
    pub fn line(&mut self, stage: &str, text: &str) -> RtResult<()> {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        for part in split_lines(text) {
            writeln!(self.writer, "{ts} [{stage}] {part}")?;
            self.lines += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Append captured subprocess output under `stage`, one log line per
    /// output line, with `stream` (`stdout`/`stderr`) in the tag.
    pub fn capture(&mut self, stage: &str, stream: &str, output: &str) -> RtResult<()> {
        if output.trim().is_empty() {
            return Ok(());
        }
        let tag = format!("{stage}:{stream}");
        self.line(&tag, output.trim_end())
    }

    /// Log a caught error with its source chain.
    pub fn error(&mut self, stage: &str, error: &dyn std::error::Error) -> RtResult<()> {
        self.line(stage, &format!("error: {error}"))?;
        let mut source = error.source();
        while let Some(cause) = source {
            self.line(stage, &format!("  caused by: {cause}"))?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Lines of `text`; an empty text still yields one empty line.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let empty = text.lines().next().is_none();
    text.lines().chain(empty.then_some(""))
}
