//! Build progress reporting.
//!
//! The builder calls a [`ProgressReporter`] synchronously before and after
//! each document. Reporters must be cheap and must not block; a caller that
//! wants progress on another task wraps the build in its own task and
//! forwards events over a channel from inside the reporter.
//!
//! Human and JSON reporters write to **stderr** so stdout stays parseable.

use serde::Serialize;
use std::io::Write;

/// Phase of a build run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPhase {
    /// Clearing the index or computing staleness. Total may still be zero.
    Preparing,
    /// Extracting document `current` of `total`.
    Extracting,
    /// Committing and writing bookkeeping.
    Updating,
    Complete,
}

impl BuildPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildPhase::Preparing => "preparing",
            BuildPhase::Extracting => "extracting",
            BuildPhase::Updating => "updating",
            BuildPhase::Complete => "complete",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildProgress {
    pub phase: BuildPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
    /// Number of documents that failed so far.
    pub errors: usize,
}

/// Receives progress events from the builder.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &BuildProgress);
}

/// Any `Fn(&BuildProgress)` closure is a reporter.
impl<F> ProgressReporter for F
where
    F: Fn(&BuildProgress) + Send + Sync,
{
    fn report(&self, progress: &BuildProgress) {
        self(progress)
    }
}

/// Human-friendly progress on stderr: "extracting  12 / 340  poems/harbor.docx".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, progress: &BuildProgress) {
        let mut line = format!(
            "{:<11} {} / {}",
            progress.phase.as_str(),
            format_number(progress.current as u64),
            format_number(progress.total as u64)
        );
        if let Some(file) = &progress.current_file {
            line.push_str("  ");
            line.push_str(file);
        }
        if progress.errors > 0 {
            line.push_str(&format!("  ({} failed)", progress.errors));
        }
        line.push('\n');
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, progress: &BuildProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "progress": progress,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: &BuildProgress) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
