//! Per-file progress reporting.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for scripts.
//! The human reporter prints one line per phase transition; the JSON
//! reporter emits one object per line for tooling. Mode defaults to human
//! when stderr is a TTY, off otherwise.

use std::io::Write;
use std::path::Path;

/// Pipeline phase of the file currently in flight.
#[derive(Clone, Debug, PartialEq)]
pub enum FilePhase {
    Hashing,
    SkippedUnchanged,
    Extracting,
    Chunking,
    Embedding { chunks: usize },
    Uploading { points: usize },
    Done { chunks: usize },
    Failed { reason: String },
}

impl FilePhase {
    fn label(&self) -> &'static str {
        match self {
            FilePhase::Hashing => "hashing",
            FilePhase::SkippedUnchanged => "skipped",
            FilePhase::Extracting => "extracting",
            FilePhase::Chunking => "chunking",
            FilePhase::Embedding { .. } => "embedding",
            FilePhase::Uploading { .. } => "uploading",
            FilePhase::Done { .. } => "done",
            FilePhase::Failed { .. } => "failed",
        }
    }
}

/// Reports per-file progress. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    /// Emit a phase transition for file `n` of `total`.
    fn report(&self, path: &Path, n: u64, total: u64, phase: &FilePhase);
}

/// Human-friendly lines: `[12/340] docs/guide.md  embedding (5 chunks)`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, path: &Path, n: u64, total: u64, phase: &FilePhase) {
        let detail = match phase {
            FilePhase::Embedding { chunks } => format!(" ({} chunks)", chunks),
            FilePhase::Uploading { points } => format!(" ({} points)", points),
            FilePhase::Done { chunks } => format!(" ({} chunks)", chunks),
            FilePhase::Failed { reason } => format!(": {}", reason),
            _ => String::new(),
        };
        let line = format!(
            "[{}/{}] {}  {}{}\n",
            n,
            total,
            path.display(),
            phase.label(),
            detail
        );
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, path: &Path, n: u64, total: u64, phase: &FilePhase) {
        let mut obj = serde_json::json!({
            "event": "progress",
            "path": path.display().to_string(),
            "n": n,
            "total": total,
            "phase": phase.label(),
        });
        match phase {
            FilePhase::Embedding { chunks } | FilePhase::Done { chunks } => {
                obj["chunks"] = serde_json::json!(chunks);
            }
            FilePhase::Uploading { points } => {
                obj["points"] = serde_json::json!(points);
            }
            FilePhase::Failed { reason } => {
                obj["reason"] = serde_json::json!(reason);
            }
            _ => {}
        }
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
    fn report(&self, _path: &Path, _n: u64, _total: u64, _phase: &FilePhase) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_labels() {
        assert_eq!(FilePhase::Hashing.label(), "hashing");
        assert_eq!(FilePhase::Embedding { chunks: 3 }.label(), "embedding");
        assert_eq!(
            FilePhase::Failed {
                reason: "x".to_string()
            }
            .label(),
            "failed"
        );
    }

    #[test]
    fn noop_reporter_accepts_all_phases() {
        let reporter = NoProgress;
        reporter.report(Path::new("a.md"), 1, 2, &FilePhase::Hashing);
        reporter.report(
            Path::new("a.md"),
            1,
            2,
            &FilePhase::Done { chunks: 4 },
        );
    }
}
