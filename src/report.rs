//! Run statistics and the end-of-run report.
//!
//! The pipeline accumulates a [`RunStats`] record and hands it to the CLI
//! layer, which prints a summary and optionally writes a markdown or JSON
//! report file.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::OutputConfig;

/// One failed file and why.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

/// End-of-run statistics record.
#[derive(Debug, Default, Serialize)]
pub struct RunStats {
    pub files_total: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub chunks_created: usize,
    /// Chunks removed by validation (too small or degenerate).
    pub chunks_dropped: usize,
    /// Chunks excluded after embedding failure isolation.
    pub chunks_failed: usize,
    pub bytes_scanned: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub failures: Vec<FileFailure>,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RunStats {
    pub fn record_failure(&mut self, path: &str, reason: impl Into<String>) {
        self.files_failed += 1;
        self.failures.push(FileFailure {
            path: path.to_string(),
            reason: reason.into(),
        });
    }

    pub fn success_rate(&self) -> f64 {
        if self.files_total == 0 {
            return 0.0;
        }
        (self.files_processed as f64 / self.files_total as f64) * 100.0
    }
}

/// Print the run summary to stdout.
pub fn print_summary(stats: &RunStats) {
    println!();
    println!("ragsync — run complete");
    println!("======================");
    println!();
    println!("  Files:       {}", stats.files_total);
    println!("  Processed:   {}", stats.files_processed);
    println!("  Skipped:     {} (unchanged)", stats.files_skipped);
    println!("  Failed:      {}", stats.files_failed);
    println!("  Chunks:      {}", stats.chunks_created);
    if stats.chunks_dropped > 0 {
        println!("  Dropped:     {} (validation)", stats.chunks_dropped);
    }
    if stats.chunks_failed > 0 {
        println!("  Chunk fails: {} (embedding)", stats.chunks_failed);
    }
    println!("  Data:        {}", format_bytes(stats.bytes_scanned));
    println!("  Duration:    {:.1}s", stats.duration.as_secs_f64());
    println!("  Success:     {:.1}%", stats.success_rate());

    if !stats.failures.is_empty() {
        println!();
        println!("  Failed files:");
        for failure in &stats.failures {
            println!("    {} — {}", failure.path, failure.reason);
        }
    }
    println!();
}

/// Write the report file when `output.report_path` is configured.
pub fn write_report(stats: &RunStats, config: &OutputConfig) -> Result<()> {
    let Some(ref path) = config.report_path else {
        return Ok(());
    };

    let content = match config.report_format.as_str() {
        "json" => serde_json::to_string_pretty(stats)?,
        _ => render_markdown(stats),
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}

fn render_markdown(stats: &RunStats) -> String {
    let mut out = String::new();
    out.push_str("# Ingestion Report\n\n");
    out.push_str("## Summary\n");
    out.push_str(&format!(
        "- **Duration**: {:.1} seconds\n",
        stats.duration.as_secs_f64()
    ));
    out.push_str(&format!(
        "- **Success rate**: {:.1}%\n\n",
        stats.success_rate()
    ));
    out.push_str("## Statistics\n");
    out.push_str(&format!("- **Total files**: {}\n", stats.files_total));
    out.push_str(&format!("- **Processed**: {}\n", stats.files_processed));
    out.push_str(&format!(
        "- **Skipped (unchanged)**: {}\n",
        stats.files_skipped
    ));
    out.push_str(&format!("- **Failed**: {}\n", stats.files_failed));
    out.push_str(&format!("- **Chunks created**: {}\n", stats.chunks_created));
    out.push_str(&format!(
        "- **Chunks dropped**: {}\n",
        stats.chunks_dropped
    ));
    out.push_str(&format!(
        "- **Data scanned**: {}\n",
        format_bytes(stats.bytes_scanned)
    ));

    if !stats.failures.is_empty() {
        out.push_str("\n## Failed files\n");
        for failure in &stats.failures {
            out.push_str(&format!("- `{}`: {}\n", failure.path, failure.reason));
        }
    }

    out
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
