//! Directory discovery.
//!
//! Walks a root directory and produces [`SourceDocument`]s for the pipeline.
//! Skip patterns are compiled into a single glob set; hidden path components
//! are skipped by default. Output is sorted by relative path so runs are
//! deterministic.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::extract::detect_media_type;
use crate::models::SourceDocument;

/// Patterns always excluded, merged with configured ones: build artifacts,
/// VCS metadata, dependency trees, logs and temp files.
const DEFAULT_SKIP_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/.svn/**",
    "**/target/**",
    "**/node_modules/**",
    "**/__pycache__/**",
    "**/venv/**",
    "**/.venv/**",
    "**/*.pyc",
    "**/*.so",
    "**/*.dll",
    "**/*.dylib",
    "**/*.exe",
    "**/*.log",
    "**/*.tmp",
];

/// Scan `root` recursively for files to ingest.
pub fn scan_directory(config: &ScanConfig, root: &Path) -> Result<Vec<SourceDocument>> {
    if !root.exists() {
        bail!("Scan root does not exist: {}", root.display());
    }
    if !root.is_dir() {
        bail!("Scan root is not a directory: {}", root.display());
    }

    let mut patterns: Vec<String> = DEFAULT_SKIP_PATTERNS
        .iter()
        .map(|s| s.to_string())
        .collect();
    patterns.extend(config.skip_patterns.clone());
    let skip_set = build_globset(&patterns)?;

    let extensions: Option<Vec<String>> = config
        .extensions
        .as_ref()
        .map(|exts| exts.iter().map(|e| e.to_lowercase()).collect());

    let mut documents = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if config.skip_hidden && has_hidden_component(relative) {
            tracing::debug!(path = %rel_str, "skipping hidden path");
            continue;
        }

        if skip_set.is_match(&rel_str) {
            tracing::debug!(path = %rel_str, "skipping excluded path");
            continue;
        }

        if let Some(ref allowed) = extensions {
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            if !allowed.contains(&ext) {
                continue;
            }
        }

        let size = entry.metadata()?.len();

        documents.push(SourceDocument {
            path: path.to_path_buf(),
            relative_path: rel_str,
            size,
            media_type: detect_media_type(path),
        });
    }

    documents.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    tracing::info!(root = %root.display(), files = documents.len(), "scan complete");
    Ok(documents)
}

fn has_hidden_component(relative: &Path) -> bool {
    relative.components().any(|c| {
        c.as_os_str()
            .to_string_lossy()
            .starts_with('.')
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scan(config: &ScanConfig, root: &Path) -> Vec<String> {
        scan_directory(config, root)
            .unwrap()
            .into_iter()
            .map(|d| d.relative_path)
            .collect()
    }

    #[test]
    fn finds_files_sorted() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("b.md"), "beta").unwrap();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.txt"), "gamma").unwrap();

        let found = scan(&ScanConfig::default(), tmp.path());
        assert_eq!(found, vec!["a.md", "b.md", "sub/c.txt"]);
    }

    #[test]
    fn skips_hidden_and_default_patterns() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.md"), "keep").unwrap();
        fs::write(tmp.path().join(".hidden"), "no").unwrap();
        fs::create_dir(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join(".git/config"), "no").unwrap();
        fs::create_dir(tmp.path().join("node_modules")).unwrap();
        fs::write(tmp.path().join("node_modules/pkg.js"), "no").unwrap();
        fs::write(tmp.path().join("build.log"), "no").unwrap();

        let found = scan(&ScanConfig::default(), tmp.path());
        assert_eq!(found, vec!["keep.md"]);
    }

    #[test]
    fn custom_skip_patterns() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.md"), "keep").unwrap();
        fs::write(tmp.path().join("drop.bak"), "no").unwrap();

        let config = ScanConfig {
            skip_patterns: vec!["**/*.bak".to_string()],
            ..Default::default()
        };
        let found = scan(&config, tmp.path());
        assert_eq!(found, vec!["keep.md"]);
    }

    #[test]
    fn extension_filter() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("doc.md"), "md").unwrap();
        fs::write(tmp.path().join("code.rs"), "rs").unwrap();

        let config = ScanConfig {
            extensions: Some(vec![".md".to_string()]),
            ..Default::default()
        };
        let found = scan(&config, tmp.path());
        assert_eq!(found, vec!["doc.md"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("nope");
        assert!(scan_directory(&ScanConfig::default(), &gone).is_err());
    }

    #[test]
    fn records_size_and_media_type() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("doc.md"), "12345").unwrap();

        let docs = scan_directory(&ScanConfig::default(), tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].size, 5);
        assert_eq!(docs[0].media_type, "text/markdown");
    }
}
