//! Read-only view over a repository snapshot.
//!
//! The scanner that produces these values lives outside this crate; the
//! panel only consumes the file list for prompt context and evidence
//! verification. A snapshot is owned by the caller and borrowed for the
//! duration of one pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker appended by scanners when a file's content was cut off at the
/// loader's size limit. Kept here so prompt builders and scanners agree.
pub const CONTENT_TRUNCATED_MARKER: &str = "\n[TRUNCATED]";

/// How many file paths the repository header block lists before eliding.
const SUMMARY_FILE_LIMIT: usize = 50;

/// Max matched files embedded per related-file pattern.
const RELATED_FILES_PER_PATTERN: usize = 10;

// ── File entry ───────────────────────────────────────────────────

/// One file (or directory) in a repository snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Path relative to the snapshot root.
    pub path: String,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Whether this entry is a directory.
    pub is_directory: bool,
    /// Full content, if the scanner loaded it. Lazily populated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Last modification time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileEntry {
    /// A plain file entry without content.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            is_directory: false,
            content: None,
            last_modified: None,
        }
    }
}

// ── Repo snapshot ────────────────────────────────────────────────

/// Immutable snapshot of a repository at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSnapshot {
    /// Root path the scan started from.
    pub root: String,
    /// Scanned entries.
    pub files: Vec<FileEntry>,
    /// When the scan happened.
    pub scanned_at: DateTime<Utc>,
}

impl RepoSnapshot {
    /// Snapshot with no files (question-only analysis).
    pub fn empty(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            files: Vec::new(),
            scanned_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of non-directory entries.
    pub fn file_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_directory).count()
    }

    /// Repository header block embedded at the top of panel prompts:
    /// root, counts, and the first [`SUMMARY_FILE_LIMIT`] paths.
    pub fn summary_block(&self) -> String {
        let mut block = format!(
            "=== REPOSITORY SNAPSHOT ===\nRoot: {}\nFiles scanned: {}\nScanned at: {}\n",
            self.root,
            self.files.len(),
            self.scanned_at.to_rfc3339(),
        );
        if !self.files.is_empty() {
            block.push_str("\nFile list (first 50):\n");
            for f in self.files.iter().take(SUMMARY_FILE_LIMIT) {
                if f.is_directory {
                    block.push_str(&format!("  - {} (DIR)\n", f.path));
                } else {
                    block.push_str(&format!("  - {} ({} bytes)\n", f.path, f.size));
                }
            }
            if self.files.len() > SUMMARY_FILE_LIMIT {
                block.push_str(&format!(
                    "... and {} more files\n",
                    self.files.len() - SUMMARY_FILE_LIMIT
                ));
            }
        }
        block
    }

    /// Full-content block for files matching the request's related-file
    /// patterns. Matching is loose by design: a pattern matches when the
    /// path contains it or it contains the path.
    pub fn related_files_block(&self, patterns: &[String]) -> String {
        if patterns.is_empty() {
            return String::new();
        }
        let mut block = String::from("\n=== RELATED FILES (FULL CONTENT) ===\n");
        let mut any = false;
        for pattern in patterns {
            let matches = self
                .files
                .iter()
                .filter(|f| f.path.contains(pattern.as_str()) || pattern.contains(&f.path))
                .take(RELATED_FILES_PER_PATTERN);
            for file in matches {
                if let (false, Some(content)) = (file.is_directory, file.content.as_deref()) {
                    block.push_str(&format!("\n--- FILE: {} ---\n{}\n", file.path, content));
                    any = true;
                }
            }
        }
        if any {
            block
        } else {
            String::new()
        }
    }
}
