//! Evidence verification.
//!
//! Models fabricate file paths. Every evidence citation in a final report
//! is checked against the active repository snapshot; paths that do not
//! resolve get their reasoning annotated and counted, and the report gains
//! a warning note. `[EXTERNAL:<agent>]/...` references go through the same
//! matching: merged snapshots carry other agents' outputs under that
//! prefix, and a fabricated external reference is still a fabrication.

use crate::normalize::NOT_VERIFIED_MARKER;
use crate::report::Report;
use crate::snapshot::RepoSnapshot;

/// Whether evidence checking ran for a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceMode {
    /// A snapshot was available and every citation was checked.
    On,
    /// No repository snapshot; citations pass through unchecked.
    NoRepo,
}

/// Outcome of a verification pass.
#[derive(Debug)]
pub struct Verification {
    pub hallucination_count: usize,
    pub evidence_mode: EvidenceMode,
}

/// Check every evidence path in `report` against `snapshot`, annotating
/// unverified citations in place.
pub fn verify(report: &mut Report, snapshot: &RepoSnapshot) -> Verification {
    if snapshot.is_empty() {
        return Verification {
            hallucination_count: 0,
            evidence_mode: EvidenceMode::NoRepo,
        };
    }

    let mut unverified = 0usize;
    for finding in &mut report.findings {
        for evidence in &mut finding.evidence {
            let raw = evidence.file_path.trim();
            if raw.is_empty() {
                continue;
            }
            let path = strip_line_suffix(raw);
            if !path_in_snapshot(path, snapshot) {
                unverified += 1;
                if !evidence.reasoning.ends_with(NOT_VERIFIED_MARKER) {
                    evidence.reasoning.push_str(NOT_VERIFIED_MARKER);
                }
            }
        }
    }

    if unverified > 0 {
        tracing::warn!(count = unverified, "Evidence citations failed verification");
        let warning = format!("[WARNING: {unverified} file path(s) not verified in repository]");
        // Reports can be verified more than once (lead draft, then final).
        if !report.notes.as_deref().unwrap_or("").contains(&warning) {
            report.append_note(&warning);
        }
    }

    Verification {
        hallucination_count: unverified,
        evidence_mode: EvidenceMode::On,
    }
}

/// Drop a trailing `:line` or `:start-end` suffix from a citation path.
fn strip_line_suffix(path: &str) -> &str {
    if let Some(idx) = path.rfind(':') {
        let suffix = &path[idx + 1..];
        let is_range = !suffix.is_empty()
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-');
        if is_range {
            return &path[..idx];
        }
    }
    path
}

/// A citation matches when it equals a snapshot path exactly, or when
/// either side is a path-segment suffix of the other. Models cite paths
/// relative to directories the snapshot may root differently.
fn path_in_snapshot(cited: &str, snapshot: &RepoSnapshot) -> bool {
    let cited = cited.trim_start_matches("./").trim_start_matches('/');
    if cited.is_empty() {
        return false;
    }
    snapshot.files.iter().any(|entry| {
        let known = entry.path.trim_start_matches("./").trim_start_matches('/');
        known == cited || is_segment_suffix(known, cited) || is_segment_suffix(cited, known)
    })
}

/// True when `suffix` matches whole trailing path segments of `full`.
fn is_segment_suffix(full: &str, suffix: &str) -> bool {
    full.len() > suffix.len()
        && full.ends_with(suffix)
        && full.as_bytes()[full.len() - suffix.len() - 1] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AnalysisMode, Evidence, Finding, Report};
    use crate::snapshot::{FileEntry, RepoSnapshot};
    use chrono::Utc;

    fn snapshot() -> RepoSnapshot {
        RepoSnapshot {
            root: "/repo".into(),
            files: vec![
                FileEntry::file("src/ingest/worker.rs", 2048),
                FileEntry::file("src/main.rs", 512),
                FileEntry::file("config/pipeline.toml", 128),
            ],
            scanned_at: Utc::now(),
        }
    }

    fn report_with_paths(paths: &[&str]) -> Report {
        let mut report = Report::skeleton(AnalysisMode::PipelineDiagnosis, "q");
        report.findings.push(Finding {
            id: "f1".into(),
            title: "t".into(),
            evidence: paths
                .iter()
                .map(|p| Evidence {
                    file_path: p.to_string(),
                    snippet: "…".into(),
                    reasoning: "cited".into(),
                })
                .collect(),
            severity: 5,
            ..Finding::default()
        });
        report
    }

    #[test]
    fn exact_and_line_suffixed_paths_verify() {
        let mut report = report_with_paths(&["src/main.rs", "src/ingest/worker.rs:10-20"]);
        let v = verify(&mut report, &snapshot());
        assert_eq!(v.hallucination_count, 0);
        assert_eq!(v.evidence_mode, EvidenceMode::On);
        assert!(report.notes.is_none());
    }

    #[test]
    fn segment_suffix_matches_both_ways() {
        // Model cites a shorter tail of a known path.
        let mut report = report_with_paths(&["ingest/worker.rs"]);
        assert_eq!(verify(&mut report, &snapshot()).hallucination_count, 0);
        // Model cites a longer rooted variant of a known path.
        let mut report = report_with_paths(&["repo-checkout/src/main.rs"]);
        assert_eq!(verify(&mut report, &snapshot()).hallucination_count, 0);
    }

    #[test]
    fn fabricated_path_is_annotated_and_counted() {
        let mut report = report_with_paths(&["src/ghost.rs", "src/main.rs"]);
        let v = verify(&mut report, &snapshot());
        assert_eq!(v.hallucination_count, 1);
        let evidence = &report.findings[0].evidence;
        assert!(evidence[0].reasoning.ends_with(NOT_VERIFIED_MARKER));
        assert!(!evidence[1].reasoning.contains("NOT VERIFIED"));
        assert_eq!(
            report.notes.as_deref(),
            Some("[WARNING: 1 file path(s) not verified in repository]")
        );
    }

    #[test]
    fn external_refs_face_the_same_matching() {
        // Present in the snapshot (merged agent outputs): verifies.
        let mut snap = snapshot();
        snap.files
            .push(FileEntry::file("[EXTERNAL:risk_forecaster]/window-1", 64));
        let mut report = report_with_paths(&["[EXTERNAL:risk_forecaster]/window-1"]);
        assert_eq!(verify(&mut report, &snap).hallucination_count, 0);

        // Fabricated external reference: counted like any other ghost path.
        let mut report = report_with_paths(&["[EXTERNAL:oracle]/made-up"]);
        let v = verify(&mut report, &snapshot());
        assert_eq!(v.hallucination_count, 1);
        assert!(report.findings[0].evidence[0]
            .reasoning
            .ends_with(NOT_VERIFIED_MARKER));
    }

    #[test]
    fn empty_snapshot_skips_verification() {
        let mut report = report_with_paths(&["src/ghost.rs"]);
        let v = verify(&mut report, &RepoSnapshot::empty("/repo"));
        assert_eq!(v.evidence_mode, EvidenceMode::NoRepo);
        assert_eq!(v.hallucination_count, 0);
        assert!(!report.findings[0].evidence[0].reasoning.contains("NOT VERIFIED"));
    }

    #[test]
    fn annotation_is_idempotent() {
        let mut report = report_with_paths(&["src/ghost.rs"]);
        verify(&mut report, &snapshot());
        verify(&mut report, &snapshot());
        let reasoning = &report.findings[0].evidence[0].reasoning;
        assert_eq!(reasoning.matches("NOT VERIFIED").count(), 1);
        assert_eq!(
            report.notes.as_deref().unwrap().matches("[WARNING:").count(),
            1
        );
    }

    #[test]
    fn suffix_stripping_only_removes_line_ranges() {
        assert_eq!(strip_line_suffix("a/b.rs:10"), "a/b.rs");
        assert_eq!(strip_line_suffix("a/b.rs:10-20"), "a/b.rs");
        assert_eq!(strip_line_suffix("a/b.rs"), "a/b.rs");
        // Windows-ish or odd colons stay untouched.
        assert_eq!(strip_line_suffix("c:/repo/a.rs"), "c:/repo/a.rs");
    }
}
