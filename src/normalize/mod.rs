//! Output normalization.
//!
//! Models are asked for strict JSON but routinely return markdown-wrapped,
//! truncated, or outright free-form text. This module turns any string into
//! a validated [`Report`] through an explicit ordered list of pure parse
//! strategies composed by a first-success combinator:
//!
//! 1. strict JSON over the whole text;
//! 2. the first fenced code block that parses as JSON;
//! 3. balanced `{...}` substrings, longest first (truncated blocks tend to
//!    be the shorter ones);
//! 4. heuristic section-header parsing of markdown-ish prose;
//! 5. a minimal synthesized report when nothing else yields anything.
//!
//! [`normalize`] runs the whole cascade and never fails. [`try_parse_report`]
//! exposes steps 1-3 so the synthesize stage can distinguish "structured
//! output" from "needs its own fallback". Every numeric field is clamped to
//! its declared range regardless of which path produced it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::report::{
    clamp_score, clamp_severity, generated_id, AnalysisRequest, Difficulty, Evidence, Finding,
    ImpactArea, Metadata, Recommendation, Report, ReviewDraft,
};

/// Marker appended to `reasoning` of evidence that failed verification.
/// Lives here with the other report-shaping constants; applied in
/// [`crate::verify`].
pub const NOT_VERIFIED_MARKER: &str = " [NOT VERIFIED IN REPOSITORY]";

/// Caps for heuristically extracted items.
const MAX_HEURISTIC_FINDINGS: usize = 20;
const MAX_HEURISTIC_RECOMMENDATIONS: usize = 15;

/// How much raw output the minimal fallback report preserves in `notes`.
const RAW_NOTES_CHARS: usize = 500;

// ── Public API ───────────────────────────────────────────────────

/// Best-effort normalization of arbitrary model text into a report.
/// Never fails: the worst case is the step-5 minimal report.
pub fn normalize(raw: &str, request: &AnalysisRequest) -> Report {
    if let Some(report) = try_parse_report(raw, request) {
        return report;
    }

    let heuristic = heuristic_report(raw, request);
    let empty = heuristic.summary.trim().is_empty()
        && heuristic.findings.is_empty()
        && heuristic.recommendations.is_empty();
    if !empty {
        tracing::debug!(mode = %request.mode, "Normalized via heuristic section parsing");
        return heuristic;
    }

    minimal_report(raw, request)
}

/// Structured parse only (cascade steps 1-3). `None` means the text holds
/// no recognizable report JSON; callers decide their own fallback.
pub fn try_parse_report(raw: &str, request: &AnalysisRequest) -> Option<Report> {
    let value = extract_report_value(raw)?;
    Some(report_from_value(&value, request))
}

/// Parse the reviewer stage's critique. Uses the same JSON-extraction
/// steps as report parsing; shape is recognized by a `reviewSummary`,
/// `issues`, or `patch` field.
pub fn parse_review_draft(raw: &str) -> Option<ReviewDraft> {
    let value = extract_json_value(raw, |v| {
        v.get("reviewSummary").is_some() || v.get("issues").is_some() || v.get("patch").is_some()
    })?;
    let mut draft: ReviewDraft = serde_json::from_value(value).ok()?;
    for issue in &mut draft.issues {
        issue.severity = issue.severity.clamp(1, 10);
        if issue.id.trim().is_empty() {
            issue.id = generated_id("issue");
        }
    }
    if let Some(patch) = &mut draft.patch {
        patch.clamp_in_place();
    }
    Some(draft)
}

/// Extract any JSON object from free text that satisfies `shape`,
/// trying the same ordered strategies as report parsing.
pub fn extract_json_value(raw: &str, shape: impl Fn(&Value) -> bool) -> Option<Value> {
    type Strategy = fn(&str) -> Vec<Value>;
    const STRATEGIES: &[(&str, Strategy)] = &[
        ("strict_json", parse_strict),
        ("fenced_block", parse_fenced),
        ("brace_scan", parse_brace_scan),
    ];

    for (name, strategy) in STRATEGIES {
        for candidate in strategy(raw) {
            if shape(&candidate) {
                tracing::debug!(strategy = *name, "JSON extracted from model output");
                return Some(candidate);
            }
        }
    }
    None
}

// ── Parse strategies (steps 1-3) ─────────────────────────────────

fn extract_report_value(raw: &str) -> Option<Value> {
    extract_json_value(raw, has_report_shape)
}

/// A value is report-shaped when it has a `mode` field plus `findings`
/// or `recommendations`.
fn has_report_shape(v: &Value) -> bool {
    v.is_object()
        && v.get("mode").is_some()
        && (v.get("findings").is_some() || v.get("recommendations").is_some())
}

fn parse_strict(raw: &str) -> Vec<Value> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .into_iter()
        .collect()
}

/// First fenced code block (```json or bare ```) that parses as JSON.
fn parse_fenced(raw: &str) -> Vec<Value> {
    let mut candidates = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find("```") {
        let after_ticks = &rest[open + 3..];
        // Skip the info string ("json", "JSON", or empty) up to the newline.
        let body_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_ticks[body_start..];
        match body.find("```") {
            Some(close) => {
                if let Ok(v) = serde_json::from_str::<Value>(body[..close].trim()) {
                    candidates.push(v);
                }
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    candidates
}

/// All balanced `{...}` substrings, longest first. Longest-first because
/// truncated or partial blocks are usually the shorter ones.
fn parse_brace_scan(raw: &str) -> Vec<Value> {
    let mut spans: Vec<&str> = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    for (i, ch) in raw.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        if let Some(s) = start.take() {
                            spans.push(&raw[s..=i]);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    // Outermost first-to-last span as a final candidate: commentary between
    // blocks sometimes splits one intended object.
    if let (Some(first), Some(last)) = (raw.find('{'), raw.rfind('}')) {
        if first < last {
            spans.push(&raw[first..=last]);
        }
    }
    spans.sort_by_key(|s| std::cmp::Reverse(s.len()));
    spans.dedup();
    spans
        .into_iter()
        .filter_map(|s| serde_json::from_str::<Value>(s).ok())
        .collect()
}

// ── Loose value → Report (clamping pass) ─────────────────────────

/// Shape a loosely parsed JSON value into a report, clamping every
/// numeric field and generating missing IDs.
pub fn report_from_value(v: &Value, request: &AnalysisRequest) -> Report {
    let mode = v
        .get("mode")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
        .unwrap_or(request.mode);

    let findings = v
        .get("findings")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(finding_from_value).collect())
        .unwrap_or_default();

    let recommendations = v
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(recommendation_from_value).collect())
        .unwrap_or_default();

    let assumptions = v
        .get("assumptions")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(assumption_from_value).collect())
        .unwrap_or_default();

    let meta = v.get("metadata");
    let metadata = Metadata {
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
        disagreement_score: meta
            .and_then(|m| num_field(m, "disagreementScore"))
            .map(clamp_score),
        self_check_passed: meta.and_then(|m| m.get("selfCheckPassed")).and_then(Value::as_bool),
        ..Metadata::default()
    };

    Report {
        mode,
        question: str_field(v, "question").unwrap_or_else(|| request.question.clone()),
        summary: str_field(v, "summary").unwrap_or_default(),
        assumptions,
        findings,
        recommendations,
        overall_risk_score: num_field(v, "overallRiskScore").map(clamp_score).unwrap_or(50),
        confidence: num_field(v, "confidence").map(clamp_score).unwrap_or(70),
        notes: str_field(v, "notes").filter(|s| !s.trim().is_empty()),
        adaptive_text: str_field(v, "adaptiveText").filter(|s| !s.trim().is_empty()),
        metadata,
    }
}

fn finding_from_value(v: &Value) -> Finding {
    let evidence = v
        .get("evidence")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|e| Evidence {
                    file_path: str_field(e, "filePath")
                        .or_else(|| str_field(e, "file"))
                        .unwrap_or_default(),
                    snippet: str_field(e, "snippet").unwrap_or_default(),
                    reasoning: str_field(e, "reasoning").unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Finding {
        id: str_field(v, "id")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| generated_id("finding")),
        title: str_field(v, "title").unwrap_or_else(|| "Finding".into()),
        description: str_field(v, "description").unwrap_or_default(),
        evidence,
        severity: num_field(v, "severity").map(clamp_severity).unwrap_or(5),
        impact_area: str_field(v, "impactArea")
            .map(|s| ImpactArea::parse(&s))
            .unwrap_or_default(),
        confidence: num_field(v, "confidence").map(clamp_score),
    }
}

fn recommendation_from_value(v: &Value) -> Recommendation {
    Recommendation {
        id: str_field(v, "id")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| generated_id("rec")),
        title: str_field(v, "title").unwrap_or_else(|| "Recommendation".into()),
        description: str_field(v, "description").unwrap_or_default(),
        expected_impact: str_field(v, "expectedImpact").unwrap_or_else(|| "TBD".into()),
        difficulty: str_field(v, "difficulty")
            .map(|s| Difficulty::parse(&s))
            .unwrap_or_default(),
        related_findings: v.get("relatedFindings").and_then(Value::as_array).map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        }),
        priority: num_field(v, "priority").map(clamp_severity),
        roi_estimate: str_field(v, "roiEstimate"),
        feasibility_score: num_field(v, "feasibilityScore").map(clamp_score),
        focus_minutes: num_field(v, "focusMinutes").map(|n| n.max(0.0).round() as u32),
        alignment_score: num_field(v, "alignmentScore").map(clamp_score),
    }
}

fn assumption_from_value(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => str_field(v, "assumption")
            .or_else(|| str_field(v, "reasoning"))
            .or_else(|| Some(v.to_string())),
        other => Some(other.to_string()),
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn num_field(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Heuristic section parsing (step 4) ───────────────────────────

/// Compiled patterns for section and score extraction.
struct HeuristicPatterns {
    header: Regex,
    bullet: Regex,
    risk_score: Regex,
    confidence: Regex,
}

static HEURISTIC_PATTERNS: LazyLock<HeuristicPatterns> = LazyLock::new(|| HeuristicPatterns {
    header: Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*)?(summary|assumptions?|findings?|recommendations?|risk|confidence)\b\s*:?\s*(.*)$",
    )
    .unwrap(),
    bullet: Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+(.*)$").unwrap(),
    risk_score: Regex::new(r"(?i)(?:overall\s*)?risk\s*score\s*[:\s]\s*(\d{1,3})").unwrap(),
    confidence: Regex::new(r"(?i)\bconfidence\s*[:\s]\s*(\d{1,3})").unwrap(),
});

fn heuristic_report(raw: &str, request: &AnalysisRequest) -> Report {
    let mut report = Report::skeleton(request.mode, request.question.clone());
    let sections = split_sections(raw);

    for (name, body) in &sections {
        match name.as_str() {
            "summary" => report.summary = body.trim().to_string(),
            "assumptions" | "assumption" => {
                report.assumptions = bullet_items(body)
                    .into_iter()
                    .map(|(title, _)| title)
                    .collect();
            }
            "findings" | "finding" => {
                report.findings = bullet_items(body)
                    .into_iter()
                    .take(MAX_HEURISTIC_FINDINGS)
                    .map(|(title, description)| Finding {
                        id: generated_id("finding"),
                        title,
                        description,
                        severity: 5,
                        ..Finding::default()
                    })
                    .collect();
            }
            "recommendations" | "recommendation" => {
                report.recommendations = bullet_items(body)
                    .into_iter()
                    .take(MAX_HEURISTIC_RECOMMENDATIONS)
                    .map(|(title, description)| Recommendation {
                        id: generated_id("rec"),
                        title,
                        description,
                        expected_impact: "TBD".into(),
                        ..Recommendation::default()
                    })
                    .collect();
            }
            _ => {}
        }
    }

    if report.summary.is_empty() {
        // First paragraph stands in for a missing summary section.
        report.summary = raw
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or_default()
            .to_string();
    }

    // Score lines can appear anywhere in the prose.
    if let Some(cap) = HEURISTIC_PATTERNS.risk_score.captures(raw) {
        if let Ok(n) = cap[1].parse::<f64>() {
            report.overall_risk_score = clamp_score(n);
        }
    }
    if let Some(cap) = HEURISTIC_PATTERNS.confidence.captures(raw) {
        if let Ok(n) = cap[1].parse::<f64>() {
            report.confidence = clamp_score(n);
        }
    }

    report
}

/// Split text into (lowercased header name, body) pairs on recognized
/// section headers.
fn split_sections(raw: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut current: Option<(String, String)> = None;
    for line in raw.lines() {
        if let Some(cap) = HEURISTIC_PATTERNS.header.captures(line) {
            if let Some(section) = current.take() {
                sections.push(section);
            }
            let name = cap[1].to_ascii_lowercase();
            let inline = cap.get(2).map(|m| m.as_str()).unwrap_or("").trim().to_string();
            current = Some((name, inline));
        } else if let Some((_, body)) = &mut current {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        }
    }
    if let Some(section) = current {
        sections.push(section);
    }
    sections
}

/// Extract (title, full text) for each bullet or numbered item.
fn bullet_items(body: &str) -> Vec<(String, String)> {
    let mut items: Vec<(String, String)> = Vec::new();
    for line in body.lines() {
        if let Some(cap) = HEURISTIC_PATTERNS.bullet.captures(line) {
            let text = cap[1].trim().to_string();
            items.push((text.clone(), text));
        } else if let Some((_, description)) = items.last_mut() {
            let cont = line.trim();
            if !cont.is_empty() {
                description.push('\n');
                description.push_str(cont);
            }
        }
    }
    items.retain(|(title, _)| !title.is_empty());
    items
}

// ── Minimal fallback (step 5) ────────────────────────────────────

fn minimal_report(raw: &str, request: &AnalysisRequest) -> Report {
    tracing::warn!(
        mode = %request.mode,
        raw_len = raw.len(),
        "Model output defeated every parse strategy; synthesizing minimal report"
    );
    let preview: String = raw.chars().take(RAW_NOTES_CHARS).collect();
    let mut report = Report::skeleton(request.mode, request.question.clone());
    report.summary = "Report parsing incomplete".into();
    report.findings.push(Finding {
        id: "parsing-incomplete".into(),
        title: "Report parsing incomplete".into(),
        description: "The model output could not be parsed into structured findings. \
                      Raw output may need manual review."
            .into(),
        severity: 8,
        confidence: Some(30),
        ..Finding::default()
    });
    report.confidence = 30;
    report.overall_risk_score = 50;
    report.notes = Some(format!("Parsing failed. Raw output (first {RAW_NOTES_CHARS} chars): {preview}"));
    report
}
