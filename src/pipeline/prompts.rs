//! Stage prompt construction.
//!
//! Each builder assembles one stage's user prompt from the request, the
//! repository snapshot, and upstream stage output. Prompts instruct models
//! to answer in the camelCase report schema; the normalizer copes when they
//! ignore that instruction.

use crate::report::{AnalysisMode, AnalysisRequest};
use crate::snapshot::RepoSnapshot;

/// Shared system prompt for every panel stage.
pub const PANEL_SYSTEM_PROMPT: &str = "You are one member of a multi-model analysis panel. \
Be precise and evidence-driven. Cite only files that exist in the provided repository \
snapshot; when citing another agent's output, prefix the path with [EXTERNAL:<agent>]/. \
Respond with a single JSON object and no surrounding prose unless told otherwise.";

/// JSON shape every structured stage is asked to emit.
const REPORT_SCHEMA: &str = r#"{
  "mode": "<analysis mode>",
  "question": "<the question being answered>",
  "summary": "<2-4 sentence answer>",
  "assumptions": ["<assumption>", ...],
  "findings": [
    {
      "id": "<stable id>",
      "title": "<short title>",
      "description": "<what is wrong and why it matters>",
      "evidence": [{"filePath": "<path[:start-end]>", "snippet": "<quoted code>", "reasoning": "<why this supports the finding>"}],
      "severity": <1-10>,
      "impactArea": "architecture|performance|scalability|reliability|security|ux|devx",
      "confidence": <0-100>
    }
  ],
  "recommendations": [
    {
      "id": "<stable id>",
      "title": "<short title>",
      "description": "<what to do>",
      "expectedImpact": "<what improves>",
      "difficulty": "low|medium|high",
      "relatedFindings": ["<finding id>", ...],
      "priority": <1-10>
    }
  ],
  "overallRiskScore": <0-100>,
  "confidence": <0-100>,
  "notes": "<caveats, or omit>"
}"#;

/// Shape the reviewer stage is asked to emit.
const REVIEW_SCHEMA: &str = r#"{
  "reviewSummary": "<overall assessment of the draft>",
  "issues": [{"id": "<id>", "severity": <1-10>, "description": "<what the draft got wrong or missed>"}],
  "patch": <a full corrected report object, or null if the draft stands>
}"#;

fn mode_charter(mode: AnalysisMode) -> &'static str {
    match mode {
        AnalysisMode::PipelineDiagnosis => {
            "Diagnose the described software pipeline against its repository: find root causes, \
             not symptoms, and ground every finding in specific files."
        }
        AnalysisMode::AgentOutputCritique => {
            "Critique the supplied agent output: correctness, completeness, hallucinations, and \
             whether it actually answers what was asked."
        }
        AnalysisMode::MetaPromptArchitect => {
            "Review the supplied prompt as an artifact: ambiguities, missing constraints, failure \
             modes, and propose a redesigned structure."
        }
    }
}

/// The caller-supplied context sections that vary by mode.
fn context_blocks(request: &AnalysisRequest, snapshot: &RepoSnapshot) -> String {
    let mut blocks = String::new();
    blocks.push_str(&snapshot.summary_block());
    blocks.push_str(&snapshot.related_files_block(&request.related_files));
    if let Some(logs) = request.logs.as_deref().filter(|s| !s.trim().is_empty()) {
        blocks.push_str(&format!("\n=== LOGS ===\n{logs}\n"));
    }
    if let Some(traces) = request
        .stack_traces
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        blocks.push_str(&format!("\n=== STACK TRACES ===\n{traces}\n"));
    }
    if let Some(output) = request
        .agent_output
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        blocks.push_str(&format!("\n=== AGENT OUTPUT UNDER REVIEW ===\n{output}\n"));
    }
    if let Some(prompt) = request
        .current_prompt
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        blocks.push_str(&format!("\n=== CURRENT PROMPT UNDER REVIEW ===\n{prompt}\n"));
    }
    blocks
}

/// Stage 1: the lead thinker produces the first full draft.
pub fn lead_prompt(request: &AnalysisRequest, snapshot: &RepoSnapshot) -> String {
    format!(
        "ROLE: Lead analyst.\n{charter}\n\n{context}\n=== QUESTION ===\n{question}\n\n\
         Take a firm analytical position. Return between 5 and 15 findings, each backed by \
         evidence, plus any recommendations that follow from them.\n\
         Produce your complete analysis as a single JSON object with this exact shape:\n{schema}\n\
         Set \"mode\" to \"{mode}\". Cite evidence only from the snapshot above.",
        charter = mode_charter(request.mode),
        context = context_blocks(request, snapshot),
        question = request.question,
        schema = REPORT_SCHEMA,
        mode = request.mode,
    )
}

/// Stage 2: the reviewer critiques the lead draft.
pub fn review_prompt(request: &AnalysisRequest, snapshot: &RepoSnapshot, lead_json: &str) -> String {
    format!(
        "ROLE: Adversarial reviewer.\n\
         Another model produced the draft analysis below. Find what it got wrong: unsupported \
         claims, fabricated file paths, missed root causes, severity miscalibration. If the draft \
         is substantially wrong, include a full corrected report as \"patch\"; otherwise set \
         \"patch\" to null.\n\n{context}\n=== QUESTION ===\n{question}\n\n\
         === LEAD DRAFT ===\n{lead_json}\n\n\
         Respond as a single JSON object with this exact shape:\n{schema}",
        context = context_blocks(request, snapshot),
        question = request.question,
        schema = REVIEW_SCHEMA,
    )
}

/// Stage 3: the synthesizer merges draft and critique into the final report.
pub fn synth_prompt(
    request: &AnalysisRequest,
    snapshot: &RepoSnapshot,
    lead_json: &str,
    review_json: &str,
) -> String {
    let output_clause = if request.adaptive_layout {
        "Respond in clear natural-language prose, structured however best fits the question. \
         Do not emit JSON."
            .to_string()
    } else {
        format!(
            "Respond as a single JSON object with this exact shape:\n{REPORT_SCHEMA}\n\
             Set \"mode\" to \"{}\".",
            request.mode
        )
    };
    format!(
        "ROLE: Synthesizer.\n\
         Merge the lead draft and the reviewer's critique into one final analysis. Keep draft \
         findings the review did not refute, drop or correct the ones it did, and incorporate \
         valid issues the review raised. Recalibrate severity and risk where the critique \
         justified it.\n\n{context}\n=== QUESTION ===\n{question}\n\n\
         === LEAD DRAFT ===\n{lead_json}\n\n=== REVIEW ===\n{review_json}\n\n{output_clause}",
        context = context_blocks(request, snapshot),
        question = request.question,
    )
}
