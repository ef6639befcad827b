//! Multi-model analysis panel.
//!
//! A panel run sends one question through three model stages (lead draft,
//! adversarial review, synthesis) plus a concurrent specialist side panel,
//! and always terminates in a single validated [`Report`]. Provider
//! clients live outside this crate behind the [`ModelInvoker`] port.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use tribunal::{AnalysisMode, AnalysisRequest, Panel, PanelConfig, RepoSnapshot};
//!
//! # async fn demo(invoker: Arc<dyn tribunal::ModelInvoker>) -> anyhow::Result<()> {
//! let panel = Panel::new(PanelConfig::default(), invoker);
//! let request = AnalysisRequest::new(AnalysisMode::PipelineDiagnosis, "why does ingest stall?");
//! let report = panel
//!     .run(&request, &RepoSnapshot::empty("/repo"), &CancellationToken::new())
//!     .await?;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod invoke;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod router;
pub mod snapshot;
pub mod specialist;
pub mod verify;

pub use config::{CostTier, CredentialMap, ModelSpec, PanelConfig, Scheduling};
pub use error::{InvokeError, PanelError};
pub use invoke::{ModelInvoker, ModelOutput};
pub use pipeline::Panel;
pub use report::{
    AnalysisMode, AnalysisRequest, Difficulty, Evidence, Finding, ImpactArea, Metadata,
    Recommendation, Report, ReviewDraft, ReviewIssue,
};
pub use router::{ModelHandle, PanelRole, Router};
pub use snapshot::{FileEntry, RepoSnapshot};
pub use specialist::{ExtendedAgentOutputs, SpecialistSlot};
pub use verify::{verify, EvidenceMode, Verification};
