//! The research pipeline and its stages.
//!
//! - [`pipeline::Pipeline`] — the entry point. Start here.
//! - [`brief::BriefStage`] — optional clarifying question, then the research brief.
//! - [`supervisor::Supervisor`] — plans topics and delegates them to a bounded
//!   pool of concurrent [`researcher::Researcher`]s, integrating notes in
//!   issuance order.
//! - [`report::ReportStage`] — the final report, with note-subset fallback.
//! - [`config::ResearchConfig`] — limits, models, budgets, and timeouts.
//! - [`events`] — [`EventHandler`] trait and [`ResearchEvent`] enum for
//!   observing a run.
//! - [`execution`] — the shared model-call path: timeouts, transient retry,
//!   and the overflow retry ladder.
//! - [`knowledge`] — optional one-way sink for integrated findings.
//! - [`prompt`] — [`SystemPromptBuilder`] and the stage prompts.

pub mod brief;
pub mod config;
pub mod events;
pub mod execution;
pub mod knowledge;
pub mod notes;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod researcher;
pub mod supervisor;

pub use brief::{BriefDecision, BriefStage};
pub use config::ResearchConfig;
pub use events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    ResearchEvent,
};
pub use execution::StageContext;
pub use knowledge::{JsonlKnowledgeStore, KnowledgeRecord, KnowledgeStore, NoopKnowledgeStore};
pub use notes::{ResearchNote, UnitOutcome};
pub use pipeline::{Pipeline, ResearchOutcome, ResearchReport};
pub use prompt::SystemPromptBuilder;
pub use report::ReportStage;
pub use researcher::Researcher;
pub use supervisor::{Supervisor, SupervisorOutcome, SupervisorStop};
