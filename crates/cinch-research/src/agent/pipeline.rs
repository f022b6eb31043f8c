//! Pipeline driver: clarification, brief, supervisor, final report.
//!
//! [`Pipeline::run`] owns the session state for one call and walks the
//! stages in order. The flow is acyclic; only the supervisor and the
//! researchers loop internally.

use crate::agent::brief::{BriefDecision, BriefStage};
use crate::agent::config::ResearchConfig;
use crate::agent::events::{EventHandler, NoopHandler, ResearchEvent};
use crate::agent::execution::StageContext;
use crate::agent::knowledge::KnowledgeStore;
use crate::agent::notes::ResearchNote;
use crate::agent::report::ReportStage;
use crate::agent::supervisor::{Supervisor, SupervisorStop};
use crate::api::tracing::{UsageTotals, UsageTracker, generate_trace_id};
use crate::error::ResearchError;
use crate::model::ModelClient;
use crate::tools::core::ToolSet;
use crate::Message;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What one run produced.
#[derive(Debug, Clone)]
pub enum ResearchOutcome {
    /// The pipeline needs an answer from the user before it can research.
    Clarification(String),
    Report(ResearchReport),
}

impl ResearchOutcome {
    pub fn report(&self) -> Option<&ResearchReport> {
        match self {
            Self::Report(r) => Some(r),
            Self::Clarification(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub report: String,
    pub brief: String,
    /// One note per delegation unit, in issuance order.
    pub notes: Vec<ResearchNote>,
    /// Supervisor reflections.
    pub raw_notes: Vec<String>,
    pub iterations: u32,
    pub stop: SupervisorStop,
    pub trace_id: String,
    pub usage: UsageTotals,
}

/// State owned by the driver for the duration of one run.
#[derive(Debug, Default)]
struct SessionState {
    conversation: Vec<Message>,
    research_brief: Option<String>,
    supervisor_transcript: Vec<Message>,
    accumulated_notes: Vec<ResearchNote>,
    raw_notes: Vec<String>,
    iteration_count: u32,
    final_report: Option<String>,
}

/// The research pipeline.
///
/// ```ignore
/// let model = OpenRouterClient::new(api_key)?;
/// let tools = ToolSet::new().with(WebSearch::new(tavily_key)?).with(ThinkTool);
/// let config = ResearchConfig::default().with_allow_clarification(false);
///
/// match Pipeline::new(&model, &tools, &config).run(vec![Message::user(query)]).await? {
///     ResearchOutcome::Clarification(question) => println!("{question}"),
///     ResearchOutcome::Report(report) => println!("{}", report.report),
/// }
/// ```
pub struct Pipeline<'a> {
    model: &'a dyn ModelClient,
    tools: &'a ToolSet,
    config: &'a ResearchConfig,
    events: &'a dyn EventHandler,
    knowledge: Option<Arc<dyn KnowledgeStore>>,
    cancel: CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(model: &'a dyn ModelClient, tools: &'a ToolSet, config: &'a ResearchConfig) -> Self {
        Self {
            model,
            tools,
            config,
            events: &NoopHandler,
            knowledge: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_handler(mut self, events: &'a dyn EventHandler) -> Self {
        self.events = events;
        self
    }

    pub fn with_knowledge_store(mut self, store: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    /// Cancelling `token` stops in-flight work at its next suspension point.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Turn a conversation into a clarifying question or a final report.
    pub async fn run(&self, conversation: Vec<Message>) -> Result<ResearchOutcome, ResearchError> {
        let trace_id = generate_trace_id();
        let usage = UsageTracker::new();
        let ctx = StageContext {
            model: self.model,
            config: self.config,
            events: self.events,
            usage: &usage,
            cancel: &self.cancel,
            trace_id: &trace_id,
        };
        info!("Research run {trace_id} starting");
        ctx.emit(ResearchEvent::RunStarted { trace_id: &trace_id });

        let result = self.drive(ctx, conversation).await;

        let totals = usage.snapshot();
        info!("Research run {trace_id} finished: {}", totals.summary());
        ctx.emit(ResearchEvent::Usage(&totals));

        let (state, stop) = match result? {
            Ok(finished) => finished,
            Err(question) => return Ok(ResearchOutcome::Clarification(question)),
        };
        Ok(ResearchOutcome::Report(ResearchReport {
            report: state.final_report.unwrap_or_default(),
            brief: state.research_brief.unwrap_or_default(),
            notes: state.accumulated_notes,
            raw_notes: state.raw_notes,
            iterations: state.iteration_count,
            stop,
            trace_id,
            usage: totals,
        }))
    }

    /// Runs the stages. The inner `Err` is a clarifying question.
    async fn drive(
        &self,
        ctx: StageContext<'_>,
        conversation: Vec<Message>,
    ) -> Result<Result<(SessionState, SupervisorStop), String>, ResearchError> {
        let mut state = SessionState {
            conversation,
            ..Default::default()
        };

        let brief = match BriefStage::new(ctx).run(&mut state.conversation).await? {
            BriefDecision::Clarify(question) => return Ok(Err(question)),
            BriefDecision::Brief(brief) => brief,
        };
        state.research_brief = Some(brief.clone());

        let outcome = Supervisor::new(ctx, self.tools)
            .with_knowledge_store(self.knowledge.clone())
            .run(&brief)
            .await?;
        state.supervisor_transcript = outcome.transcript;
        state.accumulated_notes = outcome.notes;
        state.raw_notes = outcome.raw_notes;
        state.iteration_count = outcome.iterations;
        info!(
            "Supervisor stopped ({}) after {} iteration(s) with {} note(s), transcript {} message(s)",
            outcome.stop,
            state.iteration_count,
            state.accumulated_notes.len(),
            state.supervisor_transcript.len()
        );

        let report = ReportStage::new(ctx)
            .generate(&brief, &state.accumulated_notes)
            .await?;
        state.final_report = Some(report);

        Ok(Ok((state, outcome.stop)))
    }
}
