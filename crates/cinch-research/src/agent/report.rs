//! Final report stage: synthesize every note into one report.
//!
//! The report call goes through the context budgeter. When the budget is
//! exhausted the stage retries with progressively smaller subsets of notes,
//! keeping the most recent ones, and halving the count on every attempt.
//! Once a single note is left, further attempts halve the length of its
//! findings instead. If every attempt fails, the error carries all
//! accumulated notes so the caller can still present a degraded report.

use crate::agent::events::ResearchEvent;
use crate::agent::execution::{BudgetedCallError, StageContext, TimeoutPolicy};
use crate::agent::notes::ResearchNote;
use crate::agent::prompt::{report_prompt, today_str};
use crate::context::eviction::TRUNCATION_MARKER;
use crate::error::{ReportGenerationError, ResearchError};
use crate::model::{CallStage, CompletionRequest};
use crate::Message;
use tracing::{info, warn};

/// Findings text used when no unit produced findings.
const NO_FINDINGS: &str = "No research findings were gathered.";

/// Note counts to try: `total`, then halved down to one, at most `max_attempts` entries.
///
/// `total == 0` yields a single attempt with no notes.
pub fn note_subsets(total: usize, max_attempts: usize) -> Vec<usize> {
    let mut counts = vec![total];
    let mut current = total;
    while current > 1 && counts.len() < max_attempts {
        current = (current / 2).max(1);
        counts.push(current);
    }
    counts.truncate(max_attempts.max(1));
    counts
}

/// One report attempt: keep the `notes` most recent notes, each cut to
/// `findings_cap` characters when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportAttempt {
    pub notes: usize,
    pub findings_cap: Option<usize>,
}

/// Attempts for notes whose findings have the given lengths, oldest first.
///
/// Note counts follow [`note_subsets`]. If attempts remain once the count is
/// down to one note, each further attempt halves a findings cap that starts
/// at the longest kept findings.
pub fn attempt_plan(findings_lens: &[usize], max_attempts: usize) -> Vec<ReportAttempt> {
    let max_attempts = max_attempts.max(1);
    let mut plan: Vec<ReportAttempt> = note_subsets(findings_lens.len(), max_attempts)
        .into_iter()
        .map(|notes| ReportAttempt {
            notes,
            findings_cap: None,
        })
        .collect();
    let Some(&last) = plan.last() else {
        return plan;
    };
    if last.notes == 0 {
        return plan;
    }
    let kept = &findings_lens[findings_lens.len() - last.notes..];
    let mut cap = kept.iter().copied().max().unwrap_or(0);
    while plan.len() < max_attempts {
        cap = (cap / 2).max(1);
        plan.push(ReportAttempt {
            notes: last.notes,
            findings_cap: Some(cap),
        });
    }
    plan
}

/// Render notes as `## topic` sections, cutting findings to `cap`
/// characters when set. Failed notes contribute nothing.
pub fn render_findings(notes: &[&ResearchNote], cap: Option<usize>) -> String {
    if notes.is_empty() {
        return NO_FINDINGS.to_string();
    }
    notes
        .iter()
        .filter_map(|n| {
            let findings = n.findings()?;
            let findings = match cap {
                Some(cap) if findings.chars().count() > cap => {
                    let mut cut: String = findings.chars().take(cap).collect();
                    cut.push_str(TRUNCATION_MARKER);
                    cut
                }
                _ => findings.to_string(),
            };
            Some(format!("## {}\n\n{findings}", n.topic))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct ReportStage<'a> {
    ctx: StageContext<'a>,
}

impl<'a> ReportStage<'a> {
    pub fn new(ctx: StageContext<'a>) -> Self {
        Self { ctx }
    }

    pub async fn generate(&self, brief: &str, notes: &[ResearchNote]) -> Result<String, ResearchError> {
        let config = self.ctx.config;
        let usable: Vec<&ResearchNote> = notes.iter().filter(|n| !n.is_failure()).collect();
        let lens: Vec<usize> = usable
            .iter()
            .map(|n| n.findings().map_or(0, |f| f.chars().count()))
            .collect();
        let plan = attempt_plan(&lens, 1 + config.report_fallback_attempts as usize);
        let budget =
            config.context_budget(&config.final_report_model, config.final_report_model_max_tokens);
        let date = today_str();

        let mut reason = String::new();
        let mut attempts = 0u32;
        for (i, step) in plan.iter().enumerate() {
            let keep = step.notes;
            attempts += 1;
            if i > 0 {
                self.ctx.emit(ResearchEvent::ReportFallback {
                    attempt: attempts,
                    notes_kept: keep,
                    notes_total: usable.len(),
                    findings_cap: step.findings_cap,
                });
            }
            let kept = &usable[usable.len() - keep..];
            let findings = render_findings(kept, step.findings_cap);
            let request = CompletionRequest::new(
                CallStage::Report,
                &config.final_report_model,
                vec![Message::user(report_prompt(brief, &findings, &date))],
            )
            .with_max_tokens(config.final_report_model_max_tokens);

            match self
                .ctx
                .complete_within_budget(&request, &budget, TimeoutPolicy::Escalate)
                .await?
            {
                Ok(completion) => match completion.non_empty_text() {
                    Some(report) => {
                        info!("Final report written from {keep}/{} note(s)", usable.len());
                        self.ctx.emit(ResearchEvent::ReportWritten {
                            chars: report.chars().count(),
                        });
                        return Ok(report.to_string());
                    }
                    None => {
                        warn!("Report attempt {attempts} returned no text");
                        reason = "model returned an empty report".into();
                    }
                },
                Err(BudgetedCallError::Exhausted { reason: r, .. }) => {
                    warn!("Report attempt {attempts} with {keep} note(s) exhausted the budget: {r}");
                    reason = r;
                }
                Err(BudgetedCallError::Model(e)) => {
                    return Err(self.failure(brief, notes, attempts, e.to_string()));
                }
            }
        }
        Err(self.failure(brief, notes, attempts, reason))
    }

    fn failure(&self, brief: &str, notes: &[ResearchNote], attempts: u32, reason: String) -> ResearchError {
        ReportGenerationError {
            brief: brief.to_string(),
            notes: notes.to_vec(),
            attempts,
            reason,
        }
        .into()
    }
}
