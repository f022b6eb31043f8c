//! Shared execution helpers for every stage's model calls.
//!
//! Three layers wrap a raw [`ModelClient::complete`]:
//!
//! 1. [`StageContext::complete_once`]: per-call timeout, cancellation.
//! 2. [`StageContext::complete_with_retry`]: exponential backoff on
//!    transient errors, usage accounting.
//! 3. [`StageContext::complete_within_budget`]: the conversation is fitted to
//!    the context budget first; a model-reported overflow (or a timeout, for
//!    stages that escalate timeouts) retries the call one rung further down
//!    the reduction ladder.
//!
//! Cancellation is checked at every suspension point. Cancelled calls return
//! `Err(Cancelled)` in the outer `Result`; the inner `Result` carries the
//! call's own outcome.

use crate::{ChatCompletion, Message};
use crate::agent::config::ResearchConfig;
use crate::agent::events::{EventHandler, ResearchEvent};
use crate::api::tracing::UsageTracker;
use crate::context::{ContextBudget, Rung, reduce};
use crate::error::{Cancelled, ModelError};
use crate::model::{CompletionRequest, ModelClient};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Race a future against session cancellation.
pub async fn or_cancelled<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        out = fut => Ok(out),
    }
}

/// What a timed-out model call means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Treat the timeout like a transient error and retry with backoff.
    Retry,
    /// Treat the timeout like a context overflow and escalate the ladder.
    Escalate,
}

/// A budgeted call gave up.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BudgetedCallError {
    /// Every rung of the reduction ladder was tried, or the overflow retry
    /// limit was reached.
    #[error("context budget exhausted after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },
    /// A non-overflow model failure.
    #[error(transparent)]
    Model(ModelError),
}

/// Everything a stage needs to issue model calls. Cheap to copy.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub model: &'a dyn ModelClient,
    pub config: &'a ResearchConfig,
    pub events: &'a dyn EventHandler,
    pub usage: &'a UsageTracker,
    pub cancel: &'a CancellationToken,
    pub trace_id: &'a str,
}

impl<'a> StageContext<'a> {
    pub fn emit(&self, event: ResearchEvent<'_>) {
        self.events.on_event(&event);
    }

    /// One model call with the configured timeout.
    pub async fn complete_once(
        &self,
        request: &CompletionRequest,
    ) -> Result<Result<ChatCompletion, ModelError>, Cancelled> {
        let limit = self.config.model_timeout();
        let call = tokio::time::timeout(limit, self.model.complete(request));
        Ok(match or_cancelled(self.cancel, call).await? {
            Ok(result) => result,
            Err(_) => {
                warn!("[{}] model call timed out after {limit:?}", request.stage);
                Err(ModelError::Timeout(limit))
            }
        })
    }

    /// A model call retried with backoff on transient failures.
    pub async fn complete_with_retry(
        &self,
        request: &CompletionRequest,
        timeouts: TimeoutPolicy,
    ) -> Result<Result<ChatCompletion, ModelError>, Cancelled> {
        let retry = self.config.retry();
        let mut attempt = 0;
        loop {
            match self.complete_once(request).await? {
                Ok(completion) => {
                    self.usage.record(&request.model, completion.usage.as_ref());
                    return Ok(Ok(completion));
                }
                Err(e) if attempt < retry.max_retries && is_retryable(&e, timeouts) => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        "[{}] transient model error (attempt {}/{}): {e}. Retrying in {delay:?}...",
                        request.stage,
                        attempt + 1,
                        retry.max_retries,
                    );
                    or_cancelled(self.cancel, tokio::time::sleep(delay)).await?;
                    attempt += 1;
                }
                Err(e) => return Ok(Err(e)),
            }
        }
    }

    /// A model call fitted to `budget`, escalating the reduction ladder on overflow.
    ///
    /// At most `max_overflow_retries + 1` calls are made. Rungs that would
    /// send the same conversation again are skipped. Under
    /// [`TimeoutPolicy::Escalate`] a timeout counts as an overflow.
    pub async fn complete_within_budget(
        &self,
        request: &CompletionRequest,
        budget: &ContextBudget,
        timeouts: TimeoutPolicy,
    ) -> Result<Result<ChatCompletion, BudgetedCallError>, Cancelled> {
        let stage = request.stage;
        let max_attempts = self.config.max_overflow_retries + 1;
        let before_tokens = budget.estimate_tokens(&request.messages);
        let mut floor = Rung::Intact;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let reduced = match reduce(&request.messages, budget, floor) {
                Ok(r) => r,
                Err(e) => {
                    debug!("[{stage}] reduction ladder exhausted: {e}");
                    return Ok(Err(BudgetedCallError::Exhausted {
                        attempts: attempt,
                        reason: e.to_string(),
                    }));
                }
            };
            if reduced.rung != Rung::Intact {
                self.emit(ResearchEvent::ContextReduced {
                    stage,
                    rung: reduced.rung,
                    before_tokens,
                    after_tokens: reduced.estimated_tokens,
                });
            }

            let sized = CompletionRequest {
                messages: reduced.messages,
                ..request.clone()
            };
            let error = match self.complete_with_retry(&sized, timeouts).await? {
                Ok(completion) => return Ok(Ok(completion)),
                Err(e) if escalates(&e, timeouts) => e,
                Err(e) => return Ok(Err(BudgetedCallError::Model(e))),
            };

            let next = next_distinct_rung(&request.messages, budget, reduced.rung, &sized.messages);
            match next {
                Some(rung) if attempt < max_attempts => {
                    self.emit(ResearchEvent::OverflowRetry {
                        stage,
                        attempt,
                        next_rung: rung,
                    });
                    floor = rung;
                }
                _ => {
                    return Ok(Err(BudgetedCallError::Exhausted {
                        attempts: attempt,
                        reason: error.to_string(),
                    }));
                }
            }
        }
    }
}

fn is_retryable(error: &ModelError, timeouts: TimeoutPolicy) -> bool {
    match error {
        ModelError::Transient(_) => true,
        ModelError::Timeout(_) => timeouts == TimeoutPolicy::Retry,
        _ => false,
    }
}

fn escalates(error: &ModelError, timeouts: TimeoutPolicy) -> bool {
    match error {
        ModelError::ContextOverflow(_) => true,
        ModelError::Timeout(_) => timeouts == TimeoutPolicy::Escalate,
        _ => false,
    }
}

/// The first rung below `from` whose reduction differs from what was just sent.
///
/// A rung whose reduction fails is returned as is so the caller reports the
/// exhaustion.
fn next_distinct_rung(
    messages: &[Message],
    budget: &ContextBudget,
    from: Rung,
    sent: &[Message],
) -> Option<Rung> {
    let mut rung = from.next()?;
    loop {
        match reduce(messages, budget, rung) {
            Ok(r) if r.messages.as_slice() == sent => rung = rung.next()?,
            _ => return Some(rung),
        }
    }
}
