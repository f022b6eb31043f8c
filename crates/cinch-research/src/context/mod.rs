//! Context window management: token budgets and the reduction ladder.
//!
//! Every model invocation in the pipeline passes its conversation through
//! here before it is sent:
//!
//! 1. **[`budget`]**: [`ContextBudget`] estimates token usage from character
//!    counts and knows the usable window (model limit minus output reserve).
//!
//! 2. **[`eviction`]**: [`fit`] and [`reduce`] walk the ladder
//!    `Intact -> DropStale -> Truncate`, replacing stale tool results with
//!    placeholders and then truncating the rest. The system prompt, the
//!    original task, and the most recent exchanges are preserved.
//!
//! When the ladder is exhausted the caller gets a
//! [`ContextOverflowError`](crate::error::ContextOverflowError) instead of
//! an oversized request.

pub mod budget;
pub mod eviction;

pub use crate::error::ContextOverflowError;
pub use budget::{ContextBudget, ContextUsage, DEFAULT_CHARS_PER_TOKEN};
pub use eviction::{EVICTED_PREFIX, Reduced, Rung, TRUNCATION_MARKER, fit, reduce};
