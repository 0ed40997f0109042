//! Rolling conversation summaries
//!
//! Each user has one global summary and one summary per conversation. The
//! orchestrator reads them through [`SummaryCache`] to keep prompts bounded;
//! the CLI drives explicit rebuilds and the dedup pass.

pub mod cache;
pub mod digest;
pub mod types;

pub use cache::{RebuildOutcome, RebuildScheduler, RefreshMode, SummaryCache, TokioScheduler};
pub use types::{Scope, StructuredDigest, SummaryKey, SummaryRecord, SummaryUpdate};
