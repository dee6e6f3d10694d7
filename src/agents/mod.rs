//! LLM agents
//!
//! Prompt construction and output parsing around the Gemini client. Each
//! agent owns one stage's model interaction: [`analyzer`] classifies the
//! issue, [`fix`] proposes patches for it.

pub mod analyzer;
pub mod fix;

pub use analyzer::{IssueAnalysis, IssueAnalyzer, IssueComplexity, IssueType};
pub use fix::{FixGenerator, FixProposal};
