//! Workflow data flow
//!
//! The run's working data ("context") is the accumulated set of stage
//! outputs. Each stage owns exactly the keys it returns; the orchestrator
//! merges them in and never lets a stage read a key written by a later
//! stage. Field names serialize in camelCase so the persisted queue file
//! keeps the original wire format.

use serde::{Deserialize, Serialize};

use crate::agents::{FixProposal, IssueAnalysis};
use crate::github::Issue;
use crate::orchestrator::state::State;
use crate::Error;

/// Input for one workflow run: which issue to fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
}

/// A file surfaced by the SEARCHING stage, with its content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub file_path: String,
    pub content: String,
}

/// One step of the fix plan produced by PLANNING.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub description: String,
    pub target_files: Vec<String>,
    pub strategy: String,
}

/// Outcome of APPLYING.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub applied_files: Vec<String>,
    pub patch_count: usize,
}

/// Outcome of BUILDING / TESTING: a shell command's captured result.
///
/// A failed command is recorded here, not thrown; the run carries the
/// evidence forward to review rather than aborting mid-pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub errors: Vec<String>,
}

/// Outcome of REVIEWING.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    pub approved: bool,
    pub summary: String,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Outcome of SUBMITTING.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub pr_number: u64,
    pub pr_url: String,
    pub commit_message: String,
}

/// The accumulated, append-only context of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowData {
    pub input: WorkflowInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<IssueAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<PlanStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_proposal: Option<FixProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_result: Option<ApplyResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_result: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_result: Option<ReviewResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<Submission>,
}

impl WorkflowData {
    pub fn new(input: WorkflowInput) -> Self {
        Self {
            input,
            issue: None,
            analysis: None,
            search_results: None,
            plan: None,
            fix_proposal: None,
            apply_result: None,
            build_result: None,
            test_result: None,
            review_result: None,
            submission: None,
        }
    }

    /// Merge a stage's partial output. Set fields replace, absent fields
    /// leave the existing value untouched.
    pub fn merge(&mut self, output: StageOutput) {
        macro_rules! take {
            ($($field:ident),+ $(,)?) => {
                $(if output.$field.is_some() { self.$field = output.$field; })+
            };
        }
        take!(
            issue,
            analysis,
            search_results,
            plan,
            fix_proposal,
            apply_result,
            build_result,
            test_result,
            review_result,
            submission,
        );
    }
}

/// The partial context a stage handler contributes.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub issue: Option<Issue>,
    pub analysis: Option<IssueAnalysis>,
    pub search_results: Option<Vec<SearchResult>>,
    pub plan: Option<Vec<PlanStep>>,
    pub fix_proposal: Option<FixProposal>,
    pub apply_result: Option<ApplyResult>,
    pub build_result: Option<CommandResult>,
    pub test_result: Option<CommandResult>,
    pub review_result: Option<ReviewResult>,
    pub submission: Option<Submission>,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Completed,
    Failed,
    Cancelled,
    Paused,
}

/// Classified error attached to a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for WorkflowError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
        }
    }
}

/// What `WorkflowOrchestrator::run` reports back to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub run_id: String,
    pub final_state: State,
    pub attempt: u32,
    pub duration_ms: u64,
    pub data: WorkflowData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> WorkflowInput {
        WorkflowInput {
            owner: "o".to_string(),
            repo: "r".to_string(),
            issue_number: 1,
        }
    }

    #[test]
    fn merge_replaces_only_set_fields() {
        let mut data = WorkflowData::new(input());
        data.merge(StageOutput {
            plan: Some(vec![PlanStep {
                description: "update src/lib.rs".to_string(),
                target_files: vec!["src/lib.rs".to_string()],
                strategy: "minimal".to_string(),
            }]),
            ..Default::default()
        });
        assert_eq!(data.plan.as_ref().map(|p| p.len()), Some(1));

        data.merge(StageOutput {
            apply_result: Some(ApplyResult {
                applied_files: vec![],
                patch_count: 0,
            }),
            ..Default::default()
        });
        // Earlier keys survive later merges.
        assert!(data.plan.is_some());
        assert!(data.apply_result.is_some());
    }

    #[test]
    fn context_serializes_camel_case() {
        let data = WorkflowData::new(input());
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["input"]["issueNumber"], 1);
        // Unset stage keys are omitted entirely.
        assert!(json.get("searchResults").is_none());
    }
}
