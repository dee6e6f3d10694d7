//! Fix generator agent

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::analyzer::IssueAnalysis;
use crate::gemini::{extract_json_object, GeminiClient, GenerateOptions};
use crate::orchestrator::data::SearchResult;
use crate::{Error, Result};

/// A proposed fix: one unified diff per touched file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixProposal {
    pub explanation: String,
    pub confidence_score: f64,
    pub patches: Vec<String>,
    pub strategy: String,
}

/// Asks the model for unified diffs fixing the analyzed issue.
pub struct FixGenerator {
    gemini: Arc<GeminiClient>,
}

impl FixGenerator {
    pub fn new(gemini: Arc<GeminiClient>) -> Self {
        Self { gemini }
    }

    pub async fn generate(
        &self,
        issue_description: &str,
        analysis: &IssueAnalysis,
        search_results: &[SearchResult],
    ) -> Result<FixProposal> {
        let prompt = build_prompt(issue_description, analysis, search_results);
        let text = self
            .gemini
            .generate(&prompt, &GenerateOptions::default())
            .await?;

        let value = extract_json_object(&text)?;
        let proposal: FixProposal = serde_json::from_value(value).map_err(|e| {
            Error::ModelOutput(format!("fix proposal did not match expected schema: {e}"))
        })?;

        if proposal.patches.is_empty() {
            return Err(Error::ModelOutput(
                "fix proposal contained no patches".to_string(),
            ));
        }
        Ok(proposal)
    }
}

fn build_prompt(
    issue_description: &str,
    analysis: &IssueAnalysis,
    search_results: &[SearchResult],
) -> String {
    let mut context = String::new();
    for result in search_results {
        context.push_str(&format!(
            "--- FILE: {} ---\n{}\n\n",
            result.file_path, result.content
        ));
    }

    format!(
        r#"ACT AS: Senior Software Engineer
TASK: Generate a code fix for the reported issue.

### ISSUE DESCRIPTION
{issue_description}

### ANALYSIS
type: {issue_type:?}, complexity: {complexity:?}
requirements:
{requirements}

### CODE CONTEXT
{context}

### STRATEGY
Focus on the smallest possible change to fix the issue. Do not touch unrelated code.

### OUTPUT REQUIREMENTS
Return a single JSON object, no markdown fences:
{{
  "explanation": "detailed explanation of the fix",
  "confidenceScore": 0.95,
  "strategy": "minimal",
  "patches": ["one unified diff per file, with ---/+++ headers and @@ hunks"]
}}

### CRITICAL RULES
1. Each patch must be a valid unified diff against the file content shown above.
2. Context lines in hunks must match the shown content exactly.
3. Preserve existing indentation and style in added lines."#,
        issue_type = analysis.issue_type,
        complexity = analysis.complexity,
        requirements = analysis
            .requirements
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}
