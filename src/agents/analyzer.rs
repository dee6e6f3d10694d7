//! Issue analyzer agent

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gemini::{extract_json_object, GeminiClient, GenerateOptions};
use crate::github::Issue;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Bug,
    Feature,
    Documentation,
    Refactor,
    Question,
    Chore,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueComplexity {
    Simple,
    Medium,
    Complex,
}

/// Structured classification of an issue, as produced by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueAnalysis {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub complexity: IssueComplexity,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

/// Classifies a GitHub issue into type, complexity, requirements and the
/// files it likely touches.
pub struct IssueAnalyzer {
    gemini: Arc<GeminiClient>,
}

impl IssueAnalyzer {
    pub fn new(gemini: Arc<GeminiClient>) -> Self {
        Self { gemini }
    }

    pub async fn analyze(&self, issue: &Issue) -> Result<IssueAnalysis> {
        let prompt = build_prompt(issue);
        let text = self
            .gemini
            .generate(&prompt, &GenerateOptions::default())
            .await?;

        let value = extract_json_object(&text)?;
        serde_json::from_value(value).map_err(|e| {
            Error::ModelOutput(format!("analysis did not match expected schema: {e}"))
        })
    }
}

fn build_prompt(issue: &Issue) -> String {
    let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
    format!(
        r#"ACT AS: Senior Software Engineer triaging a GitHub issue.

### ISSUE
Title: {title}
Labels: {labels}
Body:
{body}

### TASK
Classify the issue and extract what a fix needs.

### OUTPUT REQUIREMENTS
Return a single JSON object, no markdown fences:
{{
  "type": "bug" | "feature" | "documentation" | "refactor" | "question" | "chore" | "unknown",
  "complexity": "simple" | "medium" | "complex",
  "requirements": ["each concrete requirement a fix must satisfy"],
  "affected_files": ["repository-relative paths likely involved"]
}}"#,
        title = issue.title,
        labels = labels.join(", "),
        body = issue.body.as_deref().unwrap_or(""),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_deserializes_the_model_shape() {
        let json = r#"{
            "type": "bug",
            "complexity": "simple",
            "requirements": ["return empty list for empty input"],
            "affected_files": ["src/parser.rs"]
        }"#;

        let analysis: IssueAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.issue_type, IssueType::Bug);
        assert_eq!(analysis.complexity, IssueComplexity::Simple);
        assert_eq!(analysis.affected_files, vec!["src/parser.rs"]);
    }

    #[test]
    fn missing_arrays_default_to_empty() {
        let json = r#"{"type": "chore", "complexity": "medium"}"#;
        let analysis: IssueAnalysis = serde_json::from_str(json).unwrap();
        assert!(analysis.requirements.is_empty());
        assert!(analysis.affected_files.is_empty());
    }

    #[test]
    fn unknown_type_values_are_rejected() {
        let json = r#"{"type": "epic", "complexity": "simple"}"#;
        assert!(serde_json::from_str::<IssueAnalysis>(json).is_err());
    }
}
