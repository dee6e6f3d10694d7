//! Production stage handlers
//!
//! Wires the nine operational states to their collaborators: GitHub and
//! Gemini clients, ripgrep search, patch application, and the configured
//! build/test commands. All side effects of a run live here; the
//! orchestrator above only sequences them.

use std::path::Path;
use std::sync::Arc;

use super::coordinator::StageCoordinator;
use super::data::{
    ApplyResult, CommandResult, PlanStep, ReviewResult, SearchResult, StageOutput, Submission,
};
use super::state::State;
use crate::agents::{FixGenerator, IssueAnalysis, IssueAnalyzer};
use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::github::{GitHubClient, Issue};
use crate::search::{run_ripgrep, SearchOptions};
use crate::{patch, Error, Result};

/// Per-invocation runtime flags from the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// Report what would change without touching files or running commands
    pub dry_run: bool,
    /// Open a pull request after a successful run
    pub auto_pr: bool,
}

const MAX_CANDIDATE_FILES: usize = 8;
const MAX_TITLE_KEYWORDS: usize = 3;
const MAX_HITS_PER_KEYWORD: usize = 3;

/// Build the coordinator for the issue-fixing workflow, with every
/// operational state's handler registered.
pub fn create_issue_coordinator(config: &Config, runtime: RuntimeOptions) -> Result<StageCoordinator> {
    let github = Arc::new(GitHubClient::new(&config.github, &config.github_token()?)?);
    let gemini = Arc::new(GeminiClient::new(&config.gemini, config.gemini_api_key()?)?);
    let analyzer = Arc::new(IssueAnalyzer::new(gemini.clone()));
    let generator = Arc::new(FixGenerator::new(gemini));

    let mut coordinator = StageCoordinator::new();

    coordinator.register(State::Analyzing, move |ctx| {
        let github = github.clone();
        let analyzer = analyzer.clone();
        Box::pin(async move {
            let input = &ctx.input;
            let issue = github
                .get_issue(&input.owner, &input.repo, input.issue_number)
                .await?;
            let analysis = analyzer.analyze(&issue).await?;
            Ok(StageOutput {
                issue: Some(issue),
                analysis: Some(analysis),
                ..Default::default()
            })
        })
    })?;

    coordinator.register(State::Searching, move |ctx| {
        Box::pin(async move {
            let mut results = Vec::new();

            // Files the analysis named come first.
            let candidates = ctx
                .analysis
                .as_ref()
                .map(|a| a.affected_files.as_slice())
                .unwrap_or_default();
            for file_path in candidates.iter().take(MAX_CANDIDATE_FILES) {
                if let Ok(content) = tokio::fs::read_to_string(file_path).await {
                    results.push(SearchResult {
                        file_path: file_path.clone(),
                        content,
                    });
                }
            }

            // Fall back to searching the issue title's keywords.
            if results.is_empty() {
                if let Some(issue) = &ctx.issue {
                    for word in title_keywords(&issue.title) {
                        let hits = run_ripgrep(
                            Path::new("."),
                            &SearchOptions {
                                pattern: word,
                                ..Default::default()
                            },
                        )
                        .await?;
                        for hit in hits.into_iter().take(MAX_HITS_PER_KEYWORD) {
                            if results.iter().any(|r| r.file_path == hit.file_path) {
                                continue;
                            }
                            if let Ok(content) = tokio::fs::read_to_string(&hit.file_path).await {
                                results.push(SearchResult {
                                    file_path: hit.file_path,
                                    content,
                                });
                            }
                        }
                    }
                }
            }

            Ok(StageOutput {
                search_results: Some(results),
                ..Default::default()
            })
        })
    })?;

    coordinator.register(State::Planning, move |ctx| {
        Box::pin(async move {
            let plan = ctx
                .analysis
                .as_ref()
                .map(plan_from_analysis)
                .unwrap_or_default();
            Ok(StageOutput {
                plan: Some(plan),
                ..Default::default()
            })
        })
    })?;

    coordinator.register(State::Generating, move |ctx| {
        let generator = generator.clone();
        Box::pin(async move {
            let (Some(issue), Some(analysis)) = (&ctx.issue, &ctx.analysis) else {
                return Err(Error::MissingContext("issue or analysis"));
            };

            let description = format!("{}\n\n{}", issue.title, issue.body.as_deref().unwrap_or(""));
            let search_results = ctx.search_results.as_deref().unwrap_or_default();
            let proposal = generator
                .generate(&description, analysis, search_results)
                .await?;

            Ok(StageOutput {
                fix_proposal: Some(proposal),
                ..Default::default()
            })
        })
    })?;

    coordinator.register(State::Applying, move |ctx| {
        Box::pin(async move {
            let Some(proposal) = &ctx.fix_proposal else {
                return Err(Error::MissingContext("fix proposal"));
            };

            if runtime.dry_run {
                return Ok(StageOutput {
                    apply_result: Some(ApplyResult {
                        applied_files: Vec::new(),
                        patch_count: proposal.patches.len(),
                    }),
                    ..Default::default()
                });
            }

            // Patches against new files see empty content.
            let updated = patch::apply_all(&proposal.patches, |path| {
                match std::fs::read_to_string(path) {
                    Ok(content) => Ok(content),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                    Err(e) => Err(e.into()),
                }
            })?;

            let mut applied_files = Vec::with_capacity(updated.len());
            for (path, content) in updated {
                if let Some(parent) = Path::new(&path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(&path, content)?;
                applied_files.push(path);
            }

            Ok(StageOutput {
                apply_result: Some(ApplyResult {
                    applied_files,
                    patch_count: proposal.patches.len(),
                }),
                ..Default::default()
            })
        })
    })?;

    let build_command = config.commands.build.clone();
    coordinator.register(State::Building, move |_ctx| {
        let command = build_command.clone();
        Box::pin(async move {
            let result = if runtime.dry_run {
                dry_run_result()
            } else {
                run_command(&command).await?
            };
            Ok(StageOutput {
                build_result: Some(result),
                ..Default::default()
            })
        })
    })?;

    let test_command = config.commands.test.clone();
    coordinator.register(State::Testing, move |_ctx| {
        let command = test_command.clone();
        Box::pin(async move {
            let result = if runtime.dry_run {
                dry_run_result()
            } else {
                run_command(&command).await?
            };
            Ok(StageOutput {
                test_result: Some(result),
                ..Default::default()
            })
        })
    })?;

    coordinator.register(State::Reviewing, move |_ctx| {
        Box::pin(async move {
            Ok(StageOutput {
                review_result: Some(ReviewResult {
                    approved: true,
                    summary: "Auto-approved".to_string(),
                    issues: Vec::new(),
                    suggestions: Vec::new(),
                }),
                ..Default::default()
            })
        })
    })?;

    coordinator.register(State::Submitting, move |ctx| {
        Box::pin(async move {
            Ok(StageOutput {
                submission: Some(Submission {
                    pr_number: 0,
                    pr_url: String::new(),
                    commit_message: commit_message(ctx.issue.as_ref(), &ctx.input.repo),
                }),
                ..Default::default()
            })
        })
    })?;

    Ok(coordinator)
}

/// Issue-title words worth grepping for: longer than three characters,
/// at most three of them.
fn title_keywords(title: &str) -> Vec<String> {
    title
        .split_whitespace()
        .filter(|w| w.len() > 3)
        .take(MAX_TITLE_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// One minimal plan step per affected file, capped.
fn plan_from_analysis(analysis: &IssueAnalysis) -> Vec<PlanStep> {
    analysis
        .affected_files
        .iter()
        .take(MAX_CANDIDATE_FILES)
        .map(|file| PlanStep {
            description: format!("Update {file} to address issue requirements"),
            target_files: vec![file.clone()],
            strategy: "minimal".to_string(),
        })
        .collect()
}

fn commit_message(issue: Option<&Issue>, repo: &str) -> String {
    match issue {
        Some(issue) => format!("fix: {} (#{})", issue.title, issue.number),
        None => format!("fix: automated change for {repo}"),
    }
}

fn dry_run_result() -> CommandResult {
    CommandResult {
        success: true,
        output: "dry-run".to_string(),
        errors: Vec::new(),
    }
}

/// Run a configured shell command, capturing its output. A failing
/// command is evidence for review, not an error.
async fn run_command(command: &str) -> Result<CommandResult> {
    let parts = shell_words::split(command)
        .map_err(|e| Error::Command(format!("invalid command {command:?}: {e}")))?;
    let Some((program, args)) = parts.split_first() else {
        return Err(Error::Command("empty command configured".to_string()));
    };

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Command(format!("failed to spawn {program}: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let success = output.status.success();

    Ok(CommandResult {
        success,
        output: format!("{stdout}{stderr}"),
        errors: if success {
            Vec::new()
        } else {
            vec![stderr.trim().to_string()]
        },
    })
}
