//! Code search
//!
//! Shells out to ripgrep and parses its `--line-number --column` output.
//! Used by the SEARCHING stage to locate files relevant to an issue when
//! the analysis did not name any.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;

use crate::{Error, Result};

/// One ripgrep match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub file_path: String,
    pub line: u64,
    pub column: u64,
    pub text: String,
}

/// Options for one ripgrep invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Literal pattern to search for
    pub pattern: String,
    /// Restrict to a ripgrep file type (`-t`)
    pub file_type: Option<String>,
    /// Cap the number of matches per file (`-m`)
    pub max_per_file: Option<u32>,
}

/// Run ripgrep in `cwd` and parse its output.
///
/// Exit code 1 with empty output means "no matches" and yields an empty
/// list; any other failure surfaces as a command error.
pub async fn run_ripgrep(cwd: &Path, options: &SearchOptions) -> Result<Vec<Match>> {
    let mut command = Command::new("rg");
    command
        .arg("--line-number")
        .arg("--column")
        .arg("--fixed-strings");
    if let Some(file_type) = &options.file_type {
        command.arg("-t").arg(file_type);
    }
    if let Some(max) = options.max_per_file {
        command.arg("-m").arg(max.to_string());
    }
    command.arg(&options.pattern).current_dir(cwd);

    let output = command
        .output()
        .await
        .map_err(|e| Error::Command(format!("failed to spawn rg: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() && stdout.is_empty() {
        // rg exits 1 on zero matches; only treat other codes as failures.
        if output.status.code() == Some(1) {
            return Ok(Vec::new());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Command(format!("ripgrep failed: {stderr}")));
    }

    Ok(parse_output(&stdout))
}

/// Parse `path:line:column:text` lines. Unparseable lines (binary-file
/// notices, summaries) are skipped.
pub fn parse_output(output: &str) -> Vec<Match> {
    // Non-greedy path so Windows-style drive colons don't split early.
    let re = match Regex::new(r"^(.+?):(\d+):(\d+):(.*)$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(Match {
                file_path: caps[1].to_string(),
                line: caps[2].parse().ok()?,
                column: caps[3].parse().ok()?,
                text: caps[4].to_string(),
            })
        })
        .collect()
}
